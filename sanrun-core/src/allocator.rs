//! Allocator override controller.
//!
//! The MoonBit runtime object bundles its own allocator, which hides heap
//! operations from AddressSanitizer. While a run is in flight the object is
//! replaced by an empty one; the original bytes sit in the snapshot ledger.

use crate::error::{HarnessError, HarnessResult, Phase};
use crate::ledger::SnapshotLedger;
use crate::locator::CompilerProfile;
use crate::ports::ObjectBuilder;
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

pub const RUNTIME_OBJECT_NAME: &str = "libmoonbitrun.o";

/// `$MOON_HOME/lib/libmoonbitrun.o`, with `MOON_HOME` defaulting to `~/.moon`.
pub fn default_runtime_object() -> Option<Utf8PathBuf> {
    let home = match std::env::var("MOON_HOME") {
        Ok(h) if !h.is_empty() => Utf8PathBuf::from(h),
        _ => {
            let user_home = std::env::var("HOME")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            Utf8PathBuf::from(user_home).join(".moon")
        }
    };
    Some(home.join("lib").join(RUNTIME_OBJECT_NAME))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorOverride {
    runtime_object: Utf8PathBuf,
    suppressed: bool,
}

impl AllocatorOverride {
    pub fn new(runtime_object: impl Into<Utf8PathBuf>) -> Self {
        Self {
            runtime_object: runtime_object.into(),
            suppressed: false,
        }
    }

    pub fn runtime_object(&self) -> &Utf8Path {
        &self.runtime_object
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Whether there is anything to override.
    pub fn is_present(&self) -> bool {
        self.runtime_object.is_file()
    }

    /// Swap the runtime object for an empty one. A missing object is skipped
    /// with a warning. Calling twice is a no-op.
    pub fn suppress(
        &mut self,
        ledger: &mut SnapshotLedger<'_>,
        builder: &dyn ObjectBuilder,
        profile: &CompilerProfile,
    ) -> HarnessResult<()> {
        if self.suppressed {
            return Ok(());
        }
        if !ledger.contains(&self.runtime_object) {
            if !self.is_present() {
                warn!(object = %self.runtime_object, "runtime object not found; allocator override skipped");
                return Ok(());
            }
            ledger.capture(&[&self.runtime_object])?;
        }

        let empty = builder
            .empty_object(profile)
            .context("build empty runtime object")
            .map_err(|e| HarnessError::runtime(Phase::Allocator, e))?;
        ledger
            .write(&self.runtime_object, &empty)
            .map_err(|e| HarnessError::runtime(Phase::Allocator, e))?;
        self.suppressed = true;
        info!(object = %self.runtime_object, "runtime allocator suppressed");
        Ok(())
    }

    /// Put the runtime object back. No-op unless suppressed.
    pub fn unsuppress(&mut self, ledger: &mut SnapshotLedger<'_>) -> HarnessResult<()> {
        if !self.suppressed {
            return Ok(());
        }
        ledger
            .restore_one(&self.runtime_object)
            .map_err(|e| HarnessError::runtime(Phase::Allocator, e))?;
        self.suppressed = false;
        info!(object = %self.runtime_object, "runtime allocator restored");
        Ok(())
    }
}
