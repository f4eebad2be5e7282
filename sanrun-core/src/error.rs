//! Error types for sanrun-core.
//!
//! Harness errors are kept apart from test failures: a failing test run is a
//! [`RunResult`](crate::run::RunResult) with a non-zero exit code, never a
//! [`HarnessError`]. Harness errors map to [`HARNESS_EXIT_CODE`], except an
//! interruption, which exits like the signal that caused it.

use crate::run::RunResult;
use camino::Utf8PathBuf;
use sanrun_manifest::{InconsistentPatchSet, ManifestError};
use std::fmt;
use thiserror::Error;

/// Exit code for failures of the harness itself.
pub const HARNESS_EXIT_CODE: u8 = 125;

/// Pipeline phase an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Config,
    Resolve,
    Locate,
    Snapshot,
    Patch,
    Allocator,
    Run,
    Restore,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Config => "config",
            Phase::Resolve => "resolve manifests",
            Phase::Locate => "locate compiler",
            Phase::Snapshot => "snapshot",
            Phase::Patch => "patch manifests",
            Phase::Allocator => "allocator override",
            Phase::Run => "run tests",
            Phase::Restore => "restore",
        };
        f.write_str(s)
    }
}

/// One file that could not be put back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: Utf8PathBuf,
    pub message: String,
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn list<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum HarnessError {
    /// No candidate compiler built the instrumented probe program.
    #[error("no instrumentation-capable compiler found (tried: {})", list(.tried))]
    NoCapableCompiler { tried: Vec<String> },

    /// Neither manifest format exists at a requested path.
    #[error("manifest not found: {requested} (also tried {sibling})")]
    ManifestNotFound {
        requested: Utf8PathBuf,
        sibling: Utf8PathBuf,
    },

    /// A manifest exists but is unreadable, ambiguous or not editable.
    #[error(transparent)]
    Manifest(ManifestError),

    #[error(transparent)]
    InconsistentPatchSet(#[from] InconsistentPatchSet),

    /// One or more files could not be restored. Instrumentation flags may be
    /// left behind in these files.
    #[error("failed to restore {} file(s): {}", .failures.len(), list(.failures))]
    RestoreFailure {
        failures: Vec<FileFailure>,
        /// The test run, when it got that far.
        run: Option<RunResult>,
    },

    /// A termination signal arrived before the test process was started.
    #[error("interrupted by signal {signal} during {phase}")]
    Interrupted { signal: i32, phase: Phase },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{phase} failed: {source:#}")]
    Runtime {
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },
}

impl From<ManifestError> for HarnessError {
    fn from(e: ManifestError) -> Self {
        match e {
            ManifestError::NotFound { requested, sibling } => {
                HarnessError::ManifestNotFound { requested, sibling }
            }
            other => HarnessError::Manifest(other),
        }
    }
}

impl HarnessError {
    pub fn runtime(phase: Phase, source: anyhow::Error) -> Self {
        HarnessError::Runtime { phase, source }
    }

    pub fn phase(&self) -> Phase {
        match self {
            HarnessError::NoCapableCompiler { .. } => Phase::Locate,
            HarnessError::ManifestNotFound { .. }
            | HarnessError::Manifest(_)
            | HarnessError::InconsistentPatchSet(_) => Phase::Resolve,
            HarnessError::RestoreFailure { .. } => Phase::Restore,
            HarnessError::Config(_) => Phase::Config,
            HarnessError::Interrupted { phase, .. } | HarnessError::Runtime { phase, .. } => *phase,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            HarnessError::Interrupted { signal, .. } => {
                u8::try_from(128 + signal).unwrap_or(HARNESS_EXIT_CODE)
            }
            _ => HARNESS_EXIT_CODE,
        }
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
