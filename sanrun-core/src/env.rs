//! Sanitizer environment for the test process.

use crate::error::{HarnessError, HarnessResult};
use crate::locator::{CompilerProfile, ToolchainFamily};
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Conventional suppressions file at the repository root.
pub const SUPPRESSIONS_FILE_NAME: &str = ".lsan-suppressions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizerOptions {
    pub detect_leaks: bool,
    /// Slow, frame-pointer-independent unwinding on malloc. Always on.
    pub accurate_unwind: bool,
}

impl SanitizerOptions {
    pub fn for_profile(profile: &CompilerProfile) -> Self {
        Self {
            detect_leaks: profile.supports_leak_detection,
            accurate_unwind: true,
        }
    }

    pub fn asan_options(&self) -> String {
        format!(
            "detect_leaks={}:fast_unwind_on_malloc={}",
            u8::from(self.detect_leaks),
            u8::from(!self.accurate_unwind)
        )
    }
}

/// `LSAN_OPTIONS` value for `path`, or `None` when the file does not exist.
pub fn suppressions_option(path: &Utf8Path) -> HarnessResult<Option<String>> {
    if !path.is_absolute() {
        return Err(HarnessError::Config(format!(
            "suppressions path must be absolute: {path}"
        )));
    }
    if !path.is_file() {
        debug!(path = %path, "no suppressions file");
        return Ok(None);
    }
    Ok(Some(format!("suppressions={path}")))
}

/// A line of a suppressions file that LeakSanitizer will not understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSuppression {
    pub line: usize,
    pub text: String,
}

/// Check suppressions text: blank lines and `#` comments are allowed, every
/// other line must be a `leak:<pattern>` entry.
pub fn check_suppressions(text: &str) -> Vec<InvalidSuppression> {
    text.lines()
        .enumerate()
        .filter_map(|(i, raw)| {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match line.strip_prefix("leak:") {
                Some(pattern) if !pattern.trim().is_empty() => None,
                _ => Some(InvalidSuppression {
                    line: i + 1,
                    text: line.to_string(),
                }),
            }
        })
        .collect()
}

/// Warn about every invalid line in the suppressions file, if there is one.
pub fn validate_suppressions(path: &Utf8Path) -> anyhow::Result<usize> {
    if !path.is_file() {
        return Ok(0);
    }
    let text = fs::read_to_string(path)?;
    let invalid = check_suppressions(&text);
    for bad in &invalid {
        warn!(file = %path, line = bad.line, text = %bad.text, "not a leak suppression; LeakSanitizer will ignore it");
    }
    Ok(invalid.len())
}

/// Variables added to the test process environment.
pub fn sanitizer_env(
    profile: &CompilerProfile,
    suppressions: Option<&Utf8PathBuf>,
) -> HarnessResult<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();

    // moon reads MOON_CC/MOON_AR; cl.exe cannot take flags through it.
    if profile.family != ToolchainFamily::Msvc {
        env.insert(
            "MOON_CC".to_string(),
            format!("{} {}", profile.compiler, profile.flags().compile_string()),
        );
        env.insert("MOON_AR".to_string(), profile.archiver.to_string());
    }

    let options = SanitizerOptions::for_profile(profile);
    env.insert("ASAN_OPTIONS".to_string(), options.asan_options());

    if let Some(path) = suppressions
        && let Some(value) = suppressions_option(path)?
    {
        if options.detect_leaks {
            env.insert("LSAN_OPTIONS".to_string(), value);
        } else {
            debug!(path = %path, "leak detection unsupported; suppressions unused");
        }
    }
    Ok(env)
}
