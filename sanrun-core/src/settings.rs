//! Clap-free settings for the sanitizer run pipeline.

use crate::locator::Platform;
use crate::run::DEFAULT_TEST_COMMAND;
use camino::Utf8PathBuf;

/// Settings for one sanitizer run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub repo_root: Utf8PathBuf,

    /// Manifests to instrument. Relative paths are joined onto `repo_root`;
    /// empty means every native manifest found in the repository.
    pub manifests: Vec<Utf8PathBuf>,
    pub command: Vec<String>,

    // Allocator
    pub allocator_override: bool,
    /// `None` uses `$MOON_HOME/lib/libmoonbitrun.o`.
    pub runtime_object: Option<Utf8PathBuf>,

    /// `None` uses `.lsan-suppressions` at the repository root.
    pub suppressions: Option<Utf8PathBuf>,

    // Toolchain
    pub cc: Option<Utf8PathBuf>,
    /// `None` uses the platform archiver.
    pub ar: Option<Utf8PathBuf>,
    pub platform: Platform,

    // Output
    pub log: Option<Utf8PathBuf>,
    pub show_diff: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            repo_root: Utf8PathBuf::from("."),
            manifests: Vec::new(),
            command: DEFAULT_TEST_COMMAND.iter().map(|s| s.to_string()).collect(),
            allocator_override: true,
            runtime_object: None,
            suppressions: None,
            cc: None,
            ar: None,
            platform: Platform::current(),
            log: None,
            show_diff: false,
        }
    }
}
