//! `sanrun.toml`: per-repository defaults for `sanrun run`.
//!
//! The file lives at the repository root and names the test command, the
//! packages to instrument, the suppressions file, tool overrides and the
//! allocator override. Command-line values win over it; relative paths in it
//! are anchored at the repository root.

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use serde::Deserialize;
use tracing::debug;

/// The config file name to search for.
pub const CONFIG_FILE_NAME: &str = "sanrun.toml";

/// Top-level configuration from sanrun.toml.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SanrunConfig {
    pub run: RunConfig,
    pub allocator: AllocatorConfig,
}

/// `[run]` section. Relative paths are resolved against the repository root.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Test command; empty means `moon test --target native -v`.
    pub command: Vec<String>,

    /// Manifests to instrument.
    pub packages: Vec<Utf8PathBuf>,

    /// LeakSanitizer suppressions file.
    pub suppressions: Option<Utf8PathBuf>,

    /// Compiler to try before the platform candidates.
    pub cc: Option<Utf8PathBuf>,

    /// Archiver replacing the platform default.
    pub ar: Option<Utf8PathBuf>,
}

/// `[allocator]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AllocatorConfig {
    /// Replace the runtime's bundled allocator object during the run.
    #[serde(rename = "override")]
    pub enabled: bool,

    /// Runtime object to replace (default: `$MOON_HOME/lib/libmoonbitrun.o`).
    pub runtime_object: Option<Utf8PathBuf>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            runtime_object: None,
        }
    }
}

/// Path of `sanrun.toml` at `repo_root`, when one exists. Parent directories
/// are not searched.
pub fn discover_config(repo_root: &Utf8Path) -> Option<Utf8PathBuf> {
    let path = repo_root.join(CONFIG_FILE_NAME);
    if path.is_file() {
        debug!(config = %path, "using config file");
        Some(path)
    } else {
        debug!(config = %path, "no config file; using defaults");
        None
    }
}

/// Read `sanrun.toml`. A failure here ends the run before any manifest is
/// touched.
pub fn load_config(path: &Utf8Path) -> anyhow::Result<SanrunConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {path}"))?;
    parse_config(&contents).with_context(|| format!("parse {path}"))
}

/// Parse `[run]` and `[allocator]`. Unknown keys are errors.
pub fn parse_config(contents: &str) -> anyhow::Result<SanrunConfig> {
    toml::from_str(contents).context("invalid sanrun.toml")
}

/// The repository's run defaults, or the built-in ones (default test command,
/// every native package, allocator override on) when there is no file.
pub fn load_or_default(repo_root: &Utf8Path) -> anyhow::Result<SanrunConfig> {
    discover_config(repo_root).map_or_else(|| Ok(SanrunConfig::default()), |p| load_config(&p))
}

/// Run arguments taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct CliRunArgs {
    pub packages: Vec<Utf8PathBuf>,
    pub command: Vec<String>,
    pub suppressions: Option<Utf8PathBuf>,
    pub cc: Option<Utf8PathBuf>,
    pub no_allocator_override: bool,
    pub runtime_object: Option<Utf8PathBuf>,
}

/// Configuration after applying CLI overrides. Paths are absolute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedConfig {
    pub packages: Vec<Utf8PathBuf>,
    /// Empty when neither side names a command.
    pub command: Vec<String>,
    pub suppressions: Option<Utf8PathBuf>,
    pub cc: Option<Utf8PathBuf>,
    pub ar: Option<Utf8PathBuf>,
    pub allocator_override: bool,
    pub runtime_object: Option<Utf8PathBuf>,
}

/// Builder for merging config file with CLI arguments.
pub struct ConfigMerger {
    config: SanrunConfig,
}

impl ConfigMerger {
    pub fn new(config: SanrunConfig) -> Self {
        Self { config }
    }

    /// Merge with `run` arguments.
    ///
    /// CLI `packages` extend the config list; every other CLI value replaces
    /// the config value when given. `cc` stays a bare name if it has no
    /// directory part, so it can be looked up on `PATH`.
    pub fn merge_run_args(self, repo_root: &Utf8Path, cli: &CliRunArgs) -> MergedConfig {
        let anchor = |p: Utf8PathBuf| {
            if p.is_absolute() {
                p
            } else {
                repo_root.join(p)
            }
        };
        let tool = |p: Utf8PathBuf| {
            if p.components().count() > 1 {
                anchor(p)
            } else {
                p
            }
        };

        let mut packages = self.config.run.packages.clone();
        for p in &cli.packages {
            if !packages.contains(p) {
                packages.push(p.clone());
            }
        }

        let command = if cli.command.is_empty() {
            self.config.run.command.clone()
        } else {
            cli.command.clone()
        };

        MergedConfig {
            packages,
            command,
            suppressions: cli
                .suppressions
                .clone()
                .or(self.config.run.suppressions)
                .map(anchor),
            cc: cli.cc.clone().or(self.config.run.cc).map(tool),
            ar: self.config.run.ar.map(tool),
            allocator_override: !cli.no_allocator_override && self.config.allocator.enabled,
            runtime_object: cli
                .runtime_object
                .clone()
                .or(self.config.allocator.runtime_object)
                .map(anchor),
        }
    }
}
