//! Embeddable sanitizer run pipeline for sanrun.
//!
//! Clap-free and I/O-abstracted: compiler probing, file access, object
//! building and the test process sit behind the traits in [`ports`], with
//! default implementations in [`adapters`].
//!
//! # Entry points
//!
//! - [`Orchestrator::plan`](orchestrator::Orchestrator::plan) decides a run without writing.
//! - [`Orchestrator::execute`](orchestrator::Orchestrator::execute) patches, runs and restores.
//! - [`resolve_patch_set`](orchestrator::resolve_patch_set) lists what a run would instrument.

pub mod adapters;
pub mod allocator;
pub mod env;
pub mod error;
pub mod ledger;
pub mod locator;
pub mod orchestrator;
pub mod ports;
pub mod run;
pub mod settings;
pub mod signals;

pub use error::{HARNESS_EXIT_CODE, HarnessError, HarnessResult, Phase};
pub use locator::{CompilerProfile, Platform, ToolchainFamily};
pub use orchestrator::{Orchestrator, Plan, RunOutcome, RunState};
pub use run::{RunOutput, RunResult, TestCommand};
pub use settings::RunSettings;

// Re-export manifest types so embedders don't need sanrun-manifest directly.
pub use sanrun_manifest::{Manifest, ManifestFormat, PatchSet};
