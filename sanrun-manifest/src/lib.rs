//! Manifest engine for sanrun.
//!
//! Responsibilities:
//! - Resolve a package manifest in either format (`moon.pkg` / `moon.pkg.json`),
//!   falling back to the sibling file when the requested one is absent.
//! - Read and write the three `link.native` flag fields through one interface,
//!   splicing text for the DSL and pretty printing for JSON.
//! - Compute instrumented flag values and select a consistent patch set.
//! - Discover native manifests in a repository.

pub mod discover;
mod dsl;
pub mod error;
pub mod format;
mod json;
pub mod patch;
pub mod store;

pub use discover::{discover, discover_native};
pub use error::{ManifestError, ManifestResult};
pub use format::{DSL_FILE_NAME, FlagField, JSON_FILE_NAME, ManifestFormat, ManifestPath};
pub use patch::{
    InconsistentPatchSet, InstrumentationFlags, NativeRole, PatchMode, PatchOutcome, PatchSet,
    append_tokens, patch, prepend_tokens, render_diff,
};
pub use store::{Manifest, resolve_checked};
