//! Flag algebra and patch-set selection.
//!
//! Enabling instrumentation:
//! - `cc-flags` is **set** to the instrumentation compile flags;
//! - `stub-cc-flags` gets the instrumentation tokens **appended**;
//! - `cc-link-flags` gets the instrumentation link tokens **prepended**.
//!
//! Pre-existing tokens are never dropped, reordered or duplicated. There is no
//! inverse transform: restoring a manifest means writing back its captured
//! bytes, which is the snapshot ledger's job.

use crate::error::ManifestResult;
use crate::format::FlagField;
use crate::store::Manifest;
use camino::Utf8PathBuf;
use diffy::PatchFormatter;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    Enable,
    /// Left to the snapshot ledger; patching in this mode never edits.
    Restore,
}

/// Tokens injected into each flag field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentationFlags {
    pub compile: Vec<String>,
    pub stub: Vec<String>,
    pub link: Vec<String>,
}

fn tokens(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl InstrumentationFlags {
    /// gcc / clang style flags.
    pub fn gnu() -> Self {
        Self {
            compile: tokens(&["-g", "-fsanitize=address", "-fno-omit-frame-pointer"]),
            stub: tokens(&["-g", "-fsanitize=address", "-fno-omit-frame-pointer"]),
            link: tokens(&["-fsanitize=address"]),
        }
    }

    /// MSVC `cl.exe` style flags.
    pub fn msvc() -> Self {
        Self {
            compile: tokens(&["/Zi", "/fsanitize=address"]),
            stub: tokens(&["/Zi", "/fsanitize=address"]),
            link: tokens(&["/fsanitize=address"]),
        }
    }

    pub fn compile_string(&self) -> String {
        self.compile.join(" ")
    }
}

fn split(existing: Option<&str>) -> Vec<&str> {
    existing.map(|s| s.split_whitespace().collect()).unwrap_or_default()
}

/// Append every token of `extra` that `existing` does not already carry.
pub fn append_tokens(existing: Option<&str>, extra: &[String]) -> String {
    let mut out: Vec<&str> = split(existing);
    for tok in extra {
        if !out.contains(&tok.as_str()) {
            out.push(tok);
        }
    }
    out.join(" ")
}

/// Prepend every token of `extra` that `existing` does not already carry,
/// keeping `extra`'s order.
pub fn prepend_tokens(existing: Option<&str>, extra: &[String]) -> String {
    let current = split(existing);
    let mut out: Vec<&str> = extra
        .iter()
        .map(String::as_str)
        .filter(|tok| !current.contains(tok))
        .collect();
    out.dedup();
    out.extend(current);
    out.join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Fields whose value changed.
    Patched(Vec<FlagField>),
    /// Nothing edited; restoration happens from the captured snapshot.
    Deferred,
}

/// Apply `mode` to an in-memory manifest. Call [`Manifest::save`] to persist.
pub fn patch(
    manifest: &mut Manifest,
    mode: PatchMode,
    flags: &InstrumentationFlags,
) -> ManifestResult<PatchOutcome> {
    if mode == PatchMode::Restore {
        debug!(manifest = %manifest.location(), "restore deferred to snapshot");
        return Ok(PatchOutcome::Deferred);
    }

    let mut changed = Vec::new();
    for field in FlagField::ALL {
        let current = manifest.get(field);
        let next = match field {
            FlagField::CompileFlags => flags.compile_string(),
            FlagField::StubCompileFlags => append_tokens(current.as_deref(), &flags.stub),
            FlagField::LinkFlags => prepend_tokens(current.as_deref(), &flags.link),
        };
        if current.as_deref() == Some(next.as_str()) {
            continue;
        }
        manifest.set(field, &next)?;
        debug!(manifest = %manifest.location(), field = %field, value = %next, "set flag field");
        changed.push(field);
    }
    Ok(PatchOutcome::Patched(changed))
}

/// What a manifest contributes to a native build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeRole {
    /// Declares `native-stub` sources (a library package).
    Sources,
    /// Declares `cc-link-flags` (an executable or test package).
    LinkFlags,
}

impl NativeRole {
    fn of(self, m: &Manifest) -> bool {
        match self {
            NativeRole::Sources => m.declares_native_sources(),
            NativeRole::LinkFlags => m.has_link_flags(),
        }
    }
}

impl fmt::Display for NativeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeRole::Sources => f.write_str("native sources"),
            NativeRole::LinkFlags => f.write_str("link flags"),
        }
    }
}

/// The selection would leave part of the native build uninstrumented.
#[derive(Debug, Error)]
#[error("inconsistent patch set: no selected manifest provides {missing}; omitted: {}", display_paths(.omitted))]
pub struct InconsistentPatchSet {
    pub missing: NativeRole,
    pub omitted: Vec<Utf8PathBuf>,
}

fn display_paths(paths: &[Utf8PathBuf]) -> String {
    if paths.is_empty() {
        return "-".to_string();
    }
    paths.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ")
}

/// Manifests selected for instrumentation.
#[derive(Debug, Clone, Default)]
pub struct PatchSet {
    manifests: Vec<Manifest>,
}

impl PatchSet {
    /// Keep the requested manifests that take part in the native build, and
    /// check the selection against every native manifest found in the repo.
    ///
    /// If the repository has a package of some [`NativeRole`] but the selection
    /// has none, the instrumented build would be inconsistent.
    pub fn select(
        requested: Vec<Manifest>,
        discovered: &[Manifest],
    ) -> Result<PatchSet, InconsistentPatchSet> {
        let mut seen = BTreeSet::new();
        let mut manifests = Vec::new();
        for m in requested {
            if !m.is_native() {
                info!(manifest = %m.location(), "no native sources or link flags; skipping");
                continue;
            }
            if seen.insert(m.path().to_path_buf()) {
                manifests.push(m);
            }
        }

        for role in [NativeRole::Sources, NativeRole::LinkFlags] {
            let selected_has = manifests.iter().any(|m| role.of(m));
            let repo_has = discovered.iter().any(|m| role.of(m));
            if repo_has && !selected_has {
                return Err(InconsistentPatchSet {
                    missing: role,
                    omitted: discovered
                        .iter()
                        .filter(|m| role.of(m))
                        .map(|m| m.path().to_path_buf())
                        .collect(),
                });
            }
        }

        let set = PatchSet { manifests };
        for m in set.unselected(discovered) {
            warn!(manifest = %m.location(), "native manifest not selected; it stays uninstrumented");
        }
        Ok(set)
    }

    /// Native packages in `discovered` with no manifest in this set. A package
    /// is matched by directory, so either of its two manifest files counts.
    pub fn unselected<'d>(&self, discovered: &'d [Manifest]) -> Vec<&'d Manifest> {
        let dirs: BTreeSet<_> = self.manifests.iter().map(|m| m.path().parent()).collect();
        discovered
            .iter()
            .filter(|m| m.is_native() && !dirs.contains(&m.path().parent()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn manifests(&self) -> &[Manifest] {
        &self.manifests
    }

    pub fn manifests_mut(&mut self) -> &mut [Manifest] {
        &mut self.manifests
    }

    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        self.manifests.iter().map(|m| m.path().to_path_buf()).collect()
    }
}

/// Unified diff between the loaded and current text of a manifest.
pub fn render_diff(manifest: &Manifest) -> String {
    let before = manifest.original();
    let after = manifest.render();
    if before == after {
        return String::new();
    }
    let path = manifest.path();
    let mut out = String::new();
    out.push_str(&format!("--- a/{path}\n+++ b/{path}\n"));
    let formatter = PatchFormatter::new();
    let diff = diffy::create_patch(before, &after);
    let body = formatter.fmt_patch(&diff).to_string();
    // diffy repeats the ---/+++ header; keep only the hunks.
    let hunks = body
        .find("@@")
        .map(|i| &body[i..])
        .unwrap_or(body.as_str());
    out.push_str(hunks);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}
