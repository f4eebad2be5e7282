//! Repository scan for package manifests.

use crate::error::{ManifestError, ManifestResult};
use crate::format::{DSL_FILE_NAME, JSON_FILE_NAME, ManifestPath};
use crate::store::{Manifest, resolve_checked};
use camino::{Utf8Path, Utf8PathBuf};
use glob::{Pattern, glob};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Directories holding build output or fetched dependencies.
const SKIP_DIRS: &[&str] = &["target", ".mooncakes", "_build", ".git", "node_modules"];

fn skipped(root: &Utf8Path, path: &Utf8Path) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| SKIP_DIRS.contains(&c.as_str()))
}

/// Every package directory under `root` with a manifest, one location per
/// directory (sibling pairs are collapsed; `moon.pkg` is preferred).
///
/// A directory whose two manifests disagree on native sources is skipped with
/// a warning; only the glob itself can fail.
pub fn discover(root: &Utf8Path) -> ManifestResult<Vec<ManifestPath>> {
    let escaped = Pattern::escape(root.as_str());
    let mut dirs: BTreeSet<Utf8PathBuf> = BTreeSet::new();

    for name in [DSL_FILE_NAME, JSON_FILE_NAME] {
        let pattern = format!("{escaped}/**/{name}");
        let entries = glob(&pattern).map_err(|e| ManifestError::Parse {
            path: Utf8PathBuf::from(pattern.clone()),
            message: e.to_string(),
        })?;
        for entry in entries {
            let Ok(path) = entry else { continue };
            let Ok(path) = Utf8PathBuf::from_path_buf(path) else {
                continue;
            };
            if skipped(root, &path) {
                continue;
            }
            if let Some(dir) = path.parent() {
                dirs.insert(dir.to_path_buf());
            }
        }
    }

    let mut out = Vec::new();
    for dir in dirs {
        match resolve_checked(&dir.join(DSL_FILE_NAME)) {
            Ok(location) => {
                debug!(manifest = %location, "discovered manifest");
                out.push(location);
            }
            Err(e) => warn!(dir = %dir, "skipping package: {e}"),
        }
    }
    Ok(out)
}

/// Load every discovered manifest that declares native sources or link flags.
/// Manifests that fail to load are skipped with a warning.
pub fn discover_native(root: &Utf8Path) -> ManifestResult<Vec<Manifest>> {
    let mut out = Vec::new();
    for location in discover(root)? {
        let path = location.path().to_path_buf();
        match Manifest::from_location(location) {
            Ok(m) if m.is_native() => out.push(m),
            Ok(_) => {}
            Err(e) => warn!(manifest = %path, "skipping unreadable manifest: {e}"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ManifestFormat;
    use std::fs;

    #[test]
    fn finds_both_formats_and_skips_build_dirs() {
        let td = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        for dir in ["src/lib", "src/main", "target/native/x", ".mooncakes/dep"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        fs::write(root.join("src/lib/moon.pkg.json"), r#"{"native-stub": ["s.c"]}"#).unwrap();
        fs::write(root.join("src/main/moon.pkg"), "options(\n  \"is-main\": true,\n)\n").unwrap();
        fs::write(root.join("target/native/x/moon.pkg.json"), "{}").unwrap();
        fs::write(root.join(".mooncakes/dep/moon.pkg.json"), "{}").unwrap();

        let found = discover(&root).unwrap();
        let rel: Vec<_> = found
            .iter()
            .map(|m| (m.path().strip_prefix(&root).unwrap().to_string(), m.format()))
            .collect();
        assert_eq!(
            rel,
            vec![
                ("src/lib/moon.pkg.json".to_string(), ManifestFormat::Json),
                ("src/main/moon.pkg".to_string(), ManifestFormat::Dsl),
            ]
        );

        let native = discover_native(&root).unwrap();
        assert_eq!(native.len(), 1);
        assert!(native[0].declares_native_sources());
    }

    #[test]
    fn broken_and_conflicting_packages_are_skipped() {
        let td = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        for dir in ["src/lib", "fixtures/x", "fixtures/pair"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        fs::write(root.join("src/lib/moon.pkg.json"), r#"{"native-stub": ["s.c"]}"#).unwrap();
        fs::write(root.join("fixtures/x/moon.pkg.json"), "{ not json").unwrap();
        fs::write(root.join("fixtures/pair/moon.pkg.json"), r#"{"native-stub": ["a.c"]}"#)
            .unwrap();
        fs::write(
            root.join("fixtures/pair/moon.pkg"),
            "options(\n  \"native-stub\": [\"b.c\"],\n)\n",
        )
        .unwrap();

        let found = discover(&root).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|m| !m.path().as_str().contains("pair")));

        let native = discover_native(&root).unwrap();
        assert_eq!(native.len(), 1);
        assert!(native[0].path().ends_with("src/lib/moon.pkg.json"));
    }
}
