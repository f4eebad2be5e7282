//! Error types for sanrun-manifest.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while resolving, reading, editing or writing a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Neither `moon.pkg` nor `moon.pkg.json` exists for the requested path.
    #[error("manifest not found: {requested} (also tried {sibling})")]
    NotFound {
        requested: Utf8PathBuf,
        sibling: Utf8PathBuf,
    },

    /// The file name is not one of the two supported manifest names.
    #[error("unsupported manifest file name: {path}")]
    UnsupportedFormat { path: Utf8PathBuf },

    /// Both formats exist side by side and disagree on their native sources.
    #[error(
        "{requested} and {sibling} both exist but declare different native sources ({requested_sources:?} vs {sibling_sources:?})"
    )]
    Conflict {
        requested: Utf8PathBuf,
        sibling: Utf8PathBuf,
        requested_sources: Vec<String>,
        sibling_sources: Vec<String>,
    },

    /// The manifest could not be parsed in its declared format.
    #[error("parse {path}: {message}")]
    Parse { path: Utf8PathBuf, message: String },

    /// A structural edit could not be applied (e.g. `link` is not an object).
    #[error("edit {path}: {message}")]
    Edit { path: Utf8PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ManifestError {
    /// True when the manifest simply does not exist (as opposed to being broken).
    pub fn is_not_found(&self) -> bool {
        matches!(self, ManifestError::NotFound { .. })
    }
}

pub type ManifestResult<T> = Result<T, ManifestError>;

#[cfg(test)]
mod tests {
    use super::ManifestError;
    use camino::Utf8PathBuf;

    #[test]
    fn not_found_names_both_candidates() {
        let err = ManifestError::NotFound {
            requested: Utf8PathBuf::from("pkg/moon.pkg.json"),
            sibling: Utf8PathBuf::from("pkg/moon.pkg"),
        };
        assert!(err.is_not_found());
        let msg = err.to_string();
        assert!(msg.contains("pkg/moon.pkg.json"));
        assert!(msg.contains("pkg/moon.pkg"));
    }

    #[test]
    fn parse_error_is_not_not_found() {
        let err = ManifestError::Parse {
            path: Utf8PathBuf::from("moon.pkg.json"),
            message: "eof".to_string(),
        };
        assert!(!err.is_not_found());
        assert!(err.to_string().starts_with("parse moon.pkg.json"));
    }
}
