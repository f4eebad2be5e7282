//! Manifest locations, format detection and the fixed set of flag fields.

use crate::error::{ManifestError, ManifestResult};
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use tracing::debug;

/// Name of the structured-DSL package manifest.
pub const DSL_FILE_NAME: &str = "moon.pkg";
/// Name of the JSON package manifest.
pub const JSON_FILE_NAME: &str = "moon.pkg.json";

const JSON_SUFFIX: &str = ".json";

/// Serialization format of a package manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManifestFormat {
    /// `moon.pkg`: edited by splicing value spans, formatting is kept byte for byte.
    Dsl,
    /// `moon.pkg.json`: edited structurally and pretty printed.
    Json,
}

impl ManifestFormat {
    /// Detect the format from the file name alone.
    pub fn detect(path: &Utf8Path) -> Option<Self> {
        let name = path.file_name()?;
        if name.ends_with(JSON_SUFFIX) {
            Some(ManifestFormat::Json)
        } else if name == DSL_FILE_NAME || path.extension() == Some("pkg") {
            Some(ManifestFormat::Dsl)
        } else {
            None
        }
    }

    pub fn other(self) -> Self {
        match self {
            ManifestFormat::Dsl => ManifestFormat::Json,
            ManifestFormat::Json => ManifestFormat::Dsl,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ManifestFormat::Dsl => "dsl",
            ManifestFormat::Json => "json",
        }
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One manifest file on disk together with its detected format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManifestPath {
    path: Utf8PathBuf,
    format: ManifestFormat,
}

impl ManifestPath {
    /// Build a location for `path`, detecting the format from its name.
    pub fn new(path: impl Into<Utf8PathBuf>) -> ManifestResult<Self> {
        let path = path.into();
        match ManifestFormat::detect(&path) {
            Some(format) => Ok(Self { path, format }),
            None => Err(ManifestError::UnsupportedFormat { path }),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn format(&self) -> ManifestFormat {
        self.format
    }

    /// The alternate-format file living next to this one.
    pub fn sibling(&self) -> ManifestPath {
        let name = self.path.file_name().unwrap_or_default();
        let sibling_name = match self.format {
            ManifestFormat::Json => name.strip_suffix(JSON_SUFFIX).unwrap_or(name).to_string(),
            ManifestFormat::Dsl => format!("{name}{JSON_SUFFIX}"),
        };
        ManifestPath {
            path: self.path.with_file_name(sibling_name),
            format: self.format.other(),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Resolve a requested manifest path to the file that actually exists.
    ///
    /// The requested file wins when present; otherwise its sibling in the other
    /// format is used. Fails with [`ManifestError::NotFound`] when neither exists.
    pub fn resolve(requested: &Utf8Path) -> ManifestResult<ManifestPath> {
        let wanted = ManifestPath::new(requested)?;
        if wanted.exists() {
            return Ok(wanted);
        }
        let sibling = wanted.sibling();
        if sibling.exists() {
            debug!(requested = %requested, resolved = %sibling.path, "manifest resolved to sibling format");
            return Ok(sibling);
        }
        Err(ManifestError::NotFound {
            requested: wanted.path,
            sibling: sibling.path,
        })
    }
}

impl fmt::Display for ManifestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Key of the top-level native source list.
pub const NATIVE_SOURCES_KEY: &str = "native-stub";
/// Key of the table holding the backend-specific link settings.
pub const LINK_KEY: &str = "link";
/// Key of the native backend table inside `link`.
pub const NATIVE_KEY: &str = "native";

/// The three flag slots inside `link.native`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlagField {
    /// Flags for compiling the generated C of the package.
    CompileFlags,
    /// Flags for compiling the package's native stub files.
    StubCompileFlags,
    /// Flags handed to the linker.
    LinkFlags,
}

impl FlagField {
    pub const ALL: [FlagField; 3] = [
        FlagField::CompileFlags,
        FlagField::StubCompileFlags,
        FlagField::LinkFlags,
    ];

    pub fn key(self) -> &'static str {
        match self {
            FlagField::CompileFlags => "cc-flags",
            FlagField::StubCompileFlags => "stub-cc-flags",
            FlagField::LinkFlags => "cc-link-flags",
        }
    }
}

impl fmt::Display for FlagField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
