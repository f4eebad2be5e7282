//! Format-independent view over a package manifest.

use crate::dsl::DslDocument;
use crate::error::{ManifestError, ManifestResult};
use crate::format::{FlagField, ManifestFormat, ManifestPath};
use crate::json::JsonDocument;
use camino::Utf8Path;
use fs_err as fs;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
enum Document {
    Dsl(DslDocument),
    Json(JsonDocument),
}

/// A loaded manifest. Reads and writes go through the adapter for its format.
#[derive(Debug, Clone)]
pub struct Manifest {
    location: ManifestPath,
    original: String,
    doc: Document,
    edited: bool,
}

/// Resolve `requested` like [`ManifestPath::resolve`], and additionally refuse
/// to pick a side when both formats exist but list different native sources.
pub fn resolve_checked(requested: &Utf8Path) -> ManifestResult<ManifestPath> {
    let resolved = ManifestPath::resolve(requested)?;
    let sibling = resolved.sibling();
    if !sibling.exists() {
        return Ok(resolved);
    }

    let ours = Manifest::from_location(resolved.clone())?.native_sources();
    let theirs = Manifest::from_location(sibling.clone())?.native_sources();
    if ours != theirs {
        return Err(ManifestError::Conflict {
            requested: resolved.path().to_path_buf(),
            sibling: sibling.path().to_path_buf(),
            requested_sources: ours,
            sibling_sources: theirs,
        });
    }
    warn!(
        manifest = %resolved,
        sibling = %sibling,
        "both manifest formats exist; using the requested one"
    );
    Ok(resolved)
}

impl Manifest {
    /// Load the manifest at `requested`, falling back to the sibling format.
    pub fn load(requested: &Utf8Path) -> ManifestResult<Self> {
        let location = resolve_checked(requested)?;
        Self::from_location(location)
    }

    pub fn from_location(location: ManifestPath) -> ManifestResult<Self> {
        let text = fs::read_to_string(location.path())?;
        Self::parse(location, &text)
    }

    pub fn parse(location: ManifestPath, text: &str) -> ManifestResult<Self> {
        let parsed = match location.format() {
            ManifestFormat::Dsl => DslDocument::parse(text).map(Document::Dsl),
            ManifestFormat::Json => JsonDocument::parse(text).map(Document::Json),
        };
        let doc = parsed.map_err(|message| ManifestError::Parse {
            path: location.path().to_path_buf(),
            message,
        })?;
        debug!(manifest = %location, format = %location.format(), "loaded manifest");
        Ok(Self {
            location,
            original: text.to_string(),
            doc,
            edited: false,
        })
    }

    pub fn location(&self) -> &ManifestPath {
        &self.location
    }

    pub fn path(&self) -> &Utf8Path {
        self.location.path()
    }

    pub fn format(&self) -> ManifestFormat {
        self.location.format()
    }

    pub fn get(&self, field: FlagField) -> Option<String> {
        match &self.doc {
            Document::Dsl(d) => d.get(field),
            Document::Json(d) => d.get(field),
        }
    }

    pub fn set(&mut self, field: FlagField, flags: &str) -> ManifestResult<()> {
        let res = match &mut self.doc {
            Document::Dsl(d) => d.set(field, flags),
            Document::Json(d) => d.set(field, flags),
        };
        res.map_err(|message| ManifestError::Edit {
            path: self.location.path().to_path_buf(),
            message,
        })?;
        self.edited = true;
        Ok(())
    }

    pub fn has_field(&self, field: FlagField) -> bool {
        match &self.doc {
            Document::Dsl(d) => d.has_field(field),
            Document::Json(d) => d.has_field(field),
        }
    }

    pub fn native_sources(&self) -> Vec<String> {
        match &self.doc {
            Document::Dsl(d) => d.native_sources(),
            Document::Json(d) => d.native_sources(),
        }
    }

    pub fn declares_native_sources(&self) -> bool {
        !self.native_sources().is_empty()
    }

    pub fn has_link_flags(&self) -> bool {
        self.has_field(FlagField::LinkFlags)
    }

    /// Whether the manifest takes part in native compilation or linking at all.
    pub fn is_native(&self) -> bool {
        self.declares_native_sources() || self.has_link_flags()
    }

    /// Current text in the manifest's own format.
    pub fn render(&self) -> String {
        match &self.doc {
            Document::Dsl(d) => d.render(),
            Document::Json(d) => d.render(),
        }
    }

    /// Text as it was when the manifest was loaded.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// True once an edit changed the text. Loading alone never counts, even
    /// when the JSON adapter would print the document differently.
    pub fn is_modified(&self) -> bool {
        self.edited && self.render() != self.original
    }

    pub fn save(&self) -> ManifestResult<()> {
        fs::write(self.location.path(), self.render())?;
        debug!(manifest = %self.location, "wrote manifest");
        Ok(())
    }
}
