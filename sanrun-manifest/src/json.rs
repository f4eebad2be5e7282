//! `moon.pkg.json` adapter: full parse, field mutation, pretty print.

use crate::format::{FlagField, LINK_KEY, NATIVE_KEY, NATIVE_SOURCES_KEY};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct JsonDocument {
    root: Map<String, Value>,
}

impl JsonDocument {
    pub fn parse(text: &str) -> Result<Self, String> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(root)) => Ok(Self { root }),
            Ok(_) => Err("top-level value is not an object".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn native_table(&self) -> Option<&Map<String, Value>> {
        self.root.get(LINK_KEY)?.get(NATIVE_KEY)?.as_object()
    }

    pub fn get(&self, field: FlagField) -> Option<String> {
        match self.native_table()?.get(field.key())? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => None,
        }
    }

    pub fn set(&mut self, field: FlagField, flags: &str) -> Result<(), String> {
        let link = self
            .root
            .entry(LINK_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        let link = link
            .as_object_mut()
            .ok_or_else(|| format!("`{LINK_KEY}` is not an object"))?;
        let native = link
            .entry(NATIVE_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        let native = native
            .as_object_mut()
            .ok_or_else(|| format!("`{LINK_KEY}.{NATIVE_KEY}` is not an object"))?;
        native.insert(field.key().to_string(), Value::String(flags.to_string()));
        Ok(())
    }

    pub fn has_field(&self, field: FlagField) -> bool {
        self.native_table()
            .is_some_and(|native| native.contains_key(field.key()))
    }

    pub fn native_sources(&self) -> Vec<String> {
        match self.root.get(NATIVE_SOURCES_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    }

    /// Two-space pretty print with a trailing newline.
    pub fn render(&self) -> String {
        let mut out = serde_json::to_string_pretty(&self.root).unwrap_or_else(|_| "{}".to_string());
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LIB: &str = r#"{
  "import": [
    "moonbitlang/core/json"
  ],
  "native-stub": [
    "stub.c"
  ],
  "link": {
    "native": {
      "stub-cc-flags": "-Iinclude -DFOO"
    }
  }
}
"#;

    #[test]
    fn reads_flags_and_sources() {
        let doc = JsonDocument::parse(LIB).unwrap();
        assert_eq!(doc.native_sources(), vec!["stub.c".to_string()]);
        assert_eq!(
            doc.get(FlagField::StubCompileFlags).as_deref(),
            Some("-Iinclude -DFOO")
        );
        assert_eq!(doc.get(FlagField::LinkFlags), None);
        assert!(!doc.has_field(FlagField::LinkFlags));
    }

    #[test]
    fn unchanged_document_renders_identically() {
        let doc = JsonDocument::parse(LIB).unwrap();
        assert_eq!(doc.render(), LIB);
    }

    #[test]
    fn set_creates_missing_tables_and_keeps_key_order() {
        let mut doc = JsonDocument::parse("{\n  \"is-main\": true\n}\n").unwrap();
        doc.set(FlagField::LinkFlags, "-fsanitize=address").unwrap();
        assert_eq!(
            doc.render(),
            "{\n  \"is-main\": true,\n  \"link\": {\n    \"native\": {\n      \"cc-link-flags\": \"-fsanitize=address\"\n    }\n  }\n}\n"
        );
    }

    #[test]
    fn set_rejects_non_object_link() {
        let mut doc = JsonDocument::parse(r#"{"link": ["native"]}"#).unwrap();
        let err = doc.set(FlagField::CompileFlags, "-g").unwrap_err();
        assert!(err.contains("not an object"));
    }

    #[test]
    fn non_object_root_is_a_parse_error() {
        assert!(JsonDocument::parse("[1, 2]").is_err());
    }
}
