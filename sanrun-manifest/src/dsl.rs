//! `moon.pkg` adapter.
//!
//! The DSL is never re-serialized. A light tokenizer locates the span of the
//! value to change and only that span is rewritten; missing keys are spliced
//! into the nearest existing enclosing block. Comments, key order and
//! whitespace outside the edited span are kept byte for byte.

use crate::format::{FlagField, LINK_KEY, NATIVE_KEY, NATIVE_SOURCES_KEY};

const OPTIONS_CALL: &str = "options";
const INDENT: &str = "  ";

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokKind {
    Str(String),
    Word(String),
    Punct(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    kind: TokKind,
    start: usize,
    end: usize,
}

impl Token {
    fn is_punct(&self, c: char) -> bool {
        self.kind == TokKind::Punct(c)
    }

    fn is_open(&self) -> bool {
        matches!(self.kind, TokKind::Punct('{' | '[' | '('))
    }

    fn is_close(&self) -> bool {
        matches!(self.kind, TokKind::Punct('}' | ']' | ')'))
    }

    /// Text of a string literal or bare word.
    fn name(&self) -> Option<&str> {
        match &self.kind {
            TokKind::Str(s) | TokKind::Word(s) => Some(s),
            TokKind::Punct(_) => None,
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let close = text[i + 2..]
                    .find("*/")
                    .ok_or_else(|| format!("unterminated block comment at byte {i}"))?;
                i += 2 + close + 2;
            }
            b'"' => {
                let start = i;
                let mut value = String::new();
                i += 1;
                loop {
                    let Some(&b) = bytes.get(i) else {
                        return Err(format!("unterminated string at byte {start}"));
                    };
                    match b {
                        b'"' => {
                            i += 1;
                            break;
                        }
                        b'\\' => {
                            let esc = *bytes
                                .get(i + 1)
                                .ok_or_else(|| format!("unterminated string at byte {start}"))?;
                            match esc {
                                b'n' => value.push('\n'),
                                b't' => value.push('\t'),
                                b'"' => value.push('"'),
                                b'\\' => value.push('\\'),
                                other => {
                                    value.push('\\');
                                    value.push(other as char);
                                }
                            }
                            i += 2;
                        }
                        _ => {
                            let ch_len = utf8_len(b);
                            value.push_str(&text[i..i + ch_len]);
                            i += ch_len;
                        }
                    }
                }
                tokens.push(Token {
                    kind: TokKind::Str(value),
                    start,
                    end: i,
                });
            }
            b'{' | b'[' | b'(' => {
                stack.push(c as char);
                tokens.push(punct(c, i));
                i += 1;
            }
            b'}' | b']' | b')' => {
                let want = match c {
                    b'}' => '{',
                    b']' => '[',
                    _ => '(',
                };
                if stack.pop() != Some(want) {
                    return Err(format!("unbalanced `{}` at byte {i}", c as char));
                }
                tokens.push(punct(c, i));
                i += 1;
            }
            b':' | b',' | b'=' | b';' => {
                tokens.push(punct(c, i));
                i += 1;
            }
            _ => {
                let start = i;
                i += utf8_len(c);
                while i < bytes.len() && !is_delimiter(bytes[i]) {
                    i += utf8_len(bytes[i]);
                }
                tokens.push(Token {
                    kind: TokKind::Word(text[start..i].to_string()),
                    start,
                    end: i,
                });
            }
        }
    }

    if let Some(open) = stack.pop() {
        return Err(format!("unclosed `{open}`"));
    }
    Ok(tokens)
}

fn punct(c: u8, at: usize) -> Token {
    Token {
        kind: TokKind::Punct(c as char),
        start: at,
        end: at + 1,
    }
}

fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'\t' | b'\r' | b'\n' | b'"' | b'{' | b'}' | b'[' | b']' | b'(' | b')' | b':' | b','
            | b'=' | b';' | b'/'
    )
}

fn utf8_len(first: u8) -> usize {
    match first {
        0xF0..=0xFF => 4,
        0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        _ => 1,
    }
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// A `key: value` pair located in the token stream. Indices are token indices;
/// `value_end` is inclusive.
#[derive(Debug, Clone, Copy)]
struct Entry {
    key: usize,
    value_start: usize,
    value_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DslDocument {
    text: String,
    tokens: Vec<Token>,
}

impl DslDocument {
    pub fn parse(text: &str) -> Result<Self, String> {
        let tokens = tokenize(text)?;
        Ok(Self {
            text: text.to_string(),
            tokens,
        })
    }

    pub fn render(&self) -> String {
        self.text.clone()
    }

    pub fn get(&self, field: FlagField) -> Option<String> {
        let entry = self.flag_entry(field)?;
        let toks = &self.tokens[entry.value_start..=entry.value_end];
        match toks {
            [single] => match &single.kind {
                TokKind::Str(s) | TokKind::Word(s) => Some(s.clone()),
                TokKind::Punct(_) => None,
            },
            _ => {
                // Array of flag strings.
                let parts: Vec<&str> = toks
                    .iter()
                    .filter_map(|t| match &t.kind {
                        TokKind::Str(s) => Some(s.as_str()),
                        _ => None,
                    })
                    .collect();
                Some(parts.join(" "))
            }
        }
    }

    pub fn has_field(&self, field: FlagField) -> bool {
        self.flag_entry(field).is_some()
    }

    pub fn native_sources(&self) -> Vec<String> {
        let Some(entry) = self.find_anywhere(NATIVE_SOURCES_KEY, 0, self.tokens.len()) else {
            return Vec::new();
        };
        self.tokens[entry.value_start..=entry.value_end]
            .iter()
            .filter_map(|t| match &t.kind {
                TokKind::Str(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn set(&mut self, field: FlagField, flags: &str) -> Result<(), String> {
        let quoted = quote(flags);

        let edited = if let Some(entry) = self.flag_entry(field) {
            let start = self.tokens[entry.value_start].start;
            let end = self.tokens[entry.value_end].end;
            splice(&self.text, start, end, &quoted)
        } else if let Some(native) = self.native_entry() {
            self.insert_into_object(native, &format!("{}: {quoted}", quote(field.key())))
        } else if let Some(link) = self.link_entry() {
            self.insert_into_object(
                link,
                &format!("{}: {{\n{{inner}}{}: {quoted},\n{{outer}}}}", quote(NATIVE_KEY), quote(field.key())),
            )
        } else if let Some(open) = self.options_open() {
            let base = line_indent(&self.text, self.tokens[open].start);
            let i1 = format!("{base}{INDENT}");
            let i2 = format!("{i1}{INDENT}");
            let i3 = format!("{i2}{INDENT}");
            let block = format!(
                "\n{i1}{LINK_KEY}: {{\n{i2}{}: {{\n{i3}{}: {quoted},\n{i2}}},\n{i1}}},",
                quote(NATIVE_KEY),
                quote(field.key())
            );
            let at = self.tokens[open].end;
            splice(&self.text, at, at, &block)
        } else {
            let mut text = self.text.clone();
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!(
                "{OPTIONS_CALL}(\n{INDENT}{LINK_KEY}: {{\n{INDENT}{INDENT}{}: {{\n{INDENT}{INDENT}{INDENT}{}: {quoted},\n{INDENT}{INDENT}}},\n{INDENT}}},\n)\n",
                quote(NATIVE_KEY),
                quote(field.key())
            ));
            text
        };

        *self = DslDocument::parse(&edited).map_err(|e| format!("edit produced invalid text: {e}"))?;
        Ok(())
    }

    /// Insert `entry_text` as the first member of the object that is the value
    /// of `entry`. `{inner}`/`{outer}` placeholders in `entry_text` expand to
    /// one and zero extra indent levels relative to the inserted member.
    fn insert_into_object(&self, entry: Entry, entry_text: &str) -> String {
        let open = &self.tokens[entry.value_start];
        let key_indent = line_indent(&self.text, self.tokens[entry.key].start);
        let next = &self.tokens[entry.value_start + 1];

        let member_indent = if next.is_close() {
            format!("{key_indent}{INDENT}")
        } else {
            let first_indent = line_indent(&self.text, next.start);
            if self.text[open.end..next.start].contains('\n') {
                first_indent
            } else {
                format!("{key_indent}{INDENT}")
            }
        };
        let member = entry_text
            .replace("{inner}", &format!("{member_indent}{INDENT}"))
            .replace("{outer}", &member_indent);

        let mut insertion = format!("\n{member_indent}{member},");
        if next.is_close() {
            insertion.push('\n');
            insertion.push_str(&key_indent);
            // Drop whitespace between `{` and `}` so the close brace lands on its own line.
            return splice(&self.text, open.end, next.start, &insertion);
        }
        splice(&self.text, open.end, open.end, &insertion)
    }

    fn link_entry(&self) -> Option<Entry> {
        let mut from = 0;
        while let Some(entry) = self.find_anywhere(LINK_KEY, from, self.tokens.len()) {
            if self.tokens[entry.value_start].is_punct('{') {
                return Some(entry);
            }
            from = entry.key + 1;
        }
        None
    }

    fn native_entry(&self) -> Option<Entry> {
        let link = self.link_entry()?;
        let entry = self.find_direct(NATIVE_KEY, link.value_start + 1, link.value_end)?;
        self.tokens[entry.value_start]
            .is_punct('{')
            .then_some(entry)
    }

    fn flag_entry(&self, field: FlagField) -> Option<Entry> {
        let native = self.native_entry()?;
        self.find_direct(field.key(), native.value_start + 1, native.value_end)
    }

    fn options_open(&self) -> Option<usize> {
        self.tokens
            .windows(2)
            .position(|pair| {
                matches!(&pair[0].kind, TokKind::Word(word) if word == OPTIONS_CALL)
                    && pair[1].is_punct('(')
            })
            .map(|i| i + 1)
    }

    /// Find `key` at any nesting depth within token range `[lo, hi)`.
    fn find_anywhere(&self, key: &str, lo: usize, hi: usize) -> Option<Entry> {
        (lo..hi).find_map(|i| self.entry_at(i, key))
    }

    /// Find `key` directly inside the container whose contents are `[lo, hi)`.
    fn find_direct(&self, key: &str, lo: usize, hi: usize) -> Option<Entry> {
        let mut depth = 0usize;
        let mut i = lo;
        while i < hi {
            let tok = &self.tokens[i];
            if tok.is_open() {
                depth += 1;
            } else if tok.is_close() {
                depth = depth.saturating_sub(1);
            } else if depth == 0 {
                if let Some(entry) = self.entry_at(i, key) {
                    return Some(entry);
                }
            }
            i += 1;
        }
        None
    }

    fn entry_at(&self, i: usize, key: &str) -> Option<Entry> {
        let tok = self.tokens.get(i)?;
        if tok.name() != Some(key) || !self.tokens.get(i + 1)?.is_punct(':') {
            return None;
        }
        let value_start = i + 2;
        let first = self.tokens.get(value_start)?;
        let value_end = if first.is_open() {
            self.matching_close(value_start)?
        } else {
            value_start
        };
        Some(Entry {
            key: i,
            value_start,
            value_end,
        })
    }

    fn matching_close(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        for (offset, tok) in self.tokens[open..].iter().enumerate() {
            if tok.is_open() {
                depth += 1;
            } else if tok.is_close() {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
        }
        None
    }
}

fn splice(text: &str, start: usize, end: usize, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len() + replacement.len());
    out.push_str(&text[..start]);
    out.push_str(replacement);
    out.push_str(&text[end..]);
    out
}

fn line_indent(text: &str, at: usize) -> String {
    let line_start = text[..at].rfind('\n').map(|i| i + 1).unwrap_or(0);
    text[line_start..]
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .collect()
}
