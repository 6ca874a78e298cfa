//! # flowlock-frontmatter
//!
//! Splits agentic workflow sources into preamble and prompt body, and parses
//! the preamble into a formatting-preserving config tree.
//!
//! The tree keeps a sidecar formatting record per node (indentation,
//! comments, quote style, source span), so [`Document::set_field`] and
//! [`Document::remove_field`] can splice the underlying lines and leave
//! every byte outside the edited field untouched.

mod node;
mod parser;

pub use node::{ConfigValue, Formatting, MapEntry, Node, QuoteStyle, Span};
pub use parser::{ParseError, parse_preamble};

use serde_json::Value as JsonValue;

/// The two regions of a workflow source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// Text between the opening and closing `---`, excluding both.
    pub preamble: String,
    /// Everything after the closing delimiter.
    pub body: String,
    /// Line offset of the preamble within the source (for diagnostics).
    pub preamble_line_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrontmatterError {
    #[error("first non-blank line must be `---` to open the frontmatter")]
    MissingDelimiter,

    #[error("frontmatter opened on line {opened_at} is never closed with `---`")]
    Unclosed { opened_at: usize },

    #[error("failed to parse frontmatter: {0}")]
    Parse(#[from] ParseError),
}

fn is_delimiter(line: &str) -> bool {
    line.trim_end_matches('\r') == "---"
}

/// Split a source into preamble and body. The first non-blank line must be
/// the `---` delimiter and a matching closer must exist.
pub fn split(text: &str) -> Result<Split, FrontmatterError> {
    let mut offset = 0usize;
    let mut line_no = 0usize;
    let mut opened_at: Option<usize> = None;
    let mut preamble_start = 0usize;
    let mut preamble_end = 0usize;

    while offset < text.len() {
        let line_end = text[offset..]
            .find('\n')
            .map(|i| offset + i + 1)
            .unwrap_or(text.len());
        let line = text[offset..line_end].trim_end_matches(['\n', '\r']);
        line_no += 1;

        match opened_at {
            None => {
                if is_delimiter(line) {
                    opened_at = Some(line_no);
                    preamble_start = line_end;
                    preamble_end = line_end;
                } else if !line.trim().is_empty() {
                    return Err(FrontmatterError::MissingDelimiter);
                }
            }
            Some(open) => {
                if is_delimiter(line) {
                    return Ok(Split {
                        preamble: text[preamble_start..preamble_end].to_string(),
                        body: text[line_end..].to_string(),
                        preamble_line_offset: open,
                    });
                }
                preamble_end = line_end;
            }
        }
        offset = line_end;
    }

    match opened_at {
        Some(open) => Err(FrontmatterError::Unclosed { opened_at: open }),
        None => Err(FrontmatterError::MissingDelimiter),
    }
}

/// Like [`split`], but a source with no opening delimiter is treated as
/// body-only. Used for imported markdown fragments.
pub fn split_optional(text: &str) -> Result<Split, FrontmatterError> {
    match split(text) {
        Ok(s) => Ok(s),
        Err(FrontmatterError::MissingDelimiter) => Ok(Split {
            preamble: String::new(),
            body: text.to_string(),
            preamble_line_offset: 0,
        }),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("path segment {segment:?} is not a mapping")]
    NotAMap { segment: String },

    #[error("field {path:?} not found")]
    NotFound { path: String },

    #[error("edit produced an unparsable preamble: {0}")]
    Reparse(ParseError),
}

/// A parsed preamble that can be edited without disturbing formatting.
#[derive(Debug, Clone)]
pub struct Document {
    lines: Vec<String>,
    trailing_newline: bool,
    root: Node,
}

impl Document {
    pub fn parse(preamble: &str) -> Result<Self, ParseError> {
        let root = parse_preamble(preamble)?;
        Ok(Self {
            lines: parser::split_raw_lines(preamble)
                .into_iter()
                .map(str::to_string)
                .collect(),
            trailing_newline: preamble.ends_with('\n'),
            root,
        })
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// The preamble text, reconstructed byte-for-byte.
    pub fn text(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    pub fn to_json(&self) -> JsonValue {
        self.root.to_json()
    }

    /// Walk a dotted path of map keys.
    pub fn get(&self, path: &[&str]) -> Option<&Node> {
        let mut node = &self.root;
        for segment in path {
            node = node.get(segment)?;
        }
        Some(node)
    }

    /// Set `path` to a rendered scalar value (the caller supplies the value
    /// exactly as it should appear, e.g. `true` or `"quoted"`). Creates the
    /// field if missing. All bytes outside the edited field are preserved.
    pub fn set_field(&mut self, path: &[&str], value: &str) -> Result<(), EditError> {
        assert!(!path.is_empty(), "set_field requires a non-empty path");
        match self.locate(path)? {
            Location::Entry {
                line,
                span,
                value_col,
                trailing,
            } => {
                if let Some(col) = value_col {
                    let raw = &self.lines[line];
                    let mut new_line = raw[..col].to_string();
                    new_line.push_str(value);
                    if let Some(suffix) = trailing {
                        new_line.push_str(&suffix);
                    }
                    self.lines[line] = new_line;
                } else {
                    // Multi-line value: collapse to a single `key: value` line,
                    // preserving the original indent + key + colon prefix.
                    let raw = &self.lines[line];
                    let indent = raw.len() - raw.trim_start_matches(' ').len();
                    let colon = find_colon_in_raw(raw, indent)
                        .expect("located entries always have a key colon");
                    let mut new_line = raw[..=colon].to_string();
                    new_line.push(' ');
                    new_line.push_str(value);
                    self.lines.splice(span.start..span.end, [new_line]);
                }
            }
            Location::Insert { at, indent, key } => {
                let new_line = format!("{}{}: {}", " ".repeat(indent), key, value);
                self.lines.insert(at, new_line);
            }
        }
        self.reparse()
    }

    /// Remove the field at `path`, including any nested block it owns.
    pub fn remove_field(&mut self, path: &[&str]) -> Result<(), EditError> {
        assert!(!path.is_empty(), "remove_field requires a non-empty path");
        match self.locate(path)? {
            Location::Entry { span, .. } => {
                self.lines.drain(span.start..span.end);
                self.reparse()
            }
            Location::Insert { .. } => Err(EditError::NotFound {
                path: path.join("."),
            }),
        }
    }

    fn reparse(&mut self) -> Result<(), EditError> {
        let text = self.text();
        match parse_preamble(&text) {
            Ok(root) => {
                self.root = root;
                Ok(())
            }
            Err(e) => Err(EditError::Reparse(e)),
        }
    }

    /// Resolve a path to either the existing entry or the insertion point
    /// for a new one.
    fn locate(&self, path: &[&str]) -> Result<Location, EditError> {
        let mut node = &self.root;
        for (depth, segment) in path.iter().enumerate() {
            let last = depth == path.len() - 1;
            let entries = match &node.value {
                ConfigValue::Map(entries) => entries,
                ConfigValue::Null if last => {
                    // An empty `key:` mapping; insert directly below it.
                    return Ok(Location::Insert {
                        at: node.span.start + 1,
                        indent: node.format.indent + 2,
                        key: (*segment).to_string(),
                    });
                }
                _ => {
                    return Err(EditError::NotAMap {
                        segment: path[..depth].join("."),
                    });
                }
            };
            let found = entries.iter().find(|e| e.key == *segment);
            match (found, last) {
                (Some(entry), true) => {
                    return Ok(Location::Entry {
                        line: entry.span.start,
                        span: entry.span,
                        value_col: entry.value_col,
                        trailing: entry.node.format.trailing.clone(),
                    });
                }
                (Some(entry), false) => node = &entry.node,
                (None, true) => {
                    let (at, indent) = self.insertion_point(node);
                    return Ok(Location::Insert {
                        at,
                        indent,
                        key: (*segment).to_string(),
                    });
                }
                (None, false) => {
                    return Err(EditError::NotFound {
                        path: path[..=depth].join("."),
                    });
                }
            }
        }
        unreachable!("path is non-empty")
    }

    fn insertion_point(&self, map: &Node) -> (usize, usize) {
        match &map.value {
            ConfigValue::Map(entries) if !entries.is_empty() => {
                let last = entries.last().expect("non-empty");
                (last.span.end, last.node_indent(&self.lines))
            }
            _ => (self.lines.len(), map.format.indent),
        }
    }
}

impl MapEntry {
    fn node_indent(&self, lines: &[String]) -> usize {
        lines
            .get(self.span.start)
            .map(|l| l.len() - l.trim_start_matches(' ').len())
            .unwrap_or(0)
    }
}

enum Location {
    Entry {
        line: usize,
        span: Span,
        value_col: Option<usize>,
        trailing: Option<String>,
    },
    Insert {
        at: usize,
        indent: usize,
        key: String,
    },
}

fn find_colon_in_raw(raw: &str, indent: usize) -> Option<usize> {
    let bytes = raw.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    for i in indent..bytes.len() {
        match bytes[i] {
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            b':' if !in_single && !in_double => {
                if i + 1 == bytes.len() || bytes[i + 1] == b' ' || bytes[i + 1] == b'\r' {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = "\
# nightly triage workflow
on:
  schedule:
    - cron: \"0 9 * * 1\"
  workflow_dispatch:

permissions:
  contents: read   # checkout only
  issues: write

engine: copilot
timeout_minutes: 15
tools:
  github:
    toolsets: [default]
";

    #[test]
    fn split_extracts_regions() {
        let text = "---\non: push\n---\n# Title\n\nBody text.\n";
        let s = split(text).unwrap();
        assert_eq!(s.preamble, "on: push\n");
        assert_eq!(s.body, "# Title\n\nBody text.\n");
    }

    #[test]
    fn split_requires_opening_delimiter() {
        assert_eq!(
            split("# Just markdown\n").unwrap_err(),
            FrontmatterError::MissingDelimiter
        );
    }

    #[test]
    fn split_requires_closing_delimiter() {
        assert!(matches!(
            split("---\non: push\n# never closed\n").unwrap_err(),
            FrontmatterError::Unclosed { opened_at: 1 }
        ));
    }

    #[test]
    fn split_optional_passes_plain_markdown_through() {
        let s = split_optional("just a body\n").unwrap();
        assert_eq!(s.preamble, "");
        assert_eq!(s.body, "just a body\n");
    }

    #[test]
    fn parses_nested_structures() {
        let doc = Document::parse(SAMPLE).unwrap();
        let json = doc.to_json();
        assert_eq!(json["engine"], "copilot");
        assert_eq!(json["timeout_minutes"], 15);
        assert_eq!(json["permissions"]["contents"], "read");
        assert_eq!(json["on"]["schedule"][0]["cron"], "0 9 * * 1");
        assert_eq!(json["tools"]["github"]["toolsets"][0], "default");
        assert!(json["on"]["workflow_dispatch"].is_null());
    }

    #[test]
    fn parses_flow_collections() {
        let doc = Document::parse("network: { allowed: [\"example.com\", other.net], firewall: true }\n").unwrap();
        let json = doc.to_json();
        assert_eq!(json["network"]["allowed"][0], "example.com");
        assert_eq!(json["network"]["allowed"][1], "other.net");
        assert_eq!(json["network"]["firewall"], true);
    }

    #[test]
    fn parses_block_scalar() {
        let doc = Document::parse("steps:\n  - name: build\n    run: |\n      echo one\n      echo two\n").unwrap();
        let json = doc.to_json();
        assert_eq!(json["steps"][0]["run"], "echo one\necho two\n");
        assert_eq!(json["steps"][0]["name"], "build");
    }

    #[test]
    fn parses_sequence_at_parent_indent() {
        let doc = Document::parse("imports:\n- shared/tools.md\n- shared/mcp.md\n").unwrap();
        let json = doc.to_json();
        assert_eq!(json["imports"][0], "shared/tools.md");
        assert_eq!(json["imports"][1], "shared/mcp.md");
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = Document::parse("a: 1\na: 2\n").unwrap_err();
        assert!(err.to_string().contains("duplicate key"));
    }

    #[test]
    fn rejects_anchors() {
        assert!(Document::parse("a: &anchor 1\n").is_err());
    }

    #[test]
    fn set_field_preserves_unrelated_bytes() {
        let mut doc = Document::parse(SAMPLE).unwrap();
        doc.set_field(&["engine"], "claude").unwrap();
        let edited = doc.text();
        // Only the engine line changed.
        for (before, after) in SAMPLE.lines().zip(edited.lines()) {
            if before.starts_with("engine:") {
                assert_eq!(after, "engine: claude");
            } else {
                assert_eq!(before, after);
            }
        }
    }

    #[test]
    fn set_field_preserves_trailing_comment() {
        let mut doc = Document::parse(SAMPLE).unwrap();
        doc.set_field(&["permissions", "contents"], "write").unwrap();
        assert!(doc.text().contains("contents: write   # checkout only"));
    }

    #[test]
    fn set_field_inserts_missing_field() {
        let mut doc = Document::parse("on: push\n").unwrap();
        doc.set_field(&["strict"], "true").unwrap();
        assert_eq!(doc.text(), "on: push\nstrict: true\n");
        assert_eq!(doc.to_json()["strict"], true);
    }

    #[test]
    fn remove_field_drops_whole_block() {
        let mut doc = Document::parse(SAMPLE).unwrap();
        doc.remove_field(&["tools"]).unwrap();
        let text = doc.text();
        assert!(!text.contains("github"));
        assert!(text.contains("timeout_minutes: 15"));
        // Everything before the removed block is untouched.
        assert!(text.starts_with("# nightly triage workflow\non:"));
    }

    #[test]
    fn remove_missing_field_errors() {
        let mut doc = Document::parse("on: push\n").unwrap();
        assert!(matches!(
            doc.remove_field(&["nope"]),
            Err(EditError::NotFound { .. })
        ));
    }

    #[test]
    fn text_round_trips_unedited_documents() {
        let doc = Document::parse(SAMPLE).unwrap();
        assert_eq!(doc.text(), SAMPLE);
    }

    proptest! {
        /// The parser never panics, whatever the input.
        #[test]
        fn parser_is_total(input in "(?s).{0,200}") {
            let _ = Document::parse(&input);
        }

        /// Setting one top-level scalar field leaves every other line intact.
        #[test]
        fn edit_touches_one_line(value in "[a-z]{1,12}") {
            let mut doc = Document::parse(SAMPLE).unwrap();
            doc.set_field(&["engine"], &value).unwrap();
            let edited = doc.text();
            let differing = SAMPLE
                .lines()
                .zip(edited.lines())
                .filter(|(a, b)| a != b)
                .count();
            prop_assert!(differing <= 1);
            prop_assert_eq!(SAMPLE.lines().count(), edited.lines().count());
        }
    }
}
