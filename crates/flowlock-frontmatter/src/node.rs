//! The config tree: a tagged value plus a formatting sidecar per node, so
//! that edits can splice source lines without disturbing anything else.

use serde_json::{Map as JsonMap, Value as JsonValue};

/// Half-open range of line indices into the preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Quote style observed on a scalar, preserved for faithful re-rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuoteStyle {
    #[default]
    Plain,
    Single,
    Double,
    /// `|` block scalar (newlines kept).
    Literal,
    /// `>` block scalar (captured verbatim, newlines kept).
    Folded,
}

/// Formatting sidecar: everything the data model does not capture but a
/// round-trip edit must not disturb.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Formatting {
    /// Column of the first content character.
    pub indent: usize,
    /// Full-line comments and blank lines directly above the node.
    pub leading: Vec<String>,
    /// Raw trailing-comment suffix of the node's first line, including the
    /// whitespace that precedes `#`.
    pub trailing: Option<String>,
    pub quote: QuoteStyle,
}

/// A parsed value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Seq(Vec<Node>),
    Map(Vec<MapEntry>),
}

/// A value plus where it came from and how it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub value: ConfigValue,
    pub format: Formatting,
    pub span: Span,
}

/// One `key: value` entry of a block or flow mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    pub key: String,
    pub node: Node,
    /// Lines occupied by this entry (key line through last nested line).
    pub span: Span,
    /// Byte offset in the key line where the scalar value starts, when the
    /// value is inline on the key line.
    pub value_col: Option<usize>,
}

impl Node {
    pub fn scalar(value: ConfigValue, span: Span) -> Self {
        Self {
            value,
            format: Formatting::default(),
            span,
        }
    }

    pub fn as_map(&self) -> Option<&[MapEntry]> {
        match &self.value {
            ConfigValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Node]> {
        match &self.value {
            ConfigValue::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a nested map entry.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_map()?
            .iter()
            .find(|e| e.key == key)
            .map(|e| &e.node)
    }

    /// Lower the tree to plain JSON for schema validation and model building.
    pub fn to_json(&self) -> JsonValue {
        match &self.value {
            ConfigValue::Null => JsonValue::Null,
            ConfigValue::Bool(b) => JsonValue::Bool(*b),
            ConfigValue::Int(i) => JsonValue::Number((*i).into()),
            ConfigValue::Str(s) => JsonValue::String(s.clone()),
            ConfigValue::Seq(items) => {
                JsonValue::Array(items.iter().map(Node::to_json).collect())
            }
            ConfigValue::Map(entries) => {
                let mut map = JsonMap::new();
                for entry in entries {
                    map.insert(entry.key.clone(), entry.node.to_json());
                }
                JsonValue::Object(map)
            }
        }
    }
}
