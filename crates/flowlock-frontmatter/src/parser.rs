//! Line-based parser for the workflow preamble dialect.
//!
//! The grammar is the YAML subset that workflow preambles actually use:
//! block and flow mappings/sequences, plain and quoted scalars, literal and
//! folded block scalars, comments. Anchors, aliases, and tags are rejected.
//! Every node remembers its source span so edits can splice lines.

use crate::node::{ConfigValue, Formatting, MapEntry, Node, QuoteStyle, Span};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based line number within the preamble.
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line_idx: usize, message: impl Into<String>) -> Self {
        Self {
            line: line_idx + 1,
            message: message.into(),
        }
    }
}

/// One preamble line, pre-split into indent, content, and comment suffix.
#[derive(Debug, Clone)]
pub(crate) struct RawLine {
    pub raw: String,
    pub indent: usize,
    /// Content without indent and without the trailing comment, trimmed at
    /// the end.
    pub body: String,
    /// Raw trailing-comment suffix (whitespace before `#` included).
    pub comment: Option<String>,
    pub blank: bool,
    pub comment_only: bool,
}

/// Split into lines on `\n`, keeping any trailing `\r` inside `raw` so a
/// reconstruction is byte-identical. The final empty piece of a
/// newline-terminated input is dropped (the caller tracks the trailing
/// newline).
pub(crate) fn split_raw_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if text.ends_with('\n') {
        lines.pop();
    }
    if text.is_empty() {
        lines.clear();
    }
    lines
}

pub(crate) fn scan_lines(preamble: &str) -> Result<Vec<RawLine>, ParseError> {
    let mut out = Vec::new();
    for (idx, raw) in split_raw_lines(preamble).into_iter().enumerate() {
        // Work on a view without any trailing carriage return; `raw` keeps it.
        let content = raw.strip_suffix('\r').unwrap_or(raw);
        let indent = content.len() - content.trim_start_matches(' ').len();
        let rest = &content[indent..];
        if rest.starts_with('\t') {
            return Err(ParseError::new(idx, "tabs are not allowed in indentation"));
        }
        let blank = rest.trim().is_empty();
        let comment_only = rest.trim_start().starts_with('#');
        let (body_end, comment_start) = split_comment(rest);
        let body = rest[..body_end].trim_end().to_string();
        let comment = comment_start.map(|s| rest[s..].to_string());
        out.push(RawLine {
            raw: raw.to_string(),
            indent,
            body,
            comment,
            blank,
            comment_only,
        });
    }
    Ok(out)
}

/// Split a line's content into body and trailing comment, honoring quotes.
/// Returns the body end offset and the comment start offset (which includes
/// the whitespace run before `#`).
fn split_comment(content: &str) -> (usize, Option<usize>) {
    let bytes = content.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => {
                if in_double && i > 0 && bytes[i - 1] == b'\\' {
                    // escaped quote inside a double-quoted scalar
                } else {
                    in_double = !in_double;
                }
            }
            b'#' if !in_single && !in_double => {
                // A comment starts at `#` preceded by whitespace or line start.
                if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' {
                    let mut start = i;
                    while start > 0 && (bytes[start - 1] == b' ' || bytes[start - 1] == b'\t') {
                        start -= 1;
                    }
                    return (start, Some(start));
                }
            }
            _ => {}
        }
        i += 1;
    }
    (content.len(), None)
}

/// Parse a full preamble into its root mapping.
pub fn parse_preamble(preamble: &str) -> Result<Node, ParseError> {
    let lines = scan_lines(preamble)?;
    parse_root(&lines)
}

pub(crate) fn parse_root(lines: &[RawLine]) -> Result<Node, ParseError> {
    let first = lines.iter().position(|l| !l.blank && !l.comment_only);
    let Some(first) = first else {
        // An empty preamble is an empty mapping.
        return Ok(Node {
            value: ConfigValue::Map(Vec::new()),
            format: Formatting::default(),
            span: Span::new(0, lines.len()),
        });
    };
    let indent = lines[first].indent;
    let (value, quote) = parse_block(lines, first, lines.len(), indent)?;
    if !matches!(value, ConfigValue::Map(_)) {
        return Err(ParseError::new(first, "preamble root must be a mapping"));
    }
    Ok(Node {
        value,
        format: Formatting {
            indent,
            quote,
            ..Formatting::default()
        },
        span: Span::new(0, lines.len()),
    })
}

/// Parse the block starting at `start` (exclusive end `end`) whose entries
/// sit at `indent`.
fn parse_block(
    lines: &[RawLine],
    start: usize,
    end: usize,
    indent: usize,
) -> Result<(ConfigValue, QuoteStyle), ParseError> {
    let first = (start..end)
        .find(|&i| !lines[i].blank && !lines[i].comment_only)
        .expect("caller guarantees a significant line");
    let body = lines[first].body.as_str();
    if body == "-" || body.starts_with("- ") {
        parse_seq_block(lines, start, end, indent).map(|v| (v, QuoteStyle::Plain))
    } else {
        parse_map_block(lines, start, end, indent).map(|v| (v, QuoteStyle::Plain))
    }
}

/// Extent of the nested content belonging to the entry at `i`: subsequent
/// blank/comment lines and anything indented deeper. `allow_same_indent_seq`
/// additionally accepts sequence dashes at the parent indent, which YAML
/// permits under a mapping key.
fn nested_extent(
    lines: &[RawLine],
    i: usize,
    end: usize,
    indent: usize,
    allow_same_indent_seq: bool,
) -> usize {
    let mut j = i + 1;
    while j < end {
        let l = &lines[j];
        if l.blank || (l.comment_only && l.indent > indent) {
            j += 1;
            continue;
        }
        if l.indent > indent {
            j += 1;
            continue;
        }
        if allow_same_indent_seq
            && l.indent == indent
            && (l.body == "-" || l.body.starts_with("- "))
        {
            j += 1;
            continue;
        }
        break;
    }
    // Trailing blanks and parent-level comments belong to the next sibling,
    // not this entry.
    while j > i + 1 {
        let l = &lines[j - 1];
        if l.blank || (l.comment_only && l.indent <= indent) {
            j -= 1;
        } else {
            break;
        }
    }
    j
}

fn first_significant(lines: &[RawLine], start: usize, end: usize) -> Option<usize> {
    (start..end).find(|&i| !lines[i].blank && !lines[i].comment_only)
}

fn parse_map_block(
    lines: &[RawLine],
    start: usize,
    end: usize,
    indent: usize,
) -> Result<ConfigValue, ParseError> {
    let mut entries: Vec<MapEntry> = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    let mut i = start;

    while i < end {
        let line = &lines[i];
        if line.blank || line.comment_only {
            pending.push(line.raw.clone());
            i += 1;
            continue;
        }
        if line.indent != indent {
            return Err(ParseError::new(
                i,
                format!(
                    "bad indentation: expected {indent} spaces, found {}",
                    line.indent
                ),
            ));
        }
        if line.body == "-" || line.body.starts_with("- ") {
            return Err(ParseError::new(i, "unexpected sequence item in mapping"));
        }
        if line.body.starts_with('&') || line.body.starts_with('*') {
            return Err(ParseError::new(
                i,
                "anchors and aliases are not supported in workflow preambles",
            ));
        }

        let (key, rest_offset) = split_key(&line.body)
            .ok_or_else(|| ParseError::new(i, format!("expected `key: value`, got {:?}", line.body)))?;
        if entries.iter().any(|e| e.key == key) {
            return Err(ParseError::new(i, format!("duplicate key {key:?}")));
        }
        let rest = line.body[rest_offset..].trim();

        let extent = nested_extent(lines, i, end, indent, rest.is_empty());
        let mut node = if rest.is_empty() {
            match first_significant(lines, i + 1, extent) {
                None => Node::scalar(ConfigValue::Null, Span::new(i, extent)),
                Some(child) => {
                    let child_indent = lines[child].indent;
                    let (value, quote) = parse_block(lines, i + 1, extent, child_indent)?;
                    Node {
                        value,
                        format: Formatting {
                            indent: child_indent,
                            quote,
                            ..Formatting::default()
                        },
                        span: Span::new(i, extent),
                    }
                }
            }
        } else if let Some(style) = block_scalar_style(rest) {
            let content = capture_block_scalar(lines, i + 1, extent, rest);
            Node {
                value: ConfigValue::Str(content),
                format: Formatting {
                    indent,
                    quote: style,
                    ..Formatting::default()
                },
                span: Span::new(i, extent),
            }
        } else {
            if first_significant(lines, i + 1, extent).is_some() {
                return Err(ParseError::new(
                    i + 1,
                    "unexpected indented content after an inline value",
                ));
            }
            let (value, quote) = parse_flow_scalar(rest).map_err(|m| ParseError::new(i, m))?;
            Node {
                value,
                format: Formatting {
                    indent,
                    quote,
                    ..Formatting::default()
                },
                span: Span::new(i, i + 1),
            }
        };

        node.format.indent = node.format.indent.max(indent);
        node.format.leading = std::mem::take(&mut pending);
        node.format.trailing = line.comment.clone();

        let value_col = if node.span.len() == 1 && node.span.start == i && !rest.is_empty() {
            // Offset of the inline value within the raw line.
            Some(line.indent + rest_offset + (line.body[rest_offset..].len() - rest.len()))
        } else {
            None
        };

        entries.push(MapEntry {
            key,
            node,
            span: Span::new(i, extent.max(i + 1)),
            value_col,
        });
        i = extent.max(i + 1);
    }

    Ok(ConfigValue::Map(entries))
}

fn parse_seq_block(
    lines: &[RawLine],
    start: usize,
    end: usize,
    indent: usize,
) -> Result<ConfigValue, ParseError> {
    let mut items: Vec<Node> = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    let mut i = start;

    while i < end {
        let line = &lines[i];
        if line.blank || line.comment_only {
            pending.push(line.raw.clone());
            i += 1;
            continue;
        }
        if line.indent != indent || !(line.body == "-" || line.body.starts_with("- ")) {
            return Err(ParseError::new(i, "expected a `- ` sequence item"));
        }

        let rest = if line.body == "-" {
            ""
        } else {
            line.body[2..].trim()
        };
        let extent = nested_extent(lines, i, end, indent, false);

        let mut node = if rest.is_empty() {
            match first_significant(lines, i + 1, extent) {
                None => Node::scalar(ConfigValue::Null, Span::new(i, extent.max(i + 1))),
                Some(child) => {
                    let child_indent = lines[child].indent;
                    let (value, quote) = parse_block(lines, i + 1, extent, child_indent)?;
                    Node {
                        value,
                        format: Formatting {
                            indent: child_indent,
                            quote,
                            ..Formatting::default()
                        },
                        span: Span::new(i, extent),
                    }
                }
            }
        } else if has_top_level_colon(rest) {
            // Compact mapping item: `- name: build`. Re-parse with the dash
            // replaced by indentation so the entry aligns with any
            // continuation lines below.
            let mut patched = lines.to_vec();
            let dash_col = line.indent;
            let mut raw = line.raw.clone();
            raw.replace_range(dash_col..dash_col + 2, "  ");
            patched[i] = RawLine {
                indent: dash_col + 2,
                body: line.body[2..].trim_end().to_string(),
                comment: line.comment.clone(),
                blank: false,
                comment_only: false,
                raw,
            };
            let value = parse_map_block(&patched, i, extent, dash_col + 2)?;
            Node {
                value,
                format: Formatting {
                    indent: dash_col + 2,
                    ..Formatting::default()
                },
                span: Span::new(i, extent),
            }
        } else {
            if first_significant(lines, i + 1, extent).is_some() {
                return Err(ParseError::new(
                    i + 1,
                    "unexpected indented content after an inline sequence item",
                ));
            }
            let (value, quote) = parse_flow_scalar(rest).map_err(|m| ParseError::new(i, m))?;
            Node {
                value,
                format: Formatting {
                    indent,
                    quote,
                    ..Formatting::default()
                },
                span: Span::new(i, i + 1),
            }
        };

        node.format.leading = std::mem::take(&mut pending);
        if node.format.trailing.is_none() {
            node.format.trailing = line.comment.clone();
        }
        items.push(node);
        i = extent.max(i + 1);
    }

    Ok(ConfigValue::Seq(items))
}

fn block_scalar_style(rest: &str) -> Option<QuoteStyle> {
    let head = rest.trim_end_matches(['+', '-']);
    match head {
        "|" => Some(QuoteStyle::Literal),
        ">" => Some(QuoteStyle::Folded),
        _ => None,
    }
}

/// Capture a block scalar's content verbatim, stripping the block indent.
fn capture_block_scalar(lines: &[RawLine], start: usize, end: usize, header: &str) -> String {
    let strip = first_significant_indent(lines, start, end);
    let mut out: Vec<&str> = Vec::new();
    for line in &lines[start..end] {
        let content = line.raw.strip_suffix('\r').unwrap_or(&line.raw);
        if content.trim().is_empty() {
            out.push("");
        } else {
            out.push(&content[strip.min(content.len())..]);
        }
    }
    // Trim trailing blank lines; keep one final newline unless `-` chomping.
    while matches!(out.last(), Some(l) if l.is_empty()) {
        out.pop();
    }
    let mut content = out.join("\n");
    if !content.is_empty() && !header.ends_with('-') {
        content.push('\n');
    }
    content
}

fn first_significant_indent(lines: &[RawLine], start: usize, end: usize) -> usize {
    lines[start..end]
        .iter()
        .find(|l| !l.raw.trim().is_empty())
        .map(|l| l.indent)
        .unwrap_or(0)
}

/// Split `key: rest` at the first top-level colon. Returns the unquoted key
/// and the byte offset where the rest begins (after the colon and one
/// optional space).
fn split_key(body: &str) -> Option<(String, usize)> {
    let colon = find_top_level_colon(body)?;
    let key_raw = body[..colon].trim();
    let key = unquote_key(key_raw)?;
    let mut rest_offset = colon + 1;
    if body[rest_offset..].starts_with(' ') {
        rest_offset += 1;
    }
    Some((key, rest_offset))
}

fn unquote_key(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
        || (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
    {
        Some(raw[1..raw.len() - 1].to_string())
    } else {
        Some(raw.to_string())
    }
}

/// A colon that terminates a key: outside quotes and brackets, followed by
/// space or end of line.
fn find_top_level_colon(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut depth = 0usize;
    for i in 0..bytes.len() {
        match bytes[i] {
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            b'[' | b'{' if !in_single && !in_double => depth += 1,
            b']' | b'}' if !in_single && !in_double => depth = depth.saturating_sub(1),
            b':' if !in_single && !in_double && depth == 0 => {
                if i + 1 == bytes.len() || bytes[i + 1] == b' ' {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

pub(crate) fn has_top_level_colon(s: &str) -> bool {
    find_top_level_colon(s).is_some()
}

/// Parse an inline value: flow sequence, flow mapping, quoted or plain scalar.
fn parse_flow_scalar(text: &str) -> Result<(ConfigValue, QuoteStyle), String> {
    let t = text.trim();
    if t.starts_with('[') {
        if !t.ends_with(']') {
            return Err(format!("unterminated flow sequence: {t:?}"));
        }
        let inner = &t[1..t.len() - 1];
        let mut items = Vec::new();
        for part in split_top_level(inner, ',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (value, quote) = parse_flow_scalar(part)?;
            items.push(Node {
                value,
                format: Formatting {
                    quote,
                    ..Formatting::default()
                },
                span: Span::new(0, 0),
            });
        }
        return Ok((ConfigValue::Seq(items), QuoteStyle::Plain));
    }
    if t.starts_with('{') {
        if !t.ends_with('}') {
            return Err(format!("unterminated flow mapping: {t:?}"));
        }
        let inner = &t[1..t.len() - 1];
        let mut entries = Vec::new();
        for part in split_top_level(inner, ',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let colon =
                find_top_level_colon(part).ok_or_else(|| format!("expected `key: value` in flow mapping, got {part:?}"))?;
            let key = unquote_key(part[..colon].trim())
                .ok_or_else(|| "empty key in flow mapping".to_string())?;
            let (value, quote) = parse_flow_scalar(part[colon + 1..].trim())?;
            entries.push(MapEntry {
                key,
                node: Node {
                    value,
                    format: Formatting {
                        quote,
                        ..Formatting::default()
                    },
                    span: Span::new(0, 0),
                },
                span: Span::new(0, 0),
                value_col: None,
            });
        }
        return Ok((ConfigValue::Map(entries), QuoteStyle::Plain));
    }
    if t.starts_with('"') {
        if t.len() < 2 || !t.ends_with('"') {
            return Err(format!("unterminated double-quoted scalar: {t:?}"));
        }
        return Ok((
            ConfigValue::Str(unescape_double(&t[1..t.len() - 1])),
            QuoteStyle::Double,
        ));
    }
    if t.starts_with('\'') {
        if t.len() < 2 || !t.ends_with('\'') {
            return Err(format!("unterminated single-quoted scalar: {t:?}"));
        }
        return Ok((
            ConfigValue::Str(t[1..t.len() - 1].replace("''", "'")),
            QuoteStyle::Single,
        ));
    }
    if t.starts_with('&') || t.starts_with('*') || t.starts_with('!') {
        return Err("anchors, aliases, and tags are not supported in workflow preambles".to_string());
    }
    Ok((plain_scalar(t), QuoteStyle::Plain))
}

fn plain_scalar(t: &str) -> ConfigValue {
    match t {
        "" | "~" | "null" | "Null" | "NULL" => ConfigValue::Null,
        "true" | "True" | "TRUE" => ConfigValue::Bool(true),
        "false" | "False" | "FALSE" => ConfigValue::Bool(false),
        _ => {
            if let Ok(i) = t.parse::<i64>() {
                ConfigValue::Int(i)
            } else {
                ConfigValue::Str(t.to_string())
            }
        }
    }
}

fn unescape_double(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split on `sep` at bracket/quote depth zero.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut depth = 0usize;
    let mut start = 0usize;
    for i in 0..bytes.len() {
        match bytes[i] {
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            b'[' | b'{' if !in_single && !in_double => depth += 1,
            b']' | b'}' if !in_single && !in_double => depth = depth.saturating_sub(1),
            b if b == sep as u8 && !in_single && !in_double && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}
