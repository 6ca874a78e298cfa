//! # flowlock-prompt
//!
//! Prepares a workflow's markdown prompt body for embedding into generated
//! pipeline steps: strips XML comments (treating fenced code blocks as
//! opaque), substitutes known `${{ … }}` expression tokens, and splits
//! oversize prompts into chunks that respect the per-expression size budget
//! of the target CI platform.

use std::collections::BTreeMap;

/// Hard per-expression value limit imposed by the CI platform.
pub const MAX_EXPRESSION_BYTES: usize = 21 * 1024;

/// Spaces of indentation a prompt line receives when embedded in a step.
pub const CHUNK_EMBED_INDENT: usize = 10;

/// Bytes reserved for step scaffolding around each embedded chunk.
pub const CHUNK_SCAFFOLD_RESERVE: usize = 256;

/// A code-fence marker: the fence character and its run length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fence {
    marker: char,
    len: usize,
}

/// Recognize a fence line: an optional indent of up to three spaces followed
/// by a run of three or more backticks or tildes.
fn fence_at(line: &str) -> Option<Fence> {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let marker = trimmed.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let len = trimmed.chars().take_while(|&c| c == marker).count();
    if len >= 3 { Some(Fence { marker, len }) } else { None }
}

/// A fence closes only on the same marker kind with the same run length;
/// backticks never close tildes and a longer fence never closes a shorter one.
fn closes(open: Fence, line: &str) -> bool {
    match fence_at(line) {
        Some(f) => f.marker == open.marker && f.len == open.len && {
            let trimmed = line.trim();
            trimmed.chars().all(|c| c == open.marker)
        },
        None => false,
    }
}

/// Remove `<!-- … -->` spans outside fenced code blocks. A line that
/// consisted solely of a comment (plus surrounding whitespace) is dropped
/// entirely; fenced content passes through byte-for-byte.
pub fn strip_xml_comments(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut open_fence: Option<Fence> = None;
    let mut in_comment = false;

    for line in body.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);

        if let Some(fence) = open_fence {
            out.push_str(line);
            if closes(fence, content) {
                open_fence = None;
            }
            continue;
        }

        if !in_comment
            && let Some(fence) = fence_at(content)
        {
            out.push_str(line);
            open_fence = Some(fence);
            continue;
        }

        let (kept, still_open) = strip_comment_spans(content, in_comment);
        in_comment = still_open;
        if kept.trim().is_empty() && kept.len() != content.len() {
            // The whole line was comment; drop it rather than leave a blank.
            continue;
        }
        out.push_str(&kept);
        out.push_str(&line[content.len()..]);
    }
    out
}

/// Strip comment spans from one line, given whether a comment is already
/// open. Returns the surviving text and the updated comment state.
fn strip_comment_spans(line: &str, mut in_comment: bool) -> (String, bool) {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    loop {
        if in_comment {
            match rest.find("-->") {
                Some(idx) => {
                    rest = &rest[idx + 3..];
                    in_comment = false;
                }
                None => return (out, true),
            }
        } else {
            match rest.find("<!--") {
                Some(idx) => {
                    out.push_str(&rest[..idx]);
                    rest = &rest[idx + 4..];
                    in_comment = true;
                }
                None => {
                    out.push_str(rest);
                    return (out, false);
                }
            }
        }
    }
}

/// Replace known `${{ token }}` references outside fenced code blocks.
/// Unknown tokens pass through unchanged.
pub fn substitute_expressions(body: &str, context: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(body.len());
    let mut open_fence: Option<Fence> = None;

    for line in body.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);

        if let Some(fence) = open_fence {
            out.push_str(line);
            if closes(fence, content) {
                open_fence = None;
            }
            continue;
        }
        if let Some(fence) = fence_at(content) {
            out.push_str(line);
            open_fence = Some(fence);
            continue;
        }

        out.push_str(&substitute_line(content, context));
        out.push_str(&line[content.len()..]);
    }
    out
}

fn substitute_line(line: &str, context: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find("${{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 3..];
        match after.find("}}") {
            Some(end) => {
                let token = after[..end].trim();
                match context.get(token) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 3 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Split a prompt at line boundaries into chunks whose embedded size
/// (content plus per-line indent) stays within the default budget.
/// Concatenating the chunks reproduces the input exactly.
pub fn chunk_prompt(text: &str) -> Vec<String> {
    chunk_with_budget(text, MAX_EXPRESSION_BYTES - CHUNK_SCAFFOLD_RESERVE)
}

/// Like [`chunk_prompt`] with an explicit budget. A single line larger than
/// the budget becomes its own chunk; the emitter's size audit rejects it
/// with a proper diagnostic downstream.
pub fn chunk_with_budget(text: &str, budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut cost = 0usize;

    for line in text.split_inclusive('\n') {
        let line_cost = CHUNK_EMBED_INDENT + line.len();
        if !current.is_empty() && cost + line_cost > budget {
            chunks.push(std::mem::take(&mut current));
            cost = 0;
        }
        current.push_str(line);
        cost += line_cost;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_inline_comment() {
        assert_eq!(
            strip_xml_comments("before <!-- hidden --> after\n"),
            "before  after\n"
        );
    }

    #[test]
    fn drops_comment_only_lines() {
        assert_eq!(
            strip_xml_comments("keep\n<!-- internal note -->\nalso keep\n"),
            "keep\nalso keep\n"
        );
    }

    #[test]
    fn strips_multi_line_comment() {
        let body = "start\n<!-- one\ntwo\nthree --> tail\nend\n";
        assert_eq!(strip_xml_comments(body), "start\n tail\nend\n");
    }

    #[test]
    fn preserves_comments_in_backtick_fence() {
        let body = "```\n<!-- kept -->\n```\n<!-- removed -->\n";
        assert_eq!(strip_xml_comments(body), "```\n<!-- kept -->\n```\n");
    }

    #[test]
    fn fence_kinds_do_not_close_each_other() {
        // A tilde fence stays open across a backtick marker.
        let body = "~~~\n```\n<!-- kept -->\n~~~\n<!-- removed -->\n";
        assert_eq!(strip_xml_comments(body), "~~~\n```\n<!-- kept -->\n~~~\n");
    }

    #[test]
    fn fence_lengths_must_match_to_close() {
        // A quadruple fence is not closed by a triple fence.
        let body = "````\n```\n<!-- kept -->\n````\n<!-- removed -->\n";
        assert_eq!(strip_xml_comments(body), "````\n```\n<!-- kept -->\n````\n");
    }

    #[test]
    fn quintuple_tilde_fence_is_recognized() {
        let body = "~~~~~\n<!-- kept -->\n~~~~~\n";
        assert_eq!(strip_xml_comments(body), body);
    }

    #[test]
    fn unterminated_comment_swallows_rest() {
        assert_eq!(strip_xml_comments("a <!-- open\nnever closed\n"), "a \n");
    }

    #[test]
    fn substitutes_known_tokens_only() {
        let mut ctx = BTreeMap::new();
        ctx.insert("github.repository".to_string(), "octo/demo".to_string());
        let body = "repo: ${{ github.repository }}, other: ${{ github.actor }}\n";
        assert_eq!(
            substitute_expressions(body, &ctx),
            "repo: octo/demo, other: ${{ github.actor }}\n"
        );
    }

    #[test]
    fn does_not_substitute_inside_fences() {
        let mut ctx = BTreeMap::new();
        ctx.insert("github.repository".to_string(), "octo/demo".to_string());
        let body = "```\n${{ github.repository }}\n```\n";
        assert_eq!(substitute_expressions(body, &ctx), body);
    }

    #[test]
    fn small_prompt_is_one_chunk() {
        let chunks = chunk_prompt("hello\nworld\n");
        assert_eq!(chunks, vec!["hello\nworld\n".to_string()]);
    }

    #[test]
    fn oversize_prompt_splits_at_line_boundaries() {
        // 400 lines of 100 characters: an embedded cost of ~44 KB.
        let line = "x".repeat(100) + "\n";
        let text = line.repeat(400);
        let chunks = chunk_prompt(&text);
        assert!(chunks.len() >= 2, "expected at least two chunks");
        assert_eq!(chunks.concat(), text);
        for chunk in &chunks {
            let embedded: usize = chunk
                .split_inclusive('\n')
                .map(|l| l.len() + CHUNK_EMBED_INDENT)
                .sum();
            assert!(embedded <= MAX_EXPRESSION_BYTES - CHUNK_SCAFFOLD_RESERVE);
        }
    }

    proptest! {
        /// Chunks always reassemble into the original text.
        #[test]
        fn chunks_concatenate_to_input(text in "(?s).{0,4000}") {
            let chunks = chunk_with_budget(&text, 512);
            prop_assert_eq!(chunks.concat(), text);
        }

        /// No chunk exceeds the budget unless it is a single oversize line.
        #[test]
        fn chunks_respect_budget(lines in proptest::collection::vec("[a-z]{0,80}", 0..100)) {
            let text = lines.join("\n");
            let budget = 512;
            for chunk in chunk_with_budget(&text, budget) {
                let embedded: usize = chunk
                    .split_inclusive('\n')
                    .map(|l| l.len() + CHUNK_EMBED_INDENT)
                    .sum();
                let single_line = chunk.trim_end_matches('\n').lines().count() <= 1;
                prop_assert!(embedded <= budget || single_line);
            }
        }

        /// Stripping never grows the text and never panics.
        #[test]
        fn strip_never_grows(text in "(?s).{0,400}") {
            let stripped = strip_xml_comments(&text);
            prop_assert!(stripped.len() <= text.len());
        }
    }
}
