//! Masking of token-like values before diagnostics reach the terminal.

/// Known credential prefixes that are always masked.
const TOKEN_PREFIXES: &[&str] = &["ghp_", "gho_", "ghs_", "ghr_", "github_pat_"];

/// Replace anything that looks like a credential with a redaction marker.
/// The masked text keeps its first four characters so operators can still
/// tell which token leaked.
pub fn redact(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        out.push_str(&redact_line(line));
    }
    out
}

fn redact_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while !rest.is_empty() {
        // Earliest credential prefix in what remains.
        let hit = TOKEN_PREFIXES
            .iter()
            .filter_map(|p| rest.find(p).map(|idx| (idx, *p)))
            .min_by_key(|(idx, _)| *idx);
        let Some((token_start, prefix)) = hit else {
            out.push_str(rest);
            break;
        };
        let tail = &rest[token_start..];
        let token_len = tail
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .count();
        out.push_str(&rest[..token_start]);
        if token_len > prefix.len() {
            out.push_str(&tail[..4.min(token_len)]);
            out.push_str("***");
        } else {
            out.push_str(&tail[..token_len.max(prefix.len()).min(tail.len())]);
        }
        rest = &tail[token_len.max(prefix.len()).min(tail.len())..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_github_tokens() {
        let masked = redact("token ghp_abcdef0123456789 leaked");
        assert_eq!(masked, "token ghp_*** leaked");
    }

    #[test]
    fn leaves_ordinary_text_alone() {
        assert_eq!(redact("nothing secret here"), "nothing secret here");
    }

    #[test]
    fn masks_fine_grained_tokens() {
        let masked = redact("x github_pat_11ABCDEF_longsuffix y");
        assert!(masked.contains("gith***"));
        assert!(!masked.contains("longsuffix"));
    }
}
