//! Optional external linters over the emitted lock file.
//!
//! Linters are best-effort: a missing binary skips silently, a non-zero
//! exit becomes a warning diagnostic. Compiles never fail on linter output.

use std::path::Path;

use tracing::debug;

use flowlock_types::{CompileOptions, Diagnostic};

use crate::process::run_with_timeout;

pub fn run_linters(lock_path: &Path, options: &CompileOptions) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let lock = lock_path.to_string_lossy();

    let linters: [(bool, &str, Vec<&str>); 3] = [
        (options.actionlint, "actionlint", vec![lock.as_ref()]),
        (options.zizmor, "zizmor", vec![lock.as_ref()]),
        (options.poutine, "poutine", vec!["analyze-local", lock.as_ref()]),
    ];

    for (enabled, tool, args) in linters {
        if !enabled {
            continue;
        }
        if which::which(tool).is_err() {
            debug!(tool, "linter not installed; skipped");
            continue;
        }
        let parent = lock_path.parent().unwrap_or_else(|| Path::new("."));
        match run_with_timeout(tool, &args, parent, Some(options.lint_timeout)) {
            Ok(output) if output.success() => {}
            Ok(output) if output.timed_out => {
                diags.push(Diagnostic::warning(
                    "lint",
                    format!("{tool} timed out and was skipped"),
                ));
            }
            Ok(output) => {
                let detail = if output.stdout.trim().is_empty() {
                    output.stderr
                } else {
                    output.stdout
                };
                let mut detail = detail.trim().to_string();
                if detail.len() > 2000 {
                    detail.truncate(2000);
                    detail.push_str("\n… (truncated)");
                }
                diags.push(
                    Diagnostic::warning("lint", format!("{tool} reported findings"))
                        .with_rationale(detail),
                );
            }
            Err(e) => {
                debug!(tool, error = %e, "linter failed to run");
            }
        }
    }
    diags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_linters_produce_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("wf.lock.yml");
        std::fs::write(&lock, "name: x\n").unwrap();
        let diags = run_linters(&lock, &CompileOptions::default());
        assert!(diags.is_empty());
    }
}
