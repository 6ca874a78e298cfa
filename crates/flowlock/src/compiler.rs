//! The per-file compile pipeline.
//!
//! A compile moves through `Loaded → Parsed → Validated → Modeled →
//! Assembled → Emitted → SizeChecked → (Linted) → Written`, accumulating
//! diagnostics. User-visible failure is a single [`CompileError::Validation`]
//! carrying every finding; output is written atomically and only when no
//! error-severity diagnostic survived.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use flowlock_types::{
    CompileArtifacts, CompileError, CompileOptions, Diagnostic, RuntimeEcosystem, Severity,
    WorkflowData,
};

use crate::emit;
use crate::jobs;
use crate::lint;
use crate::loader::{HttpFetcher, ImportCache, Loader};
use crate::model;
use crate::schema;
use crate::validate;

/// Cooperative cancellation, checked between phases and honored by I/O
/// helpers. A cancelled compile leaves no partial output on disk.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// User-facing progress sink, implemented by the CLI.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Discards everything; used by library callers and tests.
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn compile_file(&self, path: &Path) -> Result<CompileArtifacts, CompileError> {
        self.compile_file_with(path, &CancelFlag::new(), &mut NullReporter)
    }

    pub fn compile_file_with(
        &self,
        path: &Path,
        cancel: &CancelFlag,
        reporter: &mut dyn Reporter,
    ) -> Result<CompileArtifacts, CompileError> {
        let mut diags: Vec<Diagnostic> = Vec::new();

        // Loaded
        check_cancelled(cancel)?;
        reporter.info(&format!("compiling {}", path.display()));
        let cache_root = self
            .options
            .cache_root
            .clone()
            .unwrap_or_else(ImportCache::default_root);
        let fetcher = HttpFetcher::new().map_err(CompileError::Internal)?;
        let loader = Loader::new(&self.options.repo_root, ImportCache::new(cache_root), Box::new(fetcher))
            .with_fetch_timeout(self.options.probe_timeout);
        let tree = loader.load(path)?;
        debug!(files = tree.imports.len() + 1, "sources loaded");

        // Parsed (split + preamble trees happened during loading); merge now.
        check_cancelled(cancel)?;
        let (merged, body) = model::merge_sources(&tree);

        // Validated
        schema::validate(&merged, &mut diags);

        // Modeled
        check_cancelled(cancel)?;
        let Some(mut data) = model::build(&merged, &body, &tree, &mut diags) else {
            return Err(CompileError::Validation { diagnostics: diags });
        };
        if self.options.strict {
            data.strict = true;
        }

        // Cross-field runtime validation.
        check_cancelled(cancel)?;
        validate::validate(&data, &self.options, &mut diags);

        // Assembled
        check_cancelled(cancel)?;
        let jobs = jobs::build_jobs(&data).map_err(CompileError::Internal)?;

        // Emitted
        let lock_text = emit::render_lock_file(&data, &jobs);

        // SizeChecked
        diags.extend(validate::audit_expression_sizes(&lock_text));

        if diags.iter().any(|d| d.severity == Severity::Error) {
            return Err(CompileError::Validation { diagnostics: diags });
        }
        for warning in diags.iter().filter(|d| d.severity == Severity::Warning) {
            reporter.warn(&warning.render());
        }

        let mut artifacts = CompileArtifacts {
            source: path.to_path_buf(),
            lock_path: None,
            lock_sha256: Some(hex::encode(Sha256::digest(lock_text.as_bytes()))),
            job_count: jobs.len(),
            chunk_count: data.prompt_chunks.len(),
            manifests: Vec::new(),
            warnings: diags,
            compiled_at: Utc::now(),
        };

        if self.options.no_emit {
            info!(source = %path.display(), "validated (no emit)");
            return Ok(artifacts);
        }

        // Written
        check_cancelled(cancel)?;
        let lock_path = emit::lock_path_for(path);
        emit::write_atomic(&lock_path, &lock_text).map_err(CompileError::Internal)?;
        reporter.info(&format!("wrote {}", lock_path.display()));

        if self.options.dependabot_manifests {
            artifacts.manifests = write_manifests(&data, &lock_path).map_err(CompileError::Internal)?;
        }

        // Linted (optional, post-write, never fatal)
        let lint_warnings = lint::run_linters(&lock_path, &self.options);
        for warning in &lint_warnings {
            reporter.warn(&warning.render());
        }
        artifacts.warnings.extend(lint_warnings);
        artifacts.lock_path = Some(lock_path);
        Ok(artifacts)
    }
}

fn check_cancelled(cancel: &CancelFlag) -> Result<(), CompileError> {
    if cancel.is_cancelled() {
        Err(CompileError::Cancelled)
    } else {
        Ok(())
    }
}

/// Language-specific package manifests for dependency scanners.
fn write_manifests(data: &WorkflowData, lock_path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    let dir = lock_path.parent().unwrap_or_else(|| Path::new("."));
    let stem = lock_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "workflow".to_string())
        .trim_end_matches(".lock")
        .to_string();

    if let Some(packages) = data.runtimes.packages.get(&RuntimeEcosystem::Node)
        && !packages.is_empty()
    {
        let deps: BTreeMap<&String, &str> = packages.iter().map(|p| (p, "*")).collect();
        let manifest = serde_json::json!({
            "name": format!("{stem}-agent-deps"),
            "private": true,
            "dependencies": deps,
        });
        let path = dir.join(format!("{stem}.deps.package.json"));
        emit::write_atomic(&path, &(serde_json::to_string_pretty(&manifest)? + "\n"))?;
        written.push(path);
    }

    let python: Vec<&String> = data
        .runtimes
        .packages
        .iter()
        .filter(|(eco, _)| matches!(eco, RuntimeEcosystem::Python | RuntimeEcosystem::Uv))
        .flat_map(|(_, packages)| packages.iter())
        .collect();
    if !python.is_empty() {
        let mut content = String::new();
        for package in python {
            content.push_str(package);
            content.push('\n');
        }
        let path = dir.join(format!("{stem}.deps.requirements.txt"));
        emit::write_atomic(&path, &content)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn compiler_for(root: &Path) -> Compiler {
        Compiler::new(CompileOptions {
            repo_root: root.to_path_buf(),
            cache_root: Some(root.join(".cache")),
            ..CompileOptions::default()
        })
    }

    #[test]
    fn smallest_valid_workflow_compiles() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            ".github/workflows/title.md",
            "---\non: workflow_dispatch\nengine: copilot\n---\n# Title\n",
        );
        let artifacts = compiler_for(dir.path())
            .compile_file(&dir.path().join(".github/workflows/title.md"))
            .unwrap();

        assert_eq!(artifacts.job_count, 1);
        let lock_path = artifacts.lock_path.unwrap();
        assert!(lock_path.ends_with("title.lock.yml"));
        let text = fs::read_to_string(&lock_path).unwrap();
        assert!(text.contains("name: Title"));
        assert!(text.contains("workflow_dispatch:"));
        assert!(text.contains("jobs:\n  agent:"));
    }

    #[test]
    fn safe_output_fan_out_compiles_to_handler_jobs() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "wf.md",
            "---\non: issues\nengine: copilot\nsafe-outputs:\n  create-issue:\n  add-comment:\n    max: 1\n---\n# Fan out\n",
        );
        let artifacts = compiler_for(dir.path())
            .compile_file(&dir.path().join("wf.md"))
            .unwrap();
        assert_eq!(artifacts.job_count, 3);
        let text = fs::read_to_string(artifacts.lock_path.unwrap()).unwrap();
        assert!(text.contains("  create_issue:\n"));
        assert!(text.contains("  add_comment:\n"));
        assert!(text.contains("contains(fromJSON(needs.agent.outputs.output_types), 'create-issue')"));
        assert!(text.contains("contains(fromJSON(needs.agent.outputs.output_types), 'add-comment')"));
        assert!(text.contains("needs:\n      - agent"));
    }

    #[test]
    fn oversize_prompt_stays_under_expression_limit() {
        let dir = tempdir().unwrap();
        let line = "x".repeat(100);
        let prompt: String = format!("{line}\n").repeat(400);
        write(
            dir.path(),
            "big.md",
            &format!("---\non: workflow_dispatch\nengine: copilot\n---\n{prompt}"),
        );
        let artifacts = compiler_for(dir.path())
            .compile_file(&dir.path().join("big.md"))
            .unwrap();
        assert!(artifacts.chunk_count >= 2);
        let text = fs::read_to_string(artifacts.lock_path.unwrap()).unwrap();
        assert!(text.contains("Create prompt (part 1)"));
        assert!(text.contains("Append prompt (part 2)"));
        for line in text.lines() {
            assert!(line.len() <= flowlock_types::MAX_EXPRESSION_BYTES);
        }
    }

    #[test]
    fn duplicate_cache_id_fails_with_diagnostic() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "wf.md",
            "---\non: push\ntools:\n  cache-memory:\n    - id: x\n    - id: x\n---\nBody\n",
        );
        let err = compiler_for(dir.path())
            .compile_file(&dir.path().join("wf.md"))
            .unwrap_err();
        let diags = err.diagnostics();
        assert!(diags.iter().any(|d| d.message.contains("duplicate cache-memory id `x`")));
    }

    #[test]
    fn stop_after_minutes_fails_with_suggestion() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "wf.md",
            "---\non:\n  workflow_dispatch:\n  stop-after: +90m\n---\nBody\n",
        );
        let err = compiler_for(dir.path())
            .compile_file(&dir.path().join("wf.md"))
            .unwrap_err();
        assert!(err.diagnostics().iter().any(|d| d.message.contains("+2h")));
    }

    #[test]
    fn import_cycle_fails_with_both_paths() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.md", "---\non: push\nimports: [b.md]\n---\nA\n");
        write(dir.path(), "b.md", "---\nimports: [a.md]\n---\nB\n");
        let err = compiler_for(dir.path())
            .compile_file(&dir.path().join("a.md"))
            .unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("a.md") && rendered.contains("b.md"));
    }

    #[test]
    fn no_emit_mode_writes_nothing() {
        let dir = tempdir().unwrap();
        write(dir.path(), "wf.md", "---\non: push\n---\nBody\n");
        let compiler = Compiler::new(CompileOptions {
            repo_root: dir.path().to_path_buf(),
            cache_root: Some(dir.path().join(".cache")),
            no_emit: true,
            ..CompileOptions::default()
        });
        let artifacts = compiler.compile_file(&dir.path().join("wf.md")).unwrap();
        assert!(artifacts.lock_path.is_none());
        assert!(!dir.path().join("wf.lock.yml").exists());
    }

    #[test]
    fn compiles_are_deterministic() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "wf.md",
            "---\non:\n  schedule:\n    - cron: \"0 9 * * 1\"\nengine: claude\nsafe-outputs:\n  create-issue:\n---\n# Weekly\n",
        );
        let compiler = compiler_for(dir.path());
        let first = compiler.compile_file(&dir.path().join("wf.md")).unwrap();
        let text_one = fs::read_to_string(first.lock_path.as_ref().unwrap()).unwrap();
        let second = compiler.compile_file(&dir.path().join("wf.md")).unwrap();
        let text_two = fs::read_to_string(second.lock_path.as_ref().unwrap()).unwrap();
        assert_eq!(text_one, text_two);
    }

    #[test]
    fn strict_mode_failures_are_aggregated() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "wf.md",
            "---\non: push\npermissions:\n  issues: write\nstrict: true\n---\nBody\n",
        );
        let err = compiler_for(dir.path())
            .compile_file(&dir.path().join("wf.md"))
            .unwrap_err();
        let diags = err.diagnostics();
        // Timeout, write permission, and network findings arrive together.
        assert!(diags.iter().any(|d| d.message.contains("timeout_minutes")));
        assert!(diags.iter().any(|d| d.message.contains("forbids `write`")));
        assert!(diags.iter().any(|d| d.message.contains("network")));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn cancelled_compile_leaves_no_output() {
        let dir = tempdir().unwrap();
        write(dir.path(), "wf.md", "---\non: push\n---\nBody\n");
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = compiler_for(dir.path())
            .compile_file_with(&dir.path().join("wf.md"), &cancel, &mut NullReporter)
            .unwrap_err();
        assert!(matches!(err, CompileError::Cancelled));
        assert!(!dir.path().join("wf.lock.yml").exists());
    }

    #[test]
    fn dependabot_manifests_are_written_when_enabled() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "wf.md",
            "---\non: push\ntools:\n  tavily:\n    command: npx\n    args: [\"-y\", \"tavily-mcp\"]\n---\nBody\n",
        );
        let compiler = Compiler::new(CompileOptions {
            repo_root: dir.path().to_path_buf(),
            cache_root: Some(dir.path().join(".cache")),
            dependabot_manifests: true,
            ..CompileOptions::default()
        });
        let artifacts = compiler.compile_file(&dir.path().join("wf.md")).unwrap();
        assert_eq!(artifacts.manifests.len(), 1);
        let manifest = fs::read_to_string(&artifacts.manifests[0]).unwrap();
        assert!(manifest.contains("tavily-mcp"));
    }
}
