//! Parallel compilation of a workflows directory.
//!
//! Files are fully independent: each worker runs its own compiler over its
//! own sources, and no state is shared beyond the import cache (which is
//! safe under concurrent atomic writes). Results are reported in path order
//! regardless of completion order.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

use flowlock_types::{CompileArtifacts, CompileError, CompileOptions};

use crate::compiler::{CancelFlag, Compiler, NullReporter};

/// Outcome of a batch compile. Failures never abort the other files.
#[derive(Debug)]
pub struct BatchResult {
    pub artifacts: Vec<CompileArtifacts>,
    pub failures: Vec<(PathBuf, CompileError)>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Find compilable workflow sources under `dir`: `.md` files that are not
/// themselves generated artifacts.
pub fn discover_sources(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("md") {
            sources.push(path);
        }
    }
    sources.sort();
    Ok(sources)
}

/// Compile every workflow under `dir` with bounded parallelism.
pub fn compile_dir(
    dir: &Path,
    options: &CompileOptions,
    cancel: &CancelFlag,
) -> Result<BatchResult, CompileError> {
    let sources = discover_sources(dir).map_err(|source| CompileError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    info!(count = sources.len(), dir = %dir.display(), "batch compile");
    Ok(compile_many(&sources, options, cancel))
}

/// Compile an explicit list of sources with bounded parallelism.
pub fn compile_many(
    sources: &[PathBuf],
    options: &CompileOptions,
    cancel: &CancelFlag,
) -> BatchResult {
    let workers = options.jobs.clamp(1, sources.len().max(1));
    let next = AtomicUsize::new(0);
    let artifacts: Mutex<Vec<CompileArtifacts>> = Mutex::new(Vec::new());
    let failures: Mutex<Vec<(PathBuf, CompileError)>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                let compiler = Compiler::new(options.clone());
                loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let Some(source) = sources.get(idx) else {
                        break;
                    };
                    if cancel.is_cancelled() {
                        break;
                    }
                    match compiler.compile_file_with(source, cancel, &mut NullReporter) {
                        Ok(result) => artifacts.lock().expect("not poisoned").push(result),
                        Err(error) => failures
                            .lock()
                            .expect("not poisoned")
                            .push((source.clone(), error)),
                    }
                }
            });
        }
    });

    let mut artifacts = artifacts.into_inner().expect("not poisoned");
    let mut failures = failures.into_inner().expect("not poisoned");
    artifacts.sort_by(|a, b| a.source.cmp(&b.source));
    failures.sort_by(|a, b| a.0.cmp(&b.0));
    BatchResult {
        artifacts,
        failures,
    }
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

    fn options_for(root: &Path) -> CompileOptions {
        CompileOptions {
            repo_root: root.to_path_buf(),
            cache_root: Some(root.join(".cache")),
            jobs: 2,
            ..CompileOptions::default()
        }
    }

    #[test]
    fn compiles_every_markdown_file() {
        let dir = tempdir().unwrap();
        write(dir.path(), "flows/a.md", "---\non: push\n---\n# A\n");
        write(dir.path(), "flows/b.md", "---\non: push\n---\n# B\n");
        write(dir.path(), "flows/notes.txt", "not a workflow");

        let result = compile_dir(
            &dir.path().join("flows"),
            &options_for(dir.path()),
            &CancelFlag::new(),
        )
        .unwrap();
        assert!(result.is_success());
        assert_eq!(result.artifacts.len(), 2);
        assert!(dir.path().join("flows/a.lock.yml").exists());
        assert!(dir.path().join("flows/b.lock.yml").exists());
    }

    #[test]
    fn one_failure_does_not_stop_the_rest() {
        let dir = tempdir().unwrap();
        write(dir.path(), "flows/good.md", "---\non: push\n---\n# Good\n");
        write(dir.path(), "flows/bad.md", "---\non: push\nengine: gpt-5\n---\n# Bad\n");

        let result = compile_dir(
            &dir.path().join("flows"),
            &options_for(dir.path()),
            &CancelFlag::new(),
        )
        .unwrap();
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].0.ends_with("bad.md"));
        assert!(dir.path().join("flows/good.lock.yml").exists());
    }

    #[test]
    fn results_come_back_in_path_order() {
        let dir = tempdir().unwrap();
        for name in ["c.md", "a.md", "b.md"] {
            write(
                dir.path(),
                &format!("flows/{name}"),
                "---\non: push\n---\n# X\n",
            );
        }
        let result = compile_dir(
            &dir.path().join("flows"),
            &options_for(dir.path()),
            &CancelFlag::new(),
        )
        .unwrap();
        let names: Vec<String> = result
            .artifacts
            .iter()
            .map(|a| a.source.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.md", "b.md", "c.md"]);
    }
}
