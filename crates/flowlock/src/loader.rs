//! Source loading and import-graph resolution.
//!
//! A workflow may import other markdown fragments, either by repo-relative
//! path or by remote reference `owner/repo/path@ref`. Imports form a
//! directed graph rooted at the top-level workflow; cycles are rejected and
//! at most one import may live under the agent-definition directory.
//! Remote blobs are cached on disk keyed by the `(owner, repo, ref, path)`
//! triple, written atomically so concurrent compiles can share the cache.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use tracing::debug;

use flowlock_types::{CompileError, ImportError};

/// Imports under this directory are agent definitions; only one is allowed.
pub const AGENTS_DIR: &str = ".github/agents/";

/// Sentinel marker opening a runtime import in the prompt body.
const RUNTIME_IMPORT_OPEN: &str = "{{#import";
const RUNTIME_IMPORT_CLOSE: &str = "}}";

/// A pinned remote file reference: `owner/repo/path@ref`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RemoteRef {
    pub owner: String,
    pub repo: String,
    pub path: String,
    pub git_ref: String,
}

impl RemoteRef {
    /// Parse `owner/repo/path@ref`. Anything without an `@` or with fewer
    /// than three path segments is a local path, not a remote reference.
    pub fn parse(spec: &str) -> Option<Self> {
        let (location, git_ref) = spec.rsplit_once('@')?;
        if git_ref.is_empty() {
            return None;
        }
        let mut segments = location.splitn(3, '/');
        let owner = segments.next()?.to_string();
        let repo = segments.next()?.to_string();
        let path = segments.next()?.to_string();
        if owner.is_empty() || repo.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self {
            owner,
            repo,
            path,
            git_ref: git_ref.to_string(),
        })
    }
}

impl std::fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.owner, self.repo, self.path, self.git_ref
        )
    }
}

/// Fetches remote import blobs. Abstracted so tests can stub the network.
pub trait RemoteFetcher {
    fn fetch(&self, reference: &RemoteRef, timeout: Duration) -> Result<String>;
}

/// Fetches raw blobs over HTTPS with the ambient `GITHUB_TOKEN` when set.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    base: String,
    token: Option<String>,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_base("https://raw.githubusercontent.com")
    }

    pub fn with_base(base: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("flowlock/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }
}

impl RemoteFetcher for HttpFetcher {
    fn fetch(&self, reference: &RemoteRef, timeout: Duration) -> Result<String> {
        let url = format!(
            "{}/{}/{}/{}/{}",
            self.base, reference.owner, reference.repo, reference.git_ref, reference.path
        );
        let mut request = self.client.get(&url).timeout(timeout);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let resp = request.send().context("remote import request failed")?;
        match resp.status() {
            reqwest::StatusCode::OK => resp.text().context("failed to read remote import body"),
            status => anyhow::bail!("unexpected status {status} fetching {url}"),
        }
    }
}

/// On-disk cache for remote imports, shared between concurrent compiles.
#[derive(Debug, Clone)]
pub struct ImportCache {
    root: PathBuf,
}

impl ImportCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Per-user default under the platform cache directory.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("flowlock")
    }

    fn path_for(&self, reference: &RemoteRef) -> PathBuf {
        self.root
            .join("imports")
            .join(&reference.owner)
            .join(&reference.repo)
            .join(&reference.git_ref)
            .join(&reference.path)
    }

    pub fn load(&self, reference: &RemoteRef) -> Option<String> {
        fs::read_to_string(self.path_for(reference)).ok()
    }

    /// Atomic create-then-rename so a concurrent reader never sees a
    /// partial blob.
    pub fn store(&self, reference: &RemoteRef, content: &str) -> Result<()> {
        let path = self.path_for(reference);
        let parent = path.parent().expect("cache paths always have a parent");
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache dir {}", parent.display()))?;
        let tmp = parent.join(format!(
            ".{}.tmp.{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("blob"),
            std::process::id()
        ));
        fs::write(&tmp, content)
            .with_context(|| format!("failed to write cache tmp {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move cache entry into place at {}", path.display()))?;
        Ok(())
    }

    /// Delete every cached import.
    pub fn purge(&self) -> Result<()> {
        let imports = self.root.join("imports");
        if imports.exists() {
            fs::remove_dir_all(&imports)
                .with_context(|| format!("failed to purge cache at {}", imports.display()))?;
        }
        Ok(())
    }
}

/// One loaded file: preamble (as JSON), body, and provenance.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    /// Repo-relative path for local files, `owner/repo/path@ref` for remote.
    pub rel: String,
    pub preamble: JsonValue,
    pub body: String,
    pub is_agent: bool,
}

/// The resolved tree: root first, then imports in depth-first order.
#[derive(Debug, Clone)]
pub struct SourceTree {
    pub root: LoadedSource,
    pub imports: Vec<LoadedSource>,
}

impl SourceTree {
    /// All files that fed this workflow, for provenance annotations.
    pub fn file_list(&self) -> Vec<String> {
        let mut files = vec![self.root.rel.clone()];
        files.extend(self.imports.iter().map(|s| s.rel.clone()));
        files
    }

    pub fn agent_file(&self) -> Option<&str> {
        self.imports
            .iter()
            .find(|s| s.is_agent)
            .map(|s| s.rel.as_str())
    }
}

pub struct Loader<'a> {
    repo_root: &'a Path,
    cache: ImportCache,
    fetcher: Box<dyn RemoteFetcher + 'a>,
    fetch_timeout: Duration,
}

impl<'a> Loader<'a> {
    pub fn new(repo_root: &'a Path, cache: ImportCache, fetcher: Box<dyn RemoteFetcher + 'a>) -> Self {
        Self {
            repo_root,
            cache,
            fetcher,
            fetch_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Load a workflow and its import closure.
    pub fn load(&self, path: &Path) -> Result<SourceTree, CompileError> {
        let rel = self.relative(path);
        let text = fs::read_to_string(path).map_err(|source| CompileError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut stack = vec![rel.clone()];
        let mut seen: BTreeSet<String> = BTreeSet::new();
        seen.insert(rel.clone());
        let mut imports = Vec::new();
        let root = self.load_source(&rel, &text, &mut stack, &mut seen, &mut imports)?;

        // The single-agent rule spans the whole closure.
        let agents: Vec<&LoadedSource> = imports.iter().filter(|s| s.is_agent).collect();
        if agents.len() > 1 {
            return Err(CompileError::Import(ImportError::MultipleAgentImports {
                first: agents[0].rel.clone(),
                second: agents[1].rel.clone(),
            }));
        }

        Ok(SourceTree { root, imports })
    }

    fn relative(&self, path: &Path) -> String {
        let canonical = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        let root = self
            .repo_root
            .canonicalize()
            .unwrap_or_else(|_| self.repo_root.to_path_buf());
        canonical
            .strip_prefix(&root)
            .unwrap_or(&canonical)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn load_source(
        &self,
        rel: &str,
        text: &str,
        stack: &mut Vec<String>,
        seen: &mut BTreeSet<String>,
        imports: &mut Vec<LoadedSource>,
    ) -> Result<LoadedSource, CompileError> {
        let split = flowlock_frontmatter::split_optional(text).map_err(|e| CompileError::Parse {
            path: PathBuf::from(rel),
            message: e.to_string(),
        })?;
        let preamble = if split.preamble.is_empty() {
            JsonValue::Object(serde_json::Map::new())
        } else {
            let doc = flowlock_frontmatter::Document::parse(&split.preamble).map_err(|e| {
                CompileError::Parse {
                    path: PathBuf::from(rel),
                    message: e.to_string(),
                }
            })?;
            doc.to_json()
        };

        let body = self.substitute_runtime_imports(rel, &split.body)?;

        // Resolve the declared (model-time) imports depth-first.
        for spec in declared_imports(&preamble) {
            self.resolve_import(&spec, stack, seen, imports)?;
        }

        Ok(LoadedSource {
            rel: rel.to_string(),
            preamble,
            body,
            is_agent: rel.starts_with(AGENTS_DIR),
        })
    }

    fn resolve_import(
        &self,
        spec: &str,
        stack: &mut Vec<String>,
        seen: &mut BTreeSet<String>,
        imports: &mut Vec<LoadedSource>,
    ) -> Result<(), CompileError> {
        let key = spec.to_string();
        if stack.contains(&key) {
            let mut cycle = stack.clone();
            cycle.push(key);
            return Err(CompileError::Import(ImportError::CircularImport { cycle }));
        }
        if !seen.insert(key.clone()) {
            // Diamond imports merge once.
            return Ok(());
        }

        debug!(import = %spec, "resolving import");
        let text = match RemoteRef::parse(spec) {
            Some(reference) => self.fetch_remote(&reference)?,
            None => {
                let path = self.repo_root.join(spec);
                fs::read_to_string(&path).map_err(|_| {
                    CompileError::Import(ImportError::SourceNotFound {
                        path: spec.to_string(),
                    })
                })?
            }
        };

        stack.push(key.clone());
        let loaded = self.load_source(spec, &text, stack, seen, imports)?;
        stack.pop();
        imports.push(loaded);
        Ok(())
    }

    fn fetch_remote(&self, reference: &RemoteRef) -> Result<String, CompileError> {
        if let Some(cached) = self.cache.load(reference) {
            debug!(reference = %reference, "remote import cache hit");
            return Ok(cached);
        }
        let content = self
            .fetcher
            .fetch(reference, self.fetch_timeout)
            .map_err(|e| {
                CompileError::Import(ImportError::RemoteFetchFailed {
                    reference: reference.to_string(),
                    reason: e.to_string(),
                })
            })?;
        if let Err(e) = self.cache.store(reference, &content) {
            debug!(reference = %reference, error = %e, "failed to cache remote import");
        }
        Ok(content)
    }

    /// Substitute `{{#import path}}` markers in the body at load time.
    /// The `{{#import? path}}` form tolerates a missing file.
    fn substitute_runtime_imports(&self, rel: &str, body: &str) -> Result<String, CompileError> {
        let mut out = String::with_capacity(body.len());
        for line in body.split_inclusive('\n') {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix(RUNTIME_IMPORT_OPEN)
                && let Some(inner) = rest.strip_suffix(RUNTIME_IMPORT_CLOSE)
            {
                let (optional, spec) = match inner.strip_prefix('?') {
                    Some(spec) => (true, spec.trim()),
                    None => (false, inner.trim()),
                };
                let path = self.repo_root.join(spec);
                match fs::read_to_string(&path) {
                    Ok(content) => {
                        out.push_str(&content);
                        if !content.ends_with('\n') {
                            out.push('\n');
                        }
                    }
                    Err(_) if optional => {
                        debug!(file = %rel, import = %spec, "optional runtime import missing");
                    }
                    Err(_) => {
                        return Err(CompileError::Import(ImportError::SourceNotFound {
                            path: spec.to_string(),
                        }));
                    }
                }
                continue;
            }
            out.push_str(line);
        }
        Ok(out)
    }
}

/// Shallow-extract the `imports:` sequence from a parsed preamble.
fn declared_imports(preamble: &JsonValue) -> Vec<String> {
    match preamble.get("imports") {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct NoFetch;

    impl RemoteFetcher for NoFetch {
        fn fetch(&self, reference: &RemoteRef, _timeout: Duration) -> Result<String> {
            anyhow::bail!("unexpected network access for {reference}")
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn loader(root: &Path) -> Loader<'_> {
        Loader::new(
            root,
            ImportCache::new(root.join(".cache")),
            Box::new(NoFetch),
        )
    }

    #[test]
    fn remote_ref_parses_pinned_spec() {
        let r = RemoteRef::parse("octo/shared/workflows/common.md@v1.2.0").unwrap();
        assert_eq!(r.owner, "octo");
        assert_eq!(r.repo, "shared");
        assert_eq!(r.path, "workflows/common.md");
        assert_eq!(r.git_ref, "v1.2.0");
    }

    #[test]
    fn remote_ref_rejects_local_paths() {
        assert_eq!(RemoteRef::parse("shared/tools.md"), None);
        assert_eq!(RemoteRef::parse("a/b@"), None);
    }

    #[test]
    fn loads_local_import_closure() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "wf.md",
            "---\non: push\nimports:\n  - shared/extra.md\n---\n# Root\n",
        );
        write(dir.path(), "shared/extra.md", "---\nstrict: true\n---\nExtra prompt.\n");

        let tree = loader(dir.path()).load(&dir.path().join("wf.md")).unwrap();
        assert_eq!(tree.imports.len(), 1);
        assert_eq!(tree.imports[0].rel, "shared/extra.md");
        assert_eq!(tree.imports[0].preamble["strict"], true);
    }

    #[test]
    fn detects_import_cycle() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.md", "---\nimports: [b.md]\n---\nA\n");
        write(dir.path(), "b.md", "---\nimports: [a.md]\n---\nB\n");

        let err = loader(dir.path()).load(&dir.path().join("a.md")).unwrap_err();
        match err {
            CompileError::Import(ImportError::CircularImport { cycle }) => {
                assert!(cycle.iter().any(|p| p.contains("a.md")));
                assert!(cycle.iter().any(|p| p.contains("b.md")));
            }
            other => panic!("expected CircularImport, got {other:?}"),
        }
    }

    #[test]
    fn rejects_second_agent_import() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "wf.md",
            "---\nimports:\n  - .github/agents/one.md\n  - .github/agents/two.md\n---\nX\n",
        );
        write(dir.path(), ".github/agents/one.md", "One\n");
        write(dir.path(), ".github/agents/two.md", "Two\n");

        let err = loader(dir.path()).load(&dir.path().join("wf.md")).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Import(ImportError::MultipleAgentImports { .. })
        ));
    }

    #[test]
    fn missing_import_is_reported() {
        let dir = tempdir().unwrap();
        write(dir.path(), "wf.md", "---\nimports: [gone.md]\n---\nX\n");
        let err = loader(dir.path()).load(&dir.path().join("wf.md")).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Import(ImportError::SourceNotFound { .. })
        ));
    }

    #[test]
    fn substitutes_runtime_imports() {
        let dir = tempdir().unwrap();
        write(dir.path(), "wf.md", "---\non: push\n---\nBefore\n{{#import snippets/rules.md}}\nAfter\n");
        write(dir.path(), "snippets/rules.md", "RULES CONTENT");

        let tree = loader(dir.path()).load(&dir.path().join("wf.md")).unwrap();
        assert!(tree.root.body.contains("RULES CONTENT\n"));
        assert!(!tree.root.body.contains("{{#import"));
    }

    #[test]
    fn optional_runtime_import_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        write(dir.path(), "wf.md", "---\non: push\n---\n{{#import? missing.md}}\nTail\n");
        let tree = loader(dir.path()).load(&dir.path().join("wf.md")).unwrap();
        assert_eq!(tree.root.body, "Tail\n");
    }

    #[test]
    fn remote_import_uses_cache_before_network() {
        let dir = tempdir().unwrap();
        let cache = ImportCache::new(dir.path().join(".cache"));
        let reference = RemoteRef::parse("octo/shared/common.md@main").unwrap();
        cache.store(&reference, "---\nstrict: true\n---\nShared\n").unwrap();

        write(dir.path(), "wf.md", "---\nimports: [octo/shared/common.md@main]\n---\nX\n");
        let loader = Loader::new(dir.path(), cache, Box::new(NoFetch));
        let tree = loader.load(&dir.path().join("wf.md")).unwrap();
        assert_eq!(tree.imports.len(), 1);
        assert_eq!(tree.imports[0].preamble["strict"], true);
    }

    #[test]
    fn purge_empties_cache() {
        let dir = tempdir().unwrap();
        let cache = ImportCache::new(dir.path().to_path_buf());
        let reference = RemoteRef::parse("o/r/f.md@main").unwrap();
        cache.store(&reference, "content").unwrap();
        assert!(cache.load(&reference).is_some());
        cache.purge().unwrap();
        assert!(cache.load(&reference).is_none());
    }
}
