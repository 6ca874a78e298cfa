//! `.flowlock.toml` support.
//!
//! The file supplies project defaults for compiler options; CLI flags win
//! over file values, which win over built-in defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use flowlock_types::CompileOptions;

pub const CONFIG_FILE_NAME: &str = ".flowlock.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Tighten security defaults for every compile.
    #[serde(default)]
    pub strict: Option<bool>,
    /// Allow `write` permissions under strict mode.
    #[serde(default)]
    pub dangerous_permissions_write: Option<bool>,
    /// Probe container images declared by MCP tools.
    #[serde(default)]
    pub validate_containers: Option<bool>,
    /// Probe collected packages against their registries.
    #[serde(default)]
    pub validate_packages: Option<bool>,
    #[serde(default)]
    pub actionlint: Option<bool>,
    #[serde(default)]
    pub zizmor: Option<bool>,
    #[serde(default)]
    pub poutine: Option<bool>,
    /// Write dependency manifests next to each lock file.
    #[serde(default)]
    pub dependabot: Option<bool>,
    /// Remote-import cache root.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Worker threads for batch compiles.
    #[serde(default)]
    pub jobs: Option<usize>,
}

/// Load `.flowlock.toml` from the repository root, if present.
pub fn load(repo_root: &Path) -> Result<Option<FileConfig>> {
    let path = repo_root.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: FileConfig =
        toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(config))
}

/// Overlay file values onto the defaults. Only explicitly set fields apply.
pub fn apply(file: &FileConfig, options: &mut CompileOptions) {
    if let Some(v) = file.strict {
        options.strict = v;
    }
    if let Some(v) = file.dangerous_permissions_write {
        options.dangerous_permissions_write = v;
    }
    if let Some(v) = file.validate_containers {
        options.validate_containers = v;
    }
    if let Some(v) = file.validate_packages {
        options.validate_packages = v;
    }
    if let Some(v) = file.actionlint {
        options.actionlint = v;
    }
    if let Some(v) = file.zizmor {
        options.zizmor = v;
    }
    if let Some(v) = file.poutine {
        options.poutine = v;
    }
    if let Some(v) = file.dependabot {
        options.dependabot_manifests = v;
    }
    if let Some(v) = &file.cache_dir {
        options.cache_root = Some(v.clone());
    }
    if let Some(v) = file.jobs {
        options.jobs = v.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn absent_file_is_fine() {
        let dir = tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn file_values_overlay_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "strict = true\nactionlint = true\njobs = 8\n",
        )
        .unwrap();
        let file = load(dir.path()).unwrap().unwrap();
        let mut options = CompileOptions::default();
        apply(&file, &mut options);
        assert!(options.strict);
        assert!(options.actionlint);
        assert_eq!(options.jobs, 8);
        // Untouched fields keep their defaults.
        assert!(!options.validate_containers);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "sterict = true\n").unwrap();
        assert!(load(dir.path()).is_err());
    }
}
