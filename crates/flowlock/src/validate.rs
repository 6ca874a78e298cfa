//! Cross-field validation after the model is built: cache-id uniqueness,
//! secret-name format, strict-mode rules, optional container and package
//! probes, and the post-emission expression-size audit.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use flowlock_types::{
    CompileOptions, Diagnostic, MAX_EXPRESSION_BYTES, McpLaunch, PermissionLevel,
    RuntimeEcosystem, ToolConfig, WorkflowData,
};

use crate::process::run_with_timeout;

const DOCS_STRICT: &str = "https://flowlock.dev/reference/strict-mode/";

/// Run every runtime check, appending findings to `diags`.
pub fn validate(data: &WorkflowData, options: &CompileOptions, diags: &mut Vec<Diagnostic>) {
    check_cache_ids(data, diags);
    check_secret_names(data, diags);
    check_strict_mode(data, options, diags);

    if options.validate_containers {
        check_containers(data, options, diags);
    }
    if options.validate_packages {
        match RegistryProbe::new(options.probe_timeout) {
            Ok(probe) => probe.check_packages(data, diags),
            Err(e) => warn!(error = %e, "package validation skipped"),
        }
    }
}

fn check_cache_ids(data: &WorkflowData, diags: &mut Vec<Diagnostic>) {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for entry in &data.caches {
        if !seen.insert(&entry.id) {
            diags.push(
                Diagnostic::error(
                    "runtime",
                    format!("duplicate cache-memory id `{}`", entry.id),
                )
                .with_field("tools.cache-memory")
                .with_rationale(
                    "cache entries restore into the same directory tree, so ids must be unique",
                )
                .with_example(
                    "tools:\n  cache-memory:\n    - id: notes\n    - id: scratch",
                )
                .with_docs("https://flowlock.dev/reference/tools/"),
            );
        }
    }
}

/// `^[A-Z][A-Z0-9_]*$`, checked without a regex engine.
pub fn is_valid_secret_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn check_secret_names(data: &WorkflowData, diags: &mut Vec<Diagnostic>) {
    for name in &data.secrets_referenced {
        if !is_valid_secret_name(name) {
            diags.push(
                Diagnostic::error(
                    "runtime",
                    format!("`{name}` is not a valid secret name"),
                )
                .with_rationale(
                    "secret names must start with an uppercase letter and contain only \
                     uppercase letters, digits, and underscores, or the platform will not \
                     expand them",
                )
                .with_example("env:\n  API_KEY: \"${{ secrets.MY_API_KEY }}\"")
                .with_docs("https://flowlock.dev/reference/secrets/"),
            );
        }
    }
}

fn check_strict_mode(data: &WorkflowData, options: &CompileOptions, diags: &mut Vec<Diagnostic>) {
    if !(options.strict || data.strict) {
        return;
    }

    if data.timeout_minutes.is_none() {
        diags.push(
            Diagnostic::error("strict-mode", "strict mode requires `timeout_minutes`")
                .with_field("timeout_minutes")
                .with_rationale("an agent job without a timeout can run unattended indefinitely")
                .with_example("timeout_minutes: 15")
                .with_docs(DOCS_STRICT),
        );
    }

    if !options.dangerous_permissions_write {
        for (scope, level) in &data.permissions {
            if *level == PermissionLevel::Write {
                diags.push(
                    Diagnostic::error(
                        "strict-mode",
                        format!("strict mode forbids `write` permission on `{scope}`"),
                    )
                    .with_field(format!("permissions.{scope}"))
                    .with_rationale(
                        "side effects belong in safe-output handler jobs, which run with \
                         their own scoped token",
                    )
                    .with_example(format!(
                        "permissions:\n  {scope}: read\nsafe-outputs:\n  create-issue:"
                    ))
                    .with_docs(DOCS_STRICT),
                );
            }
        }
    }

    if data.network.is_none() {
        diags.push(
            Diagnostic::error("strict-mode", "strict mode requires an explicit `network` block")
                .with_field("network")
                .with_rationale(
                    "an explicit egress policy is the only way to audit what the agent may reach",
                )
                .with_example("network:\n  ecosystems: [github]")
                .with_docs(DOCS_STRICT),
        );
    }
}

fn check_containers(data: &WorkflowData, options: &CompileOptions, diags: &mut Vec<Diagnostic>) {
    let images: Vec<(&str, &str)> = data
        .tools
        .iter()
        .filter_map(|(name, tool)| match tool {
            ToolConfig::Mcp(mcp) => match &mcp.launch {
                McpLaunch::Stdio {
                    container: Some(image),
                    ..
                } => Some((name.as_str(), image.as_str())),
                _ => None,
            },
            _ => None,
        })
        .collect();
    if images.is_empty() {
        return;
    }

    if which::which("docker").is_err() {
        warn!("docker not found; container image validation skipped");
        return;
    }

    for (tool, image) in images {
        debug!(tool, image, "probing container image");
        let probe = run_with_timeout(
            "docker",
            &["manifest", "inspect", image],
            Path::new("."),
            Some(options.probe_timeout),
        );
        match probe {
            Ok(output) if output.success() => {}
            Ok(output) => diags.push(
                Diagnostic::error(
                    "runtime",
                    format!("container image `{image}` for tool `{tool}` could not be resolved"),
                )
                .with_field(format!("tools.{tool}.container"))
                .with_rationale(if output.timed_out {
                    "the registry did not answer within the probe timeout".to_string()
                } else {
                    format!("docker manifest inspect failed: {}", output.stderr.trim())
                })
                .with_example(format!(
                    "tools:\n  {tool}:\n    container: ghcr.io/octo/{tool}-mcp:latest"
                ))
                .with_docs("https://flowlock.dev/reference/mcp/"),
            ),
            Err(e) => warn!(tool, image, error = %e, "container probe failed to run"),
        }
    }
}

/// Registry reachability probes for collected packages.
pub struct RegistryProbe {
    client: reqwest::blocking::Client,
    npm_base: String,
    pypi_base: String,
    timeout: Duration,
}

impl RegistryProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_bases("https://registry.npmjs.org", "https://pypi.org", timeout)
    }

    pub fn with_bases(npm_base: &str, pypi_base: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("flowlock/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            npm_base: npm_base.trim_end_matches('/').to_string(),
            pypi_base: pypi_base.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn check_packages(&self, data: &WorkflowData, diags: &mut Vec<Diagnostic>) {
        for (eco, packages) in &data.runtimes.packages {
            for package in packages {
                match self.package_exists(*eco, package) {
                    Ok(true) => {}
                    Ok(false) => diags.push(
                        Diagnostic::error(
                            "runtime",
                            format!(
                                "package `{package}` was not found in the {} registry",
                                eco.as_str()
                            ),
                        )
                        .with_rationale(
                            "the agent job would fail at runtime when the package runner \
                             cannot install it",
                        )
                        .with_example("tools:\n  tavily:\n    command: npx\n    args: [\"-y\", \"tavily-mcp\"]")
                        .with_docs("https://flowlock.dev/reference/runtimes/"),
                    ),
                    Err(e) => {
                        // Network flakiness never fails a compile.
                        warn!(package, error = %e, "package probe inconclusive");
                    }
                }
            }
        }
    }

    fn package_exists(&self, eco: RuntimeEcosystem, package: &str) -> Result<bool> {
        let url = match eco {
            RuntimeEcosystem::Node => format!("{}/{}", self.npm_base, package),
            RuntimeEcosystem::Python | RuntimeEcosystem::Uv => {
                format!("{}/pypi/{}/json", self.pypi_base, package)
            }
        };
        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .context("registry request failed")?;
        match resp.status() {
            reqwest::StatusCode::OK => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => anyhow::bail!("unexpected status {status} from {url}"),
        }
    }
}

/// Post-emission audit: every line of the lock file must stay within the
/// platform's per-expression limit.
pub fn audit_expression_sizes(yaml_text: &str) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for (idx, line) in yaml_text.lines().enumerate() {
        if line.len() > MAX_EXPRESSION_BYTES {
            let field = line
                .trim_start()
                .split(':')
                .next()
                .filter(|f| !f.trim().is_empty() && !f.contains(' '))
                .map(str::to_string);
            let mut diag = Diagnostic::error(
                "expression-size",
                format!(
                    "line {} is too large ({} bytes; the platform limit is {} bytes)",
                    idx + 1,
                    line.len(),
                    MAX_EXPRESSION_BYTES
                ),
            )
            .with_rationale(
                "the platform rejects expression values over the limit at runtime, so the \
                 compiled workflow would never start",
            )
            .with_example(
                "Break the content into smaller chunks, store large data in files, or \
                 publish it as an artifact instead of an environment value.",
            )
            .with_docs("https://flowlock.dev/reference/limits/");
            if let Some(field) = field {
                diag = diag.with_field(field);
            }
            diags.push(diag);
        }
    }
    diags
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowlock_types::{CacheMemoryEntry, EngineConfig, EngineKind, TriggerSet};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn minimal_data() -> WorkflowData {
        WorkflowData {
            name: "Test".to_string(),
            description: None,
            source_path: PathBuf::from(".github/workflows/test.md"),
            on: TriggerSet::default(),
            permissions: BTreeMap::new(),
            engine: EngineConfig::new(EngineKind::Copilot),
            tools: BTreeMap::new(),
            safe_outputs: Default::default(),
            network: None,
            runtimes: Default::default(),
            caches: Vec::new(),
            secrets_referenced: Default::default(),
            custom_steps: Vec::new(),
            prompt: String::new(),
            prompt_chunks: Vec::new(),
            imports: Default::default(),
            timeout_minutes: None,
            strict: false,
            if_condition: None,
            roles: Vec::new(),
            env: BTreeMap::new(),
            concurrency_group: None,
        }
    }

    #[test]
    fn duplicate_cache_id_is_rejected() {
        let mut data = minimal_data();
        data.caches = vec![
            CacheMemoryEntry { id: "x".into(), key: None, retention_days: None },
            CacheMemoryEntry { id: "x".into(), key: None, retention_days: None },
        ];
        let mut diags = Vec::new();
        validate(&data, &CompileOptions::default(), &mut diags);
        assert!(diags.iter().any(|d| d.message.contains("duplicate cache-memory id `x`")));
    }

    #[test]
    fn secret_name_pattern() {
        assert!(is_valid_secret_name("API_KEY"));
        assert!(is_valid_secret_name("A1_B2"));
        assert!(!is_valid_secret_name("api_key"));
        assert!(!is_valid_secret_name("1KEY"));
        assert!(!is_valid_secret_name(""));
        assert!(!is_valid_secret_name("MY-KEY"));
    }

    #[test]
    fn invalid_secret_reference_is_reported() {
        let mut data = minimal_data();
        data.secrets_referenced.insert("lower_case".to_string());
        let mut diags = Vec::new();
        validate(&data, &CompileOptions::default(), &mut diags);
        assert!(diags.iter().any(|d| d.message.contains("lower_case")));
    }

    #[test]
    fn strict_mode_requires_timeout_network_and_read_permissions() {
        let mut data = minimal_data();
        data.strict = true;
        data.permissions
            .insert("issues".to_string(), PermissionLevel::Write);
        let mut diags = Vec::new();
        validate(&data, &CompileOptions::default(), &mut diags);

        assert!(diags.iter().any(|d| d.message.contains("timeout_minutes")));
        assert!(diags.iter().any(|d| d.message.contains("forbids `write`")));
        assert!(diags.iter().any(|d| d.message.contains("`network` block")));
    }

    #[test]
    fn strict_mode_write_allowed_with_feature_flag() {
        let mut data = minimal_data();
        data.strict = true;
        data.timeout_minutes = Some(10);
        data.network = Some(Default::default());
        data.permissions
            .insert("issues".to_string(), PermissionLevel::Write);
        let options = CompileOptions {
            dangerous_permissions_write: true,
            ..CompileOptions::default()
        };
        let mut diags = Vec::new();
        validate(&data, &options, &mut diags);
        assert!(diags.is_empty(), "unexpected: {diags:?}");
    }

    #[test]
    fn oversize_lines_are_flagged_with_position() {
        let long = "x".repeat(MAX_EXPRESSION_BYTES + 1);
        let text = format!("ok: yes\n{long}\n");
        let diags = audit_expression_sizes(&text);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("line 2"));
        assert_eq!(diags[0].category, "expression-size");
        assert!(diags[0].render().starts_with("📝"));
    }

    #[test]
    fn lines_at_limit_pass() {
        let text = "y".repeat(MAX_EXPRESSION_BYTES);
        assert!(audit_expression_sizes(&text).is_empty());
    }
}
