//! Builds the typed [`WorkflowData`] model from schema-validated preamble
//! trees, merging the import closure along the way.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde_json::Value as JsonValue;
use tracing::debug;

use flowlock_duration::parse_stop_after;
use flowlock_prompt::{chunk_prompt, strip_xml_comments, substitute_expressions};
use flowlock_types::{
    CacheMemoryEntry, CommandTrigger, DEFAULT_TOOLSET_EXPANSION, DEPRECATED_TRIGGERS, Diagnostic,
    EngineConfig, EngineKind, GITHUB_TOOLSETS, GithubToolConfig, GithubToolMode, IfNoChanges,
    McpLaunch, McpServerConfig, NetworkPermissions, PERMISSION_SCOPES, PermissionLevel,
    PlaywrightToolConfig, ResolvedImports, RuntimeEcosystem, RuntimeRequirements, SafeOutputConfig,
    SafeOutputKind, SafeOutputsConfig, SerenaToolConfig, TargetSelector, ToolConfig, ToolPattern,
    TriggerSet, WorkflowData,
};

use crate::loader::SourceTree;

/// Merge the root preamble with every import, later writers winning scalars
/// and sequences appending. Returns the merged preamble and prompt body.
pub fn merge_sources(tree: &SourceTree) -> (JsonValue, String) {
    let mut merged = tree.root.preamble.clone();
    let mut body = tree.root.body.clone();

    for import in &tree.imports {
        merge_value(&mut merged, &import.preamble);
        if !import.body.trim().is_empty() {
            if !body.ends_with('\n') {
                body.push('\n');
            }
            body.push('\n');
            body.push_str(&import.body);
        }
    }

    // Imports never re-trigger loading.
    if let Some(map) = merged.as_object_mut() {
        map.remove("imports");
    }
    (merged, body)
}

fn merge_value(base: &mut JsonValue, incoming: &JsonValue) {
    match (base, incoming) {
        (JsonValue::Object(base_map), JsonValue::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (JsonValue::Array(base_items), JsonValue::Array(incoming_items)) => {
            for item in incoming_items {
                if !base_items.contains(item) {
                    base_items.push(item.clone());
                }
            }
        }
        (base_slot, incoming_value) => {
            // Scalars and mismatched shapes: last writer wins.
            *base_slot = incoming_value.clone();
        }
    }
}

/// Build the workflow model. Returns `None` when a fatal conflict was
/// recorded in `diags`.
pub fn build(
    merged: &JsonValue,
    body: &str,
    tree: &SourceTree,
    diags: &mut Vec<Diagnostic>,
) -> Option<WorkflowData> {
    let root = merged.as_object()?;
    let source_path = PathBuf::from(&tree.root.rel);

    let name = root
        .get("name")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .or_else(|| h1_title(body))
        .unwrap_or_else(|| {
            source_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "workflow".to_string())
        });

    let on = build_triggers(root.get("on"), diags)?;
    let permissions = build_permissions(root.get("permissions"));
    let engine = build_engine(root.get("engine"));
    let (tools, caches) = build_tools(root.get("tools"), diags);
    let safe_outputs = build_safe_outputs(root.get("safe-outputs"), &on, diags);
    let network = build_network(root.get("network"));

    let mut custom_steps: Vec<JsonValue> = Vec::new();
    if let Some(steps) = root.get("steps").and_then(JsonValue::as_array) {
        custom_steps.extend(steps.iter().cloned());
    }
    custom_steps.extend(engine.steps.iter().cloned());

    let runtimes = build_runtimes(root.get("runtimes"), &tools, &custom_steps);
    let secrets_referenced = collect_secrets(merged);

    let mut context = BTreeMap::new();
    context.insert("workflow.name".to_string(), name.clone());
    context.insert("workflow.source".to_string(), tree.root.rel.clone());
    let prompt = substitute_expressions(&strip_xml_comments(body), &context);
    let prompt_chunks = chunk_prompt(&prompt);
    debug!(chunks = prompt_chunks.len(), bytes = prompt.len(), "assembled prompt");

    Some(WorkflowData {
        name,
        description: root
            .get("description")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        source_path,
        on,
        permissions,
        engine,
        tools,
        safe_outputs,
        network,
        runtimes,
        caches,
        secrets_referenced,
        custom_steps,
        prompt,
        prompt_chunks,
        imports: ResolvedImports {
            files: tree.file_list(),
            agent_file: tree.agent_file().map(str::to_string),
        },
        timeout_minutes: root
            .get("timeout_minutes")
            .and_then(JsonValue::as_u64)
            .map(|n| n as u32),
        strict: root
            .get("strict")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false),
        if_condition: root
            .get("if")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        roles: match root.get("roles") {
            Some(JsonValue::String(s)) => vec![s.clone()],
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        },
        env: scalar_map(root.get("env")),
        concurrency_group: match root.get("concurrency") {
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(JsonValue::Object(map)) => map
                .get("group")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            _ => None,
        },
    })
}

fn h1_title(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn build_triggers(value: Option<&JsonValue>, diags: &mut Vec<Diagnostic>) -> Option<TriggerSet> {
    let mut set = TriggerSet::default();
    match value {
        Some(JsonValue::String(name)) => {
            set.entries
                .insert(canonical_trigger(name), JsonValue::Null);
        }
        Some(JsonValue::Object(entries)) => {
            for (name, config) in entries {
                match name.as_str() {
                    "stop-after" => {
                        if let Some(raw) = config.as_str() {
                            // Already validated by the schema pass.
                            set.stop_after = parse_stop_after(raw).ok();
                        }
                    }
                    "command" | "alias" => {
                        set.command = match config {
                            JsonValue::String(cmd) => Some(CommandTrigger {
                                name: cmd.clone(),
                                events: Vec::new(),
                            }),
                            JsonValue::Object(map) => Some(CommandTrigger {
                                name: map
                                    .get("name")
                                    .and_then(JsonValue::as_str)
                                    .unwrap_or_default()
                                    .to_string(),
                                events: map
                                    .get("events")
                                    .and_then(JsonValue::as_array)
                                    .map(|items| {
                                        items
                                            .iter()
                                            .filter_map(|v| v.as_str().map(str::to_string))
                                            .collect()
                                    })
                                    .unwrap_or_default(),
                            }),
                            _ => None,
                        };
                    }
                    other => {
                        let mut config = config.clone();
                        if let Some(map) = config.as_object_mut() {
                            map.remove("stop-after");
                        }
                        if other == "cron" && config.is_string() {
                            // Deprecated shorthand for a single schedule entry.
                            config = serde_json::json!([{ "cron": config }]);
                        }
                        set.entries.insert(canonical_trigger(other), config);
                    }
                }
            }
        }
        _ => {
            diags.push(Diagnostic::error(
                "model",
                "cannot build a workflow without a trigger section",
            ));
            return None;
        }
    }

    // A command trigger listens on comment events under the hood.
    if set.command.is_some() && set.entries.is_empty() {
        set.entries
            .insert("issue_comment".to_string(), serde_json::json!({"types": ["created", "edited"]}));
    }
    Some(set)
}

fn canonical_trigger(name: &str) -> String {
    DEPRECATED_TRIGGERS
        .iter()
        .find(|(old, _)| *old == name)
        .map(|(_, new)| new.to_string())
        .unwrap_or_else(|| name.to_string())
}

fn build_permissions(value: Option<&JsonValue>) -> BTreeMap<String, PermissionLevel> {
    let mut out = BTreeMap::new();
    match value {
        Some(JsonValue::String(s)) => {
            let level = if s == "write-all" {
                PermissionLevel::Write
            } else {
                PermissionLevel::Read
            };
            for scope in PERMISSION_SCOPES {
                out.insert(scope.to_string(), level);
            }
        }
        Some(JsonValue::Object(map)) => {
            for (scope, level) in map {
                if let Some(level) = level.as_str().and_then(PermissionLevel::parse) {
                    out.insert(scope.clone(), level);
                }
            }
        }
        _ => {
            // Default posture: the agent can read the checkout, nothing more.
            out.insert("contents".to_string(), PermissionLevel::Read);
        }
    }
    out
}

fn build_engine(value: Option<&JsonValue>) -> EngineConfig {
    match value {
        Some(JsonValue::String(id)) => {
            EngineConfig::new(EngineKind::parse(id).unwrap_or(EngineKind::Copilot))
        }
        Some(JsonValue::Object(map)) => {
            let kind = map
                .get("id")
                .and_then(JsonValue::as_str)
                .and_then(EngineKind::parse)
                .unwrap_or(EngineKind::Copilot);
            let mut config = EngineConfig::new(kind);
            config.version = map
                .get("version")
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            config.model = map
                .get("model")
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            config.steps = map
                .get("steps")
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default();
            config.env = scalar_map(map.get("env"));
            config
        }
        _ => EngineConfig::new(EngineKind::Copilot),
    }
}

fn build_tools(
    value: Option<&JsonValue>,
    diags: &mut Vec<Diagnostic>,
) -> (BTreeMap<String, ToolConfig>, Vec<CacheMemoryEntry>) {
    let mut tools = BTreeMap::new();
    let mut caches = Vec::new();
    let Some(map) = value.and_then(JsonValue::as_object) else {
        return (tools, caches);
    };

    for (name, config) in map {
        let tool = match name.as_str() {
            "github" => ToolConfig::Github(build_github_tool(config)),
            "playwright" => ToolConfig::Playwright(build_playwright_tool(config)),
            "serena" => ToolConfig::Serena(SerenaToolConfig {
                languages: string_list(config.get("languages")),
                version: config
                    .get("version")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string),
            }),
            "bash" => ToolConfig::Bash {
                patterns: match config {
                    JsonValue::Array(items) => items
                        .iter()
                        .filter_map(JsonValue::as_str)
                        .map(ToolPattern::parse)
                        .collect(),
                    _ => Vec::new(),
                },
            },
            "edit" => ToolConfig::Edit,
            "web-fetch" => ToolConfig::WebFetch,
            "web-search" => ToolConfig::WebSearch,
            "cache-memory" => {
                let entries = build_cache_entries(config);
                caches.extend(entries.iter().cloned());
                ToolConfig::CacheMemory { entries }
            }
            _ => match build_mcp_tool(name, config, diags) {
                Some(mcp) => ToolConfig::Mcp(mcp),
                None => continue,
            },
        };
        tools.insert(name.clone(), tool);
    }
    (tools, caches)
}

fn build_github_tool(config: &JsonValue) -> GithubToolConfig {
    let map = config.as_object();
    let get = |key: &str| map.and_then(|m| m.get(key));

    let mut toolsets: Vec<String> = Vec::new();
    let push_unique = |list: &mut Vec<String>, entry: &str| {
        if !list.iter().any(|x| x == entry) {
            list.push(entry.to_string());
        }
    };
    for raw in string_list(get("toolsets")) {
        match raw.as_str() {
            "default" => {
                for t in DEFAULT_TOOLSET_EXPANSION {
                    push_unique(&mut toolsets, t);
                }
            }
            "all" => {
                for t in GITHUB_TOOLSETS {
                    push_unique(&mut toolsets, t);
                }
            }
            other => push_unique(&mut toolsets, other),
        }
    }

    // When both `toolsets` and an explicit `allowed` list are present the
    // capability set is their union: toolset expansion first, then explicit
    // entries not already granted. An `allowed` list never narrows a named
    // toolset.
    let allowed = string_list(get("allowed"));
    for entry in &allowed {
        push_unique(&mut toolsets, entry);
    }

    GithubToolConfig {
        mode: match get("mode").and_then(JsonValue::as_str) {
            Some("local") => GithubToolMode::Local,
            _ => GithubToolMode::Remote,
        },
        toolsets,
        allowed,
        read_only: get("read-only").and_then(JsonValue::as_bool).unwrap_or(false),
        version: get("version").and_then(JsonValue::as_str).map(str::to_string),
        github_token: get("github-token")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        headers: scalar_map(get("headers")),
    }
}

fn build_playwright_tool(config: &JsonValue) -> PlaywrightToolConfig {
    let mut domains = string_list(config.get("allowed_domains"));
    // Localhost access is always implied for local dev servers.
    for implicit in ["localhost", "127.0.0.1"] {
        if !domains.iter().any(|d| d == implicit) {
            domains.push(implicit.to_string());
        }
    }
    PlaywrightToolConfig {
        allowed_domains: domains,
        version: config
            .get("version")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
    }
}

fn build_cache_entries(config: &JsonValue) -> Vec<CacheMemoryEntry> {
    let entry_from = |v: &JsonValue| -> Option<CacheMemoryEntry> {
        match v {
            JsonValue::Object(map) => Some(CacheMemoryEntry {
                id: map.get("id").and_then(JsonValue::as_str)?.to_string(),
                key: map.get("key").and_then(JsonValue::as_str).map(str::to_string),
                retention_days: map
                    .get("retention-days")
                    .and_then(JsonValue::as_u64)
                    .map(|n| n as u32),
            }),
            _ => None,
        }
    };
    match config {
        JsonValue::Bool(true) | JsonValue::Null => vec![CacheMemoryEntry {
            id: "memory".to_string(),
            key: None,
            retention_days: None,
        }],
        JsonValue::Object(_) => entry_from(config).into_iter().collect(),
        JsonValue::Array(items) => items.iter().filter_map(entry_from).collect(),
        _ => Vec::new(),
    }
}

fn build_mcp_tool(
    name: &str,
    config: &JsonValue,
    diags: &mut Vec<Diagnostic>,
) -> Option<McpServerConfig> {
    let map = config.as_object()?;
    let allowed = string_list(map.get("allowed"));

    if let Some(url) = map.get("url").and_then(JsonValue::as_str) {
        return Some(McpServerConfig {
            launch: McpLaunch::Http {
                url: url.to_string(),
                headers: scalar_map(map.get("headers")),
            },
            allowed,
        });
    }

    let command = map.get("command").and_then(JsonValue::as_str);
    let container = map.get("container").and_then(JsonValue::as_str);
    if command.is_none() && container.is_none() {
        // The schema already produced the rich diagnostic; record the
        // conflict and skip the tool so later phases see a coherent model.
        diags.push(Diagnostic::error(
            "model",
            format!("tool `{name}` has no usable launch method and was skipped"),
        ));
        return None;
    }
    Some(McpServerConfig {
        launch: McpLaunch::Stdio {
            command: command.map(str::to_string),
            args: string_list(map.get("args")),
            container: container.map(str::to_string),
            env: scalar_map(map.get("env")),
        },
        allowed,
    })
}

fn build_safe_outputs(
    value: Option<&JsonValue>,
    on: &TriggerSet,
    diags: &mut Vec<Diagnostic>,
) -> SafeOutputsConfig {
    let mut config = SafeOutputsConfig::default();
    let Some(map) = value.and_then(JsonValue::as_object) else {
        return config;
    };

    config.staged = map
        .get("staged")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    config.threat_detection = map
        .get("threat-detection")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    config.github_token = map
        .get("github-token")
        .and_then(JsonValue::as_str)
        .map(str::to_string);

    for (key, entry) in map {
        let Some(kind) = SafeOutputKind::parse(key) else {
            continue;
        };
        let entry_map = entry.as_object();
        let get = |k: &str| entry_map.and_then(|m| m.get(k));

        let target = get("target").and_then(TargetSelector::parse);
        if matches!(target, Some(TargetSelector::Triggering)) && !on.provides_entity_context() {
            diags.push(
                Diagnostic::error(
                    "model",
                    format!(
                        "`safe-outputs.{}` targets the triggering entity, but no trigger \
                         provides one",
                        kind.as_str()
                    ),
                )
                .with_field(format!("safe-outputs.{}.target", kind.as_str()))
                .with_rationale(
                    "`target: triggering` only works when the workflow is started by an \
                     issue or pull-request event",
                )
                .with_example("on:\n  issues:\n    types: [opened]")
                .with_docs("https://flowlock.dev/reference/safe-outputs/"),
            );
        }

        config.entries.insert(
            kind,
            SafeOutputConfig {
                max: get("max").and_then(JsonValue::as_u64).map(|n| n as u32),
                labels: string_list(get("labels")),
                title_prefix: get("title-prefix")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string),
                target,
                if_no_changes: get("if-no-changes").and_then(JsonValue::as_str).map(|s| match s {
                    "error" => IfNoChanges::Error,
                    "ignore" => IfNoChanges::Ignore,
                    _ => IfNoChanges::Warn,
                }),
                body_operation: get("body-operation").and_then(JsonValue::as_str).map(|s| {
                    match s {
                        "prepend" => flowlock_types::BodyOperation::Prepend,
                        "replace" => flowlock_types::BodyOperation::Replace,
                        _ => flowlock_types::BodyOperation::Append,
                    }
                }),
                github_token: get("github-token")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string),
                branch_prefix: get("branch-prefix")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string),
                allowed_workflows: string_list(get("allowed-workflows")),
            },
        );
    }
    config
}

fn build_network(value: Option<&JsonValue>) -> Option<NetworkPermissions> {
    let value = value?;
    if value.as_str() == Some("defaults") {
        return Some(NetworkPermissions::default());
    }
    let map = value.as_object()?;
    Some(NetworkPermissions {
        allowed: string_list(map.get("allowed")),
        ecosystems: string_list(map.get("ecosystems")),
        firewall_log_level: map
            .get("firewall")
            .and_then(JsonValue::as_object)
            .and_then(|m| m.get("log-level"))
            .and_then(JsonValue::as_str)
            .and_then(flowlock_types::FirewallLogLevel::parse),
    })
}

fn build_runtimes(
    value: Option<&JsonValue>,
    tools: &BTreeMap<String, ToolConfig>,
    custom_steps: &[JsonValue],
) -> RuntimeRequirements {
    let mut runtimes = RuntimeRequirements::default();
    if let Some(map) = value.and_then(JsonValue::as_object) {
        for (id, config) in map {
            let Some(eco) = RuntimeEcosystem::parse(id) else {
                continue;
            };
            let version = match config {
                JsonValue::String(v) => Some(v.clone()),
                JsonValue::Object(m) => m
                    .get("version")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string),
                _ => None,
            };
            if let Some(version) = version {
                runtimes.versions.insert(eco, version);
            }
        }
    }

    // Packages launched through runtime package runners.
    for tool in tools.values() {
        if let ToolConfig::Mcp(mcp) = tool
            && let McpLaunch::Stdio {
                command: Some(command),
                args,
                ..
            } = &mcp.launch
        {
            collect_runner_package(command, args, &mut runtimes);
        }
    }
    for step in custom_steps {
        if let Some(run) = step.get("run").and_then(JsonValue::as_str) {
            for line in run.lines() {
                let words: Vec<&str> = line.split_whitespace().collect();
                collect_invocation(&words, &mut runtimes);
            }
        }
    }
    runtimes
}

fn collect_runner_package(command: &str, args: &[String], runtimes: &mut RuntimeRequirements) {
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let mut words = vec![command];
    words.extend(arg_refs);
    collect_invocation(&words, runtimes);
}

/// Recognize `npx <pkg>`, `uvx <pkg>`, `pip install <pkg>`, and
/// `npm install -g <pkg>` invocation shapes.
fn collect_invocation(words: &[&str], runtimes: &mut RuntimeRequirements) {
    let package_of = |rest: &[&str]| -> Option<String> {
        rest.iter()
            .find(|w| !w.starts_with('-'))
            .map(|w| w.to_string())
    };
    match words {
        ["npx", rest @ ..] => {
            if let Some(pkg) = package_of(rest) {
                runtimes
                    .packages
                    .entry(RuntimeEcosystem::Node)
                    .or_default()
                    .insert(strip_version_spec(&pkg));
            }
        }
        ["npm", "install", rest @ ..] | ["npm", "i", rest @ ..] => {
            if let Some(pkg) = package_of(rest) {
                runtimes
                    .packages
                    .entry(RuntimeEcosystem::Node)
                    .or_default()
                    .insert(strip_version_spec(&pkg));
            }
        }
        ["uvx", rest @ ..] => {
            if let Some(pkg) = package_of(rest) {
                runtimes
                    .packages
                    .entry(RuntimeEcosystem::Uv)
                    .or_default()
                    .insert(strip_version_spec(&pkg));
            }
        }
        ["pip", "install", rest @ ..] | ["pip3", "install", rest @ ..] => {
            if let Some(pkg) = package_of(rest) {
                runtimes
                    .packages
                    .entry(RuntimeEcosystem::Python)
                    .or_default()
                    .insert(strip_version_spec(&pkg));
            }
        }
        _ => {}
    }
}

/// `pkg@1.2.3` → `pkg`, `pkg==1.2` → `pkg`. Scoped npm packages keep their
/// leading `@`.
fn strip_version_spec(pkg: &str) -> String {
    if let Some(rest) = pkg.strip_prefix('@') {
        match rest.find('@') {
            Some(idx) => format!("@{}", &rest[..idx]),
            None => pkg.to_string(),
        }
    } else {
        let end = pkg
            .find(['@', '='])
            .unwrap_or(pkg.len());
        pkg[..end].to_string()
    }
}

/// Walk every string in the tree for `${{ secrets.NAME }}` references.
fn collect_secrets(value: &JsonValue) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_secrets_into(value, &mut out);
    out
}

fn collect_secrets_into(value: &JsonValue, out: &mut BTreeSet<String>) {
    match value {
        JsonValue::String(s) => {
            let mut rest = s.as_str();
            while let Some(start) = rest.find("${{") {
                let inner = &rest[start + 3..];
                let Some(end) = inner.find("}}") else { break };
                let expr = inner[..end].trim();
                if let Some(name) = expr.strip_prefix("secrets.") {
                    out.insert(name.trim().to_string());
                }
                rest = &inner[end + 2..];
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                collect_secrets_into(item, out);
            }
        }
        JsonValue::Object(map) => {
            for entry in map.values() {
                collect_secrets_into(entry, out);
            }
        }
        _ => {}
    }
}

fn string_list(value: Option<&JsonValue>) -> Vec<String> {
    value
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_map(value: Option<&JsonValue>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(map) = value.and_then(JsonValue::as_object) {
        for (key, entry) in map {
            let rendered = match entry {
                JsonValue::String(s) => s.clone(),
                JsonValue::Bool(b) => b.to_string(),
                JsonValue::Number(n) => n.to_string(),
                _ => continue,
            };
            out.insert(key.clone(), rendered);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoadedSource;
    use serde_json::json;

    fn tree_from(preamble: JsonValue, body: &str) -> SourceTree {
        SourceTree {
            root: LoadedSource {
                rel: ".github/workflows/test.md".to_string(),
                preamble,
                body: body.to_string(),
                is_agent: false,
            },
            imports: Vec::new(),
        }
    }

    fn build_ok(preamble: JsonValue, body: &str) -> WorkflowData {
        let tree = tree_from(preamble, body);
        let (merged, body) = merge_sources(&tree);
        let mut diags = Vec::new();
        let data = build(&merged, &body, &tree, &mut diags).expect("model builds");
        assert!(
            !diags.iter().any(|d| d.severity == flowlock_types::Severity::Error),
            "unexpected errors: {diags:?}"
        );
        data
    }

    #[test]
    fn name_falls_back_to_h1_then_stem() {
        let named = build_ok(json!({"on": "push", "name": "Explicit"}), "# Heading\n");
        assert_eq!(named.name, "Explicit");

        let h1 = build_ok(json!({"on": "push"}), "# From Heading\nBody\n");
        assert_eq!(h1.name, "From Heading");

        let stem = build_ok(json!({"on": "push"}), "no heading\n");
        assert_eq!(stem.name, "test");
    }

    #[test]
    fn merge_prefers_later_scalars_and_appends_sequences() {
        let mut tree = tree_from(
            json!({"on": "push", "strict": false, "roles": ["admin"]}),
            "Host body\n",
        );
        tree.imports.push(LoadedSource {
            rel: "shared/extra.md".to_string(),
            preamble: json!({"strict": true, "roles": ["maintainer"]}),
            body: "Imported body\n".to_string(),
            is_agent: false,
        });
        let (merged, body) = merge_sources(&tree);
        assert_eq!(merged["strict"], true);
        assert_eq!(merged["roles"], json!(["admin", "maintainer"]));
        assert!(body.contains("Host body"));
        assert!(body.ends_with("Imported body\n"));
    }

    #[test]
    fn github_default_toolset_expands() {
        let data = build_ok(
            json!({"on": "push", "tools": {"github": {"toolsets": ["default"]}}}),
            "",
        );
        let ToolConfig::Github(github) = &data.tools["github"] else {
            panic!("expected github tool");
        };
        assert_eq!(
            github.toolsets,
            vec!["context", "repos", "issues", "pull_requests", "users"]
        );
    }

    #[test]
    fn github_toolsets_union_with_allowed() {
        let data = build_ok(
            json!({"on": "push", "tools": {"github": {
                "toolsets": ["issues"],
                "allowed": ["create_gist", "issues"]
            }}}),
            "",
        );
        let ToolConfig::Github(github) = &data.tools["github"] else {
            panic!("expected github tool");
        };
        // Union semantics: the toolset expansion comes first, then explicit
        // entries not already granted. `allowed` never narrows a toolset.
        assert_eq!(github.toolsets, vec!["issues", "create_gist"]);
        assert_eq!(github.allowed, vec!["create_gist", "issues"]);
    }

    #[test]
    fn playwright_localhost_is_implicit() {
        let data = build_ok(
            json!({"on": "push", "tools": {"playwright": {"allowed_domains": ["github.com"]}}}),
            "",
        );
        let ToolConfig::Playwright(pw) = &data.tools["playwright"] else {
            panic!("expected playwright tool");
        };
        assert!(pw.allowed_domains.contains(&"localhost".to_string()));
        assert!(pw.allowed_domains.contains(&"127.0.0.1".to_string()));
        assert!(pw.allowed_domains.contains(&"github.com".to_string()));
    }

    #[test]
    fn collects_packages_from_mcp_and_steps() {
        let data = build_ok(
            json!({
                "on": "push",
                "tools": {"tavily": {"command": "npx", "args": ["-y", "tavily-mcp@1.2"]}},
                "steps": [{"run": "pip install requests\nuvx ruff check ."}]
            }),
            "",
        );
        let node = &data.runtimes.packages[&RuntimeEcosystem::Node];
        assert!(node.contains("tavily-mcp"));
        let python = &data.runtimes.packages[&RuntimeEcosystem::Python];
        assert!(python.contains("requests"));
        let uv = &data.runtimes.packages[&RuntimeEcosystem::Uv];
        assert!(uv.contains("ruff"));
    }

    #[test]
    fn collects_secret_references() {
        let data = build_ok(
            json!({
                "on": "push",
                "tools": {"slack": {
                    "command": "npx",
                    "args": ["slack-mcp"],
                    "env": {"SLACK_TOKEN": "${{ secrets.SLACK_BOT_TOKEN }}"}
                }},
                "github-token": "${{ secrets.CUSTOM_PAT }}"
            }),
            "",
        );
        assert!(data.secrets_referenced.contains("SLACK_BOT_TOKEN"));
        assert!(data.secrets_referenced.contains("CUSTOM_PAT"));
    }

    #[test]
    fn triggering_target_requires_entity_event() {
        let tree = tree_from(
            json!({"on": "push", "safe-outputs": {"add-comment": {"target": "triggering"}}}),
            "",
        );
        let (merged, body) = merge_sources(&tree);
        let mut diags = Vec::new();
        build(&merged, &body, &tree, &mut diags);
        assert!(diags
            .iter()
            .any(|d| d.message.contains("targets the triggering entity")));
    }

    #[test]
    fn prompt_is_stripped_and_chunked() {
        let data = build_ok(
            json!({"on": "push"}),
            "# Title\n<!-- note to authors -->\nDo the thing.\n",
        );
        assert!(!data.prompt.contains("note to authors"));
        assert_eq!(data.prompt_chunks.len(), 1);
        assert_eq!(data.prompt_chunks.concat(), data.prompt);
    }

    #[test]
    fn command_trigger_implies_comment_events() {
        let data = build_ok(json!({"on": {"command": {"name": "triage"}}}), "");
        assert_eq!(data.on.command.as_ref().unwrap().name, "triage");
        assert!(data.on.entries.contains_key("issue_comment"));
        assert!(data.needs_task_gate());
    }

    #[test]
    fn stop_after_is_parsed_into_trigger_set() {
        let data = build_ok(
            json!({"on": {"schedule": [{"cron": "0 9 * * 1"}], "stop-after": "+2w"}}),
            "",
        );
        assert!(data.on.stop_after.is_some());
    }
}
