//! Table-driven validation of the merged preamble.
//!
//! Each recognized root field has a checker that appends diagnostics rather
//! than short-circuiting, so an author sees every problem in one pass.
//! Diagnostics name the offending field and value, explain why the rule
//! exists, and show a corrected example.

use flowlock_duration::parse_stop_after;
use flowlock_types::{
    BUILTIN_TOOLS, DEPRECATED_TRIGGERS, Diagnostic, EngineKind, FirewallLogLevel,
    GITHUB_TOOLSETS, NETWORK_ECOSYSTEMS, PERMISSION_SCOPES, PermissionLevel, RuntimeEcosystem,
    SERENA_LANGUAGES, SafeOutputKind, TRIGGER_KINDS, TargetSelector,
};
use serde_json::Value as JsonValue;

const DOCS_BASE: &str = "https://flowlock.dev/reference";

fn docs(topic: &str) -> String {
    format!("{DOCS_BASE}/{topic}/")
}

/// Validate a merged preamble. Errors and warnings accumulate in `diags`.
pub fn validate(preamble: &JsonValue, diags: &mut Vec<Diagnostic>) {
    let Some(root) = preamble.as_object() else {
        diags.push(
            Diagnostic::error("schema", "the frontmatter must be a mapping of fields")
                .with_example("on: workflow_dispatch\nengine: copilot")
                .with_docs(docs("frontmatter")),
        );
        return;
    };

    type Check = fn(&JsonValue, &mut Vec<Diagnostic>);
    const ROOT_RULES: &[(&str, Check)] = &[
        ("name", check_name),
        ("description", check_description),
        ("on", check_on),
        ("permissions", check_permissions),
        ("engine", check_engine),
        ("tools", check_tools),
        ("safe-outputs", check_safe_outputs),
        ("network", check_network),
        ("runtimes", check_runtimes),
        ("imports", check_imports),
        ("steps", check_steps),
        ("timeout_minutes", check_timeout_minutes),
        ("strict", check_strict),
        ("if", check_if),
        ("roles", check_roles),
        ("env", check_env),
        ("concurrency", check_concurrency),
        ("run-name", check_run_name),
        ("github-token", check_github_token),
    ];

    for (key, value) in root {
        match ROOT_RULES.iter().find(|(name, _)| name == key) {
            Some((_, check)) => check(value, diags),
            None => diags.push(
                Diagnostic::warning("schema", format!("unknown field `{key}` is ignored"))
                    .with_field(key.clone())
                    .with_rationale(
                        "unrecognized fields usually indicate a typo and never affect the \
                         compiled workflow",
                    )
                    .with_docs(docs("frontmatter")),
            ),
        }
    }

    if !root.contains_key("on") {
        diags.push(
            Diagnostic::error("schema", "the `on:` trigger section is required")
                .with_field("on")
                .with_rationale("without a trigger the generated workflow would never run")
                .with_example("on: workflow_dispatch")
                .with_docs(docs("triggers")),
        );
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "sequence",
        JsonValue::Object(_) => "mapping",
    }
}

fn check_name(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => {}
        _ => diags.push(
            Diagnostic::error("schema", "`name` must be a non-empty string")
                .with_field("name")
                .with_example("name: Nightly Triage")
                .with_docs(docs("frontmatter")),
        ),
    }
}

fn check_description(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    if !value.is_string() {
        diags.push(
            Diagnostic::error("schema", "`description` must be a string")
                .with_field("description"),
        );
    }
}

fn check_on(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    match value {
        JsonValue::String(name) => check_trigger_name(name, diags),
        JsonValue::Object(entries) => {
            for (name, config) in entries {
                match name.as_str() {
                    "stop-after" => check_stop_after(config, diags),
                    "command" => check_command_trigger(config, diags),
                    other => {
                        check_trigger_name(other, diags);
                        if let Some(deadline) = config.get("stop-after") {
                            // Tolerated nested spelling.
                            check_stop_after(deadline, diags);
                        }
                    }
                }
            }
        }
        other => diags.push(
            Diagnostic::error(
                "schema",
                format!("`on` must be a trigger name or mapping, got {}", type_name(other)),
            )
            .with_field("on")
            .with_example("on:\n  issues:\n    types: [opened]")
            .with_docs(docs("triggers")),
        ),
    }
}

fn check_trigger_name(name: &str, diags: &mut Vec<Diagnostic>) {
    if TRIGGER_KINDS.contains(&name) {
        return;
    }
    if let Some((_, replacement)) = DEPRECATED_TRIGGERS.iter().find(|(old, _)| *old == name) {
        diags.push(
            Diagnostic::warning(
                "schema",
                format!("trigger `{name}` is deprecated; use `{replacement}` instead"),
            )
            .with_field(format!("on.{name}"))
            .with_rationale("the deprecated spelling still works but will be removed")
            .with_example(format!("on:\n  {replacement}:"))
            .with_docs(docs("triggers")),
        );
        return;
    }
    diags.push(
        Diagnostic::error("schema", format!("`{name}` is not a recognized trigger"))
            .with_field(format!("on.{name}"))
            .with_rationale("only events the CI platform can deliver may start a workflow")
            .with_example("on:\n  workflow_dispatch:")
            .with_docs(docs("triggers")),
    );
}

fn check_stop_after(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    let Some(raw) = value.as_str() else {
        diags.push(
            Diagnostic::error("schema", "`stop-after` must be a string")
                .with_field("on.stop-after")
                .with_example("on:\n  stop-after: +48h")
                .with_docs(docs("triggers")),
        );
        return;
    };
    if let Err(e) = parse_stop_after(raw) {
        diags.push(
            Diagnostic::error("schema", e.to_string())
                .with_field("on.stop-after")
                .with_rationale(
                    "stop-after bounds how long a recurring agentic workflow keeps running \
                     unattended",
                )
                .with_example("on:\n  stop-after: +2h")
                .with_docs(docs("triggers")),
        );
    }
}

fn check_command_trigger(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    match value {
        JsonValue::String(_) => {}
        JsonValue::Object(map) => {
            if !map.contains_key("name") {
                diags.push(
                    Diagnostic::error("schema", "`on.command` requires a `name`")
                        .with_field("on.command")
                        .with_example("on:\n  command:\n    name: triage")
                        .with_docs(docs("triggers")),
                );
            }
        }
        other => diags.push(
            Diagnostic::error(
                "schema",
                format!("`on.command` must be a name or mapping, got {}", type_name(other)),
            )
            .with_field("on.command"),
        ),
    }
}

fn check_permissions(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    match value {
        JsonValue::String(s) if s == "read-all" || s == "write-all" => {}
        JsonValue::Object(entries) => {
            for (scope, level) in entries {
                if !PERMISSION_SCOPES.contains(&scope.as_str()) {
                    diags.push(
                        Diagnostic::error(
                            "schema",
                            format!("`{scope}` is not a recognized permission scope"),
                        )
                        .with_field(format!("permissions.{scope}"))
                        .with_example("permissions:\n  contents: read\n  issues: write")
                        .with_docs(docs("permissions")),
                    );
                    continue;
                }
                let valid = level
                    .as_str()
                    .and_then(PermissionLevel::parse)
                    .is_some();
                if !valid {
                    diags.push(
                        Diagnostic::error(
                            "schema",
                            format!(
                                "permission level for `{scope}` must be `read`, `write`, or `none`"
                            ),
                        )
                        .with_field(format!("permissions.{scope}"))
                        .with_rationale(
                            "handler jobs receive least privilege; anything else is a typo",
                        )
                        .with_example(format!("permissions:\n  {scope}: read"))
                        .with_docs(docs("permissions")),
                    );
                }
            }
        }
        other => diags.push(
            Diagnostic::error(
                "schema",
                format!(
                    "`permissions` must be a scope mapping or `read-all`/`write-all`, got {}",
                    type_name(other)
                ),
            )
            .with_field("permissions")
            .with_example("permissions:\n  contents: read")
            .with_docs(docs("permissions")),
        ),
    }
}

fn check_engine(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    match value {
        JsonValue::String(id) => check_engine_id(id, diags),
        JsonValue::Object(map) => {
            match map.get("id").and_then(JsonValue::as_str) {
                Some(id) => check_engine_id(id, diags),
                None => diags.push(
                    Diagnostic::error("schema", "`engine` object form requires an `id`")
                        .with_field("engine.id")
                        .with_example("engine:\n  id: claude\n  model: claude-sonnet-4-5")
                        .with_docs(docs("engines")),
                ),
            }
            if map.get("id").and_then(JsonValue::as_str) == Some("custom")
                && !map.get("steps").is_some_and(JsonValue::is_array)
            {
                diags.push(
                    Diagnostic::error("schema", "the `custom` engine requires a `steps` sequence")
                        .with_field("engine.steps")
                        .with_rationale(
                            "a custom engine is exactly its steps; without them the agent job \
                             would be empty",
                        )
                        .with_example(
                            "engine:\n  id: custom\n  steps:\n    - run: ./scripts/agent.sh",
                        )
                        .with_docs(docs("engines")),
                );
            }
        }
        other => diags.push(
            Diagnostic::error(
                "schema",
                format!("`engine` must be a string or mapping, got {}", type_name(other)),
            )
            .with_field("engine")
            .with_example("engine: copilot")
            .with_docs(docs("engines")),
        ),
    }
}

fn check_engine_id(id: &str, diags: &mut Vec<Diagnostic>) {
    if EngineKind::parse(id).is_none() {
        diags.push(
            Diagnostic::error(
                "schema",
                format!(
                    "`{id}` is not a recognized engine; expected one of: {}",
                    EngineKind::all().join(", ")
                ),
            )
            .with_field("engine")
            .with_rationale("only supported engines can be provisioned in the agent job")
            .with_example("engine: copilot")
            .with_docs(docs("engines")),
        );
    }
}

fn check_tools(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    let Some(tools) = value.as_object() else {
        diags.push(
            Diagnostic::error("schema", "`tools` must be a mapping of tool names")
                .with_field("tools")
                .with_example("tools:\n  github:\n    toolsets: [default]")
                .with_docs(docs("tools")),
        );
        return;
    };
    for (name, config) in tools {
        match name.as_str() {
            "github" => check_github_tool(config, diags),
            "playwright" => check_playwright_tool(config, diags),
            "serena" => check_serena_tool(config, diags),
            "bash" => check_bash_tool(config, diags),
            "edit" | "web-fetch" | "web-search" => {
                if !matches!(config, JsonValue::Null | JsonValue::Bool(_)) {
                    diags.push(
                        Diagnostic::error(
                            "schema",
                            format!("`tools.{name}` takes no configuration"),
                        )
                        .with_field(format!("tools.{name}"))
                        .with_example(format!("tools:\n  {name}:"))
                        .with_docs(docs("tools")),
                    );
                }
            }
            "cache-memory" => check_cache_memory(config, diags),
            _ => check_mcp_tool(name, config, diags),
        }
    }
}

fn check_github_tool(config: &JsonValue, diags: &mut Vec<Diagnostic>) {
    let Some(map) = config.as_object() else {
        if !config.is_null() {
            diags.push(
                Diagnostic::error("schema", "`tools.github` must be a mapping")
                    .with_field("tools.github")
                    .with_example("tools:\n  github:\n    toolsets: [default]")
                    .with_docs(docs("tools")),
            );
        }
        return;
    };
    const KEYS: &[&str] = &[
        "mode",
        "toolsets",
        "allowed",
        "read-only",
        "version",
        "github-token",
        "headers",
    ];
    for key in map.keys() {
        if !KEYS.contains(&key.as_str()) {
            diags.push(
                Diagnostic::error("schema", format!("unknown key `{key}` in `tools.github`"))
                    .with_field(format!("tools.github.{key}"))
                    .with_docs(docs("tools")),
            );
        }
    }
    if let Some(mode) = map.get("mode")
        && !matches!(mode.as_str(), Some("remote") | Some("local"))
    {
        diags.push(
            Diagnostic::error("schema", "`tools.github.mode` must be `remote` or `local`")
                .with_field("tools.github.mode")
                .with_example("tools:\n  github:\n    mode: remote")
                .with_docs(docs("tools")),
        );
    }
    if let Some(toolsets) = map.get("toolsets") {
        match toolsets.as_array() {
            Some(list) => {
                for item in list {
                    let name = item.as_str().unwrap_or_default();
                    if name != "default" && name != "all" && !GITHUB_TOOLSETS.contains(&name) {
                        diags.push(
                            Diagnostic::error(
                                "schema",
                                format!("`{name}` is not a recognized GitHub toolset"),
                            )
                            .with_field("tools.github.toolsets")
                            .with_rationale(
                                "toolsets are stable bundles; individual tool names drift \
                                 between server versions",
                            )
                            .with_example("tools:\n  github:\n    toolsets: [default, actions]")
                            .with_docs(docs("tools")),
                        );
                    }
                }
            }
            None => diags.push(
                Diagnostic::error("schema", "`tools.github.toolsets` must be a sequence")
                    .with_field("tools.github.toolsets")
                    .with_example("tools:\n  github:\n    toolsets: [default]")
                    .with_docs(docs("tools")),
            ),
        }
    }
}

fn check_playwright_tool(config: &JsonValue, diags: &mut Vec<Diagnostic>) {
    if config.is_null() {
        return;
    }
    let Some(map) = config.as_object() else {
        diags.push(
            Diagnostic::error("schema", "`tools.playwright` must be a mapping")
                .with_field("tools.playwright"),
        );
        return;
    };
    if let Some(domains) = map.get("allowed_domains")
        && !domains.is_array()
    {
        diags.push(
            Diagnostic::error("schema", "`tools.playwright.allowed_domains` must be a sequence")
                .with_field("tools.playwright.allowed_domains")
                .with_example("tools:\n  playwright:\n    allowed_domains: [\"github.com\"]")
                .with_docs(docs("tools")),
        );
    }
}

fn check_serena_tool(config: &JsonValue, diags: &mut Vec<Diagnostic>) {
    if config.is_null() {
        return;
    }
    let Some(map) = config.as_object() else {
        diags.push(
            Diagnostic::error("schema", "`tools.serena` must be a mapping")
                .with_field("tools.serena"),
        );
        return;
    };
    if let Some(languages) = map.get("languages").and_then(JsonValue::as_array) {
        for lang in languages {
            let name = lang.as_str().unwrap_or_default();
            if !SERENA_LANGUAGES.contains(&name) {
                diags.push(
                    Diagnostic::error(
                        "schema",
                        format!("`{name}` is not a language Serena supports"),
                    )
                    .with_field("tools.serena.languages")
                    .with_example("tools:\n  serena:\n    languages: [rust, python]")
                    .with_docs(docs("tools")),
                );
            }
        }
    }
}

fn check_bash_tool(config: &JsonValue, diags: &mut Vec<Diagnostic>) {
    match config {
        JsonValue::Null | JsonValue::Bool(_) => {}
        JsonValue::Array(items) => {
            for item in items {
                if !item.is_string() {
                    diags.push(
                        Diagnostic::error("schema", "`tools.bash` patterns must be strings")
                            .with_field("tools.bash")
                            .with_example("tools:\n  bash: [\"git status\", \"make *\"]")
                            .with_docs(docs("tools")),
                    );
                }
            }
        }
        other => diags.push(
            Diagnostic::error(
                "schema",
                format!(
                    "`tools.bash` must be a boolean or a sequence of command patterns, got {}",
                    type_name(other)
                ),
            )
            .with_field("tools.bash")
            .with_example("tools:\n  bash: [\"git *\"]")
            .with_docs(docs("tools")),
        ),
    }
}

fn check_cache_memory(config: &JsonValue, diags: &mut Vec<Diagnostic>) {
    let check_entry = |entry: &JsonValue, diags: &mut Vec<Diagnostic>| {
        if let Some(map) = entry.as_object() {
            if !map.contains_key("id") {
                diags.push(
                    Diagnostic::error("schema", "each `cache-memory` entry requires an `id`")
                        .with_field("tools.cache-memory")
                        .with_example("tools:\n  cache-memory:\n    - id: notes")
                        .with_docs(docs("tools")),
                );
            }
        }
    };
    match config {
        JsonValue::Null | JsonValue::Bool(_) => {}
        JsonValue::Object(_) => check_entry(config, diags),
        JsonValue::Array(items) => {
            for item in items {
                check_entry(item, diags);
            }
        }
        other => diags.push(
            Diagnostic::error(
                "schema",
                format!("`tools.cache-memory` must be a mapping or sequence, got {}", type_name(other)),
            )
            .with_field("tools.cache-memory"),
        ),
    }
}

fn check_mcp_tool(name: &str, config: &JsonValue, diags: &mut Vec<Diagnostic>) {
    debug_assert!(!BUILTIN_TOOLS.contains(&name));
    let Some(map) = config.as_object() else {
        diags.push(
            Diagnostic::error(
                "schema",
                format!("`tools.{name}` must be an MCP server declaration"),
            )
            .with_field(format!("tools.{name}"))
            .with_example(format!(
                "tools:\n  {name}:\n    command: npx\n    args: [\"-y\", \"{name}-mcp\"]"
            ))
            .with_docs(docs("mcp")),
        );
        return;
    };
    let has_command = map.contains_key("command");
    let has_container = map.contains_key("container");
    let has_url = map.contains_key("url");
    if has_command && has_container {
        diags.push(
            Diagnostic::error(
                "schema",
                format!("`tools.{name}` declares both `command` and `container`"),
            )
            .with_field(format!("tools.{name}"))
            .with_rationale("a stdio MCP server launches either a host command or a container, never both")
            .with_example(format!("tools:\n  {name}:\n    container: ghcr.io/octo/{name}-mcp:latest"))
            .with_docs(docs("mcp")),
        );
    }
    if !has_command && !has_container && !has_url {
        diags.push(
            Diagnostic::error(
                "schema",
                format!(
                    "`tools.{name}` needs `command` or `container` (stdio) or `url` (http)"
                ),
            )
            .with_field(format!("tools.{name}"))
            .with_rationale("without a launch method the engine has no way to reach the server")
            .with_example(format!("tools:\n  {name}:\n    url: https://{name}.example.com/mcp"))
            .with_docs(docs("mcp")),
        );
    }
    if has_url && (has_command || has_container) {
        diags.push(
            Diagnostic::error(
                "schema",
                format!("`tools.{name}` mixes stdio and http launch methods"),
            )
            .with_field(format!("tools.{name}"))
            .with_docs(docs("mcp")),
        );
    }
}

fn check_safe_outputs(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    let Some(map) = value.as_object() else {
        diags.push(
            Diagnostic::error("schema", "`safe-outputs` must be a mapping of output kinds")
                .with_field("safe-outputs")
                .with_example("safe-outputs:\n  create-issue:\n    max: 1")
                .with_docs(docs("safe-outputs")),
        );
        return;
    };
    for (key, config) in map {
        match key.as_str() {
            "staged" | "threat-detection" => {
                if !matches!(config, JsonValue::Bool(_) | JsonValue::Null) {
                    diags.push(
                        Diagnostic::error("schema", format!("`safe-outputs.{key}` must be a boolean"))
                            .with_field(format!("safe-outputs.{key}")),
                    );
                }
            }
            "github-token" => {
                if !config.is_string() {
                    diags.push(
                        Diagnostic::error("schema", "`safe-outputs.github-token` must be a string")
                            .with_field("safe-outputs.github-token")
                            .with_example("safe-outputs:\n  github-token: \"${{ secrets.CUSTOM_PAT }}\"")
                            .with_docs(docs("safe-outputs")),
                    );
                }
            }
            kind_name => match SafeOutputKind::parse(kind_name) {
                Some(kind) => check_safe_output_config(kind, config, diags),
                None => diags.push(
                    Diagnostic::error(
                        "schema",
                        format!("`{kind_name}` is not a recognized safe-output kind"),
                    )
                    .with_field(format!("safe-outputs.{kind_name}"))
                    .with_rationale(
                        "safe outputs are a closed set so every side effect has a dedicated, \
                         least-privilege handler",
                    )
                    .with_example("safe-outputs:\n  create-issue:")
                    .with_docs(docs("safe-outputs")),
                ),
            },
        }
    }
}

fn check_safe_output_config(kind: SafeOutputKind, config: &JsonValue, diags: &mut Vec<Diagnostic>) {
    let field = format!("safe-outputs.{}", kind.as_str());
    let Some(map) = config.as_object() else {
        if !config.is_null() {
            diags.push(
                Diagnostic::error("schema", format!("`{field}` must be a mapping or empty"))
                    .with_field(field)
                    .with_example(format!("safe-outputs:\n  {}:\n    max: 1", kind.as_str()))
                    .with_docs(docs("safe-outputs")),
            );
        }
        return;
    };
    const KEYS: &[&str] = &[
        "max",
        "labels",
        "title-prefix",
        "target",
        "if-no-changes",
        "body-operation",
        "github-token",
        "branch-prefix",
        "allowed-workflows",
    ];
    for key in map.keys() {
        if !KEYS.contains(&key.as_str()) {
            diags.push(
                Diagnostic::error("schema", format!("unknown key `{key}` in `{field}`"))
                    .with_field(format!("{field}.{key}"))
                    .with_docs(docs("safe-outputs")),
            );
        }
    }
    if let Some(max) = map.get("max")
        && !max.as_u64().is_some_and(|n| n >= 1)
    {
        diags.push(
            Diagnostic::error("schema", format!("`{field}.max` must be a positive integer"))
                .with_field(format!("{field}.max"))
                .with_example(format!("safe-outputs:\n  {}:\n    max: 3", kind.as_str()))
                .with_docs(docs("safe-outputs")),
        );
    }
    if let Some(target) = map.get("target")
        && TargetSelector::parse(target).is_none()
    {
        diags.push(
            Diagnostic::error(
                "schema",
                format!("`{field}.target` must be `triggering`, `*`, or an entity number"),
            )
            .with_field(format!("{field}.target"))
            .with_rationale(
                "the handler needs to know which issue or pull request each output item \
                 applies to",
            )
            .with_example(format!("safe-outputs:\n  {}:\n    target: triggering", kind.as_str()))
            .with_docs(docs("safe-outputs")),
        );
    }
    if let Some(policy) = map.get("if-no-changes")
        && !matches!(policy.as_str(), Some("warn") | Some("error") | Some("ignore"))
    {
        diags.push(
            Diagnostic::error(
                "schema",
                format!("`{field}.if-no-changes` must be `warn`, `error`, or `ignore`"),
            )
            .with_field(format!("{field}.if-no-changes"))
            .with_example(format!(
                "safe-outputs:\n  {}:\n    if-no-changes: ignore",
                kind.as_str()
            ))
            .with_docs(docs("safe-outputs")),
        );
    }
    if let Some(op) = map.get("body-operation")
        && !matches!(op.as_str(), Some("append") | Some("prepend") | Some("replace"))
    {
        diags.push(
            Diagnostic::error(
                "schema",
                format!("`{field}.body-operation` must be `append`, `prepend`, or `replace`"),
            )
            .with_field(format!("{field}.body-operation")),
        );
    }
}

fn check_network(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    let Some(map) = value.as_object() else {
        if value.as_str() == Some("defaults") {
            return;
        }
        diags.push(
            Diagnostic::error("schema", "`network` must be a mapping or `defaults`")
                .with_field("network")
                .with_example("network:\n  allowed: [\"api.example.com\"]")
                .with_docs(docs("network")),
        );
        return;
    };
    for (key, entry) in map {
        match key.as_str() {
            "allowed" => {
                if !entry.is_array() {
                    diags.push(
                        Diagnostic::error("schema", "`network.allowed` must be a sequence of domains")
                            .with_field("network.allowed")
                            .with_example("network:\n  allowed: [\"api.example.com\"]")
                            .with_docs(docs("network")),
                    );
                }
            }
            "ecosystems" => {
                for item in entry.as_array().map(Vec::as_slice).unwrap_or_default() {
                    let name = item.as_str().unwrap_or_default();
                    if !NETWORK_ECOSYSTEMS.contains(&name) {
                        diags.push(
                            Diagnostic::error(
                                "schema",
                                format!("`{name}` is not a recognized network ecosystem"),
                            )
                            .with_field("network.ecosystems")
                            .with_example("network:\n  ecosystems: [node, github]")
                            .with_docs(docs("network")),
                        );
                    }
                }
            }
            "firewall" => check_firewall(entry, diags),
            other => diags.push(
                Diagnostic::error("schema", format!("unknown key `{other}` in `network`"))
                    .with_field(format!("network.{other}"))
                    .with_docs(docs("network")),
            ),
        }
    }
}

fn check_firewall(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    match value {
        JsonValue::Bool(_) | JsonValue::Null => {}
        JsonValue::Object(map) => {
            if let Some(level) = map.get("log-level") {
                let valid = level
                    .as_str()
                    .and_then(FirewallLogLevel::parse)
                    .is_some();
                if !valid {
                    diags.push(
                        Diagnostic::error(
                            "schema",
                            "`network.firewall.log-level` must be `off`, `info`, or `debug`",
                        )
                        .with_field("network.firewall.log-level")
                        .with_example("network:\n  firewall:\n    log-level: info")
                        .with_docs(docs("network")),
                    );
                }
            }
        }
        other => diags.push(
            Diagnostic::error(
                "schema",
                format!("`network.firewall` must be a boolean or mapping, got {}", type_name(other)),
            )
            .with_field("network.firewall"),
        ),
    }
}

fn check_runtimes(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    let Some(map) = value.as_object() else {
        diags.push(
            Diagnostic::error("schema", "`runtimes` must be a mapping of runtime ids")
                .with_field("runtimes")
                .with_example("runtimes:\n  node:\n    version: \"22\"")
                .with_docs(docs("runtimes")),
        );
        return;
    };
    for (id, config) in map {
        if RuntimeEcosystem::parse(id).is_none() {
            diags.push(
                Diagnostic::error("schema", format!("`{id}` is not a recognized runtime"))
                    .with_field(format!("runtimes.{id}"))
                    .with_example("runtimes:\n  python:\n    version: \"3.13\"")
                    .with_docs(docs("runtimes")),
            );
            continue;
        }
        let has_version = match config {
            JsonValue::String(_) => true,
            JsonValue::Object(map) => map.get("version").is_some_and(JsonValue::is_string),
            _ => false,
        };
        if !has_version {
            diags.push(
                Diagnostic::error("schema", format!("`runtimes.{id}` requires a version string"))
                    .with_field(format!("runtimes.{id}"))
                    .with_example(format!("runtimes:\n  {id}:\n    version: \"22\""))
                    .with_docs(docs("runtimes")),
            );
        }
    }
}

fn check_imports(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    match value.as_array() {
        Some(items) => {
            for item in items {
                if !item.is_string() {
                    diags.push(
                        Diagnostic::error("schema", "`imports` entries must be path strings")
                            .with_field("imports")
                            .with_example("imports:\n  - shared/tools.md")
                            .with_docs(docs("imports")),
                    );
                }
            }
        }
        None => diags.push(
            Diagnostic::error("schema", "`imports` must be a sequence of paths")
                .with_field("imports")
                .with_example("imports:\n  - shared/tools.md\n  - octo/shared/mcp.md@v1")
                .with_docs(docs("imports")),
        ),
    }
}

fn check_steps(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    if !value.is_array() {
        diags.push(
            Diagnostic::error("schema", "`steps` must be a sequence of step mappings")
                .with_field("steps"),
        );
    }
}

fn check_timeout_minutes(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    let valid = value.as_u64().is_some_and(|n| (1..=1440).contains(&n));
    if !valid {
        diags.push(
            Diagnostic::error(
                "schema",
                "`timeout_minutes` must be an integer between 1 and 1440",
            )
            .with_field("timeout_minutes")
            .with_rationale("an unbounded agent job can burn runner minutes indefinitely")
            .with_example("timeout_minutes: 15")
            .with_docs(docs("frontmatter")),
        );
    }
}

fn check_strict(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    if !value.is_boolean() {
        diags.push(
            Diagnostic::error("schema", "`strict` must be a boolean").with_field("strict"),
        );
    }
}

fn check_if(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    if !value.is_string() {
        diags.push(
            Diagnostic::error("schema", "`if` must be an expression string")
                .with_field("if")
                .with_example("if: github.event.pull_request.draft == false"),
        );
    }
}

const KNOWN_ROLES: &[&str] = &["admin", "maintainer", "write", "triage", "read", "all"];

fn check_roles(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    let items = match value {
        JsonValue::String(s) => vec![s.clone()],
        JsonValue::Array(items) => items
            .iter()
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .collect(),
        other => {
            diags.push(
                Diagnostic::error(
                    "schema",
                    format!("`roles` must be a role or sequence of roles, got {}", type_name(other)),
                )
                .with_field("roles")
                .with_example("roles: [admin, maintainer]")
                .with_docs(docs("permissions")),
            );
            return;
        }
    };
    for role in items {
        if !KNOWN_ROLES.contains(&role.as_str()) {
            diags.push(
                Diagnostic::error("schema", format!("`{role}` is not a recognized repository role"))
                    .with_field("roles")
                    .with_example("roles: [admin, maintainer]")
                    .with_docs(docs("permissions")),
            );
        }
    }
}

fn check_env(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    let Some(map) = value.as_object() else {
        diags.push(Diagnostic::error("schema", "`env` must be a mapping").with_field("env"));
        return;
    };
    for (key, entry) in map {
        if entry.is_array() || entry.is_object() {
            diags.push(
                Diagnostic::error("schema", format!("`env.{key}` must be a scalar"))
                    .with_field(format!("env.{key}")),
            );
        }
    }
}

fn check_concurrency(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    if !value.is_string() && !value.is_object() {
        diags.push(
            Diagnostic::error("schema", "`concurrency` must be a group name or mapping")
                .with_field("concurrency"),
        );
    }
}

fn check_run_name(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    if !value.is_string() {
        diags.push(
            Diagnostic::error("schema", "`run-name` must be a string").with_field("run-name"),
        );
    }
}

fn check_github_token(value: &JsonValue, diags: &mut Vec<Diagnostic>) {
    if !value.is_string() {
        diags.push(
            Diagnostic::error("schema", "`github-token` must be a token expression string")
                .with_field("github-token")
                .with_example("github-token: \"${{ secrets.CUSTOM_PAT }}\""),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowlock_types::Severity;
    use serde_json::json;

    fn run(value: serde_json::Value) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        validate(&value, &mut diags);
        diags
    }

    fn errors(diags: &[Diagnostic]) -> Vec<&Diagnostic> {
        diags.iter().filter(|d| d.severity == Severity::Error).collect()
    }

    #[test]
    fn minimal_valid_preamble_passes() {
        let diags = run(json!({"on": "workflow_dispatch", "engine": "copilot"}));
        assert!(errors(&diags).is_empty(), "unexpected: {diags:?}");
    }

    #[test]
    fn missing_on_is_an_error() {
        let diags = run(json!({"engine": "copilot"}));
        assert!(errors(&diags).iter().any(|d| d.field.as_deref() == Some("on")));
    }

    #[test]
    fn unknown_root_field_warns_only() {
        let diags = run(json!({"on": "push", "enginee": "copilot"}));
        assert!(errors(&diags).is_empty());
        assert!(diags.iter().any(|d| d.severity == Severity::Warning
            && d.message.contains("enginee")));
    }

    #[test]
    fn unknown_engine_lists_options() {
        let diags = run(json!({"on": "push", "engine": "gpt-5"}));
        let err = errors(&diags).into_iter().find(|d| d.field.as_deref() == Some("engine")).unwrap();
        assert!(err.message.contains("copilot"));
        assert!(err.example.is_some());
        assert!(err.docs.is_some());
    }

    #[test]
    fn custom_engine_requires_steps() {
        let diags = run(json!({"on": "push", "engine": {"id": "custom"}}));
        assert!(errors(&diags).iter().any(|d| d.field.as_deref() == Some("engine.steps")));
    }

    #[test]
    fn stop_after_in_minutes_suggests_hours() {
        let diags = run(json!({"on": {"workflow_dispatch": null, "stop-after": "+90m"}}));
        let err = errors(&diags)
            .into_iter()
            .find(|d| d.field.as_deref() == Some("on.stop-after"))
            .unwrap();
        assert!(err.message.contains("+2h"), "message: {}", err.message);
    }

    #[test]
    fn deprecated_trigger_warns() {
        let diags = run(json!({"on": {"alias": null}, "engine": "copilot"}));
        assert!(errors(&diags).is_empty());
        assert!(diags.iter().any(|d| d.message.contains("deprecated")));
    }

    #[test]
    fn bad_permission_level_is_reported() {
        let diags = run(json!({"on": "push", "permissions": {"issues": "rw"}}));
        assert!(errors(&diags)
            .iter()
            .any(|d| d.field.as_deref() == Some("permissions.issues")));
    }

    #[test]
    fn mcp_tool_requires_exactly_one_launch_method() {
        let both = run(json!({"on": "push", "tools": {"tavily": {"command": "npx", "container": "img"}}}));
        assert!(errors(&both).iter().any(|d| d.message.contains("both")));

        let neither = run(json!({"on": "push", "tools": {"tavily": {"env": {}}}}));
        assert!(errors(&neither).iter().any(|d| d.message.contains("needs")));
    }

    #[test]
    fn unknown_safe_output_kind_is_rejected() {
        let diags = run(json!({"on": "push", "safe-outputs": {"delete-repository": {}}}));
        assert!(errors(&diags)
            .iter()
            .any(|d| d.message.contains("delete-repository")));
    }

    #[test]
    fn safe_output_target_forms_are_checked() {
        let good = run(json!({"on": "push", "safe-outputs": {"add-comment": {"target": "*"}}}));
        assert!(errors(&good).is_empty());
        let bad = run(json!({"on": "push", "safe-outputs": {"add-comment": {"target": true}}}));
        assert!(!errors(&bad).is_empty());
    }

    #[test]
    fn firewall_log_level_is_validated() {
        let diags = run(json!({"on": "push", "network": {"firewall": {"log-level": "loud"}}}));
        assert!(errors(&diags)
            .iter()
            .any(|d| d.field.as_deref() == Some("network.firewall.log-level")));
    }

    #[test]
    fn diagnostics_carry_examples_and_docs() {
        let diags = run(json!({"on": "push", "engine": "gpt-5", "timeout_minutes": 0}));
        for err in errors(&diags) {
            assert!(err.example.is_some(), "no example on: {}", err.message);
            assert!(err.docs.is_some(), "no docs on: {}", err.message);
        }
    }
}
