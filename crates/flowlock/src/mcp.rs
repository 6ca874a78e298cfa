//! Engine-specific MCP server configuration.
//!
//! Claude, copilot, and custom engines consume a JSON `mcpServers` document;
//! codex consumes TOML `[mcp_servers.<name>]` tables. The stdio flavor key
//! differs per engine: claude spells it `stdio`, copilot spells it `local`.
//! Secret expressions in env and header values pass through verbatim so the
//! executing platform expands them.

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as JsonValue, json};

use flowlock_types::{
    EngineKind, GithubToolConfig, GithubToolMode, McpLaunch, ToolConfig, WorkflowData,
};

/// Hosted endpoint of the built-in GitHub MCP server.
const GITHUB_REMOTE_URL: &str = "https://api.githubcopilot.com/mcp/";

/// Container image of the local GitHub MCP server.
const GITHUB_LOCAL_IMAGE: &str = "ghcr.io/github/github-mcp-server";

/// A rendered MCP configuration ready for embedding into the agent job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpManifest {
    /// Runner-local path the agent job writes the file to.
    pub path: &'static str,
    pub content: String,
}

/// Render the manifest for the workflow's engine, or `None` when no tool
/// needs an MCP server.
pub fn manifest(data: &WorkflowData) -> Option<McpManifest> {
    let servers = collect_servers(data);
    if servers.is_empty() {
        return None;
    }
    Some(match data.engine.kind {
        EngineKind::Codex => McpManifest {
            path: "/tmp/flowlock/config.toml",
            content: render_toml(&servers),
        },
        kind => McpManifest {
            path: "/tmp/flowlock/mcp-servers.json",
            content: render_json(kind, &servers),
        },
    })
}

/// One server, engine-agnostic.
#[derive(Debug, Clone)]
struct Server {
    name: String,
    launch: McpLaunch,
    allowed: Vec<String>,
}

fn collect_servers(data: &WorkflowData) -> Vec<Server> {
    let mut servers = Vec::new();
    for (name, tool) in &data.tools {
        match tool {
            ToolConfig::Github(github) => servers.push(github_server(github)),
            ToolConfig::Playwright(pw) => {
                let mut args = vec!["-y".to_string(), "@playwright/mcp@latest".to_string()];
                if !pw.allowed_domains.is_empty() {
                    args.push("--allowed-origins".to_string());
                    args.push(pw.allowed_domains.join(";"));
                }
                servers.push(Server {
                    name: name.clone(),
                    launch: McpLaunch::Stdio {
                        command: Some("npx".to_string()),
                        args,
                        container: None,
                        env: BTreeMap::new(),
                    },
                    allowed: Vec::new(),
                });
            }
            ToolConfig::Serena(serena) => {
                let mut args = vec![
                    "serena".to_string(),
                    "start-mcp-server".to_string(),
                    "--context".to_string(),
                    "agent".to_string(),
                ];
                for language in &serena.languages {
                    args.push("--language".to_string());
                    args.push(language.clone());
                }
                servers.push(Server {
                    name: name.clone(),
                    launch: McpLaunch::Stdio {
                        command: Some("uvx".to_string()),
                        args,
                        container: None,
                        env: BTreeMap::new(),
                    },
                    allowed: Vec::new(),
                });
            }
            ToolConfig::Mcp(mcp) => servers.push(Server {
                name: name.clone(),
                launch: mcp.launch.clone(),
                allowed: mcp.allowed.clone(),
            }),
            // Engine-native capabilities; no MCP server involved.
            ToolConfig::Bash { .. }
            | ToolConfig::Edit
            | ToolConfig::WebFetch
            | ToolConfig::WebSearch
            | ToolConfig::CacheMemory { .. } => {}
        }
    }
    servers
}

fn github_server(github: &GithubToolConfig) -> Server {
    match github.mode {
        GithubToolMode::Remote => {
            let mut headers = github.headers.clone();
            // Built-in headers win over user-supplied ones on collision.
            headers.insert(
                "Authorization".to_string(),
                format!("Bearer {}", github_token_expr(github)),
            );
            if !github.toolsets.is_empty() {
                headers.insert("X-MCP-Toolsets".to_string(), github.toolsets.join(","));
            }
            if github.read_only {
                headers.insert("X-MCP-Readonly".to_string(), "true".to_string());
            }
            Server {
                name: "github".to_string(),
                launch: McpLaunch::Http {
                    url: GITHUB_REMOTE_URL.to_string(),
                    headers,
                },
                allowed: github.allowed.clone(),
            }
        }
        GithubToolMode::Local => {
            let tag = github.version.as_deref().unwrap_or("latest");
            let mut env = BTreeMap::new();
            env.insert(
                "GITHUB_PERSONAL_ACCESS_TOKEN".to_string(),
                github_token_expr(github),
            );
            if !github.toolsets.is_empty() {
                env.insert("GITHUB_TOOLSETS".to_string(), github.toolsets.join(","));
            }
            if github.read_only {
                env.insert("GITHUB_READ_ONLY".to_string(), "1".to_string());
            }
            Server {
                name: "github".to_string(),
                launch: McpLaunch::Stdio {
                    command: None,
                    args: Vec::new(),
                    container: Some(format!("{GITHUB_LOCAL_IMAGE}:{tag}")),
                    env,
                },
                allowed: github.allowed.clone(),
            }
        }
    }
}

fn github_token_expr(github: &GithubToolConfig) -> String {
    github
        .github_token
        .clone()
        .unwrap_or_else(|| "${{ secrets.GITHUB_TOKEN }}".to_string())
}

/// The stdio flavor key differs per engine.
fn stdio_type_key(engine: EngineKind) -> &'static str {
    match engine {
        EngineKind::Copilot => "local",
        _ => "stdio",
    }
}

fn render_json(engine: EngineKind, servers: &[Server]) -> String {
    let mut entries = JsonMap::new();
    for server in servers {
        let mut entry = JsonMap::new();
        match &server.launch {
            McpLaunch::Stdio {
                command,
                args,
                container,
                env,
            } => {
                entry.insert("type".to_string(), json!(stdio_type_key(engine)));
                match container {
                    Some(image) => {
                        let mut docker_args =
                            vec!["run".to_string(), "-i".to_string(), "--rm".to_string()];
                        for key in env.keys() {
                            docker_args.push("-e".to_string());
                            docker_args.push(key.clone());
                        }
                        docker_args.push(image.clone());
                        entry.insert("command".to_string(), json!("docker"));
                        entry.insert("args".to_string(), json!(docker_args));
                    }
                    None => {
                        entry.insert(
                            "command".to_string(),
                            json!(command.clone().unwrap_or_default()),
                        );
                        if !args.is_empty() {
                            entry.insert("args".to_string(), json!(args));
                        }
                    }
                }
                if !env.is_empty() {
                    entry.insert("env".to_string(), json!(env));
                }
            }
            McpLaunch::Http { url, headers } => {
                entry.insert("type".to_string(), json!("http"));
                entry.insert("url".to_string(), json!(url));
                if !headers.is_empty() {
                    entry.insert("headers".to_string(), json!(headers));
                }
            }
        }
        if !server.allowed.is_empty() {
            entry.insert("allowed".to_string(), json!(server.allowed));
        }
        entries.insert(server.name.clone(), JsonValue::Object(entry));
    }
    let doc = json!({ "mcpServers": entries });
    serde_json::to_string_pretty(&doc).expect("mcp config is valid JSON") + "\n"
}

fn render_toml(servers: &[Server]) -> String {
    use toml::Value as TomlValue;
    use toml::map::Map as TomlMap;

    let mut root = TomlMap::new();

    // Codex requires history persistence off for CI runs.
    let mut history = TomlMap::new();
    history.insert("persistence".to_string(), TomlValue::String("none".to_string()));
    root.insert("history".to_string(), TomlValue::Table(history));

    let mut mcp_servers = TomlMap::new();
    for server in servers {
        let mut table = TomlMap::new();
        match &server.launch {
            McpLaunch::Stdio {
                command,
                args,
                container,
                env,
            } => {
                match container {
                    Some(image) => {
                        table.insert("command".to_string(), TomlValue::String("docker".to_string()));
                        let mut docker_args = vec![
                            TomlValue::String("run".to_string()),
                            TomlValue::String("-i".to_string()),
                            TomlValue::String("--rm".to_string()),
                        ];
                        for key in env.keys() {
                            docker_args.push(TomlValue::String("-e".to_string()));
                            docker_args.push(TomlValue::String(key.clone()));
                        }
                        docker_args.push(TomlValue::String(image.clone()));
                        table.insert("args".to_string(), TomlValue::Array(docker_args));
                    }
                    None => {
                        table.insert(
                            "command".to_string(),
                            TomlValue::String(command.clone().unwrap_or_default()),
                        );
                        if !args.is_empty() {
                            table.insert(
                                "args".to_string(),
                                TomlValue::Array(
                                    args.iter().map(|a| TomlValue::String(a.clone())).collect(),
                                ),
                            );
                        }
                    }
                }
                if !env.is_empty() {
                    table.insert("env".to_string(), toml_string_table(env));
                }
            }
            McpLaunch::Http { url, headers } => {
                table.insert("url".to_string(), TomlValue::String(url.clone()));
                if !headers.is_empty() {
                    table.insert("headers".to_string(), toml_string_table(headers));
                }
            }
        }
        mcp_servers.insert(server.name.clone(), TomlValue::Table(table));
    }
    root.insert("mcp_servers".to_string(), TomlValue::Table(mcp_servers));

    toml::to_string(&TomlValue::Table(root)).expect("mcp config is valid TOML")
}

fn toml_string_table(map: &BTreeMap<String, String>) -> toml::Value {
    let mut table = toml::map::Map::new();
    for (key, value) in map {
        table.insert(key.clone(), toml::Value::String(value.clone()));
    }
    toml::Value::Table(table)
}
