//! # flowlock-types
//!
//! Domain types shared across the flowlock compiler: the internal
//! [`WorkflowData`] model, engine and tool configurations, safe-output
//! kinds, network permissions, the diagnostic taxonomy, and the compiler
//! options record.
//!
//! A `WorkflowData` value is constructed once by the model builder, mutated
//! during runtime validation only to annotate derived fields, and read-only
//! thereafter.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub use flowlock_duration::{DeltaError, StopAfter, TimeDelta};

/// Per-expression value limit imposed by the target CI platform.
pub const MAX_EXPRESSION_BYTES: usize = 21 * 1024;

/// Pattern every referenced secret name must match.
pub const SECRET_NAME_PATTERN: &str = "^[A-Z][A-Z0-9_]*$";

// ---------------------------------------------------------------------------
// Engines

/// The AI runtime that executes the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Claude,
    Codex,
    Copilot,
    Custom,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Claude => "claude",
            EngineKind::Codex => "codex",
            EngineKind::Copilot => "copilot",
            EngineKind::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(EngineKind::Claude),
            "codex" => Some(EngineKind::Codex),
            "copilot" => Some(EngineKind::Copilot),
            "custom" => Some(EngineKind::Custom),
            _ => None,
        }
    }

    /// All recognized identifiers, for diagnostics.
    pub fn all() -> &'static [&'static str] {
        &["copilot", "claude", "codex", "custom"]
    }
}

/// Resolved engine declaration (string or object form in the source).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub kind: EngineKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Steps sequence carried by the `custom` engine, copied through opaque.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<JsonValue>,
    /// Extra environment passed to the engine step.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl EngineConfig {
    pub fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            version: None,
            model: None,
            steps: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Permissions

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Read,
    Write,
    None,
}

impl PermissionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionLevel::Read => "read",
            PermissionLevel::Write => "write",
            PermissionLevel::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(PermissionLevel::Read),
            "write" => Some(PermissionLevel::Write),
            "none" => Some(PermissionLevel::None),
            _ => None,
        }
    }
}

/// Scope → level mapping, deterministic order.
pub type Permissions = BTreeMap<String, PermissionLevel>;

/// Permission scopes the schema recognizes.
pub const PERMISSION_SCOPES: &[&str] = &[
    "actions",
    "attestations",
    "checks",
    "contents",
    "deployments",
    "discussions",
    "id-token",
    "issues",
    "models",
    "packages",
    "pages",
    "pull-requests",
    "repository-projects",
    "security-events",
    "statuses",
];

// ---------------------------------------------------------------------------
// Triggers

/// Trigger names the schema recognizes under `on:`.
pub const TRIGGER_KINDS: &[&str] = &[
    "check_run",
    "check_suite",
    "command",
    "discussion",
    "discussion_comment",
    "fork",
    "issue_comment",
    "issues",
    "label",
    "merge_group",
    "pull_request",
    "pull_request_review",
    "pull_request_review_comment",
    "pull_request_target",
    "push",
    "release",
    "schedule",
    "status",
    "workflow_dispatch",
    "workflow_run",
];

/// Deprecated trigger spellings still accepted with a warning.
pub const DEPRECATED_TRIGGERS: &[(&str, &str)] = &[("alias", "command"), ("cron", "schedule")];

/// Slash-command alias trigger (`on: command:`), which gates the workflow
/// behind a task-gate job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTrigger {
    pub name: String,
    /// Events the command responds to; empty means the default set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

/// Normalized trigger set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerSet {
    /// Trigger name → raw (already schema-validated) configuration.
    pub entries: BTreeMap<String, JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_after: Option<StopAfter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandTrigger>,
}

impl TriggerSet {
    /// Whether the triggering event carries an issue or pull-request entity,
    /// which `target: triggering` safe outputs require.
    pub fn provides_entity_context(&self) -> bool {
        self.entries.keys().any(|k| {
            matches!(
                k.as_str(),
                "issues"
                    | "issue_comment"
                    | "pull_request"
                    | "pull_request_target"
                    | "pull_request_review"
                    | "pull_request_review_comment"
            )
        }) || self.command.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tools

/// Capability pattern for tool permission filters, e.g. `bash: ["git *"]`.
/// Structured so precedence (deny > allow) and prefix matching need no
/// re-parsing at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolPattern {
    pub kind: ToolPatternKind,
    /// The command or capability name, without any wildcard suffix.
    pub subject: String,
    /// True when the source pattern ended in `*`.
    pub wildcard: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPatternKind {
    Allow,
    Deny,
}

impl ToolPattern {
    /// Parse a source pattern. A leading `!` denies; a trailing `*` makes a
    /// prefix match.
    pub fn parse(raw: &str) -> Self {
        let (kind, rest) = match raw.strip_prefix('!') {
            Some(rest) => (ToolPatternKind::Deny, rest),
            None => (ToolPatternKind::Allow, raw),
        };
        let (subject, wildcard) = match rest.strip_suffix('*') {
            Some(prefix) => (prefix.trim_end().to_string(), true),
            None => (rest.to_string(), false),
        };
        Self {
            kind,
            subject,
            wildcard,
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        if self.wildcard {
            candidate.starts_with(&self.subject)
        } else {
            candidate == self.subject
        }
    }
}

/// Evaluate patterns with deny taking precedence over allow.
pub fn pattern_allows(patterns: &[ToolPattern], candidate: &str) -> bool {
    let denied = patterns
        .iter()
        .any(|p| p.kind == ToolPatternKind::Deny && p.matches(candidate));
    if denied {
        return false;
    }
    patterns
        .iter()
        .any(|p| p.kind == ToolPatternKind::Allow && p.matches(candidate))
}

/// GitHub MCP server mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GithubToolMode {
    /// Hosted HTTP endpoint.
    #[default]
    Remote,
    /// Containerized stdio server.
    Local,
}

/// Named toolsets of the built-in GitHub tool.
pub const GITHUB_TOOLSETS: &[&str] = &[
    "context",
    "repos",
    "issues",
    "pull_requests",
    "users",
    "actions",
    "code_security",
    "discussions",
    "experiments",
    "gists",
    "labels",
    "notifications",
    "orgs",
    "projects",
    "search",
    "secret_protection",
    "security_advisories",
];

/// Expansion of the `default` toolset.
pub const DEFAULT_TOOLSET_EXPANSION: &[&str] =
    &["context", "repos", "issues", "pull_requests", "users"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GithubToolConfig {
    #[serde(default)]
    pub mode: GithubToolMode,
    /// Toolset names after expansion of `default`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub toolsets: Vec<String>,
    /// Explicit allowed tool names, merged after toolset expansion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Token expression for the server, e.g. `${{ secrets.CUSTOM_PAT }}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
    /// Custom headers for remote mode. Built-in headers win on collision.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaywrightToolConfig {
    /// Normalized allow-list; localhost entries are always present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_domains: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Languages the Serena language-server tool supports.
pub const SERENA_LANGUAGES: &[&str] = &[
    "csharp", "elixir", "go", "java", "javascript", "python", "rust", "typescript",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerenaToolConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// One `cache-memory` entry. Ids must be unique across the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMemoryEntry {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

/// MCP server launch declaration for user-declared tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum McpLaunch {
    /// Subprocess server: either a host command or a container image.
    Stdio {
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        container: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    /// HTTP server.
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub launch: McpLaunch,
    /// Tool names the engine may call on this server.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

/// A tool declaration after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "kebab-case")]
pub enum ToolConfig {
    Github(GithubToolConfig),
    Playwright(PlaywrightToolConfig),
    Serena(SerenaToolConfig),
    Bash {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        patterns: Vec<ToolPattern>,
    },
    Edit,
    WebFetch,
    WebSearch,
    CacheMemory {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        entries: Vec<CacheMemoryEntry>,
    },
    Mcp(McpServerConfig),
}

/// Built-in tool names with fixed shapes; anything else is an MCP server.
pub const BUILTIN_TOOLS: &[&str] = &[
    "github",
    "playwright",
    "serena",
    "bash",
    "edit",
    "web-fetch",
    "web-search",
    "cache-memory",
];

// ---------------------------------------------------------------------------
// Safe outputs

/// Closed enumeration of safe-output kinds. Each enabled kind implies a
/// dedicated handler job in the emitted pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafeOutputKind {
    CreateIssue,
    CreateDiscussion,
    AddComment,
    CreatePullRequest,
    CreatePullRequestReviewComment,
    UpdateIssue,
    AddLabels,
    RemoveLabels,
    PushToPullRequestBranch,
    UploadAssets,
    MissingTool,
    Noop,
    DispatchWorkflow,
    CreateProject,
    UpdateProject,
    AssignToAgent,
    CreateAgentTask,
    CreateCodeScanningAlert,
}

impl SafeOutputKind {
    pub const ALL: &'static [SafeOutputKind] = &[
        SafeOutputKind::CreateIssue,
        SafeOutputKind::CreateDiscussion,
        SafeOutputKind::AddComment,
        SafeOutputKind::CreatePullRequest,
        SafeOutputKind::CreatePullRequestReviewComment,
        SafeOutputKind::UpdateIssue,
        SafeOutputKind::AddLabels,
        SafeOutputKind::RemoveLabels,
        SafeOutputKind::PushToPullRequestBranch,
        SafeOutputKind::UploadAssets,
        SafeOutputKind::MissingTool,
        SafeOutputKind::Noop,
        SafeOutputKind::DispatchWorkflow,
        SafeOutputKind::CreateProject,
        SafeOutputKind::UpdateProject,
        SafeOutputKind::AssignToAgent,
        SafeOutputKind::CreateAgentTask,
        SafeOutputKind::CreateCodeScanningAlert,
    ];

    /// The kebab-case name used in source files and in the agent output's
    /// `output_types` array.
    pub fn as_str(self) -> &'static str {
        match self {
            SafeOutputKind::CreateIssue => "create-issue",
            SafeOutputKind::CreateDiscussion => "create-discussion",
            SafeOutputKind::AddComment => "add-comment",
            SafeOutputKind::CreatePullRequest => "create-pull-request",
            SafeOutputKind::CreatePullRequestReviewComment => {
                "create-pull-request-review-comment"
            }
            SafeOutputKind::UpdateIssue => "update-issue",
            SafeOutputKind::AddLabels => "add-labels",
            SafeOutputKind::RemoveLabels => "remove-labels",
            SafeOutputKind::PushToPullRequestBranch => "push-to-pull-request-branch",
            SafeOutputKind::UploadAssets => "upload-assets",
            SafeOutputKind::MissingTool => "missing-tool",
            SafeOutputKind::Noop => "noop",
            SafeOutputKind::DispatchWorkflow => "dispatch-workflow",
            SafeOutputKind::CreateProject => "create-project",
            SafeOutputKind::UpdateProject => "update-project",
            SafeOutputKind::AssignToAgent => "assign-to-agent",
            SafeOutputKind::CreateAgentTask => "create-agent-task",
            SafeOutputKind::CreateCodeScanningAlert => "create-code-scanning-alert",
        }
    }

    /// The snake_case job id used in the emitted pipeline.
    pub fn job_id(self) -> String {
        self.as_str().replace('-', "_")
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

/// Which entity an update/comment operation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetSelector {
    /// The entity that triggered the workflow; only valid when the event
    /// provides one.
    Triggering,
    /// Every output item must name an explicit number.
    Any,
    /// A fixed entity number.
    Number { number: u64 },
}

impl TargetSelector {
    pub fn parse(raw: &JsonValue) -> Option<Self> {
        match raw {
            JsonValue::String(s) if s == "triggering" => Some(TargetSelector::Triggering),
            JsonValue::String(s) if s == "*" => Some(TargetSelector::Any),
            JsonValue::Number(n) => n.as_u64().map(|number| TargetSelector::Number { number }),
            JsonValue::String(s) => s.parse::<u64>().ok().map(|number| TargetSelector::Number { number }),
            _ => None,
        }
    }
}

/// Policy when a mutating handler finds nothing to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IfNoChanges {
    #[default]
    Warn,
    Error,
    Ignore,
}

impl IfNoChanges {
    pub fn as_str(self) -> &'static str {
        match self {
            IfNoChanges::Warn => "warn",
            IfNoChanges::Error => "error",
            IfNoChanges::Ignore => "ignore",
        }
    }
}

/// Body edit mode for update kinds that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyOperation {
    #[default]
    Append,
    Prepend,
    Replace,
}

/// Per-kind configuration. Fields apply only where the kind supports them;
/// the schema rejects the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafeOutputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_no_changes: Option<IfNoChanges>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_operation: Option<BodyOperation>,
    /// Per-kind token override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
    /// Branch prefix for push/PR kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_prefix: Option<String>,
    /// Workflow names a dispatch-workflow output may start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_workflows: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafeOutputsConfig {
    pub entries: BTreeMap<SafeOutputKind, SafeOutputConfig>,
    /// Render side effects into the step summary instead of applying them.
    #[serde(default)]
    pub staged: bool,
    /// Token used by handlers unless a kind overrides it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
    /// Enable the threat-detection job between agent and handlers.
    #[serde(default)]
    pub threat_detection: bool,
}

impl SafeOutputsConfig {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Network

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirewallLogLevel {
    Off,
    #[default]
    Info,
    Debug,
}

impl FirewallLogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(FirewallLogLevel::Off),
            "info" => Some(FirewallLogLevel::Info),
            "debug" => Some(FirewallLogLevel::Debug),
            _ => None,
        }
    }
}

/// Named domain bundles accepted under `network.ecosystems`.
pub const NETWORK_ECOSYSTEMS: &[&str] = &[
    "containers", "dotnet", "github", "go", "java", "node", "python", "ruby", "rust",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkPermissions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ecosystems: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firewall_log_level: Option<FirewallLogLevel>,
}

// ---------------------------------------------------------------------------
// Runtimes

/// Runtimes whose packages the compiler collects and can probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeEcosystem {
    Node,
    Python,
    Uv,
}

impl RuntimeEcosystem {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeEcosystem::Node => "node",
            RuntimeEcosystem::Python => "python",
            RuntimeEcosystem::Uv => "uv",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "node" => Some(RuntimeEcosystem::Node),
            "python" => Some(RuntimeEcosystem::Python),
            "uv" => Some(RuntimeEcosystem::Uv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeRequirements {
    /// Runtime id → requested version string.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub versions: BTreeMap<RuntimeEcosystem, String>,
    /// Packages collected from tool configs and custom steps.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub packages: BTreeMap<RuntimeEcosystem, BTreeSet<String>>,
}

// ---------------------------------------------------------------------------
// WorkflowData

/// Resolved import bookkeeping, annotated onto the model after loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedImports {
    /// Repo-relative paths of every file merged into this workflow.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// The single agent-definition import, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_file: Option<String>,
}

/// The internal model a workflow compiles through. Built once, annotated by
/// validation, then read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowData {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Repo-relative source path, used for the lock-file header comment.
    pub source_path: PathBuf,
    pub on: TriggerSet,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: Permissions,
    pub engine: EngineConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tools: BTreeMap<String, ToolConfig>,
    #[serde(default, skip_serializing_if = "SafeOutputsConfig::is_empty")]
    pub safe_outputs: SafeOutputsConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkPermissions>,
    #[serde(default)]
    pub runtimes: RuntimeRequirements,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caches: Vec<CacheMemoryEntry>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub secrets_referenced: BTreeSet<String>,
    /// Opaque steps owned by the `custom` engine or `steps:` preamble field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_steps: Vec<JsonValue>,
    pub prompt: String,
    /// Derived by the prompt assembler when the prompt exceeds the budget.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompt_chunks: Vec<String>,
    #[serde(default)]
    pub imports: ResolvedImports,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub strict: bool,
    /// Raw `if:` expression gating the whole workflow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_condition: Option<String>,
    /// Repository roles allowed to trigger; empty means no role gate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency_group: Option<String>,
}

impl WorkflowData {
    /// Whether the pipeline needs a task-gate job ahead of the agent.
    pub fn needs_task_gate(&self) -> bool {
        self.if_condition.is_some() || !self.roles.is_empty() || self.on.command.is_some()
    }
}

// ---------------------------------------------------------------------------
// Diagnostics

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// One user-facing finding. Rendering follows the house style: icon,
/// one-sentence statement, one-sentence rationale, corrected example,
/// docs link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stable category slug, e.g. `schema`, `strict-mode`, `expression-size`.
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs: Option<String>,
}

impl Diagnostic {
    pub fn error(category: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category: category.to_string(),
            field: None,
            message: message.into(),
            rationale: None,
            example: None,
            docs: None,
        }
    }

    pub fn warning(category: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(category, message)
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }

    pub fn with_docs(mut self, docs: impl Into<String>) -> Self {
        self.docs = Some(docs.into());
        self
    }

    fn icon(&self) -> &'static str {
        match (self.severity, self.category.as_str()) {
            (_, "expression-size") => "📝",
            (Severity::Error, _) => "✗",
            (Severity::Warning, _) => "⚠",
        }
    }

    /// Render the full multi-line block for terminal output.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(self.icon());
        out.push(' ');
        if let Some(field) = &self.field {
            out.push_str(&format!("`{field}`: "));
        }
        out.push_str(&self.message);
        if let Some(rationale) = &self.rationale {
            out.push_str("\n\n  Why this matters: ");
            out.push_str(rationale);
        }
        if let Some(example) = &self.example {
            out.push_str("\n\n  For example:\n");
            for line in example.lines() {
                out.push_str("    ");
                out.push_str(line);
                out.push('\n');
            }
        }
        if let Some(docs) = &self.docs {
            out.push_str(&format!("\n  Docs: {docs}"));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Errors

/// Import resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportError {
    #[error("imported file not found: {path}")]
    SourceNotFound { path: String },

    #[error("circular import: {}", cycle.join(" -> "))]
    CircularImport { cycle: Vec<String> },

    #[error("failed to fetch remote import {reference}: {reason}")]
    RemoteFetchFailed { reference: String, reason: String },

    #[error(
        "multiple agent imports: {first} and {second}; at most one file under \
         .github/agents/ may be imported"
    )]
    MultipleAgentImports { first: String, second: String },
}

/// Top-level compiler error. Categories map onto CLI exit codes:
/// validation failures → 1, I/O → 2, configuration → 3.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("{path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{0}")]
    Import(#[from] ImportError),

    #[error("validation failed with {} diagnostic(s)", diagnostics.len())]
    Validation { diagnostics: Vec<Diagnostic> },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("compilation cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CompileError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CompileError::Parse { .. }
            | CompileError::Import(_)
            | CompileError::Validation { .. } => 1,
            CompileError::Io { .. } | CompileError::Cancelled => 2,
            CompileError::Config { .. } => 3,
            CompileError::Internal(_) => 2,
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::Validation { diagnostics } => diagnostics,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Options & artifacts

/// All compiler knobs, threaded through every phase. No global state.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Repository root; source paths in emitted comments are relative to it.
    pub repo_root: PathBuf,
    /// Validate without writing any output.
    pub no_emit: bool,
    /// Tighten security defaults (timeout, permissions, network).
    pub strict: bool,
    /// Allow `write` permissions under strict mode.
    pub dangerous_permissions_write: bool,
    /// Probe container images declared by stdio MCP tools.
    pub validate_containers: bool,
    /// Probe collected packages against their registries.
    pub validate_packages: bool,
    /// Run `actionlint` on the emitted lock file when available.
    pub actionlint: bool,
    /// Run `zizmor` on the emitted lock file when available.
    pub zizmor: bool,
    /// Run `poutine` on the emitted lock file when available.
    pub poutine: bool,
    /// Write dependency manifests for collected packages.
    pub dependabot_manifests: bool,
    /// Root of the remote-import cache; `None` selects the per-user default.
    pub cache_root: Option<PathBuf>,
    /// Timeout for each network probe and remote fetch.
    pub probe_timeout: Duration,
    /// Timeout for each external linter invocation.
    pub lint_timeout: Duration,
    /// Worker threads for batch compiles.
    pub jobs: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            no_emit: false,
            strict: false,
            dangerous_permissions_write: false,
            validate_containers: false,
            validate_packages: false,
            actionlint: false,
            zizmor: false,
            poutine: false,
            dependabot_manifests: false,
            cache_root: None,
            probe_timeout: Duration::from_secs(10),
            lint_timeout: Duration::from_secs(60),
            jobs: 4,
        }
    }
}

/// Summary of one successful compile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileArtifacts {
    pub source: PathBuf,
    /// Absent in `no_emit` mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_path: Option<PathBuf>,
    /// SHA-256 of the emitted lock file, for change detection in tooling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_sha256: Option<String>,
    pub job_count: usize,
    pub chunk_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Diagnostic>,
    pub compiled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn safe_output_kind_round_trips_names() {
        for kind in SafeOutputKind::ALL {
            assert_eq!(SafeOutputKind::parse(kind.as_str()), Some(*kind));
        }
        assert_eq!(SafeOutputKind::parse("create-issue"), Some(SafeOutputKind::CreateIssue));
        assert_eq!(SafeOutputKind::parse("delete-repo"), None);
    }

    #[test]
    fn job_ids_are_snake_case() {
        assert_eq!(SafeOutputKind::CreateIssue.job_id(), "create_issue");
        assert_eq!(
            SafeOutputKind::PushToPullRequestBranch.job_id(),
            "push_to_pull_request_branch"
        );
    }

    #[test]
    fn tool_pattern_deny_wins_over_allow() {
        let patterns = vec![
            ToolPattern::parse("git *"),
            ToolPattern::parse("!git push*"),
        ];
        assert!(pattern_allows(&patterns, "git status"));
        assert!(!pattern_allows(&patterns, "git push origin main"));
    }

    #[test]
    fn tool_pattern_exact_match_without_wildcard() {
        let patterns = vec![ToolPattern::parse("ls")];
        assert!(pattern_allows(&patterns, "ls"));
        assert!(!pattern_allows(&patterns, "ls -la"));
    }

    #[test]
    fn target_selector_parses_all_forms() {
        assert_eq!(
            TargetSelector::parse(&serde_json::json!("triggering")),
            Some(TargetSelector::Triggering)
        );
        assert_eq!(
            TargetSelector::parse(&serde_json::json!("*")),
            Some(TargetSelector::Any)
        );
        assert_eq!(
            TargetSelector::parse(&serde_json::json!(42)),
            Some(TargetSelector::Number { number: 42 })
        );
        assert_eq!(TargetSelector::parse(&serde_json::json!(true)), None);
    }

    #[test]
    fn entity_context_tracks_trigger_kinds() {
        let mut on = TriggerSet::default();
        assert!(!on.provides_entity_context());
        on.entries.insert("issues".to_string(), JsonValue::Null);
        assert!(on.provides_entity_context());

        let mut push_only = TriggerSet::default();
        push_only.entries.insert("push".to_string(), JsonValue::Null);
        assert!(!push_only.provides_entity_context());
    }

    #[test]
    fn diagnostic_renders_all_sections() {
        let d = Diagnostic::error("schema", "the engine `gpt-5` is not recognized")
            .with_field("engine")
            .with_rationale("only supported engines can be provisioned in CI")
            .with_example("engine: copilot")
            .with_docs("https://flowlock.dev/docs/engine");
        let rendered = d.render();
        assert!(rendered.starts_with("✗ `engine`:"));
        assert!(rendered.contains("Why this matters:"));
        assert!(rendered.contains("engine: copilot"));
        assert!(rendered.contains("https://flowlock.dev/docs/engine"));
    }

    #[test]
    fn exit_codes_map_error_classes() {
        let validation = CompileError::Validation {
            diagnostics: vec![Diagnostic::error("schema", "bad")],
        };
        assert_eq!(validation.exit_code(), 1);
        let io = CompileError::Io {
            path: PathBuf::from("x"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(io.exit_code(), 2);
        let config = CompileError::Config {
            message: "bad flag".to_string(),
        };
        assert_eq!(config.exit_code(), 3);
    }

    proptest! {
        /// ToolPattern::parse never panics and preserves deny markers.
        #[test]
        fn tool_pattern_parse_total(raw in ".{0,40}") {
            let p = ToolPattern::parse(&raw);
            if raw.starts_with('!') {
                prop_assert_eq!(p.kind, ToolPatternKind::Deny);
            }
        }

        /// WorkflowData serialization round-trips.
        #[test]
        fn engine_config_roundtrip(kind in prop_oneof![
            Just(EngineKind::Claude),
            Just(EngineKind::Codex),
            Just(EngineKind::Copilot),
            Just(EngineKind::Custom),
        ]) {
            let config = EngineConfig::new(kind);
            let json = serde_json::to_string(&config).unwrap();
            let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(config, parsed);
        }
    }
}
