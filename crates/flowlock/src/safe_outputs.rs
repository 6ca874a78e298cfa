//! Planning of safe-output handler jobs.
//!
//! Safe-output kinds form a closed set; each enabled kind is dispatched
//! through a planner keyed by the variant tag, producing the step
//! configuration the job builder wires into the pipeline.

use std::collections::BTreeMap;

use flowlock_types::{
    PermissionLevel, SafeOutputConfig, SafeOutputKind, TargetSelector, WorkflowData,
};

use crate::scripts::{self, EmbeddedScript};

/// Everything the job builder needs to emit one handler job.
#[derive(Debug, Clone)]
pub struct SafeOutputStepConfig {
    pub kind: SafeOutputKind,
    pub job_id: String,
    pub step_name: String,
    pub step_id: String,
    pub script: &'static EmbeddedScript,
    /// Per-kind inputs plus engine-level envs.
    pub env: BTreeMap<String, String>,
    /// Job-level condition gating the handler on the agent's output types.
    pub condition: String,
    /// Token expression the handler authenticates with.
    pub token: String,
    /// Minimal job-level permissions.
    pub permissions: Vec<(&'static str, PermissionLevel)>,
    /// Handler needs the agent PAT rather than the workflow token.
    pub use_agent_token: bool,
    /// Handler drives the hosted coding agent.
    pub use_copilot_token: bool,
}

/// The guard every handler job carries.
pub fn output_condition(kind: SafeOutputKind) -> String {
    format!(
        "contains(fromJSON(needs.agent.outputs.output_types), '{}')",
        kind.as_str()
    )
}

/// Plan every enabled kind, in deterministic kind order.
pub fn plan_all(data: &WorkflowData) -> Vec<SafeOutputStepConfig> {
    data.safe_outputs
        .entries
        .iter()
        .map(|(kind, config)| plan(*kind, config, data))
        .collect()
}

fn plan(kind: SafeOutputKind, config: &SafeOutputConfig, data: &WorkflowData) -> SafeOutputStepConfig {
    let mut env = BTreeMap::new();
    env.insert(
        "FLOWLOCK_AGENT_OUTPUT".to_string(),
        "agent-output.json".to_string(),
    );
    if data.safe_outputs.staged {
        env.insert("FLOWLOCK_STAGED".to_string(), "true".to_string());
    }
    if let Some(max) = config.max {
        env.insert("FLOWLOCK_MAX_COUNT".to_string(), max.to_string());
    }
    if let Some(prefix) = &config.title_prefix {
        env.insert("FLOWLOCK_TITLE_PREFIX".to_string(), prefix.clone());
    }
    if !config.labels.is_empty() {
        let key = match kind {
            SafeOutputKind::AddLabels => "FLOWLOCK_ALLOWED_LABELS",
            _ => "FLOWLOCK_LABELS",
        };
        env.insert(key.to_string(), config.labels.join(","));
    }
    if let Some(target) = &config.target {
        let rendered = match target {
            TargetSelector::Triggering => "triggering".to_string(),
            TargetSelector::Any => "*".to_string(),
            TargetSelector::Number { number } => number.to_string(),
        };
        env.insert("FLOWLOCK_TARGET".to_string(), rendered);
    }
    if let Some(policy) = config.if_no_changes {
        env.insert("FLOWLOCK_IF_NO_CHANGES".to_string(), policy.as_str().to_string());
    }
    if let Some(op) = config.body_operation {
        let rendered = match op {
            flowlock_types::BodyOperation::Append => "append",
            flowlock_types::BodyOperation::Prepend => "prepend",
            flowlock_types::BodyOperation::Replace => "replace",
        };
        env.insert("FLOWLOCK_BODY_OPERATION".to_string(), rendered.to_string());
    }
    if let Some(prefix) = &config.branch_prefix {
        env.insert("FLOWLOCK_BRANCH_PREFIX".to_string(), prefix.clone());
    }
    if !config.allowed_workflows.is_empty() {
        env.insert(
            "FLOWLOCK_ALLOWED_WORKFLOWS".to_string(),
            config.allowed_workflows.join(","),
        );
    }

    // Token precedence: per-kind override, then workflow-level, then ambient.
    let token = config
        .github_token
        .clone()
        .or_else(|| data.safe_outputs.github_token.clone())
        .unwrap_or_else(|| "${{ secrets.GITHUB_TOKEN }}".to_string());

    let (script, step_name, permissions): (
        &'static EmbeddedScript,
        &str,
        Vec<(&'static str, PermissionLevel)>,
    ) = match kind {
        SafeOutputKind::CreateIssue => (
            &scripts::CREATE_ISSUE,
            "Create issue",
            vec![("issues", PermissionLevel::Write)],
        ),
        SafeOutputKind::CreateDiscussion => (
            &scripts::CREATE_DISCUSSION,
            "Create discussion",
            vec![("discussions", PermissionLevel::Write)],
        ),
        SafeOutputKind::AddComment => (
            &scripts::ADD_COMMENT,
            "Add comment",
            vec![
                ("issues", PermissionLevel::Write),
                ("pull-requests", PermissionLevel::Write),
            ],
        ),
        SafeOutputKind::CreatePullRequest => (
            &scripts::CREATE_PULL_REQUEST,
            "Create pull request",
            vec![
                ("contents", PermissionLevel::Write),
                ("pull-requests", PermissionLevel::Write),
            ],
        ),
        SafeOutputKind::CreatePullRequestReviewComment => (
            &scripts::CREATE_PR_REVIEW_COMMENT,
            "Create review comment",
            vec![("pull-requests", PermissionLevel::Write)],
        ),
        SafeOutputKind::UpdateIssue => (
            &scripts::UPDATE_ISSUE,
            "Update issue",
            vec![("issues", PermissionLevel::Write)],
        ),
        SafeOutputKind::AddLabels => (
            &scripts::ADD_LABELS,
            "Add labels",
            vec![
                ("issues", PermissionLevel::Write),
                ("pull-requests", PermissionLevel::Write),
            ],
        ),
        SafeOutputKind::RemoveLabels => (
            &scripts::REMOVE_LABELS,
            "Remove labels",
            vec![
                ("issues", PermissionLevel::Write),
                ("pull-requests", PermissionLevel::Write),
            ],
        ),
        SafeOutputKind::PushToPullRequestBranch => (
            &scripts::PUSH_TO_PR_BRANCH,
            "Push to pull request branch",
            vec![("contents", PermissionLevel::Write)],
        ),
        SafeOutputKind::UploadAssets => (
            &scripts::UPLOAD_ASSETS,
            "Upload assets",
            vec![("contents", PermissionLevel::Read)],
        ),
        SafeOutputKind::MissingTool => (
            &scripts::MISSING_TOOL,
            "Report missing tools",
            vec![("contents", PermissionLevel::Read)],
        ),
        SafeOutputKind::Noop => (
            &scripts::NOOP,
            "No-op",
            vec![("contents", PermissionLevel::Read)],
        ),
        SafeOutputKind::DispatchWorkflow => (
            &scripts::DISPATCH_WORKFLOW,
            "Dispatch workflow",
            vec![("actions", PermissionLevel::Write)],
        ),
        SafeOutputKind::CreateProject => (
            &scripts::CREATE_PROJECT,
            "Create project",
            vec![("repository-projects", PermissionLevel::Write)],
        ),
        SafeOutputKind::UpdateProject => (
            &scripts::UPDATE_PROJECT,
            "Update project",
            vec![("repository-projects", PermissionLevel::Write)],
        ),
        SafeOutputKind::AssignToAgent => (
            &scripts::ASSIGN_TO_AGENT,
            "Assign to agent",
            vec![("issues", PermissionLevel::Write)],
        ),
        SafeOutputKind::CreateAgentTask => (
            &scripts::CREATE_AGENT_TASK,
            "Create agent task",
            vec![("issues", PermissionLevel::Write)],
        ),
        SafeOutputKind::CreateCodeScanningAlert => (
            &scripts::CREATE_CODE_SCANNING_ALERT,
            "Create code scanning alert",
            vec![("security-events", PermissionLevel::Write)],
        ),
    };

    SafeOutputStepConfig {
        kind,
        job_id: kind.job_id(),
        step_name: step_name.to_string(),
        step_id: kind.job_id(),
        script,
        env,
        condition: output_condition(kind),
        token,
        permissions,
        use_agent_token: matches!(kind, SafeOutputKind::CreateAgentTask),
        use_copilot_token: matches!(kind, SafeOutputKind::AssignToAgent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowlock_types::{
        EngineConfig, EngineKind, IfNoChanges, SafeOutputsConfig, TriggerSet,
    };
    use std::path::PathBuf;

    fn data_with(outputs: SafeOutputsConfig) -> WorkflowData {
        WorkflowData {
            name: "Test".to_string(),
            description: None,
            source_path: PathBuf::from("wf.md"),
            on: TriggerSet::default(),
            permissions: Default::default(),
            engine: EngineConfig::new(EngineKind::Copilot),
            tools: Default::default(),
            safe_outputs: outputs,
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
            env: Default::default(),
            concurrency_group: None,
        }
    }

    #[test]
    fn condition_names_the_kind() {
        assert_eq!(
            output_condition(SafeOutputKind::CreateIssue),
            "contains(fromJSON(needs.agent.outputs.output_types), 'create-issue')"
        );
    }

    #[test]
    fn plans_one_config_per_enabled_kind() {
        let mut outputs = SafeOutputsConfig::default();
        outputs
            .entries
            .insert(SafeOutputKind::CreateIssue, Default::default());
        outputs.entries.insert(
            SafeOutputKind::AddComment,
            SafeOutputConfig {
                max: Some(1),
                ..Default::default()
            },
        );
        let plans = plan_all(&data_with(outputs));
        assert_eq!(plans.len(), 2);
        let comment = plans.iter().find(|p| p.kind == SafeOutputKind::AddComment).unwrap();
        assert_eq!(comment.env["FLOWLOCK_MAX_COUNT"], "1");
        assert_eq!(comment.job_id, "add_comment");
    }

    #[test]
    fn token_precedence_prefers_kind_override() {
        let mut outputs = SafeOutputsConfig {
            github_token: Some("${{ secrets.WORKFLOW_PAT }}".to_string()),
            ..Default::default()
        };
        outputs.entries.insert(
            SafeOutputKind::CreateIssue,
            SafeOutputConfig {
                github_token: Some("${{ secrets.KIND_PAT }}".to_string()),
                ..Default::default()
            },
        );
        outputs
            .entries
            .insert(SafeOutputKind::AddComment, Default::default());

        let plans = plan_all(&data_with(outputs));
        let issue = plans.iter().find(|p| p.kind == SafeOutputKind::CreateIssue).unwrap();
        assert_eq!(issue.token, "${{ secrets.KIND_PAT }}");
        let comment = plans.iter().find(|p| p.kind == SafeOutputKind::AddComment).unwrap();
        assert_eq!(comment.token, "${{ secrets.WORKFLOW_PAT }}");
    }

    #[test]
    fn staged_mode_propagates_to_env() {
        let mut outputs = SafeOutputsConfig {
            staged: true,
            ..Default::default()
        };
        outputs
            .entries
            .insert(SafeOutputKind::CreateIssue, Default::default());
        let plans = plan_all(&data_with(outputs));
        assert_eq!(plans[0].env["FLOWLOCK_STAGED"], "true");
    }

    #[test]
    fn if_no_changes_policy_reaches_push_handler() {
        let mut outputs = SafeOutputsConfig::default();
        outputs.entries.insert(
            SafeOutputKind::PushToPullRequestBranch,
            SafeOutputConfig {
                if_no_changes: Some(IfNoChanges::Error),
                ..Default::default()
            },
        );
        let plans = plan_all(&data_with(outputs));
        assert_eq!(plans[0].env["FLOWLOCK_IF_NO_CHANGES"], "error");
        assert!(
            plans[0]
                .permissions
                .contains(&("contents", PermissionLevel::Write))
        );
    }

    #[test]
    fn handler_jobs_get_least_privilege() {
        let mut outputs = SafeOutputsConfig::default();
        outputs
            .entries
            .insert(SafeOutputKind::MissingTool, Default::default());
        let plans = plan_all(&data_with(outputs));
        assert_eq!(
            plans[0].permissions,
            vec![("contents", PermissionLevel::Read)]
        );
    }
}
