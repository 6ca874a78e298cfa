//! Job graph construction.
//!
//! A compiled pipeline always carries an agent job. Around it the builder
//! wires an optional task-gate (`activation`) job, an optional threat
//! `detection` job, and one handler job per enabled safe-output kind. The
//! result is verified acyclic and topologically ordered for emission.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};
use serde_json::Value as JsonValue;

use flowlock_types::{EngineKind, PermissionLevel, RuntimeEcosystem, WorkflowData};

use crate::mcp;
use crate::safe_outputs::{self, SafeOutputStepConfig};
use crate::scripts;

/// Directory the agent job assembles its working files in.
const WORK_DIR: &str = "/tmp/flowlock";
/// The prompt file the engine reads.
const PROMPT_FILE: &str = "/tmp/flowlock/prompt.txt";
/// The safe-output file the engine writes.
const SAFE_OUTPUTS_FILE: &str = "/tmp/flowlock/safe-outputs.jsonl";

/// Default agent job timeout when the source does not set one.
const DEFAULT_AGENT_TIMEOUT_MINUTES: u32 = 20;

/// One emitted step. `raw` passes a user-supplied custom step through
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct Step {
    pub name: Option<String>,
    pub id: Option<String>,
    pub uses: Option<String>,
    pub run: Option<String>,
    pub condition: Option<String>,
    pub with: BTreeMap<String, JsonValue>,
    pub env: BTreeMap<String, String>,
    pub raw: Option<JsonValue>,
}

impl Step {
    fn uses(name: &str, action: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            uses: Some(action.to_string()),
            ..Self::default()
        }
    }

    fn run(name: &str, script: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            run: Some(script.to_string()),
            ..Self::default()
        }
    }

    fn github_script(name: &str, script: &scripts::EmbeddedScript, token: Option<&str>) -> Self {
        let mut with = BTreeMap::new();
        with.insert(
            "script".to_string(),
            JsonValue::String(scripts::full_source(script)),
        );
        if let Some(token) = token {
            with.insert("github-token".to_string(), JsonValue::String(token.to_string()));
        }
        Self {
            name: Some(name.to_string()),
            uses: Some("actions/github-script@v8".to_string()),
            with,
            ..Self::default()
        }
    }
}

/// One emitted job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub name: Option<String>,
    pub needs: Vec<String>,
    pub runs_on: String,
    pub condition: Option<String>,
    pub permissions: Vec<(String, PermissionLevel)>,
    pub timeout_minutes: Option<u32>,
    pub env: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub steps: Vec<Step>,
}

impl Job {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            needs: Vec::new(),
            runs_on: "ubuntu-latest".to_string(),
            condition: None,
            permissions: Vec::new(),
            timeout_minutes: None,
            env: BTreeMap::new(),
            outputs: BTreeMap::new(),
            steps: Vec::new(),
        }
    }
}

/// Build the full job set in emission order.
pub fn build_jobs(data: &WorkflowData) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();

    let gate = data.needs_task_gate().then(|| build_activation_job(data));
    if let Some(gate) = &gate {
        jobs.push(gate.clone());
    }

    jobs.push(build_agent_job(data, gate.as_ref()));

    let detection_enabled = data.safe_outputs.threat_detection;
    if detection_enabled {
        jobs.push(build_detection_job());
    }

    for plan in safe_outputs::plan_all(data) {
        jobs.push(build_handler_job(&plan, detection_enabled));
    }

    topo_order(jobs)
}

fn build_activation_job(data: &WorkflowData) -> Job {
    let mut job = Job::new("activation");
    job.name = Some("Check activation".to_string());
    job.permissions = vec![
        ("contents".to_string(), PermissionLevel::Read),
        ("pull-requests".to_string(), PermissionLevel::Read),
    ];
    job.timeout_minutes = Some(5);
    job.condition = data.if_condition.clone();

    let mut step = Step::github_script("Check activation rules", &scripts::CHECK_ACTIVATION, None);
    step.id = Some("check".to_string());
    if !data.roles.is_empty() {
        step.env
            .insert("FLOWLOCK_REQUIRED_ROLES".to_string(), data.roles.join(","));
    }
    if let Some(command) = &data.on.command {
        step.env
            .insert("FLOWLOCK_COMMAND".to_string(), command.name.clone());
    }
    job.steps.push(step);
    job.outputs.insert(
        "activated".to_string(),
        "${{ steps.check.outputs.activated }}".to_string(),
    );
    job
}

fn build_agent_job(data: &WorkflowData, gate: Option<&Job>) -> Job {
    let mut job = Job::new("agent");
    job.name = Some(data.name.clone());
    if let Some(gate) = gate {
        job.needs.push(gate.id.clone());
        job.condition = Some(format!(
            "needs.{}.outputs.activated == 'true'",
            gate.id
        ));
    }
    job.permissions = data
        .permissions
        .iter()
        .map(|(scope, level)| (scope.clone(), *level))
        .collect();
    job.timeout_minutes = Some(
        data.timeout_minutes
            .unwrap_or(DEFAULT_AGENT_TIMEOUT_MINUTES),
    );
    job.env = data.env.clone();
    job.env
        .insert("FLOWLOCK_PROMPT".to_string(), PROMPT_FILE.to_string());
    job.env.insert(
        "FLOWLOCK_SAFE_OUTPUTS".to_string(),
        SAFE_OUTPUTS_FILE.to_string(),
    );

    let mut checkout = Step::uses("Checkout repository", "actions/checkout@v5");
    checkout.with.insert(
        "persist-credentials".to_string(),
        JsonValue::Bool(false),
    );
    job.steps.push(checkout);

    push_runtime_steps(data, &mut job.steps);
    push_cache_steps(data, &mut job.steps);
    push_prompt_steps(data, &mut job.steps);

    if let Some(manifest) = mcp::manifest(data) {
        job.steps.push(Step::run(
            "Write MCP configuration",
            &format!(
                "mkdir -p {WORK_DIR}\ncat > {} << 'FLOWLOCK_MCP_EOF'\n{}FLOWLOCK_MCP_EOF\n",
                manifest.path,
                ensure_trailing_newline(&manifest.content),
            ),
        ));
    }

    push_engine_steps(data, &mut job.steps);

    let mut collect = Step::github_script("Collect agent output", &scripts::COLLECT_OUTPUT, None);
    collect.id = Some("collect_output".to_string());
    collect.env.insert(
        "FLOWLOCK_AGENT_OUTPUT".to_string(),
        SAFE_OUTPUTS_FILE.to_string(),
    );
    let enabled: Vec<&str> = data
        .safe_outputs
        .entries
        .keys()
        .map(|k| k.as_str())
        .collect();
    if !enabled.is_empty() {
        collect.env.insert(
            "FLOWLOCK_ALLOWED_OUTPUTS".to_string(),
            enabled.join(","),
        );
    }
    job.steps.push(collect);

    let mut upload = Step::uses("Upload agent output", "actions/upload-artifact@v4");
    upload
        .with
        .insert("name".to_string(), JsonValue::String("agent-output".to_string()));
    upload.with.insert(
        "path".to_string(),
        JsonValue::String("agent-output.json".to_string()),
    );
    upload.with.insert(
        "if-no-files-found".to_string(),
        JsonValue::String("ignore".to_string()),
    );
    job.steps.push(upload);

    job.outputs.insert(
        "output".to_string(),
        "${{ steps.collect_output.outputs.output }}".to_string(),
    );
    job.outputs.insert(
        "output_types".to_string(),
        "${{ steps.collect_output.outputs.output_types }}".to_string(),
    );
    job
}

fn push_runtime_steps(data: &WorkflowData, steps: &mut Vec<Step>) {
    let needs_node = data.runtimes.versions.contains_key(&RuntimeEcosystem::Node)
        || data
            .runtimes
            .packages
            .contains_key(&RuntimeEcosystem::Node);
    if needs_node {
        let mut step = Step::uses("Set up Node.js", "actions/setup-node@v4");
        let version = data
            .runtimes
            .versions
            .get(&RuntimeEcosystem::Node)
            .cloned()
            .unwrap_or_else(|| "22".to_string());
        step.with
            .insert("node-version".to_string(), JsonValue::String(version));
        steps.push(step);
    }

    let needs_python = data
        .runtimes
        .versions
        .contains_key(&RuntimeEcosystem::Python)
        || data
            .runtimes
            .packages
            .contains_key(&RuntimeEcosystem::Python);
    if needs_python {
        let mut step = Step::uses("Set up Python", "actions/setup-python@v5");
        let version = data
            .runtimes
            .versions
            .get(&RuntimeEcosystem::Python)
            .cloned()
            .unwrap_or_else(|| "3.13".to_string());
        step.with
            .insert("python-version".to_string(), JsonValue::String(version));
        steps.push(step);
    }

    let needs_uv = data.runtimes.versions.contains_key(&RuntimeEcosystem::Uv)
        || data.runtimes.packages.contains_key(&RuntimeEcosystem::Uv);
    if needs_uv {
        let mut step = Step::uses("Set up uv", "astral-sh/setup-uv@v5");
        if let Some(version) = data.runtimes.versions.get(&RuntimeEcosystem::Uv) {
            step.with
                .insert("version".to_string(), JsonValue::String(version.clone()));
        }
        steps.push(step);
    }
}

fn push_cache_steps(data: &WorkflowData, steps: &mut Vec<Step>) {
    for entry in &data.caches {
        let mut step = Step::uses(
            &format!("Restore cache memory ({})", entry.id),
            "actions/cache@v4",
        );
        step.with.insert(
            "path".to_string(),
            JsonValue::String(format!("{WORK_DIR}/cache-memory/{}", entry.id)),
        );
        let key = entry
            .key
            .clone()
            .unwrap_or_else(|| format!("flowlock-memory-{}-${{{{ github.workflow }}}}", entry.id));
        step.with.insert("key".to_string(), JsonValue::String(key));
        steps.push(step);
    }
}

/// Each chunk lands in a `run:` block at ten spaces of indentation, the
/// overhead the chunker budgets per line.
fn push_prompt_steps(data: &WorkflowData, steps: &mut Vec<Step>) {
    let chunks: Vec<&str> = if data.prompt_chunks.is_empty() {
        vec![data.prompt.as_str()]
    } else {
        data.prompt_chunks.iter().map(String::as_str).collect()
    };

    for (idx, chunk) in chunks.iter().enumerate() {
        let (name, redirect) = if idx == 0 {
            ("Create prompt (part 1)".to_string(), ">")
        } else {
            (format!("Append prompt (part {})", idx + 1), ">>")
        };
        let mut script = String::new();
        if idx == 0 {
            script.push_str(&format!("mkdir -p {WORK_DIR}\n"));
        }
        script.push_str(&format!(
            "cat {redirect} \"$FLOWLOCK_PROMPT\" << 'FLOWLOCK_EOF'\n{}FLOWLOCK_EOF\n",
            ensure_trailing_newline(chunk),
        ));
        steps.push(Step::run(&name, &script));
    }
}

fn push_engine_steps(data: &WorkflowData, steps: &mut Vec<Step>) {
    match data.engine.kind {
        EngineKind::Custom => {
            for raw in &data.custom_steps {
                steps.push(Step {
                    raw: Some(raw.clone()),
                    ..Step::default()
                });
            }
        }
        kind => {
            let mut step = Step::run("Execute agent", engine_command(data, kind));
            step.id = Some("agent_exec".to_string());
            step.env = data.engine.env.clone();
            if let Some(model) = &data.engine.model {
                step.env
                    .insert("FLOWLOCK_MODEL".to_string(), model.clone());
            }
            steps.push(step);
        }
    }
}

fn engine_command(data: &WorkflowData, kind: EngineKind) -> &'static str {
    let has_mcp = mcp::manifest(data).is_some();
    match (kind, has_mcp) {
        (EngineKind::Claude, true) => {
            "claude --print --mcp-config /tmp/flowlock/mcp-servers.json \
             --permission-mode bypassPermissions \"$(cat \"$FLOWLOCK_PROMPT\")\""
        }
        (EngineKind::Claude, false) => {
            "claude --print --permission-mode bypassPermissions \"$(cat \"$FLOWLOCK_PROMPT\")\""
        }
        (EngineKind::Codex, true) => {
            "codex exec --skip-git-repo-check -c model_reasoning_effort=medium \
             --config-file /tmp/flowlock/config.toml \"$(cat \"$FLOWLOCK_PROMPT\")\""
        }
        (EngineKind::Codex, false) => {
            "codex exec --skip-git-repo-check \"$(cat \"$FLOWLOCK_PROMPT\")\""
        }
        (EngineKind::Copilot, true) => {
            "copilot --add-dir /tmp/flowlock --mcp-config /tmp/flowlock/mcp-servers.json \
             --log-level all --prompt \"$(cat \"$FLOWLOCK_PROMPT\")\""
        }
        (EngineKind::Copilot, false) => {
            "copilot --add-dir /tmp/flowlock --log-level all --prompt \"$(cat \"$FLOWLOCK_PROMPT\")\""
        }
        (EngineKind::Custom, _) => unreachable!("custom engines inline their steps"),
    }
}

fn build_detection_job() -> Job {
    let mut job = Job::new("detection");
    job.name = Some("Threat detection".to_string());
    job.needs.push("agent".to_string());
    job.permissions = vec![("contents".to_string(), PermissionLevel::Read)];
    job.timeout_minutes = Some(5);

    let mut download = Step::uses("Download agent output", "actions/download-artifact@v4");
    download
        .with
        .insert("name".to_string(), JsonValue::String("agent-output".to_string()));
    job.steps.push(download);

    let mut scan = Step::github_script("Scan agent output", &scripts::THREAT_DETECTION, None);
    scan.id = Some("scan".to_string());
    scan.env.insert(
        "FLOWLOCK_AGENT_OUTPUT".to_string(),
        "agent-output.json".to_string(),
    );
    job.steps.push(scan);
    job.outputs.insert(
        "verdict".to_string(),
        "${{ steps.scan.outputs.verdict }}".to_string(),
    );
    job
}

fn build_handler_job(plan: &SafeOutputStepConfig, detection_enabled: bool) -> Job {
    let mut job = Job::new(&plan.job_id);
    job.name = Some(plan.step_name.clone());
    job.needs.push("agent".to_string());
    if detection_enabled {
        job.needs.push("detection".to_string());
    }
    job.condition = Some(plan.condition.clone());
    job.permissions = plan
        .permissions
        .iter()
        .map(|(scope, level)| (scope.to_string(), *level))
        .collect();
    job.timeout_minutes = Some(10);

    let mut download = Step::uses("Download agent output", "actions/download-artifact@v4");
    download
        .with
        .insert("name".to_string(), JsonValue::String("agent-output".to_string()));
    job.steps.push(download);

    let mut handler = Step::github_script(&plan.step_name, plan.script, Some(&plan.token));
    handler.id = Some(plan.step_id.clone());
    handler.env = plan.env.clone();
    job.steps.push(handler);
    job
}

/// Kahn's algorithm with a deterministic ready set, so emission order is a
/// stable topological order. Rejects cycles and dangling `needs` edges.
pub fn topo_order(jobs: Vec<Job>) -> Result<Vec<Job>> {
    let ids: BTreeSet<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
    for job in &jobs {
        for need in &job.needs {
            if !ids.contains(need.as_str()) {
                bail!("job `{}` needs unknown job `{need}`", job.id);
            }
        }
    }

    let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for job in &jobs {
        indegree.insert(&job.id, job.needs.len());
        for need in &job.needs {
            dependents.entry(need).or_default().push(&job.id);
        }
    }

    // Preserve builder order among ready jobs for stable output.
    let order: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
    let mut result_ids: Vec<String> = Vec::with_capacity(jobs.len());
    let mut remaining = indegree.clone();
    while result_ids.len() < jobs.len() {
        let next = order
            .iter()
            .find(|id| remaining.get(*id).is_some_and(|deg| *deg == 0));
        let Some(&id) = next else {
            let stuck: Vec<&str> = remaining
                .iter()
                .filter(|(_, deg)| **deg > 0)
                .map(|(id, _)| *id)
                .collect();
            bail!("job dependency cycle involving: {}", stuck.join(", "));
        };
        remaining.remove(id);
        result_ids.push(id.to_string());
        if let Some(deps) = dependents.get(id) {
            for dep in deps {
                if let Some(deg) = remaining.get_mut(dep) {
                    *deg = deg.saturating_sub(1);
                }
            }
        }
    }

    let mut by_id: BTreeMap<String, Job> = jobs.into_iter().map(|j| (j.id.clone(), j)).collect();
    Ok(result_ids
        .into_iter()
        .map(|id| by_id.remove(&id).expect("ordered id exists"))
        .collect())
}

fn ensure_trailing_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}
