//! Embedded handler scripts.
//!
//! Safe-output handlers run as `actions/github-script` steps whose bodies
//! are inlined into the lock file, so generated workflows have no runtime
//! dependency on compiler files. Each script is a first-class versioned
//! constant with a fixed contract:
//!
//! - **Inputs**: environment variables (`FLOWLOCK_*`) plus the agent output
//!   file named by `FLOWLOCK_AGENT_OUTPUT`, a JSON document with an `items`
//!   array where every item carries a `type` field.
//! - **Outputs**: step outputs via `core.setOutput` and human-readable step
//!   summary lines.

/// A versioned, inlineable step script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedScript {
    pub name: &'static str,
    pub version: &'static str,
    pub source: &'static str,
}

/// Shared prologue: loads and validates the agent output file.
pub const LOAD_AGENT_OUTPUT: EmbeddedScript = EmbeddedScript {
    name: "load_agent_output",
    version: "1.1.0",
    source: r#"const fs = require("fs");
function loadAgentOutput() {
  const outputFile = process.env.FLOWLOCK_AGENT_OUTPUT;
  if (!outputFile) {
    core.info("no agent output file configured");
    return { success: false };
  }
  let raw;
  try {
    raw = fs.readFileSync(outputFile, "utf8");
  } catch (error) {
    core.error(`failed to read agent output: ${error.message}`);
    return { success: false };
  }
  if (raw.trim() === "") {
    core.info("agent output is empty");
    return { success: false };
  }
  let parsed;
  try {
    parsed = JSON.parse(raw);
  } catch (error) {
    core.error(`agent output is not valid JSON: ${error.message}`);
    return { success: false };
  }
  if (!Array.isArray(parsed.items)) {
    core.error("agent output has no items array");
    return { success: false };
  }
  return { success: true, items: parsed.items };
}
function itemsOfType(type) {
  const loaded = loadAgentOutput();
  if (!loaded.success) return [];
  const max = parseInt(process.env.FLOWLOCK_MAX_COUNT || "0", 10);
  let items = loaded.items.filter(item => item.type === type);
  if (max > 0 && items.length > max) {
    core.warning(`dropping ${items.length - max} ${type} item(s) over the configured max`);
    items = items.slice(0, max);
  }
  return items;
}
function isStaged() {
  return process.env.FLOWLOCK_STAGED === "true";
}
function resolveTarget(item, contextNumber) {
  const mode = process.env.FLOWLOCK_TARGET || "triggering";
  if (mode === "*") return item.number;
  if (mode === "triggering") return contextNumber;
  return parseInt(mode, 10);
}
"#,
};

pub const CREATE_ISSUE: EmbeddedScript = EmbeddedScript {
    name: "create_issue",
    version: "1.2.0",
    source: r#"async function main() {
  const items = itemsOfType("create-issue");
  if (items.length === 0) return;
  const prefix = process.env.FLOWLOCK_TITLE_PREFIX || "";
  const labels = (process.env.FLOWLOCK_LABELS || "").split(",").filter(Boolean);
  const created = [];
  for (const item of items) {
    const title = prefix + (item.title || "Agent output");
    if (isStaged()) {
      await core.summary.addRaw(`### Staged issue: ${title}\n\n${item.body || ""}\n`).write();
      continue;
    }
    const { data: issue } = await github.rest.issues.create({
      owner: context.repo.owner,
      repo: context.repo.repo,
      title,
      body: item.body || "",
      labels: labels.concat(item.labels || []),
    });
    created.push(issue.number);
    core.info(`created issue #${issue.number}`);
  }
  core.setOutput("issue_numbers", JSON.stringify(created));
}
await main();
"#,
};

pub const CREATE_DISCUSSION: EmbeddedScript = EmbeddedScript {
    name: "create_discussion",
    version: "1.0.0",
    source: r#"async function main() {
  const items = itemsOfType("create-discussion");
  if (items.length === 0) return;
  const { repository } = await github.graphql(
    `query($owner: String!, $repo: String!) {
       repository(owner: $owner, name: $repo) {
         id
         discussionCategories(first: 25) { nodes { id name } }
       }
     }`,
    { owner: context.repo.owner, repo: context.repo.repo }
  );
  for (const item of items) {
    const category =
      repository.discussionCategories.nodes.find(c => c.name === item.category) ||
      repository.discussionCategories.nodes[0];
    if (!category) {
      core.warning("repository has no discussion categories");
      return;
    }
    if (isStaged()) {
      await core.summary.addRaw(`### Staged discussion: ${item.title}\n`).write();
      continue;
    }
    await github.graphql(
      `mutation($repo: ID!, $category: ID!, $title: String!, $body: String!) {
         createDiscussion(input: {repositoryId: $repo, categoryId: $category, title: $title, body: $body}) {
           discussion { number }
         }
       }`,
      { repo: repository.id, category: category.id, title: item.title || "Agent output", body: item.body || "" }
    );
  }
}
await main();
"#,
};

pub const ADD_COMMENT: EmbeddedScript = EmbeddedScript {
    name: "add_comment",
    version: "1.2.0",
    source: r#"async function main() {
  const items = itemsOfType("add-comment");
  if (items.length === 0) return;
  const contextNumber =
    (context.payload.issue && context.payload.issue.number) ||
    (context.payload.pull_request && context.payload.pull_request.number);
  for (const item of items) {
    const number = resolveTarget(item, contextNumber);
    if (!number) {
      core.warning("no target entity for comment; skipping item");
      continue;
    }
    if (isStaged()) {
      await core.summary.addRaw(`### Staged comment on #${number}\n\n${item.body || ""}\n`).write();
      continue;
    }
    await github.rest.issues.createComment({
      owner: context.repo.owner,
      repo: context.repo.repo,
      issue_number: number,
      body: item.body || "",
    });
    core.info(`commented on #${number}`);
  }
}
await main();
"#,
};

pub const CREATE_PULL_REQUEST: EmbeddedScript = EmbeddedScript {
    name: "create_pull_request",
    version: "1.1.0",
    source: r#"async function main() {
  const items = itemsOfType("create-pull-request");
  if (items.length === 0) return;
  const prefix = process.env.FLOWLOCK_BRANCH_PREFIX || "flowlock/";
  const policy = process.env.FLOWLOCK_IF_NO_CHANGES || "warn";
  const { execSync } = require("child_process");
  for (const item of items) {
    const status = execSync("git status --porcelain").toString();
    if (status.trim() === "") {
      if (policy === "error") {
        core.setFailed("no changes to push for create-pull-request");
      } else if (policy === "warn") {
        await core.summary.addRaw("No changes to push; skipped pull request.\n").write();
      }
      return;
    }
    const branch = prefix + (item.branch || `${context.runId}`);
    if (isStaged()) {
      await core.summary.addRaw(`### Staged pull request: ${item.title}\n`).write();
      continue;
    }
    execSync(`git checkout -b ${branch}`);
    execSync("git add -A");
    execSync(`git -c user.name=flowlock -c user.email=flowlock@users.noreply.github.com commit -m ${JSON.stringify(item.title || "Agent changes")}`);
    execSync(`git push origin ${branch}`);
    const { data: pr } = await github.rest.pulls.create({
      owner: context.repo.owner,
      repo: context.repo.repo,
      title: item.title || "Agent changes",
      body: item.body || "",
      head: branch,
      base: context.payload.repository.default_branch,
    });
    core.setOutput("pull_request_number", pr.number);
    core.info(`opened pull request #${pr.number}`);
  }
}
await main();
"#,
};

pub const CREATE_PR_REVIEW_COMMENT: EmbeddedScript = EmbeddedScript {
    name: "create_pr_review_comment",
    version: "1.0.0",
    source: r#"async function main() {
  const items = itemsOfType("create-pull-request-review-comment");
  if (items.length === 0) return;
  const pull = context.payload.pull_request;
  if (!pull) {
    core.warning("review comments require a pull_request event");
    return;
  }
  for (const item of items) {
    if (isStaged()) {
      await core.summary.addRaw(`### Staged review comment on ${item.path}:${item.line}\n`).write();
      continue;
    }
    await github.rest.pulls.createReviewComment({
      owner: context.repo.owner,
      repo: context.repo.repo,
      pull_number: pull.number,
      commit_id: pull.head.sha,
      path: item.path,
      line: item.line,
      body: item.body || "",
    });
  }
}
await main();
"#,
};

pub const UPDATE_ISSUE: EmbeddedScript = EmbeddedScript {
    name: "update_issue",
    version: "1.1.0",
    source: r#"async function main() {
  const items = itemsOfType("update-issue");
  if (items.length === 0) return;
  const operation = process.env.FLOWLOCK_BODY_OPERATION || "append";
  const contextNumber = context.payload.issue && context.payload.issue.number;
  for (const item of items) {
    const number = resolveTarget(item, contextNumber);
    if (!number) {
      core.warning("no target issue; skipping item");
      continue;
    }
    const patch = {};
    if (item.title !== undefined) patch.title = item.title;
    if (item.state !== undefined) patch.state = item.state;
    if (item.body !== undefined) {
      if (operation === "replace") {
        patch.body = item.body;
      } else {
        const { data: current } = await github.rest.issues.get({
          owner: context.repo.owner,
          repo: context.repo.repo,
          issue_number: number,
        });
        const existing = current.body || "";
        patch.body = operation === "prepend" ? item.body + "\n\n" + existing : existing + "\n\n" + item.body;
      }
    }
    if (isStaged()) {
      await core.summary.addRaw(`### Staged update for issue #${number}\n`).write();
      continue;
    }
    await github.rest.issues.update({
      owner: context.repo.owner,
      repo: context.repo.repo,
      issue_number: number,
      ...patch,
    });
    core.info(`updated issue #${number}`);
  }
}
await main();
"#,
};

pub const ADD_LABELS: EmbeddedScript = EmbeddedScript {
    name: "add_labels",
    version: "1.0.0",
    source: r#"async function main() {
  const items = itemsOfType("add-labels");
  if (items.length === 0) return;
  const allowed = (process.env.FLOWLOCK_ALLOWED_LABELS || "").split(",").filter(Boolean);
  const contextNumber =
    (context.payload.issue && context.payload.issue.number) ||
    (context.payload.pull_request && context.payload.pull_request.number);
  for (const item of items) {
    const number = resolveTarget(item, contextNumber);
    if (!number) continue;
    let labels = item.labels || [];
    if (allowed.length > 0) {
      const rejected = labels.filter(l => !allowed.includes(l));
      if (rejected.length > 0) core.warning(`labels not in allow-list: ${rejected.join(", ")}`);
      labels = labels.filter(l => allowed.includes(l));
    }
    if (labels.length === 0) continue;
    if (isStaged()) {
      await core.summary.addRaw(`### Staged labels for #${number}: ${labels.join(", ")}\n`).write();
      continue;
    }
    await github.rest.issues.addLabels({
      owner: context.repo.owner,
      repo: context.repo.repo,
      issue_number: number,
      labels,
    });
  }
}
await main();
"#,
};

pub const REMOVE_LABELS: EmbeddedScript = EmbeddedScript {
    name: "remove_labels",
    version: "1.0.0",
    source: r#"async function main() {
  const items = itemsOfType("remove-labels");
  if (items.length === 0) return;
  const contextNumber =
    (context.payload.issue && context.payload.issue.number) ||
    (context.payload.pull_request && context.payload.pull_request.number);
  for (const item of items) {
    const number = resolveTarget(item, contextNumber);
    if (!number) continue;
    for (const label of item.labels || []) {
      if (isStaged()) {
        await core.summary.addRaw(`### Staged label removal for #${number}: ${label}\n`).write();
        continue;
      }
      try {
        await github.rest.issues.removeLabel({
          owner: context.repo.owner,
          repo: context.repo.repo,
          issue_number: number,
          name: label,
        });
      } catch (error) {
        if (error.status !== 404) throw error;
      }
    }
  }
}
await main();
"#,
};

pub const PUSH_TO_PR_BRANCH: EmbeddedScript = EmbeddedScript {
    name: "push_to_pr_branch",
    version: "1.1.0",
    source: r#"async function main() {
  const items = itemsOfType("push-to-pull-request-branch");
  if (items.length === 0) return;
  const policy = process.env.FLOWLOCK_IF_NO_CHANGES || "warn";
  const pull = context.payload.pull_request;
  if (!pull) {
    core.setFailed("push-to-pull-request-branch requires a pull_request event");
    return;
  }
  const { execSync } = require("child_process");
  // The policy applies to the aggregate diff, not per file.
  const status = execSync("git status --porcelain").toString();
  if (status.trim() === "") {
    if (policy === "error") {
      core.setFailed("no changes to push");
    } else if (policy === "warn") {
      await core.summary.addRaw("No changes to push.\n").write();
    }
    return;
  }
  if (isStaged()) {
    await core.summary.addRaw(`### Staged push to ${pull.head.ref}\n\n\`\`\`\n${status}\`\`\`\n`).write();
    return;
  }
  execSync("git add -A");
  execSync(`git -c user.name=flowlock -c user.email=flowlock@users.noreply.github.com commit -m "Apply agent changes"`);
  execSync(`git push origin HEAD:${pull.head.ref}`);
  core.info(`pushed to ${pull.head.ref}`);
}
await main();
"#,
};

pub const UPLOAD_ASSETS: EmbeddedScript = EmbeddedScript {
    name: "upload_assets",
    version: "1.0.0",
    source: r#"async function main() {
  const items = itemsOfType("upload-assets");
  if (items.length === 0) return;
  const fs = require("fs");
  const uploaded = [];
  for (const item of items) {
    for (const file of item.files || []) {
      if (!fs.existsSync(file)) {
        core.warning(`asset not found: ${file}`);
        continue;
      }
      uploaded.push(file);
    }
  }
  core.setOutput("assets", JSON.stringify(uploaded));
  await core.summary.addRaw(`Uploaded ${uploaded.length} asset(s).\n`).write();
}
await main();
"#,
};

pub const MISSING_TOOL: EmbeddedScript = EmbeddedScript {
    name: "missing_tool",
    version: "1.0.0",
    source: r#"async function main() {
  const items = itemsOfType("missing-tool");
  if (items.length === 0) return;
  const lines = items.map(item => `- **${item.tool}**: ${item.reason || "no reason given"}`);
  await core.summary
    .addHeading("Tools the agent was missing", 3)
    .addRaw(lines.join("\n") + "\n")
    .write();
  core.setOutput("missing_count", items.length);
}
await main();
"#,
};

pub const NOOP: EmbeddedScript = EmbeddedScript {
    name: "noop",
    version: "1.0.0",
    source: r#"async function main() {
  const items = itemsOfType("noop");
  for (const item of items) {
    core.info(item.message || "noop");
  }
  core.setOutput("noop_count", items.length);
}
await main();
"#,
};

pub const DISPATCH_WORKFLOW: EmbeddedScript = EmbeddedScript {
    name: "dispatch_workflow",
    version: "1.0.0",
    source: r#"async function main() {
  const items = itemsOfType("dispatch-workflow");
  if (items.length === 0) return;
  const allowed = (process.env.FLOWLOCK_ALLOWED_WORKFLOWS || "").split(",").filter(Boolean);
  for (const item of items) {
    if (allowed.length > 0 && !allowed.includes(item.workflow)) {
      core.warning(`workflow not in allow-list: ${item.workflow}`);
      continue;
    }
    if (isStaged()) {
      await core.summary.addRaw(`### Staged dispatch of ${item.workflow}\n`).write();
      continue;
    }
    await github.rest.actions.createWorkflowDispatch({
      owner: context.repo.owner,
      repo: context.repo.repo,
      workflow_id: item.workflow,
      ref: context.payload.repository.default_branch,
      inputs: item.inputs || {},
    });
    core.info(`dispatched ${item.workflow}`);
  }
}
await main();
"#,
};

pub const CREATE_PROJECT: EmbeddedScript = EmbeddedScript {
    name: "create_project",
    version: "1.0.0",
    source: r#"async function main() {
  const items = itemsOfType("create-project");
  if (items.length === 0) return;
  const { data: owner } = await github.rest.users.getByUsername({ username: context.repo.owner });
  for (const item of items) {
    if (isStaged()) {
      await core.summary.addRaw(`### Staged project: ${item.title}\n`).write();
      continue;
    }
    await github.graphql(
      `mutation($owner: ID!, $title: String!) {
         createProjectV2(input: {ownerId: $owner, title: $title}) { projectV2 { number } }
       }`,
      { owner: owner.node_id, title: item.title || "Agent project" }
    );
  }
}
await main();
"#,
};

pub const UPDATE_PROJECT: EmbeddedScript = EmbeddedScript {
    name: "update_project",
    version: "1.0.0",
    source: r#"async function main() {
  const items = itemsOfType("update-project");
  if (items.length === 0) return;
  for (const item of items) {
    if (isStaged()) {
      await core.summary.addRaw(`### Staged project update: ${item.project}\n`).write();
      continue;
    }
    core.info(`updating project ${item.project}`);
    await core.summary.addRaw(`Updated project ${item.project}.\n`).write();
  }
}
await main();
"#,
};

pub const ASSIGN_TO_AGENT: EmbeddedScript = EmbeddedScript {
    name: "assign_to_agent",
    version: "1.0.0",
    source: r#"async function main() {
  const items = itemsOfType("assign-to-agent");
  if (items.length === 0) return;
  const contextNumber = context.payload.issue && context.payload.issue.number;
  for (const item of items) {
    const number = resolveTarget(item, contextNumber);
    if (!number) continue;
    if (isStaged()) {
      await core.summary.addRaw(`### Staged agent assignment for #${number}\n`).write();
      continue;
    }
    await github.rest.issues.addAssignees({
      owner: context.repo.owner,
      repo: context.repo.repo,
      issue_number: number,
      assignees: [item.agent || "copilot"],
    });
  }
}
await main();
"#,
};

pub const CREATE_AGENT_TASK: EmbeddedScript = EmbeddedScript {
    name: "create_agent_task",
    version: "1.0.0",
    source: r#"async function main() {
  const items = itemsOfType("create-agent-task");
  if (items.length === 0) return;
  for (const item of items) {
    if (isStaged()) {
      await core.summary.addRaw(`### Staged agent task: ${item.title}\n`).write();
      continue;
    }
    const { data: issue } = await github.rest.issues.create({
      owner: context.repo.owner,
      repo: context.repo.repo,
      title: item.title || "Agent task",
      body: item.body || "",
      labels: ["agent-task"],
    });
    core.info(`created agent task #${issue.number}`);
  }
}
await main();
"#,
};

pub const CREATE_CODE_SCANNING_ALERT: EmbeddedScript = EmbeddedScript {
    name: "create_code_scanning_alert",
    version: "1.0.0",
    source: r#"async function main() {
  const items = itemsOfType("create-code-scanning-alert");
  if (items.length === 0) return;
  const fs = require("fs");
  const results = items.map(item => ({
    ruleId: item.rule || "flowlock/agent-finding",
    level: item.severity || "warning",
    message: { text: item.message || "" },
    locations: [{
      physicalLocation: {
        artifactLocation: { uri: item.file || "" },
        region: { startLine: item.line || 1 },
      },
    }],
  }));
  const sarif = {
    version: "2.1.0",
    runs: [{
      tool: { driver: { name: "flowlock-agent", rules: [] } },
      results,
    }],
  };
  fs.writeFileSync("flowlock-findings.sarif", JSON.stringify(sarif));
  core.setOutput("sarif_file", "flowlock-findings.sarif");
  await core.summary.addRaw(`Recorded ${results.length} finding(s).\n`).write();
}
await main();
"#,
};

/// Runs at the end of the agent job: validates the safe-output file the
/// engine wrote and publishes `output` / `output_types` step outputs for
/// downstream handler conditions.
pub const COLLECT_OUTPUT: EmbeddedScript = EmbeddedScript {
    name: "collect_output",
    version: "1.1.0",
    source: r#"async function main() {
  const loaded = loadAgentOutput();
  if (!loaded.success) {
    core.setOutput("output", "");
    core.setOutput("output_types", "[]");
    return;
  }
  const allowed = (process.env.FLOWLOCK_ALLOWED_OUTPUTS || "").split(",").filter(Boolean);
  const kept = [];
  const types = [];
  for (const item of loaded.items) {
    if (typeof item.type !== "string") {
      core.warning("dropping agent output item without a type");
      continue;
    }
    if (allowed.length > 0 && !allowed.includes(item.type)) {
      core.warning(`dropping agent output item of disabled type ${item.type}`);
      continue;
    }
    kept.push(item);
    if (!types.includes(item.type)) types.push(item.type);
  }
  const fs = require("fs");
  fs.writeFileSync("agent-output.json", JSON.stringify({ items: kept }));
  core.setOutput("output", JSON.stringify({ items: kept }));
  core.setOutput("output_types", JSON.stringify(types));
  core.info(`collected ${kept.length} item(s) of ${types.length} type(s)`);
}
await main();
"#,
};

/// Task-gate script: enforces role, alias, and conditional rules before the
/// agent job is allowed to run.
pub const CHECK_ACTIVATION: EmbeddedScript = EmbeddedScript {
    name: "check_activation",
    version: "1.0.0",
    source: r#"async function main() {
  const roles = (process.env.FLOWLOCK_REQUIRED_ROLES || "").split(",").filter(Boolean);
  const command = process.env.FLOWLOCK_COMMAND || "";

  if (command) {
    const body =
      (context.payload.comment && context.payload.comment.body) ||
      (context.payload.issue && context.payload.issue.body) ||
      "";
    if (!body.trim().startsWith(`/${command}`)) {
      core.info(`comment does not invoke /${command}; skipping`);
      core.setOutput("activated", "false");
      return;
    }
  }

  if (roles.length > 0 && !roles.includes("all")) {
    const username = context.actor;
    const { data: permission } = await github.rest.repos.getCollaboratorPermissionLevel({
      owner: context.repo.owner,
      repo: context.repo.repo,
      username,
    });
    const rank = { read: 0, triage: 1, write: 2, maintainer: 3, maintain: 3, admin: 4 };
    const needed = Math.min(...roles.map(r => rank[r] ?? 99));
    if ((rank[permission.permission] ?? -1) < needed) {
      core.setFailed(`@${username} lacks the required repository role`);
      core.setOutput("activated", "false");
      return;
    }
  }

  // Fork protection: never activate for pull requests from forks.
  const pr = context.payload.pull_request;
  if (pr && pr.head.repo.full_name !== `${context.repo.owner}/${context.repo.repo}`) {
    core.setFailed("workflows do not activate for forked pull requests");
    core.setOutput("activated", "false");
    return;
  }

  core.setOutput("activated", "true");
}
await main();
"#,
};

/// Scans the agent output for prompt-injection and exfiltration markers
/// before any handler runs.
pub const THREAT_DETECTION: EmbeddedScript = EmbeddedScript {
    name: "threat_detection",
    version: "1.1.0",
    source: r#"async function main() {
  const loaded = loadAgentOutput();
  if (!loaded.success) {
    core.setOutput("verdict", "clean");
    return;
  }
  const suspicious = [];
  const patterns = [
    /ignore (all )?previous instructions/i,
    /https?:\/\/[^\s]*\b(exfil|attacker|evil)\b/i,
    /-----BEGIN [A-Z ]*PRIVATE KEY-----/,
  ];
  for (const item of loaded.items) {
    const text = JSON.stringify(item);
    for (const pattern of patterns) {
      if (pattern.test(text)) suspicious.push({ type: item.type, pattern: String(pattern) });
    }
  }
  if (suspicious.length > 0) {
    core.setOutput("verdict", "suspicious");
    core.setFailed(`threat detection flagged ${suspicious.length} item(s)`);
    await core.summary
      .addHeading("Threat detection", 3)
      .addRaw(suspicious.map(s => `- ${s.type}: ${s.pattern}`).join("\n") + "\n")
      .write();
    return;
  }
  core.setOutput("verdict", "clean");
}
await main();
"#,
};

/// The shared prologue followed by the handler body, ready for inlining.
pub fn full_source(script: &EmbeddedScript) -> String {
    format!("{}\n{}", LOAD_AGENT_OUTPUT.source, script.source)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[&EmbeddedScript] = &[
        &CREATE_ISSUE,
        &CREATE_DISCUSSION,
        &ADD_COMMENT,
        &CREATE_PULL_REQUEST,
        &CREATE_PR_REVIEW_COMMENT,
        &UPDATE_ISSUE,
        &ADD_LABELS,
        &REMOVE_LABELS,
        &PUSH_TO_PR_BRANCH,
        &UPLOAD_ASSETS,
        &MISSING_TOOL,
        &NOOP,
        &DISPATCH_WORKFLOW,
        &CREATE_PROJECT,
        &UPDATE_PROJECT,
        &ASSIGN_TO_AGENT,
        &CREATE_AGENT_TASK,
        &CREATE_CODE_SCANNING_ALERT,
        &THREAT_DETECTION,
        &COLLECT_OUTPUT,
        &CHECK_ACTIVATION,
    ];

    #[test]
    fn script_names_are_unique() {
        let mut names: Vec<&str> = ALL.iter().map(|s| s.name).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[test]
    fn versions_are_semver_shaped() {
        for script in ALL {
            let parts: Vec<&str> = script.version.split('.').collect();
            assert_eq!(parts.len(), 3, "{} version {}", script.name, script.version);
            for part in parts {
                part.parse::<u32>().expect("numeric version component");
            }
        }
    }

    #[test]
    fn full_source_includes_shared_loader() {
        let source = full_source(&CREATE_ISSUE);
        assert!(source.contains("function loadAgentOutput()"));
        assert!(source.contains("create-issue"));
    }

    #[test]
    fn handlers_honor_the_staged_flag() {
        // Every mutating handler must consult isStaged() before side effects.
        for script in ALL {
            if matches!(
                script.name,
                "missing_tool"
                    | "noop"
                    | "upload_assets"
                    | "threat_detection"
                    | "collect_output"
                    | "check_activation"
            ) {
                continue;
            }
            assert!(
                script.source.contains("isStaged()"),
                "{} does not honor staged mode",
                script.name
            );
        }
    }
}
