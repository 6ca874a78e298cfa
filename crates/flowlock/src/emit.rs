//! Deterministic YAML emission.
//!
//! The lock file is the compiler's contract with the CI platform, so the
//! writer is hand-rolled: key order is fixed by the emitter, indentation is
//! two spaces, and strings are quoted only where YAML would otherwise
//! reinterpret them (cron expressions, bool lookalikes, leading
//! indicators). Output is written atomically via a temp file and rename.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;

use flowlock_types::{PermissionLevel, WorkflowData};

use crate::jobs::{Job, Step};

/// An ordered YAML value. Maps preserve insertion order; the emitter is
/// responsible for choosing a stable one.
#[derive(Debug, Clone, PartialEq)]
pub enum Yaml {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Seq(Vec<Yaml>),
    Map(Vec<(String, Yaml)>),
}

impl Yaml {
    pub fn str(s: impl Into<String>) -> Self {
        Yaml::Str(s.into())
    }

    fn is_empty_collection(&self) -> bool {
        matches!(self, Yaml::Seq(v) if v.is_empty()) || matches!(self, Yaml::Map(m) if m.is_empty())
    }
}

/// Lower opaque JSON (custom steps, trigger configs) into the ordered tree.
/// JSON object keys arrive already sorted, which keeps output stable.
pub fn json_to_yaml(value: &JsonValue) -> Yaml {
    match value {
        JsonValue::Null => Yaml::Null,
        JsonValue::Bool(b) => Yaml::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Yaml::Int(i),
            None => Yaml::Str(n.to_string()),
        },
        JsonValue::String(s) => Yaml::Str(s.clone()),
        JsonValue::Array(items) => Yaml::Seq(items.iter().map(json_to_yaml).collect()),
        JsonValue::Object(map) => Yaml::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_yaml(v)))
                .collect(),
        ),
    }
}

/// Render a document whose root is a mapping.
pub fn render(root: &Yaml) -> String {
    let mut out = String::new();
    match root {
        Yaml::Map(entries) => write_map(entries, 0, &mut out),
        other => write_value(other, 0, &mut out),
    }
    out
}

fn pad(indent: usize) -> String {
    " ".repeat(indent)
}

fn write_map(entries: &[(String, Yaml)], indent: usize, out: &mut String) {
    for (key, value) in entries {
        let rendered_key = render_key(key);
        match value {
            Yaml::Null => out.push_str(&format!("{}{rendered_key}:\n", pad(indent))),
            Yaml::Bool(b) => out.push_str(&format!("{}{rendered_key}: {b}\n", pad(indent))),
            Yaml::Int(i) => out.push_str(&format!("{}{rendered_key}: {i}\n", pad(indent))),
            Yaml::Str(s) if s.contains('\n') => {
                let header = if s.ends_with('\n') { "|" } else { "|-" };
                out.push_str(&format!("{}{rendered_key}: {header}\n", pad(indent)));
                write_block_lines(s, indent + 2, out);
            }
            Yaml::Str(s) => {
                out.push_str(&format!("{}{rendered_key}: {}\n", pad(indent), render_scalar(s)))
            }
            collection if collection.is_empty_collection() => {
                let literal = if matches!(collection, Yaml::Seq(_)) { "[]" } else { "{}" };
                out.push_str(&format!("{}{rendered_key}: {literal}\n", pad(indent)));
            }
            Yaml::Seq(items) => {
                out.push_str(&format!("{}{rendered_key}:\n", pad(indent)));
                write_seq(items, indent + 2, out);
            }
            Yaml::Map(nested) => {
                out.push_str(&format!("{}{rendered_key}:\n", pad(indent)));
                write_map(nested, indent + 2, out);
            }
        }
    }
}

fn write_value(value: &Yaml, indent: usize, out: &mut String) {
    match value {
        Yaml::Null => out.push_str("null\n"),
        Yaml::Bool(b) => out.push_str(&format!("{b}\n")),
        Yaml::Int(i) => out.push_str(&format!("{i}\n")),
        Yaml::Str(s) if s.contains('\n') => {
            let header = if s.ends_with('\n') { "|" } else { "|-" };
            out.push_str(&format!("{header}\n"));
            write_block_lines(s, indent + 2, out);
        }
        Yaml::Str(s) => out.push_str(&format!("{}\n", render_scalar(s))),
        collection if collection.is_empty_collection() => {
            let literal = if matches!(collection, Yaml::Seq(_)) { "[]" } else { "{}" };
            out.push_str(&format!("{literal}\n"));
        }
        Yaml::Seq(items) => write_seq(items, indent, out),
        Yaml::Map(entries) => write_map(entries, indent, out),
    }
}

fn write_seq(items: &[Yaml], indent: usize, out: &mut String) {
    for item in items {
        match item {
            Yaml::Null => out.push_str(&format!("{}-\n", pad(indent))),
            Yaml::Bool(b) => out.push_str(&format!("{}- {b}\n", pad(indent))),
            Yaml::Int(i) => out.push_str(&format!("{}- {i}\n", pad(indent))),
            Yaml::Str(s) if s.contains('\n') => {
                let header = if s.ends_with('\n') { "|" } else { "|-" };
                out.push_str(&format!("{}- {header}\n", pad(indent)));
                write_block_lines(s, indent + 2, out);
            }
            Yaml::Str(s) => out.push_str(&format!("{}- {}\n", pad(indent), render_scalar(s))),
            collection if collection.is_empty_collection() => {
                let literal = if matches!(collection, Yaml::Seq(_)) { "[]" } else { "{}" };
                out.push_str(&format!("{}- {literal}\n", pad(indent)));
            }
            Yaml::Map(entries) => {
                // Compact form: the first entry shares the dash line.
                let mut nested = String::new();
                write_map(entries, indent + 2, &mut nested);
                let prefix = pad(indent + 2);
                let replaced = format!("{}- {}", pad(indent), &nested[prefix.len()..]);
                out.push_str(&replaced);
            }
            Yaml::Seq(nested_items) => {
                let mut nested = String::new();
                write_seq(nested_items, indent + 2, &mut nested);
                let prefix = pad(indent + 2);
                let replaced = format!("{}- {}", pad(indent), &nested[prefix.len()..]);
                out.push_str(&replaced);
            }
        }
    }
}

fn write_block_lines(content: &str, indent: usize, out: &mut String) {
    for line in content.trim_end_matches('\n').split('\n') {
        if line.is_empty() {
            out.push('\n');
        } else {
            out.push_str(&format!("{}{line}\n", pad(indent)));
        }
    }
}

/// YAML 1.1 scalars the platform would reinterpret if left bare.
const BOOL_LOOKALIKES: &[&str] = &[
    "true", "false", "True", "False", "TRUE", "FALSE", "yes", "no", "Yes", "No", "YES", "NO",
    "on", "off", "On", "Off", "ON", "OFF", "null", "Null", "NULL", "~",
];

fn render_key(key: &str) -> String {
    if needs_quotes(key) || BOOL_LOOKALIKES.contains(&key) {
        quote(key)
    } else {
        key.to_string()
    }
}

fn render_scalar(s: &str) -> String {
    if needs_quotes(s) {
        quote(s)
    } else {
        s.to_string()
    }
}

fn needs_quotes(s: &str) -> bool {
    if s.is_empty() {
        return true;
    }
    if s.trim() != s {
        return true;
    }
    if BOOL_LOOKALIKES.contains(&s) {
        return true;
    }
    if s.parse::<i64>().is_ok() || s.parse::<f64>().is_ok() {
        return true;
    }
    let first = s.chars().next().expect("non-empty");
    if "-?:#&*!|>%@`\"'{}[],".contains(first) {
        return true;
    }
    // Cron expressions and glob patterns read better (and safer) quoted.
    if s.contains('*') {
        return true;
    }
    if s.contains(": ") || s.ends_with(':') || s.contains(" #") {
        return true;
    }
    s.chars().any(|c| c.is_control() || c == '\t')
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ---------------------------------------------------------------------------
// Lock document assembly

fn permissions_yaml(permissions: &[(String, PermissionLevel)]) -> Yaml {
    Yaml::Map(
        permissions
            .iter()
            .map(|(scope, level)| (scope.clone(), Yaml::str(level.as_str())))
            .collect(),
    )
}

fn step_yaml(step: &Step) -> Yaml {
    if let Some(raw) = &step.raw {
        return json_to_yaml(raw);
    }
    let mut entries: Vec<(String, Yaml)> = Vec::new();
    if let Some(name) = &step.name {
        entries.push(("name".to_string(), Yaml::str(name)));
    }
    if let Some(id) = &step.id {
        entries.push(("id".to_string(), Yaml::str(id)));
    }
    if let Some(condition) = &step.condition {
        entries.push(("if".to_string(), Yaml::str(condition)));
    }
    if let Some(uses) = &step.uses {
        entries.push(("uses".to_string(), Yaml::str(uses)));
    }
    if !step.with.is_empty() {
        entries.push((
            "with".to_string(),
            Yaml::Map(
                step.with
                    .iter()
                    .map(|(k, v)| (k.clone(), json_to_yaml(v)))
                    .collect(),
            ),
        ));
    }
    if !step.env.is_empty() {
        entries.push((
            "env".to_string(),
            Yaml::Map(
                step.env
                    .iter()
                    .map(|(k, v)| (k.clone(), Yaml::str(v)))
                    .collect(),
            ),
        ));
    }
    if let Some(run) = &step.run {
        entries.push(("run".to_string(), Yaml::str(run)));
    }
    Yaml::Map(entries)
}

fn job_yaml(job: &Job) -> Yaml {
    let mut entries: Vec<(String, Yaml)> = Vec::new();
    if let Some(name) = &job.name {
        entries.push(("name".to_string(), Yaml::str(name)));
    }
    if !job.needs.is_empty() {
        entries.push((
            "needs".to_string(),
            Yaml::Seq(job.needs.iter().map(Yaml::str).collect()),
        ));
    }
    if let Some(condition) = &job.condition {
        entries.push(("if".to_string(), Yaml::str(condition)));
    }
    entries.push(("runs-on".to_string(), Yaml::str(&job.runs_on)));
    entries.push(("permissions".to_string(), permissions_yaml(&job.permissions)));
    if let Some(timeout) = job.timeout_minutes {
        entries.push(("timeout-minutes".to_string(), Yaml::Int(timeout as i64)));
    }
    if !job.env.is_empty() {
        entries.push((
            "env".to_string(),
            Yaml::Map(
                job.env
                    .iter()
                    .map(|(k, v)| (k.clone(), Yaml::str(v)))
                    .collect(),
            ),
        ));
    }
    if !job.outputs.is_empty() {
        entries.push((
            "outputs".to_string(),
            Yaml::Map(
                job.outputs
                    .iter()
                    .map(|(k, v)| (k.clone(), Yaml::str(v)))
                    .collect(),
            ),
        ));
    }
    entries.push((
        "steps".to_string(),
        Yaml::Seq(job.steps.iter().map(step_yaml).collect()),
    ));
    Yaml::Map(entries)
}

fn triggers_yaml(data: &WorkflowData) -> Yaml {
    Yaml::Map(
        data.on
            .entries
            .iter()
            .map(|(name, config)| (name.clone(), json_to_yaml(config)))
            .collect(),
    )
}

/// Assemble the full lock document.
pub fn lock_document(data: &WorkflowData, jobs: &[Job]) -> Yaml {
    let mut entries: Vec<(String, Yaml)> = Vec::new();
    entries.push(("name".to_string(), Yaml::str(&data.name)));
    entries.push(("on".to_string(), triggers_yaml(data)));
    entries.push((
        "permissions".to_string(),
        permissions_yaml(
            &data
                .permissions
                .iter()
                .map(|(scope, level)| (scope.clone(), *level))
                .collect::<Vec<_>>(),
        ),
    ));
    let group = data
        .concurrency_group
        .clone()
        .unwrap_or_else(|| "flowlock-${{ github.workflow }}".to_string());
    entries.push((
        "concurrency".to_string(),
        Yaml::Map(vec![
            ("group".to_string(), Yaml::str(group)),
            ("cancel-in-progress".to_string(), Yaml::Bool(false)),
        ]),
    ));
    entries.push((
        "jobs".to_string(),
        Yaml::Map(jobs.iter().map(|job| (job.id.clone(), job_yaml(job))).collect()),
    ));
    Yaml::Map(entries)
}

/// The generated-file banner. The source pointer is always repo-relative.
fn header(data: &WorkflowData) -> String {
    let rel = data
        .source_path
        .to_string_lossy()
        .replace('\\', "/")
        .trim_start_matches('/')
        .to_string();
    format!(
        "# This file was automatically generated by flowlock. DO NOT EDIT.\n\
         # To update, edit the markdown source and re-run `flowlock compile`.\n\
         #\n\
         # Source: {rel}\n\n"
    )
}

/// Render the complete lock file text.
pub fn render_lock_file(data: &WorkflowData, jobs: &[Job]) -> String {
    let mut out = header(data);
    out.push_str(&render(&lock_document(data, jobs)));
    out
}

/// `foo.md` → `foo.lock.yml`, next to the source.
pub fn lock_path_for(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "workflow".to_string());
    source.with_file_name(format!("{stem}.lock.yml"))
}

/// Write atomically: temp file in the same directory, then rename.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create output dir {}", parent.display()))?;
    let tmp = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("lock"),
        std::process::id()
    ));
    fs::write(&tmp, content).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "failed to rename tmp file {} to {}",
            tmp.display(),
            path.display()
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::build_jobs;
    use flowlock_types::{EngineConfig, EngineKind, TriggerSet};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn minimal_data() -> WorkflowData {
        let mut on = TriggerSet::default();
        on.entries
            .insert("workflow_dispatch".to_string(), JsonValue::Null);
        let mut permissions = BTreeMap::new();
        permissions.insert("contents".to_string(), PermissionLevel::Read);
        WorkflowData {
            name: "Title".to_string(),
            description: None,
            source_path: ".github/workflows/title.md".into(),
            on,
            permissions,
            engine: EngineConfig::new(EngineKind::Copilot),
            tools: Default::default(),
            safe_outputs: Default::default(),
            network: None,
            runtimes: Default::default(),
            caches: Vec::new(),
            secrets_referenced: Default::default(),
            custom_steps: Vec::new(),
            prompt: "# Title\n".to_string(),
            prompt_chunks: vec!["# Title\n".to_string()],
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
    fn scalar_quoting_rules() {
        assert_eq!(render_scalar("plain"), "plain");
        assert_eq!(render_scalar("0 9 * * 1"), "\"0 9 * * 1\"");
        assert_eq!(render_scalar("-leading-dash"), "\"-leading-dash\"");
        assert_eq!(render_scalar("true"), "\"true\"");
        assert_eq!(render_scalar("on"), "\"on\"");
        assert_eq!(render_scalar("42"), "\"42\"");
        assert_eq!(render_scalar("1.5"), "\"1.5\"");
        assert_eq!(render_scalar("key: value"), "\"key: value\"");
        assert_eq!(render_scalar("${{ github.actor }}"), "${{ github.actor }}");
    }

    #[test]
    fn bool_like_keys_are_quoted() {
        let doc = Yaml::Map(vec![("on".to_string(), Yaml::str("push"))]);
        assert_eq!(render(&doc), "\"on\": push\n");
    }

    #[test]
    fn multiline_strings_become_literal_blocks() {
        let doc = Yaml::Map(vec![(
            "run".to_string(),
            Yaml::str("echo one\necho two\n"),
        )]);
        assert_eq!(render(&doc), "run: |\n  echo one\n  echo two\n");
    }

    #[test]
    fn seq_of_maps_uses_compact_dashes() {
        let doc = Yaml::Map(vec![(
            "steps".to_string(),
            Yaml::Seq(vec![Yaml::Map(vec![
                ("name".to_string(), Yaml::str("Build")),
                ("run".to_string(), Yaml::str("make")),
            ])]),
        )]);
        assert_eq!(render(&doc), "steps:\n  - name: Build\n    run: make\n");
    }

    #[test]
    fn minimal_lock_file_has_one_agent_job() {
        let data = minimal_data();
        let jobs = build_jobs(&data).unwrap();
        let text = render_lock_file(&data, &jobs);

        assert!(text.starts_with("# This file was automatically generated by flowlock."));
        assert!(text.contains("# Source: .github/workflows/title.md"));
        assert!(text.contains("name: Title"));
        assert!(text.contains("\"on\":\n  workflow_dispatch:\n"));
        assert!(text.contains("jobs:\n  agent:\n"));
        // Exactly one job.
        assert_eq!(text.matches("\n  agent:\n").count(), 1);
        assert!(!text.contains("activation"));
    }

    #[test]
    fn emitted_yaml_parses_back() {
        let data = minimal_data();
        let jobs = build_jobs(&data).unwrap();
        let text = render_lock_file(&data, &jobs);
        let parsed: serde_yaml::Value = serde_yaml::from_str(&text).expect("lock file parses");
        assert_eq!(parsed["name"], "Title");
        assert!(parsed["jobs"]["agent"]["steps"].as_sequence().is_some());
        assert_eq!(
            parsed["concurrency"]["group"],
            "flowlock-${{ github.workflow }}"
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let data = minimal_data();
        let jobs = build_jobs(&data).unwrap();
        let first = render_lock_file(&data, &jobs);
        let second = render_lock_file(&data, &build_jobs(&data).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn source_pointer_is_repo_relative() {
        let mut data = minimal_data();
        data.source_path = "/abs/leading/slash.md".into();
        let jobs = build_jobs(&data).unwrap();
        let text = render_lock_file(&data, &jobs);
        let source_line = text
            .lines()
            .find(|l| l.starts_with("# Source:"))
            .expect("source comment");
        let pointer = source_line.trim_start_matches("# Source:").trim();
        assert!(!pointer.starts_with('/'));
        assert!(!pointer.contains(":\\"));
    }

    #[test]
    fn custom_steps_pass_through() {
        let step = json!({"name": "Agent", "run": "./agent.sh", "env": {"A": "b"}});
        let yaml = json_to_yaml(&step);
        let mut out = String::new();
        write_seq(&[yaml], 0, &mut out);
        assert_eq!(out, "- env:\n    A: b\n  name: Agent\n  run: ./agent.sh\n");
    }

    #[test]
    fn lock_path_sits_next_to_source() {
        assert_eq!(
            lock_path_for(Path::new(".github/workflows/triage.md")),
            PathBuf::from(".github/workflows/triage.lock.yml")
        );
    }

    #[test]
    fn write_atomic_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.lock.yml");
        write_atomic(&target, "name: x\n").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "name: x\n");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }
}
