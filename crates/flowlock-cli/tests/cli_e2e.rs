use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::tempdir;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, content).expect("write");
}

fn flowlock() -> Command {
    Command::cargo_bin("flowlock").expect("binary builds")
}

#[test]
fn compile_smallest_valid_workflow() {
    let dir = tempdir().unwrap();
    write_file(
        &dir.path().join(".github/workflows/title.md"),
        "---\non: workflow_dispatch\nengine: copilot\n---\n# Title\n",
    );

    flowlock()
        .args(["--repo-root"])
        .arg(dir.path())
        .arg("compile")
        .arg(dir.path().join(".github/workflows/title.md"))
        .assert()
        .success();

    let lock = fs::read_to_string(dir.path().join(".github/workflows/title.lock.yml")).unwrap();
    assert!(lock.contains("name: Title"));
    assert!(lock.contains("workflow_dispatch:"));
    assert!(lock.contains("# Source: .github/workflows/title.md"));
}

#[test]
fn validation_failure_exits_one_with_diagnostics() {
    let dir = tempdir().unwrap();
    write_file(
        &dir.path().join("wf.md"),
        "---\non:\n  workflow_dispatch:\n  stop-after: +90m\nengine: copilot\n---\nBody\n",
    );

    flowlock()
        .args(["--repo-root"])
        .arg(dir.path())
        .arg("compile")
        .arg(dir.path().join("wf.md"))
        .assert()
        .code(1)
        .stderr(contains("+2h"));

    assert!(!dir.path().join("wf.lock.yml").exists());
}

#[test]
fn missing_file_exits_two() {
    let dir = tempdir().unwrap();
    flowlock()
        .args(["--repo-root"])
        .arg(dir.path())
        .arg("compile")
        .arg(dir.path().join("missing.md"))
        .assert()
        .code(2);
}

#[test]
fn no_inputs_exits_three() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join(".github/workflows")).unwrap();
    flowlock()
        .args(["--repo-root"])
        .arg(dir.path())
        .arg("compile")
        .assert()
        .code(3)
        .stderr(contains("no workflow files"));
}

#[test]
fn check_validates_without_writing() {
    let dir = tempdir().unwrap();
    write_file(
        &dir.path().join("wf.md"),
        "---\non: push\nengine: claude\n---\n# Check\n",
    );

    flowlock()
        .args(["--repo-root"])
        .arg(dir.path())
        .arg("check")
        .arg(dir.path().join("wf.md"))
        .assert()
        .success()
        .stderr(contains("validated"));

    assert!(!dir.path().join("wf.lock.yml").exists());
}

#[test]
fn compile_directory_handles_every_file() {
    let dir = tempdir().unwrap();
    write_file(
        &dir.path().join(".github/workflows/a.md"),
        "---\non: push\n---\n# A\n",
    );
    write_file(
        &dir.path().join(".github/workflows/b.md"),
        "---\non: push\n---\n# B\n",
    );

    flowlock()
        .args(["--repo-root"])
        .arg(dir.path())
        .args(["compile", "--jobs", "1"])
        .assert()
        .success()
        .stderr(contains("2 workflow(s) compiled"));

    assert!(dir.path().join(".github/workflows/a.lock.yml").exists());
    assert!(dir.path().join(".github/workflows/b.lock.yml").exists());
}

#[test]
fn one_bad_file_fails_the_batch_but_compiles_the_rest() {
    let dir = tempdir().unwrap();
    write_file(
        &dir.path().join(".github/workflows/good.md"),
        "---\non: push\n---\n# Good\n",
    );
    write_file(
        &dir.path().join(".github/workflows/bad.md"),
        "---\non: push\nengine: gpt-5\n---\n# Bad\n",
    );

    flowlock()
        .args(["--repo-root"])
        .arg(dir.path())
        .args(["compile", "--jobs", "1"])
        .assert()
        .code(1)
        .stderr(contains("1 of 2 workflow(s) failed"));

    assert!(dir.path().join(".github/workflows/good.lock.yml").exists());
    assert!(!dir.path().join(".github/workflows/bad.lock.yml").exists());
}

#[test]
fn strict_flag_tightens_validation() {
    let dir = tempdir().unwrap();
    write_file(
        &dir.path().join("wf.md"),
        "---\non: push\nengine: copilot\n---\nBody\n",
    );

    flowlock()
        .args(["--repo-root"])
        .arg(dir.path())
        .args(["compile", "--strict"])
        .arg(dir.path().join("wf.md"))
        .assert()
        .code(1)
        .stderr(contains("timeout_minutes"));
}

#[test]
fn config_file_supplies_defaults() {
    let dir = tempdir().unwrap();
    write_file(&dir.path().join(".flowlock.toml"), "strict = true\n");
    write_file(
        &dir.path().join("wf.md"),
        "---\non: push\nengine: copilot\n---\nBody\n",
    );

    flowlock()
        .args(["--repo-root"])
        .arg(dir.path())
        .arg("compile")
        .arg(dir.path().join("wf.md"))
        .assert()
        .code(1)
        .stderr(contains("strict"));
}

#[test]
fn doctor_reports_environment() {
    let dir = tempdir().unwrap();
    flowlock()
        .args(["--repo-root"])
        .arg(dir.path())
        .arg("doctor")
        .assert()
        .success()
        .stdout(contains("cache_root:"))
        .stdout(contains("docker:"));
}

#[test]
fn lock_files_are_byte_identical_across_runs() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("wf.md");
    write_file(
        &source,
        "---\non:\n  schedule:\n    - cron: \"0 9 * * 1\"\nsafe-outputs:\n  create-issue:\n---\n# Weekly\n",
    );

    let compile = |dir: &Path, source: &Path| {
        flowlock()
            .args(["--repo-root"])
            .arg(dir)
            .arg("compile")
            .arg(source)
            .assert()
            .success();
        fs::read_to_string(dir.join("wf.lock.yml")).unwrap()
    };

    let first = compile(dir.path(), &source);
    let second = compile(dir.path(), &source);
    assert_eq!(first, second);
}
