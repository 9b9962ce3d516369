use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use stagewright_core::{CustomEntry, EntryPlan, Hook, HookPaths, StageId, layout};
use tempfile::TempDir;

fn stagewright() -> assert_cmd::Command {
    cargo_bin_cmd!("stagewright")
}

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn read(dir: &Path, rel: &str) -> String {
    std::fs::read_to_string(dir.join(rel)).unwrap()
}

// ── Help / Version ──

#[test]
fn shows_help() {
    stagewright()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("two-stage container project"))
        .stdout(predicate::str::contains("register-login"));
}

#[test]
fn shows_version() {
    stagewright()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stagewright"));
}

#[test]
fn rejects_unknown_stage() {
    stagewright()
        .args(["entrypoint", "--stage", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected 1 or 2"));
}

// ── Create Command ──

#[test]
fn create_scaffolds_project() {
    let tmp = TempDir::new().unwrap();

    stagewright()
        .current_dir(tmp.path())
        .args(["create", "my-box"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created project 'my-box'"));

    let project = tmp.path().join("my-box");
    let config = read(&project, "stagewright.yml");
    assert!(config.contains("project: my-box"));
    assert!(config.contains("output: my-box-stage-1:latest"));
    assert!(config.contains("uid: 1100"));
    assert!(
        project
            .join("installation/stage-1/custom/install-packages.sh")
            .exists()
    );
    assert!(project.join("installation/stage-2/custom/first-run.sh").exists());
    assert!(project.join(layout::HOST_BINARY_PATH).is_file());
}

#[test]
fn create_refuses_existing_config_without_force() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "stagewright.yml", "stage_1: {}\n");

    stagewright()
        .args(["create"])
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    assert_eq!(read(tmp.path(), "stagewright.yml"), "stage_1: {}\n");

    stagewright()
        .args(["create", "--force"])
        .arg(tmp.path())
        .assert()
        .success();
    assert!(read(tmp.path(), "stagewright.yml").contains("stage_2:"));
}

#[test]
fn create_keeps_existing_scripts() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "installation/stage-2/custom/first-run.sh", "echo mine\n");

    stagewright()
        .args(["create"])
        .arg(tmp.path())
        .assert()
        .success();

    assert_eq!(
        read(tmp.path(), "installation/stage-2/custom/first-run.sh"),
        "echo mine\n"
    );
}

// ── Compile Command ──

#[test]
fn compile_scaffolded_project() {
    let tmp = TempDir::new().unwrap();
    stagewright()
        .args(["create"])
        .arg(tmp.path())
        .assert()
        .success();

    stagewright()
        .args(["compile", "--project-dir"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Compiled 2 stage(s)"))
        .stderr(predicate::str::contains("warning:").not());

    for rel in [
        "stage-1.Dockerfile",
        "stage-2.Dockerfile",
        "docker-compose.yml",
        "installation/stage-1/generated/entry-plan.json",
        "installation/stage-2/generated/_custom-on-first-run.sh",
    ] {
        assert!(tmp.path().join(rel).exists(), "{rel} missing");
    }
    assert!(read(tmp.path(), "stage-2.Dockerfile").contains("register-login --stage 2"));
    assert!(read(tmp.path(), "docker-compose.yml").contains("/workspace"));
}

#[test]
fn compile_reports_every_error_and_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "stagewright.yml",
        r#"
stage_1:
  ports: ["eighty"]
  mounts:
    a: { kind: auto-volume, dst_path: /data }
    b: { kind: auto-volume, dst_path: /data }
"#,
    );

    stagewright()
        .args(["compile", "--project-dir"])
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("both target /data"))
        .stderr(predicate::str::contains("invalid port mapping"))
        .stderr(predicate::str::contains("2 error(s)"));

    assert!(!tmp.path().join("stage-1.Dockerfile").exists());
    assert!(!tmp.path().join("docker-compose.yml").exists());
}

#[test]
fn compile_reports_schema_errors() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "stagewright.yml", "stage_1:\n  colour: blue\n");

    stagewright()
        .args(["compile", "--project-dir"])
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("colour"));
}

#[test]
fn compile_without_config_fails() {
    let tmp = TempDir::new().unwrap();

    stagewright()
        .current_dir(tmp.path())
        .arg("compile")
        .assert()
        .failure()
        .stderr(predicate::str::contains("stagewright create"));
}

#[test]
fn compile_warns_about_missing_binary() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "stagewright.yml", "stage_1: {}\n");

    stagewright()
        .current_dir(tmp.path())
        .arg("compile")
        .assert()
        .success()
        .stderr(predicate::str::contains("warning:"))
        .stderr(predicate::str::contains(layout::HOST_BINARY_PATH));
}

#[test]
fn logs_are_plain_text_when_stderr_is_piped() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "stagewright.yml", "stage_1: {}\n");

    stagewright()
        .current_dir(tmp.path())
        .env("RUST_LOG", "info")
        .arg("compile")
        .assert()
        .success()
        .stderr(predicate::str::contains("compiled"))
        .stderr(predicate::str::contains("\u{1b}[").not());
}

#[test]
fn compile_substitutes_dotenv_then_process_env() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "stagewright.yml",
        "stage_1:\n  ports: [\"${WEB_PORT}:80\"]\n",
    );
    write(tmp.path(), ".env", "WEB_PORT=9090\n");

    stagewright()
        .current_dir(tmp.path())
        .env_remove("WEB_PORT")
        .arg("compile")
        .assert()
        .success();
    assert!(read(tmp.path(), "docker-compose.yml").contains("9090:80"));

    stagewright()
        .current_dir(tmp.path())
        .env("WEB_PORT", "7070")
        .arg("compile")
        .assert()
        .success();
    let compose = read(tmp.path(), "docker-compose.yml");
    assert!(compose.contains("7070:80"));
    assert!(!compose.contains("9090:80"));
}

// ── Remove Command ──

#[test]
fn remove_deletes_generated_artifacts_only() {
    let tmp = TempDir::new().unwrap();
    stagewright()
        .args(["create"])
        .arg(tmp.path())
        .assert()
        .success();
    stagewright()
        .args(["compile", "--project-dir"])
        .arg(tmp.path())
        .assert()
        .success();

    stagewright()
        .args(["remove", "--project-dir"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed docker-compose.yml"));

    assert!(!tmp.path().join("stage-1.Dockerfile").exists());
    assert!(!tmp.path().join("installation/stage-1/generated").exists());
    assert!(tmp.path().join("stagewright.yml").exists());
    assert!(
        tmp.path()
            .join("installation/stage-1/custom/install-packages.sh")
            .exists()
    );

    stagewright()
        .args(["remove", "--project-dir"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to remove"));
}

// ── Schema Command ──

#[test]
fn schema_prints_config_schema() {
    let output = stagewright().arg("schema").assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let schema: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(schema["properties"]["stage_1"].is_object());
    assert!(schema["properties"]["stage_2"].is_object());
}

// ── Runtime Commands ──

#[test]
fn register_login_is_idempotent() {
    let tmp = TempDir::new().unwrap();

    stagewright()
        .args(["register-login", "--stage", "2", "--profile", "/root/.bashrc", "--root"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered stage_2 login hooks"));

    let profile = read(tmp.path(), "root/.bashrc");
    let one = profile.find("stagewright:on-user-login:stage_1").unwrap();
    let two = profile.find("stagewright:on-user-login:stage_2").unwrap();
    assert!(one < two);

    stagewright()
        .args(["register-login", "--stage", "2", "--profile", "/root/.bashrc", "--root"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    assert_eq!(read(tmp.path(), "root/.bashrc"), profile);
}

#[test]
fn entrypoint_execs_custom_entry() {
    let tmp = TempDir::new().unwrap();
    let plan = EntryPlan {
        stage: StageId::One,
        ssh: None,
        hooks: HookPaths {
            on_first_run: layout::image_wrapper_path(StageId::One, Hook::OnFirstRun),
            on_every_run: layout::image_wrapper_path(StageId::One, Hook::OnEveryRun),
            on_user_login: layout::image_wrapper_path(StageId::One, Hook::OnUserLogin),
        },
        first_run_marker: layout::image_marker_path(StageId::One),
        custom_entry: Some(CustomEntry {
            script: "/entry.sh".into(),
            args: vec!["hello world".into()],
        }),
        links: Vec::new(),
    };
    write(
        tmp.path(),
        layout::image_plan_path(StageId::One).trim_start_matches('/'),
        &plan.to_json().unwrap(),
    );
    write(tmp.path(), "entry.sh", "echo \"custom entry: $1\"\n");

    stagewright()
        .args(["entrypoint", "--stage", "1", "--root"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("custom entry: hello world"));
}

#[test]
fn entrypoint_without_plan_fails() {
    let tmp = TempDir::new().unwrap();

    stagewright()
        .args(["entrypoint", "--stage", "2", "--root"])
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("entry-plan.json"));
}
