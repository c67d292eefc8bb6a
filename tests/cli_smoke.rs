mod support;

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;

use support::TestStore;

fn stm(env: &TestStore) -> Command {
    let mut cmd = Command::cargo_bin("stm").expect("binary");
    cmd.current_dir(env.path()).env_remove("STM_ROOT");
    cmd
}

fn json_output(cmd: &mut Command) -> Value {
    let output = cmd.arg("--json").output().expect("run stm");
    serde_json::from_slice(&output.stdout).expect("json output")
}

#[test]
fn stm_help_works() {
    Command::cargo_bin("stm")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Simple Task Master"));
}

#[test]
fn subcommand_help_works() {
    for cmd in ["init", "add", "show", "update", "delete", "list"] {
        Command::cargo_bin("stm")
            .expect("binary")
            .arg(cmd)
            .arg("--help")
            .assert()
            .success();
    }
}

#[test]
fn init_is_idempotent() {
    let env = TestStore::uninitialized();

    stm(&env)
        .arg("init")
        .assert()
        .success()
        .stdout(contains("stm init: initialized task store"))
        .stdout(contains(".stm/config.toml"));
    assert!(env.tasks_dir().is_dir());
    assert!(env.control_dir().join("config.toml").is_file());

    stm(&env)
        .arg("init")
        .assert()
        .success()
        .stdout(contains("nothing to do"));
}

#[test]
fn commands_require_init() {
    let env = TestStore::uninitialized();
    stm(&env)
        .args(["add", "Orphan"])
        .assert()
        .code(2)
        .stderr(contains("not initialized"))
        .stderr(contains("stm init"));
}

#[test]
fn add_show_update_list_delete() {
    let env = TestStore::init();

    let created = json_output(stm(&env).args([
        "add",
        "Write docs",
        "--description",
        "Explain the lock",
        "--details",
        "Cover stale markers",
        "--tags",
        "docs,lock",
        "priority=2",
        "reviewed=false",
    ]));
    assert_eq!(created["id"], 1);
    assert_eq!(created["status"], "pending");
    assert_eq!(created["tags"], serde_json::json!(["docs", "lock"]));
    assert_eq!(created["priority"], 2);
    assert_eq!(created["reviewed"], false);

    let text = env.read_task_file("1-write-docs.md").expect("task file");
    assert!(text.contains("priority: 2\n"));
    assert!(text.contains("Explain the lock\n\n## Details\n\nCover stale markers"));

    stm(&env)
        .args(["show", "1"])
        .assert()
        .success()
        .stdout(contains("Task 1: Write docs"))
        .stdout(contains("## Details"));

    let updated = json_output(stm(&env).args([
        "update",
        "1",
        "--status",
        "in-progress",
        "--add-tags",
        "urgent",
        "--remove-tags",
        "lock",
        "--validation",
        "Run the stress tests",
        "priority=",
        "owner=sam",
    ]));
    assert_eq!(updated["status"], "in-progress");
    assert_eq!(updated["tags"], serde_json::json!(["docs", "urgent"]));
    assert!(updated.get("priority").is_none());
    assert_eq!(updated["owner"], "sam");
    assert!(updated["body"]
        .as_str()
        .expect("body")
        .trim_end()
        .ends_with("## Validation\n\nRun the stress tests"));

    let listed = json_output(stm(&env).args(["list", "--status", "in-progress"]));
    let listed = listed.as_array().expect("list is a JSON array");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["title"], "Write docs");

    stm(&env)
        .args(["list"])
        .assert()
        .success()
        .stdout(contains("#1 [in-progress] Write docs (docs, urgent)"));

    stm(&env).args(["delete", "1"]).assert().success();
    stm(&env)
        .args(["show", "1"])
        .assert()
        .code(2)
        .stderr(contains("Task not found: 1"));
}

#[test]
fn delete_with_dependents_is_blocked() {
    let env = TestStore::init();
    stm(&env).args(["--quiet", "add", "Base"]).assert().success();
    stm(&env)
        .args(["--quiet", "add", "Child", "--deps", "1"])
        .assert()
        .success();

    stm(&env)
        .args(["delete", "1"])
        .assert()
        .code(3)
        .stderr(contains("#2 \"Child\""))
        .stderr(contains("stm delete 1 --force"));

    let output = stm(&env)
        .args(["--json", "delete", "1"])
        .output()
        .expect("run stm");
    assert_eq!(output.status.code(), Some(3));
    assert!(output.stdout.is_empty());
    let payload: Value = serde_json::from_slice(&output.stderr).expect("json error");
    assert_eq!(payload["code"], 3);
    assert!(payload["error"].as_str().expect("message").contains("Task 1"));
    assert_eq!(payload["details"]["dependents"][0]["id"], 2);

    stm(&env).args(["delete", "1", "--force"]).assert().success();
}

#[test]
fn invalid_input_exits_with_user_error() {
    let env = TestStore::init();
    stm(&env)
        .args(["add", "bad/title"])
        .assert()
        .code(2)
        .stderr(contains("invalid character"));
    stm(&env)
        .args(["add", "Fine", "--status", "blocked"])
        .assert()
        .code(2)
        .stderr(contains("invalid status"));
    stm(&env)
        .args(["add", "Fine", "status=done"])
        .assert()
        .code(2)
        .stderr(contains("built-in field"));
    assert!(env.task_files().is_empty());
}

#[test]
fn quiet_suppresses_output() {
    let env = TestStore::init();
    stm(&env)
        .args(["--quiet", "add", "Silent"])
        .assert()
        .success()
        .stdout("");
}

#[test]
fn root_is_discovered_from_subdirectory_or_env() {
    let env = TestStore::init();
    let nested = env.path().join("src").join("deep");
    std::fs::create_dir_all(&nested).expect("mkdir");

    Command::cargo_bin("stm")
        .expect("binary")
        .current_dir(&nested)
        .env_remove("STM_ROOT")
        .args(["--quiet", "add", "From below"])
        .assert()
        .success();

    let elsewhere = TestStore::uninitialized();
    Command::cargo_bin("stm")
        .expect("binary")
        .current_dir(elsewhere.path())
        .env("STM_ROOT", env.path())
        .args(["list"])
        .assert()
        .success()
        .stdout(contains("From below"));
}

#[test]
fn list_warns_about_unreadable_files() {
    let env = TestStore::init();
    stm(&env).args(["--quiet", "add", "Good"]).assert().success();
    env.write_task_file("2-broken.md", "---\nid: 2\ntitle: [unclosed\n")
        .expect("write");

    stm(&env)
        .arg("list")
        .assert()
        .success()
        .stdout(contains("1 task\n#1 [pending] Good"))
        .stderr(contains("warning: skipped"))
        .stderr(contains("2-broken.md"));

    let output = stm(&env)
        .args(["--json", "list"])
        .output()
        .expect("run stm");
    let tasks: Value = serde_json::from_slice(&output.stdout).expect("json list");
    assert_eq!(tasks.as_array().map(Vec::len), Some(1));
}

#[test]
fn json_exposes_custom_fields_at_top_level() {
    let env = TestStore::init();
    stm(&env)
        .args(["--quiet", "add", "Sync me", "--tags", "api"])
        .assert()
        .success();
    stm(&env)
        .args([
            "--quiet",
            "update",
            "1",
            "integration_external_id=GH-42",
            "integration_labels=[\"bug\", \"api\"]",
        ])
        .assert()
        .success();

    let task = json_output(stm(&env).args(["show", "1"]));
    let object = task.as_object().expect("task object");
    let custom: Vec<&str> = object
        .keys()
        .filter(|key| key.starts_with("integration_"))
        .map(String::as_str)
        .collect();
    assert_eq!(custom, vec!["integration_external_id", "integration_labels"]);
    assert_eq!(task["integration_external_id"], "GH-42");
    assert_eq!(task["integration_labels"], serde_json::json!(["bug", "api"]));

    let listed = json_output(stm(&env).args(["list", "--tags", "api"]));
    assert_eq!(listed[0]["integration_external_id"], "GH-42");
}

#[test]
fn section_content_cannot_smuggle_headings() {
    let env = TestStore::init();
    stm(&env)
        .args(["add", "Tricky", "--details", "one\n## Two"])
        .assert()
        .code(2)
        .stderr(contains("new `## ` section"));
    assert!(env.task_files().is_empty());
}
