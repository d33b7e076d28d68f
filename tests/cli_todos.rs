mod support;

use predicates::prelude::*;
use predicates::str::contains;

use support::{TestRepo, SAMPLE_CONFIG};

/// Repo on branch `feature` with an Apex class, two Go files and the sample
/// config committed on the base branch.
fn feature_repo() -> Result<TestRepo, Box<dyn std::error::Error>> {
    let repo = TestRepo::init()?;
    repo.write_config(SAMPLE_CONFIG)?;
    repo.commit_file("README.md", "hello\n", "initial")?;
    repo.create_branch("feature")?;
    repo.checkout_branch("feature")?;

    repo.write_file(
        "cls/Foo.cls",
        "public class Foo {\n  @AuraEnabled\n  public static String go() { return ''; }\n}\n",
    )?;
    repo.write_file("cls/Bar.cls", "public class Bar {}\n")?;
    repo.write_file("src/a.go", "package a\n")?;
    repo.write_file("src/b.go", "package b\n")?;
    Ok(repo)
}

#[test]
fn refresh_raises_file_and_branch_todos() -> Result<(), Box<dyn std::error::Error>> {
    let repo = feature_repo()?;

    repo.cmd()
        .arg("refresh")
        .assert()
        .success()
        .stdout(contains("todos updated on feature"))
        .stdout(contains("[ ] t1:cls/Foo.cls (high) Expose Aura method"))
        .stdout(contains("[ ] branch:changelog (medium)"))
        .stdout(contains("branch:go (medium) Review Go changes <- src/a.go, src/b.go"))
        .stdout(contains("t1:cls/Bar.cls").not());

    repo.cmd()
        .arg("refresh")
        .assert()
        .success()
        .stdout(contains("no changes on feature"));

    let state = repo.read_state()?;
    let feature = &state["branches"]["feature"];
    assert_eq!(feature["t1:cls/Foo.cls"]["status"], "pending");
    assert_eq!(feature["branch:go"]["branch_level"], true);
    Ok(())
}

#[test]
fn list_json_envelope() -> Result<(), Box<dyn std::error::Error>> {
    let repo = feature_repo()?;
    repo.cmd().arg("refresh").assert().success();

    let output = repo.cmd().args(["list", "--json"]).output()?;
    assert!(output.status.success());
    let payload: serde_json::Value = serde_json::from_slice(&output.stdout)?;

    assert_eq!(payload["schema_version"], "branchtodo.v1");
    assert_eq!(payload["command"], "list");
    assert_eq!(payload["status"], "success");
    assert_eq!(payload["data"]["branch"], "feature");
    let todos = payload["data"]["todos"].as_array().expect("todos array");
    assert_eq!(todos.len(), 3);
    let foo = todos
        .iter()
        .find(|todo| todo["id"] == "t1:cls/Foo.cls")
        .expect("Foo todo");
    assert_eq!(foo["priority"], "high");
    assert_eq!(foo["scope"], "file");
    assert_eq!(foo["relative_path"], "cls/Foo.cls");
    Ok(())
}

#[test]
fn status_verbs_persist() -> Result<(), Box<dyn std::error::Error>> {
    let repo = feature_repo()?;
    repo.cmd().arg("refresh").assert().success();

    repo.cmd()
        .args(["complete", "t1:cls/Foo.cls"])
        .assert()
        .success()
        .stdout(contains("[x] t1:cls/Foo.cls"));
    assert_eq!(
        repo.read_state()?["branches"]["feature"]["t1:cls/Foo.cls"]["status"],
        "completed"
    );

    repo.cmd()
        .args(["list", "--status", "completed"])
        .assert()
        .success()
        .stdout(contains("1 todo(s) on feature"))
        .stdout(contains("t1:cls/Foo.cls"));

    repo.cmd()
        .args(["reopen", "t1:cls/Foo.cls"])
        .assert()
        .success()
        .stdout(contains("[ ] t1:cls/Foo.cls"));

    repo.cmd()
        .args(["ignore", "branch:changelog"])
        .assert()
        .success()
        .stdout(contains("[-] branch:changelog"));

    repo.cmd()
        .args(["reopen", "branch:changelog"])
        .assert()
        .success()
        .stdout(contains("status unchanged (ignored)"));

    repo.cmd()
        .args(["unignore", "branch:changelog"])
        .assert()
        .success()
        .stdout(contains("[ ] branch:changelog"));

    let state = repo.read_state()?;
    let feature = &state["branches"]["feature"];
    assert_eq!(feature["t1:cls/Foo.cls"]["status"], "pending");
    assert_eq!(feature["branch:changelog"]["status"], "pending");
    assert!(feature["branch:changelog"].get("ignored_at").is_none());
    Ok(())
}

#[test]
fn unknown_todo_exits_not_found() -> Result<(), Box<dyn std::error::Error>> {
    let repo = feature_repo()?;
    repo.cmd().arg("refresh").assert().success();
    let before = std::fs::read_to_string(repo.state_file())?;

    repo.cmd()
        .args(["complete", "t1:cls/Missing.cls"])
        .assert()
        .code(3)
        .stderr(contains("Todo not found"))
        .stderr(contains("hint: branchtodo list"));

    assert_eq!(std::fs::read_to_string(repo.state_file())?, before);
    Ok(())
}

#[test]
fn show_reports_triggering_files() -> Result<(), Box<dyn std::error::Error>> {
    let repo = feature_repo()?;
    repo.cmd().arg("refresh").assert().success();

    repo.cmd()
        .args(["show", "branch:go"])
        .assert()
        .success()
        .stdout(contains("triggered by"))
        .stdout(contains("src/a.go, src/b.go"));

    repo.cmd()
        .args(["show", "branch:go", "--branch", "elsewhere"])
        .assert()
        .code(3)
        .stderr(contains("Branch has no todos"));
    Ok(())
}

#[test]
fn check_evaluates_named_files_on_another_branch() -> Result<(), Box<dyn std::error::Error>> {
    let repo = feature_repo()?;

    repo.cmd()
        .args(["check", "cls/Foo.cls", "cls/Bar.cls", "--branch", "review"])
        .assert()
        .success()
        .stdout(contains("1 of 2 file(s) raised todos on review"))
        .stdout(contains("cls/Foo.cls: t1:cls/Foo.cls"))
        .stdout(contains("cls/Bar.cls: no todos"));

    repo.cmd()
        .args(["check", "src/a.go", "--branch", "review", "--json"])
        .assert()
        .success()
        .stdout(contains("branch:go"));

    repo.cmd()
        .args(["check", "nope/missing.cls", "--branch", "review"])
        .assert()
        .success()
        .stdout(contains("not a file, skipped"));

    repo.cmd()
        .args(["list", "--all"])
        .assert()
        .success()
        .stdout(contains("review: [ ] t1:cls/Foo.cls"));
    repo.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(contains("0 todo(s) on feature"));
    Ok(())
}

#[test]
fn clear_drops_only_that_branch() -> Result<(), Box<dyn std::error::Error>> {
    let repo = feature_repo()?;
    repo.cmd().arg("refresh").assert().success();
    repo.cmd()
        .args(["check", "cls/Foo.cls", "--branch", "review"])
        .assert()
        .success();

    repo.cmd()
        .args(["clear", "--branch", "review"])
        .assert()
        .success()
        .stdout(contains("removed"))
        .stdout(contains("from review"));

    let state = repo.read_state()?;
    assert!(state["branches"].get("review").is_none());
    assert!(state["branches"]["feature"].get("t1:cls/Foo.cls").is_some());
    Ok(())
}

#[test]
fn todos_follow_checked_out_branch() -> Result<(), Box<dyn std::error::Error>> {
    let repo = feature_repo()?;
    repo.cmd().arg("refresh").assert().success();
    repo.cmd()
        .args(["complete", "t1:cls/Foo.cls"])
        .assert()
        .success();

    repo.commit_all("feature work")?;
    repo.create_branch("other")?;
    repo.checkout_branch("other")?;

    repo.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(contains("0 todo(s) on other"));
    repo.cmd()
        .args(["list", "--branch", "feature", "--status", "completed"])
        .assert()
        .success()
        .stdout(contains("t1:cls/Foo.cls"));
    Ok(())
}

#[test]
fn removed_template_is_pruned_on_next_mutation() -> Result<(), Box<dyn std::error::Error>> {
    let repo = feature_repo()?;
    repo.cmd().arg("refresh").assert().success();

    let without_go = SAMPLE_CONFIG
        .split("[[templates]]")
        .filter(|block| !block.contains("id = \"go\""))
        .collect::<Vec<_>>()
        .join("[[templates]]");
    repo.write_config(&without_go)?;

    repo.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(contains("branch:go").not());

    repo.cmd()
        .args(["complete", "branch:changelog"])
        .assert()
        .success();
    let state = repo.read_state()?;
    assert!(state["branches"]["feature"].get("branch:go").is_none());
    Ok(())
}

#[test]
fn events_file_receives_jsonl() -> Result<(), Box<dyn std::error::Error>> {
    let repo = feature_repo()?;
    let events_dir = tempfile::tempdir()?;
    let events = events_dir.path().join("events.jsonl");
    let events_arg = events.to_str().expect("utf-8 path");

    repo.cmd()
        .args(["refresh", "--events", events_arg])
        .assert()
        .success();
    repo.cmd()
        .args(["complete", "t1:cls/Foo.cls", "--events", events_arg])
        .assert()
        .success();

    let lines: Vec<serde_json::Value> = std::fs::read_to_string(&events)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    let kinds: Vec<&str> = lines
        .iter()
        .filter_map(|event| event["event"].as_str())
        .collect();
    assert_eq!(
        kinds,
        vec!["todos_refreshed", "state_changed", "todo_completed", "state_changed"]
    );
    assert!(lines
        .iter()
        .all(|event| event["schema_version"] == "branchtodo.event.v1"));
    assert_eq!(lines[2]["branch"], "feature");
    assert_eq!(lines[2]["data"]["id"], "t1:cls/Foo.cls");
    Ok(())
}

#[test]
fn events_to_stdout_suppress_human_output() -> Result<(), Box<dyn std::error::Error>> {
    let repo = feature_repo()?;
    repo.cmd().arg("refresh").assert().success();

    let output = repo
        .cmd()
        .args(["--events", "-", "ignore", "branch:go"])
        .output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    for line in stdout.lines() {
        let event: serde_json::Value = serde_json::from_str(line)?;
        assert!(event["event"].is_string());
    }
    assert!(stdout.contains("todo_ignored"));
    Ok(())
}
