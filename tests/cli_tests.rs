//! Integration tests for the treeflow CLI
//!
//! These tests run the actual binary against JSON tree dumps in a temp dir.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

use common::Fixture;

/// Binary with a private config file and no TREEFLOW_* overrides
fn treeflow(fx: &Fixture) -> Command {
    let config = fx.dir.path().join("config.toml");
    if !config.exists() {
        fx.config("");
    }
    let mut cmd = Command::cargo_bin("treeflow").unwrap();
    cmd.arg("--config")
        .arg(config)
        .env("NO_COLOR", "1")
        .env_remove("TREEFLOW_WORKERS")
        .env_remove("TREEFLOW_MODE")
        .env_remove("TREEFLOW_LOCATION")
        .env_remove("TREEFLOW_REMOTE_ROOT")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_flag() {
    Command::cargo_bin("treeflow")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("concurrent column extraction"))
        .stdout(predicate::str::contains("process"))
        .stdout(predicate::str::contains("worker").not());
}

#[test]
fn test_process_help() {
    Command::cargo_bin("treeflow")
        .unwrap()
        .args(["process", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--file-list"))
        .stdout(predicate::str::contains("--schema-policy"))
        .stdout(predicate::str::contains("--mode"));
}

#[test]
fn test_process_file_list() {
    let fx = Fixture::new();
    let list = fx.list(
        "files.txt",
        &[fx.tree("a.json", &[1, 2]), fx.tree("b.json", &[3])],
    );

    treeflow(&fx)
        .args(["process", "-w", "2", "-b", "event", "-b", "crvcoincs.nHits", "-l"])
        .arg(&list)
        .assert()
        .success()
        .stdout(predicate::str::contains("event 3 rows"))
        .stdout(predicate::str::contains("crvcoincs.nHits 3 rows"))
        .stdout(predicate::str::contains("2 file(s) merged, 0 failed"));
}

#[test]
fn test_process_json_output() {
    let fx = Fixture::new();
    let list = fx.list(
        "files.txt",
        &[fx.tree("a.json", &[1, 2]), fx.missing("gone.json")],
    );

    let output = treeflow(&fx)
        .args(["process", "--json", "-b", "event", "-l"])
        .arg(&list)
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["data"]["flat"]["event"], serde_json::json!([1, 2]));
    assert_eq!(result["failures"][0]["kind"], "open_error");
    assert_eq!(result["files"].as_array().unwrap().len(), 1);
}

#[test]
fn test_process_groups() {
    let fx = Fixture::new();
    let file = fx.tree("a.json", &[1, 2]);

    treeflow(&fx)
        .args(["process", "-g", "evt=event", "-g", "crv=crvcoincs.PEs,crvcoincs.nHits", "-f"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("crv/crvcoincs.PEs 2 rows"))
        .stdout(predicate::str::contains("evt/event 2 rows"));
}

#[test]
fn test_process_in_worker_processes() {
    let fx = Fixture::new();
    let list = fx.list(
        "files.txt",
        &[fx.tree("a.json", &[1]), fx.tree("b.json", &[2, 3])],
    );

    treeflow(&fx)
        .args(["process", "--mode", "processes", "-w", "2", "-b", "*", "-l"])
        .arg(&list)
        .assert()
        .success()
        .stdout(predicate::str::contains("crvcoincs.sidePEsPerLayer[8] 3 rows"))
        .stdout(predicate::str::contains("event 3 rows"));
}

#[test]
fn test_process_every_file_failing() {
    let fx = Fixture::new();
    let missing = fx.missing("gone.json");

    treeflow(&fx)
        .args(["process", "-b", "event", "-f"])
        .arg(&missing)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("TF-030"))
        .stderr(predicate::str::contains("Fix:"));
}

#[test]
fn test_process_needs_one_source_mode() {
    let fx = Fixture::new();

    treeflow(&fx)
        .args(["process", "-b", "event"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("TF-001"))
        .stderr(predicate::str::contains("exactly one of --file, --file-list or --defname"));
}

#[test]
fn test_process_duplicate_branch_rejected() {
    let fx = Fixture::new();
    let file = fx.tree("a.json", &[1]);

    treeflow(&fx)
        .args(["process", "-b", "event", "-b", "event", "-f"])
        .arg(&file)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("duplicate branch 'event'"));
}

#[test]
fn test_files_from_catalog_command() {
    let fx = Fixture::new();
    fx.config("[catalog]\ncommand = \"echo\"\n");

    treeflow(&fx)
        .args(["files", "-d", "nts.mu2e.def"])
        .assert()
        .success()
        .stdout(predicate::eq("nts.mu2e.def\n"));
}

#[test]
fn test_files_dedups_list() {
    let fx = Fixture::new();
    let a = fx.tree("a.json", &[1]);
    let list = fx.list("files.txt", &[a.clone(), a.clone()]);

    treeflow(&fx)
        .args(["files", "-l"])
        .arg(&list)
        .assert()
        .success()
        .stdout(predicate::eq(format!("{a}\n")));
}

#[test]
fn test_branches_of_file() {
    let fx = Fixture::new();
    let file = fx.tree("a.json", &[1, 2, 3]);

    treeflow(&fx)
        .args(["branches"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("(3 entries)"))
        .stdout(predicate::str::contains("crvcoincs.PEsPerLayer[4]"));
}

#[test]
fn test_branches_of_remote_file() {
    let fx = Fixture::new();
    let name = fx.remote("disk", "r.json", &[1]);
    fx.config(&format!(
        "[sources]\nremote_root = {:?}\n",
        fx.remote_root().to_string_lossy()
    ));

    treeflow(&fx)
        .args(["branches", "--remote", "--location", "disk", name.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("(1 entries)"));
}

#[test]
fn test_run_echo() {
    let fx = Fixture::new();
    let list = fx.list("files.txt", &[fx.missing("x.json"), fx.missing("y.json")]);

    treeflow(&fx)
        .args(["run", "echo", "-l"])
        .arg(&list)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"x.json\""))
        .stdout(predicate::str::contains("\"y.json\""));
}

#[test]
fn test_run_count_entries_json() {
    let fx = Fixture::new();
    let file = fx.tree("a.json", &[1, 2, 3, 4]);

    let output = treeflow(&fx)
        .args(["run", "count-entries", "--json", "-f"])
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success());

    let outcomes: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcomes[0]["ok"]["value"]["entries"], 4);
}

#[test]
fn test_test_without_area() {
    let fx = Fixture::new();

    treeflow(&fx)
        .arg("test")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No test area selected"));
}

#[test]
fn test_test_reader_area() {
    let fx = Fixture::new();
    let local = fx.tree("local.json", &[1]);
    fx.remote("tape", "remote.json", &[1]);
    fx.config(&format!(
        "[sources]\nremote_root = {:?}\n\n[selftest]\nlocal_file = {:?}\nremote_file = \"remote.json\"\n",
        fx.remote_root().to_string_lossy(),
        local
    ));

    treeflow(&fx)
        .args(["test", "--reader"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All selected tests passed"));
}

#[test]
fn test_test_unconfigured_fails() {
    let fx = Fixture::new();

    treeflow(&fx).args(["test", "--reader"]).assert().code(2);
}

#[test]
fn test_bad_config_file() {
    let fx = Fixture::new();
    fx.config("[engine\nworkers = ");

    treeflow(&fx)
        .args(["files", "-f", "a.json"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("TF-002"));
}
