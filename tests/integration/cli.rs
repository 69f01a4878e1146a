//! The `replaykit` command-line tool.

use assert_cmd::Command;
use predicates::prelude::*;

use super::common::fixtures::TestDirs;
use replaykit::bundle::{PayloadType, TestCase, TestSuiteManifest};

fn replaykit() -> Command {
    let mut cmd = Command::cargo_bin("replaykit").unwrap();
    cmd.env_remove("RUST_LOG");
    for var in ["MODE", "DB_FILE", "DB_DIR", "SERVER_TIME"] {
        cmd.env_remove(format!("REPLAYKIT_{var}"));
    }
    cmd
}

#[test]
fn test_put_get_and_list_keys() {
    let dirs = TestDirs::new();
    let db = dirs.db_path();

    replaykit()
        .args(["put", "--db"])
        .arg(&db)
        .args(["trace@@tag@@payload", "recorded"])
        .assert()
        .success();

    replaykit()
        .args(["get", "--db"])
        .arg(&db)
        .arg("trace@@tag@@payload")
        .assert()
        .success()
        .stdout("recorded\n");

    replaykit()
        .args(["keys", "--db"])
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("trace@@tag@@payload"));
}

#[test]
fn test_get_missing_key_exits_with_one() {
    let dirs = TestDirs::new();

    replaykit()
        .args(["get", "--db"])
        .arg(dirs.db_path())
        .arg("absent")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("key not found: absent"));
}

#[test]
fn test_manifest_prints_wire_names() {
    let dirs = TestDirs::new();
    let bundle = dirs.cases_dir().join("ts20240101000000");
    std::fs::create_dir_all(&bundle).unwrap();
    TestSuiteManifest {
        db: vec!["replaykit.db".into()],
        flags: vec!["--replaykit-mode=replay".into()],
        input: Vec::new(),
        cases: vec![TestCase {
            req: "reg_req.dat".into(),
            rsp: "reg_rsp.dat".into(),
            req_type: PayloadType::Json,
            rsp_type: PayloadType::Json,
            desc: "checkout".into(),
            uri: "/cart/checkout".into(),
            runner: String::new(),
        }],
        version: 1,
        env_flag_files: None,
    }
    .save(&bundle)
    .unwrap();

    replaykit()
        .arg("manifest")
        .arg(&bundle)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"reqType\": 24"))
        .stdout(predicate::str::contains("/cart/checkout"));

    replaykit()
        .arg("manifest")
        .arg(dirs.root())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no manifest"));
}

#[test]
fn test_config_example() {
    replaykit()
        .args(["config", "--example"])
        .assert()
        .success()
        .stdout(predicate::str::contains("refresh_interval_secs"));
}

#[test]
fn test_config_applies_bundle_flags() {
    let dirs = TestDirs::new();
    let bundle = dirs.cases_dir().join("ts20240101000000");
    std::fs::create_dir_all(&bundle).unwrap();
    TestSuiteManifest {
        db: vec!["replaykit.db".into()],
        flags: vec![
            "--replaykit-mode=replay".into(),
            "--server-time=2024-01-01T00:00:00Z".into(),
            "--replaykit-db-file=replaykit.db".into(),
        ],
        version: 1,
        ..TestSuiteManifest::default()
    }
    .save(&bundle)
    .unwrap();

    replaykit()
        .env("HOME", dirs.root())
        .args(["config", "--bundle"])
        .arg(&bundle)
        .assert()
        .success()
        .stdout(predicate::str::contains("mode = \"replay\""))
        .stdout(predicate::str::contains("server_time = \"2024-01-01T00:00:00Z\""))
        .stdout(predicate::str::contains(bundle.display().to_string()));

    replaykit()
        .env("HOME", dirs.root())
        .args(["config", "--replaykit-mode=record"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mode = \"record\""));
}
