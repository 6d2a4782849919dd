use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use chrono::{TimeZone, Utc};
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use patchbay_core::{Batch, BatchId, DiffStore, FileDiffStore, RecordStatus};

const PATCH: &str = "--- a\n+++ b\n@@ -1,2 +1,2 @@\n-<title>Old</title>\n+<title>New</title>\n <creator>Someone</creator>\n";
const BASE: &str = "<title>Old</title>\n<creator>Someone</creator>\n";

fn patchbay_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("patchbay"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("RUST_LOG");
    cmd
}

/// A batch computed far in the future, so every stream on disk is older.
fn seed_batch(home: &Path, batch_id: u64) -> FileDiffStore {
    let store = FileDiffStore::at(home);
    store
        .insert_batch(Batch {
            batch_id: BatchId(batch_id),
            created_at: Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap(),
        })
        .expect("insert batch");
    store
}

fn write_object(home: &Path, target: &str, sub: &str, content: &str) -> PathBuf {
    let dir = home.join(".patchbay").join("objects").join(target);
    fs::create_dir_all(&dir).expect("object dir");
    let path = dir.join(sub);
    fs::write(&path, content).expect("write stream");
    path
}

#[test]
fn apply_patches_objects_and_clears_the_batch() {
    let home = TempDir::new().expect("home");
    let store = seed_batch(home.path(), 7);
    let applied = write_object(home.path(), "demo:1", "DC", BASE);
    store
        .enqueue(BatchId(7), "demo:1".into(), "DC".into(), PATCH)
        .unwrap();
    store
        .enqueue(BatchId(7), "demo:missing".into(), "DC".into(), PATCH)
        .unwrap();

    patchbay_cmd(home.path())
        .args(["apply", "7"])
        .assert()
        .success()
        .stdout(contains("Batch 7 applied: 1 APPLIED, 1 OBJECT_LOAD_FAIL."));

    assert_eq!(
        fs::read_to_string(applied).unwrap(),
        "<title>New</title>\n<creator>Someone</creator>\n"
    );
    assert!(store.records(BatchId(7)).unwrap().is_empty());
}

#[test]
fn locked_objects_are_listed_and_left_alone() {
    let home = TempDir::new().expect("home");
    let store = seed_batch(home.path(), 8);
    let object = write_object(home.path(), "demo:2", "DC", BASE);
    let locks = home.path().join(".patchbay").join("locks");
    fs::create_dir_all(&locks).unwrap();
    fs::write(locks.join("demo:2.lock"), "editor").unwrap();
    store
        .enqueue(BatchId(8), "demo:2".into(), "DC".into(), PATCH)
        .unwrap();

    patchbay_cmd(home.path())
        .args(["apply", "8"])
        .assert()
        .success()
        .stdout(contains("were not updated: demo:2"))
        .stdout(contains("1 IGNORED"));

    assert_eq!(fs::read_to_string(object).unwrap(), BASE);
}

#[test]
fn lock_of_another_batch_run_is_respected() {
    let home = TempDir::new().expect("home");
    let store = seed_batch(home.path(), 8);
    let object = write_object(home.path(), "demo:2", "DC", BASE);
    let locks = home.path().join(".patchbay").join("locks");
    fs::create_dir_all(&locks).unwrap();
    fs::write(locks.join("demo:2.lock"), "patchbay:7").unwrap();
    store
        .enqueue(BatchId(8), "demo:2".into(), "DC".into(), PATCH)
        .unwrap();

    patchbay_cmd(home.path())
        .args(["apply", "8"])
        .assert()
        .success()
        .stdout(contains("1 IGNORED"));

    assert_eq!(fs::read_to_string(object).unwrap(), BASE);
    assert_eq!(
        fs::read_to_string(locks.join("demo:2.lock")).unwrap(),
        "patchbay:7"
    );
}

#[test]
fn link_template_from_config_renders_ignored_objects() {
    let home = TempDir::new().expect("home");
    let store = seed_batch(home.path(), 8);
    write_object(home.path(), "demo:2", "DC", BASE);
    let locks = home.path().join(".patchbay").join("locks");
    fs::create_dir_all(&locks).unwrap();
    fs::write(locks.join("demo:2.lock"), "editor").unwrap();
    fs::write(
        home.path().join(".patchbay").join("config.yaml"),
        "link_template: \"https://repo.example/objects/{target}\"\n",
    )
    .unwrap();
    store
        .enqueue(BatchId(8), "demo:2".into(), "DC".into(), PATCH)
        .unwrap();

    patchbay_cmd(home.path())
        .args(["apply", "8"])
        .assert()
        .success()
        .stdout(contains("https://repo.example/objects/demo:2"));
}

#[test]
fn failed_update_exits_non_zero_and_still_cleans_up() {
    let home = TempDir::new().expect("home");
    let store = seed_batch(home.path(), 9);
    let object = write_object(home.path(), "demo:1", "DC", BASE);
    // A directory squatting on the temp file makes the atomic write fail.
    fs::create_dir_all(home.path().join(".patchbay/objects/demo:1/DC.tmp")).unwrap();
    write_object(home.path(), "demo:2", "DC", BASE);
    store
        .enqueue(BatchId(9), "demo:1".into(), "DC".into(), PATCH)
        .unwrap();
    store
        .enqueue(BatchId(9), "demo:2".into(), "DC".into(), PATCH)
        .unwrap();

    patchbay_cmd(home.path())
        .args(["apply", "9"])
        .assert()
        .failure()
        .stderr(contains(
            "Error applying results of batch 9: save_content(demo:1, DC) failed.",
        ));

    assert_eq!(fs::read_to_string(object).unwrap(), BASE);
    assert!(store.records(BatchId(9)).unwrap().is_empty());
}

#[test]
fn unknown_batch_fails_with_message() {
    let home = TempDir::new().expect("home");
    seed_batch(home.path(), 1);

    patchbay_cmd(home.path())
        .args(["apply", "42"])
        .assert()
        .failure()
        .stderr(contains("Error applying results of batch 42: batch(42) failed."))
        .stderr(contains("batch 42 failed in batch(42)"));
}

#[test]
fn invalid_config_is_reported() {
    let home = TempDir::new().expect("home");
    seed_batch(home.path(), 1);
    fs::write(
        home.path().join(".patchbay").join("config.yaml"),
        "page_sise: 10\n",
    )
    .unwrap();

    patchbay_cmd(home.path())
        .args(["apply", "1"])
        .assert()
        .failure()
        .stderr(contains("config.yaml"));
}

#[test]
fn step_resumes_across_invocations() {
    let home = TempDir::new().expect("home");
    let store = seed_batch(home.path(), 4);
    fs::write(
        home.path().join(".patchbay").join("config.yaml"),
        "page_size: 1\n",
    )
    .unwrap();
    for target in ["demo:1", "demo:2"] {
        write_object(home.path(), target, "DC", BASE);
        store
            .enqueue(BatchId(4), target.into(), "DC".into(), PATCH)
            .unwrap();
    }
    let sandbox = home.path().join(".patchbay").join("runs").join("4.json");

    patchbay_cmd(home.path())
        .args(["step", "4"])
        .assert()
        .success()
        .stdout(contains("Batch 4: 50% done"));
    assert!(sandbox.exists());

    let records = store.records(BatchId(4)).unwrap();
    assert_eq!(records[0].status, RecordStatus::Applied);
    assert_eq!(records[1].status, RecordStatus::Pending);

    patchbay_cmd(home.path())
        .args(["step", "4"])
        .assert()
        .success()
        .stdout(contains("Batch 4 applied: 2 APPLIED."));
    assert!(!sandbox.exists());
    assert!(store.records(BatchId(4)).unwrap().is_empty());
}

#[test]
fn status_lists_records_as_json() {
    let home = TempDir::new().expect("home");
    let store = seed_batch(home.path(), 5);
    store
        .enqueue(BatchId(5), "demo:1".into(), "DC".into(), PATCH)
        .unwrap();
    let second = store
        .enqueue(BatchId(5), "demo:2".into(), "DC".into(), PATCH)
        .unwrap();
    store
        .update_status(second.id, RecordStatus::PatchFail)
        .unwrap();

    let assert = patchbay_cmd(home.path())
        .args(["status", "5", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");

    assert_eq!(json["batch_id"], 5);
    assert_eq!(json["records"].as_array().unwrap().len(), 2);
    assert_eq!(json["records"][1]["status"], "PATCH_FAIL");
    assert_eq!(json["counts"][0]["status"], "PENDING");
    assert_eq!(json["counts"][1]["count"], 1);
    assert!(json["in_progress"].is_null());
}

#[test]
fn status_table_names_targets() {
    let home = TempDir::new().expect("home");
    let store = seed_batch(home.path(), 6);
    store
        .enqueue(BatchId(6), "demo:table".into(), "DC".into(), PATCH)
        .unwrap();

    patchbay_cmd(home.path())
        .args(["status", "6"])
        .assert()
        .success()
        .stdout(contains("demo:table"))
        .stdout(contains("PENDING"))
        .stdout(contains("Batch 6").and(contains("1 record(s)")));
}
