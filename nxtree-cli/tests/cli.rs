use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn nxtree() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nxtree"))
}

#[test]
fn test_dry_run_reports_calls() {
    let dir = tempdir().unwrap();
    let manifest = dir.path().join("tree.json");
    fs::write(
        &manifest,
        r#"{ "children": [{ "name": "entry1", "class": "NXentry", "children": [
            { "name": "det1", "class": "NXdetector",
              "value": { "type": "float32", "data": [1, 2, 3, 4, 5, 6, 7, 8, 9] } }
        ] }] }"#,
    )
    .unwrap();

    let output = nxtree()
        .args(["write", "--dry-run"])
        .arg(&manifest)
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Groups created: 1"));
    assert!(stdout.contains("Datasets created: 1"));
}

#[test]
fn test_recorded_errors_fail_the_run() {
    let dir = tempdir().unwrap();
    let manifest = dir.path().join("tree.json");
    fs::write(
        &manifest,
        r#"{ "links": [{ "name": "orphan", "target": "nowhere" }] }"#,
    )
    .unwrap();

    let output = nxtree()
        .args(["write", "--dry-run"])
        .arg(&manifest)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("linking not paired for nowhere"));
}

#[test]
fn test_write_then_inspect() {
    let dir = tempdir().unwrap();
    let manifest = dir.path().join("tree.json");
    let file = dir.path().join("out.nxs");
    fs::write(
        &manifest,
        r#"{ "children": [{ "name": "entry", "class": "NXentry", "children": [
            { "name": "counts", "value": { "type": "int32", "shape": [2, 3], "data": [1, 2, 3, 4, 5, 6] } }
        ] }] }"#,
    )
    .unwrap();

    let status = nxtree()
        .arg("write")
        .arg(&manifest)
        .arg("-o")
        .arg(&file)
        .status()
        .unwrap();
    assert!(status.success());

    let output = nxtree().arg("inspect").arg(&file).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("/entry (NXentry)"));
    assert!(stdout.contains("/entry/counts (SDS) [2, 3]"));
}

#[test]
fn test_malformed_manifest_is_an_error() {
    let dir = tempdir().unwrap();
    let manifest = dir.path().join("tree.json");
    fs::write(&manifest, "{ not json").unwrap();

    let output = nxtree()
        .args(["write", "--dry-run"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}
