use assert_cmd::prelude::*;
use pretty_assertions::assert_eq;
use std::fs;
use std::process::Command;

const DROPPER: &str = r##"{
  "name": "dropper.xlsm",
  "sheets": [
    {
      "name": "Macro1",
      "kind": "macrosheet",
      "cells": {
        "A1": { "formula": "=FORMULA(\"bar\",B1)" },
        "A2": { "formula": "=Kernel32.VirtualAlloc(4096,4)" },
        "A3": { "formula": "=FOPEN(\"c:\\a.txt\",3)" },
        "A4": { "formula": "=FWRITE(A3,\"hi\")" },
        "A5": { "formula": "=HALT()" },
        "C1": { "value": "kept" }
      }
    }
  ],
  "definedNames": { "auto_open": "Macro1!$A$1" }
}"##;

fn write_fixture(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("dropper.json");
    fs::write(&path, DROPPER).expect("write fixture");
    path
}

fn xlmdeobf() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("xlmdeobf"))
}

#[test]
fn prints_the_trace_and_side_effects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fixture = write_fixture(&dir);

    let assert = xlmdeobf().arg("-n").arg(&fixture).assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);

    assert!(stdout.contains("[Starting Deobfuscation]"), "stdout:\n{stdout}");
    assert!(
        stdout.contains(r#"CELL:A1        , FullEvaluation      , FORMULA("bar",B1)"#),
        "stdout:\n{stdout}"
    );
    assert!(
        stdout.contains("CELL:A5        , End                 , HALT()"),
        "stdout:\n{stdout}"
    );
    assert!(stdout.contains("Memory: base 4096, size 4\n00000000"), "stdout:\n{stdout}");
    assert!(stdout.contains(r"Files: path c:\a.txt, access 3"), "stdout:\n{stdout}");
    assert!(stdout.trim_end().ends_with("[END of Deobfuscation]"), "stdout:\n{stdout}");
}

#[test]
fn custom_output_format() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fixture = write_fixture(&dir);

    let assert = xlmdeobf()
        .args(["-n", "--output-level", "2", "--output-formula-format", "[[INT-FORMULA]]"])
        .arg(&fixture)
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    let trace: Vec<&str> = stdout
        .lines()
        .skip_while(|line| *line != "[Starting Deobfuscation]")
        .skip(1)
        .take_while(|line| !line.starts_with("Memory:"))
        .collect();

    assert_eq!(
        trace,
        vec![r#"FOPEN("c:\a.txt",3)"#, r#"FWRITE("c:\a.txt","hi")"#, "HALT()"]
    );
}

#[test]
fn exports_a_json_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fixture = write_fixture(&dir);
    let report_path = dir.path().join("report.json");

    xlmdeobf()
        .arg("-n")
        .arg("--export-json")
        .arg(&report_path)
        .arg(&fixture)
        .assert()
        .success();

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).expect("read report"))
            .expect("report is JSON");
    assert_eq!(report["format_version"], 1);
    assert_eq!(report["sha256_hash"].as_str().map(str::len), Some(64));
    assert_eq!(report["md5_hash"].as_str().map(str::len), Some(32));
    assert_eq!(report["defined_names"]["auto_open"], "Macro1!$A$1");
    assert_eq!(report["records"][0]["cell_add"], "A1");
    assert_eq!(report["records"][0]["status"], "FullEvaluation");
    assert_eq!(report["records"][0]["formula"], r#"FORMULA("bar",B1)"#);
    assert_eq!(report["memory_records"][0]["data_hex"], "00000000");
    assert_eq!(report["files"][0]["content_base64"], "aGk=");
}

#[test]
fn extract_only_lists_cells_without_emulating() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fixture = write_fixture(&dir);

    let assert = xlmdeobf()
        .args(["-x", "--defined-names"])
        .arg(&fixture)
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);

    assert!(stdout.contains("auto_open --> Macro1!$A$1"), "stdout:\n{stdout}");
    assert!(stdout.contains("SHEET: Macro1, Macrosheet"), "stdout:\n{stdout}");
    assert!(stdout.contains("CELL:A5, =HALT(), "), "stdout:\n{stdout}");
    assert!(stdout.contains("CELL:C1, , kept"), "stdout:\n{stdout}");
    assert!(!stdout.contains("[Starting Deobfuscation]"), "stdout:\n{stdout}");
}

#[test]
fn sort_formulas_requires_extract_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fixture = write_fixture(&dir);
    xlmdeobf()
        .arg("--sort-formulas")
        .arg(&fixture)
        .assert()
        .failure();
}

#[test]
fn missing_input_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let assert = xlmdeobf()
        .arg("-n")
        .arg(dir.path().join("nope.json"))
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr);
    assert!(stderr.contains("nope.json"), "stderr:\n{stderr}");
}
