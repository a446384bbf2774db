//! CLI integration tests
//!
//! These tests run the built binary against files in a temporary directory.

#![cfg(feature = "cli")]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SCHEMA: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="id" type="xs:integer"/>
</xs:schema>"#;

fn xmlguard() -> Command {
    Command::cargo_bin("xmlguard").expect("binary is built")
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

// ============================================================================
// Parse Command Tests
// ============================================================================

#[test]
fn test_cli_parse_well_formed() {
    let dir = TempDir::new().unwrap();
    let doc = write(dir.path(), "doc.xml", "<a><b>1</b></a>");

    xmlguard()
        .args(["parse", doc.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"));
}

#[test]
fn test_cli_parse_malformed() {
    let dir = TempDir::new().unwrap();
    let doc = write(dir.path(), "doc.xml", "<a><b></a>");

    xmlguard()
        .args(["parse", doc.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("Fatal: "));
}

#[test]
fn test_cli_parse_schema_violation() {
    let dir = TempDir::new().unwrap();
    let schema = write(dir.path(), "id.xsd", SCHEMA);
    let doc = write(dir.path(), "doc.xml", "<id>abc</id>");

    xmlguard()
        .args(["parse", doc.to_str().unwrap(), "--schema", schema.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error: "));

    xmlguard()
        .args([
            "parse",
            doc.to_str().unwrap(),
            "--schema",
            schema.to_str().unwrap(),
            "--no-validate",
        ])
        .assert()
        .success();
}

#[test]
fn test_cli_parse_entity_policies() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "chapter.xml", "<p>chapter</p>");
    let doc = write(
        dir.path(),
        "book.xml",
        r#"<!DOCTYPE book [<!ENTITY ch SYSTEM "chapter.xml">]><book>&ch;</book>"#,
    );

    xmlguard()
        .args(["parse", doc.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("chapter.xml"));

    xmlguard()
        .args([
            "parse",
            doc.to_str().unwrap(),
            "--allow-local",
            dir.path().to_str().unwrap(),
        ])
        .assert()
        .success();
}

#[test]
fn test_cli_parse_severity_flags() {
    let dir = TempDir::new().unwrap();
    let schema = write(dir.path(), "id.xsd", SCHEMA);
    let doc = write(
        dir.path(),
        "doc.xml",
        r#"<!DOCTYPE id [<!ENTITY x SYSTEM "http://example.invalid/x">]><id>&x;</id>"#,
    );

    xmlguard()
        .args(["parse", doc.to_str().unwrap(), "--entity-severity", "warning"])
        .assert()
        .success()
        .stderr(predicate::str::starts_with("Warning: "))
        .stdout(predicate::str::contains("ok"));

    xmlguard()
        .args(["parse", doc.to_str().unwrap(), "--entity-severity", "Fatal"])
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("Fatal: "));

    let bad = write(dir.path(), "bad.xml", "<id>abc</id>");
    xmlguard()
        .args([
            "parse",
            bad.to_str().unwrap(),
            "--schema",
            schema.to_str().unwrap(),
            "--violation-severity",
            "warning",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("Warning: "));

    xmlguard()
        .args(["parse", doc.to_str().unwrap(), "--entity-severity", "loud"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid severity"));
}

#[test]
fn test_cli_parse_json_diagnostics() {
    let dir = TempDir::new().unwrap();
    let doc = write(
        dir.path(),
        "doc.xml",
        r#"<!DOCTYPE a [<!ENTITY x SYSTEM "http://example.invalid/x">]><a>&x;</a>"#,
    );

    let output = xmlguard()
        .args(["parse", "--json", doc.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    let diagnostics = json.as_array().unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0]["kind"], "UnresolvedEntity");
    assert_eq!(diagnostics[0]["severity"], "Error");
}

// ============================================================================
// Write Command Tests
// ============================================================================

#[test]
fn test_cli_write_to_stdout() {
    let dir = TempDir::new().unwrap();
    let doc = write(dir.path(), "doc.xml", "<a x=\"1\"><b>t</b></a>");

    xmlguard()
        .args(["write", doc.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("<a x=\"1\"><b>t</b></a>"));
}

#[test]
fn test_cli_write_encoding() {
    let dir = TempDir::new().unwrap();
    let doc = write(dir.path(), "doc.xml", "<a>caf\u{e9} \u{20ac}</a>");
    let out = dir.path().join("out.xml");

    xmlguard()
        .args([
            "write",
            doc.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
            "--encoding",
            "ISO-8859-1",
        ])
        .assert()
        .success();

    let bytes = fs::read(&out).unwrap();
    assert!(bytes.windows(4).any(|w| w == b"caf\xE9"));
    assert!(String::from_utf8_lossy(&bytes).contains("&#x20AC;"));

    xmlguard()
        .args([
            "write",
            doc.to_str().unwrap(),
            "--encoding",
            "US-ASCII",
            "--escape",
            "raw",
        ])
        .assert()
        .code(1);
}
