//! End-to-end tests for the `rill` binary.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn rill() -> Command {
    let mut cmd = Command::cargo_bin("rill").unwrap();
    cmd.env_remove("RILL_CODE")
        .env_remove("RILL_CLASSPATH")
        .env_remove("RILL_PLATFORM_CLASSPATH")
        .env_remove("RILL_COMPILER_OPTIONS");
    cmd
}

#[test]
fn test_check_accepts_valid_snippet() {
    rill()
        .args(["check", "--code", "|input| input.filter(|v| v > 2)"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok: 1 unit(s), 0 warning(s)"));
}

#[test]
fn test_check_reports_framed_errors() {
    rill()
        .args(["check", "--code", "|input| input.map(|v| v.nope())"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("=========="))
        .stderr(predicate::str::contains(
            "ERROR:no method named `nope` found for type `Value`",
        ))
        .stderr(predicate::str::contains("failed to compile with 1 error(s)"));
}

#[test]
fn test_check_without_snippet_shows_hint() {
    rill()
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("RILL_CODE is not set"))
        .stderr(predicate::str::contains("hint: set RILL_CODE"));
}

#[test]
fn test_run_processes_stdin_lines() {
    let input: String = (1..=10).map(|i| format!("{}\n", i * 100)).collect();
    rill()
        .args([
            "run",
            "--code",
            "return |input| input.buffer(5).map(|list| list.get(4));",
        ])
        .write_stdin(input)
        .assert()
        .success()
        .stdout("500\n1000\n");
}

#[test]
fn test_run_reads_snippet_from_env_and_config() {
    rill()
        .arg("run")
        .env("RILL_CODE", "|input| input.map(|s| s.to_uppercase())")
        .write_stdin("\"a\"\n\"b\"\n")
        .assert()
        .success()
        .stdout("\"A\"\n\"B\"\n");

    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("transform.json");
    fs::write(&config, r#"{ "code": "|input| input.skip(1).take(1)" }"#).unwrap();
    rill()
        .args(["run", "--config"])
        .arg(&config)
        .write_stdin("1\n2\n3\n")
        .assert()
        .success()
        .stdout("2\n");
}

#[test]
fn test_compiled_library_is_usable_from_snippets() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("Math.rs");
    fs::write(&source, "pub fn square(x: i64) -> i64 { x * x }\n").unwrap();
    let out = dir.path().join("classes");

    rill()
        .arg("compile")
        .arg(&source)
        .args(["--unit", "lib.Math", "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 1 unit(s) and 1 resource(s)"));
    assert!(out.join("lib/Math.unit").is_file());
    assert!(out.join("META-INF/rill/lib.Math.json").is_file());

    rill()
        .args(["classpath", "--classpath"])
        .arg(&out)
        .args(["--package", "lib"])
        .assert()
        .success()
        .stdout(predicate::str::contains("binary"))
        .stdout(predicate::str::contains("lib/Math.unit"));

    rill()
        .args([
            "run",
            "--code",
            "use lib::Math;\\n|input| input.map(|v| Math::square(v))",
            "--classpath",
        ])
        .arg(&out)
        .write_stdin("3\n4\n")
        .assert()
        .success()
        .stdout("9\n16\n");
}

#[test]
fn test_compile_failure_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("Broken.rs");
    fs::write(&source, "pub fn f() -> i64 { \"no\" }\n").unwrap();
    let out = dir.path().join("classes");

    rill()
        .arg("compile")
        .arg(&source)
        .arg("--out")
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "ERROR:mismatched types: expected `i64`, found `String`",
        ));
    assert!(!out.exists());
}

#[test]
fn test_classpath_rejects_slash_package() {
    rill()
        .args(["classpath", "--package", "org/example"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid argument"))
        .stderr(predicate::str::contains("hint: package filters use dotted names"));
}
