// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end tests that exercise the `opal` binary from the outside:
//! the execute pipeline, the dry-run rendering, and the contract
//! write/verify/execute cycle.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};

/// Helper: build a [`Command`] for the `opal` binary.
fn opal() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("opal").expect("binary `opal` should be built")
}

fn write_script(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("write script");
    path
}

fn run_in(dir: &Path) -> Command {
    let mut cmd = opal();
    cmd.current_dir(dir);
    cmd
}

// ═══════════════════════════════════════════════════════════════════════
// Help and schema surface
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn help_shows_subcommands() {
    opal()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("contract"))
        .stdout(predicate::str::contains("schema"));
}

#[test]
fn schema_lists_builtins() {
    opal()
        .arg("schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("retry"))
        .stdout(predicate::str::contains("ssh.connect"));
}

#[test]
fn schema_prints_parameter_schema() {
    opal()
        .args(["schema", "retry"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"times\""))
        .stdout(predicate::str::contains("additionalProperties"));
}

#[test]
fn schema_unknown_decorator_fails() {
    opal()
        .args(["schema", "nope"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unknown decorator"));
}

// ═══════════════════════════════════════════════════════════════════════
// E1–E4: execute pipeline
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn e1_echo_function() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "hello.opl", "fun hello = echo \"Hello from Opal!\"\n");
    run_in(dir.path())
        .args(["run", script.to_str().unwrap(), "hello"])
        .assert()
        .success()
        .stdout("Hello from Opal!\n");
}

#[test]
fn e1_dry_run_shows_shell_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "hello.opl", "fun hello = echo \"Hello from Opal!\"\n");
    run_in(dir.path())
        .args(["plan", script.to_str().unwrap(), "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("@shell echo \"Hello from Opal!\""));
}

#[test]
fn e2_and_runs_both() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "t.opl", "fun t = echo \"A\" && echo \"B\"\n");
    run_in(dir.path())
        .args(["run", script.to_str().unwrap(), "t"])
        .assert()
        .success()
        .stdout("A\nB\n");
}

#[test]
fn e3_or_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "t.opl", "fun t = echo \"A\" || echo \"B\"\n");
    run_in(dir.path())
        .args(["run", script.to_str().unwrap(), "t"])
        .assert()
        .success()
        .stdout("A\n");
}

#[test]
fn e4_precedence() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        &dir,
        "t.opl",
        "fun t = echo \"A\" && echo \"B\" || echo \"C\"\n",
    );
    run_in(dir.path())
        .args(["run", script.to_str().unwrap(), "t"])
        .assert()
        .success()
        .stdout("A\nB\n");
}

#[test]
fn or_after_failure_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "t.opl", "fun t = false || echo \"C\"\n");
    run_in(dir.path())
        .args(["run", script.to_str().unwrap(), "t"])
        .assert()
        .success()
        .stdout("C\n");
}

#[test]
fn failing_chain_sets_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "t.opl", "fun t = false && echo \"B\"\n");
    run_in(dir.path())
        .args(["run", script.to_str().unwrap(), "t"])
        .assert()
        .failure()
        .code(1)
        .stdout("");
}

// ═══════════════════════════════════════════════════════════════════════
// E5: contract drift
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn e5_contract_drift_fails_with_message() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "hello.opl", "fun hello = echo \"Original\"\n");
    let contract = dir.path().join("hello.opc");

    run_in(dir.path())
        .args([
            "contract",
            "write",
            script.to_str().unwrap(),
            "hello",
            "-o",
            contract.to_str().unwrap(),
        ])
        .assert()
        .success()
        // The plan hash prints as 64 hex characters.
        .stdout(predicate::str::is_match("^[0-9a-f]{64}\n$").unwrap());

    std::fs::write(&script, "fun hello = echo \"Modified\"\n").unwrap();

    run_in(dir.path())
        .args([
            "contract",
            "exec",
            contract.to_str().unwrap(),
            "--source",
            script.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("contract"));
}

#[test]
fn contract_exec_runs_unchanged_source() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "hello.opl", "fun hello = echo \"Original\"\n");
    let contract = dir.path().join("hello.opc");

    run_in(dir.path())
        .args([
            "contract",
            "write",
            script.to_str().unwrap(),
            "hello",
            "-o",
            contract.to_str().unwrap(),
        ])
        .assert()
        .success();

    run_in(dir.path())
        .args([
            "contract",
            "exec",
            contract.to_str().unwrap(),
            "--source",
            script.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout("Original\n");
}

#[test]
fn corrupt_contract_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "hello.opl", "fun hello = echo \"Original\"\n");
    let contract = dir.path().join("hello.opc");
    run_in(dir.path())
        .args([
            "contract",
            "write",
            script.to_str().unwrap(),
            "hello",
            "-o",
            contract.to_str().unwrap(),
        ])
        .assert()
        .success();

    let mut bytes = std::fs::read(&contract).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x40;
    std::fs::write(&contract, &bytes).unwrap();

    run_in(dir.path())
        .args([
            "contract",
            "exec",
            contract.to_str().unwrap(),
            "--source",
            script.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("corrupted"));
}

// ═══════════════════════════════════════════════════════════════════════
// E6: secret scrubbing
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn e6_secret_never_prints() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        &dir,
        "secret.opl",
        "var SECRET = \"my-secret-value\"\necho \"The secret is: @var.SECRET\"\n",
    );
    run_in(dir.path())
        .args(["run", script.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("The secret is: opal:v:"))
        .stdout(predicate::str::contains("my-secret-value").not());
}

// ═══════════════════════════════════════════════════════════════════════
// Error surfaces
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn syntax_error_exits_two_with_kind() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "bad.opl", "echo \"unterminated\n");
    run_in(dir.path())
        .args(["run", script.to_str().unwrap()])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("error[syntax]"));
}

#[test]
fn unknown_decorator_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "bad.opl", "echo @nosuch.THING\n");
    run_in(dir.path())
        .args(["run", script.to_str().unwrap()])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unknown decorator"));
}

#[test]
fn missing_file_reports_invalid() {
    let dir = tempfile::tempdir().unwrap();
    run_in(dir.path())
        .args(["run", "missing.opl"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn shebang_script_runs() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        &dir,
        "exec.opl",
        "#!/usr/bin/env opal\necho \"from script\"\n",
    );
    run_in(dir.path())
        .args(["run", script.to_str().unwrap()])
        .assert()
        .success()
        .stdout("from script\n");
}
