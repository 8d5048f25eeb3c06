// SPDX-License-Identifier: MIT OR Apache-2.0
//! Implementations of the CLI subcommands: the execute pipeline
//! (parse → plan → scrubbed execute) and the contract pipeline
//! (plan → codec write, or read → re-plan → drift check → execute).

use crate::config::OpalConfig;
use opal_codec::{check_drift, read_contract, write_contract};
use opal_core::Plan;
use opal_core::display::render_plan;
use opal_decorator::Registry;
use opal_error::{ErrorKind, OpalError};
use opal_exec::{CancellationToken, ExecReport, ExecSettings, Executor, cancel_on_signals};
use opal_planner::Planner;
use opal_vault::{IdFactory, Vault, new_plan_salt};
use std::path::Path;

/// Collapse a planner/parser error list into one renderable error.
fn collapse(mut errors: Vec<OpalError>) -> OpalError {
    if errors.len() == 1 {
        return errors.remove(0);
    }
    let first = errors.remove(0);
    let mut message = first.message.clone();
    for err in &errors {
        message.push('\n');
        message.push_str(&err.to_string());
    }
    OpalError {
        message,
        ..first
    }
}

fn read_source(file: &Path) -> Result<String, OpalError> {
    std::fs::read_to_string(file).map_err(|e| {
        OpalError::new(
            ErrorKind::Invalid,
            format!("cannot read `{}`: {e}", file.display()),
        )
        .with_source(e)
    })
}

/// Parse and plan a source file against a fresh vault.
fn plan_source(
    source: &str,
    target: &str,
    factory: IdFactory,
) -> Result<Plan, OpalError> {
    let parsed = opal_parse::parse(source).map_err(collapse)?;
    let registry = Registry::with_builtins();
    let vault = Vault::new(factory);
    let planner = Planner::new(&registry, &vault);
    planner.plan(&parsed, target).map_err(collapse)
}

fn settings_from(config: &OpalConfig, auto_confirm: bool) -> ExecSettings {
    let mut settings = ExecSettings {
        auto_confirm: auto_confirm || config.auto_confirm,
        ..ExecSettings::default()
    };
    if let Some(shell) = &config.shell {
        settings.shell = shell.clone();
    }
    if let Some(workers) = config.max_workers {
        settings.default_max_workers = workers;
    }
    settings
}

async fn execute(plan: &Plan, settings: ExecSettings) -> Result<ExecReport, OpalError> {
    let executor = Executor::new(settings);
    let cancel = CancellationToken::new();
    cancel_on_signals(cancel.clone());
    let report = executor
        .run(
            plan,
            Box::new(std::io::stdout()),
            Box::new(std::io::stderr()),
            cancel,
        )
        .await?;
    tracing::debug!(target: "opal_cli", exit = report.exit, steps = report.timings.len(), "run finished");
    Ok(report)
}

/// `opal run <file> [target]` — Mode 1: plan and execute directly.
///
/// # Errors
///
/// Parse/plan failures, or executor errors; a plain non-zero shell exit
/// is returned as the exit code, not an error.
pub async fn run_file(
    file: &Path,
    target: Option<&str>,
    yes: bool,
    config: &OpalConfig,
) -> Result<i32, OpalError> {
    let source = read_source(file)?;
    // Run mode: per-execution random IDs.
    let plan = plan_source(&source, target.unwrap_or(""), IdFactory::Run)?;
    let report = execute(&plan, settings_from(config, yes)).await?;
    Ok(report.exit)
}

/// `opal plan <file> [target]` — dry run: render the step tree.
///
/// # Errors
///
/// Parse or plan failures.
pub fn plan_file(file: &Path, target: Option<&str>) -> Result<String, OpalError> {
    let source = read_source(file)?;
    let plan = plan_source(
        &source,
        target.unwrap_or(""),
        IdFactory::plan(new_plan_salt()),
    )?;
    Ok(render_plan(&plan))
}

/// `opal contract write <file> <target> -o <out>` — Mode 3: emit a
/// contract artifact. Returns the hex plan hash.
///
/// # Errors
///
/// Parse/plan failures or an unwritable output path.
pub fn contract_write(
    file: &Path,
    target: Option<&str>,
    out: &Path,
) -> Result<String, OpalError> {
    let source = read_source(file)?;
    let plan = plan_source(
        &source,
        target.unwrap_or(""),
        IdFactory::plan(new_plan_salt()),
    )?;
    let (bytes, hash) = write_contract(&plan);
    std::fs::write(out, &bytes).map_err(|e| {
        OpalError::new(
            ErrorKind::Runtime,
            format!("cannot write contract `{}`: {e}", out.display()),
        )
        .with_source(e)
    })?;
    Ok(hex::encode(hash))
}

/// `opal contract exec <contract> --source <file>` — Mode 4: prove the
/// source still produces the contracted plan, then execute it.
///
/// # Errors
///
/// `Drift` with the structured diff when the hashes no longer match;
/// codec errors for a corrupt contract; executor errors from the run.
pub async fn contract_exec(
    contract_path: &Path,
    source_path: &Path,
    yes: bool,
    config: &OpalConfig,
) -> Result<i32, OpalError> {
    let bytes = std::fs::read(contract_path).map_err(|e| {
        OpalError::new(
            ErrorKind::Invalid,
            format!("cannot read contract `{}`: {e}", contract_path.display()),
        )
        .with_source(e)
    })?;
    let contract = read_contract(&bytes)?;
    let source = read_source(source_path)?;

    // Re-plan with the contract's salt so DisplayIDs line up, then
    // compare canonical bytes.
    let fresh = plan_source(
        &source,
        &contract.target,
        IdFactory::plan(contract.plan.plan_salt),
    )?;
    debug_assert_eq!(fresh.plan_salt, contract.plan.plan_salt);
    check_drift(&contract, &fresh)?;

    let report = execute(&contract.plan, settings_from(config, yes)).await?;
    Ok(report.exit)
}

/// `opal schema [decorator]` — print one decorator's parameter schema,
/// or list every registered path.
///
/// # Errors
///
/// `Invalid` for an unknown decorator.
pub fn schema(decorator: Option<&str>) -> Result<String, OpalError> {
    let registry = Registry::with_builtins();
    match decorator {
        Some(path) => {
            let schema = registry.schema_for(path).ok_or_else(|| {
                OpalError::new(ErrorKind::Invalid, format!("unknown decorator @{path}"))
            })?;
            serde_json::to_string_pretty(&schema)
                .map_err(|e| OpalError::internal(format!("schema not serialisable: {e}")))
        }
        None => Ok(registry.list().join("\n")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_temp(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.opl");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn plan_file_renders_tree() {
        let (_dir, path) = write_temp("fun hello = echo \"Hello from Opal!\"\n");
        let rendered = plan_file(&path, Some("hello")).unwrap();
        assert!(rendered.contains("plan hello"));
        assert!(rendered.contains("@shell echo \"Hello from Opal!\""));
    }

    #[test]
    fn plan_file_unknown_target_fails() {
        let (_dir, path) = write_temp("echo hi\n");
        let err = plan_file(&path, Some("ghost")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
    }

    #[test]
    fn contract_roundtrip_verifies() {
        let (_dir, path) = write_temp("fun hello = echo \"Original\"\n");
        let out = _dir.path().join("hello.opc");
        let hash = contract_write(&path, Some("hello"), &out).unwrap();
        assert_eq!(hash.len(), 64);

        let bytes = std::fs::read(&out).unwrap();
        let contract = read_contract(&bytes).unwrap();
        assert_eq!(contract.target, "hello");

        // Same source re-planned with the contract's salt matches.
        let source = std::fs::read_to_string(&path).unwrap();
        let fresh = plan_source(
            &source,
            "hello",
            IdFactory::plan(contract.plan.plan_salt),
        )
        .unwrap();
        assert!(check_drift(&contract, &fresh).is_ok());
    }

    #[test]
    fn contract_detects_modified_source() {
        let (_dir, path) = write_temp("fun hello = echo \"Original\"\n");
        let out = _dir.path().join("hello.opc");
        contract_write(&path, Some("hello"), &out).unwrap();

        std::fs::write(&path, "fun hello = echo \"Modified\"\n").unwrap();
        let bytes = std::fs::read(&out).unwrap();
        let contract = read_contract(&bytes).unwrap();
        let source = std::fs::read_to_string(&path).unwrap();
        let fresh = plan_source(
            &source,
            "hello",
            IdFactory::plan(contract.plan.plan_salt),
        )
        .unwrap();
        let err = check_drift(&contract, &fresh).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Drift);
    }

    #[test]
    fn schema_lists_and_prints() {
        let list = schema(None).unwrap();
        assert!(list.lines().any(|l| l == "retry"));
        let retry = schema(Some("retry")).unwrap();
        assert!(retry.contains("\"times\""));
        assert!(schema(Some("ghost")).is_err());
    }

    #[test]
    fn collapse_joins_messages() {
        let errors = vec![
            OpalError::syntax("first problem"),
            OpalError::syntax("second problem"),
        ];
        let collapsed = collapse(errors);
        assert!(collapsed.message.contains("first problem"));
        assert!(collapsed.message.contains("second problem"));
    }
}
