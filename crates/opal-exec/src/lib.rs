// SPDX-License-Identifier: MIT OR Apache-2.0
//! The executor: walks a [`Plan`] tree and runs it.
//!
//! Shell chains honour `&&` / `||` short-circuit, `|` concurrent piping,
//! and `>>` scrubbed file appends; wrapper decorators (`@retry`,
//! `@timeout`, `@parallel`, `@workdir`, `@confirm`) and patterns
//! (`@when`, `@try`) dispatch by node name. Every subprocess is owned by
//! its supervising task — cancellation delivers SIGTERM, waits a grace
//! window, then SIGKILLs; no child outlives its scope. All child output
//! reaches the caller through scrubbing sinks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;

pub use cancel::{CancellationToken, cancel_on_signals};

use opal_core::{Arg, CommandNode, Plan, ShellOp, Step, Value};
use opal_error::{ErrorKind, OpalError};
use opal_scrub::Scrubber;
use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tracing::debug;

/// How long a terminated child may linger between SIGTERM and SIGKILL.
const TERM_GRACE: std::time::Duration = std::time::Duration::from_millis(500);

/// The scrubbing sink type both output streams flow through.
pub type Sink = Scrubber<Box<dyn Write + Send>>;

// ---------------------------------------------------------------------------
// Settings & report
// ---------------------------------------------------------------------------

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecSettings {
    /// Shell binary invoked as `<shell> -c "<command>"`.
    pub shell: String,
    /// Environment for spawned shells (the planner's frozen snapshot
    /// plus caller overrides).
    pub env: BTreeMap<String, String>,
    /// Initial working directory.
    pub workdir: PathBuf,
    /// Answer `@confirm` prompts with yes without reading stdin.
    pub auto_confirm: bool,
    /// `@parallel` worker bound when the plan does not set one.
    pub default_max_workers: usize,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            env: std::env::vars().collect(),
            workdir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            auto_confirm: false,
            default_max_workers: num_cpus::get(),
        }
    }
}

/// Wall-clock timing of one executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTiming {
    /// The step id.
    pub id: u32,
    /// Time spent executing the step.
    pub elapsed: std::time::Duration,
}

/// The outcome of a plan run.
#[derive(Debug, Clone)]
pub struct ExecReport {
    /// Final exit code (the last executed chain's exit, bash-style).
    pub exit: i32,
    /// Per-step timings in completion order.
    pub timings: Vec<StepTiming>,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Per-subtree execution state, cloned and adjusted by wrappers.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Cooperative cancellation for this subtree.
    pub cancel: CancellationToken,
    workdir: PathBuf,
    parallel_prefix: Option<String>,
}

impl ExecContext {
    fn with_workdir(&self, workdir: PathBuf) -> Self {
        Self {
            workdir,
            ..self.clone()
        }
    }

    fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    fn with_prefix(&self, prefix: String) -> Self {
        Self {
            parallel_prefix: Some(prefix),
            ..self.clone()
        }
    }
}

fn cancelled_error() -> OpalError {
    OpalError::new(
        ErrorKind::Cancelled,
        "execution cancelled while a step was running",
    )
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs plans against scrubbing sinks.
#[derive(Debug, Default)]
pub struct Executor {
    /// Executor configuration.
    pub settings: ExecSettings,
}

impl Executor {
    /// An executor with the given settings.
    #[must_use]
    pub fn new(settings: ExecSettings) -> Self {
        Self { settings }
    }

    /// Run a plan. Output flows through scrubbers over `out`/`err`;
    /// `cancel` is the root cancellation token (wire it to signals with
    /// [`cancel_on_signals`]).
    ///
    /// # Errors
    ///
    /// `Runtime` for spawn failures and wrapper contract violations,
    /// `Cancelled` when the root token fires mid-step, `Internal` for
    /// plan/vault inconsistencies. A non-zero shell exit is **not** an
    /// error; it is reported through [`ExecReport::exit`].
    pub async fn run(
        &self,
        plan: &Plan,
        out: Box<dyn Write + Send>,
        err: Box<dyn Write + Send>,
        cancel: CancellationToken,
    ) -> Result<ExecReport, OpalError> {
        let out = Scrubber::new(out);
        let err = Scrubber::new(err);
        // Secrets enter the pattern tables before any byte is written.
        // Empty resolved values (an env var set to "") have nothing to
        // match and would poison the pattern table.
        for secret in &plan.secrets {
            if secret.runtime_value.is_empty() {
                continue;
            }
            out.register_secret(&secret.runtime_value, &secret.display_id);
            err.register_secret(&secret.runtime_value, &secret.display_id);
        }
        let engine = Arc::new(Engine {
            settings: self.settings.clone(),
            secrets: plan
                .secrets
                .iter()
                .map(|s| (s.display_id.clone(), s.runtime_value.clone()))
                .collect(),
            out,
            err,
            timings: Mutex::new(Vec::new()),
        });
        let ctx = ExecContext {
            cancel,
            workdir: self.settings.workdir.clone(),
            parallel_prefix: None,
        };
        let result = engine.clone().run_steps(plan.steps.clone(), ctx).await;
        engine.out.close().map_err(OpalError::from)?;
        engine.err.close().map_err(OpalError::from)?;
        let exit = result?;
        let timings = engine
            .timings
            .lock()
            .expect("timings lock poisoned")
            .clone();
        Ok(ExecReport { exit, timings })
    }
}

struct Engine {
    settings: ExecSettings,
    secrets: Vec<(String, Vec<u8>)>,
    out: Sink,
    err: Sink,
    timings: Mutex<Vec<StepTiming>>,
}

type StepFuture = Pin<Box<dyn Future<Output = Result<i32, OpalError>> + Send>>;

impl Engine {
    fn record_timing(&self, id: u32, elapsed: std::time::Duration) {
        self.timings
            .lock()
            .expect("timings lock poisoned")
            .push(StepTiming { id, elapsed });
    }

    /// Run a step list sequentially; returns the last chain's exit.
    fn run_steps(self: Arc<Self>, steps: Vec<Step>, ctx: ExecContext) -> StepFuture {
        Box::pin(async move {
            let mut exit = 0;
            let mut i = 0;
            while i < steps.len() {
                if ctx.cancel.is_cancelled() {
                    return Err(cancelled_error());
                }
                match &steps[i].tree {
                    CommandNode::Shell { .. } => {
                        let mut j = i;
                        while let CommandNode::Shell {
                            operator: Some(ShellOp::And | ShellOp::Or | ShellOp::Pipe),
                            ..
                        } = &steps[j].tree
                        {
                            j += 1;
                            if j >= steps.len() {
                                return Err(OpalError::internal(
                                    "chain operator with no following command",
                                ));
                            }
                        }
                        exit = self
                            .clone()
                            .run_chain(steps[i..=j].to_vec(), ctx.clone())
                            .await?;
                        i = j + 1;
                    }
                    _ => {
                        exit = self
                            .clone()
                            .run_decorator(steps[i].clone(), ctx.clone())
                            .await?;
                        i += 1;
                    }
                }
            }
            Ok(exit)
        })
    }

    // -- chains ----------------------------------------------------------

    /// Run one chain: pipelines joined by `&&` / `||`, optionally ending
    /// in `>>`.
    async fn run_chain(self: Arc<Self>, chain: Vec<Step>, ctx: ExecContext) -> Result<i32, OpalError> {
        // Group maximal `|` runs into pipelines, remembering the
        // connector that guards each one.
        let mut pipelines: Vec<(Option<ShellOp>, Vec<Step>)> = Vec::new();
        let mut connector = None;
        let mut current = Vec::new();
        for step in chain {
            let op = match &step.tree {
                CommandNode::Shell { operator, .. } => *operator,
                _ => return Err(OpalError::internal("non-shell node inside a chain")),
            };
            current.push(step);
            match op {
                Some(ShellOp::Pipe) => {}
                Some(ShellOp::And) | Some(ShellOp::Or) => {
                    pipelines.push((connector, std::mem::take(&mut current)));
                    connector = op;
                }
                Some(ShellOp::Append) | None => {
                    pipelines.push((connector, std::mem::take(&mut current)));
                    connector = None;
                }
            }
        }

        let mut exit = 0;
        for (guard, pipeline) in pipelines {
            let run = match guard {
                None => true,
                Some(ShellOp::And) => exit == 0,
                Some(ShellOp::Or) => exit != 0,
                _ => true,
            };
            if !run {
                continue;
            }
            if ctx.cancel.is_cancelled() {
                return Err(cancelled_error());
            }
            exit = self.clone().run_pipeline(pipeline, ctx.clone()).await?;
        }
        Ok(exit)
    }

    /// Run one pipeline concurrently; exit = the last command's exit.
    async fn run_pipeline(
        self: Arc<Self>,
        cmds: Vec<Step>,
        ctx: ExecContext,
    ) -> Result<i32, OpalError> {
        let started = std::time::Instant::now();
        let last = cmds.len() - 1;
        let mut redirect: Option<String> = None;
        let mut children: Vec<Child> = Vec::with_capacity(cmds.len());
        let mut pumps = Vec::new();
        let mut previous_stdout: Option<tokio::process::ChildStdout> = None;

        for (k, step) in cmds.iter().enumerate() {
            let CommandNode::Shell {
                args,
                operator,
                target,
            } = &step.tree
            else {
                return Err(OpalError::internal("non-shell node inside a pipeline"));
            };
            if *operator == Some(ShellOp::Append) {
                redirect = Some(self.substitute(target.as_deref().unwrap_or_default()));
            }
            // The materialised command string holds runtime secret
            // values; it must never reach the (unscrubbed) log stream.
            let command_string = self.command_string(args)?;
            debug!(target: "opal_exec", step = step.id, words = args.len(), "spawning shell");

            let mut command = Command::new(&self.settings.shell);
            command
                .arg("-c")
                .arg(&command_string)
                .env_clear()
                .envs(&self.settings.env)
                .current_dir(&ctx.workdir)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .kill_on_drop(true);
            if k > 0 {
                command.stdin(std::process::Stdio::piped());
            }
            let mut child = command.spawn().map_err(|e| {
                OpalError::new(
                    ErrorKind::Runtime,
                    format!("failed to spawn `{}`: {e}", self.settings.shell),
                )
                .with_source(e)
            })?;

            // Wire the previous command's stdout into this stdin.
            if let (Some(mut from), Some(mut into)) = (previous_stdout.take(), child.stdin.take())
            {
                pumps.push(tokio::spawn(async move {
                    let _ = tokio::io::copy(&mut from, &mut into).await;
                }));
            }
            previous_stdout = child.stdout.take();

            // Stderr always flows to the scrubbed error sink.
            if let Some(stderr) = child.stderr.take() {
                let sink = self.err.clone();
                let prefix = ctx.parallel_prefix.clone();
                pumps.push(tokio::spawn(pump_lines(stderr, sink, prefix)));
            }

            // The final stdout goes to the redirect file or the scrubbed
            // output sink.
            if k == last {
                if let Some(stdout) = previous_stdout.take() {
                    match &redirect {
                        Some(path) => {
                            let path = ctx.workdir.join(path);
                            let file = std::fs::OpenOptions::new()
                                .append(true)
                                .create(true)
                                .open(&path)
                                .map_err(|e| {
                                    OpalError::new(
                                        ErrorKind::Runtime,
                                        format!("cannot open `{}` for append: {e}", path.display()),
                                    )
                                    .with_source(e)
                                })?;
                            // The file gets its own scrubber over the
                            // same secret table.
                            let sink: Sink = Scrubber::new(Box::new(file));
                            for (id, bytes) in &self.secrets {
                                if !bytes.is_empty() {
                                    sink.register_secret(bytes, id);
                                }
                            }
                            pumps.push(tokio::spawn(pump_lines(stdout, sink, None)));
                        }
                        None => {
                            let sink = self.out.clone();
                            let prefix = ctx.parallel_prefix.clone();
                            pumps.push(tokio::spawn(pump_lines(stdout, sink, prefix)));
                        }
                    }
                }
            }
            children.push(child);
        }

        // Supervise every child; cancellation SIGTERMs then SIGKILLs.
        let mut exits = Vec::with_capacity(children.len());
        let mut supervisors = Vec::with_capacity(children.len());
        for child in children {
            supervisors.push(tokio::spawn(supervise(child, ctx.cancel.clone())));
        }
        for handle in supervisors {
            let exit = handle
                .await
                .map_err(|e| OpalError::internal(format!("supervisor task failed: {e}")))??;
            exits.push(exit);
        }
        for pump in pumps {
            let _ = pump.await;
        }

        let exit = exits.last().copied().unwrap_or(0);
        for (step, code) in cmds.iter().zip(&exits) {
            debug!(target: "opal_exec", step = step.id, exit = code, "shell finished");
            self.record_timing(step.id, started.elapsed());
        }
        Ok(exit)
    }

    // -- decorators ------------------------------------------------------

    async fn run_decorator(self: Arc<Self>, step: Step, ctx: ExecContext) -> Result<i32, OpalError> {
        let started = std::time::Instant::now();
        let result = match &step.tree {
            CommandNode::Decorator { name, args, block } => match name.as_str() {
                "retry" => self.clone().run_retry(args, block.clone(), ctx).await,
                "timeout" => self.clone().run_timeout(args, block.clone(), ctx).await,
                "parallel" => self.clone().run_parallel(args, block.clone(), ctx).await,
                "workdir" => self.clone().run_workdir(args, block.clone(), ctx).await,
                "confirm" => self.clone().run_confirm(args, block.clone(), ctx).await,
                "log" => self.run_log(args),
                other => Err(OpalError::new(
                    ErrorKind::Runtime,
                    format!("@{other} has no runtime implementation in this build"),
                )),
            },
            CommandNode::Pattern {
                name,
                args,
                branches,
            } => match name.as_str() {
                "when" => self.clone().run_when(args, branches.clone(), ctx).await,
                "try" => self.clone().run_try(branches.clone(), ctx).await,
                other => Err(OpalError::new(
                    ErrorKind::Runtime,
                    format!("@{other} has no runtime implementation in this build"),
                )),
            },
            CommandNode::Shell { .. } => Err(OpalError::internal("shell step dispatched as decorator")),
        };
        self.record_timing(step.id, started.elapsed());
        result
    }

    async fn run_retry(
        self: Arc<Self>,
        args: &[Arg],
        block: Vec<Step>,
        ctx: ExecContext,
    ) -> Result<i32, OpalError> {
        let times = arg_int(args, "times")?.max(1) as u64;
        let delay = arg_duration(args, "delay")?;
        let exponential = arg_str(args, "backoff")? != "linear";
        let mut exit = 0;
        for attempt in 1..=times {
            exit = self.clone().run_steps(block.clone(), ctx.clone()).await?;
            if exit == 0 {
                break;
            }
            if attempt < times {
                let factor = if exponential {
                    1u64 << (attempt - 1).min(32)
                } else {
                    attempt
                };
                let wait = delay.saturating_mul(factor).to_std();
                debug!(target: "opal_exec", attempt, exit, wait_ms = wait.as_millis() as u64, "retrying block");
                tokio::select! {
                    () = tokio::time::sleep(wait) => {}
                    () = ctx.cancel.cancelled() => return Err(cancelled_error()),
                }
            }
        }
        Ok(exit)
    }

    async fn run_timeout(
        self: Arc<Self>,
        args: &[Arg],
        block: Vec<Step>,
        ctx: ExecContext,
    ) -> Result<i32, OpalError> {
        let duration = arg_duration(args, "duration")?;
        let scope = ctx.with_cancel(ctx.cancel.child());
        let mut body = tokio::spawn(self.clone().run_steps(block, scope.clone()));
        tokio::select! {
            joined = &mut body => {
                joined.map_err(|e| OpalError::internal(format!("timeout body task failed: {e}")))?
            }
            () = tokio::time::sleep(duration.to_std()) => {
                scope.cancel.cancel();
                // The body observes the token, SIGTERMs its shells, and
                // returns within the grace window.
                let _ = tokio::time::timeout(TERM_GRACE * 4, body).await;
                Err(OpalError::new(
                    ErrorKind::Runtime,
                    format!("@timeout: block exceeded {duration}"),
                )
                .with_context("timeout", duration.to_string()))
            }
        }
    }

    async fn run_parallel(
        self: Arc<Self>,
        args: &[Arg],
        block: Vec<Step>,
        ctx: ExecContext,
    ) -> Result<i32, OpalError> {
        let workers = match arg_opt_int(args, "max_workers") {
            Some(n) if n >= 1 => n as usize,
            _ => self.settings.default_max_workers.max(1),
        };
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::with_capacity(block.len());
        for step in block {
            let engine = self.clone();
            let child_ctx = ctx.with_prefix(format!("[{}] ", step.id));
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("parallel semaphore never closes");
                engine.run_steps(vec![step], child_ctx).await
            }));
        }
        let mut aggregate = 0;
        let mut first_error = None;
        for handle in handles {
            match handle
                .await
                .map_err(|e| OpalError::internal(format!("parallel child task failed: {e}")))?
            {
                Ok(exit) => aggregate = aggregate.max(exit),
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(_) => {}
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(aggregate),
        }
    }

    async fn run_workdir(
        self: Arc<Self>,
        args: &[Arg],
        block: Vec<Step>,
        ctx: ExecContext,
    ) -> Result<i32, OpalError> {
        let path = self.materialise(arg_value(args, "path")?)?;
        let create = arg_bool_or(args, "createIfNotExists", false)?;
        let dir = ctx.workdir.join(&path);
        if !dir.is_dir() {
            if create {
                std::fs::create_dir_all(&dir).map_err(|e| {
                    OpalError::new(
                        ErrorKind::Runtime,
                        format!("cannot create workdir `{}`: {e}", dir.display()),
                    )
                    .with_source(e)
                })?;
            } else {
                return Err(OpalError::new(
                    ErrorKind::Runtime,
                    format!("workdir `{}` does not exist", dir.display()),
                )
                .with_hint("pass createIfNotExists=true to create it"));
            }
        }
        self.run_steps(block, ctx.with_workdir(dir)).await
    }

    async fn run_confirm(
        self: Arc<Self>,
        args: &[Arg],
        block: Vec<Step>,
        ctx: ExecContext,
    ) -> Result<i32, OpalError> {
        let prompt = self.materialise(arg_value(args, "prompt")?)?;
        let default_yes = arg_bool_or(args, "defaultYes", false)?;
        let accepted = if self.settings.auto_confirm {
            true
        } else {
            let suffix = if default_yes { " [Y/n] " } else { " [y/N] " };
            {
                let mut out = self.out.clone();
                out.write_all(prompt.as_bytes())?;
                out.write_all(suffix.as_bytes())?;
                out.flush()?;
            }
            let mut line = String::new();
            let mut stdin = BufReader::new(tokio::io::stdin());
            tokio::select! {
                read = stdin.read_line(&mut line) => {
                    read.map_err(OpalError::from)?;
                }
                () = ctx.cancel.cancelled() => return Err(cancelled_error()),
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "" => default_yes,
                "y" | "yes" => true,
                _ => false,
            }
        };
        if accepted {
            self.run_steps(block, ctx).await
        } else {
            debug!(target: "opal_exec", "confirm declined, skipping block");
            Ok(0)
        }
    }

    fn run_log(&self, args: &[Arg]) -> Result<i32, OpalError> {
        let msg = self.materialise(arg_value(args, "msg")?)?;
        let level = arg_str(args, "level")?;
        let mut sink = if level == "error" {
            self.err.clone()
        } else {
            self.out.clone()
        };
        sink.write_all(msg.as_bytes())?;
        sink.write_all(b"\n")?;
        sink.flush()?;
        Ok(0)
    }

    async fn run_when(
        self: Arc<Self>,
        args: &[Arg],
        branches: BTreeMap<String, Vec<Step>>,
        ctx: ExecContext,
    ) -> Result<i32, OpalError> {
        let variable = arg_str(args, "variable")?.to_string();
        let value = self.settings.env.get(&variable).cloned();
        let selected = value
            .as_deref()
            .and_then(|v| branches.get(v))
            .or_else(|| branches.get("default"));
        match selected {
            Some(body) => {
                debug!(target: "opal_exec", variable = %variable, value = value.as_deref().unwrap_or("<unset>"), "when branch selected");
                self.run_steps(body.clone(), ctx).await
            }
            None => Ok(0),
        }
    }

    async fn run_try(
        self: Arc<Self>,
        branches: BTreeMap<String, Vec<Step>>,
        ctx: ExecContext,
    ) -> Result<i32, OpalError> {
        let main = branches.get("main").cloned().unwrap_or_default();
        let outcome = self.clone().run_steps(main, ctx.clone()).await;

        // `catch` absorbs non-zero exits and Runtime errors; anything
        // else (Cancelled, Internal) still reaches `finally` below.
        let absorbed = match outcome {
            Ok(0) => Ok(0),
            Ok(code) => match branches.get("catch") {
                Some(catch) => self.clone().run_steps(catch.clone(), ctx.clone()).await,
                None => Ok(code),
            },
            Err(err) if err.kind == ErrorKind::Runtime && branches.contains_key("catch") => {
                let catch = branches.get("catch").cloned().unwrap_or_default();
                self.clone().run_steps(catch, ctx.clone()).await
            }
            other => other,
        };

        // `finally` always runs, under a fresh non-cancellable context.
        let finally_exit = match branches.get("finally") {
            Some(body) => {
                let fin_ctx = ctx.with_cancel(CancellationToken::new());
                Some(self.clone().run_steps(body.clone(), fin_ctx).await?)
            }
            None => None,
        };

        let mut exit = absorbed?;
        if let Some(fin) = finally_exit {
            if fin != 0 {
                exit = fin;
            }
        }
        Ok(exit)
    }

    // -- materialisation -------------------------------------------------

    /// Replace DisplayID text with runtime bytes.
    fn substitute(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (id, bytes) in &self.secrets {
            if result.contains(id.as_str()) {
                result = result.replace(id.as_str(), &String::from_utf8_lossy(bytes));
            }
        }
        result
    }

    /// Resolve one plan value to its runtime string.
    fn materialise(&self, value: &Value) -> Result<String, OpalError> {
        match value {
            Value::String(s) => Ok(self.substitute(s)),
            Value::DisplayId(id) => self
                .secrets
                .iter()
                .find(|(known, _)| known == id)
                .map(|(_, bytes)| String::from_utf8_lossy(bytes).into_owned())
                .ok_or_else(|| {
                    OpalError::internal(format!("display id `{id}` has no vault entry"))
                }),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Duration(d) => Ok(d.to_string()),
        }
    }

    /// Build the `sh -c` command string from positional shell args.
    fn command_string(&self, args: &[Arg]) -> Result<String, OpalError> {
        let mut words = Vec::with_capacity(args.len());
        for arg in args {
            words.push(shell_quote(&self.materialise(&arg.val)?));
        }
        Ok(words.join(" "))
    }
}

/// Quote a word for `sh -c` only when it would otherwise split or
/// break.
///
/// Bare source words pass through verbatim so shell syntax
/// (`$(…)`, globs, redirections inside commands) keeps meaning; words
/// holding whitespace or quotes — quoted-string words and substituted
/// secret values — are single-quoted to stay one argument.
fn shell_quote(word: &str) -> String {
    let needs_quoting =
        word.is_empty() || word.contains(char::is_whitespace) || word.contains('\'');
    if !needs_quoting {
        return word.to_string();
    }
    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('\'');
    for c in word.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Supervise one child: wait, or SIGTERM → grace → SIGKILL on
/// cancellation.
async fn supervise(mut child: Child, cancel: CancellationToken) -> Result<i32, OpalError> {
    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(OpalError::from)?;
            Ok(exit_code(status))
        }
        () = cancel.cancelled() => {
            if let Some(pid) = child.id() {
                send_sigterm(pid);
            }
            match tokio::time::timeout(TERM_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    let _ = child.kill().await;
                }
            }
            Err(cancelled_error())
        }
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(1))
}

#[allow(unsafe_code)]
fn send_sigterm(pid: u32) {
    // SAFETY: kill(2) with a pid we spawned and still own.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

/// Pump an async reader into a scrubbing sink, optionally inserting a
/// per-line prefix (used by `@parallel` children).
async fn pump_lines<R>(reader: R, mut sink: Sink, prefix: Option<String>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    match prefix {
        None => {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if sink.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
            // Exclusive writer at this point in the sequence: safe to
            // drain the carry.
            let _ = sink.flush();
        }
        Some(prefix) => {
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let mut chunk = Vec::with_capacity(prefix.len() + line.len());
                        chunk.extend_from_slice(prefix.as_bytes());
                        chunk.extend_from_slice(&line);
                        if sink.write_all(&chunk).is_err() {
                            break;
                        }
                    }
                }
            }
            // No flush here: sibling writers may still have bytes in
            // the shared carry.
        }
    }
}

// -- arg helpers ------------------------------------------------------------

fn arg_value<'a>(args: &'a [Arg], key: &str) -> Result<&'a Value, OpalError> {
    args.iter()
        .find(|a| a.key == key)
        .map(|a| &a.val)
        .ok_or_else(|| OpalError::internal(format!("planned decorator lost its `{key}` argument")))
}

fn arg_int(args: &[Arg], key: &str) -> Result<i64, OpalError> {
    match arg_value(args, key)? {
        Value::Int(i) => Ok(*i),
        other => Err(OpalError::internal(format!(
            "`{key}` should be an integer, found {}",
            other.type_name()
        ))),
    }
}

fn arg_opt_int(args: &[Arg], key: &str) -> Option<i64> {
    match &args.iter().find(|a| a.key == key)?.val {
        Value::Int(i) => Some(*i),
        _ => None,
    }
}

fn arg_duration(args: &[Arg], key: &str) -> Result<opal_duration::Duration, OpalError> {
    match arg_value(args, key)? {
        Value::Duration(d) => Ok(*d),
        other => Err(OpalError::internal(format!(
            "`{key}` should be a duration, found {}",
            other.type_name()
        ))),
    }
}

fn arg_str<'a>(args: &'a [Arg], key: &str) -> Result<&'a str, OpalError> {
    match arg_value(args, key)? {
        Value::String(s) => Ok(s),
        other => Err(OpalError::internal(format!(
            "`{key}` should be a string, found {}",
            other.type_name()
        ))),
    }
}

fn arg_bool_or(args: &[Arg], key: &str, default: bool) -> Result<bool, OpalError> {
    match args.iter().find(|a| a.key == key).map(|a| &a.val) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(OpalError::internal(format!(
            "`{key}` should be a boolean, found {}",
            other.type_name()
        ))),
        None => Ok(default),
    }
}
