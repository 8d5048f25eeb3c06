// SPDX-License-Identifier: MIT OR Apache-2.0
//! Human-readable output for the Opal CLI.
//!
//! Colouring goes through the `colored` crate, which already honours
//! the `NO_COLOR` contract (any non-empty value disables ANSI output).

use colored::Colorize;
use opal_error::{ErrorKind, OpalError};
use opal_exec::ExecReport;
use std::fmt::Write as _;

/// Render an error for stderr: kind, message, span, hint, and any
/// structured diff lines.
#[must_use]
pub fn render_error(err: &OpalError) -> String {
    let mut out = String::new();
    let kind = match err.kind {
        ErrorKind::Syntax | ErrorKind::Invalid | ErrorKind::Runtime | ErrorKind::Internal => {
            format!("error[{}]", err.kind).red().bold()
        }
        ErrorKind::Drift => format!("error[{}]", err.kind).yellow().bold(),
        ErrorKind::Cancelled => format!("error[{}]", err.kind).yellow().bold(),
    };
    let _ = write!(out, "{kind}: {}", err.message);
    if let Some(span) = &err.span {
        let _ = write!(out, "\n  {} {span}", "-->".blue());
    }
    if let Some(diff) = err.context.get("diff").and_then(|v| v.as_array()) {
        for line in diff.iter().filter_map(|v| v.as_str()) {
            let _ = write!(out, "\n  {} {line}", "~".yellow());
        }
    }
    if let Some(hint) = &err.hint {
        let _ = write!(out, "\n  {}: {hint}", "hint".cyan());
    }
    out
}

/// Render per-step timings for verbose run output.
#[must_use]
pub fn render_timings(report: &ExecReport) -> String {
    let mut out = String::new();
    for timing in &report.timings {
        let _ = writeln!(
            out,
            "step {:>3}  {:>8.1?}",
            timing.id, timing.elapsed
        );
    }
    let _ = write!(out, "exit {}", report.exit);
    out
}
