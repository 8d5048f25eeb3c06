// SPDX-License-Identifier: MIT OR Apache-2.0
//! The stable plan data model for Opal.
//!
//! A [`Plan`] is a deterministic tree of [`Step`]s derived from source,
//! carrying every resolved value-decorator result under a stable
//! [`Secret`] entry. Plans are what the executor runs and what the codec
//! serialises into contract artifacts; if you only take one dependency,
//! take this one.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod display;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use opal_duration::Duration;
pub use opal_error::SourceSpan;

/// Length in bytes of a plan salt.
pub const PLAN_SALT_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A resolved argument value carried in a plan.
///
/// `DisplayId` is the opaque identifier the vault minted for a resolved
/// value-decorator result; the executor swaps it for the runtime bytes,
/// and the scrubber swaps those bytes back on output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// A UTF-8 string.
    String(String),
    /// A signed integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// A boolean.
    Bool(bool),
    /// A canonical duration.
    Duration(Duration),
    /// An opaque identifier for a vault-resolved value.
    DisplayId(String),
}

impl Value {
    /// Short name of the variant, used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "boolean",
            Self::Duration(_) => "duration",
            Self::DisplayId(_) => "display_id",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s:?}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Duration(d) => write!(f, "{d}"),
            Self::DisplayId(id) => f.write_str(id),
        }
    }
}

/// A keyed argument attached to a node.
///
/// Shell nodes use positional keys (`"0"`, `"1"`, …); decorator and
/// pattern nodes use the parameter names from the decorator's schema, in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Arg {
    /// Parameter name or positional index.
    pub key: String,
    /// Resolved value.
    pub val: Value,
}

impl Arg {
    /// Construct an argument.
    pub fn new(key: impl Into<String>, val: Value) -> Self {
        Self {
            key: key.into(),
            val,
        }
    }
}

// ---------------------------------------------------------------------------
// CommandNode
// ---------------------------------------------------------------------------

/// Shell-style operator linking a command to the next one in its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ShellOp {
    /// `&&` — run the next command iff this one exited zero.
    And,
    /// `||` — run the next command iff this one exited non-zero.
    Or,
    /// `|` — feed this command's stdout into the next one's stdin.
    Pipe,
    /// `>>` — append this command's scrubbed stdout to a file; terminates
    /// the chain and carries its target on the node.
    Append,
}

impl ShellOp {
    /// The source token for the operator.
    #[must_use]
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Pipe => "|",
            Self::Append => ">>",
        }
    }
}

impl fmt::Display for ShellOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single node of the plan tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum CommandNode {
    /// One shell command. `operator` links it to the next step of its
    /// chain; `target` is set only for [`ShellOp::Append`].
    Shell {
        /// Positional command arguments.
        args: Vec<Arg>,
        /// Operator linking to the next command, if the chain continues.
        operator: Option<ShellOp>,
        /// Redirect target, set iff `operator` is `Append`.
        target: Option<String>,
    },
    /// An execution decorator wrapping a block of steps.
    Decorator {
        /// Decorator path (e.g. `"retry"`).
        name: String,
        /// Bound arguments in declaration order.
        args: Vec<Arg>,
        /// The wrapped block.
        block: Vec<Step>,
    },
    /// A pattern decorator selecting between named branches.
    Pattern {
        /// Pattern path (e.g. `"when"`, `"try"`).
        name: String,
        /// Bound arguments in declaration order.
        args: Vec<Arg>,
        /// Branch label → branch body. Keys are unique and sorted.
        branches: BTreeMap<String, Vec<Step>>,
    },
}

/// A planned step: a node plus its identity and source anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    /// Unique id, assigned in pre-order starting at 1.
    pub id: u32,
    /// The node tree.
    pub tree: CommandNode,
    /// Source anchor for diagnostics, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<SourceSpan>,
}

// ---------------------------------------------------------------------------
// Secret
// ---------------------------------------------------------------------------

/// One resolved value-decorator occurrence.
///
/// `runtime_value` never serialises through serde — the hand-written
/// binary codec is the only surface that carries the raw bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Secret {
    /// The resolving decorator path plus its primary argument
    /// (e.g. `"env.HOME"`, `"var.SECRET"`).
    pub key: String,
    /// The vault-minted identifier, safe to show in logs.
    pub display_id: String,
    /// Raw resolved bytes.
    #[serde(skip)]
    #[schemars(skip)]
    pub runtime_value: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A deterministic tree of steps derived from one source target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// The planned target: a function name, or `""` for script mode.
    pub target: String,
    /// Top-level steps in source order.
    pub steps: Vec<Step>,
    /// Every resolved value-decorator occurrence, one entry per
    /// occurrence.
    pub secrets: Vec<Secret>,
    /// 32-byte salt seeding DisplayID derivation for this plan.
    pub plan_salt: [u8; PLAN_SALT_LEN],
}

/// Structural invariant violation detected by [`Plan::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanInvariantError {
    /// Step ids were not consecutive pre-order values starting at 1.
    #[error("step id {found} out of pre-order (expected {expected})")]
    StepIdOrder {
        /// The id encountered.
        found: u32,
        /// The id pre-order assignment required.
        expected: u32,
    },
    /// An `Arg` referenced a DisplayID with no matching secret.
    #[error("display id `{0}` referenced but not registered in secrets")]
    UnknownDisplayId(String),
    /// Two secrets carried the same DisplayID.
    #[error("display id `{0}` registered more than once")]
    DuplicateDisplayId(String),
    /// An `Append` operator had no redirect target.
    #[error("step {0}: `>>` operator without a target")]
    AppendWithoutTarget(u32),
    /// A non-`Append` operator had nothing to link to.
    #[error("step {0}: operator `{1}` with no following command")]
    DanglingOperator(u32, ShellOp),
    /// A redirect target on a non-`Append` node.
    #[error("step {0}: redirect target without `>>` operator")]
    TargetWithoutAppend(u32),
}

impl Plan {
    /// Walk every step in pre-order, visiting parents before blocks and
    /// branches (branches in key order).
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Step)) {
        fn go<'a>(steps: &'a [Step], visit: &mut impl FnMut(&'a Step)) {
            for step in steps {
                visit(step);
                match &step.tree {
                    CommandNode::Shell { .. } => {}
                    CommandNode::Decorator { block, .. } => go(block, visit),
                    CommandNode::Pattern { branches, .. } => {
                        for body in branches.values() {
                            go(body, visit);
                        }
                    }
                }
            }
        }
        go(&self.steps, visit);
    }

    /// Total number of steps in the tree.
    #[must_use]
    pub fn step_count(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |_| n += 1);
        n
    }

    /// Find a secret by its DisplayID.
    #[must_use]
    pub fn secret(&self, display_id: &str) -> Option<&Secret> {
        self.secrets.iter().find(|s| s.display_id == display_id)
    }

    /// Verify the structural invariants the planner and codec rely on.
    ///
    /// # Errors
    ///
    /// Returns the first [`PlanInvariantError`] encountered in pre-order.
    pub fn check_invariants(&self) -> Result<(), PlanInvariantError> {
        // (a) ids are consecutive pre-order values starting at 1.
        let mut expected: u32 = 1;
        let mut id_err = None;
        self.walk(&mut |step| {
            if id_err.is_none() && step.id != expected {
                id_err = Some(PlanInvariantError::StepIdOrder {
                    found: step.id,
                    expected,
                });
            }
            expected = expected.saturating_add(1);
        });
        if let Some(err) = id_err {
            return Err(err);
        }

        // (b) referenced DisplayIDs resolve to exactly one secret.
        let mut seen = std::collections::BTreeSet::new();
        for secret in &self.secrets {
            if !seen.insert(secret.display_id.as_str()) {
                return Err(PlanInvariantError::DuplicateDisplayId(
                    secret.display_id.clone(),
                ));
            }
        }
        let mut ref_err = None;
        self.walk(&mut |step| {
            if ref_err.is_some() {
                return;
            }
            let args = match &step.tree {
                CommandNode::Shell { args, .. }
                | CommandNode::Decorator { args, .. }
                | CommandNode::Pattern { args, .. } => args,
            };
            for arg in args {
                if let Value::DisplayId(id) = &arg.val {
                    if !seen.contains(id.as_str()) {
                        ref_err = Some(PlanInvariantError::UnknownDisplayId(id.clone()));
                        return;
                    }
                }
            }
        });
        if let Some(err) = ref_err {
            return Err(err);
        }

        // (c) operator/target consistency within each container list.
        check_chains(&self.steps)?;
        let mut chain_err = None;
        self.walk(&mut |step| {
            if chain_err.is_some() {
                return;
            }
            let result = match &step.tree {
                CommandNode::Decorator { block, .. } => check_chains(block),
                CommandNode::Pattern { branches, .. } => {
                    branches.values().try_for_each(|b| check_chains(b))
                }
                CommandNode::Shell { .. } => Ok(()),
            };
            if let Err(err) = result {
                chain_err = Some(err);
            }
        });
        match chain_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Check operator linkage inside one container's step list.
fn check_chains(steps: &[Step]) -> Result<(), PlanInvariantError> {
    for (i, step) in steps.iter().enumerate() {
        if let CommandNode::Shell {
            operator, target, ..
        } = &step.tree
        {
            match operator {
                Some(ShellOp::Append) => {
                    if target.is_none() {
                        return Err(PlanInvariantError::AppendWithoutTarget(step.id));
                    }
                }
                Some(op) => {
                    if target.is_some() {
                        return Err(PlanInvariantError::TargetWithoutAppend(step.id));
                    }
                    let next_is_shell = matches!(
                        steps.get(i + 1),
                        Some(Step {
                            tree: CommandNode::Shell { .. },
                            ..
                        })
                    );
                    if !next_is_shell {
                        return Err(PlanInvariantError::DanglingOperator(step.id, *op));
                    }
                }
                None => {
                    if target.is_some() {
                        return Err(PlanInvariantError::TargetWithoutAppend(step.id));
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(id: u32, words: &[&str], operator: Option<ShellOp>) -> Step {
        Step {
            id,
            tree: CommandNode::Shell {
                args: words
                    .iter()
                    .enumerate()
                    .map(|(i, w)| Arg::new(i.to_string(), Value::String((*w).into())))
                    .collect(),
                operator,
                target: None,
            },
            span: None,
        }
    }

    fn plan(steps: Vec<Step>) -> Plan {
        Plan {
            target: "t".into(),
            steps,
            secrets: vec![],
            plan_salt: [0; PLAN_SALT_LEN],
        }
    }

    #[test]
    fn walk_is_preorder() {
        let p = plan(vec![
            Step {
                id: 1,
                tree: CommandNode::Decorator {
                    name: "retry".into(),
                    args: vec![],
                    block: vec![shell(2, &["echo", "a"], None)],
                },
                span: None,
            },
            shell(3, &["echo", "b"], None),
        ]);
        let mut ids = vec![];
        p.walk(&mut |s| ids.push(s.id));
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(p.step_count(), 3);
    }

    #[test]
    fn invariants_accept_valid_plan() {
        let p = plan(vec![
            shell(1, &["echo", "a"], Some(ShellOp::And)),
            shell(2, &["echo", "b"], None),
        ]);
        assert!(p.check_invariants().is_ok());
    }

    #[test]
    fn invariants_reject_id_gap() {
        let p = plan(vec![shell(1, &["a"], None), shell(3, &["b"], None)]);
        assert_eq!(
            p.check_invariants(),
            Err(PlanInvariantError::StepIdOrder {
                found: 3,
                expected: 2
            })
        );
    }

    #[test]
    fn invariants_reject_dangling_operator() {
        let p = plan(vec![shell(1, &["echo", "a"], Some(ShellOp::And))]);
        assert_eq!(
            p.check_invariants(),
            Err(PlanInvariantError::DanglingOperator(1, ShellOp::And))
        );
    }

    #[test]
    fn invariants_reject_append_without_target() {
        let p = plan(vec![shell(1, &["echo", "a"], Some(ShellOp::Append))]);
        assert_eq!(
            p.check_invariants(),
            Err(PlanInvariantError::AppendWithoutTarget(1))
        );
    }

    #[test]
    fn append_with_target_is_valid_chain_end() {
        let mut step = shell(1, &["echo", "a"], Some(ShellOp::Append));
        if let CommandNode::Shell { target, .. } = &mut step.tree {
            *target = Some("out.log".into());
        }
        assert!(plan(vec![step]).check_invariants().is_ok());
    }

    #[test]
    fn invariants_reject_unknown_display_id() {
        let p = plan(vec![Step {
            id: 1,
            tree: CommandNode::Shell {
                args: vec![Arg::new("0", Value::DisplayId("opal:v:abcd1234".into()))],
                operator: None,
                target: None,
            },
            span: None,
        }]);
        assert_eq!(
            p.check_invariants(),
            Err(PlanInvariantError::UnknownDisplayId("opal:v:abcd1234".into()))
        );
    }

    #[test]
    fn invariants_reject_duplicate_secret() {
        let mut p = plan(vec![]);
        for _ in 0..2 {
            p.secrets.push(Secret {
                key: "var.X".into(),
                display_id: "opal:v:same".into(),
                runtime_value: b"x".to_vec(),
            });
        }
        assert_eq!(
            p.check_invariants(),
            Err(PlanInvariantError::DuplicateDisplayId("opal:v:same".into()))
        );
    }

    #[test]
    fn secret_runtime_value_never_serialises() {
        let secret = Secret {
            key: "var.SECRET".into(),
            display_id: "opal:v:deadbeef".into(),
            runtime_value: b"my-secret-value".to_vec(),
        };
        let json = serde_json::to_string(&secret).unwrap();
        assert!(!json.contains("my-secret-value"));
        assert!(json.contains("opal:v:deadbeef"));
    }

    #[test]
    fn value_serde_is_tagged() {
        let v = Value::Duration("1m30s".parse().unwrap());
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "duration", "value": "1m30s"})
        );
    }

    #[test]
    fn value_display_forms() {
        assert_eq!(Value::String("hi".into()).to_string(), "\"hi\"");
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::DisplayId("opal:v:ab".into()).to_string(), "opal:v:ab");
    }

    #[test]
    fn shell_op_symbols() {
        assert_eq!(ShellOp::And.symbol(), "&&");
        assert_eq!(ShellOp::Or.symbol(), "||");
        assert_eq!(ShellOp::Pipe.symbol(), "|");
        assert_eq!(ShellOp::Append.symbol(), ">>");
    }
}
