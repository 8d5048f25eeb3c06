// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic textual rendering of a plan for dry-run display.
//!
//! This form is for humans; the binary codec is the compatibility
//! surface.

use crate::{Arg, CommandNode, Plan, Step, Value};
use std::fmt::Write as _;

/// Render a plan as an indented step tree.
///
/// Shell leaves render as `@shell <args>`, decorators as `@name(args)`,
/// patterns as `@name(args)` with one labelled line per branch.
#[must_use]
pub fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();
    let target = if plan.target.is_empty() {
        "<script>"
    } else {
        &plan.target
    };
    let _ = writeln!(out, "plan {target}");
    render_steps(&mut out, &plan.steps, 1);
    out
}

fn render_steps(out: &mut String, steps: &[Step], depth: usize) {
    for step in steps {
        render_step(out, step, depth);
    }
}

fn render_step(out: &mut String, step: &Step, depth: usize) {
    let pad = "  ".repeat(depth);
    match &step.tree {
        CommandNode::Shell {
            args,
            operator,
            target,
        } => {
            let _ = write!(out, "{pad}@shell {}", render_words(args));
            if let Some(op) = operator {
                let _ = write!(out, " {op}");
            }
            if let Some(t) = target {
                let _ = write!(out, " {t}");
            }
            out.push('\n');
        }
        CommandNode::Decorator { name, args, block } => {
            let _ = writeln!(out, "{pad}@{name}{}", render_args(args));
            render_steps(out, block, depth + 1);
        }
        CommandNode::Pattern {
            name,
            args,
            branches,
        } => {
            let _ = writeln!(out, "{pad}@{name}{}", render_args(args));
            for (label, body) in branches {
                let _ = writeln!(out, "{pad}  {label}:");
                render_steps(out, body, depth + 2);
            }
        }
    }
}

/// Shell words: bare strings stay bare unless they contain whitespace.
fn render_words(args: &[Arg]) -> String {
    args.iter()
        .map(|arg| match &arg.val {
            Value::String(s) if !s.contains(char::is_whitespace) && !s.is_empty() => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decorator arguments: `(key=value, …)`, empty when there are none.
fn render_args(args: &[Arg]) -> String {
    if args.is_empty() {
        return String::new();
    }
    let inner = args
        .iter()
        .map(|arg| format!("{}={}", arg.key, arg.val))
        .collect::<Vec<_>>()
        .join(", ");
    format!("({inner})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PLAN_SALT_LEN, ShellOp};

    fn word(i: usize, text: &str) -> Arg {
        Arg::new(i.to_string(), Value::String(text.into()))
    }

    #[test]
    fn echo_leaf_renders_as_shell() {
        let plan = Plan {
            target: "hello".into(),
            steps: vec![Step {
                id: 1,
                tree: CommandNode::Shell {
                    args: vec![word(0, "echo"), word(1, "Hello from Opal!")],
                    operator: None,
                    target: None,
                },
                span: None,
            }],
            secrets: vec![],
            plan_salt: [0; PLAN_SALT_LEN],
        };
        let rendered = render_plan(&plan);
        assert!(rendered.contains("plan hello"));
        assert!(rendered.contains("@shell echo \"Hello from Opal!\""));
    }

    #[test]
    fn decorator_block_indents() {
        let plan = Plan {
            target: "t".into(),
            steps: vec![Step {
                id: 1,
                tree: CommandNode::Decorator {
                    name: "retry".into(),
                    args: vec![Arg::new("times", Value::Int(3))],
                    block: vec![Step {
                        id: 2,
                        tree: CommandNode::Shell {
                            args: vec![word(0, "true")],
                            operator: None,
                            target: None,
                        },
                        span: None,
                    }],
                },
                span: None,
            }],
            secrets: vec![],
            plan_salt: [0; PLAN_SALT_LEN],
        };
        let rendered = render_plan(&plan);
        assert!(rendered.contains("@retry(times=3)"));
        assert!(rendered.contains("    @shell true"));
    }

    #[test]
    fn operators_render_inline() {
        let plan = Plan {
            target: "t".into(),
            steps: vec![
                Step {
                    id: 1,
                    tree: CommandNode::Shell {
                        args: vec![word(0, "echo"), word(1, "A")],
                        operator: Some(ShellOp::And),
                        target: None,
                    },
                    span: None,
                },
                Step {
                    id: 2,
                    tree: CommandNode::Shell {
                        args: vec![word(0, "echo"), word(1, "B")],
                        operator: None,
                        target: None,
                    },
                    span: None,
                },
            ],
            secrets: vec![],
            plan_salt: [0; PLAN_SALT_LEN],
        };
        let rendered = render_plan(&plan);
        assert!(rendered.contains("@shell echo A &&"));
        assert!(rendered.contains("@shell echo B"));
    }

    #[test]
    fn pattern_branches_are_labelled_and_sorted() {
        let mut branches = std::collections::BTreeMap::new();
        for label in ["main", "catch", "finally"] {
            branches.insert(label.to_string(), vec![]);
        }
        let plan = Plan {
            target: "t".into(),
            steps: vec![Step {
                id: 1,
                tree: CommandNode::Pattern {
                    name: "try".into(),
                    args: vec![],
                    branches,
                },
                span: None,
            }],
            secrets: vec![],
            plan_salt: [0; PLAN_SALT_LEN],
        };
        let rendered = render_plan(&plan);
        let catch = rendered.find("catch:").unwrap();
        let finally = rendered.find("finally:").unwrap();
        let main = rendered.find("main:").unwrap();
        assert!(catch < finally && finally < main);
    }
}
