// SPDX-License-Identifier: MIT OR Apache-2.0
//! Decorator-aware tree diffing for drift reports.
//!
//! Steps pair by `Step.id` where both sides still carry the id, falling
//! back to ordered pairing for inserted or removed tails. The diff is a
//! flat list of human-readable changes anchored by step path.

use opal_core::{Arg, CommandNode, Plan, Step};
use std::collections::BTreeMap;
use std::fmt;

/// One observed difference between contract and current plan.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    /// Where in the tree (e.g. `"step 3"`, `"step 4/branch main"`).
    pub path: String,
    /// Which aspect changed (e.g. `"args"`, `"operator"`).
    pub field: String,
    /// Contract-side rendering.
    pub old: String,
    /// Current-side rendering.
    pub new: String,
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} changed: {} -> {}",
            self.path, self.field, self.old, self.new
        )
    }
}

/// Compare two plans tree-wise.
#[must_use]
pub fn diff_plans(old: &Plan, new: &Plan) -> Vec<DiffEntry> {
    let mut changes = Vec::new();
    if old.target != new.target {
        changes.push(DiffEntry {
            path: "plan".into(),
            field: "target".into(),
            old: old.target.clone(),
            new: new.target.clone(),
        });
    }
    if old.plan_salt != new.plan_salt {
        changes.push(DiffEntry {
            path: "plan".into(),
            field: "plan_salt".into(),
            old: hex::encode(old.plan_salt),
            new: hex::encode(new.plan_salt),
        });
    }
    diff_step_lists(&old.steps, &new.steps, "", &mut changes);
    diff_secret_keys(old, new, &mut changes);
    changes
}

/// Pair steps by id, then ordered for whatever ids do not line up.
fn diff_step_lists(old: &[Step], new: &[Step], prefix: &str, changes: &mut Vec<DiffEntry>) {
    let new_by_id: BTreeMap<u32, &Step> = new.iter().map(|s| (s.id, s)).collect();
    let old_ids: std::collections::BTreeSet<u32> = old.iter().map(|s| s.id).collect();

    let mut matched_new: std::collections::BTreeSet<u32> = std::collections::BTreeSet::new();
    let mut unmatched_old: Vec<&Step> = Vec::new();
    for step in old {
        match new_by_id.get(&step.id) {
            Some(counterpart) => {
                matched_new.insert(step.id);
                diff_nodes(&step.tree, &counterpart.tree, &step_path(prefix, step.id), changes);
            }
            None => unmatched_old.push(step),
        }
    }
    let unmatched_new: Vec<&Step> = new
        .iter()
        .filter(|s| !matched_new.contains(&s.id) && !old_ids.contains(&s.id))
        .collect();

    // Ordered fallback pairing for the id-less remainder.
    let pairs = unmatched_old.len().max(unmatched_new.len());
    for i in 0..pairs {
        match (unmatched_old.get(i), unmatched_new.get(i)) {
            (Some(o), Some(n)) => {
                diff_nodes(&o.tree, &n.tree, &step_path(prefix, o.id), changes);
            }
            (Some(o), None) => changes.push(DiffEntry {
                path: step_path(prefix, o.id),
                field: "step".into(),
                old: summarise(&o.tree),
                new: "(removed)".into(),
            }),
            (None, Some(n)) => changes.push(DiffEntry {
                path: step_path(prefix, n.id),
                field: "step".into(),
                old: "(absent)".into(),
                new: summarise(&n.tree),
            }),
            (None, None) => unreachable!(),
        }
    }
}

fn step_path(prefix: &str, id: u32) -> String {
    if prefix.is_empty() {
        format!("step {id}")
    } else {
        format!("{prefix}/step {id}")
    }
}

fn diff_nodes(old: &CommandNode, new: &CommandNode, path: &str, changes: &mut Vec<DiffEntry>) {
    match (old, new) {
        (
            CommandNode::Shell {
                args: old_args,
                operator: old_op,
                target: old_target,
            },
            CommandNode::Shell {
                args: new_args,
                operator: new_op,
                target: new_target,
            },
        ) => {
            if old_args != new_args {
                changes.push(DiffEntry {
                    path: path.into(),
                    field: "args".into(),
                    old: render_args(old_args),
                    new: render_args(new_args),
                });
            }
            if old_op != new_op {
                changes.push(DiffEntry {
                    path: path.into(),
                    field: "operator".into(),
                    old: render_op(*old_op),
                    new: render_op(*new_op),
                });
            }
            if old_target != new_target {
                changes.push(DiffEntry {
                    path: path.into(),
                    field: "target".into(),
                    old: old_target.clone().unwrap_or_else(|| "(none)".into()),
                    new: new_target.clone().unwrap_or_else(|| "(none)".into()),
                });
            }
        }
        (
            CommandNode::Decorator {
                name: old_name,
                args: old_args,
                block: old_block,
            },
            CommandNode::Decorator {
                name: new_name,
                args: new_args,
                block: new_block,
            },
        ) => {
            if old_name != new_name {
                changes.push(DiffEntry {
                    path: path.into(),
                    field: "decorator".into(),
                    old: format!("@{old_name}"),
                    new: format!("@{new_name}"),
                });
            }
            if old_args != new_args {
                changes.push(DiffEntry {
                    path: path.into(),
                    field: "args".into(),
                    old: render_args(old_args),
                    new: render_args(new_args),
                });
            }
            diff_step_lists(old_block, new_block, path, changes);
        }
        (
            CommandNode::Pattern {
                name: old_name,
                args: old_args,
                branches: old_branches,
            },
            CommandNode::Pattern {
                name: new_name,
                args: new_args,
                branches: new_branches,
            },
        ) => {
            if old_name != new_name {
                changes.push(DiffEntry {
                    path: path.into(),
                    field: "pattern".into(),
                    old: format!("@{old_name}"),
                    new: format!("@{new_name}"),
                });
            }
            if old_args != new_args {
                changes.push(DiffEntry {
                    path: path.into(),
                    field: "args".into(),
                    old: render_args(old_args),
                    new: render_args(new_args),
                });
            }
            for (label, old_body) in old_branches {
                match new_branches.get(label) {
                    Some(new_body) => diff_step_lists(
                        old_body,
                        new_body,
                        &format!("{path}/branch {label}"),
                        changes,
                    ),
                    None => changes.push(DiffEntry {
                        path: path.into(),
                        field: format!("branch {label}"),
                        old: format!("{} steps", old_body.len()),
                        new: "(removed)".into(),
                    }),
                }
            }
            for (label, new_body) in new_branches {
                if !old_branches.contains_key(label) {
                    changes.push(DiffEntry {
                        path: path.into(),
                        field: format!("branch {label}"),
                        old: "(absent)".into(),
                        new: format!("{} steps", new_body.len()),
                    });
                }
            }
        }
        (old, new) => changes.push(DiffEntry {
            path: path.into(),
            field: "node".into(),
            old: summarise(old),
            new: summarise(new),
        }),
    }
}

fn diff_secret_keys(old: &Plan, new: &Plan, changes: &mut Vec<DiffEntry>) {
    let old_keys: Vec<&str> = old.secrets.iter().map(|s| s.key.as_str()).collect();
    let new_keys: Vec<&str> = new.secrets.iter().map(|s| s.key.as_str()).collect();
    if old_keys != new_keys {
        changes.push(DiffEntry {
            path: "plan".into(),
            field: "secrets".into(),
            old: old_keys.join(", "),
            new: new_keys.join(", "),
        });
    }
}

fn render_args(args: &[Arg]) -> String {
    args.iter()
        .map(|a| format!("{}={}", a.key, a.val))
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_op(op: Option<opal_core::ShellOp>) -> String {
    op.map_or_else(|| "(end)".to_string(), |op| op.symbol().to_string())
}

fn summarise(node: &CommandNode) -> String {
    match node {
        CommandNode::Shell { args, .. } => format!("@shell {}", render_args(args)),
        CommandNode::Decorator { name, block, .. } => {
            format!("@{name} ({} steps)", block.len())
        }
        CommandNode::Pattern { name, branches, .. } => {
            format!("@{name} ({} branches)", branches.len())
        }
    }
}
