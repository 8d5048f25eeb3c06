// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical binary plan codec and contract files.
//!
//! The wire format is the compatibility surface; readers and writers
//! are hand-written, no reflective serializer. Everything is
//! little-endian; strings and lists are `u32`-length-prefixed; maps
//! serialise as lists sorted by key bytes. The plan hash is BLAKE2b-256
//! over the canonical body.
//!
//! ```text
//! magic:        "OPAL"
//! version:      u16
//! target:       u16 length + UTF-8
//! plan_hash:    [u8; 32]
//! body_length:  u32
//! body:         canonical plan bytes
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod diff;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use opal_core::{Arg, CommandNode, PLAN_SALT_LEN, Plan, Secret, ShellOp, Step, Value};
use opal_duration::Duration;
use opal_error::{ErrorKind, OpalError};
use std::collections::BTreeMap;

/// File magic.
pub const MAGIC: &[u8; 4] = b"OPAL";

/// Current contract version.
pub const VERSION: u16 = 1;

type Blake2b256 = Blake2b<U32>;

const TAG_SHELL: u8 = 0;
const TAG_DECORATOR: u8 = 1;
const TAG_PATTERN: u8 = 2;

const VAL_STRING: u8 = 0;
const VAL_INT: u8 = 1;
const VAL_FLOAT: u8 = 2;
const VAL_BOOL: u8 = 3;
const VAL_DURATION: u8 = 4;
const VAL_DISPLAY_ID: u8 = 5;

const OP_NONE: u8 = 0;
const OP_AND: u8 = 1;
const OP_OR: u8 = 2;
const OP_PIPE: u8 = 3;
const OP_APPEND: u8 = 4;

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Serialise the canonical plan body.
///
/// Spans are diagnostics and never reach the wire, so formatting-only
/// source edits cannot move the plan hash.
#[must_use]
pub fn encode_body(plan: &Plan) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(&plan.plan_salt);
    write_steps(&mut out, &plan.steps);

    let mut secrets: Vec<&Secret> = plan.secrets.iter().collect();
    secrets.sort_by(|a, b| a.display_id.as_bytes().cmp(b.display_id.as_bytes()));
    write_u32(&mut out, secrets.len() as u32);
    for secret in secrets {
        write_string(&mut out, &secret.key);
        write_string(&mut out, &secret.display_id);
        write_bytes(&mut out, &secret.runtime_value);
    }
    out
}

/// BLAKE2b-256 of a canonical body.
#[must_use]
pub fn hash_body(body: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(body);
    hasher.finalize().into()
}

/// BLAKE2b-256 of a plan's canonical body.
#[must_use]
pub fn plan_hash(plan: &Plan) -> [u8; 32] {
    hash_body(&encode_body(plan))
}

/// Serialise a full contract file; returns the bytes and the plan hash
/// written into the header.
#[must_use]
pub fn write_contract(plan: &Plan) -> (Vec<u8>, [u8; 32]) {
    let body = encode_body(plan);
    let hash = hash_body(&body);
    let mut out = Vec::with_capacity(body.len() + 64);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    let target = plan.target.as_bytes();
    out.extend_from_slice(&(target.len() as u16).to_le_bytes());
    out.extend_from_slice(target);
    out.extend_from_slice(&hash);
    write_u32(&mut out, body.len() as u32);
    out.extend_from_slice(&body);
    (out, hash)
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_bytes(out, s.as_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

fn write_steps(out: &mut Vec<u8>, steps: &[Step]) {
    write_u32(out, steps.len() as u32);
    for step in steps {
        write_u32(out, step.id);
        write_node(out, &step.tree);
    }
}

fn write_node(out: &mut Vec<u8>, node: &CommandNode) {
    match node {
        CommandNode::Shell {
            args,
            operator,
            target,
        } => {
            out.push(TAG_SHELL);
            write_args(out, args);
            out.push(match operator {
                None => OP_NONE,
                Some(ShellOp::And) => OP_AND,
                Some(ShellOp::Or) => OP_OR,
                Some(ShellOp::Pipe) => OP_PIPE,
                Some(ShellOp::Append) => OP_APPEND,
            });
            match target {
                None => out.push(0),
                Some(t) => {
                    out.push(1);
                    write_string(out, t);
                }
            }
        }
        CommandNode::Decorator { name, args, block } => {
            out.push(TAG_DECORATOR);
            write_string(out, name);
            write_args(out, args);
            write_steps(out, block);
        }
        CommandNode::Pattern {
            name,
            args,
            branches,
        } => {
            out.push(TAG_PATTERN);
            write_string(out, name);
            write_args(out, args);
            // BTreeMap iterates key-sorted: the map-as-sorted-list rule.
            write_u32(out, branches.len() as u32);
            for (label, body) in branches {
                write_string(out, label);
                write_steps(out, body);
            }
        }
    }
}

fn write_args(out: &mut Vec<u8>, args: &[Arg]) {
    write_u32(out, args.len() as u32);
    for arg in args {
        write_string(out, &arg.key);
        write_value(out, &arg.val);
    }
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::String(s) => {
            out.push(VAL_STRING);
            write_string(out, s);
        }
        Value::Int(i) => {
            out.push(VAL_INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            out.push(VAL_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Value::Bool(b) => {
            out.push(VAL_BOOL);
            out.push(u8::from(*b));
        }
        Value::Duration(d) => {
            out.push(VAL_DURATION);
            out.extend_from_slice(&d.as_nanos().to_le_bytes());
        }
        Value::DisplayId(id) => {
            out.push(VAL_DISPLAY_ID);
            write_string(out, id);
        }
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// A contract read back from its byte form.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    /// The planned target recorded in the header.
    pub target: String,
    /// The plan hash recorded in the header.
    pub hash: [u8; 32],
    /// The decoded plan.
    pub plan: Plan,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], OpalError> {
        if self.pos + n > self.bytes.len() {
            return Err(corrupt("unexpected end of contract"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, OpalError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, OpalError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("len 2")))
    }

    fn u32(&mut self) -> Result<u32, OpalError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("len 4")))
    }

    fn u64(&mut self) -> Result<u64, OpalError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("len 8")))
    }

    fn string(&mut self) -> Result<String, OpalError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| corrupt("string is not UTF-8"))
    }

    fn byte_list(&mut self) -> Result<Vec<u8>, OpalError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

fn corrupt(message: &str) -> OpalError {
    OpalError::new(ErrorKind::Internal, format!("contract corrupted: {message}"))
}

/// Decode a contract file.
///
/// Magic and version are verified before any plan allocation; the body
/// hash is recomputed and checked against the header.
///
/// # Errors
///
/// `Invalid` for an unknown version; `Internal` for bad magic,
/// truncation, hash mismatch, or any other corruption.
pub fn read_contract(bytes: &[u8]) -> Result<Contract, OpalError> {
    let mut r = Reader::new(bytes);
    let magic = r.take(4)?;
    if magic != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(OpalError::new(
            ErrorKind::Invalid,
            format!("unsupported contract version {version} (this build reads {VERSION})"),
        ));
    }
    let target_len = r.u16()? as usize;
    let target =
        String::from_utf8(r.take(target_len)?.to_vec()).map_err(|_| corrupt("target not UTF-8"))?;
    let hash: [u8; 32] = r.take(32)?.try_into().expect("len 32");
    let body_len = r.u32()? as usize;
    let body = r.take(body_len)?;
    if !r.at_end() {
        return Err(corrupt("trailing bytes after body"));
    }
    if hash_body(body) != hash {
        return Err(corrupt("body does not match recorded hash"));
    }

    let mut r = Reader::new(body);
    let salt: [u8; PLAN_SALT_LEN] = r.take(PLAN_SALT_LEN)?.try_into().expect("len 32");
    let steps = read_steps(&mut r)?;
    let secret_count = r.u32()? as usize;
    let mut secrets = Vec::with_capacity(secret_count.min(1024));
    for _ in 0..secret_count {
        secrets.push(Secret {
            key: r.string()?,
            display_id: r.string()?,
            runtime_value: r.byte_list()?,
        });
    }
    if !r.at_end() {
        return Err(corrupt("trailing bytes in body"));
    }

    let plan = Plan {
        target: target.clone(),
        steps,
        secrets,
        plan_salt: salt,
    };
    plan.check_invariants()
        .map_err(|violation| corrupt(&format!("invariant violation: {violation}")))?;
    Ok(Contract { target, hash, plan })
}

fn read_steps(r: &mut Reader<'_>) -> Result<Vec<Step>, OpalError> {
    let count = r.u32()? as usize;
    let mut steps = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let id = r.u32()?;
        let tree = read_node(r)?;
        steps.push(Step {
            id,
            tree,
            span: None,
        });
    }
    Ok(steps)
}

fn read_node(r: &mut Reader<'_>) -> Result<CommandNode, OpalError> {
    match r.u8()? {
        TAG_SHELL => {
            let args = read_args(r)?;
            let operator = match r.u8()? {
                OP_NONE => None,
                OP_AND => Some(ShellOp::And),
                OP_OR => Some(ShellOp::Or),
                OP_PIPE => Some(ShellOp::Pipe),
                OP_APPEND => Some(ShellOp::Append),
                other => return Err(corrupt(&format!("unknown operator tag {other}"))),
            };
            let target = match r.u8()? {
                0 => None,
                1 => Some(r.string()?),
                other => return Err(corrupt(&format!("bad target flag {other}"))),
            };
            Ok(CommandNode::Shell {
                args,
                operator,
                target,
            })
        }
        TAG_DECORATOR => Ok(CommandNode::Decorator {
            name: r.string()?,
            args: read_args(r)?,
            block: read_steps(r)?,
        }),
        TAG_PATTERN => {
            let name = r.string()?;
            let args = read_args(r)?;
            let count = r.u32()? as usize;
            let mut branches = BTreeMap::new();
            for _ in 0..count {
                let label = r.string()?;
                let body = read_steps(r)?;
                if branches.insert(label.clone(), body).is_some() {
                    return Err(corrupt(&format!("duplicate branch `{label}`")));
                }
            }
            Ok(CommandNode::Pattern {
                name,
                args,
                branches,
            })
        }
        other => Err(corrupt(&format!("unknown node tag {other}"))),
    }
}

fn read_args(r: &mut Reader<'_>) -> Result<Vec<Arg>, OpalError> {
    let count = r.u32()? as usize;
    let mut args = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        let key = r.string()?;
        let val = match r.u8()? {
            VAL_STRING => Value::String(r.string()?),
            VAL_INT => Value::Int(i64::from_le_bytes(r.take(8)?.try_into().expect("len 8"))),
            VAL_FLOAT => Value::Float(f64::from_le_bytes(r.take(8)?.try_into().expect("len 8"))),
            VAL_BOOL => Value::Bool(r.u8()? != 0),
            VAL_DURATION => Value::Duration(Duration::from_nanos(r.u64()?)),
            VAL_DISPLAY_ID => Value::DisplayId(r.string()?),
            other => return Err(corrupt(&format!("unknown value tag {other}"))),
        };
        args.push(Arg { key, val });
    }
    Ok(args)
}

// ---------------------------------------------------------------------------
// Drift
// ---------------------------------------------------------------------------

/// Compare a fresh plan against a contract.
///
/// The caller re-plans the current source seeded with the contract's
/// salt and target before calling this, so equal sources hash equal.
///
/// # Errors
///
/// `Drift` carrying both hashes and the structured tree diff when the
/// hashes differ.
pub fn check_drift(contract: &Contract, fresh: &Plan) -> Result<(), OpalError> {
    let fresh_hash = plan_hash(fresh);
    if fresh_hash == contract.hash {
        return Ok(());
    }
    let changes = diff::diff_plans(&contract.plan, fresh);
    let summary: Vec<String> = changes.iter().map(ToString::to_string).collect();
    Err(OpalError::new(
        ErrorKind::Drift,
        format!(
            "contract drift: source no longer produces the contracted plan \
             (contract {}, current {})",
            hex::encode(contract.hash),
            hex::encode(fresh_hash)
        ),
    )
    .with_hint("re-issue the contract from the current source, or restore the source")
    .with_context("contract_hash", hex::encode(contract.hash))
    .with_context("current_hash", hex::encode(fresh_hash))
    .with_context("diff", summary))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn word(i: usize, text: &str) -> Arg {
        Arg::new(i.to_string(), Value::String(text.into()))
    }

    fn sample_plan() -> Plan {
        let mut branches = BTreeMap::new();
        branches.insert(
            "main".to_string(),
            vec![Step {
                id: 5,
                tree: CommandNode::Shell {
                    args: vec![word(0, "true")],
                    operator: None,
                    target: None,
                },
                span: None,
            }],
        );
        Plan {
            target: "deploy".into(),
            steps: vec![
                Step {
                    id: 1,
                    tree: CommandNode::Shell {
                        args: vec![word(0, "echo"), word(1, "hello")],
                        operator: Some(ShellOp::And),
                        target: None,
                    },
                    span: None,
                },
                Step {
                    id: 2,
                    tree: CommandNode::Shell {
                        args: vec![
                            word(0, "echo"),
                            Arg::new("1", Value::DisplayId("opal:v:abcdefghij".into())),
                        ],
                        operator: None,
                        target: None,
                    },
                    span: None,
                },
                Step {
                    id: 3,
                    tree: CommandNode::Decorator {
                        name: "retry".into(),
                        args: vec![
                            Arg::new("times", Value::Int(3)),
                            Arg::new("delay", Value::Duration("1s".parse().unwrap())),
                            Arg::new("backoff", Value::String("exponential".into())),
                        ],
                        block: vec![Step {
                            id: 4,
                            tree: CommandNode::Pattern {
                                name: "try".into(),
                                args: vec![],
                                branches,
                            },
                            span: None,
                        }],
                    },
                    span: None,
                },
            ],
            secrets: vec![Secret {
                key: "var.SECRET".into(),
                display_id: "opal:v:abcdefghij".into(),
                runtime_value: b"my-secret-value".to_vec(),
            }],
            plan_salt: [9u8; PLAN_SALT_LEN],
        }
    }

    #[test]
    fn body_roundtrip_preserves_plan() {
        let plan = sample_plan();
        let (bytes, _) = write_contract(&plan);
        let contract = read_contract(&bytes).unwrap();
        assert_eq!(contract.target, "deploy");
        assert_eq!(contract.plan, plan);
    }

    #[test]
    fn hash_is_pure_and_stable() {
        let plan = sample_plan();
        assert_eq!(plan_hash(&plan), plan_hash(&plan));
        assert_eq!(encode_body(&plan), encode_body(&plan));
    }

    #[test]
    fn header_hash_matches_returned_hash() {
        let plan = sample_plan();
        let (bytes, hash) = write_contract(&plan);
        let contract = read_contract(&bytes).unwrap();
        assert_eq!(contract.hash, hash);
        assert_eq!(plan_hash(&plan), hash);
    }

    #[test]
    fn spans_never_reach_the_wire() {
        let mut with_span = sample_plan();
        with_span.steps[0].span = Some(opal_error::SourceSpan::new(0, 4, 1, 1));
        assert_eq!(plan_hash(&with_span), plan_hash(&sample_plan()));
    }

    #[test]
    fn semantic_change_moves_the_hash() {
        let base = sample_plan();
        let mut modified = sample_plan();
        if let CommandNode::Shell { args, .. } = &mut modified.steps[0].tree {
            args[1] = word(1, "changed");
        }
        assert_ne!(plan_hash(&base), plan_hash(&modified));

        let mut salted = sample_plan();
        salted.plan_salt = [1u8; PLAN_SALT_LEN];
        assert_ne!(plan_hash(&base), plan_hash(&salted));
    }

    #[test]
    fn secrets_sort_by_display_id_in_body() {
        let mut plan = sample_plan();
        plan.secrets.push(Secret {
            key: "var.A".into(),
            display_id: "opal:v:aaaaaaaaaa".into(),
            runtime_value: b"a".to_vec(),
        });
        let reordered = {
            let mut p = plan.clone();
            p.secrets.reverse();
            p
        };
        assert_eq!(plan_hash(&plan), plan_hash(&reordered));
    }

    #[test]
    fn bad_magic_is_rejected_before_decoding() {
        let (mut bytes, _) = write_contract(&sample_plan());
        bytes[0] = b'X';
        let err = read_contract(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(err.message.contains("magic"));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let (mut bytes, _) = write_contract(&sample_plan());
        bytes[4] = 0xff;
        let err = read_contract(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
        assert!(err.message.contains("version"));
    }

    #[test]
    fn flipped_body_byte_is_corruption() {
        let (mut bytes, _) = write_contract(&sample_plan());
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let err = read_contract(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[test]
    fn truncation_is_corruption() {
        let (bytes, _) = write_contract(&sample_plan());
        let err = read_contract(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[test]
    fn check_drift_accepts_equal_plans() {
        let plan = sample_plan();
        let (bytes, _) = write_contract(&plan);
        let contract = read_contract(&bytes).unwrap();
        assert!(check_drift(&contract, &plan).is_ok());
    }

    #[test]
    fn check_drift_reports_diff_and_hashes() {
        let plan = sample_plan();
        let (bytes, _) = write_contract(&plan);
        let contract = read_contract(&bytes).unwrap();

        let mut modified = sample_plan();
        if let CommandNode::Shell { args, .. } = &mut modified.steps[0].tree {
            args[1] = word(1, "Modified");
        }
        let err = check_drift(&contract, &modified).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Drift);
        assert!(err.message.contains("contract"));
        assert!(err.context.contains_key("diff"));
        assert!(err.context.contains_key("contract_hash"));
    }
}
