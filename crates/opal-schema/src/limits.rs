// SPDX-License-Identifier: MIT OR Apache-2.0
//! Safety limits enforced before any schema compilation or validation.

use opal_error::{ErrorKind, OpalError};
use serde_json::Value;

/// Configurable schema safety limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaLimits {
    /// Maximum serialised schema size in bytes.
    pub max_bytes: usize,
    /// Maximum nesting depth, counted across `properties`, `items`, and
    /// `allOf`/`anyOf`/`oneOf`.
    pub max_depth: usize,
    /// Whether remote (`http:`/`https:`) `$ref` targets are admitted.
    pub allow_remote_refs: bool,
}

impl Default for SchemaLimits {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
            max_depth: 10,
            allow_remote_refs: false,
        }
    }
}

/// Check a schema document against the limits.
///
/// # Errors
///
/// Returns an [`ErrorKind::Invalid`] error naming the violated limit.
/// Runs before any compilation so oversized or hostile schemas never
/// reach the validator.
pub fn enforce_limits(schema: &Value, limits: &SchemaLimits) -> Result<(), OpalError> {
    let size = serde_json::to_vec(schema)
        .map_err(|e| OpalError::internal("schema not serialisable").with_source(e))?
        .len();
    if size > limits.max_bytes {
        return Err(OpalError::new(
            ErrorKind::Invalid,
            format!("schema size {size} exceeds the {} byte limit", limits.max_bytes),
        ));
    }

    let depth = nesting_depth(schema);
    if depth > limits.max_depth {
        return Err(OpalError::new(
            ErrorKind::Invalid,
            format!(
                "schema nesting depth {depth} exceeds the limit of {}",
                limits.max_depth
            ),
        ));
    }

    check_refs(schema, limits)
}

/// Depth counted only across the structural nesting keywords.
fn nesting_depth(schema: &Value) -> usize {
    let Value::Object(map) = schema else { return 0 };
    let mut deepest = 0usize;
    if let Some(Value::Object(properties)) = map.get("properties") {
        for sub in properties.values() {
            deepest = deepest.max(1 + nesting_depth(sub));
        }
    }
    if let Some(items) = map.get("items") {
        deepest = deepest.max(1 + nesting_depth(items));
    }
    for combinator in ["allOf", "anyOf", "oneOf"] {
        if let Some(Value::Array(subs)) = map.get(combinator) {
            for sub in subs {
                deepest = deepest.max(1 + nesting_depth(sub));
            }
        }
    }
    deepest
}

fn check_refs(schema: &Value, limits: &SchemaLimits) -> Result<(), OpalError> {
    match schema {
        Value::Object(map) => {
            if let Some(Value::String(target)) = map.get("$ref") {
                let local = target.starts_with('#') || target.starts_with("file:");
                if !local && !limits.allow_remote_refs {
                    return Err(OpalError::new(
                        ErrorKind::Invalid,
                        format!("remote $ref `{target}` is not admitted"),
                    )
                    .with_hint("only fragment and file: references are allowed"));
                }
            }
            map.values().try_for_each(|v| check_refs(v, limits))
        }
        Value::Array(items) => items.iter().try_for_each(|v| check_refs(v, limits)),
        _ => Ok(()),
    }
}
