// SPDX-License-Identifier: MIT OR Apache-2.0
//! Argument binding: invocation arguments → a validated, ordered bundle.

use crate::descriptor::Descriptor;
use opal_core::{Arg, Value};
use opal_duration::Duration;
use opal_error::{ErrorKind, OpalError, SourceSpan};
use opal_schema::ParamKind;
use serde_json::json;
use std::collections::BTreeMap;

/// One argument as written at the invocation site.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationArg {
    /// Parameter name for named arguments; `None` for positional.
    pub name: Option<String>,
    /// The literal (or already-resolved) value.
    pub value: Value,
    /// Source anchor for diagnostics.
    pub span: Option<SourceSpan>,
}

impl InvocationArg {
    /// A positional argument.
    #[must_use]
    pub fn positional(value: Value) -> Self {
        Self {
            name: None,
            value,
            span: None,
        }
    }

    /// A named argument.
    #[must_use]
    pub fn named(name: &str, value: Value) -> Self {
        Self {
            name: Some(name.to_string()),
            value,
            span: None,
        }
    }
}

/// A bound argument bundle in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Binding {
    /// Bound arguments, one per filled parameter, in declaration order.
    pub args: Vec<Arg>,
    /// Deprecation warnings raised during binding.
    pub warnings: Vec<String>,
}

impl Binding {
    /// Look up a bound value by parameter name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.iter().find(|a| a.key == name).map(|a| &a.val)
    }

    /// A required string value.
    ///
    /// # Errors
    ///
    /// `Invalid` when absent or not a string.
    pub fn str(&self, name: &str) -> Result<&str, OpalError> {
        match self.get(name) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(type_mismatch(name, "string", other)),
            None => Err(missing(name)),
        }
    }

    /// An optional string value.
    #[must_use]
    pub fn opt_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// A required integer value.
    ///
    /// # Errors
    ///
    /// `Invalid` when absent or not an integer.
    pub fn int(&self, name: &str) -> Result<i64, OpalError> {
        match self.get(name) {
            Some(Value::Int(i)) => Ok(*i),
            Some(other) => Err(type_mismatch(name, "integer", other)),
            None => Err(missing(name)),
        }
    }

    /// A boolean value, `default` when absent.
    ///
    /// # Errors
    ///
    /// `Invalid` when present but not a boolean.
    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, OpalError> {
        match self.get(name) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(type_mismatch(name, "boolean", other)),
            None => Ok(default),
        }
    }

    /// A required duration value.
    ///
    /// # Errors
    ///
    /// `Invalid` when absent or not a duration.
    pub fn duration(&self, name: &str) -> Result<Duration, OpalError> {
        match self.get(name) {
            Some(Value::Duration(d)) => Ok(*d),
            Some(other) => Err(type_mismatch(name, "duration", other)),
            None => Err(missing(name)),
        }
    }
}

fn missing(name: &str) -> OpalError {
    OpalError::new(ErrorKind::Invalid, format!("missing required parameter `{name}`"))
}

fn type_mismatch(name: &str, expected: &str, got: &Value) -> OpalError {
    OpalError::new(
        ErrorKind::Invalid,
        format!("parameter `{name}` expects a {expected}, got {}", got.type_name()),
    )
}

/// Bind an invocation's arguments against a descriptor.
///
/// Positional arguments bind to parameters in declaration order with the
/// primary parameter first; named arguments override; deprecated aliases
/// are rewritten with a warning; missing required parameters fail; the
/// remaining slots take their declared defaults. The result is ordered by
/// declaration order regardless of how arguments were written.
///
/// # Errors
///
/// `Invalid` on surplus positional arguments, unknown parameter names,
/// missing required parameters, or undeclared defaults that fail to
/// convert.
pub fn bind_args(descriptor: &Descriptor, invocation: &[InvocationArg]) -> Result<Binding, OpalError> {
    let mut warnings = Vec::new();

    // Positional binding order: primary first, then declaration order.
    let mut positional_order: Vec<&str> = Vec::with_capacity(descriptor.params.len());
    if let Some(primary) = &descriptor.primary_param {
        positional_order.push(primary);
    }
    for param in &descriptor.params {
        if descriptor.primary_param.as_deref() != Some(param.name.as_str()) {
            positional_order.push(&param.name);
        }
    }

    let mut bound: BTreeMap<String, Value> = BTreeMap::new();
    let mut next_positional = 0usize;

    for arg in invocation {
        match &arg.name {
            None => {
                let Some(param_name) = positional_order.get(next_positional) else {
                    let mut err = OpalError::new(
                        ErrorKind::Invalid,
                        format!(
                            "@{} takes at most {} positional arguments",
                            descriptor.path,
                            positional_order.len()
                        ),
                    );
                    if let Some(span) = arg.span {
                        err = err.with_span(span);
                    }
                    return Err(err);
                };
                bound.insert((*param_name).to_string(), arg.value.clone());
                next_positional += 1;
            }
            Some(name) => {
                let canonical = match descriptor.deprecated_aliases.get(name) {
                    Some(canonical) => {
                        let warning = format!(
                            "@{}: parameter `{name}` is deprecated, use `{canonical}`",
                            descriptor.path
                        );
                        tracing::warn!(decorator = %descriptor.path, alias = %name, "{warning}");
                        warnings.push(warning);
                        canonical.clone()
                    }
                    None => name.clone(),
                };
                if descriptor.param(&canonical).is_none() {
                    let mut err = OpalError::new(
                        ErrorKind::Invalid,
                        format!("@{} has no parameter `{canonical}`", descriptor.path),
                    );
                    if let Some(span) = arg.span {
                        err = err.with_span(span);
                    }
                    return Err(err);
                }
                bound.insert(canonical, arg.value.clone());
            }
        }
    }

    // Deprecated enum values are rewritten before validation sees them.
    for param in &descriptor.params {
        if param.kind != ParamKind::Enum {
            continue;
        }
        let Some(spec) = &param.enum_spec else { continue };
        if let Some(Value::String(s)) = bound.get(&param.name) {
            if let Some(replacement) = spec.deprecated.get(s) {
                let warning = format!(
                    "@{}: value `{s}` for `{}` is deprecated, use `{replacement}`",
                    descriptor.path, param.name
                );
                tracing::warn!(decorator = %descriptor.path, "{warning}");
                warnings.push(warning);
                bound.insert(param.name.clone(), Value::String(replacement.clone()));
            }
        }
    }

    // Missing required parameters, then defaults.
    let mut args = Vec::with_capacity(descriptor.params.len());
    for param in &descriptor.params {
        match bound.remove(&param.name) {
            Some(value) => args.push(Arg::new(&param.name, value)),
            None if param.required => {
                return Err(OpalError::new(
                    ErrorKind::Invalid,
                    format!(
                        "@{} is missing required parameter `{}`",
                        descriptor.path, param.name
                    ),
                ));
            }
            None => {
                if let Some(default) = &param.default {
                    args.push(Arg::new(&param.name, json_to_value(param, default)?));
                }
            }
        }
    }

    Ok(Binding { args, warnings })
}

/// Convert a declared JSON default into a plan [`Value`].
fn json_to_value(param: &opal_schema::ParamSchema, default: &serde_json::Value) -> Result<Value, OpalError> {
    let value = match default {
        serde_json::Value::String(s) if param.kind == ParamKind::Duration => {
            let d: Duration = s.parse().map_err(|e| {
                OpalError::new(
                    ErrorKind::Invalid,
                    format!("default for `{}` is not a duration: {e}", param.name),
                )
            })?;
            Value::Duration(d)
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                return Err(OpalError::invalid(format!(
                    "default for `{}` is out of range",
                    param.name
                )));
            }
        }
        other => {
            return Err(OpalError::invalid(format!(
                "default for `{}` has unsupported shape: {other}",
                param.name
            )));
        }
    };
    Ok(value)
}

/// Build the JSON instance validated against the lowered schema.
///
/// DisplayID-valued arguments are omitted: their presence was already
/// enforced by binding, and their runtime value must not surface here.
#[must_use]
pub fn instance_for_validation(binding: &Binding) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for arg in &binding.args {
        let value = match &arg.val {
            Value::String(s) => json!(s),
            Value::Int(i) => json!(i),
            Value::Float(f) => json!(f),
            Value::Bool(b) => json!(b),
            Value::Duration(d) => json!(d.to_string()),
            Value::DisplayId(_) => continue,
        };
        map.insert(arg.key.clone(), value);
    }
    serde_json::Value::Object(map)
}
