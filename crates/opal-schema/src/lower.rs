// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lowering of [`ParamSchema`] declarations to JSON Schema documents.
//!
//! The output follows draft 2020-12 semantics. Opal-specific formats
//! (`duration`, `cidr`, `semver`) are emitted as `format` keywords and
//! enforced by the custom validators installed in [`crate::ValidatorCache`].

use crate::param::{ParamKind, ParamSchema};
use serde_json::{Map, Value, json};

/// JSON Schema dialect identifier emitted in lowered schemas.
pub const DIALECT: &str = "https://json-schema.org/draft/2020-12/schema";

/// Lower a full parameter list to the object schema validated against a
/// decorator's argument bundle.
///
/// Parameters appear in declaration order; the object is closed.
#[must_use]
pub fn lower_params(params: &[ParamSchema]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in params {
        properties.insert(param.name.clone(), lower_param(param));
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }
    let mut schema = Map::new();
    schema.insert("$schema".into(), Value::String(DIALECT.into()));
    schema.insert("type".into(), Value::String("object".into()));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), Value::Array(required));
    }
    schema.insert("additionalProperties".into(), Value::Bool(false));
    Value::Object(schema)
}

/// Lower a single parameter schema.
#[must_use]
pub fn lower_param(param: &ParamSchema) -> Value {
    let mut schema = Map::new();
    match param.kind {
        ParamKind::String | ParamKind::AuthHandle | ParamKind::SecretHandle => {
            schema.insert("type".into(), json!("string"));
            lower_string_constraints(param, &mut schema);
        }
        ParamKind::Integer => {
            schema.insert("type".into(), json!("integer"));
            lower_range(param, &mut schema);
        }
        ParamKind::Float => {
            schema.insert("type".into(), json!("number"));
            lower_range(param, &mut schema);
        }
        ParamKind::Boolean => {
            schema.insert("type".into(), json!("boolean"));
        }
        ParamKind::Duration => {
            schema.insert("type".into(), json!("string"));
            schema.insert("format".into(), json!("duration"));
        }
        ParamKind::ScrubMode => {
            schema.insert("type".into(), json!("string"));
            schema.insert("enum".into(), json!(["all", "off", "inherit"]));
        }
        ParamKind::Enum => {
            schema.insert("type".into(), json!("string"));
            if let Some(spec) = &param.enum_spec {
                // Deprecated values remain admissible; binding rewrites
                // them before validation ever sees one.
                let mut values: Vec<Value> = spec
                    .values
                    .iter()
                    .map(|v| Value::String(v.clone()))
                    .collect();
                for old in spec.deprecated.keys() {
                    if !spec.values.iter().any(|v| v == old) {
                        values.push(Value::String(old.clone()));
                    }
                }
                schema.insert("enum".into(), Value::Array(values));
            }
        }
        ParamKind::Object => {
            schema.insert("type".into(), json!("object"));
            if let Some(object) = &param.object {
                let mut properties = Map::new();
                for (name, field) in &object.fields {
                    properties.insert(name.clone(), lower_param(field));
                }
                schema.insert("properties".into(), Value::Object(properties));
                if !object.required.is_empty() {
                    schema.insert("required".into(), json!(object.required));
                }
                schema.insert(
                    "additionalProperties".into(),
                    Value::Bool(object.additional_properties),
                );
            } else {
                schema.insert("additionalProperties".into(), Value::Bool(false));
            }
        }
        ParamKind::Array => {
            schema.insert("type".into(), json!("array"));
            if let Some(array) = &param.array {
                schema.insert("items".into(), lower_param(&array.element));
                if let Some(min) = array.length.min {
                    schema.insert("minItems".into(), json!(min));
                }
                if let Some(max) = array.length.max {
                    schema.insert("maxItems".into(), json!(max));
                }
                if array.unique {
                    schema.insert("uniqueItems".into(), json!(true));
                }
            }
        }
    }
    if let Some(default) = &param.default {
        schema.insert("default".into(), default.clone());
    }
    if !param.examples.is_empty() {
        schema.insert("examples".into(), Value::Array(param.examples.clone()));
    }
    if let Some(description) = &param.description {
        schema.insert("description".into(), json!(description));
    }
    Value::Object(schema)
}

fn lower_string_constraints(param: &ParamSchema, schema: &mut Map<String, Value>) {
    if let Some(length) = &param.length {
        if let Some(min) = length.min {
            schema.insert("minLength".into(), json!(min));
        }
        if let Some(max) = length.max {
            schema.insert("maxLength".into(), json!(max));
        }
    }
    if let Some(pattern) = &param.pattern {
        schema.insert("pattern".into(), json!(pattern));
    }
    if let Some(format) = &param.format {
        schema.insert("format".into(), json!(format.as_str()));
    }
}

fn lower_range(param: &ParamSchema, schema: &mut Map<String, Value>) {
    if let Some(range) = &param.range {
        if let Some(min) = range.min {
            schema.insert("minimum".into(), json!(min));
        }
        if let Some(max) = range.max {
            schema.insert("maximum".into(), json!(max));
        }
    }
}
