// SPDX-License-Identifier: MIT OR Apache-2.0
//! The typed parameter schema model decorators declare themselves with.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The kind of a decorator parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// UTF-8 string.
    String,
    /// Signed integer.
    Integer,
    /// Floating-point number.
    Float,
    /// Boolean.
    Boolean,
    /// Canonical Opal duration (`"1m30s"`).
    Duration,
    /// One of a fixed set of string values.
    Enum,
    /// Nested object with declared fields.
    Object,
    /// Homogeneous array.
    Array,
    /// Opaque reference to an authentication method.
    AuthHandle,
    /// Opaque reference to a secret store entry.
    SecretHandle,
    /// Stream scrubbing mode (`all`, `off`, `inherit`).
    ScrubMode,
}

/// Typed string format constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamFormat {
    /// RFC 3986 URI.
    Uri,
    /// RFC 1123 hostname.
    Hostname,
    /// Dotted-quad IPv4 address.
    Ipv4,
    /// RFC 4291 IPv6 address.
    Ipv6,
    /// RFC 5321 email address.
    Email,
    /// IPv4/IPv6 address with prefix length (Opal-specific).
    Cidr,
    /// Semantic version (Opal-specific).
    Semver,
    /// Canonical Opal duration string (Opal-specific).
    Duration,
}

impl ParamFormat {
    /// The `format` keyword value used in the lowered JSON Schema.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uri => "uri",
            Self::Hostname => "hostname",
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
            Self::Email => "email",
            Self::Cidr => "cidr",
            Self::Semver => "semver",
            Self::Duration => "duration",
        }
    }
}

/// Inclusive numeric bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct NumericRange {
    /// Inclusive minimum.
    pub min: Option<f64>,
    /// Inclusive maximum.
    pub max: Option<f64>,
}

/// String or array length bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LengthBounds {
    /// Minimum length.
    pub min: Option<u64>,
    /// Maximum length.
    pub max: Option<u64>,
}

/// Enum value set with an optional default and deprecated aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EnumSpec {
    /// Admissible values.
    pub values: Vec<String>,
    /// Default value when the parameter is omitted.
    pub default: Option<String>,
    /// Deprecated value → replacement value.
    pub deprecated: BTreeMap<String, String>,
}

/// Nested object schema. Closed by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ObjectSchema {
    /// Field name → field schema, in declaration order.
    pub fields: Vec<(String, ParamSchema)>,
    /// Names of required fields.
    pub required: Vec<String>,
    /// Whether undeclared fields are admitted (default `false`).
    pub additional_properties: bool,
}

/// Homogeneous array schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySchema {
    /// Element schema.
    pub element: Box<ParamSchema>,
    /// Length bounds.
    pub length: LengthBounds,
    /// Whether elements must be unique.
    pub unique: bool,
}

/// Schema for one decorator parameter.
///
/// Constructed with the kind-specific builders and refined with the
/// `with_*` methods:
///
/// ```
/// use opal_schema::{ParamFormat, ParamSchema};
///
/// let delay = ParamSchema::duration("delay")
///     .with_default(serde_json::json!("1s"));
/// let host = ParamSchema::string("host")
///     .required()
///     .with_format(ParamFormat::Hostname);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    /// Parameter name.
    pub name: String,
    /// Parameter kind.
    pub kind: ParamKind,
    /// Whether the parameter must be supplied.
    pub required: bool,
    /// Default value, filled when the parameter is omitted.
    pub default: Option<Value>,
    /// Example values for docs and LSP.
    pub examples: Vec<Value>,
    /// Numeric range (integer/float kinds).
    pub range: Option<NumericRange>,
    /// String length bounds (string-like kinds).
    pub length: Option<LengthBounds>,
    /// Regex the value must match (string-like kinds).
    pub pattern: Option<String>,
    /// Typed format constraint (string-like kinds).
    pub format: Option<ParamFormat>,
    /// Enum value set (`Enum` kind).
    pub enum_spec: Option<EnumSpec>,
    /// Object schema (`Object` kind).
    pub object: Option<ObjectSchema>,
    /// Array schema (`Array` kind).
    pub array: Option<ArraySchema>,
    /// Human-readable description.
    pub description: Option<String>,
}

impl ParamSchema {
    fn new(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            default: None,
            examples: Vec::new(),
            range: None,
            length: None,
            pattern: None,
            format: None,
            enum_spec: None,
            object: None,
            array: None,
            description: None,
        }
    }

    /// A string parameter.
    #[must_use]
    pub fn string(name: &str) -> Self {
        Self::new(name, ParamKind::String)
    }

    /// An integer parameter.
    #[must_use]
    pub fn integer(name: &str) -> Self {
        Self::new(name, ParamKind::Integer)
    }

    /// A float parameter.
    #[must_use]
    pub fn float(name: &str) -> Self {
        Self::new(name, ParamKind::Float)
    }

    /// A boolean parameter.
    #[must_use]
    pub fn boolean(name: &str) -> Self {
        Self::new(name, ParamKind::Boolean)
    }

    /// A duration parameter.
    #[must_use]
    pub fn duration(name: &str) -> Self {
        Self::new(name, ParamKind::Duration)
    }

    /// An enum parameter over the given values.
    #[must_use]
    pub fn enumeration(name: &str, values: &[&str]) -> Self {
        let mut schema = Self::new(name, ParamKind::Enum);
        schema.enum_spec = Some(EnumSpec {
            values: values.iter().map(|v| (*v).to_string()).collect(),
            default: None,
            deprecated: BTreeMap::new(),
        });
        schema
    }

    /// An object parameter.
    #[must_use]
    pub fn object(name: &str, object: ObjectSchema) -> Self {
        let mut schema = Self::new(name, ParamKind::Object);
        schema.object = Some(object);
        schema
    }

    /// An array parameter.
    #[must_use]
    pub fn array(name: &str, element: ParamSchema) -> Self {
        let mut schema = Self::new(name, ParamKind::Array);
        schema.array = Some(ArraySchema {
            element: Box::new(element),
            length: LengthBounds::default(),
            unique: false,
        });
        schema
    }

    /// An authentication-handle parameter.
    #[must_use]
    pub fn auth_handle(name: &str) -> Self {
        Self::new(name, ParamKind::AuthHandle)
    }

    /// A secret-handle parameter.
    #[must_use]
    pub fn secret_handle(name: &str) -> Self {
        Self::new(name, ParamKind::SecretHandle)
    }

    /// A scrub-mode parameter.
    #[must_use]
    pub fn scrub_mode(name: &str) -> Self {
        Self::new(name, ParamKind::ScrubMode)
    }

    /// Mark the parameter required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the default value.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Add example values.
    #[must_use]
    pub fn with_examples(mut self, examples: Vec<Value>) -> Self {
        self.examples = examples;
        self
    }

    /// Set the inclusive numeric range.
    #[must_use]
    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.range = Some(NumericRange { min, max });
        self
    }

    /// Set string length bounds.
    #[must_use]
    pub fn with_length(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.length = Some(LengthBounds { min, max });
        self
    }

    /// Set the regex pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    /// Set the typed format.
    #[must_use]
    pub fn with_format(mut self, format: ParamFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Set the enum default value.
    #[must_use]
    pub fn with_enum_default(mut self, default: &str) -> Self {
        if let Some(spec) = &mut self.enum_spec {
            spec.default = Some(default.to_string());
            if self.default.is_none() {
                self.default = Some(Value::String(default.to_string()));
            }
        }
        self
    }

    /// Record a deprecated enum value and its replacement.
    #[must_use]
    pub fn with_deprecated_value(mut self, old: &str, new: &str) -> Self {
        if let Some(spec) = &mut self.enum_spec {
            spec.deprecated.insert(old.to_string(), new.to_string());
        }
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builders_set_kind_and_name() {
        assert_eq!(ParamSchema::string("s").kind, ParamKind::String);
        assert_eq!(ParamSchema::integer("i").kind, ParamKind::Integer);
        assert_eq!(ParamSchema::duration("d").kind, ParamKind::Duration);
        assert_eq!(ParamSchema::scrub_mode("m").name, "m");
    }

    #[test]
    fn enum_builder_records_values_and_default() {
        let schema = ParamSchema::enumeration("backoff", &["exponential", "linear"])
            .with_enum_default("exponential")
            .with_deprecated_value("exp", "exponential");
        let spec = schema.enum_spec.as_ref().unwrap();
        assert_eq!(spec.values, vec!["exponential", "linear"]);
        assert_eq!(spec.default.as_deref(), Some("exponential"));
        assert_eq!(spec.deprecated["exp"], "exponential");
        assert_eq!(schema.default, Some(json!("exponential")));
    }

    #[test]
    fn required_and_default_compose() {
        let schema = ParamSchema::integer("times")
            .required()
            .with_range(Some(1.0), Some(100.0));
        assert!(schema.required);
        assert_eq!(schema.range.unwrap().max, Some(100.0));
    }

    #[test]
    fn array_builder_boxes_element() {
        let schema = ParamSchema::array("hosts", ParamSchema::string("host"));
        assert_eq!(schema.array.unwrap().element.kind, ParamKind::String);
    }

    #[test]
    fn serde_roundtrip() {
        let schema = ParamSchema::string("path")
            .required()
            .with_format(ParamFormat::Uri)
            .with_examples(vec![json!("file:///tmp/x")]);
        let s = serde_json::to_string(&schema).unwrap();
        let back: ParamSchema = serde_json::from_str(&s).unwrap();
        assert_eq!(back, schema);
    }
}
