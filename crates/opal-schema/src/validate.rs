// SPDX-License-Identifier: MIT OR Apache-2.0
//! Compiled-validator cache with Opal-specific format validators.

use crate::limits::{SchemaLimits, enforce_limits};
use opal_error::{ErrorKind, OpalError};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock, Mutex};

static SEMVER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*)?(?:\+[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*)?$",
    )
    .expect("semver regex")
});

/// `true` when `s` is a canonical-parsable Opal duration.
fn is_duration(s: &str) -> bool {
    s.parse::<opal_duration::Duration>().is_ok()
}

/// `true` when `s` is an IPv4/IPv6 address with a valid prefix length.
fn is_cidr(s: &str) -> bool {
    let Some((addr, prefix)) = s.split_once('/') else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u8>() else {
        return false;
    };
    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => prefix <= 32,
        Ok(IpAddr::V6(_)) => prefix <= 128,
        Err(_) => false,
    }
}

fn is_semver(s: &str) -> bool {
    SEMVER.is_match(s)
}

/// SHA-256 of the canonical JSON encoding of a schema.
///
/// `serde_json` object maps are key-sorted, so two structurally equal
/// schemas share a digest.
#[must_use]
pub fn schema_digest(schema: &Value) -> [u8; 32] {
    let bytes = serde_json::to_vec(schema).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hasher.finalize().into()
}

/// A cache of compiled JSON-Schema validators keyed by schema digest.
///
/// Compilation happens once per distinct schema; repeated validations of
/// the same decorator stay cheap. Safety limits run before any schema
/// work begins.
pub struct ValidatorCache {
    limits: SchemaLimits,
    validators: Mutex<HashMap<[u8; 32], Arc<jsonschema::Validator>>>,
}

impl ValidatorCache {
    /// Create a cache with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(SchemaLimits::default())
    }

    /// Create a cache with explicit limits.
    #[must_use]
    pub fn with_limits(limits: SchemaLimits) -> Self {
        Self {
            limits,
            validators: Mutex::new(HashMap::new()),
        }
    }

    /// Number of compiled validators currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.lock().expect("validator cache poisoned").len()
    }

    /// Returns `true` when no validator has been compiled yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch (or compile and cache) the validator for `schema`.
    ///
    /// # Errors
    ///
    /// `Invalid` when the schema violates the safety limits or fails to
    /// compile.
    pub fn compile(&self, schema: &Value) -> Result<Arc<jsonschema::Validator>, OpalError> {
        enforce_limits(schema, &self.limits)?;
        let digest = schema_digest(schema);
        {
            let cache = self.validators.lock().expect("validator cache poisoned");
            if let Some(validator) = cache.get(&digest) {
                return Ok(Arc::clone(validator));
            }
        }
        let validator = jsonschema::options()
            .should_validate_formats(true)
            .with_format("duration", is_duration)
            .with_format("cidr", is_cidr)
            .with_format("semver", is_semver)
            .build(schema)
            .map_err(|e| {
                OpalError::new(ErrorKind::Invalid, format!("schema failed to compile: {e}"))
            })?;
        let validator = Arc::new(validator);
        self.validators
            .lock()
            .expect("validator cache poisoned")
            .insert(digest, Arc::clone(&validator));
        Ok(validator)
    }

    /// Validate `instance` against `schema`, collecting every violation.
    ///
    /// # Errors
    ///
    /// `Invalid` carrying one line per violation (instance path plus
    /// message), or a limits/compile failure from [`Self::compile`].
    pub fn validate(&self, schema: &Value, instance: &Value) -> Result<(), OpalError> {
        let validator = self.compile(schema)?;
        let violations: Vec<String> = validator
            .iter_errors(instance)
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{path}: {err}")
                }
            })
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(
                OpalError::new(ErrorKind::Invalid, violations.join("; "))
                    .with_context("violations", &violations),
            )
        }
    }
}

impl Default for ValidatorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ValidatorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorCache")
            .field("limits", &self.limits)
            .field("compiled", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::lower_params;
    use crate::param::{ParamFormat, ParamSchema};
    use serde_json::json;

    #[test]
    fn digest_is_stable_and_structural() {
        let a = json!({"type": "object", "properties": {"x": {"type": "string"}}});
        let b = json!({"properties": {"x": {"type": "string"}}, "type": "object"});
        assert_eq!(schema_digest(&a), schema_digest(&b));
        let c = json!({"type": "object"});
        assert_ne!(schema_digest(&a), schema_digest(&c));
    }

    #[test]
    fn compile_caches_by_digest() {
        let cache = ValidatorCache::new();
        let schema = json!({"type": "integer"});
        let first = cache.compile(&schema).unwrap();
        let second = cache.compile(&schema).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn validate_accepts_and_rejects() {
        let cache = ValidatorCache::new();
        let schema = lower_params(&[
            ParamSchema::integer("times").required().with_range(Some(1.0), None),
            ParamSchema::duration("delay"),
        ]);
        assert!(
            cache
                .validate(&schema, &json!({"times": 3, "delay": "1m30s"}))
                .is_ok()
        );
        let err = cache
            .validate(&schema, &json!({"times": 0, "delay": "1.5s"}))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
        assert!(err.message.contains("times") || err.message.contains("minimum"));
    }

    #[test]
    fn closed_object_rejects_unknown_keys() {
        let cache = ValidatorCache::new();
        let schema = lower_params(&[ParamSchema::string("msg")]);
        assert!(cache.validate(&schema, &json!({"nope": 1})).is_err());
    }

    #[test]
    fn duration_format_enforced() {
        let cache = ValidatorCache::new();
        let schema = lower_params(&[ParamSchema::duration("delay")]);
        assert!(cache.validate(&schema, &json!({"delay": "90s"})).is_ok());
        assert!(cache.validate(&schema, &json!({"delay": "soon"})).is_err());
    }

    #[test]
    fn cidr_format_enforced() {
        assert!(is_cidr("10.0.0.0/8"));
        assert!(is_cidr("2001:db8::/32"));
        assert!(!is_cidr("10.0.0.0/33"));
        assert!(!is_cidr("10.0.0.0"));
        assert!(!is_cidr("hosts/8"));

        let cache = ValidatorCache::new();
        let schema = lower_params(&[ParamSchema::string("net").with_format(ParamFormat::Cidr)]);
        assert!(cache.validate(&schema, &json!({"net": "192.168.0.0/16"})).is_ok());
        assert!(cache.validate(&schema, &json!({"net": "192.168.0.0"})).is_err());
    }

    #[test]
    fn semver_format_enforced() {
        assert!(is_semver("1.2.3"));
        assert!(is_semver("1.0.0-rc.1+build.5"));
        assert!(!is_semver("1.2"));
        assert!(!is_semver("01.2.3"));

        let cache = ValidatorCache::new();
        let schema = lower_params(&[ParamSchema::string("v").with_format(ParamFormat::Semver)]);
        assert!(cache.validate(&schema, &json!({"v": "0.4.2"})).is_ok());
        assert!(cache.validate(&schema, &json!({"v": "latest"})).is_err());
    }

    #[test]
    fn limits_enforced_before_compilation() {
        let cache = ValidatorCache::with_limits(SchemaLimits {
            max_bytes: 16,
            ..SchemaLimits::default()
        });
        let schema = json!({"type": "object", "properties": {"a": {"type": "string"}}});
        let err = cache.compile(&schema).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
        assert!(cache.is_empty());
    }
}
