// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading and validation for the Opal CLI.
//!
//! An optional `opal.toml` next to the invocation can preset prompts
//! and executor knobs; flags always win over file values.

use opal_error::{ErrorKind, OpalError};
use schemars::JsonSchema;
use serde::Deserialize;
use std::path::Path;

/// Top-level CLI configuration.
#[derive(Debug, Clone, Deserialize, Default, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OpalConfig {
    /// Answer `@confirm` prompts with yes without reading stdin.
    #[serde(default)]
    pub auto_confirm: bool,
    /// Shell binary for spawned commands (default `sh`).
    #[serde(default)]
    pub shell: Option<String>,
    /// Default `@parallel` worker bound (default: CPU count).
    #[serde(default)]
    pub max_workers: Option<usize>,
}

impl OpalConfig {
    /// Load from a specific file.
    ///
    /// # Errors
    ///
    /// `Invalid` when the file cannot be read or parsed, or fails
    /// validation.
    pub fn load(path: &Path) -> Result<Self, OpalError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            OpalError::new(
                ErrorKind::Invalid,
                format!("cannot read config `{}`: {e}", path.display()),
            )
            .with_source(e)
        })?;
        let config: OpalConfig = toml::from_str(&text).map_err(|e| {
            OpalError::new(
                ErrorKind::Invalid,
                format!("invalid config `{}`: {e}", path.display()),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `opal.toml` from the working directory when present,
    /// defaults otherwise.
    ///
    /// # Errors
    ///
    /// `Invalid` when a present file fails to parse or validate.
    pub fn load_default() -> Result<Self, OpalError> {
        let path = Path::new("opal.toml");
        if path.is_file() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// `Invalid` for out-of-range values.
    pub fn validate(&self) -> Result<(), OpalError> {
        if let Some(workers) = self.max_workers {
            if workers == 0 {
                return Err(OpalError::new(
                    ErrorKind::Invalid,
                    "max_workers must be at least 1",
                ));
            }
        }
        if let Some(shell) = &self.shell {
            if shell.is_empty() {
                return Err(OpalError::new(ErrorKind::Invalid, "shell must not be empty"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::schema_for;
    use serde_json::json;

    #[test]
    fn defaults_are_permissive() {
        let config = OpalConfig::default();
        assert!(!config.auto_confirm);
        assert!(config.shell.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_full_file() {
        let config: OpalConfig = toml::from_str(
            "auto_confirm = true\nshell = \"bash\"\nmax_workers = 4\n",
        )
        .unwrap();
        assert!(config.auto_confirm);
        assert_eq!(config.shell.as_deref(), Some("bash"));
        assert_eq!(config.max_workers, Some(4));
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<OpalConfig>("surprise = 1\n").is_err());
    }

    #[test]
    fn zero_workers_rejected() {
        let config: OpalConfig = toml::from_str("max_workers = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_errors() {
        let err = OpalConfig::load(Path::new("/nonexistent/opal.toml")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opal.toml");
        std::fs::write(&path, "auto_confirm = true\n").unwrap();
        let config = OpalConfig::load(&path).unwrap();
        assert!(config.auto_confirm);
    }

    #[test]
    fn config_schema_is_generated() {
        let schema = serde_json::to_value(schema_for!(OpalConfig)).unwrap();
        assert_eq!(
            schema.get("$schema").and_then(|v| v.as_str()),
            Some("https://json-schema.org/draft/2020-12/schema"),
        );
        assert!(schema.get("properties").is_some());
    }

    #[test]
    fn example_config_validates_against_schema() {
        let schema = serde_json::to_value(schema_for!(OpalConfig)).unwrap();
        let validator = jsonschema::validator_for(&schema).expect("compile schema");
        assert!(validator.is_valid(&json!({
            "auto_confirm": true,
            "shell": "bash",
            "max_workers": 8
        })));
        assert!(!validator.is_valid(&json!({"max_workers": "many"})));
    }
}
