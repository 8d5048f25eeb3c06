// SPDX-License-Identifier: MIT OR Apache-2.0
//! Decorator descriptors: the typed self-description every decorator
//! registers with.

use opal_error::{ErrorKind, OpalError};
use opal_schema::ParamSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a decorator resolves to a value at plan time or wraps
/// execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoratorKind {
    /// Resolved by the planner; produces a vault-registered value.
    Value,
    /// Dispatched by the executor around a block or as an action.
    Execution,
}

/// Where a value decorator may be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportScope {
    /// Resolves at plan time against local state (`@env`, `@file.read`).
    RootOnly,
    /// Any transport; plan-seeded (`@var`, `@random`).
    #[default]
    Agnostic,
    /// Only via an explicit transport parameter (reserved).
    RemoteAware,
}

/// The transport context the planner is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportContext {
    /// Top-level planning against the local machine.
    #[default]
    Root,
    /// Inside the block of a `switches_transport` decorator.
    Switched,
}

/// Whether a decorator rejects, accepts, or demands a body block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockRequirement {
    /// No block admitted.
    #[default]
    Forbidden,
    /// Block admitted but not required.
    Optional,
    /// Block required.
    Required,
}

/// Stream scrubbing behaviour for a decorator's I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScrubMode {
    /// Follow the surrounding context.
    #[default]
    Inherit,
    /// Scrub all output.
    All,
    /// Pass output through unscrubbed.
    Off,
}

/// Declared stdin/stdout semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IoCapability {
    /// Whether the decorator consumes stdin.
    pub supports_stdin: bool,
    /// Whether the decorator produces stdout.
    pub supports_stdout: bool,
    /// Default scrub mode for produced output.
    pub default_scrub: ScrubMode,
}

/// Declared redirect support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectCapability {
    /// `>` only.
    Overwrite,
    /// `>>` only.
    Append,
    /// Both forms.
    Both,
}

/// Purity and idempotence, used for constant folding and retry safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Capabilities {
    /// Pure values may be constant-folded.
    pub pure: bool,
    /// Idempotent operations are safe to retry.
    pub idempotent: bool,
}

/// Branch shape for pattern decorators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BranchSpec {
    /// Plain wrapper — the block is a single step list.
    #[default]
    None,
    /// Pattern with a fixed branch set (e.g. `@try`).
    Fixed(Vec<String>),
    /// Pattern with caller-chosen branch labels (e.g. `@when`).
    Dynamic,
}

/// The typed self-description of one decorator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Dotted path (e.g. `"env"`, `"ssh.connect"`).
    pub path: String,
    /// Value or execution.
    pub kind: DecoratorKind,
    /// Human-readable description.
    pub description: String,
    /// Parameter addressable via dot-syntax (`@env.HOME`).
    pub primary_param: Option<String>,
    /// Parameters in declaration order (positional binding order).
    pub params: Vec<ParamSchema>,
    /// Deprecated parameter alias → canonical name.
    pub deprecated_aliases: BTreeMap<String, String>,
    /// Schema of the resolved value (value decorators only).
    pub return_schema: Option<ParamSchema>,
    /// Block requirement.
    pub block: BlockRequirement,
    /// Declared I/O semantics, if any.
    pub io: Option<IoCapability>,
    /// Declared redirect support, if any.
    pub redirect: Option<RedirectCapability>,
    /// Whether the decorator's block runs under a different transport.
    pub switches_transport: bool,
    /// Transport scope (value decorators).
    pub scope: TransportScope,
    /// Branch shape (pattern decorators).
    pub branches: BranchSpec,
    /// Purity and idempotence.
    pub capabilities: Capabilities,
}

impl Descriptor {
    /// Start a value-decorator descriptor.
    #[must_use]
    pub fn value(path: &str, description: &str) -> Self {
        Self::new(path, DecoratorKind::Value, description)
    }

    /// Start an execution-decorator descriptor.
    #[must_use]
    pub fn execution(path: &str, description: &str) -> Self {
        Self::new(path, DecoratorKind::Execution, description)
    }

    fn new(path: &str, kind: DecoratorKind, description: &str) -> Self {
        Self {
            path: path.to_string(),
            kind,
            description: description.to_string(),
            primary_param: None,
            params: Vec::new(),
            deprecated_aliases: BTreeMap::new(),
            return_schema: None,
            block: BlockRequirement::Forbidden,
            io: None,
            redirect: None,
            switches_transport: false,
            scope: TransportScope::Agnostic,
            branches: BranchSpec::None,
            capabilities: Capabilities::default(),
        }
    }

    /// Add a parameter (declaration order is binding order).
    #[must_use]
    pub fn with_param(mut self, param: ParamSchema) -> Self {
        self.params.push(param);
        self
    }

    /// Add the primary parameter (must also be declared via
    /// [`Self::with_param`]).
    #[must_use]
    pub fn with_primary(mut self, name: &str) -> Self {
        self.primary_param = Some(name.to_string());
        self
    }

    /// Record a deprecated parameter alias.
    #[must_use]
    pub fn with_alias(mut self, alias: &str, canonical: &str) -> Self {
        self.deprecated_aliases
            .insert(alias.to_string(), canonical.to_string());
        self
    }

    /// Set the block requirement.
    #[must_use]
    pub fn with_block(mut self, block: BlockRequirement) -> Self {
        self.block = block;
        self
    }

    /// Set the return schema.
    #[must_use]
    pub fn with_return(mut self, schema: ParamSchema) -> Self {
        self.return_schema = Some(schema);
        self
    }

    /// Set the I/O capability.
    #[must_use]
    pub fn with_io(mut self, io: IoCapability) -> Self {
        self.io = Some(io);
        self
    }

    /// Set the redirect capability.
    #[must_use]
    pub fn with_redirect(mut self, redirect: RedirectCapability) -> Self {
        self.redirect = Some(redirect);
        self
    }

    /// Mark the decorator as switching transports for its block.
    #[must_use]
    pub fn switches_transport(mut self) -> Self {
        self.switches_transport = true;
        self
    }

    /// Set the transport scope.
    #[must_use]
    pub fn with_scope(mut self, scope: TransportScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the branch shape.
    #[must_use]
    pub fn with_branches(mut self, branches: BranchSpec) -> Self {
        self.branches = branches;
        self
    }

    /// Set purity/idempotence.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Look up a declared parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamSchema> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Returns `true` when this descriptor plans to a `Pattern` node.
    #[must_use]
    pub fn is_pattern(&self) -> bool {
        !matches!(self.branches, BranchSpec::None)
    }
}

/// Enforce transport scope for a value decorator being evaluated.
///
/// # Errors
///
/// `Invalid` when a `root-only` decorator is evaluated inside a
/// `switches_transport` block, or a `remote-aware` decorator is evaluated
/// without an explicit transport parameter.
pub fn check_transport(ctx: TransportContext, descriptor: &Descriptor) -> Result<(), OpalError> {
    match (descriptor.scope, ctx) {
        (TransportScope::RootOnly, TransportContext::Switched) => Err(OpalError::new(
            ErrorKind::Invalid,
            format!(
                "@{} resolves against local state and cannot be used inside a transport block",
                descriptor.path
            ),
        )
        .with_hint("move the decorator outside the transport block, or bind its value to a var first")),
        (TransportScope::RemoteAware, _) => Err(OpalError::new(
            ErrorKind::Invalid,
            format!("@{} requires an explicit transport parameter", descriptor.path),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Descriptor {
        Descriptor::value("env", "read an environment variable")
            .with_param(ParamSchema::string("property").required())
            .with_param(ParamSchema::string("default"))
            .with_primary("property")
            .with_scope(TransportScope::RootOnly)
    }

    #[test]
    fn builder_preserves_declaration_order() {
        let d = sample();
        let names: Vec<&str> = d.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["property", "default"]);
        assert_eq!(d.primary_param.as_deref(), Some("property"));
    }

    #[test]
    fn root_only_blocked_in_switched_context() {
        let err = check_transport(TransportContext::Switched, &sample()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
        assert!(err.message.contains("transport block"));
    }

    #[test]
    fn root_only_allowed_at_root() {
        assert!(check_transport(TransportContext::Root, &sample()).is_ok());
    }

    #[test]
    fn agnostic_allowed_everywhere() {
        let d = Descriptor::value("var", "variable reference");
        assert!(check_transport(TransportContext::Root, &d).is_ok());
        assert!(check_transport(TransportContext::Switched, &d).is_ok());
    }

    #[test]
    fn remote_aware_requires_transport_param() {
        let d = Descriptor::value("vault.kv", "remote kv read")
            .with_scope(TransportScope::RemoteAware);
        assert!(check_transport(TransportContext::Root, &d).is_err());
    }

    #[test]
    fn pattern_detection() {
        let plain = Descriptor::execution("retry", "retry a block");
        assert!(!plain.is_pattern());
        let fixed = Descriptor::execution("try", "try/catch/finally").with_branches(
            BranchSpec::Fixed(vec!["main".into(), "catch".into(), "finally".into()]),
        );
        assert!(fixed.is_pattern());
    }

    #[test]
    fn serde_roundtrip() {
        let d = sample();
        let json = serde_json::to_string(&d).unwrap();
        let back: Descriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
