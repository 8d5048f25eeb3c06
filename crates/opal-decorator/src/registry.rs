// SPDX-License-Identifier: MIT OR Apache-2.0
//! The concurrent decorator registry.
//!
//! Read-mostly: registration happens at start-up (initialise then
//! freeze), dispatch takes a shared lock. The registry is the single
//! source of truth for the planner, executor, CLI help, and LSP.

use crate::bind::{Binding, InvocationArg, bind_args, instance_for_validation};
use crate::descriptor::{BlockRequirement, DecoratorKind, Descriptor};
use crate::value::ValueHandler;
use opal_error::{ErrorKind, OpalError};
use opal_schema::{ParamSchema, ValidatorCache, lower_params};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Dispatch capability of a registered decorator.
///
/// Value handlers run at plan time. Execution decorators register as a
/// capability marker; the executor owns their wrapper and pattern
/// semantics, keyed by the same path.
#[derive(Clone)]
pub enum Handler {
    /// Plan-time value resolution.
    Value(Arc<dyn ValueHandler>),
    /// Executor-dispatched wrapper, pattern, or action.
    Execution,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Handler::Value"),
            Self::Execution => f.write_str("Handler::Execution"),
        }
    }
}

/// A registered decorator: descriptor plus dispatch handler.
#[derive(Debug, Clone)]
pub struct DecoratorInfo {
    /// The decorator's self-description.
    pub descriptor: Arc<Descriptor>,
    /// Its dispatch capability.
    pub handler: Handler,
}

/// Concurrent map from decorator path to [`DecoratorInfo`].
pub struct Registry {
    map: RwLock<HashMap<String, DecoratorInfo>>,
    validators: ValidatorCache,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            validators: ValidatorCache::new(),
        }
    }

    /// A registry pre-populated with the built-in decorator set.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::builtins::install_builtins(&registry).expect("builtin registration is conflict-free");
        registry
    }

    /// Register a value decorator with a full descriptor.
    ///
    /// # Errors
    ///
    /// `Invalid` when the path is already registered or the descriptor
    /// kind is not `Value`.
    pub fn register_value(
        &self,
        descriptor: Descriptor,
        handler: Arc<dyn ValueHandler>,
    ) -> Result<(), OpalError> {
        if descriptor.kind != DecoratorKind::Value {
            return Err(OpalError::internal(format!(
                "@{} registered as value but described as execution",
                descriptor.path
            )));
        }
        self.insert(descriptor, Handler::Value(handler))
    }

    /// Register a value decorator with the minimal schema: a single
    /// optional string primary parameter named `property`.
    ///
    /// # Errors
    ///
    /// `Invalid` when the path is already registered.
    pub fn register_value_fn(
        &self,
        path: &str,
        description: &str,
        handler: Arc<dyn ValueHandler>,
    ) -> Result<(), OpalError> {
        let descriptor = Descriptor::value(path, description)
            .with_param(ParamSchema::string("property"))
            .with_primary("property");
        self.register_value(descriptor, handler)
    }

    /// Register an execution decorator with a full descriptor.
    ///
    /// # Errors
    ///
    /// `Invalid` when the path is already registered or the descriptor
    /// kind is not `Execution`.
    pub fn register_execution(&self, descriptor: Descriptor) -> Result<(), OpalError> {
        if descriptor.kind != DecoratorKind::Execution {
            return Err(OpalError::internal(format!(
                "@{} registered as execution but described as value",
                descriptor.path
            )));
        }
        self.insert(descriptor, Handler::Execution)
    }

    /// Register an execution decorator with the minimal schema: no
    /// parameters, optional block.
    ///
    /// # Errors
    ///
    /// `Invalid` when the path is already registered.
    pub fn register_execution_fn(&self, path: &str, description: &str) -> Result<(), OpalError> {
        let descriptor =
            Descriptor::execution(path, description).with_block(BlockRequirement::Optional);
        self.register_execution(descriptor)
    }

    fn insert(&self, descriptor: Descriptor, handler: Handler) -> Result<(), OpalError> {
        if let Some(primary) = &descriptor.primary_param {
            if descriptor.param(primary).is_none() {
                return Err(OpalError::internal(format!(
                    "@{} declares primary parameter `{primary}` without a schema for it",
                    descriptor.path
                )));
            }
        }
        let mut map = self.map.write().expect("registry lock poisoned");
        if map.contains_key(&descriptor.path) {
            return Err(OpalError::new(
                ErrorKind::Invalid,
                format!("decorator @{} is already registered", descriptor.path),
            ));
        }
        map.insert(
            descriptor.path.clone(),
            DecoratorInfo {
                descriptor: Arc::new(descriptor),
                handler,
            },
        );
        Ok(())
    }

    /// Look up a decorator by path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<DecoratorInfo> {
        self.map
            .read()
            .expect("registry lock poisoned")
            .get(path)
            .cloned()
    }

    /// Whether a path is registered.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.map
            .read()
            .expect("registry lock poisoned")
            .contains_key(path)
    }

    /// Sorted list of registered paths.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .map
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    /// Bind and schema-validate an invocation against a registered
    /// decorator.
    ///
    /// # Errors
    ///
    /// `Invalid` for unknown decorators, binding failures, or schema
    /// violations.
    pub fn bind_and_validate(
        &self,
        path: &str,
        invocation: &[InvocationArg],
    ) -> Result<(DecoratorInfo, Binding), OpalError> {
        let info = self.get(path).ok_or_else(|| {
            OpalError::new(ErrorKind::Invalid, format!("unknown decorator @{path}"))
                .with_hint("run `opal schema` to list registered decorators")
        })?;
        let binding = bind_args(&info.descriptor, invocation)?;
        let schema = lower_params(&info.descriptor.params);
        let instance = instance_for_validation(&binding);
        self.validators.validate(&schema, &instance)?;
        Ok((info, binding))
    }

    /// The lowered JSON Schema for a registered decorator's parameters.
    #[must_use]
    pub fn schema_for(&self, path: &str) -> Option<serde_json::Value> {
        self.get(path)
            .map(|info| lower_params(&info.descriptor.params))
    }

    /// Deep-clone into a fresh registry.
    ///
    /// Test hook: production treats the registry as initialise-then-
    /// freeze, but tests may clone and extend an isolated copy.
    #[must_use]
    pub fn clone_registry(&self) -> Self {
        let map = self.map.read().expect("registry lock poisoned");
        Self {
            map: RwLock::new(map.clone()),
            validators: ValidatorCache::new(),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("decorators", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ResolveCtx, ResolvedValue};
    use opal_core::Value;

    struct Fixed;

    impl ValueHandler for Fixed {
        fn resolve(&self, _: &ResolveCtx<'_>, _: &Binding) -> Result<ResolvedValue, OpalError> {
            Ok(ResolvedValue::variable("fixed"))
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = Registry::new();
        registry
            .register_value_fn("fixed", "a fixed value", Arc::new(Fixed))
            .unwrap();
        assert!(registry.contains("fixed"));
        let info = registry.get("fixed").unwrap();
        assert_eq!(info.descriptor.path, "fixed");
        assert!(matches!(info.handler, Handler::Value(_)));
    }

    #[test]
    fn reregistration_is_an_error() {
        let registry = Registry::new();
        registry.register_execution_fn("once", "first").unwrap();
        let err = registry.register_execution_fn("once", "second").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
        assert!(err.message.contains("already registered"));
    }

    #[test]
    fn kind_mismatch_is_internal() {
        let registry = Registry::new();
        let err = registry
            .register_execution(Descriptor::value("v", "a value"))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[test]
    fn unknown_decorator_reports_invalid() {
        let registry = Registry::new();
        let err = registry.bind_and_validate("ghost", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
        assert!(err.message.contains("@ghost"));
    }

    #[test]
    fn bind_and_validate_enforces_schema() {
        let registry = Registry::with_builtins();
        // @retry(times=0) violates the declared minimum of 1.
        let err = registry
            .bind_and_validate("retry", &[InvocationArg::named("times", Value::Int(0))])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
    }

    #[test]
    fn list_is_sorted() {
        let registry = Registry::new();
        registry.register_execution_fn("zeta", "z").unwrap();
        registry.register_execution_fn("alpha", "a").unwrap();
        assert_eq!(registry.list(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn clone_registry_is_isolated() {
        let registry = Registry::new();
        registry.register_execution_fn("base", "base").unwrap();
        let clone = registry.clone_registry();
        clone.register_execution_fn("extra", "extra").unwrap();
        assert!(clone.contains("extra"));
        assert!(!registry.contains("extra"));
    }

    #[test]
    fn schema_for_lowers_params() {
        let registry = Registry::with_builtins();
        let schema = registry.schema_for("retry").unwrap();
        assert!(schema["properties"]["times"].is_object());
    }
}
