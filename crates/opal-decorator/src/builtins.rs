// SPDX-License-Identifier: MIT OR Apache-2.0
//! The built-in decorator set.
//!
//! Value decorators resolve here at plan time; execution descriptors
//! carry the schemas the executor's wrapper and pattern implementations
//! are dispatched against.

use crate::bind::Binding;
use crate::descriptor::{
    BlockRequirement, BranchSpec, Capabilities, Descriptor, IoCapability, RedirectCapability,
    ScrubMode, TransportScope,
};
use crate::registry::Registry;
use crate::value::{ResolveCtx, ResolvedValue, ValueHandler};
use opal_error::{ErrorKind, OpalError};
use opal_schema::{ParamFormat, ParamSchema};
use serde_json::json;
use std::sync::Arc;

/// Register every built-in decorator into `registry`.
///
/// # Errors
///
/// `Invalid` if any built-in path is already taken.
pub fn install_builtins(registry: &Registry) -> Result<(), OpalError> {
    registry.register_value(
        Descriptor::value("env", "read an environment variable at plan time")
            .with_param(ParamSchema::string("property").required())
            .with_param(ParamSchema::string("default"))
            .with_primary("property")
            .with_scope(TransportScope::RootOnly)
            .with_return(ParamSchema::string("value"))
            .with_capabilities(Capabilities {
                pure: true,
                idempotent: true,
            }),
        Arc::new(EnvHandler),
    )?;

    registry.register_value(
        Descriptor::value("var", "reference a declared variable")
            .with_param(ParamSchema::string("property").required())
            .with_primary("property")
            .with_return(ParamSchema::string("value"))
            .with_capabilities(Capabilities {
                pure: true,
                idempotent: true,
            }),
        Arc::new(VarHandler),
    )?;

    registry.register_value(
        Descriptor::value("random", "derive a plan-seeded random string")
            .with_param(
                ParamSchema::integer("length")
                    .with_default(json!(16))
                    .with_range(Some(1.0), Some(1024.0)),
            )
            .with_param(
                ParamSchema::enumeration("charset", &["alphanumeric", "hex", "ascii"])
                    .with_enum_default("alphanumeric"),
            )
            .with_return(ParamSchema::string("value"))
            .with_capabilities(Capabilities {
                pure: false,
                idempotent: true,
            }),
        Arc::new(RandomHandler),
    )?;

    registry.register_value(
        Descriptor::value("file.read", "read a local file at plan time")
            .with_param(ParamSchema::string("path").required())
            .with_primary("path")
            .with_scope(TransportScope::RootOnly)
            .with_return(ParamSchema::string("contents"))
            .with_capabilities(Capabilities {
                pure: false,
                idempotent: true,
            }),
        Arc::new(FileReadHandler),
    )?;

    registry.register_execution(
        Descriptor::execution("retry", "re-run the block on non-zero exit")
            .with_param(
                ParamSchema::integer("times")
                    .with_default(json!(3))
                    .with_range(Some(1.0), Some(1000.0)),
            )
            .with_param(ParamSchema::duration("delay").with_default(json!("1s")))
            .with_param(
                ParamSchema::enumeration("backoff", &["exponential", "linear"])
                    .with_enum_default("exponential")
                    .with_deprecated_value("exp", "exponential"),
            )
            .with_primary("times")
            .with_alias("attempts", "times")
            .with_block(BlockRequirement::Required)
            .with_capabilities(Capabilities {
                pure: false,
                idempotent: true,
            }),
    )?;

    registry.register_execution(
        Descriptor::execution("timeout", "cancel the block after a deadline")
            .with_param(ParamSchema::duration("duration").required())
            .with_primary("duration")
            .with_block(BlockRequirement::Required),
    )?;

    registry.register_execution(
        Descriptor::execution("parallel", "run direct child steps concurrently")
            .with_param(
                ParamSchema::integer("max_workers").with_range(Some(1.0), Some(4096.0)),
            )
            .with_alias("maxWorkers", "max_workers")
            .with_block(BlockRequirement::Required),
    )?;

    registry.register_execution(
        Descriptor::execution("workdir", "change working directory for the block")
            .with_param(ParamSchema::string("path").required())
            .with_param(ParamSchema::boolean("createIfNotExists").with_default(json!(false)))
            .with_primary("path")
            .with_alias("create", "createIfNotExists")
            .with_block(BlockRequirement::Required),
    )?;

    registry.register_execution(
        Descriptor::execution("confirm", "ask before running the block")
            .with_param(
                ParamSchema::string("prompt").with_default(json!("Continue?")),
            )
            .with_param(ParamSchema::boolean("defaultYes").with_default(json!(false)))
            .with_primary("prompt")
            .with_block(BlockRequirement::Required)
            .with_io(IoCapability {
                supports_stdin: true,
                supports_stdout: true,
                default_scrub: ScrubMode::Inherit,
            }),
    )?;

    registry.register_execution(
        Descriptor::execution("when", "select a branch by environment variable")
            .with_param(ParamSchema::string("variable").required())
            .with_primary("variable")
            .with_block(BlockRequirement::Required)
            .with_branches(BranchSpec::Dynamic),
    )?;

    registry.register_execution(
        Descriptor::execution("try", "run main with catch and finally branches")
            .with_block(BlockRequirement::Required)
            .with_branches(BranchSpec::Fixed(vec![
                "main".into(),
                "catch".into(),
                "finally".into(),
            ])),
    )?;

    registry.register_execution(
        Descriptor::execution("log", "write a message to the scrubbed streams")
            .with_param(ParamSchema::string("msg").required())
            .with_param(
                ParamSchema::enumeration("level", &["debug", "info", "warn", "error"])
                    .with_enum_default("info"),
            )
            .with_primary("msg")
            .with_alias("message", "msg")
            .with_io(IoCapability {
                supports_stdin: false,
                supports_stdout: true,
                default_scrub: ScrubMode::All,
            }),
    )?;

    registry.register_execution(
        Descriptor::execution("cmd", "inline the plan of a named function")
            .with_param(ParamSchema::string("name").required())
            .with_primary("name"),
    )?;

    registry.register_execution(
        Descriptor::execution("ssh.connect", "run the block on a remote host")
            .with_param(
                ParamSchema::string("host")
                    .required()
                    .with_format(ParamFormat::Hostname),
            )
            .with_param(ParamSchema::string("user"))
            .with_param(
                ParamSchema::integer("port")
                    .with_default(json!(22))
                    .with_range(Some(1.0), Some(65535.0)),
            )
            .with_param(ParamSchema::auth_handle("auth"))
            .with_param(ParamSchema::scrub_mode("scrub"))
            .with_primary("host")
            .with_block(BlockRequirement::Required)
            .switches_transport()
            .with_redirect(RedirectCapability::Append),
    )?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Value handlers
// ---------------------------------------------------------------------------

/// `@env(NAME, default=…)` — frozen-environment lookup.
struct EnvHandler;

impl ValueHandler for EnvHandler {
    fn resolve(&self, ctx: &ResolveCtx<'_>, args: &Binding) -> Result<ResolvedValue, OpalError> {
        let name = args.str("property")?;
        match ctx.env.get(name) {
            Some(value) => Ok(ResolvedValue::variable(value.clone())),
            None => match args.opt_str("default") {
                Some(default) => Ok(ResolvedValue::variable(default.to_string())),
                None => Err(OpalError::new(
                    ErrorKind::Invalid,
                    format!("environment variable `{name}` is not set"),
                )
                .with_hint("pass default=\"…\" to tolerate an unset variable")),
            },
        }
    }
}

/// `@var.NAME` — declared-variable lookup.
struct VarHandler;

impl ValueHandler for VarHandler {
    fn resolve(&self, ctx: &ResolveCtx<'_>, args: &Binding) -> Result<ResolvedValue, OpalError> {
        let name = args.str("property")?;
        match ctx.vars.var(name) {
            Some(bytes) => Ok(ResolvedValue {
                bytes: bytes.to_vec(),
                class: crate::value::ValueClass::Variable,
            }),
            None => Err(OpalError::new(
                ErrorKind::Invalid,
                format!("variable `{name}` is not declared"),
            )),
        }
    }
}

/// `@random(length, charset)` — plan-seeded random string.
struct RandomHandler;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const HEX: &[u8] = b"0123456789abcdef";
const ASCII: &[u8] =
    b"!\"#$%&'()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_`abcdefghijklmnopqrstuvwxyz{|}~";

impl ValueHandler for RandomHandler {
    fn resolve(&self, ctx: &ResolveCtx<'_>, args: &Binding) -> Result<ResolvedValue, OpalError> {
        let length = args.int("length")? as usize;
        let charset = match args.str("charset")? {
            "hex" => HEX,
            "ascii" => ASCII,
            _ => ALPHANUMERIC,
        };
        let info = format!("random:{}:{}", args.str("charset")?, ctx.occurrence);
        let raw = ctx.seed.derive(info.as_bytes(), length);
        let bytes: Vec<u8> = raw
            .iter()
            .map(|b| charset[*b as usize % charset.len()])
            .collect();
        Ok(ResolvedValue::secret(bytes))
    }
}

/// `@file.read(path)` — local file contents at plan time.
struct FileReadHandler;

impl ValueHandler for FileReadHandler {
    fn resolve(&self, _ctx: &ResolveCtx<'_>, args: &Binding) -> Result<ResolvedValue, OpalError> {
        let path = args.str("path")?;
        let bytes = std::fs::read(path).map_err(|e| {
            OpalError::new(ErrorKind::Runtime, format!("cannot read `{path}`: {e}")).with_source(e)
        })?;
        Ok(ResolvedValue {
            bytes,
            class: crate::value::ValueClass::Variable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::InvocationArg;
    use crate::value::{PlanSeed, VarLookup};
    use opal_core::Value;
    use std::collections::BTreeMap;

    struct NoVars;
    impl VarLookup for NoVars {
        fn var(&self, _: &str) -> Option<&[u8]> {
            None
        }
    }

    struct OneVar(Vec<u8>);
    impl VarLookup for OneVar {
        fn var(&self, name: &str) -> Option<&[u8]> {
            (name == "SECRET").then_some(self.0.as_slice())
        }
    }

    struct CountingSeed;
    impl PlanSeed for CountingSeed {
        fn derive(&self, info: &[u8], len: usize) -> Vec<u8> {
            // Deterministic toy derivation for tests.
            info.iter().cycle().take(len).copied().collect()
        }
    }

    fn ctx<'a>(
        env: &'a BTreeMap<String, String>,
        vars: &'a dyn VarLookup,
        seed: &'a dyn PlanSeed,
    ) -> ResolveCtx<'a> {
        ResolveCtx {
            env,
            vars,
            seed,
            occurrence: 0,
        }
    }

    fn resolve(registry: &Registry, path: &str, args: &[InvocationArg], ctx: &ResolveCtx<'_>) -> Result<ResolvedValue, OpalError> {
        let (info, binding) = registry.bind_and_validate(path, args)?;
        match &info.handler {
            crate::registry::Handler::Value(handler) => handler.resolve(ctx, &binding),
            crate::registry::Handler::Execution => panic!("not a value decorator"),
        }
    }

    #[test]
    fn builtins_install_once() {
        let registry = Registry::with_builtins();
        for path in [
            "env", "var", "random", "file.read", "retry", "timeout", "parallel", "workdir",
            "confirm", "when", "try", "log", "cmd", "ssh.connect",
        ] {
            assert!(registry.contains(path), "missing builtin @{path}");
        }
    }

    #[test]
    fn env_reads_snapshot_not_process() {
        let registry = Registry::with_builtins();
        let mut env = BTreeMap::new();
        env.insert("HOME".to_string(), "/home/opal".to_string());
        let c = ctx(&env, &NoVars, &CountingSeed);
        let resolved = resolve(
            &registry,
            "env",
            &[InvocationArg::positional(Value::String("HOME".into()))],
            &c,
        )
        .unwrap();
        assert_eq!(resolved.bytes, b"/home/opal");
    }

    #[test]
    fn env_falls_back_to_default() {
        let registry = Registry::with_builtins();
        let env = BTreeMap::new();
        let c = ctx(&env, &NoVars, &CountingSeed);
        let resolved = resolve(
            &registry,
            "env",
            &[
                InvocationArg::positional(Value::String("MISSING".into())),
                InvocationArg::named("default", Value::String("fallback".into())),
            ],
            &c,
        )
        .unwrap();
        assert_eq!(resolved.bytes, b"fallback");
    }

    #[test]
    fn env_unset_without_default_fails() {
        let registry = Registry::with_builtins();
        let env = BTreeMap::new();
        let c = ctx(&env, &NoVars, &CountingSeed);
        let err = resolve(
            &registry,
            "env",
            &[InvocationArg::positional(Value::String("MISSING".into()))],
            &c,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
    }

    #[test]
    fn var_resolves_declared_variable() {
        let registry = Registry::with_builtins();
        let env = BTreeMap::new();
        let vars = OneVar(b"my-secret-value".to_vec());
        let c = ctx(&env, &vars, &CountingSeed);
        let resolved = resolve(
            &registry,
            "var",
            &[InvocationArg::positional(Value::String("SECRET".into()))],
            &c,
        )
        .unwrap();
        assert_eq!(resolved.bytes, b"my-secret-value");
    }

    #[test]
    fn var_unknown_fails() {
        let registry = Registry::with_builtins();
        let env = BTreeMap::new();
        let c = ctx(&env, &NoVars, &CountingSeed);
        let err = resolve(
            &registry,
            "var",
            &[InvocationArg::positional(Value::String("NOPE".into()))],
            &c,
        )
        .unwrap_err();
        assert!(err.message.contains("not declared"));
    }

    #[test]
    fn random_respects_length_and_charset() {
        let registry = Registry::with_builtins();
        let env = BTreeMap::new();
        let c = ctx(&env, &NoVars, &CountingSeed);
        let resolved = resolve(
            &registry,
            "random",
            &[
                InvocationArg::named("length", Value::Int(32)),
                InvocationArg::named("charset", Value::String("hex".into())),
            ],
            &c,
        )
        .unwrap();
        assert_eq!(resolved.bytes.len(), 32);
        assert!(resolved.bytes.iter().all(|b| HEX.contains(b)));
        assert_eq!(resolved.class, crate::value::ValueClass::Secret);
    }

    #[test]
    fn random_rejects_out_of_range_length() {
        let registry = Registry::with_builtins();
        let err = registry
            .bind_and_validate("random", &[InvocationArg::named("length", Value::Int(0))])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
    }

    #[test]
    fn file_read_missing_file_is_runtime() {
        let registry = Registry::with_builtins();
        let env = BTreeMap::new();
        let c = ctx(&env, &NoVars, &CountingSeed);
        let err = resolve(
            &registry,
            "file.read",
            &[InvocationArg::positional(Value::String(
                "/nonexistent/opal-test".into(),
            ))],
            &c,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
    }

    #[test]
    fn ssh_connect_switches_transport() {
        let registry = Registry::with_builtins();
        let info = registry.get("ssh.connect").unwrap();
        assert!(info.descriptor.switches_transport);
        assert_eq!(info.descriptor.block, BlockRequirement::Required);
    }

    #[test]
    fn try_has_fixed_branches() {
        let registry = Registry::with_builtins();
        let info = registry.get("try").unwrap();
        assert_eq!(
            info.descriptor.branches,
            BranchSpec::Fixed(vec!["main".into(), "catch".into(), "finally".into()])
        );
    }
}
