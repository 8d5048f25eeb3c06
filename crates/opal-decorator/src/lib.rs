// SPDX-License-Identifier: MIT OR Apache-2.0
//! Decorator descriptors, registry, and argument binding for Opal.
//!
//! The registry is the single source of truth for decorator dispatch: the
//! planner looks decorators up here to bind and validate their arguments,
//! resolve value decorators at plan time, and enforce transport scope;
//! the executor looks them up to find wrapper and pattern semantics; the
//! CLI and LSP read the same descriptors for help and completion.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bind;
mod builtins;
mod descriptor;
mod registry;
mod value;

pub use bind::{Binding, InvocationArg, bind_args, instance_for_validation};
pub use builtins::install_builtins;
pub use descriptor::{
    BlockRequirement, BranchSpec, Capabilities, DecoratorKind, Descriptor, IoCapability,
    RedirectCapability, ScrubMode, TransportContext, TransportScope, check_transport,
};
pub use registry::{DecoratorInfo, Handler, Registry};
pub use value::{PlanSeed, ResolveCtx, ResolvedValue, ValueClass, ValueHandler, VarLookup};
