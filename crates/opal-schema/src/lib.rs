// SPDX-License-Identifier: MIT OR Apache-2.0
//! Parameter schema model and JSON-Schema validation for Opal decorators.
//!
//! Decorator parameter schemas are declared with [`ParamSchema`] builders,
//! lowered to JSON Schema (draft 2020-12 semantics) by [`lower`], and
//! checked against argument bundles through a [`ValidatorCache`] that
//! compiles each distinct schema once. Safety limits are enforced before
//! any schema work begins.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod limits;
mod lower;
mod param;
mod validate;

pub use limits::{SchemaLimits, enforce_limits};
pub use lower::{lower_param, lower_params};
pub use param::{
    ArraySchema, EnumSpec, LengthBounds, NumericRange, ObjectSchema, ParamFormat, ParamKind,
    ParamSchema,
};
pub use validate::{ValidatorCache, schema_digest};
