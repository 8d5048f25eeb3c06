// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plan-time value resolution: the handler trait and its context.
//!
//! Value handlers never see the vault. They return raw resolved bytes;
//! the planner registers the result and substitutes a DisplayID into the
//! surrounding argument.

use crate::bind::Binding;
use opal_error::OpalError;
use std::collections::BTreeMap;

/// Classification of a resolved value, selecting the DisplayID prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    /// Variable-style value (`opal:v:` prefix).
    Variable,
    /// Secret-bearing value (`opal:s:` prefix).
    Secret,
}

/// A plan-time resolution result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedValue {
    /// Raw resolved bytes.
    pub bytes: Vec<u8>,
    /// Variable or secret classification.
    pub class: ValueClass,
}

impl ResolvedValue {
    /// A variable-class value from UTF-8 text.
    #[must_use]
    pub fn variable(text: impl Into<String>) -> Self {
        Self {
            bytes: text.into().into_bytes(),
            class: ValueClass::Variable,
        }
    }

    /// A secret-class value from raw bytes.
    #[must_use]
    pub fn secret(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            class: ValueClass::Secret,
        }
    }
}

/// Lookup of `var` declarations already resolved by the planner.
pub trait VarLookup {
    /// The resolved bytes of a declared variable, if it exists.
    fn var(&self, name: &str) -> Option<&[u8]>;
}

/// Deterministic byte derivation seeded by the plan salt.
///
/// In `Plan` mode the implementation derives from the salt so identical
/// plans resolve identical bytes; in `Run` mode it may be random.
pub trait PlanSeed {
    /// Derive `len` bytes bound to `info`.
    fn derive(&self, info: &[u8], len: usize) -> Vec<u8>;
}

/// Context threaded through value-handler calls.
///
/// Borrowed for the duration of one resolution and never stored.
pub struct ResolveCtx<'a> {
    /// The planner's frozen environment snapshot.
    pub env: &'a BTreeMap<String, String>,
    /// Declared variables resolved so far.
    pub vars: &'a dyn VarLookup,
    /// Plan-seeded derivation for decorators like `@random`.
    pub seed: &'a dyn PlanSeed,
    /// Zero-based occurrence index of this decorator invocation.
    pub occurrence: u32,
}

/// A plan-time value resolver behind a registry lookup.
pub trait ValueHandler: Send + Sync {
    /// Resolve the decorator's value from its bound arguments.
    ///
    /// # Errors
    ///
    /// `Invalid` for unresolvable references (unknown variable, unset
    /// environment variable without default) and `Runtime` for I/O
    /// failures (`@file.read`).
    fn resolve(&self, ctx: &ResolveCtx<'_>, args: &Binding) -> Result<ResolvedValue, OpalError>;
}
