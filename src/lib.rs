// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workspace root for Opal.
//!
//! The implementation lives in the `crates/opal-*` members; the `opal`
//! binary is built by `opal-cli`. This crate exists to host the
//! workspace-level end-to-end tests and benches.

#![deny(unsafe_code)]
