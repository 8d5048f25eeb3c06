// SPDX-License-Identifier: MIT OR Apache-2.0
//! Library surface of the Opal CLI.
//!
//! The `opal` binary in `main.rs` is a thin clap dispatcher over
//! [`commands`]; configuration loading and output formatting live here
//! so tests can exercise them directly.

#![deny(unsafe_code)]

pub mod commands;
pub mod config;
pub mod format;
