// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lexer and parser for `*.opl` source.
//!
//! This crate is the planner's upstream collaborator: it turns source
//! text into a token array (spans and literal text) plus an ordered,
//! validated enter/exit event stream. It knows nothing about the
//! decorator registry — dotted paths and argument bundles are passed
//! through as written and resolved by the planner.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod events;
mod parser;

pub use events::{
    ParseEvent, ParseOutput, ParsedArg, ParsedRef, ParsedValue, ParsedWord, Token, TokenKind,
    WordPart,
};
pub use parser::parse;
