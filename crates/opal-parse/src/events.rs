// SPDX-License-Identifier: MIT OR Apache-2.0
//! The parser's observed interface: tokens and the ordered event
//! stream the planner consumes.

use opal_core::ShellOp;
use opal_duration::Duration;
use opal_error::SourceSpan;
use serde::{Deserialize, Serialize};

/// Coarse classification of a scanned token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// `var` / `fun`.
    Keyword,
    /// Identifier (names, branch labels, decorator path segments).
    Ident,
    /// Whitespace-delimited shell word.
    Word,
    /// Quoted string (text holds the unescaped content).
    Str,
    /// Integer or float literal.
    Number,
    /// Duration literal (`"30s"`).
    Duration,
    /// `true` / `false`.
    Bool,
    /// `&&`, `||`, `|`, `>>`.
    Operator,
    /// Structural punctuation (`(`, `)`, `{`, `}`, `,`, `=`, `:`, `@`, `.`).
    Punct,
    /// End of line.
    Newline,
}

/// One scanned token with its literal text and span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Token classification.
    pub kind: TokenKind,
    /// Literal text (unescaped for strings).
    pub text: String,
    /// Source anchor.
    pub span: SourceSpan,
}

/// A decorator reference as written (`@env.HOME`, `@random(length=8)`).
///
/// The path is the full dotted form; splitting it into a registered
/// decorator plus a primary argument is the planner's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRef {
    /// Full dotted path after the `@`.
    pub path: String,
    /// Parenthesised arguments, if written.
    pub args: Vec<ParsedArg>,
    /// Source anchor.
    pub span: SourceSpan,
}

/// A literal or reference in argument or `var` position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParsedValue {
    /// String literal or bare identifier.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// Boolean literal.
    Bool(bool),
    /// Duration literal.
    Duration(Duration),
    /// Nested decorator reference.
    Ref(Box<ParsedRef>),
}

/// One argument at a decorator invocation site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedArg {
    /// Parameter name for `name=value` form; `None` for positional.
    pub name: Option<String>,
    /// The argument value.
    pub value: ParsedValue,
    /// Source anchor.
    pub span: SourceSpan,
}

/// One piece of a shell word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part", rename_all = "snake_case")]
pub enum WordPart {
    /// Literal text.
    Text(String),
    /// An interpolated decorator reference.
    Ref(ParsedRef),
}

/// A shell word: literal text and interpolated references in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedWord {
    /// The word's parts in order.
    pub parts: Vec<WordPart>,
    /// Source anchor.
    pub span: SourceSpan,
}

impl ParsedWord {
    /// Returns the word's literal text when it has no interpolation.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [WordPart::Text(text)] => Some(text),
            _ => None,
        }
    }
}

/// One event of the validated parse stream, in source order.
///
/// Containers arrive as enter/exit pairs; the stream is balanced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ParseEvent {
    /// `var NAME = value`.
    VarDecl {
        /// Variable name.
        name: String,
        /// Declared value.
        value: ParsedValue,
        /// Source anchor.
        span: SourceSpan,
    },
    /// Start of `fun NAME …`.
    EnterFun {
        /// Function name.
        name: String,
        /// Source anchor.
        span: SourceSpan,
    },
    /// End of a function body.
    ExitFun,
    /// Start of a shell chain.
    EnterChain {
        /// Source anchor.
        span: SourceSpan,
    },
    /// One command of a chain. `operator` links it to the next command;
    /// `redirect` is set iff the operator is `>>`.
    Command {
        /// The command's words.
        words: Vec<ParsedWord>,
        /// Operator linking to the next command.
        operator: Option<ShellOp>,
        /// Redirect target for `>>`.
        redirect: Option<ParsedWord>,
        /// Source anchor.
        span: SourceSpan,
    },
    /// End of a shell chain.
    ExitChain,
    /// Start of a decorator statement.
    EnterDecorator {
        /// Full dotted path after `@`.
        path: String,
        /// Invocation arguments.
        args: Vec<ParsedArg>,
        /// Whether a block follows.
        has_block: bool,
        /// Source anchor.
        span: SourceSpan,
    },
    /// End of a decorator statement.
    ExitDecorator,
    /// Start of a labelled branch inside a pattern block.
    EnterBranch {
        /// Branch label.
        label: String,
        /// Source anchor.
        span: SourceSpan,
    },
    /// End of a branch.
    ExitBranch,
}

/// Everything the parser hands the planner.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParseOutput {
    /// The token array, in scan order.
    pub tokens: Vec<Token>,
    /// The validated event stream.
    pub events: Vec<ParseEvent>,
}
