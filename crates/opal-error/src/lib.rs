// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy for the Opal plan pipeline.
//!
//! Every Opal error carries an [`ErrorKind`] (a machine-readable, stable
//! tag), a human-readable message, an optional [`SourceSpan`] anchoring it in
//! the `*.opl` source, an optional hint, an optional cause chain, and
//! arbitrary key-value context. Use the builder returned by
//! [`OpalError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// SourceSpan
// ---------------------------------------------------------------------------

/// A half-open byte range into an `*.opl` source file, with the 1-based
/// line/column of its start for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct SourceSpan {
    /// Byte offset of the first byte of the span.
    pub start: u32,
    /// Byte offset one past the last byte of the span.
    pub end: u32,
    /// 1-based line of `start`.
    pub line: u32,
    /// 1-based column of `start`.
    pub column: u32,
}

impl SourceSpan {
    /// Construct a span from raw offsets and position.
    #[must_use]
    pub fn new(start: u32, end: u32, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// The smallest span covering both `self` and `other`.
    ///
    /// The reported line/column come from whichever span starts first.
    #[must_use]
    pub fn merge(self, other: SourceSpan) -> SourceSpan {
        let (lead, _) = if self.start <= other.start {
            (self, other)
        } else {
            (other, self)
        };
        SourceSpan {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: lead.line,
            column: lead.column,
        }
    }

    /// Length of the span in bytes.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Returns `true` when the span covers no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Stable, machine-readable error kind.
///
/// Each variant serialises to a lowercase string that is guaranteed not to
/// change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The parser reported errors; no plan was produced.
    Syntax,
    /// Schema or argument-binding failure, duration overflow, scope
    /// violation, or an unknown decorator.
    Invalid,
    /// A contract's plan hash no longer matches the current source.
    Drift,
    /// Non-zero exit from a shell, or a decorator failing its contract.
    Runtime,
    /// External cancellation observed while a step was running.
    Cancelled,
    /// Codec corruption, vault inconsistency, or an invariant violation.
    /// Always a bug.
    Internal,
}

impl ErrorKind {
    /// Stable `&'static str` representation (e.g. `"invalid"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Invalid => "invalid",
            Self::Drift => "drift",
            Self::Runtime => "runtime",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Process exit code conventionally reported for this kind.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Syntax | Self::Invalid => 2,
            Self::Drift => 3,
            Self::Runtime => 1,
            Self::Cancelled => 130,
            Self::Internal => 70,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OpalError
// ---------------------------------------------------------------------------

/// Unified Opal error.
///
/// Carries a stable [`ErrorKind`], a human-readable message, an optional
/// primary span, an optional hint, an optional source error for
/// cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use opal_error::{ErrorKind, OpalError};
///
/// let err = OpalError::new(ErrorKind::Invalid, "unknown decorator @nope")
///     .with_hint("run `opal schema` to list registered decorators")
///     .with_context("decorator", "nope");
/// ```
pub struct OpalError {
    /// Machine-readable kind.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Primary span in the source, when one applies.
    pub span: Option<SourceSpan>,
    /// Optional suggestion shown alongside the message.
    pub hint: Option<String>,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl OpalError {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            hint: None,
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Shorthand for an [`ErrorKind::Syntax`] error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    /// Shorthand for an [`ErrorKind::Invalid`] error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    /// Shorthand for an [`ErrorKind::Runtime`] error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    /// Shorthand for an [`ErrorKind::Internal`] error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach the primary span.
    #[must_use]
    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach a hint shown to the user alongside the message.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.kind.exit_code()`.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

impl fmt::Debug for OpalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("OpalError");
        d.field("kind", &self.kind);
        d.field("message", &self.message);
        if let Some(span) = &self.span {
            d.field("span", span);
        }
        if let Some(hint) = &self.hint {
            d.field("hint", hint);
        }
        if let Some(src) = &self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for OpalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)?;
        if let Some(span) = &self.span {
            write!(f, " at {span}")?;
        }
        Ok(())
    }
}

impl std::error::Error for OpalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for OpalError {
    fn from(err: std::io::Error) -> Self {
        OpalError::runtime(err.to_string()).with_source(err)
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of an [`OpalError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpalErrorDto {
    /// Error kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Primary span, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<SourceSpan>,
    /// Hint, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&OpalError> for OpalErrorDto {
    fn from(err: &OpalError) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
            span: err.span,
            hint: err.hint.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<OpalErrorDto> for OpalError {
    fn from(dto: OpalErrorDto) -> Self {
        Self {
            kind: dto.kind,
            message: dto.message,
            span: dto.span,
            hint: dto.hint,
            source: None,
            context: dto.context,
        }
    }
}

/// Convenience alias used across the workspace.
pub type Result<T, E = OpalError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    const ALL_KINDS: &[ErrorKind] = &[
        ErrorKind::Syntax,
        ErrorKind::Invalid,
        ErrorKind::Drift,
        ErrorKind::Runtime,
        ErrorKind::Cancelled,
        ErrorKind::Internal,
    ];

    #[test]
    fn basic_construction() {
        let err = OpalError::new(ErrorKind::Internal, "boom");
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.span.is_none());
        assert!(err.hint.is_none());
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_span() {
        let err = OpalError::invalid("unknown decorator");
        assert_eq!(err.to_string(), "[invalid] unknown decorator");
    }

    #[test]
    fn display_with_span() {
        let err = OpalError::syntax("unexpected token")
            .with_span(SourceSpan::new(10, 12, 2, 5));
        assert_eq!(err.to_string(), "[syntax] unexpected token at 2:5");
    }

    #[test]
    fn builder_chains_everything() {
        let src = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err = OpalError::new(ErrorKind::Runtime, "spawn failed")
            .with_span(SourceSpan::new(0, 4, 1, 1))
            .with_hint("is `sh` on PATH?")
            .with_context("command", "sh -c true")
            .with_source(src);
        assert!(err.span.is_some());
        assert_eq!(err.hint.as_deref(), Some("is `sh` on PATH?"));
        assert_eq!(err.context["command"], serde_json::json!("sh -c true"));
        assert!(err.source.is_some());
    }

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(ErrorKind::Syntax.exit_code(), 2);
        assert_eq!(ErrorKind::Invalid.exit_code(), 2);
        assert_eq!(ErrorKind::Drift.exit_code(), 3);
        assert_eq!(ErrorKind::Runtime.exit_code(), 1);
        assert_eq!(ErrorKind::Cancelled.exit_code(), 130);
        assert_eq!(ErrorKind::Internal.exit_code(), 70);
    }

    #[test]
    fn kind_serde_roundtrip() {
        for kind in ALL_KINDS {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let back: ErrorKind = serde_json::from_str(&json).unwrap();
            assert_eq!(&back, kind);
        }
    }

    #[test]
    fn std_error_source_chain() {
        let inner = io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke");
        let err = OpalError::runtime("stream failed").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "pipe broke");
    }

    #[test]
    fn dto_roundtrip() {
        let err = OpalError::invalid("bad arg")
            .with_span(SourceSpan::new(3, 8, 1, 4))
            .with_hint("expected a duration like `30s`")
            .with_context("parameter", "delay");
        let dto: OpalErrorDto = (&err).into();
        let json = serde_json::to_string(&dto).unwrap();
        let back: OpalErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(dto, back);
        let restored: OpalError = back.into();
        assert_eq!(restored.kind, ErrorKind::Invalid);
        assert_eq!(restored.span, err.span);
    }

    #[test]
    fn span_merge_covers_both() {
        let a = SourceSpan::new(10, 14, 2, 3);
        let b = SourceSpan::new(20, 30, 3, 1);
        let merged = a.merge(b);
        assert_eq!(merged.start, 10);
        assert_eq!(merged.end, 30);
        assert_eq!(merged.line, 2);
        assert_eq!(merged.column, 3);
        // Merge is symmetric on offsets.
        assert_eq!(b.merge(a).start, 10);
        assert_eq!(b.merge(a).line, 2);
    }

    #[test]
    fn span_len_and_empty() {
        let span = SourceSpan::new(5, 5, 1, 6);
        assert!(span.is_empty());
        assert_eq!(SourceSpan::new(5, 9, 1, 6).len(), 4);
    }

    #[test]
    fn io_error_converts_to_runtime() {
        let err: OpalError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert!(std::error::Error::source(&err).is_some());
    }
}
