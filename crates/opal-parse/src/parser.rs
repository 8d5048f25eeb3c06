// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cursor-based recursive-descent parser for `*.opl` source.
//!
//! Line-oriented grammar: `var` declarations, `fun` definitions (single
//! chain or block body), decorator statements with optional blocks and
//! branch labels, and whitespace-delimited shell chains whose operators
//! (`&&`, `||`, `|`, `>>`) are standalone words. A leading `#!` line is
//! trivia and never reaches the token array.

use crate::events::{
    ParseEvent, ParseOutput, ParsedArg, ParsedRef, ParsedValue, ParsedWord, Token, TokenKind,
    WordPart,
};
use opal_core::ShellOp;
use opal_duration::Duration;
use opal_error::{OpalError, SourceSpan};

/// Parse a source file into tokens plus a validated event stream.
///
/// # Errors
///
/// All syntax errors, each anchored with a span. No event stream is
/// produced when any error occurred.
pub fn parse(source: &str) -> Result<ParseOutput, Vec<OpalError>> {
    let mut parser = Parser::new(source);
    parser.run();
    if parser.errors.is_empty() {
        Ok(ParseOutput {
            tokens: parser.tokens,
            events: parser.events,
        })
    } else {
        Err(parser.errors)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    TopLevel,
    FunBlock,
    DecoratorBlock,
    BranchBlock,
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
    tokens: Vec<Token>,
    events: Vec<ParseEvent>,
    errors: Vec<OpalError>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            tokens: Vec::new(),
            events: Vec::new(),
            errors: Vec::new(),
        }
    }

    // -- cursor ----------------------------------------------------------

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn mark(&self) -> (usize, u32, u32) {
        (self.pos, self.line, self.col)
    }

    fn span_from(&self, mark: (usize, u32, u32)) -> SourceSpan {
        SourceSpan::new(mark.0 as u32, self.pos as u32, mark.1, mark.2)
    }

    fn here(&self) -> SourceSpan {
        SourceSpan::new(self.pos as u32, self.pos as u32, self.line, self.col)
    }

    fn text(&self, mark: (usize, u32, u32)) -> &'a str {
        std::str::from_utf8(&self.src[mark.0..self.pos]).unwrap_or("")
    }

    fn error(&mut self, message: impl Into<String>, span: SourceSpan) {
        self.errors.push(OpalError::syntax(message).with_span(span));
    }

    fn token(&mut self, kind: TokenKind, text: &str, span: SourceSpan) {
        self.tokens.push(Token {
            kind,
            text: text.to_string(),
            span,
        });
    }

    /// Skip spaces and tabs (not newlines).
    fn eat_inline_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r')) {
            self.bump();
        }
    }

    /// Skip the rest of the line including its newline.
    fn skip_line(&mut self) {
        while let Some(b) = self.bump() {
            if b == b'\n' {
                break;
            }
        }
    }

    /// Consume an expected end of line (or EOF). Comments are admitted.
    fn expect_eol(&mut self) {
        self.eat_inline_ws();
        match self.peek() {
            None => {}
            Some(b'\n') => {
                let span = self.here();
                self.bump();
                self.token(TokenKind::Newline, "\n", span);
            }
            Some(b'#') => self.skip_line(),
            Some(_) => {
                let span = self.here();
                self.error("expected end of line", span);
                self.skip_line();
            }
        }
    }

    /// `true` when the cursor sits at `word` followed by a non-word
    /// character.
    fn at_keyword(&self, word: &str) -> bool {
        let bytes = word.as_bytes();
        if self.src.len() < self.pos + bytes.len() {
            return false;
        }
        if &self.src[self.pos..self.pos + bytes.len()] != bytes {
            return false;
        }
        match self.peek_at(bytes.len()) {
            Some(b) => !is_ident_byte(b),
            None => true,
        }
    }

    /// Lookahead: `ident ':'` at the cursor (a branch label).
    fn at_branch_label(&self) -> bool {
        let mut offset = 0;
        match self.peek() {
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => offset += 1,
            _ => return false,
        }
        while let Some(b) = self.peek_at(offset) {
            if is_ident_byte(b) {
                offset += 1;
            } else {
                break;
            }
        }
        self.peek_at(offset) == Some(b':')
    }

    // -- entry -----------------------------------------------------------

    fn run(&mut self) {
        // A leading shebang line is trivia: stripped before any token is
        // produced, so it can never reach the planner or the plan hash.
        if self.src.starts_with(b"#!") {
            self.skip_line();
        }
        self.parse_statements(Ctx::TopLevel);
        if !self.at_eof() {
            let span = self.here();
            self.error("unexpected `}`", span);
        }
    }

    /// Parse statements until EOF (top level) or a closing `}`.
    fn parse_statements(&mut self, ctx: Ctx) {
        loop {
            self.eat_inline_ws();
            match self.peek() {
                None => {
                    if ctx != Ctx::TopLevel {
                        let span = self.here();
                        self.error("unexpected end of file: unclosed block", span);
                    }
                    return;
                }
                Some(b'\n') => {
                    self.bump();
                }
                Some(b'#') => self.skip_line(),
                Some(b'}') => {
                    if ctx == Ctx::TopLevel {
                        // Reported by `run`.
                        return;
                    }
                    let span = self.here();
                    self.bump();
                    self.token(TokenKind::Punct, "}", span);
                    self.expect_eol();
                    return;
                }
                Some(b'@') => self.parse_decorator_statement(),
                Some(_) if self.at_keyword("var") => self.parse_var(),
                Some(_) if self.at_keyword("fun") => {
                    if ctx == Ctx::TopLevel {
                        self.parse_fun();
                    } else {
                        let span = self.here();
                        self.error("function definitions are only allowed at the top level", span);
                        self.skip_line();
                    }
                }
                Some(_) if ctx == Ctx::DecoratorBlock && self.at_branch_label() => {
                    self.parse_branch();
                }
                Some(_) => self.parse_chain(),
            }
        }
    }

    // -- declarations ----------------------------------------------------

    fn parse_var(&mut self) {
        let mark = self.mark();
        self.scan_keyword("var");
        self.eat_inline_ws();
        let Some(name) = self.scan_ident() else {
            let span = self.here();
            self.error("expected a variable name after `var`", span);
            self.skip_line();
            return;
        };
        self.eat_inline_ws();
        if self.peek() != Some(b'=') {
            let span = self.here();
            self.error("expected `=` in variable declaration", span);
            self.skip_line();
            return;
        }
        let eq_span = self.here();
        self.bump();
        self.token(TokenKind::Punct, "=", eq_span);
        self.eat_inline_ws();
        let Some(value) = self.parse_value() else {
            self.skip_line();
            return;
        };
        let span = self.span_from(mark);
        self.expect_eol();
        self.events.push(ParseEvent::VarDecl { name, value, span });
    }

    fn parse_fun(&mut self) {
        let mark = self.mark();
        self.scan_keyword("fun");
        self.eat_inline_ws();
        let Some(name) = self.scan_ident() else {
            let span = self.here();
            self.error("expected a function name after `fun`", span);
            self.skip_line();
            return;
        };
        self.eat_inline_ws();
        match self.peek() {
            Some(b'=') => {
                let eq_span = self.here();
                self.bump();
                self.token(TokenKind::Punct, "=", eq_span);
                self.eat_inline_ws();
                let span = self.span_from(mark);
                self.events.push(ParseEvent::EnterFun { name, span });
                self.parse_chain();
                self.events.push(ParseEvent::ExitFun);
            }
            Some(b'{') => {
                let brace_span = self.here();
                self.bump();
                self.token(TokenKind::Punct, "{", brace_span);
                self.expect_eol();
                let span = self.span_from(mark);
                self.events.push(ParseEvent::EnterFun { name, span });
                self.parse_statements(Ctx::FunBlock);
                self.events.push(ParseEvent::ExitFun);
            }
            _ => {
                let span = self.here();
                self.error("expected `=` or `{` after the function name", span);
                self.skip_line();
            }
        }
    }

    // -- decorators ------------------------------------------------------

    fn parse_decorator_statement(&mut self) {
        let mark = self.mark();
        let Some(reference) = self.parse_ref() else {
            self.skip_line();
            return;
        };
        self.eat_inline_ws();
        let has_block = self.peek() == Some(b'{');
        let span = self.span_from(mark);
        self.events.push(ParseEvent::EnterDecorator {
            path: reference.path,
            args: reference.args,
            has_block,
            span,
        });
        if has_block {
            let brace_span = self.here();
            self.bump();
            self.token(TokenKind::Punct, "{", brace_span);
            self.expect_eol();
            self.parse_statements(Ctx::DecoratorBlock);
        } else {
            self.expect_eol();
        }
        self.events.push(ParseEvent::ExitDecorator);
    }

    fn parse_branch(&mut self) {
        let mark = self.mark();
        let label = self.scan_ident().expect("caller checked the label shape");
        let colon_span = self.here();
        self.bump(); // ':'
        self.token(TokenKind::Punct, ":", colon_span);
        self.eat_inline_ws();
        let span = self.span_from(mark);
        self.events.push(ParseEvent::EnterBranch { label, span });
        match self.peek() {
            Some(b'{') => {
                let brace_span = self.here();
                self.bump();
                self.token(TokenKind::Punct, "{", brace_span);
                self.expect_eol();
                self.parse_statements(Ctx::BranchBlock);
            }
            Some(b'\n') | None => {
                let span = self.here();
                self.error("expected a command or `{` after the branch label", span);
                self.skip_line();
            }
            Some(b'@') => self.parse_decorator_statement(),
            Some(_) => self.parse_chain(),
        }
        self.events.push(ParseEvent::ExitBranch);
    }

    // -- chains ----------------------------------------------------------

    fn parse_chain(&mut self) {
        let chain_mark = self.mark();
        self.events.push(ParseEvent::EnterChain {
            span: SourceSpan::new(
                chain_mark.0 as u32,
                chain_mark.0 as u32,
                chain_mark.1,
                chain_mark.2,
            ),
        });
        let mut words: Vec<ParsedWord> = Vec::new();
        let mut command_mark = self.mark();
        let mut closed = false;

        loop {
            self.eat_inline_ws();
            match self.peek() {
                None | Some(b'\n') | Some(b'#') => {
                    if !words.is_empty() {
                        let span = self.span_from(command_mark);
                        self.events.push(ParseEvent::Command {
                            words: std::mem::take(&mut words),
                            operator: None,
                            redirect: None,
                            span,
                        });
                    } else if !closed {
                        let span = self.here();
                        self.error("expected a command", span);
                    }
                    self.expect_eol();
                    break;
                }
                Some(_) => {}
            }

            if let Some(op) = self.peek_operator() {
                if words.is_empty() {
                    let span = self.here();
                    self.error(format!("expected a command before `{}`", op.symbol()), span);
                    self.skip_line();
                    break;
                }
                self.scan_operator(op);
                if op == ShellOp::Append {
                    self.eat_inline_ws();
                    let Some(target) = self.parse_word() else {
                        let span = self.here();
                        self.error("expected a redirect target after `>>`", span);
                        self.skip_line();
                        break;
                    };
                    let span = self.span_from(command_mark);
                    self.events.push(ParseEvent::Command {
                        words: std::mem::take(&mut words),
                        operator: Some(ShellOp::Append),
                        redirect: Some(target),
                        span,
                    });
                    closed = true;
                    self.eat_inline_ws();
                    if !matches!(self.peek(), None | Some(b'\n') | Some(b'#')) {
                        let span = self.here();
                        self.error("`>>` must be the last operator of its chain", span);
                        self.skip_line();
                        break;
                    }
                } else {
                    let span = self.span_from(command_mark);
                    self.events.push(ParseEvent::Command {
                        words: std::mem::take(&mut words),
                        operator: Some(op),
                        redirect: None,
                        span,
                    });
                    command_mark = self.mark();
                }
                continue;
            }

            if closed {
                let span = self.here();
                self.error("`>>` must be the last operator of its chain", span);
                self.skip_line();
                break;
            }
            if words.is_empty() {
                command_mark = self.mark();
            }
            match self.parse_word() {
                Some(word) => words.push(word),
                None => {
                    self.skip_line();
                    break;
                }
            }
        }
        self.events.push(ParseEvent::ExitChain);
    }

    /// Operator lookahead: `&&`, `||`, `>>`, `|` as standalone words.
    fn peek_operator(&self) -> Option<ShellOp> {
        let two = |a: u8, b: u8| self.peek() == Some(a) && self.peek_at(1) == Some(b);
        let boundary = |offset: usize| {
            matches!(
                self.src.get(self.pos + offset),
                None | Some(b' ' | b'\t' | b'\r' | b'\n')
            )
        };
        if two(b'&', b'&') && boundary(2) {
            Some(ShellOp::And)
        } else if two(b'|', b'|') && boundary(2) {
            Some(ShellOp::Or)
        } else if two(b'>', b'>') && boundary(2) {
            Some(ShellOp::Append)
        } else if self.peek() == Some(b'|') && boundary(1) {
            Some(ShellOp::Pipe)
        } else {
            None
        }
    }

    fn scan_operator(&mut self, op: ShellOp) {
        let mark = self.mark();
        for _ in 0..op.symbol().len() {
            self.bump();
        }
        let span = self.span_from(mark);
        self.token(TokenKind::Operator, op.symbol(), span);
    }

    // -- words -----------------------------------------------------------

    /// One shell word: quoted string, decorator reference, or bare text.
    fn parse_word(&mut self) -> Option<ParsedWord> {
        match self.peek() {
            Some(b'"') => self.parse_string_word(),
            Some(b'@') => {
                let reference = self.parse_ref()?;
                let span = reference.span;
                Some(ParsedWord {
                    parts: vec![WordPart::Ref(reference)],
                    span,
                })
            }
            Some(_) => {
                let mark = self.mark();
                while let Some(b) = self.peek() {
                    if matches!(b, b' ' | b'\t' | b'\r' | b'\n') {
                        break;
                    }
                    self.bump();
                }
                let text = self.text(mark).to_string();
                let span = self.span_from(mark);
                self.token(TokenKind::Word, &text, span);
                Some(ParsedWord {
                    parts: vec![WordPart::Text(text)],
                    span,
                })
            }
            None => None,
        }
    }

    /// A quoted string word, split into text and interpolated
    /// references.
    fn parse_string_word(&mut self) -> Option<ParsedWord> {
        let mark = self.mark();
        let content = self.scan_string()?;
        let span = self.span_from(mark);
        Some(ParsedWord {
            parts: split_interpolation(&content, span),
            span,
        })
    }

    /// Scan a double-quoted string, returning the unescaped content.
    fn scan_string(&mut self) -> Option<String> {
        let mark = self.mark();
        self.bump(); // opening quote
        let mut content: Vec<u8> = Vec::new();
        loop {
            match self.bump() {
                None | Some(b'\n') => {
                    let span = self.span_from(mark);
                    self.error("unterminated string", span);
                    return None;
                }
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'n') => content.push(b'\n'),
                    Some(b't') => content.push(b'\t'),
                    Some(b'r') => content.push(b'\r'),
                    Some(b'"') => content.push(b'"'),
                    Some(b'\\') => content.push(b'\\'),
                    other => {
                        let span = self.here();
                        self.error(
                            format!(
                                "unknown escape `\\{}`",
                                other.map(|b| b as char).unwrap_or(' ')
                            ),
                            span,
                        );
                        return None;
                    }
                },
                Some(b) => content.push(b),
            }
        }
        let span = self.span_from(mark);
        let content = match String::from_utf8(content) {
            Ok(content) => content,
            Err(_) => {
                self.error("string is not valid UTF-8", span);
                return None;
            }
        };
        self.token(TokenKind::Str, &content, span);
        Some(content)
    }

    // -- decorator references and arguments ------------------------------

    /// `@path.seg…` with an optional parenthesised argument list.
    fn parse_ref(&mut self) -> Option<ParsedRef> {
        let mark = self.mark();
        let at_span = self.here();
        self.bump(); // '@'
        self.token(TokenKind::Punct, "@", at_span);
        let mut segments = Vec::new();
        loop {
            match self.scan_ident() {
                Some(segment) => segments.push(segment),
                None => {
                    let span = self.here();
                    self.error("expected a decorator name after `@`", span);
                    return None;
                }
            }
            if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(is_ident_start) {
                let dot_span = self.here();
                self.bump();
                self.token(TokenKind::Punct, ".", dot_span);
            } else {
                break;
            }
        }
        let args = if self.peek() == Some(b'(') {
            self.parse_args()?
        } else {
            Vec::new()
        };
        Some(ParsedRef {
            path: segments.join("."),
            args,
            span: self.span_from(mark),
        })
    }

    fn parse_args(&mut self) -> Option<Vec<ParsedArg>> {
        let open_span = self.here();
        self.bump(); // '('
        self.token(TokenKind::Punct, "(", open_span);
        let mut args = Vec::new();
        loop {
            self.eat_inline_ws();
            match self.peek() {
                Some(b')') => {
                    let span = self.here();
                    self.bump();
                    self.token(TokenKind::Punct, ")", span);
                    return Some(args);
                }
                None | Some(b'\n') => {
                    let span = self.here();
                    self.error("unterminated argument list", span);
                    return None;
                }
                Some(b',') if !args.is_empty() => {
                    let span = self.here();
                    self.bump();
                    self.token(TokenKind::Punct, ",", span);
                    self.eat_inline_ws();
                }
                Some(_) if !args.is_empty() => {
                    let span = self.here();
                    self.error("expected `,` or `)` between arguments", span);
                    return None;
                }
                Some(_) => {}
            }
            self.eat_inline_ws();
            if self.peek() == Some(b')') {
                let span = self.here();
                self.bump();
                self.token(TokenKind::Punct, ")", span);
                return Some(args);
            }
            let mark = self.mark();
            let name = self.scan_named_prefix();
            let value = self.parse_value()?;
            args.push(ParsedArg {
                name,
                value,
                span: self.span_from(mark),
            });
        }
    }

    /// `ident =` lookahead for named arguments; consumes it when
    /// present.
    fn scan_named_prefix(&mut self) -> Option<String> {
        let mut offset = 0;
        match self.peek() {
            Some(b) if is_ident_start(b) => offset += 1,
            _ => return None,
        }
        while let Some(b) = self.peek_at(offset) {
            if is_ident_byte(b) {
                offset += 1;
            } else {
                break;
            }
        }
        if self.peek_at(offset) != Some(b'=') {
            return None;
        }
        let name = self.scan_ident().expect("checked ident shape");
        let eq_span = self.here();
        self.bump(); // '='
        self.token(TokenKind::Punct, "=", eq_span);
        Some(name)
    }

    /// A literal or nested reference in argument / `var` position.
    fn parse_value(&mut self) -> Option<ParsedValue> {
        self.eat_inline_ws();
        match self.peek() {
            Some(b'"') => self.scan_string().map(ParsedValue::Str),
            Some(b'@') => self.parse_ref().map(|r| ParsedValue::Ref(Box::new(r))),
            Some(b) if b.is_ascii_digit() || b == b'-' => self.scan_number_or_duration(),
            Some(b) if is_ident_start(b) => {
                let word = self.scan_ident().expect("checked ident shape");
                match word.as_str() {
                    "true" => Some(ParsedValue::Bool(true)),
                    "false" => Some(ParsedValue::Bool(false)),
                    _ => Some(ParsedValue::Str(word)),
                }
            }
            _ => {
                let span = self.here();
                self.error("expected a value", span);
                None
            }
        }
    }

    fn scan_number_or_duration(&mut self) -> Option<ParsedValue> {
        let mark = self.mark();
        if self.peek() == Some(b'-') {
            self.bump();
        }
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.bump();
        }
        // A unit suffix makes it a duration; a dot makes it a float.
        if self.peek().is_some_and(|b| b.is_ascii_alphabetic()) {
            while self
                .peek()
                .is_some_and(|b| b.is_ascii_alphanumeric())
            {
                self.bump();
            }
            let text = self.text(mark).to_string();
            let span = self.span_from(mark);
            match text.parse::<Duration>() {
                Ok(duration) => {
                    self.token(TokenKind::Duration, &text, span);
                    Some(ParsedValue::Duration(duration))
                }
                Err(e) => {
                    self.error(format!("invalid duration `{text}`: {e}"), span);
                    None
                }
            }
        } else if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            self.bump();
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.bump();
            }
            let text = self.text(mark).to_string();
            let span = self.span_from(mark);
            match text.parse::<f64>() {
                Ok(f) => {
                    self.token(TokenKind::Number, &text, span);
                    Some(ParsedValue::Float(f))
                }
                Err(_) => {
                    self.error(format!("invalid number `{text}`"), span);
                    None
                }
            }
        } else {
            let text = self.text(mark).to_string();
            let span = self.span_from(mark);
            match text.parse::<i64>() {
                Ok(i) => {
                    self.token(TokenKind::Number, &text, span);
                    Some(ParsedValue::Int(i))
                }
                Err(_) => {
                    self.error(format!("invalid number `{text}`"), span);
                    None
                }
            }
        }
    }

    // -- low-level scanners ----------------------------------------------

    fn scan_keyword(&mut self, keyword: &str) {
        let mark = self.mark();
        for _ in 0..keyword.len() {
            self.bump();
        }
        let span = self.span_from(mark);
        self.token(TokenKind::Keyword, keyword, span);
    }

    fn scan_ident(&mut self) -> Option<String> {
        if !self.peek().is_some_and(is_ident_start) {
            return None;
        }
        let mark = self.mark();
        while self.peek().is_some_and(is_ident_byte) {
            self.bump();
        }
        let text = self.text(mark).to_string();
        let span = self.span_from(mark);
        self.token(TokenKind::Ident, &text, span);
        Some(text)
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Split a string's content into literal text and `@path.seg`
/// references.
///
/// A reference starts at `@` preceded by start-of-string or a
/// non-alphanumeric byte and needs at least one dotted segment, so
/// `user@host.com` stays literal while `: @var.SECRET` interpolates.
fn split_interpolation(content: &str, span: SourceSpan) -> Vec<WordPart> {
    let bytes = content.as_bytes();
    let mut parts: Vec<WordPart> = Vec::new();
    let mut literal: Vec<u8> = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let is_boundary = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
        if bytes[i] == b'@' && is_boundary {
            if let Some((path, consumed)) = scan_dotted_path(&bytes[i + 1..]) {
                if !literal.is_empty() {
                    let text = String::from_utf8(std::mem::take(&mut literal))
                        .expect("literal splits on ASCII boundaries");
                    parts.push(WordPart::Text(text));
                }
                parts.push(WordPart::Ref(ParsedRef {
                    path,
                    args: Vec::new(),
                    span,
                }));
                i += 1 + consumed;
                continue;
            }
        }
        literal.push(bytes[i]);
        i += 1;
    }
    if !literal.is_empty() || parts.is_empty() {
        let text =
            String::from_utf8(literal).expect("literal splits on ASCII boundaries");
        parts.push(WordPart::Text(text));
    }
    parts
}

/// `ident ('.' ident)+` at the start of `bytes`; returns the dotted path
/// and the number of bytes consumed.
fn scan_dotted_path(bytes: &[u8]) -> Option<(String, usize)> {
    let mut i = 0;
    let mut segments = 1usize;
    if !bytes.first().copied().is_some_and(is_ident_start) {
        return None;
    }
    while i < bytes.len() && is_ident_byte(bytes[i]) {
        i += 1;
    }
    while i < bytes.len()
        && bytes[i] == b'.'
        && bytes.get(i + 1).copied().is_some_and(is_ident_start)
    {
        segments += 1;
        i += 1;
        while i < bytes.len() && is_ident_byte(bytes[i]) {
            i += 1;
        }
    }
    if segments < 2 {
        return None;
    }
    let path = std::str::from_utf8(&bytes[..i]).ok()?.to_string();
    Some((path, i))
}
