// SPDX-License-Identifier: MIT OR Apache-2.0
//! The planner: lowers the parser's event stream into a [`Plan`].
//!
//! Planning walks the validated events once, maintaining a container
//! stack, the current transport scope, and a pre-order step counter.
//! Value decorators are evaluated here — their handlers run against a
//! borrowed [`ResolveCtx`], the result is registered in the vault, and a
//! DisplayID takes the value's place in the plan. Execution decorators
//! become `Decorator` or `Pattern` nodes with recursively planned
//! blocks. Planning either returns a complete plan or a non-empty error
//! list with source anchors — never a partial plan.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use opal_core::{Arg, CommandNode, Plan, Step, Value};
use opal_decorator::{
    BlockRequirement, BranchSpec, DecoratorInfo, DecoratorKind, Handler, InvocationArg, Registry,
    ResolveCtx, TransportContext, VarLookup, check_transport,
};
use opal_error::{ErrorKind, OpalError, SourceSpan};
use opal_parse::{ParseEvent, ParseOutput, ParsedArg, ParsedRef, ParsedValue, ParsedWord, WordPart};
use opal_vault::{IdFactory, Vault, new_plan_salt};
use std::collections::{BTreeMap, HashMap};

/// Script mode: plan every top-level statement.
pub const SCRIPT_TARGET: &str = "";

/// The planner: registry + vault + a frozen environment snapshot.
pub struct Planner<'a> {
    registry: &'a Registry,
    vault: &'a Vault,
    env: BTreeMap<String, String>,
}

impl<'a> Planner<'a> {
    /// A planner over the current process environment.
    #[must_use]
    pub fn new(registry: &'a Registry, vault: &'a Vault) -> Self {
        Self::with_env(registry, vault, std::env::vars().collect())
    }

    /// A planner over an explicit environment snapshot.
    #[must_use]
    pub fn with_env(
        registry: &'a Registry,
        vault: &'a Vault,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            registry,
            vault,
            env,
        }
    }

    /// Lower parsed source to a plan.
    ///
    /// `target` selects command mode (a function name) or script mode
    /// (`""`); in command mode top-level `var` declarations are still
    /// processed, in declaration order, before the function body.
    ///
    /// # Errors
    ///
    /// Every planning error collected, each with a span where one is
    /// known. No partial plan is returned.
    pub fn plan(&self, parsed: &ParseOutput, target: &str) -> Result<Plan, Vec<OpalError>> {
        let mut walk = Walk {
            planner: self,
            events: &parsed.events,
            next_id: 1,
            occurrence: 0,
            scope: vec![TransportContext::Root],
            vars: BTreeMap::new(),
            functions: index_functions(&parsed.events),
            inline_stack: Vec::new(),
            errors: Vec::new(),
        };

        let mut steps = Vec::new();
        if target.is_empty() {
            walk.plan_script(&mut steps);
        } else {
            walk.plan_command(target, &mut steps);
        }

        if !walk.errors.is_empty() {
            return Err(walk.errors);
        }

        let plan_salt = match self.vault.factory() {
            IdFactory::Plan { salt } => *salt,
            IdFactory::Run => new_plan_salt(),
        };
        let plan = Plan {
            target: target.to_string(),
            steps,
            secrets: self.vault.secrets(),
            plan_salt,
        };
        if let Err(violation) = plan.check_invariants() {
            return Err(vec![OpalError::internal(format!(
                "planned tree violates invariants: {violation}"
            ))]);
        }
        let shown_target = if plan.target.is_empty() {
            "<script>"
        } else {
            plan.target.as_str()
        };
        tracing::debug!(
            target: "opal_planner",
            plan_target = shown_target,
            steps = plan.step_count(),
            secrets = plan.secrets.len(),
            "planning complete"
        );
        Ok(plan)
    }
}

/// Map function name → event range of its body (exclusive of the
/// enter/exit pair).
fn index_functions(events: &[ParseEvent]) -> HashMap<String, (usize, usize)> {
    let mut functions = HashMap::new();
    let mut i = 0;
    while i < events.len() {
        if let ParseEvent::EnterFun { name, .. } = &events[i] {
            let mut depth = 1usize;
            let mut j = i + 1;
            while j < events.len() && depth > 0 {
                match &events[j] {
                    ParseEvent::EnterFun { .. } => depth += 1,
                    ParseEvent::ExitFun => depth -= 1,
                    _ => {}
                }
                j += 1;
            }
            functions.insert(name.clone(), (i + 1, j - 1));
            i = j;
        } else {
            i += 1;
        }
    }
    functions
}

struct Vars<'a>(&'a BTreeMap<String, Vec<u8>>);

impl VarLookup for Vars<'_> {
    fn var(&self, name: &str) -> Option<&[u8]> {
        self.0.get(name).map(Vec::as_slice)
    }
}

struct Walk<'a> {
    planner: &'a Planner<'a>,
    events: &'a [ParseEvent],
    next_id: u32,
    occurrence: u32,
    scope: Vec<TransportContext>,
    vars: BTreeMap<String, Vec<u8>>,
    functions: HashMap<String, (usize, usize)>,
    inline_stack: Vec<String>,
    errors: Vec<OpalError>,
}

impl Walk<'_> {
    fn current_scope(&self) -> TransportContext {
        *self.scope.last().expect("scope stack is never empty")
    }

    fn take_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // -- top-level modes -------------------------------------------------

    fn plan_script(&mut self, out: &mut Vec<Step>) {
        let mut pos = 0;
        while pos < self.events.len() {
            match &self.events[pos] {
                ParseEvent::VarDecl { name, value, span } => {
                    let name = name.clone();
                    let value = value.clone();
                    self.declare_var(&name, &value, *span);
                    pos += 1;
                }
                ParseEvent::EnterFun { .. } => {
                    // Script mode never emits function bodies.
                    pos = skip_container(self.events, pos);
                }
                _ => pos = self.plan_statement(pos, out),
            }
        }
    }

    fn plan_command(&mut self, target: &str, out: &mut Vec<Step>) {
        let mut pos = 0;
        while pos < self.events.len() {
            match &self.events[pos] {
                ParseEvent::VarDecl { name, value, span } => {
                    let name = name.clone();
                    let value = value.clone();
                    self.declare_var(&name, &value, *span);
                    pos += 1;
                }
                _ => pos = skip_container(self.events, pos),
            }
        }

        let Some(&(start, end)) = self.functions.get(target) else {
            self.errors.push(
                OpalError::new(
                    ErrorKind::Invalid,
                    format!("no function named `{target}` in this file"),
                )
                .with_hint("run without a target to execute the script top level"),
            );
            return;
        };
        self.plan_range(start, end, out);
    }

    /// Plan every statement in `events[start..end]`.
    fn plan_range(&mut self, start: usize, end: usize, out: &mut Vec<Step>) {
        let mut pos = start;
        while pos < end {
            pos = self.plan_statement(pos, out);
        }
    }

    /// Plan one statement starting at `pos`; returns the position after
    /// it.
    fn plan_statement(&mut self, pos: usize, out: &mut Vec<Step>) -> usize {
        match &self.events[pos] {
            ParseEvent::EnterChain { .. } => self.plan_chain(pos, out),
            ParseEvent::EnterDecorator { .. } => self.plan_decorator(pos, out),
            ParseEvent::VarDecl { name, value, span } => {
                let name = name.clone();
                let value = value.clone();
                self.declare_var(&name, &value, *span);
                pos + 1
            }
            other => {
                self.errors.push(OpalError::internal(format!(
                    "unexpected event in statement position: {other:?}"
                )));
                skip_container(self.events, pos)
            }
        }
    }

    // -- var declarations ------------------------------------------------

    fn declare_var(&mut self, name: &str, value: &ParsedValue, span: SourceSpan) {
        let bytes = match value {
            ParsedValue::Str(s) => s.clone().into_bytes(),
            ParsedValue::Int(i) => i.to_string().into_bytes(),
            ParsedValue::Float(f) => f.to_string().into_bytes(),
            ParsedValue::Bool(b) => b.to_string().into_bytes(),
            ParsedValue::Duration(d) => d.to_string().into_bytes(),
            ParsedValue::Ref(reference) => match self.resolve_ref(reference) {
                Ok(display_id) => match self.planner.vault.secret_bytes(&display_id) {
                    Some(bytes) => bytes,
                    None => {
                        self.errors.push(
                            OpalError::internal(format!(
                                "vault lost freshly registered id `{display_id}`"
                            ))
                            .with_span(span),
                        );
                        return;
                    }
                },
                Err(err) => {
                    self.errors.push(err.with_span(span));
                    return;
                }
            },
        };
        self.vars.insert(name.to_string(), bytes);
    }

    // -- chains ----------------------------------------------------------

    fn plan_chain(&mut self, pos: usize, out: &mut Vec<Step>) -> usize {
        debug_assert!(matches!(self.events[pos], ParseEvent::EnterChain { .. }));
        let mut pos = pos + 1;
        while let Some(ParseEvent::Command {
            words,
            operator,
            redirect,
            span,
        }) = self.events.get(pos)
        {
            let id = self.take_id();
            let mut args = Vec::with_capacity(words.len());
            for (index, word) in words.iter().enumerate() {
                match self.lower_word(word) {
                    Ok(value) => args.push(Arg::new(index.to_string(), value)),
                    Err(err) => self.errors.push(err),
                }
            }
            let target = redirect.as_ref().and_then(|word| {
                match self.lower_word_text(word) {
                    Ok(text) => Some(text),
                    Err(err) => {
                        self.errors.push(err);
                        None
                    }
                }
            });
            out.push(Step {
                id,
                tree: CommandNode::Shell {
                    args,
                    operator: *operator,
                    target,
                },
                span: Some(*span),
            });
            pos += 1;
        }
        debug_assert!(matches!(self.events.get(pos), Some(ParseEvent::ExitChain)));
        pos + 1
    }

    /// Lower a shell word to a plan value.
    ///
    /// A word that is exactly one reference becomes `DisplayId`; mixed
    /// words embed the DisplayID text, which the executor substitutes
    /// back from the vault.
    fn lower_word(&mut self, word: &ParsedWord) -> Result<Value, OpalError> {
        if let [WordPart::Ref(reference)] = word.parts.as_slice() {
            let display_id = self
                .resolve_ref(reference)
                .map_err(|e| e.with_span(word.span))?;
            return Ok(Value::DisplayId(display_id));
        }
        self.lower_word_text(word).map(Value::String)
    }

    /// Lower a word to plain text with references embedded as DisplayID
    /// text.
    fn lower_word_text(&mut self, word: &ParsedWord) -> Result<String, OpalError> {
        let mut text = String::new();
        for part in &word.parts {
            match part {
                WordPart::Text(t) => text.push_str(t),
                WordPart::Ref(reference) => {
                    let display_id = self
                        .resolve_ref(reference)
                        .map_err(|e| e.with_span(word.span))?;
                    text.push_str(&display_id);
                }
            }
        }
        Ok(text)
    }

    // -- decorators ------------------------------------------------------

    fn plan_decorator(&mut self, pos: usize, out: &mut Vec<Step>) -> usize {
        let ParseEvent::EnterDecorator {
            path,
            args,
            has_block,
            span,
        } = &self.events[pos]
        else {
            unreachable!("caller checked the event kind");
        };
        let end = skip_container(self.events, pos);
        let (path, args, has_block, span) = (path.clone(), args.clone(), *has_block, *span);

        let (info, binding) = match self.lookup_and_bind(&path, &args, span) {
            Ok(pair) => pair,
            Err(err) => {
                self.errors.push(err);
                return end;
            }
        };

        if info.descriptor.kind == DecoratorKind::Value {
            self.errors.push(
                OpalError::new(
                    ErrorKind::Invalid,
                    format!("@{} resolves to a value and cannot stand alone", path),
                )
                .with_span(span),
            );
            return end;
        }

        match (info.descriptor.block, has_block) {
            (BlockRequirement::Forbidden, true) => {
                self.errors.push(
                    OpalError::new(
                        ErrorKind::Invalid,
                        format!("@{} does not take a block", info.descriptor.path),
                    )
                    .with_span(span),
                );
                return end;
            }
            (BlockRequirement::Required, false) => {
                self.errors.push(
                    OpalError::new(
                        ErrorKind::Invalid,
                        format!("@{} requires a block", info.descriptor.path),
                    )
                    .with_span(span),
                );
                return end;
            }
            _ => {}
        }

        // `@cmd(name)` inlines the named function's plan in place.
        if info.descriptor.path == "cmd" {
            self.inline_function(&binding, span, out);
            return end;
        }

        let id = self.take_id();
        if info.descriptor.switches_transport {
            self.scope.push(TransportContext::Switched);
        }

        let tree = if info.descriptor.is_pattern() {
            let branches = self.plan_branches(pos + 1, end - 1, &info, span);
            CommandNode::Pattern {
                name: info.descriptor.path.clone(),
                args: binding.args,
                branches,
            }
        } else {
            let mut block = Vec::new();
            self.plan_block_statements(pos + 1, end - 1, &mut block, span);
            CommandNode::Decorator {
                name: info.descriptor.path.clone(),
                args: binding.args,
                block,
            }
        };

        if info.descriptor.switches_transport {
            self.scope.pop();
        }
        out.push(Step {
            id,
            tree,
            span: Some(span),
        });
        end
    }

    /// Plan plain (non-branch) block contents.
    fn plan_block_statements(
        &mut self,
        start: usize,
        end: usize,
        out: &mut Vec<Step>,
        span: SourceSpan,
    ) {
        let mut pos = start;
        while pos < end {
            if let ParseEvent::EnterBranch { label, .. } = &self.events[pos] {
                self.errors.push(
                    OpalError::new(
                        ErrorKind::Invalid,
                        format!("branch label `{label}:` is only valid inside a pattern block"),
                    )
                    .with_span(span),
                );
                pos = skip_container(self.events, pos);
            } else {
                pos = self.plan_statement(pos, out);
            }
        }
    }

    /// Plan a pattern's branch list.
    fn plan_branches(
        &mut self,
        start: usize,
        end: usize,
        info: &DecoratorInfo,
        span: SourceSpan,
    ) -> BTreeMap<String, Vec<Step>> {
        let mut branches: BTreeMap<String, Vec<Step>> = BTreeMap::new();
        let mut pos = start;
        while pos < end {
            match &self.events[pos] {
                ParseEvent::EnterBranch { label, span } => {
                    let label = label.clone();
                    let branch_span = *span;
                    let branch_end = skip_container(self.events, pos);
                    if branches.contains_key(&label) {
                        self.errors.push(
                            OpalError::new(
                                ErrorKind::Invalid,
                                format!("duplicate branch `{label}`"),
                            )
                            .with_span(branch_span),
                        );
                        pos = branch_end;
                        continue;
                    }
                    if let BranchSpec::Fixed(allowed) = &info.descriptor.branches {
                        if !allowed.contains(&label) {
                            self.errors.push(
                                OpalError::new(
                                    ErrorKind::Invalid,
                                    format!(
                                        "@{} has no branch `{label}` (expected one of: {})",
                                        info.descriptor.path,
                                        allowed.join(", ")
                                    ),
                                )
                                .with_span(branch_span),
                            );
                            pos = branch_end;
                            continue;
                        }
                    }
                    let mut body = Vec::new();
                    self.plan_range(pos + 1, branch_end - 1, &mut body);
                    branches.insert(label, body);
                    pos = branch_end;
                }
                _ => {
                    self.errors.push(
                        OpalError::new(
                            ErrorKind::Invalid,
                            format!(
                                "@{} takes labelled branches, not bare statements",
                                info.descriptor.path
                            ),
                        )
                        .with_span(span),
                    );
                    pos = skip_container(self.events, pos);
                }
            }
        }
        if branches.is_empty() {
            self.errors.push(
                OpalError::new(
                    ErrorKind::Invalid,
                    format!("@{} requires at least one branch", info.descriptor.path),
                )
                .with_span(span),
            );
        }
        branches
    }

    fn inline_function(
        &mut self,
        binding: &opal_decorator::Binding,
        span: SourceSpan,
        out: &mut Vec<Step>,
    ) {
        let name = match binding.str("name") {
            Ok(name) => name.to_string(),
            Err(err) => {
                self.errors.push(err.with_span(span));
                return;
            }
        };
        let Some(&(start, end)) = self.functions.get(&name) else {
            self.errors.push(
                OpalError::new(
                    ErrorKind::Invalid,
                    format!("@cmd references unknown function `{name}`"),
                )
                .with_span(span),
            );
            return;
        };
        if self.inline_stack.contains(&name) {
            self.errors.push(
                OpalError::new(
                    ErrorKind::Invalid,
                    format!(
                        "@cmd cycle: {} -> {name}",
                        self.inline_stack.join(" -> ")
                    ),
                )
                .with_span(span),
            );
            return;
        }
        self.inline_stack.push(name);
        self.plan_range(start, end, out);
        self.inline_stack.pop();
    }

    // -- value resolution ------------------------------------------------

    /// Resolve a value-decorator reference; returns its DisplayID.
    fn resolve_ref(&mut self, reference: &ParsedRef) -> Result<String, OpalError> {
        let (info, binding) =
            self.lookup_and_bind(&reference.path, &reference.args, reference.span)?;
        let descriptor = &info.descriptor;

        let Handler::Value(handler) = &info.handler else {
            return Err(OpalError::new(
                ErrorKind::Invalid,
                format!("@{} is not a value decorator", descriptor.path),
            ));
        };
        check_transport(self.current_scope(), descriptor)?;

        let occurrence = self.occurrence;
        self.occurrence += 1;

        let vars = Vars(&self.vars);
        let ctx = ResolveCtx {
            env: &self.planner.env,
            vars: &vars,
            seed: self.planner.vault.factory(),
            occurrence,
        };
        let resolved = handler.resolve(&ctx, &binding)?;

        let key = match descriptor
            .primary_param
            .as_deref()
            .and_then(|primary| binding.opt_str(primary))
        {
            Some(primary) => format!("{}.{primary}", descriptor.path),
            None => descriptor.path.clone(),
        };
        let canonical = canonical_args(&binding);
        self.planner.vault.register(
            &key,
            &canonical,
            occurrence,
            resolved.bytes,
            resolved.class,
        )
    }

    /// Registry lookup with dotted-path sugar: the longest registered
    /// prefix is the decorator, the remaining segments feed the primary
    /// parameter.
    fn lookup_and_bind(
        &mut self,
        path: &str,
        args: &[ParsedArg],
        span: SourceSpan,
    ) -> Result<(DecoratorInfo, opal_decorator::Binding), OpalError> {
        let (decorator_path, primary_tail) = self.split_path(path).ok_or_else(|| {
            OpalError::new(ErrorKind::Invalid, format!("unknown decorator @{path}"))
                .with_span(span)
                .with_hint("run `opal schema` to list registered decorators")
        })?;

        let mut invocation = Vec::with_capacity(args.len() + 1);
        if let Some(primary) = primary_tail {
            invocation.push(InvocationArg::positional(Value::String(primary)));
        }
        for arg in args {
            let value = self.lower_parsed_value(&arg.value)?;
            invocation.push(InvocationArg {
                name: arg.name.clone(),
                value,
                span: Some(arg.span),
            });
        }

        let (info, binding) = self
            .planner
            .registry
            .bind_and_validate(&decorator_path, &invocation)
            .map_err(|e| if e.span.is_none() { e.with_span(span) } else { e })?;
        Ok((info, binding))
    }

    /// Longest registered prefix of a dotted path; the tail (if any)
    /// joins back into the primary argument.
    fn split_path(&self, path: &str) -> Option<(String, Option<String>)> {
        if self.planner.registry.contains(path) {
            return Some((path.to_string(), None));
        }
        let segments: Vec<&str> = path.split('.').collect();
        for cut in (1..segments.len()).rev() {
            let head = segments[..cut].join(".");
            if self.planner.registry.contains(&head) {
                let tail = segments[cut..].join(".");
                return Some((head, Some(tail)));
            }
        }
        None
    }

    /// Convert a parsed argument value, resolving nested references
    /// first.
    fn lower_parsed_value(&mut self, value: &ParsedValue) -> Result<Value, OpalError> {
        Ok(match value {
            ParsedValue::Str(s) => Value::String(s.clone()),
            ParsedValue::Int(i) => Value::Int(*i),
            ParsedValue::Float(f) => Value::Float(*f),
            ParsedValue::Bool(b) => Value::Bool(*b),
            ParsedValue::Duration(d) => Value::Duration(*d),
            ParsedValue::Ref(reference) => Value::DisplayId(self.resolve_ref(reference)?),
        })
    }
}

/// Canonical byte form of a bound argument list, used for DisplayID
/// derivation. Declaration-ordered key/value pairs; DisplayID values
/// contribute their (already deterministic) text.
fn canonical_args(binding: &opal_decorator::Binding) -> Vec<u8> {
    let pairs: Vec<[String; 2]> = binding
        .args
        .iter()
        .map(|arg| [arg.key.clone(), arg.val.to_string()])
        .collect();
    serde_json::to_vec(&pairs).unwrap_or_default()
}

/// Position just past the container (or single event) starting at
/// `pos`.
fn skip_container(events: &[ParseEvent], pos: usize) -> usize {
    let mut depth = 0usize;
    let mut i = pos;
    loop {
        match &events[i] {
            ParseEvent::EnterFun { .. }
            | ParseEvent::EnterChain { .. }
            | ParseEvent::EnterDecorator { .. }
            | ParseEvent::EnterBranch { .. } => depth += 1,
            ParseEvent::ExitFun
            | ParseEvent::ExitChain
            | ParseEvent::ExitDecorator
            | ParseEvent::ExitBranch => depth -= 1,
            _ => {}
        }
        i += 1;
        if depth == 0 {
            return i;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use opal_core::{PLAN_SALT_LEN, ShellOp};

    const SALT: [u8; PLAN_SALT_LEN] = [42u8; PLAN_SALT_LEN];

    fn plan_with_env(
        source: &str,
        target: &str,
        env: &[(&str, &str)],
    ) -> Result<Plan, Vec<OpalError>> {
        let parsed = opal_parse::parse(source).expect("parse");
        let registry = Registry::with_builtins();
        let vault = Vault::new(IdFactory::plan(SALT));
        let env = env
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let planner = Planner::with_env(&registry, &vault, env);
        planner.plan(&parsed, target)
    }

    fn plan_ok(source: &str, target: &str) -> Plan {
        plan_with_env(source, target, &[]).expect("plan")
    }

    fn shell_words(step: &Step) -> Vec<String> {
        match &step.tree {
            CommandNode::Shell { args, .. } => args
                .iter()
                .map(|a| match &a.val {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            other => panic!("expected shell node, got {other:?}"),
        }
    }

    // -- modes -----------------------------------------------------------

    #[test]
    fn command_mode_emits_only_the_target_body() {
        let plan = plan_ok(
            "fun hello = echo \"Hello from Opal!\"\nfun other = echo nope\n",
            "hello",
        );
        assert_eq!(plan.target, "hello");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(shell_words(&plan.steps[0]), vec!["echo", "Hello from Opal!"]);
    }

    #[test]
    fn script_mode_skips_function_bodies() {
        let plan = plan_ok("fun helper = echo helper\necho top\n", "");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(shell_words(&plan.steps[0]), vec!["echo", "top"]);
    }

    #[test]
    fn unknown_target_is_invalid() {
        let errs = plan_with_env("echo hi\n", "missing", &[]).unwrap_err();
        assert_eq!(errs[0].kind, ErrorKind::Invalid);
        assert!(errs[0].message.contains("missing"));
    }

    // -- chains ----------------------------------------------------------

    #[test]
    fn chain_operators_link_steps_in_preorder() {
        let plan = plan_ok("fun t = echo \"A\" && echo \"B\" || echo \"C\"\n", "t");
        assert_eq!(plan.steps.len(), 3);
        let ops: Vec<Option<ShellOp>> = plan
            .steps
            .iter()
            .map(|s| match &s.tree {
                CommandNode::Shell { operator, .. } => *operator,
                _ => None,
            })
            .collect();
        assert_eq!(ops, vec![Some(ShellOp::And), Some(ShellOp::Or), None]);
        let ids: Vec<u32> = plan.steps.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn append_target_is_captured() {
        let plan = plan_ok("echo hi >> out.log\n", "");
        match &plan.steps[0].tree {
            CommandNode::Shell { operator, target, .. } => {
                assert_eq!(*operator, Some(ShellOp::Append));
                assert_eq!(target.as_deref(), Some("out.log"));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    // -- value decorators ------------------------------------------------

    #[test]
    fn var_reference_becomes_display_id_secret() {
        let plan = plan_ok(
            "var SECRET = \"my-secret-value\"\necho \"The secret is: @var.SECRET\"\n",
            "",
        );
        assert_eq!(plan.secrets.len(), 1);
        let secret = &plan.secrets[0];
        assert_eq!(secret.key, "var.SECRET");
        assert_eq!(secret.runtime_value, b"my-secret-value");
        assert!(secret.display_id.starts_with("opal:v:"));
        let words = shell_words(&plan.steps[0]);
        assert_eq!(words[1], format!("The secret is: {}", secret.display_id));
    }

    #[test]
    fn bare_reference_word_is_display_id_value() {
        let plan = plan_ok("var X = \"v\"\necho @var.X\n", "");
        match &plan.steps[0].tree {
            CommandNode::Shell { args, .. } => {
                assert!(matches!(&args[1].val, Value::DisplayId(id) if id.starts_with("opal:v:")));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn env_resolves_from_snapshot() {
        let plan = plan_with_env("echo @env.GREETING\n", "", &[("GREETING", "hello")])
            .expect("plan");
        assert_eq!(plan.secrets.len(), 1);
        assert_eq!(plan.secrets[0].runtime_value, b"hello");
        assert_eq!(plan.secrets[0].key, "env.GREETING");
    }

    #[test]
    fn env_unset_without_default_fails() {
        let errs = plan_with_env("echo @env.MISSING_VARIABLE\n", "", &[]).unwrap_err();
        assert_eq!(errs[0].kind, ErrorKind::Invalid);
    }

    #[test]
    fn same_reference_twice_registers_two_secrets() {
        let plan = plan_ok("var X = \"v\"\necho @var.X\necho @var.X\n", "");
        assert_eq!(plan.secrets.len(), 2);
        assert_ne!(plan.secrets[0].display_id, plan.secrets[1].display_id);
    }

    #[test]
    fn unknown_decorator_reports_invalid() {
        let errs = plan_with_env("echo @nosuch.THING\n", "", &[]).unwrap_err();
        assert_eq!(errs[0].kind, ErrorKind::Invalid);
        assert!(errs[0].message.contains("unknown decorator"));
    }

    // -- determinism -----------------------------------------------------

    #[test]
    fn same_salt_yields_identical_plans() {
        let source = "var S = \"shh\"\necho \"a @var.S b\"\n@retry(times=2) {\n  echo x\n}\n";
        let a = plan_ok(source, "");
        let b = plan_ok(source, "");
        assert_eq!(a, b);
    }

    #[test]
    fn run_factory_salts_differ() {
        let parsed = opal_parse::parse("echo hi\n").unwrap();
        let registry = Registry::with_builtins();
        let vault_a = Vault::new(IdFactory::Run);
        let vault_b = Vault::new(IdFactory::Run);
        let a = Planner::with_env(&registry, &vault_a, BTreeMap::new())
            .plan(&parsed, "")
            .unwrap();
        let b = Planner::with_env(&registry, &vault_b, BTreeMap::new())
            .plan(&parsed, "")
            .unwrap();
        assert_ne!(a.plan_salt, b.plan_salt);
    }

    // -- execution decorators --------------------------------------------

    #[test]
    fn retry_block_plans_with_defaults() {
        let plan = plan_ok("@retry(times=2) {\n  echo x\n}\n", "");
        match &plan.steps[0].tree {
            CommandNode::Decorator { name, args, block } => {
                assert_eq!(name, "retry");
                assert_eq!(block.len(), 1);
                let keys: Vec<&str> = args.iter().map(|a| a.key.as_str()).collect();
                assert_eq!(keys, vec!["times", "delay", "backoff"]);
                assert_eq!(args[0].val, Value::Int(2));
            }
            other => panic!("unexpected node {other:?}"),
        }
        assert_eq!(plan.steps[0].id, 1);
        match &plan.steps[0].tree {
            CommandNode::Decorator { block, .. } => assert_eq!(block[0].id, 2),
            _ => unreachable!(),
        }
    }

    #[test]
    fn block_requirement_enforced() {
        let errs = plan_with_env("@retry(times=2)\n", "", &[]).unwrap_err();
        assert!(errs[0].message.contains("requires a block"));

        let errs = plan_with_env("@log(\"hi\") {\n  echo x\n}\n", "", &[]).unwrap_err();
        assert!(errs[0].message.contains("does not take a block"));
    }

    #[test]
    fn when_pattern_collects_branches() {
        let plan = plan_ok(
            "@when(MODE) {\n  prod: echo production\n  default: echo fallback\n}\n",
            "",
        );
        match &plan.steps[0].tree {
            CommandNode::Pattern { name, branches, .. } => {
                assert_eq!(name, "when");
                let labels: Vec<&String> = branches.keys().collect();
                assert_eq!(labels, vec!["default", "prod"]);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn try_rejects_unknown_branch() {
        let errs =
            plan_with_env("@try {\n  main: echo m\n  sometimes: echo s\n}\n", "", &[])
                .unwrap_err();
        assert!(errs[0].message.contains("no branch `sometimes`"));
    }

    #[test]
    fn duplicate_branch_is_invalid() {
        let errs = plan_with_env(
            "@when(M) {\n  a: echo one\n  a: echo two\n}\n",
            "",
            &[],
        )
        .unwrap_err();
        assert!(errs[0].message.contains("duplicate branch"));
    }

    #[test]
    fn value_decorator_as_statement_is_invalid() {
        let errs = plan_with_env("@env.HOME\n", "", &[("HOME", "/root")]).unwrap_err();
        assert!(errs[0].message.contains("cannot stand alone"));
    }

    // -- scope enforcement -----------------------------------------------

    #[test]
    fn root_only_decorator_fails_inside_transport_block() {
        let errs = plan_with_env(
            "@ssh.connect(host=\"db.internal\") {\n  echo @env.HOME\n}\n",
            "",
            &[("HOME", "/root")],
        )
        .unwrap_err();
        assert_eq!(errs[0].kind, ErrorKind::Invalid);
        assert!(errs[0].message.contains("transport block"));
    }

    #[test]
    fn agnostic_decorator_allowed_inside_transport_block() {
        let plan = plan_with_env(
            "var X = \"ok\"\n@ssh.connect(host=\"db.internal\") {\n  echo @var.X\n}\n",
            "",
            &[],
        )
        .expect("plan");
        assert_eq!(plan.secrets.len(), 1);
    }

    #[test]
    fn scope_restores_after_transport_block() {
        let plan = plan_with_env(
            "@ssh.connect(host=\"h\") {\n  echo remote\n}\necho @env.HOME\n",
            "",
            &[("HOME", "/root")],
        )
        .expect("plan");
        assert_eq!(plan.secrets.len(), 1);
    }

    // -- @cmd inlining ---------------------------------------------------

    #[test]
    fn cmd_inlines_named_function() {
        let plan = plan_ok("fun greet = echo hi\n@cmd(greet)\n", "");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(shell_words(&plan.steps[0]), vec!["echo", "hi"]);
    }

    #[test]
    fn cmd_cycle_is_invalid() {
        let errs = plan_with_env("fun a = echo x\nfun loop { \n  @cmd(loop)\n}\n@cmd(loop)\n", "", &[])
            .unwrap_err();
        assert!(errs[0].message.contains("cycle"));
    }

    #[test]
    fn cmd_unknown_function_is_invalid() {
        let errs = plan_with_env("@cmd(ghost)\n", "", &[]).unwrap_err();
        assert!(errs[0].message.contains("unknown function"));
    }

    // -- invariants ------------------------------------------------------

    #[test]
    fn plans_satisfy_invariants() {
        let plan = plan_ok(
            "var S = \"x\"\n@retry(times=2) {\n  echo @var.S && echo done\n}\necho tail\n",
            "",
        );
        assert!(plan.check_invariants().is_ok());
        assert_eq!(plan.plan_salt, SALT);
    }
}
