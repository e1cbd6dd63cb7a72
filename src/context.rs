//! Execution contexts and the callstack (spec §3, §4.3). Non-local control
//! flow (`return`, `break`, labeled `break`) is modeled as an explicit
//! result discriminant threaded back through every statement evaluator,
//! rather than as a Rust-level panic or exception (spec §9's redesign
//! note) — this keeps termination bounds and try/finally interposition
//! simple to reason about.

use crate::env::Environment;
use crate::value::Carrier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Program,
    Block,
    If,
    Conditional,
    While,
    DoWhile,
    For,
    Function,
    Label,
    Try,
    Catch,
    Finally,
}

/// One entry on the [`Callstack`]: the scope active while evaluating a
/// construct, its kind (for boundary lookups), and its label when it is a
/// `LabeledStatement` or a loop directly wrapped by one.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub environment: Environment,
    pub kind: ContextKind,
    pub label: Option<String>,
}

impl ExecutionContext {
    pub fn new(environment: Environment, kind: ContextKind) -> Self {
        ExecutionContext { environment, kind, label: None }
    }

    pub fn labeled(environment: Environment, kind: ContextKind, label: impl Into<String>) -> Self {
        ExecutionContext { environment, kind, label: Some(label.into()) }
    }
}

/// A stack of active execution contexts, innermost last.
#[derive(Debug, Default)]
pub struct Callstack {
    frames: Vec<ExecutionContext>,
}

impl Callstack {
    pub fn new() -> Self {
        Callstack { frames: Vec::new() }
    }

    pub fn push(&mut self, ctx: ExecutionContext) {
        tracing::trace!(target: "unmask::context", kind = ?ctx.kind, label = ?ctx.label, depth = self.frames.len() + 1, "push context");
        self.frames.push(ctx);
    }

    pub fn pop(&mut self) -> Option<ExecutionContext> {
        let popped = self.frames.pop();
        if let Some(ctx) = &popped {
            tracing::trace!(target: "unmask::context", kind = ?ctx.kind, label = ?ctx.label, depth = self.frames.len(), "pop context");
        }
        popped
    }

    pub fn current(&self) -> Option<&ExecutionContext> {
        self.frames.last()
    }

    /// Number of `Function` frames on the stack — the call depth the
    /// evaluator's `max_call_depth` bound measures against.
    pub fn call_depth(&self) -> usize {
        self.frames.iter().filter(|c| c.kind == ContextKind::Function).count()
    }

    /// Frames from the top of the stack down to the bottom.
    pub fn iter_rev(&self) -> impl Iterator<Item = &ExecutionContext> {
        self.frames.iter().rev()
    }

    /// True if a label matching `label` sits between the top of the stack
    /// and the nearest enclosing `Function` frame (exclusive) — a labeled
    /// `break` never crosses a function boundary.
    pub fn has_label_in_current_function(&self, label: &str) -> bool {
        for ctx in self.frames.iter().rev() {
            if ctx.kind == ContextKind::Function {
                break;
            }
            if ctx.label.as_deref() == Some(label) {
                return true;
            }
        }
        false
    }
}

/// How a statement or statement list completed (spec §9).
#[derive(Debug, Clone)]
pub enum Signal {
    /// Ran to completion, carrying the last expression-statement's value
    /// for completion-value bookkeeping at the program level.
    Normal(Option<Carrier>),
    /// A `return`, propagating up to the nearest `Function` frame.
    Returning(Carrier),
    /// A `break`, optionally labeled, propagating up to the nearest
    /// matching loop or labeled statement.
    Breaking(Option<String>),
}

impl Signal {
    pub fn is_normal(&self) -> bool {
        matches!(self, Signal::Normal(_))
    }

    /// The normal-completion carrier, if any — used when a construct wants
    /// to fold a sub-statement's completion value into its own.
    pub fn completion(&self) -> Option<&Carrier> {
        match self {
            Signal::Normal(c) => c.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_lookup_stops_at_function_boundary() {
        let env = Environment::root();
        let mut stack = Callstack::new();
        stack.push(ExecutionContext::labeled(env.clone(), ContextKind::Label, "outer"));
        stack.push(ExecutionContext::new(env.clone(), ContextKind::Function));
        assert!(!stack.has_label_in_current_function("outer"));
    }

    #[test]
    fn label_lookup_finds_enclosing_label() {
        let env = Environment::root();
        let mut stack = Callstack::new();
        stack.push(ExecutionContext::labeled(env.clone(), ContextKind::Label, "outer"));
        stack.push(ExecutionContext::new(env.clone(), ContextKind::While));
        assert!(stack.has_label_in_current_function("outer"));
    }

    #[test]
    fn call_depth_counts_only_function_frames() {
        let env = Environment::root();
        let mut stack = Callstack::new();
        stack.push(ExecutionContext::new(env.clone(), ContextKind::Program));
        stack.push(ExecutionContext::new(env.clone(), ContextKind::Function));
        stack.push(ExecutionContext::new(env.clone(), ContextKind::While));
        stack.push(ExecutionContext::new(env.clone(), ContextKind::Function));
        assert_eq!(stack.call_depth(), 2);
    }
}
