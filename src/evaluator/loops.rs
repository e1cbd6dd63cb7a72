//! `while` / `do-while` / `for` (spec §4.3's two-mode loop execution):
//! run concretely while the outcome stays determinable, then fall back to
//! simplifying the ambiguous tail to a fixed point.

use super::Evaluator;
use crate::ast::{equivalent, Node};
use crate::context::{ContextKind, ExecutionContext, Signal};
use crate::env::Environment;
use crate::errors::EvalError;
use crate::errors::EvalResult;

enum LoopOutcome {
    /// The loop ran to completion (test false, or a concrete break/return)
    /// without ever becoming ambiguous. No residual loop node is emitted.
    Resolved,
    /// The loop became ambiguous; `node` is the simplified residual loop.
    Ambiguous(Node),
}

impl Evaluator {
    pub(super) fn eval_loop(&mut self, node: &Node, env: &Environment, label: Option<&str>) -> EvalResult<(Signal, Vec<Node>)> {
        match node {
            Node::WhileStatement { test, body } => self.eval_while(test, body, env, label, false),
            Node::DoWhileStatement { test, body } => self.eval_while(test, body, env, label, true),
            Node::ForStatement { init, test, update, body } => {
                self.eval_for(init.as_deref(), test.as_deref(), update.as_deref(), body, env, label)
            }
            _ => Err(EvalError::internal("eval_loop called on a non-loop node")),
        }
    }

    fn loop_kind(&self, do_while: bool) -> ContextKind {
        if do_while { ContextKind::DoWhile } else { ContextKind::While }
    }

    fn eval_while(
        &mut self,
        test: &Node,
        body: &Node,
        env: &Environment,
        label: Option<&str>,
        do_while: bool,
    ) -> EvalResult<(Signal, Vec<Node>)> {
        let loop_env = Environment::child(env);
        let kind = self.loop_kind(do_while);
        let ctx = match label {
            Some(l) => ExecutionContext::labeled(loop_env.clone(), kind, l),
            None => ExecutionContext::new(loop_env.clone(), kind),
        };
        self.callstack.push(ctx);

        let mut frags = Vec::new();
        let mut exit_signal = Signal::Normal(None);
        let mut outcome = LoopOutcome::Resolved;
        let mut iterations = 0usize;

        'drive: loop {
            if do_while && iterations == 0 {
                // First do-while pass always runs before testing.
            } else {
                let test_carrier = self.eval_expr(test, &loop_env)?;
                if test_carrier.is_tainted() {
                    outcome = LoopOutcome::Ambiguous(self.simplify_loop(test, body, None, &loop_env, do_while)?);
                    break 'drive;
                }
                if !test_carrier.value().unwrap().is_truthy() {
                    break 'drive;
                }
            }

            if loop_env.is_tainted_env(Some(env)) {
                outcome = LoopOutcome::Ambiguous(self.simplify_loop(test, body, None, &loop_env, do_while)?);
                break 'drive;
            }

            iterations += 1;
            if iterations > self.limits.max_loop_iterations {
                return Err(EvalError::not_implemented("loop iteration budget exceeded"));
            }

            let (signal, body_frags) = self.eval_stmt(body, &loop_env)?;
            frags.extend(body_frags);

            match signal {
                Signal::Normal(_) => {}
                Signal::Returning(_) => {
                    exit_signal = signal;
                    break 'drive;
                }
                Signal::Breaking(ref l) if l.is_none() || l.as_deref() == label => {
                    break 'drive;
                }
                Signal::Breaking(_) => {
                    exit_signal = signal;
                    break 'drive;
                }
            }

            if do_while {
                let test_carrier = self.eval_expr(test, &loop_env)?;
                if test_carrier.is_tainted() {
                    outcome = LoopOutcome::Ambiguous(self.simplify_loop(test, body, None, &loop_env, do_while)?);
                    break 'drive;
                }
                if !test_carrier.value().unwrap().is_truthy() {
                    break 'drive;
                }
            }
        }

        self.callstack.pop();

        if let LoopOutcome::Ambiguous(residual) = outcome {
            frags.push(residual);
        }
        Ok((exit_signal, frags))
    }

    fn eval_for(
        &mut self,
        init: Option<&Node>,
        test: Option<&Node>,
        update: Option<&Node>,
        body: &Node,
        env: &Environment,
        label: Option<&str>,
    ) -> EvalResult<(Signal, Vec<Node>)> {
        let mut frags = Vec::new();
        let init_repr = match init {
            Some(init_stmt) => {
                let (_, init_frags) = self.eval_stmt(init_stmt, env)?;
                let repr = init_frags.into_iter().next();
                if let Some(r) = &repr {
                    frags.push(r.clone());
                }
                repr
            }
            None => None,
        };

        let loop_env = Environment::child(env);
        let ctx = match label {
            Some(l) => ExecutionContext::labeled(loop_env.clone(), ContextKind::For, l),
            None => ExecutionContext::new(loop_env.clone(), ContextKind::For),
        };
        self.callstack.push(ctx);

        let mut exit_signal = Signal::Normal(None);
        let mut outcome = LoopOutcome::Resolved;
        let mut iterations = 0usize;

        'drive: loop {
            if let Some(test_expr) = test {
                let test_carrier = self.eval_expr(test_expr, &loop_env)?;
                if test_carrier.is_tainted() {
                    outcome = LoopOutcome::Ambiguous(self.simplify_for(test, body, update, &loop_env)?);
                    break 'drive;
                }
                if !test_carrier.value().unwrap().is_truthy() {
                    break 'drive;
                }
            }

            if loop_env.is_tainted_env(Some(env)) {
                outcome = LoopOutcome::Ambiguous(self.simplify_for(test, body, update, &loop_env)?);
                break 'drive;
            }

            iterations += 1;
            if iterations > self.limits.max_loop_iterations {
                return Err(EvalError::not_implemented("loop iteration budget exceeded"));
            }

            let (signal, body_frags) = self.eval_stmt(body, &loop_env)?;
            frags.extend(body_frags);

            match signal {
                Signal::Normal(_) => {}
                Signal::Returning(_) => {
                    exit_signal = signal;
                    break 'drive;
                }
                Signal::Breaking(ref l) if l.is_none() || l.as_deref() == label => {
                    break 'drive;
                }
                Signal::Breaking(_) => {
                    exit_signal = signal;
                    break 'drive;
                }
            }

            if let Some(update_expr) = update {
                self.eval_expr(update_expr, &loop_env)?;
            }
        }

        self.callstack.pop();
        let _ = init_repr;

        if let LoopOutcome::Ambiguous(residual) = outcome {
            frags.push(residual);
        }
        Ok((exit_signal, frags))
    }

    /// Repeatedly simplifies `test`/`body` against the tainted `loop_env`
    /// until successive passes agree under [`equivalent`] (spec §4.3's
    /// "Tainted simplification" / §9's "Fixed-point simplification"),
    /// clearing the loop's local record between passes so a concrete value
    /// computed on one pass can't poison the next.
    fn simplify_loop(&mut self, test: &Node, body: &Node, _update: Option<&Node>, loop_env: &Environment, do_while: bool) -> EvalResult<Node> {
        loop_env.set_taint_parent_writes(true);
        loop_env.set_ignore_reference_exception(true);

        let mut prev: Option<(Node, Node)> = None;
        let mut passes = 0usize;
        loop {
            passes += 1;
            if passes > self.limits.max_fixed_point_passes {
                return Err(EvalError::not_implemented("fixed-point budget exceeded"));
            }
            loop_env.clear_local();
            let test_carrier = self.eval_expr(test, loop_env)?;
            let test_node = test_carrier.repr(&self.functions)?;
            let (_, body_frags) = self.eval_stmt(body, loop_env)?;
            let body_node = body_frags.into_iter().next().unwrap_or(Node::EmptyStatement);

            if let Some((pt, pb)) = &prev {
                let reached = equivalent(pt, &test_node) && equivalent(pb, &body_node);
                tracing::trace!(target: "unmask::fixedpoint", pass = passes, reached, "while/do-while simplification pass");
                if reached {
                    return Ok(if do_while {
                        Node::DoWhileStatement { test: Box::new(test_node), body: Box::new(body_node) }
                    } else {
                        Node::WhileStatement { test: Box::new(test_node), body: Box::new(body_node) }
                    });
                }
            }
            prev = Some((test_node, body_node));
        }
    }

    fn simplify_for(&mut self, test: Option<&Node>, body: &Node, update: Option<&Node>, loop_env: &Environment) -> EvalResult<Node> {
        loop_env.set_taint_parent_writes(true);
        loop_env.set_ignore_reference_exception(true);

        let mut prev: Option<(Option<Node>, Node, Option<Node>)> = None;
        let mut passes = 0usize;
        loop {
            passes += 1;
            if passes > self.limits.max_fixed_point_passes {
                return Err(EvalError::not_implemented("fixed-point budget exceeded"));
            }
            loop_env.clear_local();
            let test_node = match test {
                Some(t) => Some(self.eval_expr(t, loop_env)?.repr(&self.functions)?),
                None => None,
            };
            let (_, body_frags) = self.eval_stmt(body, loop_env)?;
            let body_node = body_frags.into_iter().next().unwrap_or(Node::EmptyStatement);
            let update_node = match update {
                Some(u) => Some(self.eval_expr(u, loop_env)?.repr(&self.functions)?),
                None => None,
            };

            if let Some((pt, pb, pu)) = &prev {
                let test_eq = match (pt, &test_node) {
                    (Some(a), Some(b)) => equivalent(a, b),
                    (None, None) => true,
                    _ => false,
                };
                let update_eq = match (pu, &update_node) {
                    (Some(a), Some(b)) => equivalent(a, b),
                    (None, None) => true,
                    _ => false,
                };
                let reached = test_eq && update_eq && equivalent(pb, &body_node);
                tracing::trace!(target: "unmask::fixedpoint", pass = passes, reached, "for-loop simplification pass");
                if reached {
                    return Ok(Node::ForStatement {
                        init: None,
                        test: test_node.map(Box::new),
                        update: update_node.map(Box::new),
                        body: Box::new(body_node),
                    });
                }
            }
            prev = Some((test_node, body_node, update_node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;
    use crate::config::LimitsConfig;

    /// spec §8 scenario 4: `while (tainted) { x = 1; }` stays a residual
    /// `while` whose body is idempotent under a second simplification pass.
    #[test]
    fn tainted_while_reaches_fixed_point() {
        let mut ev = Evaluator::new(LimitsConfig::default());
        let env = Environment::root();
        env.set_ignore_reference_exception(true);
        let _ = env.resolve("tainted"); // declares it as a tainted reference

        let stmt = Node::WhileStatement {
            test: Box::new(ident("tainted")),
            body: Box::new(block(vec![expr_stmt(assign("=", ident("x"), num(1.0)))])),
        };
        let (_, frags) = ev.eval_stmt(&stmt, &env).unwrap();
        assert_eq!(frags.len(), 1);
        assert!(matches!(&frags[0], Node::WhileStatement { .. }));
    }

    #[test]
    fn concrete_loop_fully_resolves_with_no_residual_node() {
        let mut ev = Evaluator::new(LimitsConfig::default());
        let env = Environment::root();
        env.declare("i");
        env.assign("i", crate::value::Carrier::concrete(crate::value::Value::Number(0.0))).unwrap();

        let stmt = Node::WhileStatement {
            test: Box::new(bin(ident("i"), "<", num(3.0))),
            body: Box::new(block(vec![expr_stmt(update("++", ident("i"), false))])),
        };
        let (signal, frags) = ev.eval_stmt(&stmt, &env).unwrap();
        assert!(signal.is_normal());
        assert!(frags.iter().all(|n| !matches!(n, Node::WhileStatement { .. })));
    }
}
