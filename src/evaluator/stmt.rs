//! Statement dispatch arms: variable declarations, `if`, `return`,
//! `break`, labeled statements, and `try`/`catch`/`finally` (spec §4.3).

use super::Evaluator;
use crate::ast::{DeclKind, Node};
use crate::context::{ContextKind, ExecutionContext, Signal};
use crate::env::Environment;
use crate::errors::{EvalError, EvalResult};
use crate::value::Carrier;

impl Evaluator {
    pub(super) fn eval_var_decl(
        &mut self,
        kind: DeclKind,
        declarations: &[Node],
        env: &Environment,
    ) -> EvalResult<(Signal, Vec<Node>)> {
        if !kind.is_function_scoped() {
            return Err(EvalError::not_implemented("block-scoped variable declaration"));
        }
        let mut decl_frags = Vec::with_capacity(declarations.len());
        for decl in declarations {
            let Node::VariableDeclarator { id, init } = decl else {
                return Err(EvalError::internal("declarator list contains a non-declarator node"));
            };
            let name = id
                .as_identifier_name()
                .ok_or_else(|| EvalError::not_implemented("destructuring declarator target"))?;
            env.declare(name);

            let init_repr = match init {
                None => None,
                Some(init_expr) => {
                    let carrier = self.eval_expr(init_expr, env)?;
                    let repr = carrier.repr(&self.functions)?;
                    env.assign(name, carrier)?;
                    Some(repr)
                }
            };
            decl_frags.push(Node::VariableDeclarator {
                id: Box::new(Node::identifier(name)),
                init: init_repr.map(Box::new),
            });
        }
        Ok((
            Signal::Normal(None),
            vec![Node::VariableDeclaration { kind, declarations: decl_frags }],
        ))
    }

    pub(super) fn eval_if(
        &mut self,
        test: &Node,
        consequent: &Node,
        alternate: Option<&Node>,
        env: &Environment,
    ) -> EvalResult<(Signal, Vec<Node>)> {
        self.callstack.push(ExecutionContext::new(env.clone(), ContextKind::If));
        let result = self.eval_if_inner(test, consequent, alternate, env);
        self.callstack.pop();
        result
    }

    fn eval_if_inner(
        &mut self,
        test: &Node,
        consequent: &Node,
        alternate: Option<&Node>,
        env: &Environment,
    ) -> EvalResult<(Signal, Vec<Node>)> {
        let test_carrier = self.eval_expr(test, env)?;

        if !test_carrier.is_tainted() {
            return if test_carrier.value().unwrap().is_truthy() {
                self.eval_stmt(consequent, env)
            } else if let Some(alt) = alternate {
                self.eval_stmt(alt, env)
            } else {
                Ok((Signal::Normal(None), vec![]))
            };
        }

        let cons_env = Environment::child(env);
        cons_env.set_taint_parent_writes(true);
        let (cons_signal, cons_frags) = self.eval_stmt(consequent, &cons_env)?;

        let (alt_signal, alt_frag) = match alternate {
            None => (Signal::Normal(None), None),
            Some(alt) => {
                let alt_env = Environment::child(env);
                alt_env.set_taint_parent_writes(true);
                let (sig, frags) = self.eval_stmt(alt, &alt_env)?;
                (sig, frags.into_iter().next())
            }
        };

        let test_repr = test_carrier.repr(&self.functions)?;
        let node = Node::IfStatement {
            test: Box::new(test_repr),
            consequent: Box::new(cons_frags.into_iter().next().unwrap_or(Node::EmptyStatement)),
            alternate: alt_frag.map(Box::new),
        };

        let signal = if cons_signal.is_normal() && alt_signal.is_normal() {
            Signal::Normal(None)
        } else {
            // Ambiguity means either branch may or may not have run; a
            // non-local exit from either side only takes effect if that
            // branch actually ran, which we cannot know, so evaluation of
            // the enclosing statement list must continue (see DESIGN.md).
            Signal::Normal(None)
        };
        Ok((signal, vec![node]))
    }

    pub(super) fn eval_return(&mut self, argument: Option<&Node>, env: &Environment) -> EvalResult<(Signal, Vec<Node>)> {
        let carrier = match argument {
            Some(expr) => self.eval_expr(expr, env)?,
            None => Carrier::concrete(crate::value::Value::Undefined),
        };

        let fn_env = self
            .nearest_function_env()
            .ok_or_else(|| EvalError::internal("return statement outside a function context"))?;

        let ambiguous = env.is_tainted_env(Some(&fn_env));
        let repr = carrier.repr(&self.functions)?;
        let node = Node::ReturnStatement { argument: Some(Box::new(repr)) };

        if ambiguous {
            fn_env.set_taint_parent_writes(true);
            Ok((Signal::Normal(None), vec![node]))
        } else {
            Ok((Signal::Returning(carrier), vec![node]))
        }
    }

    /// The environment of the innermost `Function` frame on the callstack.
    pub(super) fn nearest_function_env(&self) -> Option<Environment> {
        self.callstack_frames_rev().find_map(|ctx| {
            if ctx.kind == ContextKind::Function {
                Some(ctx.environment.clone())
            } else {
                None
            }
        })
    }

    pub(super) fn eval_break(&mut self, label: Option<&str>, env: &Environment) -> EvalResult<(Signal, Vec<Node>)> {
        let target_env = self
            .callstack_frames_rev()
            .find(|ctx| match label {
                Some(lbl) => ctx.label.as_deref() == Some(lbl),
                None => matches!(ctx.kind, ContextKind::While | ContextKind::DoWhile | ContextKind::For),
            })
            .map(|ctx| ctx.environment.clone())
            .ok_or_else(|| EvalError::reference_unresolved(label.unwrap_or("<nearest loop>")))?;

        let node = Node::BreakStatement { label: label.map(str::to_string) };
        if env.is_tainted_env(Some(&target_env)) {
            target_env.set_taint_parent_writes(true);
            Ok((Signal::Normal(None), vec![node]))
        } else {
            Ok((Signal::Breaking(label.map(str::to_string)), vec![node]))
        }
    }

    pub(super) fn eval_labeled(&mut self, label: &str, body: &Node, env: &Environment) -> EvalResult<(Signal, Vec<Node>)> {
        let is_loop = matches!(
            body,
            Node::WhileStatement { .. } | Node::DoWhileStatement { .. } | Node::ForStatement { .. }
        );

        let (signal, frags) = if is_loop {
            self.eval_loop(body, env, Some(label))?
        } else {
            self.callstack.push(ExecutionContext::labeled(env.clone(), ContextKind::Label, label));
            let result = self.eval_stmt(body, env);
            self.callstack.pop();
            result?
        };

        let signal = match signal {
            Signal::Breaking(Some(ref l)) if l == label => Signal::Normal(None),
            other => other,
        };
        let inner = frags.into_iter().next().unwrap_or(Node::EmptyStatement);
        Ok((signal, vec![Node::LabeledStatement { label: label.to_string(), body: Box::new(inner) }]))
    }

    pub(super) fn eval_try(
        &mut self,
        block: &Node,
        handler: Option<&Node>,
        finalizer: Option<&Node>,
        env: &Environment,
    ) -> EvalResult<(Signal, Vec<Node>)> {
        let Node::BlockStatement { body: try_body } = block else {
            return Err(EvalError::internal("try block is not a BlockStatement"));
        };

        self.callstack.push(ExecutionContext::new(env.clone(), ContextKind::Try));
        let try_result = self.eval_stmt_list(try_body, env);
        self.callstack.pop();

        let (try_signal, try_frags, thrown) = match try_result {
            Ok((signal, frags)) => (signal, frags, None),
            Err(err) if err.is_user_catchable() || matches!(err, EvalError::Thrown(_)) => {
                let prefix = self.error_state.take().unwrap_or_default();
                (Signal::Normal(None), prefix, Some(err))
            }
            Err(err) => return Err(err),
        };

        let try_node = Node::BlockStatement { body: try_frags };

        let (catch_signal, catch_node) = match (handler, &thrown) {
            (None, _) => (Signal::Normal(None), None),
            (Some(Node::CatchClause { param, body }), None) => {
                // No exception: the catch body is simplified as-if-never-
                // executed, with its error parameter bound tainted.
                let sandbox = Environment::child(env);
                sandbox.set_taint_parent_writes(true);
                sandbox.set_ignore_reference_exception(true);
                if let Some(p) = param {
                    if let Some(pname) = p.as_identifier_name() {
                        sandbox.declare(pname);
                        sandbox.assign(pname, Carrier::tainted_ref(pname))?;
                    }
                }
                self.callstack.push(ExecutionContext::new(sandbox.clone(), ContextKind::Catch));
                let (_, frags) = self.eval_stmt(body, &sandbox)?;
                self.callstack.pop();
                (Signal::Normal(None), frags.into_iter().next())
            }
            (Some(Node::CatchClause { param, body }), Some(EvalError::Thrown(carrier))) => {
                let catch_env = Environment::child(env);
                if let Some(p) = param {
                    if let Some(pname) = p.as_identifier_name() {
                        catch_env.declare(pname);
                        catch_env.assign(pname, (**carrier).clone())?;
                    }
                }
                self.callstack.push(ExecutionContext::new(catch_env.clone(), ContextKind::Catch));
                let result = self.eval_stmt(body, &catch_env);
                self.callstack.pop();
                let (signal, frags) = result?;
                (signal, frags.into_iter().next())
            }
            (Some(Node::CatchClause { param, body }), Some(_)) => {
                // NotImplemented / ReferenceUnresolved raised from the try
                // body, without a concrete thrown carrier: the catch runs
                // concretely with an opaque, tainted error value.
                let catch_env = Environment::child(env);
                if let Some(p) = param {
                    if let Some(pname) = p.as_identifier_name() {
                        catch_env.declare(pname);
                        catch_env.assign(pname, Carrier::tainted_ref(pname))?;
                    }
                }
                self.callstack.push(ExecutionContext::new(catch_env.clone(), ContextKind::Catch));
                let result = self.eval_stmt(body, &catch_env);
                self.callstack.pop();
                let (signal, frags) = result?;
                (signal, frags.into_iter().next())
            }
            (Some(_), _) => return Err(EvalError::internal("try handler is not a CatchClause")),
        };

        let mut finalizer_frag = None;
        if let Some(fin) = finalizer {
            let (_, frags) = self.eval_stmt(fin, env)?;
            finalizer_frag = frags.into_iter().next();
        }

        if thrown.is_some() && handler.is_none() {
            // No handler to absorb it: re-raise after running the finalizer.
            return Err(thrown.unwrap());
        }

        let node = Node::TryStatement {
            block: Box::new(try_node),
            handler: catch_node.map(|body| {
                Box::new(Node::CatchClause {
                    param: match handler {
                        Some(Node::CatchClause { param, .. }) => param.clone(),
                        _ => None,
                    },
                    body: Box::new(body),
                })
            }),
            finalizer: finalizer_frag.map(Box::new),
        };

        let final_signal = if thrown.is_some() { catch_signal } else { try_signal };
        Ok((final_signal, vec![node]))
    }
}
