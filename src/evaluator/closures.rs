//! Function expressions/declarations and calls (spec §4.3, §4.4). A closure
//! is built once at definition time: its body is simplified eagerly in an
//! isolated, parentless sandbox with every parameter bound as a tainted
//! reference, producing the node `Value::Fn` lifts to if it is ever handed
//! back out untouched (spec §9's redesign note on `FunctionId`).

use super::function::{FunctionDef, FunctionId};
use super::Evaluator;
use crate::ast::Node;
use crate::context::{ContextKind, ExecutionContext, Signal};
use crate::env::Environment;
use crate::errors::{EvalError, EvalResult};
use crate::value::{Carrier, Value};

impl Evaluator {
    pub(super) fn eval_function_expr(
        &mut self,
        id: Option<&Node>,
        params: &[Node],
        body: &Node,
        generator: bool,
        is_async: bool,
        rest: bool,
        env: &Environment,
    ) -> EvalResult<Carrier> {
        if generator {
            return Err(EvalError::not_implemented("generator function"));
        }
        if is_async {
            return Err(EvalError::not_implemented("async function"));
        }
        for p in params {
            if p.as_identifier_name().is_none() {
                return Err(EvalError::not_implemented("destructuring function parameter"));
            }
        }

        let name = id.and_then(Node::as_identifier_name).map(str::to_string);
        let simplified_body = self.simplify_closure_body(params, body)?;
        let residual = Node::FunctionExpression {
            id: id.map(|n| Box::new(n.clone())),
            params: params.to_vec(),
            body: Box::new(simplified_body),
            generator: false,
            is_async: false,
            rest,
        };
        let fn_id = self.functions.register(FunctionDef {
            name,
            params: params.to_vec(),
            rest,
            body: body.clone(),
            closure: env.clone(),
            residual,
        });
        Ok(Carrier::concrete(Value::Fn(fn_id)))
    }

    pub(super) fn eval_function_decl(
        &mut self,
        id: Option<&Node>,
        params: &[Node],
        body: &Node,
        generator: bool,
        is_async: bool,
        rest: bool,
        env: &Environment,
    ) -> EvalResult<(Signal, Vec<Node>)> {
        let name = id
            .and_then(Node::as_identifier_name)
            .ok_or_else(|| EvalError::not_implemented("anonymous function declaration"))?;

        let carrier = self.eval_function_expr(id, params, body, generator, is_async, rest, env)?;
        let fn_id = match carrier.value() {
            Some(Value::Fn(fid)) => *fid,
            _ => return Err(EvalError::internal("function declaration did not produce a function value")),
        };
        env.declare(name);
        env.assign(name, carrier)?;

        let def = self.functions.get(fn_id)?;
        let (simplified_params, simplified_body) = match &def.residual {
            Node::FunctionExpression { params, body, .. } => (params.clone(), (**body).clone()),
            _ => return Err(EvalError::internal("function residual is not a function expression")),
        };
        let node = Node::FunctionDeclaration {
            id: Some(Box::new(Node::identifier(name))),
            params: simplified_params,
            body: Box::new(simplified_body),
            generator: false,
            is_async: false,
            rest,
        };
        Ok((Signal::Normal(None), vec![node]))
    }

    /// Simplifies a function body once, outside any call, so a later
    /// reference to the function value itself (not a call of it) has
    /// something to lift back to. Parameters are bound as tainted
    /// references and the sandbox has no parent chain, matching the
    /// "hoisting/closures are not modeled across calls" resolution.
    fn simplify_closure_body(&mut self, params: &[Node], body: &Node) -> EvalResult<Node> {
        let sandbox = Environment::root();
        sandbox.set_ignore_reference_exception(true);
        for p in params {
            let pname = p
                .as_identifier_name()
                .ok_or_else(|| EvalError::not_implemented("destructuring function parameter"))?;
            sandbox.declare(pname);
            sandbox.assign(pname, Carrier::tainted_ref(pname))?;
        }
        sandbox.declare("arguments");
        sandbox.assign("arguments", Carrier::tainted_ref("arguments"))?;

        self.callstack.push(ExecutionContext::new(sandbox.clone(), ContextKind::Function));
        let result = self.eval_stmt(body, &sandbox);
        self.callstack.pop();
        let (_, frags) = result?;
        Ok(frags.into_iter().next().unwrap_or(Node::EmptyStatement))
    }

    pub(super) fn eval_call(&mut self, callee: &Node, arguments: &[Node], env: &Environment) -> EvalResult<Carrier> {
        let callee_carrier = self.eval_expr(callee, env)?;

        if callee_carrier.is_tainted() {
            let callee_repr = callee_carrier.repr(&self.functions)?;
            let mut arg_reprs = Vec::with_capacity(arguments.len());
            for a in arguments {
                let c = self.eval_expr(a, env)?;
                arg_reprs.push(c.repr(&self.functions)?);
            }
            let node = Node::CallExpression { callee: Box::new(callee_repr), arguments: arg_reprs };
            return Ok(Carrier::residual(node, true));
        }

        let fn_id = match callee_carrier.value() {
            Some(Value::Fn(id)) => *id,
            _ => return Err(EvalError::not_implemented("call of a non-function value")),
        };

        if self.callstack.call_depth() >= self.limits.max_call_depth {
            return Err(EvalError::not_implemented("call depth budget exceeded"));
        }

        let mut args = Vec::with_capacity(arguments.len());
        let mut arg_reprs = Vec::with_capacity(arguments.len());
        for a in arguments {
            let c = self.eval_expr(a, env)?;
            arg_reprs.push(c.repr(&self.functions)?);
            args.push(c);
        }
        let callee_repr = callee_carrier.repr(&self.functions)?;
        let call_node = Node::CallExpression { callee: Box::new(callee_repr), arguments: arg_reprs };

        let result = self.invoke(fn_id, args)?;

        if result.is_tainted() {
            Ok(Carrier::residual(call_node, true))
        } else {
            let value = result
                .into_value()
                .ok_or_else(|| EvalError::internal("untainted call result carries no value"))?;
            let value_node = crate::value::lift(&value, &self.functions)?;
            let seq = Node::SequenceExpression { expressions: vec![call_node, value_node] };
            Ok(Carrier::concrete(value).with_node(seq))
        }
    }

    /// Invokes a registered closure against already-evaluated arguments
    /// (spec §4.4). Pushes a fresh `Function` context as a child of the
    /// closure's captured environment, not the call site's — JS closures
    /// capture lexical scope, not dynamic.
    pub(super) fn invoke(&mut self, id: FunctionId, args: Vec<Carrier>) -> EvalResult<Carrier> {
        if self.callstack.call_depth() >= self.limits.max_call_depth {
            return Err(EvalError::not_implemented("call depth budget exceeded"));
        }

        let def = self.functions.get(id)?;
        let params = def.params.clone();
        let rest = def.rest;
        let body = def.body.clone();
        let closure = def.closure.clone();

        let call_env = Environment::child(&closure);
        let fixed = if rest { params.len().saturating_sub(1) } else { params.len() };
        for (i, p) in params.iter().enumerate() {
            let pname = p
                .as_identifier_name()
                .ok_or_else(|| EvalError::internal("non-identifier function parameter"))?;
            call_env.declare(pname);
            if rest && i == fixed {
                let rest_args: Vec<Carrier> = args.get(fixed..).map(<[_]>::to_vec).unwrap_or_default();
                call_env.assign(pname, Carrier::concrete(Value::array(rest_args)))?;
            } else {
                let arg = args.get(i).cloned().unwrap_or_else(Carrier::undefined);
                call_env.assign(pname, arg)?;
            }
        }
        call_env.declare("arguments");
        call_env.assign("arguments", Carrier::concrete(Value::array(args)))?;

        self.callstack.push(ExecutionContext::new(call_env.clone(), ContextKind::Function));
        let result = self.eval_stmt(&body, &call_env);
        self.callstack.pop();
        let (signal, _frags) = result?;

        let mut carrier = match signal {
            Signal::Returning(c) => c,
            Signal::Normal(_) => Carrier::undefined(),
            Signal::Breaking(_) => return Err(EvalError::internal("break escaped a function body")),
        };
        if !carrier.is_tainted() && call_env.is_tainted_env(None) {
            carrier = carrier.with_taint(true);
        }
        Ok(carrier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;
    use crate::config::LimitsConfig;

    #[test]
    fn calling_a_function_substitutes_its_concrete_return_value() {
        let mut ev = Evaluator::new(LimitsConfig::default());
        let env = Environment::root();
        let decl = func_decl("add", vec!["a", "b"], block(vec![ret(Some(bin(ident("a"), "+", ident("b"))))]));
        ev.eval_stmt(&decl, &env).unwrap();

        let call_expr = call(ident("add"), vec![num(1.0), num(2.0)]);
        let carrier = ev.eval_expr(&call_expr, &env).unwrap();
        assert!(!carrier.is_tainted());
        assert!(matches!(carrier.value(), Some(Value::Number(n)) if *n == 3.0));
    }

    #[test]
    fn tainted_argument_keeps_the_returned_carrier_tainted() {
        let mut ev = Evaluator::new(LimitsConfig::default());
        let env = Environment::root();
        let decl = func_decl("identity", vec!["x"], block(vec![ret(Some(ident("x")))]));
        ev.eval_stmt(&decl, &env).unwrap();

        env.set_ignore_reference_exception(true);
        let _ = env.resolve("mystery");

        let call_expr = call(ident("identity"), vec![ident("mystery")]);
        let carrier = ev.eval_expr(&call_expr, &env).unwrap();
        assert!(carrier.is_tainted());
    }

    #[test]
    fn destructuring_parameter_is_rejected() {
        let mut ev = Evaluator::new(LimitsConfig::default());
        let env = Environment::root();
        let expr = Node::FunctionExpression {
            id: None,
            params: vec![Node::ArrayExpression { elements: vec![] }],
            body: Box::new(block(vec![])),
            generator: false,
            is_async: false,
            rest: false,
        };
        let err = ev.eval_expr(&expr, &env).unwrap_err();
        assert!(matches!(err, EvalError::NotImplemented { .. }));
    }

    #[test]
    fn tainted_callee_produces_a_residual_call_without_invoking_anything() {
        let mut ev = Evaluator::new(LimitsConfig::default());
        let env = Environment::root();
        env.set_ignore_reference_exception(true);
        let _ = env.resolve("unknownFn");

        let call_expr = call(ident("unknownFn"), vec![num(1.0)]);
        let carrier = ev.eval_expr(&call_expr, &env).unwrap();
        assert!(carrier.is_tainted());
        assert!(matches!(carrier.node_ref(), Some(Node::CallExpression { .. })));
    }
}
