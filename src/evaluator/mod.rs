//! The recursive partial evaluator (spec §2, §4.3): one dispatch arm per
//! tree shape, folding every statically determinable value and rewriting
//! everything else into a minimal residual form.

pub mod function;
mod closures;
mod expr;
mod loops;
mod operators;
mod stmt;

use crate::ast::Node;
use crate::config::LimitsConfig;
use crate::context::{Callstack, ContextKind, ExecutionContext, Signal};
use crate::env::Environment;
use crate::errors::{EvalError, EvalResult};
use crate::value::Carrier;
use function::FunctionRegistry;

/// Owns the function arena, the callstack, and the configured termination
/// bounds (SPEC_FULL.md §4.5) for one top-level evaluation.
pub struct Evaluator {
    pub(crate) functions: FunctionRegistry,
    pub(crate) callstack: Callstack,
    pub(crate) limits: LimitsConfig,
    /// The residual prefix plus faulting statement recorded by a failing
    /// block, consumed by the nearest enclosing `try` (spec §4.3's "Block
    /// statement" / §7's recovery policy). `None` once consumed.
    pub(crate) error_state: Option<Vec<Node>>,
}

impl Evaluator {
    pub fn new(limits: LimitsConfig) -> Self {
        Evaluator {
            functions: FunctionRegistry::new(),
            callstack: Callstack::new(),
            limits,
            error_state: None,
        }
    }

    /// Runs a `Program` node to completion, returning the residual
    /// top-level statement list (the surrounding `Program` wrapper is
    /// synthesized externally, per spec §3).
    pub fn run(&mut self, program: &Node) -> EvalResult<Vec<Node>> {
        let Node::Program { body } = program else {
            return Err(EvalError::internal("Evaluator::run expects a Program node"));
        };
        let root = Environment::root();
        self.callstack.push(ExecutionContext::new(root.clone(), ContextKind::Program));
        let result = self.eval_stmt_list(body, &root);
        self.callstack.pop();
        let (signal, frags) = result?;
        if !signal.is_normal() {
            return Err(EvalError::internal("control flow escaped the top-level program"));
        }
        Ok(frags)
    }

    /// Evaluates an expression node to a carrier (spec §4.3's dispatch
    /// contract, expression arms).
    pub(crate) fn eval_expr(&mut self, node: &Node, env: &Environment) -> EvalResult<Carrier> {
        match node {
            Node::Identifier { name } if name == "undefined" => {
                Ok(Carrier::concrete(crate::value::Value::Undefined))
            }
            Node::Identifier { name } => env.resolve(name),
            Node::StringLiteral { value } => Ok(Carrier::concrete(crate::value::Value::Str(value.clone()))),
            Node::NumericLiteral { value } => Ok(Carrier::concrete(crate::value::Value::Number(*value))),
            Node::BooleanLiteral { value } => Ok(Carrier::concrete(crate::value::Value::Bool(*value))),
            Node::NullLiteral => Ok(Carrier::concrete(crate::value::Value::Null)),
            Node::RegExpLiteral { pattern, flags } => Ok(Carrier::concrete(crate::value::Value::Regex {
                pattern: pattern.clone(),
                flags: flags.clone(),
            })),
            Node::BigIntLiteral { value } => {
                let b: num_bigint::BigInt = value
                    .parse()
                    .map_err(|_| EvalError::internal("malformed bigint literal"))?;
                Ok(Carrier::concrete(crate::value::Value::BigInt(b)))
            }
            Node::BinaryExpression { left, operator, right } => self.eval_binary(left, operator, right, env),
            Node::LogicalExpression { left, operator, right } => self.eval_logical(left, operator, right, env),
            Node::UnaryExpression { operator, argument, prefix } => {
                self.eval_unary(operator, argument, *prefix, env)
            }
            Node::UpdateExpression { operator, argument, prefix } => {
                self.eval_update(operator, argument, *prefix, env)
            }
            Node::SequenceExpression { expressions } => self.eval_sequence(expressions, env),
            Node::AssignmentExpression { operator, left, right } => {
                self.eval_assignment(operator, left, right, env)
            }
            Node::MemberExpression { object, property, computed } => {
                self.eval_member(object, property, *computed, false, env)
            }
            Node::OptionalMemberExpression { object, property, computed } => {
                self.eval_member(object, property, *computed, true, env)
            }
            Node::ConditionalExpression { test, consequent, alternate } => {
                self.eval_conditional(test, consequent, alternate, env)
            }
            Node::ArrayExpression { elements } => self.eval_array(elements, env),
            Node::CallExpression { callee, arguments } => self.eval_call(callee, arguments, env),
            Node::FunctionExpression { id, params, body, generator, is_async, rest } => {
                self.eval_function_expr(id.as_deref(), params, body, *generator, *is_async, *rest, env)
            }
            other => Err(EvalError::not_implemented(format!("expression node `{other:?}`"))),
        }
    }

    /// Evaluates a statement node, returning its control-flow signal and
    /// its residual fragment(s) (normally exactly one node; a declaration
    /// with no observable effect may still emit for fidelity).
    pub(crate) fn eval_stmt(&mut self, node: &Node, env: &Environment) -> EvalResult<(Signal, Vec<Node>)> {
        match node {
            Node::ExpressionStatement { expression } => {
                let carrier = self.eval_expr(expression, env)?;
                let repr = carrier.repr(&self.functions)?;
                Ok((
                    Signal::Normal(Some(carrier)),
                    vec![Node::ExpressionStatement { expression: Box::new(repr) }],
                ))
            }
            Node::EmptyStatement => Ok((Signal::Normal(None), vec![Node::EmptyStatement])),
            Node::BlockStatement { body } => self.eval_block(body, env),
            Node::VariableDeclaration { kind, declarations } => {
                self.eval_var_decl(*kind, declarations, env)
            }
            Node::IfStatement { test, consequent, alternate } => {
                self.eval_if(test, consequent, alternate.as_deref(), env)
            }
            Node::WhileStatement { .. } | Node::DoWhileStatement { .. } | Node::ForStatement { .. } => {
                self.eval_loop(node, env, None)
            }
            Node::ReturnStatement { argument } => self.eval_return(argument.as_deref(), env),
            Node::BreakStatement { label } => self.eval_break(label.as_deref(), env),
            Node::LabeledStatement { label, body } => self.eval_labeled(label, body, env),
            Node::TryStatement { block, handler, finalizer } => {
                self.eval_try(block, handler.as_deref(), finalizer.as_deref(), env)
            }
            Node::FunctionDeclaration { id, params, body, generator, is_async, rest } => {
                self.eval_function_decl(id.as_deref(), params, body, *generator, *is_async, *rest, env)
            }
            other => Err(EvalError::not_implemented(format!("statement node `{other:?}`"))),
        }
    }

    /// Evaluates a statement sequence, threading the control signal and
    /// accumulating residual fragments — the shared core of `Program` and
    /// `BlockStatement` (spec §4.3's "Block statement"). On failure,
    /// records `error_state` as the already-collected prefix plus the
    /// faulting original statement, then re-raises (spec §7).
    pub(crate) fn eval_stmt_list(&mut self, body: &[Node], env: &Environment) -> EvalResult<(Signal, Vec<Node>)> {
        let mut frags = Vec::new();
        let mut last_value = None;
        for stmt in body {
            match self.eval_stmt(stmt, env) {
                Ok((signal, stmt_frags)) => {
                    frags.extend(stmt_frags);
                    if let Some(v) = signal.completion() {
                        last_value = Some(v.clone());
                    }
                    if !signal.is_normal() {
                        return Ok((signal, frags));
                    }
                }
                Err(err) => {
                    let mut partial = frags;
                    partial.push(stmt.clone());
                    self.error_state = Some(partial);
                    return Err(err);
                }
            }
        }
        Ok((Signal::Normal(last_value), frags))
    }

    pub(crate) fn callstack_frames_rev(&self) -> impl Iterator<Item = &ExecutionContext> {
        self.callstack.iter_rev()
    }

    fn eval_block(&mut self, body: &[Node], env: &Environment) -> EvalResult<(Signal, Vec<Node>)> {
        self.callstack.push(ExecutionContext::new(env.clone(), ContextKind::Block));
        let result = self.eval_stmt_list(body, env);
        self.callstack.pop();
        let (signal, frags) = result?;
        Ok((signal, vec![Node::BlockStatement { body: frags }]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;
    use crate::ast::DeclKind;
    use crate::config::LimitsConfig;

    fn run(body: Vec<Node>) -> Vec<Node> {
        let mut ev = Evaluator::new(LimitsConfig::default());
        ev.run(&program(body)).unwrap()
    }

    /// spec §8 scenario 1: `var a = 1 + 2; a;` → `var a = 3; 3;`
    #[test]
    fn scenario_constant_folding() {
        let out = run(vec![
            var_decl(DeclKind::Var, vec![var_declarator("a", Some(bin(num(1.0), "+", num(2.0))))]),
            expr_stmt(ident("a")),
        ]);
        assert_eq!(out.len(), 2);
        assert!(matches!(
            &out[0],
            Node::VariableDeclaration { declarations, .. }
                if matches!(&declarations[0], Node::VariableDeclarator { init: Some(n), .. } if **n == num(3.0))
        ));
        assert_eq!(out[1], expr_stmt(num(3.0)));
    }

    /// spec §8 scenario 6: `try { definitely.fails } catch(e) { y = 1; } y;`
    /// → catch executes concretely; `y` resolves to `1`.
    #[test]
    fn scenario_catch_executes_concretely_on_real_reference_error() {
        let try_stmt = Node::TryStatement {
            block: Box::new(block(vec![expr_stmt(member(ident("definitely"), ident("fails"), false))])),
            handler: Some(Box::new(Node::CatchClause {
                param: Some(Box::new(ident("e"))),
                body: Box::new(block(vec![expr_stmt(assign("=", ident("y"), num(1.0)))])),
            })),
            finalizer: None,
        };
        let out = run(vec![
            var_decl(DeclKind::Var, vec![var_declarator("y", Some(num(0.0)))]),
            try_stmt,
            expr_stmt(ident("y")),
        ]);
        assert_eq!(out.last().unwrap(), &expr_stmt(num(1.0)));
    }

    /// spec §8 scenario 2: `var a = 1; if (tainted) { a = 2; } a;` — the
    /// trailing read of `a` comes back as a tainted reference rather than
    /// folding to either branch's literal, since the write under the
    /// tainted test might or might not have run.
    #[test]
    fn scenario_tainted_if_write_leaks_as_tainted_reference() {
        let mut ev = Evaluator::new(LimitsConfig::default());
        let env = Environment::root();
        env.set_ignore_reference_exception(true);
        let _ = env.resolve("tainted");

        let body = vec![
            var_decl(DeclKind::Var, vec![var_declarator("a", Some(num(1.0)))]),
            if_stmt(ident("tainted"), block(vec![expr_stmt(assign("=", ident("a"), num(2.0)))]), None),
            expr_stmt(ident("a")),
        ];
        let (_, frags) = ev.eval_stmt_list(&body, &env).unwrap();
        let Node::IfStatement { consequent, .. } = &frags[1] else { panic!("expected an if statement") };
        let Node::BlockStatement { body: cons_body } = &**consequent else { panic!("expected a block consequent") };
        assert_eq!(cons_body[0], expr_stmt(assign("=", ident("a"), num(2.0))));
        assert_eq!(frags.last().unwrap(), &expr_stmt(ident("a")));

        let a = env.resolve("a").unwrap();
        assert!(a.is_tainted());
    }

    /// spec §8 scenario 3: `function f(x){return x+1;} f(3);` — the body
    /// is kept unfolded (its parameter is a tainted reference) but the
    /// untainted call still folds to `(call, 4)` per the call-expression
    /// contract (spec §4.3's "Call expression").
    #[test]
    fn scenario_function_body_kept_unfolded_call_site_shows_literal() {
        let out = run(vec![
            func_decl("f", vec!["x"], block(vec![ret(Some(bin(ident("x"), "+", num(1.0))))])),
            expr_stmt(call(ident("f"), vec![num(3.0)])),
        ]);
        assert!(matches!(
            &out[0],
            Node::FunctionDeclaration { body, .. }
                if matches!(&**body, Node::BlockStatement { body } if matches!(
                    &body[0],
                    Node::ReturnStatement { argument: Some(a) }
                        if matches!(&**a, Node::BinaryExpression { .. })
                ))
        ));
        let Node::ExpressionStatement { expression } = &out[1] else { panic!("expected an expression statement") };
        let Node::SequenceExpression { expressions } = &**expression else { panic!("expected a sequence expression") };
        assert_eq!(expressions.len(), 2);
        assert!(matches!(&expressions[0], Node::CallExpression { arguments, .. } if *arguments == vec![num(3.0)]));
        assert_eq!(expressions[1], num(4.0));
    }

    /// spec §8 scenario 5: `var a=[10,20,30]; if (tainted){ a[0] += 5; }
    /// a[0]; a[1];` — only the written slot is tainted; sibling elements
    /// keep reading their concrete contents.
    #[test]
    fn scenario_tainted_branch_taints_only_the_written_array_slot() {
        let mut ev = Evaluator::new(LimitsConfig::default());
        let env = Environment::root();
        env.set_ignore_reference_exception(true);
        let _ = env.resolve("tainted");

        let body = vec![
            var_decl(
                DeclKind::Var,
                vec![var_declarator("a", Some(array(vec![Some(num(10.0)), Some(num(20.0)), Some(num(30.0))])))],
            ),
            if_stmt(
                ident("tainted"),
                block(vec![expr_stmt(assign("+=", member(ident("a"), num(0.0), true), num(5.0)))]),
                None,
            ),
            expr_stmt(member(ident("a"), num(0.0), true)),
            expr_stmt(member(ident("a"), num(1.0), true)),
        ];
        let (_, frags) = ev.eval_stmt_list(&body, &env).unwrap();

        let Node::IfStatement { consequent, .. } = &frags[1] else { panic!("expected an if statement") };
        let Node::BlockStatement { body: cons_body } = &**consequent else { panic!("expected a block consequent") };
        assert_eq!(
            cons_body[0],
            expr_stmt(assign("+=", member(ident("a"), num(0.0), true), num(5.0)))
        );
        assert_eq!(frags[2], expr_stmt(member(ident("a"), num(0.0), true)));
        assert_eq!(frags[3], expr_stmt(num(20.0)));
    }

    #[test]
    fn undefined_identifier_is_untainted_undefined() {
        let mut ev = Evaluator::new(LimitsConfig::default());
        let env = Environment::root();
        let c = ev.eval_expr(&ident("undefined"), &env).unwrap();
        assert!(!c.is_tainted());
        assert!(matches!(c.value(), Some(crate::value::Value::Undefined)));
    }

    #[test]
    fn short_circuit_and_never_evaluates_right_side() {
        let mut ev = Evaluator::new(LimitsConfig::default());
        let env = Environment::root();
        let c = ev
            .eval_expr(&logical(boolean(false), "&&", member(ident("nope"), ident("x"), false)), &env)
            .unwrap();
        assert!(!c.is_tainted());
        assert!(!c.value().unwrap().is_truthy());
    }
}
