//! Expression dispatch arms that don't get their own module: binary,
//! logical, unary, update, sequence, assignment, member, conditional,
//! array (spec §4.3).

use super::operators;
use super::Evaluator;
use crate::ast::{is_valid_identifier_name, Node};
use crate::env::{MemberKey, MemberKeyCarrier};
use crate::errors::{EvalError, EvalResult};
use crate::value::{Carrier, Value};

impl Evaluator {
    pub(super) fn eval_binary(
        &mut self,
        left: &Node,
        op: &str,
        right: &Node,
        env: &crate::env::Environment,
    ) -> EvalResult<Carrier> {
        let l = self.eval_expr(left, env)?;
        let r = self.eval_expr(right, env)?;
        if l.is_tainted() || r.is_tainted() {
            let node = Node::BinaryExpression {
                left: Box::new(l.repr(&self.functions)?),
                operator: op.to_string(),
                right: Box::new(r.repr(&self.functions)?),
            };
            return Ok(Carrier::residual(node, true));
        }
        let result = operators::binary(op, l.value().unwrap(), r.value().unwrap())?;
        Ok(Carrier::concrete(result))
    }

    pub(super) fn eval_logical(
        &mut self,
        left: &Node,
        op: &str,
        right: &Node,
        env: &crate::env::Environment,
    ) -> EvalResult<Carrier> {
        let l = self.eval_expr(left, env)?;
        if !l.is_tainted() {
            let determines_outcome = match op {
                "&&" => !l.value().unwrap().is_truthy(),
                "||" => l.value().unwrap().is_truthy(),
                "??" => !l.value().unwrap().is_nullish(),
                other => return Err(EvalError::not_implemented(format!("logical operator `{other}`"))),
            };
            if determines_outcome {
                return Ok(l);
            }
            return self.eval_expr(right, env);
        }
        let r = self.eval_expr(right, env)?;
        let node = Node::LogicalExpression {
            left: Box::new(l.repr(&self.functions)?),
            operator: op.to_string(),
            right: Box::new(r.repr(&self.functions)?),
        };
        Ok(Carrier::residual(node, true))
    }

    pub(super) fn eval_unary(
        &mut self,
        op: &str,
        argument: &Node,
        prefix: bool,
        env: &crate::env::Environment,
    ) -> EvalResult<Carrier> {
        let arg = self.eval_expr(argument, env)?;
        if op == "void" {
            return Ok(Carrier::concrete(Value::Undefined));
        }
        if op == "throw" {
            return Err(EvalError::Thrown(Box::new(arg)));
        }
        if arg.is_tainted() {
            let node = Node::UnaryExpression {
                operator: op.to_string(),
                argument: Box::new(arg.repr(&self.functions)?),
                prefix,
            };
            return Ok(Carrier::residual(node, true));
        }
        let result = operators::unary(op, arg.value().unwrap())?;
        Ok(Carrier::concrete(result))
    }

    pub(super) fn eval_sequence(&mut self, expressions: &[Node], env: &crate::env::Environment) -> EvalResult<Carrier> {
        let mut last = Carrier::undefined();
        let mut frags = Vec::with_capacity(expressions.len());
        for e in expressions {
            last = self.eval_expr(e, env)?;
            frags.push(last.repr(&self.functions)?);
        }
        if last.is_tainted() {
            Ok(Carrier::residual(Node::SequenceExpression { expressions: frags }, true))
        } else {
            Ok(last)
        }
    }

    pub(super) fn eval_array(&mut self, elements: &[Option<Node>], env: &crate::env::Environment) -> EvalResult<Carrier> {
        let mut out = Vec::with_capacity(elements.len());
        for el in elements {
            match el {
                Some(n) => out.push(self.eval_expr(n, env)?),
                None => out.push(Carrier::undefined()),
            }
        }
        Ok(Carrier::concrete(Value::array(out)))
    }

    pub(super) fn eval_conditional(
        &mut self,
        test: &Node,
        consequent: &Node,
        alternate: &Node,
        env: &crate::env::Environment,
    ) -> EvalResult<Carrier> {
        let test_carrier = self.eval_expr(test, env)?;
        if !test_carrier.is_tainted() {
            return if test_carrier.value().unwrap().is_truthy() {
                self.eval_expr(consequent, env)
            } else {
                self.eval_expr(alternate, env)
            };
        }

        let branch_env = crate::env::Environment::child(env);
        branch_env.set_taint_parent_writes(true);
        let c = self.eval_expr(consequent, &branch_env)?;
        let branch_env2 = crate::env::Environment::child(env);
        branch_env2.set_taint_parent_writes(true);
        let a = self.eval_expr(alternate, &branch_env2)?;

        let node = Node::ConditionalExpression {
            test: Box::new(test_carrier.repr(&self.functions)?),
            consequent: Box::new(c.repr(&self.functions)?),
            alternate: Box::new(a.repr(&self.functions)?),
        };
        Ok(Carrier::residual(node, true))
    }

    /// Resolves a member expression's `(object_carrier, key_value, key_residual_node)`
    /// without performing the final lookup — shared by reads, updates, and
    /// assignments, which each apply a different policy once tainted-ness
    /// of object/key is known.
    pub(super) fn member_parts(
        &mut self,
        object: &Node,
        property: &Node,
        computed: bool,
        env: &crate::env::Environment,
    ) -> EvalResult<(Carrier, Carrier, Node)> {
        let obj = self.eval_expr(object, env)?;
        let key = if computed {
            self.eval_expr(property, env)?
        } else {
            let name = property
                .as_identifier_name()
                .ok_or_else(|| EvalError::not_implemented("non-identifier member property"))?;
            Carrier::concrete(Value::Str(name.to_string()))
        };
        let key_node = if !computed {
            property.clone()
        } else if let Some(Value::Str(s)) = key.value() {
            if is_valid_identifier_name(s) {
                Node::identifier(s)
            } else {
                key.repr(&self.functions)?
            }
        } else {
            key.repr(&self.functions)?
        };
        Ok((obj, key, key_node))
    }

    /// Builds a member-expression residual, preferring the dot form when
    /// `key_node` is an identifier (spec §4.3: "the residual's key form
    /// prefers a named identifier when the key is a valid identifier
    /// string, else a computed expression").
    fn member_node(object: Node, key_node: Node) -> Node {
        let computed = !matches!(key_node, Node::Identifier { .. });
        Node::MemberExpression { object: Box::new(object), property: Box::new(key_node), computed }
    }

    fn optional_member_node(object: Node, key_node: Node) -> Node {
        let computed = !matches!(key_node, Node::Identifier { .. });
        Node::OptionalMemberExpression { object: Box::new(object), property: Box::new(key_node), computed }
    }

    /// Indexes a concrete object by a concrete key. `None` covers both "no
    /// such synthetic property" and "index out of bounds" — both lift to
    /// untainted `undefined` (spec §4.3, §1's non-goal on a full object
    /// model: only arrays and string character/length access are modeled).
    fn lookup(object: &Value, key: &Value) -> Option<Carrier> {
        match object {
            Value::Array(arr) => {
                let key_str = match key {
                    Value::Str(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return Some(Carrier::undefined()),
                };
                if key_str == "length" {
                    return Some(Carrier::concrete(Value::Number(arr.borrow().len() as f64)));
                }
                key_str
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| arr.borrow().get(i).cloned())
                    .or(Some(Carrier::undefined()))
            }
            Value::Str(s) => {
                let key_str = match key {
                    Value::Str(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return Some(Carrier::undefined()),
                };
                if key_str == "length" {
                    return Some(Carrier::concrete(Value::Number(s.chars().count() as f64)));
                }
                key_str
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Carrier::concrete(Value::Str(c.to_string())))
                    .or(Some(Carrier::undefined()))
            }
            _ => Some(Carrier::undefined()),
        }
    }

    pub(super) fn eval_member(
        &mut self,
        object: &Node,
        property: &Node,
        computed: bool,
        optional: bool,
        env: &crate::env::Environment,
    ) -> EvalResult<Carrier> {
        let (obj, key, key_node) = self.member_parts(object, property, computed, env)?;

        if optional && !obj.is_tainted() && obj.value().map(Value::is_nullish).unwrap_or(false) {
            return Ok(Carrier::concrete(Value::Undefined));
        }

        // An object carrier can be "tainted-appearing" yet still carry its
        // concrete value — Environment::assign_member's policy (c) does
        // exactly this when an array element is written under an ambiguous
        // branch, preserving the array so sibling-index reads keep working
        // (spec §4.2). Only fall back to a residual member expression when
        // there is genuinely no value to index into, or the key itself is
        // unknown.
        if key.is_tainted() || obj.value().is_none() {
            let object_repr = obj.repr(&self.functions)?;
            let node = if optional {
                Self::optional_member_node(object_repr, key_node)
            } else {
                Self::member_node(object_repr, key_node)
            };
            return Ok(Carrier::residual(node, true));
        }

        Ok(Self::lookup(obj.value().unwrap(), key.value().unwrap()).unwrap_or_else(Carrier::undefined))
    }

    pub(super) fn eval_update(
        &mut self,
        op: &str,
        argument: &Node,
        prefix: bool,
        env: &crate::env::Environment,
    ) -> EvalResult<Carrier> {
        match argument {
            Node::Identifier { name } => {
                let current = env.resolve(name)?;
                if current.is_tainted() {
                    let node = Node::UpdateExpression {
                        operator: op.to_string(),
                        argument: Box::new(Node::identifier(name)),
                        prefix,
                    };
                    return Ok(Carrier::residual(node, true));
                }
                let (stored, yielded) = operators::update(op, prefix, current.value().unwrap())?;
                env.assign(name, Carrier::concrete(stored))?;
                Ok(Carrier::concrete(yielded))
            }
            Node::MemberExpression { object, property, computed } => {
                self.eval_update_member(op, object, property, *computed, prefix, env)
            }
            other => Err(EvalError::not_implemented(format!("update target `{other:?}`"))),
        }
    }

    fn eval_update_member(
        &mut self,
        op: &str,
        object: &Node,
        property: &Node,
        computed: bool,
        prefix: bool,
        env: &crate::env::Environment,
    ) -> EvalResult<Carrier> {
        let obj_name = object
            .as_identifier_name()
            .ok_or_else(|| EvalError::not_implemented("update on a non-identifier-rooted member chain"))?;
        let (obj, key, key_node) = self.member_parts(object, property, computed, env)?;

        // See eval_member: a "tainted-appearing" object carrier may still
        // hold its preserved value (spec §4.2's assign_member policy (c)),
        // in which case indexing into it is still sound.
        if key.is_tainted() || obj.value().is_none() {
            if key.is_tainted() && !obj.is_tainted() {
                env.set_taint(obj_name, true)?;
            }
            let node = Node::UpdateExpression {
                operator: op.to_string(),
                argument: Box::new(Self::member_node(Node::identifier(obj_name), key_node)),
                prefix,
            };
            return Ok(Carrier::residual(node, true));
        }

        let existing = Self::lookup(obj.value().unwrap(), key.value().unwrap()).unwrap_or_else(Carrier::undefined);
        if existing.is_tainted() {
            let node = Node::UpdateExpression {
                operator: op.to_string(),
                argument: Box::new(Self::member_node(Node::identifier(obj_name), key_node)),
                prefix,
            };
            return Ok(Carrier::residual(node, true));
        }

        let (stored, yielded) = operators::update(op, prefix, existing.value().unwrap())?;
        let idx = as_index(key.value().unwrap());
        if let Some(idx) = idx {
            env.assign_member(
                obj_name,
                MemberKeyCarrier { resolved: MemberKey::Index(idx), tainted: false },
                Carrier::concrete(stored),
            )?;
        }
        Ok(Carrier::concrete(yielded))
    }

    pub(super) fn eval_assignment(
        &mut self,
        op: &str,
        left: &Node,
        right: &Node,
        env: &crate::env::Environment,
    ) -> EvalResult<Carrier> {
        match left {
            Node::Identifier { name } => self.eval_assign_identifier(op, name, right, env),
            Node::MemberExpression { object, property, computed } => {
                self.eval_assign_member(op, object, property, *computed, right, env)
            }
            other => Err(EvalError::not_implemented(format!("assignment target `{other:?}`"))),
        }
    }

    fn eval_assign_identifier(
        &mut self,
        op: &str,
        name: &str,
        right: &Node,
        env: &crate::env::Environment,
    ) -> EvalResult<Carrier> {
        let existing = env.resolve(name).unwrap_or_else(|_| Carrier::undefined());
        let rhs = self.eval_expr(right, env)?;

        let compound_tainted = op != "=" && existing.is_tainted();
        if rhs.is_tainted() || compound_tainted {
            let operator_for_residual = if op == "=" { "=".to_string() } else { op.to_string() };
            let rhs_repr = if op == "=" {
                rhs.repr(&self.functions)?
            } else {
                Node::BinaryExpression {
                    left: Box::new(existing.repr(&self.functions)?),
                    operator: compound_op_to_binary(op),
                    right: Box::new(rhs.repr(&self.functions)?),
                }
            };
            let node = Node::AssignmentExpression {
                operator: operator_for_residual,
                left: Box::new(Node::identifier(name)),
                right: Box::new(rhs_repr.clone()),
            };
            env.assign(name, Carrier::tainted_ref(name))?;
            return Ok(Carrier::residual(node, true));
        }

        let new_value = if op == "=" {
            rhs.value().unwrap().clone()
        } else {
            operators::binary(&compound_op_to_binary(op), existing.value().unwrap(), rhs.value().unwrap())?
        };

        if env.write_is_ambiguous(name) {
            // The operands fold, but the write itself may not execute —
            // `env.assign` already degrades the stored binding to a tainted
            // reference, so the statement must keep the assignment visible
            // too instead of vanishing into the folded literal.
            let node = Node::AssignmentExpression {
                operator: op.to_string(),
                left: Box::new(Node::identifier(name)),
                right: Box::new(rhs.repr(&self.functions)?),
            };
            env.assign(name, Carrier::concrete(new_value))?;
            return Ok(Carrier::residual(node, true));
        }

        env.assign(name, Carrier::concrete(new_value.clone()))?;
        Ok(Carrier::concrete(new_value))
    }

    fn eval_assign_member(
        &mut self,
        op: &str,
        object: &Node,
        property: &Node,
        computed: bool,
        right: &Node,
        env: &crate::env::Environment,
    ) -> EvalResult<Carrier> {
        let obj_name = object
            .as_identifier_name()
            .ok_or_else(|| EvalError::not_implemented("assignment to a non-identifier-rooted member chain"))?;
        let (obj, key, key_node) = self.member_parts(object, property, computed, env)?;
        let rhs = self.eval_expr(right, env)?;

        // As in eval_member/eval_update_member: a tainted-appearing object
        // carrier may still hold its preserved value, so index into that
        // instead of blanket-assuming every slot is unknown.
        let existing = if !key.is_tainted() && obj.value().is_some() {
            Self::lookup(obj.value().unwrap(), key.value().unwrap()).unwrap_or_else(Carrier::undefined)
        } else {
            Carrier::undefined()
        };

        let tainted = key.is_tainted() || obj.value().is_none() || existing.is_tainted() || rhs.is_tainted();
        if tainted {
            if key.is_tainted() && !obj.is_tainted() {
                env.set_taint(obj_name, true)?;
            }
            let rhs_repr = if op == "=" {
                rhs.repr(&self.functions)?
            } else {
                Node::BinaryExpression {
                    left: Box::new(existing.repr(&self.functions)?),
                    operator: compound_op_to_binary(op),
                    right: Box::new(rhs.repr(&self.functions)?),
                }
            };
            let node = Node::AssignmentExpression {
                operator: if op == "=" { "=".to_string() } else { op.to_string() },
                left: Box::new(Self::member_node(Node::identifier(obj_name), key_node)),
                right: Box::new(rhs_repr),
            };
            return Ok(Carrier::residual(node, true));
        }

        let new_value = if op == "=" {
            rhs.value().unwrap().clone()
        } else {
            operators::binary(&compound_op_to_binary(op), existing.value().unwrap(), rhs.value().unwrap())?
        };
        if let Some(idx) = as_index(key.value().unwrap()) {
            if env.write_is_ambiguous(obj_name) {
                let node = Node::AssignmentExpression {
                    operator: op.to_string(),
                    left: Box::new(Self::member_node(Node::identifier(obj_name), key_node)),
                    right: Box::new(rhs.repr(&self.functions)?),
                };
                env.assign_member(
                    obj_name,
                    MemberKeyCarrier { resolved: MemberKey::Index(idx), tainted: false },
                    Carrier::concrete(new_value),
                )?;
                return Ok(Carrier::residual(node, true));
            }
            env.assign_member(
                obj_name,
                MemberKeyCarrier { resolved: MemberKey::Index(idx), tainted: false },
                Carrier::concrete(new_value.clone()),
            )?;
        }
        Ok(Carrier::concrete(new_value))
    }
}

fn as_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        Value::Str(s) => s.parse::<usize>().ok(),
        _ => None,
    }
}

fn compound_op_to_binary(op: &str) -> String {
    op.trim_end_matches('=').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;
    use crate::config::LimitsConfig;
    use crate::env::Environment;

    #[test]
    fn out_of_bounds_array_access_is_untainted_undefined() {
        let mut ev = Evaluator::new(LimitsConfig::default());
        let env = Environment::root();
        env.declare("a");
        env.assign("a", Carrier::concrete(Value::array(vec![Carrier::concrete(Value::Number(1.0))]))).unwrap();
        let c = ev.eval_expr(&member(ident("a"), num(5.0), true), &env).unwrap();
        assert!(!c.is_tainted());
        assert!(matches!(c.value(), Some(Value::Undefined)));
    }

    #[test]
    fn array_length_is_readable() {
        let mut ev = Evaluator::new(LimitsConfig::default());
        let env = Environment::root();
        env.declare("a");
        env.assign(
            "a",
            Carrier::concrete(Value::array(vec![Carrier::undefined(), Carrier::undefined()])),
        )
        .unwrap();
        let c = ev.eval_expr(&member(ident("a"), ident("length"), false), &env).unwrap();
        assert!(matches!(c.value(), Some(Value::Number(n)) if *n == 2.0));
    }

    #[test]
    fn optional_member_short_circuits_on_null() {
        let mut ev = Evaluator::new(LimitsConfig::default());
        let env = Environment::root();
        env.declare("a");
        env.assign("a", Carrier::concrete(Value::Null)).unwrap();
        let node = Node::OptionalMemberExpression {
            object: Box::new(ident("a")),
            property: Box::new(ident("x")),
            computed: false,
        };
        let c = ev.eval_expr(&node, &env).unwrap();
        assert!(!c.is_tainted());
        assert!(matches!(c.value(), Some(Value::Undefined)));
    }
}
