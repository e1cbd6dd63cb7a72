//! The scoped environment (spec §4.2): a name→carrier record with a parent
//! link, plus the taint-gating contracts every read/write obeys.

use crate::ast::Node;
use crate::errors::{EvalError, EvalResult};
use crate::value::{Carrier, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug)]
struct EnvironmentData {
    record: HashMap<String, Carrier>,
    parent: Option<Environment>,
    taint_parent_writes: bool,
    taint_parent_reads: bool,
    ignore_reference_exception: bool,
}

/// Reference-counted so sibling contexts spawned for both branches of a
/// tainted conditional, and closures capturing their defining scope, can
/// share a parent without ownership conflicts (spec §9).
#[derive(Debug, Clone)]
pub struct Environment(Rc<RefCell<EnvironmentData>>);

/// One step of a member-access path: an index into an array-valued carrier,
/// or the synthetic `.length` property. Non-goals (spec §1) exclude a full
/// object model, so these are the only indexable shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKey {
    Index(usize),
    Length,
}

impl Environment {
    pub fn root() -> Environment {
        Environment(Rc::new(RefCell::new(EnvironmentData {
            record: HashMap::new(),
            parent: None,
            taint_parent_writes: false,
            taint_parent_reads: false,
            ignore_reference_exception: false,
        })))
    }

    /// A fresh child scope. Gating flags default to false/false/false;
    /// callers (the evaluator, at each construct that pushes a scope) set
    /// them explicitly per spec §4.3's per-construct rules.
    pub fn child(parent: &Environment) -> Environment {
        Environment(Rc::new(RefCell::new(EnvironmentData {
            record: HashMap::new(),
            parent: Some(parent.clone()),
            taint_parent_writes: false,
            taint_parent_reads: false,
            ignore_reference_exception: false,
        })))
    }

    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn set_taint_parent_writes(&self, flag: bool) {
        self.0.borrow_mut().taint_parent_writes = flag;
    }
    pub fn set_taint_parent_reads(&self, flag: bool) {
        self.0.borrow_mut().taint_parent_reads = flag;
    }
    pub fn set_ignore_reference_exception(&self, flag: bool) {
        self.0.borrow_mut().ignore_reference_exception = flag;
    }
    pub fn taint_parent_writes(&self) -> bool {
        self.0.borrow().taint_parent_writes
    }
    pub fn ignore_reference_exception(&self) -> bool {
        self.0.borrow().ignore_reference_exception
    }

    fn parent(&self) -> Option<Environment> {
        self.0.borrow().parent.clone()
    }

    /// `declare(name)`: idempotently inserts `{undefined, untainted}` into
    /// the local record. Pre-existing local entries are silently tolerated
    /// (spec §4.2 — the obfuscated source model permits redeclaration).
    pub fn declare(&self, name: &str) {
        let mut data = self.0.borrow_mut();
        data.record.entry(name.to_string()).or_insert_with(Carrier::undefined);
    }

    /// Unconditionally binds `name` to `carrier` in the local record,
    /// overwriting any existing entry. Used for parameter binding at call
    /// time, where each invocation gets fresh bindings.
    pub fn bind(&self, name: &str, carrier: Carrier) {
        self.0.borrow_mut().record.insert(name.to_string(), carrier);
    }

    /// `resolve(name)`: spec §4.2's read contract.
    pub fn resolve(&self, name: &str) -> EvalResult<Carrier> {
        if let Some(c) = self.0.borrow().record.get(name).cloned() {
            return Ok(c);
        }
        let mut cur = self.parent();
        while let Some(env) = cur {
            if let Some(c) = env.0.borrow().record.get(name).cloned() {
                return if self.0.borrow().taint_parent_reads {
                    Ok(Carrier::tainted_ref(name))
                } else {
                    Carrier::new(c.value().cloned(), Some(Node::identifier(name)), c.is_tainted())
                };
            }
            cur = env.parent();
        }
        if self.ignore_reference_exception() {
            self.declare(name);
            self.set_taint(name, true)?;
            Ok(Carrier::tainted_ref(name))
        } else {
            Err(EvalError::reference_unresolved(name))
        }
    }

    /// Innermost environment (self or an ancestor) whose local record
    /// already holds `name`, plus whether that environment is `self`.
    fn find_owner(&self, name: &str) -> Option<(Environment, bool)> {
        if self.0.borrow().record.contains_key(name) {
            return Some((self.clone(), true));
        }
        let mut cur = self.parent();
        while let Some(env) = cur {
            if env.0.borrow().record.contains_key(name) {
                return Some((env, false));
            }
            cur = env.parent();
        }
        None
    }

    /// True iff a write to `name` through this scope would be degraded to
    /// a tainted reference by `assign`'s or `assign_member`'s
    /// `taint_parent_writes` policy — i.e. the name is owned by an ancestor
    /// and this scope is gated, so the write is conditional and the caller
    /// must keep it visible in the residual even when the value folds.
    pub fn write_is_ambiguous(&self, name: &str) -> bool {
        match self.find_owner(name) {
            Some((_, owner_is_self)) => self.taint_parent_writes() && !owner_is_self,
            None => false,
        }
    }

    /// `assign(name, carrier)`: spec §4.2's write contract. A name with no
    /// existing binding anywhere in the chain is declared locally — the
    /// source model never specifies this case, so this crate treats a bare
    /// assignment to an undeclared name the way sloppy-mode JS does rather
    /// than raising (see DESIGN.md).
    pub fn assign(&self, name: &str, carrier: Carrier) -> EvalResult<()> {
        let (owner, owner_is_self) = match self.find_owner(name) {
            Some(pair) => pair,
            None => {
                self.declare(name);
                (self.clone(), true)
            }
        };

        let stored = if self.taint_parent_writes() && !owner_is_self {
            Carrier::tainted_ref(name)
        } else {
            carrier
        };
        owner.0.borrow_mut().record.insert(name.to_string(), stored);
        Ok(())
    }

    /// `set_taint(name, flag)`: flips the taint bit without touching the
    /// stored value/node.
    pub fn set_taint(&self, name: &str, flag: bool) -> EvalResult<()> {
        let (owner, _) = self
            .find_owner(name)
            .ok_or_else(|| EvalError::reference_unresolved(name))?;
        let mut data = owner.0.borrow_mut();
        if let Some(c) = data.record.get_mut(name) {
            *c = c.clone().with_taint(flag);
        }
        Ok(())
    }

    /// `assign_member(obj_name, key, carrier, residual_node)`: spec §4.2's
    /// four-way policy. `key` carries both the resolved index (when the
    /// key was computable) and its own tainted bit.
    pub fn assign_member(
        &self,
        obj_name: &str,
        key: MemberKeyCarrier,
        new_value: Carrier,
    ) -> EvalResult<()> {
        let (owner, owner_is_self) = self
            .find_owner(obj_name)
            .ok_or_else(|| EvalError::reference_unresolved(obj_name))?;

        let obj_carrier = owner.0.borrow().record.get(obj_name).cloned().unwrap();
        if obj_carrier.is_tainted() {
            return Ok(()); // (a)
        }
        if key.tainted {
            return Ok(()); // (b) — caller additionally taints the path
        }
        let Some(Value::Array(arr_rc)) = obj_carrier.value() else {
            return Ok(());
        };
        let MemberKey::Index(idx) = key.resolved else {
            return Ok(()); // `.length =` writes are not modeled
        };

        if self.taint_parent_writes() && !owner_is_self {
            // (c): the write itself degrades to a tainted reference so no
            // concrete value crosses into the parent; the object entry is
            // then marked tainted-appearing too, but its value is kept so
            // sibling element reads still see their real contents.
            let member_node = Node::MemberExpression {
                object: Box::new(Node::identifier(obj_name)),
                property: Box::new(Node::NumericLiteral { value: idx as f64 }),
                computed: true,
            };
            {
                let mut arr = arr_rc.borrow_mut();
                if idx >= arr.len() {
                    arr.resize_with(idx + 1, Carrier::undefined);
                }
                arr[idx] = Carrier::residual(member_node, true);
            }
            let mut data = owner.0.borrow_mut();
            if let Some(c) = data.record.get_mut(obj_name) {
                *c = c.clone().with_taint(true);
            }
        } else {
            // (d)
            let mut arr = arr_rc.borrow_mut();
            if idx >= arr.len() {
                arr.resize_with(idx + 1, Carrier::undefined);
            }
            arr[idx] = new_value;
        }
        Ok(())
    }

    /// `assign_nested_member(obj_name, path, carrier, residual_node)`: walks
    /// a path of resolved indices through nested arrays. Any tainted step
    /// taints the sub-object reached so far and returns; the final step
    /// obeys [`Environment::assign_member`]'s rules.
    pub fn assign_nested_member(
        &self,
        obj_name: &str,
        path: &[MemberKeyCarrier],
        new_value: Carrier,
    ) -> EvalResult<()> {
        let Some((last, init)) = path.split_last() else {
            return Ok(());
        };
        if init.is_empty() {
            return self.assign_member(obj_name, *last, new_value);
        }

        let (owner, _) = self
            .find_owner(obj_name)
            .ok_or_else(|| EvalError::reference_unresolved(obj_name))?;
        let root_carrier = owner.0.borrow().record.get(obj_name).cloned().unwrap();
        if root_carrier.is_tainted() {
            return Ok(());
        }
        let Some(Value::Array(mut current)) = root_carrier.value().cloned() else {
            return Ok(());
        };

        for step in init {
            if step.tainted {
                // Taint the sub-object we've reached so far in place.
                let mut arr = current.borrow_mut();
                for slot in arr.iter_mut() {
                    *slot = slot.clone().with_taint(true);
                }
                return Ok(());
            }
            let MemberKey::Index(idx) = step.resolved else {
                return Ok(());
            };
            let next = {
                let arr = current.borrow();
                match arr.get(idx).and_then(|c| c.value()) {
                    Some(Value::Array(rc)) => rc.clone(),
                    _ => return Ok(()),
                }
            };
            current = next;
        }

        if last.tainted {
            return Ok(());
        }
        let MemberKey::Index(idx) = last.resolved else {
            return Ok(());
        };
        let mut arr = current.borrow_mut();
        if idx >= arr.len() {
            arr.resize_with(idx + 1, Carrier::undefined);
        }
        arr[idx] = new_value;
        Ok(())
    }

    /// `is_tainted_env(limit)`: true iff any scope between self (inclusive)
    /// and `limit` (exclusive, or the root) has `taint_parent_writes` set.
    pub fn is_tainted_env(&self, limit: Option<&Environment>) -> bool {
        let mut cur = Some(self.clone());
        while let Some(env) = cur {
            if let Some(limit) = limit {
                if env.ptr_eq(limit) {
                    break;
                }
            }
            if env.taint_parent_writes() {
                return true;
            }
            cur = env.parent();
        }
        false
    }

    /// Clears the local record in place, keeping this environment's
    /// identity (and its taint-gating flags) intact. Used between tainted
    /// fixed-point passes over a loop body so a concrete value computed on
    /// one pass can't leak into and poison the next (spec §4.3's "While /
    /// do-while / for").
    pub fn clear_local(&self) {
        self.0.borrow_mut().record.clear();
    }

    /// `copy_chain_flattened()`: a parent-shadowing snapshot across the
    /// whole chain, used by the function-body sandbox pass to seed a
    /// read-only view of the outer world when needed.
    pub fn copy_chain_flattened(&self) -> HashMap<String, Carrier> {
        let mut out = HashMap::new();
        let mut chain = Vec::new();
        let mut cur = Some(self.clone());
        while let Some(env) = cur {
            chain.push(env.clone());
            cur = env.parent();
        }
        for env in chain.into_iter().rev() {
            for (k, v) in env.0.borrow().record.iter() {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

/// A resolved member key paired with whether the key expression itself
/// was tainted, as required by [`Environment::assign_member`]'s policy (b).
#[derive(Debug, Clone, Copy)]
pub struct MemberKeyCarrier {
    pub resolved: MemberKey,
    pub tainted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn declare_is_idempotent() {
        let env = Environment::root();
        env.declare("x");
        env.assign("x", Carrier::concrete(Value::Number(5.0))).unwrap();
        env.declare("x");
        let c = env.resolve("x").unwrap();
        assert_eq!(c.value().unwrap().type_of(), "number");
    }

    #[test]
    fn unresolved_reference_is_fatal_by_default() {
        let env = Environment::root();
        assert!(matches!(env.resolve("nope"), Err(EvalError::ReferenceUnresolved { .. })));
    }

    #[test]
    fn ignore_reference_exception_declares_tainted_locally() {
        let env = Environment::root();
        env.set_ignore_reference_exception(true);
        let c = env.resolve("mystery").unwrap();
        assert!(c.is_tainted());
        // Declared locally — a second resolve sees the same tainted ref.
        let c2 = env.resolve("mystery").unwrap();
        assert!(c2.is_tainted());
    }

    #[test]
    fn taint_parent_writes_degrades_parent_assignment_to_reference() {
        let root = Environment::root();
        root.declare("x");
        root.assign("x", Carrier::concrete(Value::Number(1.0))).unwrap();

        let child = Environment::child(&root);
        child.set_taint_parent_writes(true);
        child.assign("x", Carrier::concrete(Value::Number(2.0))).unwrap();

        let stored = root.resolve("x").unwrap();
        assert!(stored.is_tainted());
    }

    #[test]
    fn taint_parent_reads_never_returns_stored_carrier() {
        let root = Environment::root();
        root.declare("x");
        root.assign("x", Carrier::concrete(Value::Number(9.0))).unwrap();

        let child = Environment::child(&root);
        child.set_taint_parent_reads(true);
        let c = child.resolve("x").unwrap();
        assert!(c.is_tainted());
        assert!(c.value().is_none() || matches!(c.node_ref(), Some(Node::Identifier { .. })));
    }

    #[test]
    fn self_scope_read_is_as_is() {
        let env = Environment::root();
        env.declare("x");
        env.assign("x", Carrier::concrete(Value::Number(9.0))).unwrap();
        let c = env.resolve("x").unwrap();
        assert!(!c.is_tainted());
        assert_eq!(c.value().unwrap().type_of(), "number");
    }

    #[test]
    fn is_tainted_env_stops_at_limit() {
        let root = Environment::root();
        let mid = Environment::child(&root);
        mid.set_taint_parent_writes(true);
        let leaf = Environment::child(&mid);

        assert!(leaf.is_tainted_env(None));
        assert!(!mid.is_tainted_env(Some(&mid)));
    }

    #[test]
    fn assign_member_plain_store() {
        let env = Environment::root();
        env.declare("a");
        env.assign("a", Carrier::concrete(Value::array(vec![
            Carrier::concrete(Value::Number(10.0)),
            Carrier::concrete(Value::Number(20.0)),
        ]))).unwrap();

        env.assign_member(
            "a",
            MemberKeyCarrier { resolved: MemberKey::Index(0), tainted: false },
            Carrier::concrete(Value::Number(99.0)),
        ).unwrap();

        let a = env.resolve("a").unwrap();
        let Some(Value::Array(arr)) = a.value() else { panic!("expected array") };
        assert_eq!(arr.borrow()[0].value().unwrap().type_of(), "number");
    }

    #[test]
    fn assign_member_noop_when_object_tainted() {
        let env = Environment::root();
        env.declare("a");
        env.assign("a", Carrier::tainted_ref("a")).unwrap();
        env.assign_member(
            "a",
            MemberKeyCarrier { resolved: MemberKey::Index(0), tainted: false },
            Carrier::concrete(Value::Number(1.0)),
        ).unwrap();
        // No panic, no-op: nothing to assert structurally beyond "didn't error".
    }
}
