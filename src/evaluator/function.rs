//! Function closures, arena-indexed (spec §9's redesign note: `FunctionId`
//! into a `FunctionRegistry` rather than raw interpreter back-pointers, so
//! `Value::Fn` stays `Copy`-cheap and closures can outlive their defining
//! call frame without a lifetime).

use crate::ast::Node;
use crate::env::Environment;
use crate::errors::{EvalError, EvalResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(usize);

/// Everything needed to invoke a closure later: its parameter list, body,
/// the environment it captured at definition time, and the node it lifts
/// back to when a `Value::Fn` reaches [`crate::value::lift`] untouched.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<Node>,
    pub rest: bool,
    pub body: Node,
    pub closure: Environment,
    pub residual: Node,
}

#[derive(Debug, Default)]
pub struct FunctionRegistry {
    defs: Vec<FunctionDef>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry { defs: Vec::new() }
    }

    pub fn register(&mut self, def: FunctionDef) -> FunctionId {
        self.defs.push(def);
        FunctionId(self.defs.len() - 1)
    }

    pub fn get(&self, id: FunctionId) -> EvalResult<&FunctionDef> {
        self.defs
            .get(id.0)
            .ok_or_else(|| EvalError::internal("dangling function id"))
    }

    pub fn residual_of(&self, id: FunctionId) -> EvalResult<&Node> {
        Ok(&self.get(id)?.residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;

    #[test]
    fn registered_function_round_trips() {
        let mut reg = FunctionRegistry::new();
        let env = Environment::root();
        let id = reg.register(FunctionDef {
            name: Some("f".into()),
            params: vec![],
            rest: false,
            body: block(vec![]),
            closure: env,
            residual: func_decl("f", vec![], block(vec![])),
        });
        assert_eq!(reg.get(id).unwrap().name.as_deref(), Some("f"));
    }

    #[test]
    fn dangling_id_is_internal_error() {
        let reg = FunctionRegistry::new();
        let other = {
            let mut r2 = FunctionRegistry::new();
            let env = Environment::root();
            r2.register(FunctionDef {
                name: None,
                params: vec![],
                rest: false,
                body: block(vec![]),
                closure: env,
                residual: func_decl("g", vec![], block(vec![])),
            })
        };
        assert!(matches!(reg.get(other), Err(EvalError::InternalInvariant { .. })));
    }
}
