use std::fmt;
use std::sync::PoisonError;
use thiserror::Error;

pub type EvalResult<T, E = EvalError> = Result<T, E>;

/// The three diagnostic kinds from the evaluator's error model, plus the
/// handful of I/O-adjacent failures the CLI boundary can produce.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A tree shape or operator outside the supported subset: block-scoped
    /// declarators, destructuring, generators/async, unsupported update
    /// targets, the `|>` operator, a missing label target, and so on.
    #[error("not implemented: {construct}")]
    NotImplemented { construct: String },

    /// An identifier that resolves nowhere in the scope chain while
    /// `ignore_reference_exception` is false, or a `break`/label target that
    /// does not exist on the callstack.
    #[error("reference unresolved: {name}")]
    ReferenceUnresolved { name: String },

    /// A carrier with neither value nor node, an unexpected popped context,
    /// an unsupported value type reaching `ValueLift`. Never user-catchable.
    #[error("internal invariant violated: {detail}")]
    InternalInvariant { detail: String },

    /// A `throw` executed by evaluated code. Carries the thrown carrier so
    /// it can be bound to a catch parameter untainted.
    #[error("uncaught throw")]
    Thrown(Box<crate::value::Carrier>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tree (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("poisoned lock: {0}")]
    Poison(String),

    #[error("{0}")]
    Msg(String),
}

impl EvalError {
    pub fn not_implemented(construct: impl Into<String>) -> Self {
        EvalError::NotImplemented { construct: construct.into() }
    }

    pub fn reference_unresolved(name: impl Into<String>) -> Self {
        EvalError::ReferenceUnresolved { name: name.into() }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        EvalError::InternalInvariant { detail: detail.into() }
    }

    /// NotImplemented and ReferenceUnresolved raised inside a `try` body are
    /// user-catchable; InternalInvariant (and an uncaught `Thrown`, once it
    /// escapes the enclosing `try`) must short-circuit every handler above.
    pub fn is_user_catchable(&self) -> bool {
        matches!(self, EvalError::NotImplemented { .. } | EvalError::ReferenceUnresolved { .. })
    }
}

impl<T> From<PoisonError<T>> for EvalError
where
    T: fmt::Debug,
{
    fn from(err: PoisonError<T>) -> Self {
        EvalError::Poison(err.to_string())
    }
}

impl From<&str> for EvalError {
    fn from(s: &str) -> Self {
        EvalError::Msg(s.to_owned())
    }
}

impl From<String> for EvalError {
    fn from(s: String) -> Self {
        EvalError::Msg(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_implemented_is_user_catchable() {
        let e = EvalError::not_implemented("generator function");
        assert!(e.is_user_catchable());
    }

    #[test]
    fn internal_invariant_is_never_user_catchable() {
        let e = EvalError::internal("carrier with neither value nor node");
        assert!(!e.is_user_catchable());
    }

    #[test]
    fn thrown_is_never_user_catchable_directly() {
        let c = crate::value::Carrier::concrete(crate::value::Value::Undefined);
        let e = EvalError::Thrown(Box::new(c));
        assert!(!e.is_user_catchable());
    }

    #[test]
    fn io_conversion_retains_message() {
        let e = std::io::Error::new(std::io::ErrorKind::Other, "boom!");
        let n: EvalError = e.into();
        assert!(matches!(n, EvalError::Io(_)));
        assert!(n.to_string().contains("boom"));
    }

    #[test]
    fn simple_string_into_msg() {
        let n: EvalError = "plain msg".into();
        assert!(matches!(n, EvalError::Msg(s) if s == "plain msg"));
    }
}
