//! Pure value-level operator tables for binary/unary/update expressions
//! (spec §4.3 "Binary expression" / "Unary expression" / "Update
//! expression"). Kept free of `Environment`/`Carrier` concerns so they can
//! be unit-tested as plain functions over [`Value`].

use crate::errors::{EvalError, EvalResult};
use crate::value::Value;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

fn to_number(v: &Value) -> f64 {
    match v {
        Value::Undefined => f64::NAN,
        Value::Null => 0.0,
        Value::Bool(b) => if *b { 1.0 } else { 0.0 },
        Value::Number(n) => *n,
        Value::BigInt(b) => b.to_f64().unwrap_or(f64::NAN),
        Value::Str(s) => {
            let t = s.trim();
            if t.is_empty() { 0.0 } else { t.parse::<f64>().unwrap_or(f64::NAN) }
        }
        Value::Regex { .. } | Value::Array(_) | Value::Fn(_) => f64::NAN,
    }
}

pub fn to_js_string(v: &Value) -> String {
    match v {
        Value::Undefined => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::BigInt(b) => b.to_string(),
        Value::Str(s) => s.clone(),
        Value::Regex { pattern, flags } => format!("/{pattern}/{flags}"),
        Value::Array(arr) => arr
            .borrow()
            .iter()
            .map(|c| c.value().map(to_js_string).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(","),
        Value::Fn(_) => "function".to_string(),
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == 0.0 {
        "0".to_string()
    } else {
        let mut s = n.to_string();
        if s.ends_with(".0") {
            s.truncate(s.len() - 2);
        }
        s
    }
}

fn to_i32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let m = n.trunc() as i64;
    (m as i64 as u32) as i32
}

fn to_u32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc() as i64 as u32
}

fn strict_equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::BigInt(a), Value::BigInt(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Regex { pattern: p1, flags: f1 }, Value::Regex { pattern: p2, flags: f2 }) => {
            p1 == p2 && f1 == f2
        }
        (Value::Array(a), Value::Array(b)) => std::rc::Rc::ptr_eq(a, b),
        (Value::Fn(a), Value::Fn(b)) => a == b,
        _ => false,
    }
}

/// Loose (`==`) equality, restricted to the value kinds this model
/// supports. Cross-type comparisons fall back to numeric coercion, which
/// covers the common obfuscation idioms (`"1" == 1`, `"" == false`)
/// without implementing the full abstract-equality algorithm.
fn loose_equals(l: &Value, r: &Value) -> bool {
    use Value::*;
    match (l, r) {
        (Undefined | Null, Undefined | Null) => true,
        _ if std::mem::discriminant(l) == std::mem::discriminant(r) => strict_equals(l, r),
        (Number(_), Str(_)) | (Str(_), Number(_)) | (Bool(_), _) | (_, Bool(_)) => {
            to_number(l) == to_number(r)
        }
        _ => false,
    }
}

fn as_bigints<'a>(l: &'a Value, r: &'a Value) -> Option<(&'a BigInt, &'a BigInt)> {
    match (l, r) {
        (Value::BigInt(a), Value::BigInt(b)) => Some((a, b)),
        _ => None,
    }
}

/// Computes a binary expression over two concrete values, per spec §4.3's
/// operator table. `|>` is explicitly unsupported (spec §1/§4.3).
pub fn binary(op: &str, l: &Value, r: &Value) -> EvalResult<Value> {
    match op {
        "+" => {
            if let (Value::Str(_), _) | (_, Value::Str(_)) = (l, r) {
                Ok(Value::Str(format!("{}{}", to_js_string(l), to_js_string(r))))
            } else if let Some((a, b)) = as_bigints(l, r) {
                Ok(Value::BigInt(a + b))
            } else {
                Ok(Value::Number(to_number(l) + to_number(r)))
            }
        }
        "-" => numeric_op(l, r, |a, b| a - b, |a, b| a - b),
        "*" => numeric_op(l, r, |a, b| a * b, |a, b| a * b),
        "/" => {
            if let Some((a, b)) = as_bigints(l, r) {
                if b.is_zero() {
                    return Err(EvalError::not_implemented("bigint division by zero"));
                }
                Ok(Value::BigInt(a / b))
            } else {
                Ok(Value::Number(to_number(l) / to_number(r)))
            }
        }
        "%" => {
            if let Some((a, b)) = as_bigints(l, r) {
                if b.is_zero() {
                    return Err(EvalError::not_implemented("bigint modulo by zero"));
                }
                Ok(Value::BigInt(a % b))
            } else {
                Ok(Value::Number(to_number(l) % to_number(r)))
            }
        }
        "**" => {
            if let Some((a, b)) = as_bigints(l, r) {
                let exp = b.to_u32().ok_or_else(|| EvalError::not_implemented("bigint exponent out of range"))?;
                Ok(Value::BigInt(a.pow(exp)))
            } else {
                Ok(Value::Number(to_number(l).powf(to_number(r))))
            }
        }
        "==" => Ok(Value::Bool(loose_equals(l, r))),
        "!=" => Ok(Value::Bool(!loose_equals(l, r))),
        "===" => Ok(Value::Bool(strict_equals(l, r))),
        "!==" => Ok(Value::Bool(!strict_equals(l, r))),
        "<" | "<=" | ">" | ">=" => compare(op, l, r),
        "&" => Ok(Value::Number((to_i32(to_number(l)) & to_i32(to_number(r))) as f64)),
        "|" => Ok(Value::Number((to_i32(to_number(l)) | to_i32(to_number(r))) as f64)),
        "^" => Ok(Value::Number((to_i32(to_number(l)) ^ to_i32(to_number(r))) as f64)),
        "<<" => Ok(Value::Number((to_i32(to_number(l)).wrapping_shl(to_u32(to_number(r)) & 31)) as f64)),
        ">>" => Ok(Value::Number((to_i32(to_number(l)).wrapping_shr(to_u32(to_number(r)) & 31)) as f64)),
        ">>>" => Ok(Value::Number((to_u32(to_number(l)).wrapping_shr(to_u32(to_number(r)) & 31)) as f64)),
        "in" => in_operator(l, r),
        "instanceof" => instanceof_operator(l, r),
        "|>" => Err(EvalError::not_implemented("pipeline operator `|>`")),
        other => Err(EvalError::not_implemented(format!("binary operator `{other}`"))),
    }
}

fn numeric_op(
    l: &Value,
    r: &Value,
    big: impl Fn(&BigInt, &BigInt) -> BigInt,
    num: impl Fn(f64, f64) -> f64,
) -> EvalResult<Value> {
    if let Some((a, b)) = as_bigints(l, r) {
        Ok(Value::BigInt(big(a, b)))
    } else {
        Ok(Value::Number(num(to_number(l), to_number(r))))
    }
}

fn compare(op: &str, l: &Value, r: &Value) -> EvalResult<Value> {
    let result = if let (Value::Str(a), Value::Str(b)) = (l, r) {
        match op {
            "<" => a < b,
            "<=" => a <= b,
            ">" => a > b,
            ">=" => a >= b,
            _ => unreachable!(),
        }
    } else {
        let (a, b) = (to_number(l), to_number(r));
        if a.is_nan() || b.is_nan() {
            false
        } else {
            match op {
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                ">=" => a >= b,
                _ => unreachable!(),
            }
        }
    };
    Ok(Value::Bool(result))
}

/// `in` against this crate's own object model (spec §9 resolution #3): an
/// array's "own keys" are its numeric indices plus `length`; every other
/// right-hand side (including a function handle) has no synthetic
/// properties of its own.
fn in_operator(l: &Value, r: &Value) -> EvalResult<Value> {
    match r {
        Value::Array(arr) => {
            let key = to_js_string(l);
            if key == "length" {
                return Ok(Value::Bool(true));
            }
            let is_member = key.parse::<usize>().map(|i| i < arr.borrow().len()).unwrap_or(false);
            Ok(Value::Bool(is_member))
        }
        _ => Ok(Value::Bool(false)),
    }
}

/// `instanceof` against this crate's object model (spec §9 resolution #3):
/// there is no prototype chain, so this is always false. Kept as an
/// explicit operator rather than folded into a catch-all so the behavioral
/// choice stays visible at the call site.
fn instanceof_operator(_l: &Value, _r: &Value) -> EvalResult<Value> {
    Ok(Value::Bool(false))
}

/// `typeof` (spec §4.3's unary table).
pub fn type_of(v: &Value) -> Value {
    Value::Str(v.type_of().to_string())
}

/// `!`, unary `+`, unary `-`, `~`, `void` over a concrete value.
pub fn unary(op: &str, v: &Value) -> EvalResult<Value> {
    match op {
        "!" => Ok(Value::Bool(!v.is_truthy())),
        "+" => match v {
            Value::BigInt(_) => Err(EvalError::not_implemented("unary `+` on bigint")),
            other => Ok(Value::Number(to_number(other))),
        },
        "-" => match v {
            Value::BigInt(b) => Ok(Value::BigInt(-b.clone())),
            other => Ok(Value::Number(-to_number(other))),
        },
        "~" => match v {
            Value::BigInt(b) => Ok(Value::BigInt(-(b + BigInt::from(1)))),
            other => Ok(Value::Number(!to_i32(to_number(other)) as f64)),
        },
        "void" => Ok(Value::Undefined),
        "typeof" => Ok(type_of(v)),
        other => Err(EvalError::not_implemented(format!("unary operator `{other}`"))),
    }
}

/// `++`/`--`: returns `(value_to_bind, value_to_yield)` honoring
/// prefix/postfix (spec §4.3's "Update expression").
pub fn update(op: &str, prefix: bool, v: &Value) -> EvalResult<(Value, Value)> {
    let delta = match op {
        "++" => 1.0,
        "--" => -1.0,
        other => return Err(EvalError::not_implemented(format!("update operator `{other}`"))),
    };
    if let Value::BigInt(b) = v {
        let next = if delta > 0.0 { b + BigInt::from(1) } else { b - BigInt::from(1) };
        let yielded = if prefix { next.clone() } else { b.clone() };
        return Ok((Value::BigInt(next), Value::BigInt(yielded)));
    }
    let current = to_number(v);
    let next = current + delta;
    Ok((Value::Number(next), Value::Number(if prefix { next } else { current })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_concatenation_wins_over_addition() {
        let r = binary("+", &Value::Str("a".into()), &Value::Number(1.0)).unwrap();
        assert!(matches!(r, Value::Str(s) if s == "a1"));
    }

    #[test]
    fn strict_equality_distinguishes_number_and_string() {
        let r = binary("===", &Value::Number(1.0), &Value::Str("1".into())).unwrap();
        assert_eq!(r.is_truthy(), false);
    }

    #[test]
    fn loose_equality_coerces_string_to_number() {
        let r = binary("==", &Value::Number(1.0), &Value::Str("1".into())).unwrap();
        assert!(r.is_truthy());
    }

    #[test]
    fn unsigned_right_shift_never_negative() {
        let r = binary(">>>", &Value::Number(-1.0), &Value::Number(0.0)).unwrap();
        assert!(matches!(r, Value::Number(n) if n == 4294967295.0));
    }

    #[test]
    fn bigint_arithmetic_stays_exact() {
        let a = Value::BigInt(BigInt::from(10).pow(30));
        let b = Value::BigInt(BigInt::from(1));
        let r = binary("+", &a, &b).unwrap();
        assert!(matches!(r, Value::BigInt(_)));
    }

    #[test]
    fn prefix_increment_yields_new_value() {
        let (stored, yielded) = update("++", true, &Value::Number(4.0)).unwrap();
        assert!(matches!(stored, Value::Number(n) if n == 5.0));
        assert!(matches!(yielded, Value::Number(n) if n == 5.0));
    }

    #[test]
    fn postfix_increment_yields_old_value() {
        let (stored, yielded) = update("++", false, &Value::Number(4.0)).unwrap();
        assert!(matches!(stored, Value::Number(n) if n == 5.0));
        assert!(matches!(yielded, Value::Number(n) if n == 4.0));
    }

    #[test]
    fn pipeline_operator_is_not_implemented() {
        assert!(binary("|>", &Value::Number(1.0), &Value::Number(2.0)).is_err());
    }

    #[test]
    fn in_operator_sees_length_and_indices() {
        let arr = Value::array(vec![crate::value::Carrier::concrete(Value::Number(1.0))]);
        assert!(binary("in", &Value::Str("length".into()), &arr).unwrap().is_truthy());
        assert!(binary("in", &Value::Str("0".into()), &arr).unwrap().is_truthy());
        assert!(!binary("in", &Value::Str("1".into()), &arr).unwrap().is_truthy());
    }
}
