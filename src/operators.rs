//! Binary operators over values
//!
//! Everything here is pure: operands in, `Outcome` out. A bare `Exception`
//! is returned for user-visible type errors and the evaluator attaches the
//! location. `Err` is reserved for comparisons that should have been ruled
//! out before they got here.

use std::collections::BTreeMap;
use std::fmt;

use crate::ast::BinaryOp;
use crate::error::{Result, VortexError};
use crate::note::Level;
use crate::value::{Exception, Outcome, Value};

/// Structural type equality. Containers match only when every element does,
/// by position for arrays and by key for objects.
pub fn same_type(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null)
        | (Value::Bool(_), Value::Bool(_))
        | (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::String(_)) => true,
        (Value::Func(l), Value::Func(r)) => {
            std::mem::discriminant(&l.def) == std::mem::discriminant(&r.def)
                && l.arg_length() == r.arg_length()
        }
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r.iter()).all(|(a, b)| same_type(a, b))
        }
        (Value::Object(l), Value::Object(r)) => {
            l.len() == r.len()
                && l.iter()
                    .zip(r.iter())
                    .all(|((lk, lv), (rk, rv))| lk == rk && same_type(lv, rv))
        }
        _ => false,
    }
}

fn comparison_error(left: &Value, op: &str, right: &Value) -> Outcome {
    Outcome::exception(
        &["type-error", "comparison"],
        format!("Type error: {} {} {}", left, op, right),
    )
}

/// `==` over concrete values of the same type. Functions have no equality.
pub fn typed_equal(left: &Value, right: &Value) -> Result<Outcome> {
    if !same_type(left, right) {
        return Ok(comparison_error(left, "==", right));
    }

    typed_equal_inner(left, right).map(|eq| Outcome::Value(Value::Bool(eq)))
}

fn typed_equal_inner(left: &Value, right: &Value) -> Result<bool> {
    match (left, right) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Bool(l), Value::Bool(r)) => Ok(l == r),
        (Value::Number(l), Value::Number(r)) => Ok(l == r),
        (Value::String(l), Value::String(r)) => Ok(l == r),
        (Value::Array(l), Value::Array(r)) => {
            for (a, b) in l.iter().zip(r.iter()) {
                if !typed_equal_inner(a, b)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Object(l), Value::Object(r)) => {
            for (a, b) in l.values().zip(r.values()) {
                if !typed_equal_inner(a, b)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Func(_), Value::Func(_)) => {
            Err(VortexError::internal("equality of functions is not defined"))
        }
        _ => Err(VortexError::internal(format!(
            "typed equality on mismatched types {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// `<` over concrete values of the same type. Containers compare
/// lexicographically, objects in key order.
pub fn typed_less_than(left: &Value, right: &Value) -> Outcome {
    if !same_type(left, right) {
        return comparison_error(left, "<", right);
    }

    match less_than_inner(left, right) {
        Ok(lt) => Outcome::Value(Value::Bool(lt)),
        Err(ex) => Outcome::Exception(ex),
    }
}

fn less_than_inner(left: &Value, right: &Value) -> std::result::Result<bool, Exception> {
    match (left, right) {
        (Value::Null, Value::Null) => Ok(false),
        (Value::Bool(l), Value::Bool(r)) => Ok(!l & r),
        (Value::Number(l), Value::Number(r)) => Ok(l < r),
        (Value::String(l), Value::String(r)) => Ok(l < r),
        (Value::Array(l), Value::Array(r)) => lexicographic(l.iter().zip(r.iter())),
        (Value::Object(l), Value::Object(r)) => lexicographic(l.values().zip(r.values())),
        _ => Err(Exception::new(
            &["type-error", "function-comparison"],
            format!("Type error: {} < {}", left, right),
        )),
    }
}

fn lexicographic<'a>(
    pairs: impl Iterator<Item = (&'a Value, &'a Value)>,
) -> std::result::Result<bool, Exception> {
    for (a, b) in pairs {
        if less_than_inner(a, b)? {
            return Ok(true);
        }
        if less_than_inner(b, a)? {
            return Ok(false);
        }
    }
    Ok(false)
}

fn invert(outcome: Outcome) -> Outcome {
    match outcome {
        Outcome::Value(Value::Bool(b)) => Outcome::Value(Value::Bool(!b)),
        other => other,
    }
}

/// Dispatch one of the six comparison operators.
pub fn typed_comparison(op: BinaryOp, left: &Value, right: &Value) -> Result<Outcome> {
    let out = match op {
        BinaryOp::Eq => typed_equal(left, right)?,
        BinaryOp::Ne => invert(typed_equal(left, right)?),
        BinaryOp::Lt => typed_less_than(left, right),
        BinaryOp::Gt => typed_less_than(right, left),
        BinaryOp::Le => invert(typed_less_than(right, left)),
        BinaryOp::Ge => invert(typed_less_than(left, right)),
        _ => {
            return Err(VortexError::internal(format!(
                "'{}' is not a comparison operator",
                op
            )))
        }
    };

    Ok(out)
}

// ==================== Matrices ====================

/// One side of a matrix: a length for arrays, the sorted keys for objects.
#[derive(Debug, Clone, PartialEq)]
pub enum Dimension {
    Len(usize),
    Keys(Vec<String>),
}

impl Dimension {
    fn of(value: &Value) -> Option<Dimension> {
        match value {
            Value::Array(items) => Some(Dimension::Len(items.len())),
            Value::Object(entries) => Some(Dimension::Keys(entries.keys().cloned().collect())),
            _ => None,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Dimension::Len(n) => *n == 0,
            Dimension::Keys(keys) => keys.is_empty(),
        }
    }

    fn get<'a>(&self, container: &'a Value, i: usize) -> Option<&'a Value> {
        match (self, container) {
            (Dimension::Len(_), Value::Array(items)) => items.get(i),
            (Dimension::Keys(keys), Value::Object(entries)) => entries.get(keys.get(i)?),
            _ => None,
        }
    }

    fn size(&self) -> usize {
        match self {
            Dimension::Len(n) => *n,
            Dimension::Keys(keys) => keys.len(),
        }
    }

    /// Collect one value per index into a container of this shape.
    fn build(&self, values: Vec<Value>) -> Value {
        match self {
            Dimension::Len(_) => Value::array(values),
            Dimension::Keys(keys) => Value::object(keys.iter().cloned().zip(values).collect()),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Len(n) => write!(f, "{}", n),
            Dimension::Keys(keys) => write!(f, "{{{}}}", keys.join(",")),
        }
    }
}

/// Rows and columns of a matrix: a non-empty array or object whose elements
/// are non-empty arrays or objects sharing one dimension.
pub fn matrix_dimensions(value: &Value) -> Option<(Dimension, Dimension)> {
    let rows = Dimension::of(value)?;
    if rows.is_empty() {
        return None;
    }

    let first = Dimension::of(rows.get(value, 0)?)?;
    if first.is_empty() {
        return None;
    }

    for i in 1..rows.size() {
        if Dimension::of(rows.get(value, i)?)? != first {
            return None;
        }
    }

    Some((rows, first))
}

/// A container with an `Unknown` where a row should be. Its shape as a
/// matrix cannot be known.
fn has_unknown_row(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|v| matches!(v, Value::Unknown(_))),
        Value::Object(entries) => entries.values().any(|v| matches!(v, Value::Unknown(_))),
        _ => false,
    }
}

/// Swap rows and columns. `None` if `value` is not a matrix.
pub fn transpose(value: &Value) -> Option<Value> {
    let (rows, cols) = matrix_dimensions(value)?;

    let mut out = Vec::with_capacity(cols.size());
    for j in 0..cols.size() {
        let mut column = Vec::with_capacity(rows.size());
        for i in 0..rows.size() {
            column.push(cols.get(rows.get(value, i)?, j)?.clone());
        }
        out.push(rows.build(column));
    }

    Some(cols.build(out))
}

fn matrix_multiply(left: &Value, right: &Value) -> Option<Outcome> {
    let (left_rows, left_cols) = matrix_dimensions(left)?;
    let (right_rows, right_cols) = matrix_dimensions(right)?;

    if left_cols != right_rows {
        return Some(Outcome::exception(
            &["type-error", "matrix-multiplication"],
            format!(
                "Type error: cannot multiply a {}x{} matrix by a {}x{} matrix",
                left_rows, left_cols, right_rows, right_cols
            ),
        ));
    }

    let mut rows = Vec::with_capacity(left_rows.size());
    for i in 0..left_rows.size() {
        let row = left_rows.get(left, i)?;
        let mut cells = Vec::with_capacity(right_cols.size());

        for j in 0..right_cols.size() {
            let mut sum = Value::Number(0.0);
            for k in 0..left_cols.size() {
                let a = left_cols.get(row, k)?;
                let b = right_cols.get(right_rows.get(right, k)?, j)?;
                if !is_scalar(a) || !is_scalar(b) {
                    return None;
                }
                sum = elementwise(&sum, &multiply(a, b)?, |x, y| x + y)?;
            }
            cells.push(sum);
        }

        rows.push(right_cols.build(cells));
    }

    Some(Outcome::Value(left_rows.build(rows)))
}

// ==================== Arithmetic ====================

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Number(_) | Value::Unknown(_))
}

/// The `Unknown` that results from combining two operands, at least one of
/// which is (or contains) an `Unknown`.
fn unknown_of(left: &Value, right: &Value) -> Value {
    Value::Unknown(
        left.unknown_level()
            .max(right.unknown_level())
            .unwrap_or(Level::Info),
    )
}

/// Apply `f` leaf by leaf. Containers must have exactly the same shape.
fn elementwise(left: &Value, right: &Value, f: fn(f64, f64) -> f64) -> Option<Value> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => Some(Value::Number(f(*l, *r))),
        (Value::Array(l), Value::Array(r)) => {
            if l.len() != r.len() {
                return None;
            }
            let items = l
                .iter()
                .zip(r.iter())
                .map(|(a, b)| elementwise(a, b, f))
                .collect::<Option<Vec<_>>>()?;
            Some(Value::array(items))
        }
        (Value::Object(l), Value::Object(r)) => {
            if l.len() != r.len() {
                return None;
            }
            let entries = l
                .iter()
                .zip(r.iter())
                .map(|((lk, lv), (rk, rv))| {
                    (lk == rk).then(|| elementwise(lv, rv, f).map(|v| (lk.clone(), v)))?
                })
                .collect::<Option<BTreeMap<_, _>>>()?;
            Some(Value::object(entries))
        }
        (
            Value::Unknown(_),
            Value::Unknown(_) | Value::Number(_) | Value::Array(_) | Value::Object(_),
        )
        | (Value::Number(_) | Value::Array(_) | Value::Object(_), Value::Unknown(_)) => {
            Some(unknown_of(left, right))
        }
        _ => None,
    }
}

/// Apply `f(leaf, scalar)` to every leaf of `container`.
fn broadcast(
    container: &Value,
    scalar: &Value,
    f: &dyn Fn(&Value, &Value) -> Option<Value>,
) -> Option<Value> {
    match container {
        Value::Array(items) => {
            let items = items
                .iter()
                .map(|v| broadcast(v, scalar, f))
                .collect::<Option<Vec<_>>>()?;
            Some(Value::array(items))
        }
        Value::Object(entries) => {
            let entries = entries
                .iter()
                .map(|(k, v)| broadcast(v, scalar, f).map(|v| (k.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()?;
            Some(Value::object(entries))
        }
        leaf => f(leaf, scalar),
    }
}

fn scalar_op(left: &Value, right: &Value, f: fn(f64, f64) -> f64) -> Option<Value> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => Some(Value::Number(f(*l, *r))),
        _ if is_scalar(left) && is_scalar(right) => Some(unknown_of(left, right)),
        _ => None,
    }
}

fn repeat(s: &str, n: f64) -> Option<Value> {
    (n >= 0.0 && n.fract() == 0.0 && n.is_finite()).then(|| Value::String(s.repeat(n as usize)))
}

fn multiply(left: &Value, right: &Value) -> Option<Value> {
    match (left, right) {
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            repeat(s, *n)
        }
        (Value::Array(_) | Value::Object(_), s) if is_scalar(s) => {
            broadcast(left, s, &|leaf: &Value, s: &Value| scalar_op(s, leaf, |a, b| a * b))
        }
        (s, Value::Array(_) | Value::Object(_)) if is_scalar(s) => {
            broadcast(right, s, &|leaf: &Value, s: &Value| scalar_op(s, leaf, |a, b| a * b))
        }
        _ => scalar_op(left, right, |a, b| a * b),
    }
}

fn divide(left: &Value, right: &Value) -> Option<Value> {
    match (left, right) {
        (Value::Array(_) | Value::Object(_), s) if is_scalar(s) => {
            broadcast(left, s, &|leaf: &Value, s: &Value| scalar_op(leaf, s, |a, b| a / b))
        }
        _ => scalar_op(left, right, |a, b| a / b),
    }
}

/// Numbers convert to 32-bit integers for bitwise operators, wrapping.
fn to_i32(n: f64) -> i32 {
    (n as i64) as i32
}

fn concat(left: &Value, right: &Value) -> Option<Outcome> {
    let value = match (left, right) {
        (Value::String(l), Value::String(r)) => Value::String(format!("{}{}", l, r)),
        (Value::Array(l), Value::Array(r)) => {
            Value::array(l.iter().chain(r.iter()).cloned().collect())
        }
        (Value::Object(l), Value::Object(r)) => {
            if let Some(key) = r.keys().find(|k| l.contains_key(*k)) {
                return Some(Outcome::exception(
                    &["duplicate", "duplicate-key", "object-addition"],
                    format!("Type error: objects cannot be added due to duplicate key {}", key),
                ));
            }
            let mut entries = (**l).clone();
            entries.extend(r.iter().map(|(k, v)| (k.clone(), v.clone())));
            Value::object(entries)
        }
        (
            Value::Unknown(_),
            Value::Unknown(_) | Value::String(_) | Value::Array(_) | Value::Object(_),
        )
        | (Value::String(_) | Value::Array(_) | Value::Object(_), Value::Unknown(_)) => {
            unknown_of(left, right)
        }
        _ => return None,
    };

    Some(Outcome::Value(value))
}

/// `&&` and `||`. An `Unknown` side only matters when the known side does
/// not decide the result by itself.
fn logical(op: BinaryOp, left: &Value, right: &Value) -> Option<Value> {
    let decisive = op == BinaryOp::Or;

    match (left, right) {
        (Value::Bool(l), Value::Bool(r)) => {
            Some(Value::Bool(if decisive { *l || *r } else { *l && *r }))
        }
        (Value::Bool(b), Value::Unknown(_)) | (Value::Unknown(_), Value::Bool(b)) => {
            Some(if *b == decisive { Value::Bool(decisive) } else { unknown_of(left, right) })
        }
        (Value::Unknown(_), Value::Unknown(_)) => Some(unknown_of(left, right)),
        _ => None,
    }
}

/// Evaluate a binary operator on two already evaluated operands.
pub fn eval_vanilla_operator(op: BinaryOp, left: &Value, right: &Value) -> Result<Outcome> {
    let value = match op {
        BinaryOp::Add => elementwise(left, right, |a, b| a + b),
        BinaryOp::Sub => elementwise(left, right, |a, b| a - b),
        BinaryOp::Concat => {
            return Ok(concat(left, right).unwrap_or_else(|| operator_error(op, left, right)))
        }
        BinaryOp::Mul => {
            if matches!(left, Value::Array(_) | Value::Object(_))
                && matches!(right, Value::Array(_) | Value::Object(_))
            {
                return Ok(match matrix_multiply(left, right) {
                    Some(outcome) => outcome,
                    None if has_unknown_row(left) || has_unknown_row(right) => {
                        Outcome::Value(unknown_of(left, right))
                    }
                    None => operator_error(op, left, right),
                });
            }
            multiply(left, right)
        }
        BinaryOp::Div => divide(left, right),
        BinaryOp::Mod => scalar_op(left, right, |a, b| a % b),
        BinaryOp::Pow => scalar_op(left, right, f64::powf),
        BinaryOp::Shl => scalar_op(left, right, |a, b| {
            to_i32(a).wrapping_shl(to_i32(b) as u32 & 31) as f64
        }),
        BinaryOp::Shr => scalar_op(left, right, |a, b| {
            to_i32(a).wrapping_shr(to_i32(b) as u32 & 31) as f64
        }),
        BinaryOp::BitAnd => scalar_op(left, right, |a, b| (to_i32(a) & to_i32(b)) as f64),
        BinaryOp::BitOr => scalar_op(left, right, |a, b| (to_i32(a) | to_i32(b)) as f64),
        BinaryOp::BitXor => scalar_op(left, right, |a, b| (to_i32(a) ^ to_i32(b)) as f64),
        BinaryOp::And | BinaryOp::Or => logical(op, left, right),
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            // TODO: shapes alone can sometimes decide comparisons of
            // non-concrete containers, e.g. arrays of different lengths.
            if !left.is_concrete() || !right.is_concrete() {
                return Ok(Outcome::Value(Value::Unknown(Level::Error)));
            }
            return typed_comparison(op, left, right);
        }
    };

    Ok(value.map_or_else(|| operator_error(op, left, right), Outcome::Value))
}

fn operator_error(op: BinaryOp, left: &Value, right: &Value) -> Outcome {
    Outcome::exception(
        &["type-error", "operator"],
        format!(
            "Type error: {} {} {}",
            left.method_type_name(),
            op,
            right.method_type_name()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    fn arr(items: &[Value]) -> Value {
        Value::array(items.to_vec())
    }

    fn nums(items: &[f64]) -> Value {
        Value::array(items.iter().map(|n| num(*n)).collect())
    }

    fn obj(entries: &[(&str, Value)]) -> Value {
        Value::object(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    fn eval(op: BinaryOp, l: &Value, r: &Value) -> Outcome {
        eval_vanilla_operator(op, l, r).unwrap()
    }

    fn value(outcome: Outcome) -> Value {
        match outcome {
            Outcome::Value(v) => v,
            Outcome::Exception(ex) => panic!("unexpected exception: {}", ex.message()),
        }
    }

    #[test]
    fn test_same_type_checks_every_key() {
        let a = obj(&[("a", num(1.0)), ("b", num(2.0))]);
        let b = obj(&[("a", num(3.0)), ("b", Value::string("x"))]);
        assert!(!same_type(&a, &b));
        assert!(same_type(&a, &obj(&[("a", num(0.0)), ("b", num(0.0))])));
        assert!(!same_type(&nums(&[1.0]), &nums(&[1.0, 2.0])));
    }

    #[test]
    fn test_comparisons() {
        let t = |op, l: &Value, r: &Value| value(typed_comparison(op, l, r).unwrap());
        assert_eq!(t(BinaryOp::Lt, &nums(&[1.0, 5.0]), &nums(&[2.0, 0.0])), Value::Bool(true));
        assert_eq!(t(BinaryOp::Ge, &nums(&[1.0, 5.0]), &nums(&[1.0, 5.0])), Value::Bool(true));
        assert_eq!(t(BinaryOp::Gt, &Value::Bool(true), &Value::Bool(false)), Value::Bool(true));
        assert_eq!(t(BinaryOp::Ne, &Value::string("a"), &Value::string("b")), Value::Bool(true));
        assert_eq!(t(BinaryOp::Le, &Value::Null, &Value::Null), Value::Bool(true));
    }

    #[test]
    fn test_comparison_type_mismatch() {
        match typed_comparison(BinaryOp::Eq, &num(1.0), &Value::string("1")).unwrap() {
            Outcome::Exception(ex) => {
                assert!(ex.has_tag("comparison"));
                assert_eq!(ex.message(), "Type error: 1 == '1'");
            }
            other => panic!("expected exception, got {}", other),
        }
    }

    #[test]
    fn test_comparison_with_unknown_is_unknown() {
        let partial = arr(&[num(1.0), Value::Unknown(Level::Info)]);
        assert_eq!(
            value(eval(BinaryOp::Eq, &partial, &nums(&[1.0, 2.0]))),
            Value::Unknown(Level::Error)
        );
    }

    #[test]
    fn test_elementwise_add() {
        let l = obj(&[("x", nums(&[1.0, 2.0])), ("y", num(3.0))]);
        let r = obj(&[("x", nums(&[10.0, 20.0])), ("y", num(30.0))]);
        assert_eq!(
            value(eval(BinaryOp::Add, &l, &r)),
            obj(&[("x", nums(&[11.0, 22.0])), ("y", num(33.0))])
        );

        let out = eval(BinaryOp::Add, &nums(&[1.0]), &nums(&[1.0, 2.0]));
        assert!(matches!(
            out,
            Outcome::Exception(ref ex) if ex.message() == "Type error: Array + Array"
        ));
    }

    #[test]
    fn test_unknown_propagates_highest_level() {
        let out = eval(BinaryOp::Sub, &Value::Unknown(Level::Warn), &num(1.0));
        assert_eq!(value(out), Value::Unknown(Level::Warn));

        let l = arr(&[Value::Unknown(Level::Error), num(1.0)]);
        let out = eval(BinaryOp::Add, &l, &nums(&[1.0, 1.0]));
        assert_eq!(value(out), arr(&[Value::Unknown(Level::Error), num(2.0)]));
    }

    #[test]
    fn test_concat() {
        assert_eq!(
            value(eval(BinaryOp::Concat, &obj(&[("a", num(1.0))]), &obj(&[("b", num(2.0))]))),
            obj(&[("a", num(1.0)), ("b", num(2.0))])
        );
        assert_eq!(
            value(eval(BinaryOp::Concat, &Value::string("ab"), &Value::string("c"))),
            Value::string("abc")
        );

        match eval(BinaryOp::Concat, &obj(&[("a", num(1.0))]), &obj(&[("a", num(2.0))])) {
            Outcome::Exception(ex) => assert!(ex.has_tag("duplicate-key")),
            other => panic!("expected exception, got {}", other),
        }

        assert!(eval(BinaryOp::Concat, &num(1.0), &Value::Unknown(Level::Info)).is_exception());
    }

    #[test]
    fn test_scalar_broadcast_and_string_repeat() {
        assert_eq!(
            value(eval(BinaryOp::Mul, &num(2.0), &arr(&[nums(&[1.0, 2.0]), num(3.0)]))),
            arr(&[nums(&[2.0, 4.0]), num(6.0)])
        );
        assert_eq!(
            value(eval(BinaryOp::Div, &obj(&[("a", num(3.0))]), &num(2.0))),
            obj(&[("a", num(1.5))])
        );
        assert_eq!(
            value(eval(BinaryOp::Mul, &Value::string("ab"), &num(3.0))),
            Value::string("ababab")
        );
        assert!(eval(BinaryOp::Mul, &Value::string("ab"), &num(0.5)).is_exception());
    }

    #[test]
    fn test_matrix_multiply_shapes() {
        // 2x3 * 3x1 = 2x1
        let a = arr(&[nums(&[1.0, 2.0, 3.0]), nums(&[4.0, 5.0, 6.0])]);
        let b = arr(&[nums(&[1.0]), nums(&[0.0]), nums(&[2.0])]);
        assert_eq!(value(eval(BinaryOp::Mul, &a, &b)), arr(&[nums(&[7.0]), nums(&[16.0])]));

        match eval(BinaryOp::Mul, &a, &a) {
            Outcome::Exception(ex) => {
                assert!(ex.has_tag("type-error"));
                assert_eq!(
                    ex.message(),
                    "Type error: cannot multiply a 2x3 matrix by a 2x3 matrix"
                );
            }
            other => panic!("expected exception, got {}", other),
        }
    }

    #[test]
    fn test_matrix_multiply_with_unknown_rows() {
        let a = arr(&[nums(&[1.0, 2.0]), Value::Unknown(Level::Warn)]);
        let b = arr(&[nums(&[1.0]), nums(&[2.0])]);
        assert_eq!(value(eval(BinaryOp::Mul, &a, &b)), Value::Unknown(Level::Warn));
        assert_eq!(value(eval(BinaryOp::Mul, &b, &a)), Value::Unknown(Level::Warn));

        // Unknown cells still multiply through
        let c = arr(&[arr(&[num(1.0), Value::Unknown(Level::Info)])]);
        assert_eq!(value(eval(BinaryOp::Mul, &c, &b)), arr(&[arr(&[Value::Unknown(Level::Info)])]));
    }

    #[test]
    fn test_matrix_multiply_with_keys() {
        let a = obj(&[("r", obj(&[("x", num(1.0)), ("y", num(2.0))]))]);
        let b = obj(&[
            ("x", arr(&[num(3.0)])),
            ("y", arr(&[num(4.0)])),
        ]);
        assert_eq!(value(eval(BinaryOp::Mul, &a, &b)), obj(&[("r", nums(&[11.0]))]));
    }

    #[test]
    fn test_transpose() {
        let m = arr(&[nums(&[1.0, 2.0]), nums(&[3.0, 4.0]), nums(&[5.0, 6.0])]);
        assert_eq!(
            transpose(&m),
            Some(arr(&[nums(&[1.0, 3.0, 5.0]), nums(&[2.0, 4.0, 6.0])]))
        );

        let ragged = arr(&[nums(&[1.0]), nums(&[1.0, 2.0])]);
        assert_eq!(transpose(&ragged), None);
        assert_eq!(transpose(&arr(&[])), None);

        let o = obj(&[("a", obj(&[("x", num(1.0))])), ("b", obj(&[("x", num(2.0))]))]);
        assert_eq!(
            transpose(&o),
            Some(obj(&[("x", obj(&[("a", num(1.0)), ("b", num(2.0))]))]))
        );
    }

    #[test]
    fn test_bitwise_uses_32_bit_integers() {
        assert_eq!(value(eval(BinaryOp::Shl, &num(1.0), &num(33.0))), num(2.0));
        assert_eq!(value(eval(BinaryOp::Shr, &num(-8.0), &num(1.0))), num(-4.0));
        assert_eq!(value(eval(BinaryOp::BitXor, &num(5.5), &num(1.0))), num(4.0));
        assert_eq!(value(eval(BinaryOp::Shl, &num(1.0), &num(31.0))), num(-2147483648.0));
    }

    #[test]
    fn test_logical_short_circuit_with_unknown() {
        let u = Value::Unknown(Level::Warn);
        assert_eq!(value(eval(BinaryOp::And, &Value::Bool(false), &u)), Value::Bool(false));
        assert_eq!(value(eval(BinaryOp::And, &u, &Value::Bool(true))), u);
        assert_eq!(value(eval(BinaryOp::Or, &u, &Value::Bool(true))), Value::Bool(true));
        assert!(eval(BinaryOp::Or, &num(1.0), &Value::Bool(true)).is_exception());
    }
}
