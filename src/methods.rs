//! Built-in methods
//!
//! Methods are looked up with `value:Name` and called like any function.
//! `map`, `filter`, `reduce` and `reduceFrom` call back into user code, so
//! the analyzer runs them on its own trampoline; everything else is a plain
//! value transform implemented here.

use std::rc::Rc;

use crate::error::{Result, VortexError};
use crate::operators::{matrix_dimensions, transpose};
use crate::value::{Func, FuncDef, Outcome, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    String,
    Length,
    Chars,
    Entries,
    Keys,
    Values,
    First,
    Last,
    Head,
    Tail,
    Row,
    Column,
    Transpose,
    Map,
    Filter,
    Reduce,
    ReduceFrom,
    Bind,
}

const SCALAR_METHODS: &[Method] = &[Method::String];

const STRING_METHODS: &[Method] = &[Method::Length, Method::String, Method::Chars];

const ARRAY_METHODS: &[Method] = &[
    Method::Length,
    Method::Entries,
    Method::Keys,
    Method::Values,
    Method::First,
    Method::Last,
    Method::Head,
    Method::Tail,
    Method::Row,
    Method::Column,
    Method::String,
    Method::Transpose,
    Method::Map,
    Method::Filter,
    Method::Reduce,
    Method::ReduceFrom,
];

const OBJECT_METHODS: &[Method] = &[
    Method::Entries,
    Method::Keys,
    Method::Values,
    Method::String,
    Method::Transpose,
];

const FUNC_METHODS: &[Method] = &[Method::Bind];

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::String => "String",
            Method::Length => "Length",
            Method::Chars => "Chars",
            Method::Entries => "Entries",
            Method::Keys => "Keys",
            Method::Values => "Values",
            Method::First => "First",
            Method::Last => "Last",
            Method::Head => "Head",
            Method::Tail => "Tail",
            Method::Row => "Row",
            Method::Column => "Column",
            Method::Transpose => "Transpose",
            Method::Map => "map",
            Method::Filter => "filter",
            Method::Reduce => "reduce",
            Method::ReduceFrom => "reduceFrom",
            Method::Bind => "bind",
        }
    }

    /// Number of arguments a call must supply.
    pub fn arity(self) -> usize {
        match self {
            Method::Map | Method::Filter | Method::Reduce | Method::Bind => 1,
            Method::ReduceFrom => 2,
            _ => 0,
        }
    }

    /// Calls back into user functions.
    pub fn is_reentrant(self) -> bool {
        matches!(
            self,
            Method::Map | Method::Filter | Method::Reduce | Method::ReduceFrom
        )
    }

    /// Undefined on an empty array.
    pub fn needs_non_empty(self) -> bool {
        matches!(
            self,
            Method::First | Method::Last | Method::Head | Method::Tail | Method::Reduce
        )
    }
}

fn methods_of(base: &Value) -> &'static [Method] {
    match base {
        Value::Null | Value::Bool(_) | Value::Number(_) => SCALAR_METHODS,
        Value::String(_) => STRING_METHODS,
        Value::Array(_) => ARRAY_METHODS,
        Value::Object(_) => OBJECT_METHODS,
        Value::Func(_) => FUNC_METHODS,
        Value::Unknown(_) => &[],
    }
}

/// Registry lookup by type and name.
pub fn lookup_method(base: &Value, name: &str) -> Option<Method> {
    methods_of(base).iter().copied().find(|m| m.name() == name)
}

/// Evaluate `base:name`. Looking a method up on an `Unknown` gives an
/// `Unknown` back; a method that cannot apply to this particular base is
/// reported as not found.
pub fn method_lookup(base: Value, name: &str) -> Outcome {
    if let Value::Unknown(_) = base {
        return Outcome::Value(base);
    }

    let not_found = |shown: &str| {
        Outcome::exception(&["not-found"], format!("Method not found: {}:{}", shown, name))
    };

    let Some(method) = lookup_method(&base, name) else {
        return not_found(base.method_type_name());
    };

    if let Value::Array(items) = &base {
        if items.is_empty() && method.needs_non_empty() {
            return not_found("[]");
        }
    }

    if method == Method::Transpose && matrix_dimensions(&base).is_none() {
        return not_found(base.method_type_name());
    }

    Outcome::Value(Value::Func(Rc::new(Func::new(FuncDef::Method { base, method }))))
}

fn index(i: usize) -> Value {
    Value::Number(i as f64)
}

/// Run a method that does not call back into user code.
pub fn call_method(base: &Value, method: Method, args: &[Value]) -> Result<Outcome> {
    let out = match (method, base) {
        (Method::String, Value::String(s)) => Value::String(s.clone()),
        (Method::String, Value::Number(n)) => Value::String(n.to_string()),
        (Method::String, Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_)) => {
            Value::String(base.compact_string())
        }

        (Method::Length, Value::String(s)) => index(s.chars().count()),
        (Method::Length, Value::Array(items)) => index(items.len()),

        (Method::Chars, Value::String(s)) => {
            Value::array(s.chars().map(|c| Value::String(c.to_string())).collect())
        }

        (Method::Entries, Value::Array(items)) => Value::array(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| Value::array(vec![index(i), v.clone()]))
                .collect(),
        ),
        (Method::Entries, Value::Object(entries)) => Value::array(
            entries
                .iter()
                .map(|(k, v)| Value::array(vec![Value::string(k.as_str()), v.clone()]))
                .collect(),
        ),

        (Method::Keys, Value::Array(items)) => Value::array((0..items.len()).map(index).collect()),
        (Method::Keys, Value::Object(entries)) => {
            Value::array(entries.keys().map(|k| Value::string(k.as_str())).collect())
        }

        (Method::Values, Value::Array(_)) => base.clone(),
        (Method::Values, Value::Object(entries)) => {
            Value::array(entries.values().cloned().collect())
        }

        (Method::First, Value::Array(items)) => first(items.first())?,
        (Method::Last, Value::Array(items)) => first(items.last())?,
        (Method::Head, Value::Array(items)) => {
            Value::array(items[..items.len().saturating_sub(1)].to_vec())
        }
        (Method::Tail, Value::Array(items)) => {
            Value::array(items.iter().skip(1).cloned().collect())
        }

        (Method::Row, Value::Array(_)) => Value::array(vec![base.clone()]),
        (Method::Column, Value::Array(items)) => {
            Value::array(items.iter().map(|v| Value::array(vec![v.clone()])).collect())
        }

        (Method::Transpose, Value::Array(_) | Value::Object(_)) => transpose(base)
            .ok_or_else(|| VortexError::internal("transpose of a value that is not a matrix"))?,

        (Method::Bind, Value::Func(func)) => {
            let [arg] = args else {
                return Err(VortexError::internal("bind takes exactly one argument"));
            };

            if func.arg_length() == 0 {
                return Ok(Outcome::exception(
                    &["type-error", "bind-no-arguments"],
                    format!("Type error: cannot bind an argument to {} which takes none", func),
                ));
            }

            Value::Func(Rc::new(func.bind(arg.clone())))
        }

        _ => {
            return Err(VortexError::internal(format!(
                "method {}:{} has no direct implementation",
                base.method_type_name(),
                method.name()
            )))
        }
    };

    Ok(Outcome::Value(out))
}

fn first(value: Option<&Value>) -> Result<Value> {
    value
        .cloned()
        .ok_or_else(|| VortexError::internal("non-empty method reached an empty array"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn nums(items: &[f64]) -> Value {
        Value::array(items.iter().map(|n| Value::Number(*n)).collect())
    }

    fn call(base: Value, name: &str, args: &[Value]) -> Value {
        let method = lookup_method(&base, name).unwrap();
        match call_method(&base, method, args).unwrap() {
            Outcome::Value(v) => v,
            Outcome::Exception(ex) => panic!("unexpected exception: {}", ex.message()),
        }
    }

    fn exception_message(outcome: Outcome) -> String {
        match outcome {
            Outcome::Exception(ex) => ex.message().to_string(),
            Outcome::Value(v) => panic!("expected exception, got {}", v),
        }
    }

    #[test]
    fn test_registry_is_per_type() {
        assert_eq!(lookup_method(&Value::Number(1.0), "String"), Some(Method::String));
        assert_eq!(lookup_method(&Value::Number(1.0), "Length"), None);
        assert_eq!(lookup_method(&Value::string("x"), "Chars"), Some(Method::Chars));
        assert_eq!(lookup_method(&nums(&[]), "reduceFrom"), Some(Method::ReduceFrom));
        assert_eq!(lookup_method(&nums(&[]), "bind"), None);
    }

    #[test]
    fn test_head_and_tail() {
        assert_eq!(call(nums(&[1.0, 2.0, 3.0]), "Head", &[]), nums(&[1.0, 2.0]));
        assert_eq!(call(nums(&[1.0, 2.0, 3.0]), "Tail", &[]), nums(&[2.0, 3.0]));
        assert_eq!(call(nums(&[1.0, 2.0, 3.0]), "Last", &[]), Value::Number(3.0));
    }

    #[test]
    fn test_object_methods_use_sorted_keys() {
        let obj = Value::object(
            [("b", 2.0), ("a", 1.0)]
                .iter()
                .map(|(k, v)| (k.to_string(), Value::Number(*v)))
                .collect(),
        );
        assert_eq!(
            call(obj.clone(), "Keys", &[]),
            Value::array(vec![Value::string("a"), Value::string("b")])
        );
        assert_eq!(call(obj.clone(), "Values", &[]), nums(&[1.0, 2.0]));
        assert_eq!(call(obj, "String", &[]), Value::string("{a: 1, b: 2}"));
    }

    #[test]
    fn test_row_and_column() {
        assert_eq!(call(nums(&[1.0, 2.0]), "Row", &[]).to_string(), "[[1, 2]]");
        assert_eq!(call(nums(&[1.0, 2.0]), "Column", &[]).to_string(), "[[1], [2]]");
    }

    #[test]
    fn test_lookup_failures() {
        assert_eq!(
            exception_message(method_lookup(nums(&[]), "First")),
            "Method not found: []:First"
        );
        assert_eq!(
            exception_message(method_lookup(Value::Bool(true), "Length")),
            "Method not found: Bool:Length"
        );
        assert_eq!(
            exception_message(method_lookup(nums(&[1.0, 2.0]), "Transpose")),
            "Method not found: Array:Transpose"
        );
        assert!(matches!(
            method_lookup(Value::Unknown(crate::note::Level::Warn), "map"),
            Outcome::Value(Value::Unknown(_))
        ));
    }

    #[test]
    fn test_bind_reduces_arg_length() {
        let add = Value::Func(Rc::new(Func::new(FuncDef::Operator(crate::ast::BinaryOp::Add))));
        let bound = call(add, "bind", &[Value::Number(1.0)]);
        match bound {
            Value::Func(f) => assert_eq!(f.arg_length(), 1),
            other => panic!("expected func, got {}", other),
        }
    }
}
