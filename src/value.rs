//! Runtime value types for Vortex
//!
//! Values are trees: arrays and objects are shared through `Rc` and copied on
//! write, so assigning or passing them never aliases. A value is *concrete*
//! when no `Unknown` appears anywhere inside it.

use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::rc::Rc;

use crate::analyzer::Binding;
use crate::ast::{write_key, write_quoted, BinaryOp, FuncExpr};
use crate::methods::Method;
use crate::note::{Level, Note, Pos, Tags};
use crate::scope::Scope;

/// Width budget for the single-line form inside `long_string`.
const LONG_STRING_WIDTH: usize = 60;

/// Runtime values in Vortex
#[derive(Clone)]
pub enum Value {
    Null,

    Bool(bool),

    /// All numbers are 64-bit floats
    Number(f64),

    String(String),

    Func(Rc<Func>),

    Array(Rc<Vec<Value>>),

    /// Keys iterate in sorted order
    Object(Rc<BTreeMap<String, Value>>),

    /// Not statically determined. The level says how concerning that is.
    Unknown(Level),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(items))
    }

    pub fn object(entries: BTreeMap<String, Value>) -> Self {
        Value::Object(Rc::new(entries))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Func(_) => "func",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Unknown(_) => "unknown",
        }
    }

    /// Capitalised type name used in method names, e.g. `Array:map`.
    pub fn method_type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Number(_) => "Number",
            Value::String(_) => "String",
            Value::Func(_) => "Func",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
            Value::Unknown(_) => "Unknown",
        }
    }

    pub fn is_concrete(&self) -> bool {
        match self {
            Value::Unknown(_) => false,
            Value::Array(items) => items.iter().all(Value::is_concrete),
            Value::Object(entries) => entries.values().all(Value::is_concrete),
            _ => true,
        }
    }

    /// The most severe `Unknown` level inside this value, if any.
    pub fn unknown_level(&self) -> Option<Level> {
        match self {
            Value::Unknown(level) => Some(*level),
            Value::Array(items) => items.iter().filter_map(Value::unknown_level).max(),
            Value::Object(entries) => entries.values().filter_map(Value::unknown_level).max(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    fn has_nested_container(&self) -> bool {
        match self {
            Value::Array(items) => items.iter().any(Value::is_container),
            Value::Object(entries) => entries.values().any(Value::is_container),
            _ => false,
        }
    }

    /// Single-line Vortex literal form.
    pub fn compact_string(&self) -> String {
        self.to_string()
    }

    /// Multi-line form for nested structures that don't fit on one line.
    pub fn long_string(&self) -> String {
        let mut out = String::new();
        self.write_long(&mut out, 0);
        out
    }

    fn write_long(&self, out: &mut String, indent: usize) {
        let compact = self.compact_string();

        if !self.has_nested_container() || indent * 2 + compact.len() <= LONG_STRING_WIDTH {
            out.push_str(&compact);
            return;
        }

        let pad = "  ".repeat(indent + 1);

        match self {
            Value::Array(items) => {
                out.push_str("[\n");
                for item in items.iter() {
                    out.push_str(&pad);
                    item.write_long(out, indent + 1);
                    out.push_str(",\n");
                }
                out.push_str(&"  ".repeat(indent));
                out.push(']');
            }
            Value::Object(entries) => {
                out.push_str("{\n");
                for (key, value) in entries.iter() {
                    out.push_str(&pad);
                    // Writing to a String cannot fail.
                    let _ = write_key(out, key);
                    out.push_str(": ");
                    value.write_long(out, indent + 1);
                    out.push_str(",\n");
                }
                out.push_str(&"  ".repeat(indent));
                out.push('}');
            }
            _ => out.push_str(&compact),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write_quoted(f, s),
            Value::Func(func) => write!(f, "{}", func),
            Value::Array(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_char(']')
            }
            Value::Object(entries) => {
                f.write_char('{')?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_key(f, key)?;
                    write!(f, ": {}", value)?;
                }
                f.write_char('}')
            }
            Value::Unknown(_) => f.write_str("<unknown>"),
        }
    }
}

/// Structural equality for host-side comparisons; functions compare by
/// identity. Vortex `==` goes through `operators::typed_equal` instead.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Unknown(a), Value::Unknown(b)) => a == b,
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

/// What a function value runs when called.
#[derive(Clone)]
pub enum FuncDef {
    /// A user-defined function with the scope it closed over.
    Plain {
        expr: Rc<FuncExpr>,
        scope: Scope<Binding>,
        file: Rc<str>,
    },

    /// A built-in method already looked up on `base`.
    Method { base: Value, method: Method },

    /// A binary operator used as a value, e.g. `(+)`.
    Operator(BinaryOp),
}

/// A function value plus any partially applied arguments.
#[derive(Clone)]
pub struct Func {
    pub def: FuncDef,
    pub binds: Vec<Value>,
}

impl Func {
    pub fn new(def: FuncDef) -> Self {
        Func {
            def,
            binds: Vec::new(),
        }
    }

    /// Declared parameter count.
    pub fn param_count(&self) -> usize {
        match &self.def {
            FuncDef::Plain { expr, .. } => expr.params.len(),
            FuncDef::Method { method, .. } => method.arity(),
            FuncDef::Operator(_) => 2,
        }
    }

    /// Arguments still required by a call.
    pub fn arg_length(&self) -> usize {
        self.param_count().saturating_sub(self.binds.len())
    }

    /// A copy with `arg` appended to the bound arguments.
    pub fn bind(&self, arg: Value) -> Func {
        let mut bound = self.clone();
        bound.binds.push(arg);
        bound
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func")
            .field("def", &self.to_string())
            .field("binds", &self.binds)
            .finish()
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.def {
            FuncDef::Plain { expr, .. } => write!(f, "<func {}>", expr.display_name()),
            FuncDef::Method { base, method } => {
                write!(f, "<method {}:{}>", base.method_type_name(), method.name())
            }
            FuncDef::Operator(op) => write!(f, "<operator {}>", op),
        }
    }
}

/// A thrown exception. It is bare until it is first given a location.
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    Bare { tags: Tags, message: String },
    Located(Box<Note>),
}

impl Exception {
    pub fn new(tags: &[&'static str], message: impl Into<String>) -> Self {
        Exception::Bare {
            tags: tags.iter().copied().collect(),
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Exception::Bare { message, .. } => message,
            Exception::Located(note) => &note.message,
        }
    }

    pub fn tags(&self) -> &Tags {
        match self {
            Exception::Bare { tags, .. } => tags,
            Exception::Located(note) => &note.tags,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().contains(tag)
    }

    /// Attach a location. Already-located exceptions keep their origin.
    pub fn locate(self, pos: Pos) -> Exception {
        match self {
            Exception::Bare { tags, message } => {
                let mut note = Note::new(pos, Level::Error, &["exception"], message);
                note.add_tags(tags);
                Exception::Located(Box::new(note))
            }
            located => located,
        }
    }

    /// Record that the exception crossed the statement at `pos`. At most one
    /// trace subnote is kept per source line.
    pub fn unwind(self, pos: Pos) -> Exception {
        match self.locate(pos.clone()) {
            Exception::Located(mut note) => {
                if !note.subnotes.iter().any(|n| n.pos.same_line(&pos)) {
                    note.subnotes.push(Note::new(
                        pos,
                        Level::Info,
                        &["exception", "trace"],
                        "Exception propagated through here",
                    ));
                }
                Exception::Located(note)
            }
            bare => bare,
        }
    }

    /// The note describing this exception, located at `fallback` if it never
    /// got a position of its own.
    pub fn into_note(self, fallback: Pos) -> Note {
        match self.locate(fallback) {
            Exception::Located(note) => *note,
            Exception::Bare { message, .. } => {
                Note::new(Pos::file(""), Level::Error, &["exception"], message)
            }
        }
    }
}

/// The result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(Value),
    Exception(Exception),
}

impl Outcome {
    pub fn exception(tags: &[&'static str], message: impl Into<String>) -> Self {
        Outcome::Exception(Exception::new(tags, message))
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Outcome::Exception(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Value(value) => Some(value),
            Outcome::Exception(_) => None,
        }
    }

    pub fn long_string(&self) -> String {
        match self {
            Outcome::Value(value) => value.long_string(),
            Outcome::Exception(ex) => format!("<exception: {}>", ex.message()),
        }
    }
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        Outcome::Value(value)
    }
}

impl From<Exception> for Outcome {
    fn from(ex: Exception) -> Self {
        Outcome::Exception(ex)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(value) => write!(f, "{}", value),
            Outcome::Exception(ex) => write!(f, "<exception: {}>", ex.message()),
        }
    }
}

/// Loop control signal. Never escapes the loop that consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Break,
    Continue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::Range;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    fn obj(entries: &[(&str, Value)]) -> Value {
        Value::object(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    fn line_pos(line: usize, col: usize) -> Pos {
        Pos {
            file: "@/main.vx".into(),
            range: Some(Range {
                start: (line, col),
                end: (line, col + 1),
            }),
        }
    }

    #[test]
    fn test_compact_string() {
        let value = obj(&[
            ("b", Value::array(vec![num(1.0), num(2.5), Value::Null])),
            ("a", Value::from("it's")),
            ("two words", Value::Bool(true)),
        ]);
        assert_eq!(
            value.compact_string(),
            "{a: 'it\\'s', b: [1, 2.5, null], 'two words': true}"
        );
    }

    #[test]
    fn test_long_string_breaks_nested_structures() {
        let row = |n: f64| Value::array(vec![num(n); 8]);
        let matrix = Value::array(vec![row(1000.0), row(2000.0)]);
        let long = matrix.long_string();
        assert!(long.starts_with("[\n  [1000,"));
        assert!(long.ends_with(",\n]"));

        // Flat arrays stay on one line however long they are.
        let flat = Value::array(vec![num(123456789.0); 20]);
        assert!(!flat.long_string().contains('\n'));
    }

    #[test]
    fn test_concrete_and_unknown_level() {
        let value = Value::array(vec![num(1.0), Value::Unknown(Level::Warn)]);
        assert!(!value.is_concrete());
        assert_eq!(value.unknown_level(), Some(Level::Warn));

        let nested = obj(&[("x", value), ("y", Value::Unknown(Level::Error))]);
        assert_eq!(nested.unknown_level(), Some(Level::Error));
        assert!(obj(&[("x", num(1.0))]).is_concrete());
    }

    #[test]
    fn test_copy_on_write_arrays() {
        let x = Value::array(vec![num(5.0), num(6.0), num(7.0)]);
        let mut y = x.clone();
        if let Value::Array(items) = &mut y {
            Rc::make_mut(items)[1] = num(60.0);
        }
        assert_eq!(x.compact_string(), "[5, 6, 7]");
        assert_eq!(y.compact_string(), "[5, 60, 7]");
    }

    #[test]
    fn test_unwind_dedups_by_line() {
        let ex = Exception::new(&["type-error"], "boom");
        let ex = ex.unwind(line_pos(3, 5));
        let ex = ex.unwind(line_pos(3, 1));
        let ex = ex.unwind(line_pos(3, 9));
        let ex = ex.unwind(line_pos(4, 1));

        let Exception::Located(note) = ex else {
            panic!("expected a located exception");
        };
        assert_eq!(note.pos, line_pos(3, 5));
        assert!(note.has_tag("type-error"));
        assert!(note.has_tag("exception"));
        let lines: Vec<_> = note.subnotes.iter().map(|n| n.pos.line()).collect();
        assert_eq!(lines, vec![Some(3), Some(4)]);
    }

    #[test]
    fn test_locate_keeps_origin() {
        let ex = Exception::new(&[], "first").locate(line_pos(1, 1));
        let ex = ex.locate(line_pos(9, 9));
        assert_eq!(ex.into_note(line_pos(5, 5)).pos, line_pos(1, 1));
    }

    #[test]
    fn test_outcome_long_string_for_exception() {
        let out = Outcome::exception(&["x"], "nope");
        assert_eq!(out.long_string(), "<exception: nope>");
    }
}
