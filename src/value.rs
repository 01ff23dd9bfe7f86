//! This module defines the tagged [`Value`] type that represents every runtime datum,
//! together with the function representations ([`Native`] and [`Closure`]) and the
//! canonical printer.
//!
//! Ownership follows Rust's ordinary move semantics. `Clone` is the deep copy: lists,
//! strings and a closure's formals, body and captured [`Environment`] are all
//! duplicated, while a [`Native`] is copied by identity. Dropping a value releases
//! everything it owns, including a closure's environment.
//!
//! Equality is structural. Closures compare by formals and body only (the captured
//! environment is ignored) and natives compare by registry identity.

use std::fmt;

use crate::Error;
use crate::builtinops::BuiltinOp;
use crate::environment::Environment;

/// Type alias for number values in the interpreter
pub type NumberType = i64;

/// Tag of a [`Value`], used in error messages and type checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Function,
    Number,
    Error,
    Symbol,
    String,
    SExpr,
    QExpr,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Function => "Function",
            ValueType::Number => "Number",
            ValueType::Error => "Error",
            ValueType::Symbol => "Symbol",
            ValueType::String => "String",
            ValueType::SExpr => "S-Expression",
            ValueType::QExpr => "Q-Expression",
        };
        f.write_str(name)
    }
}

/// Core value type of the interpreter
///
/// To build values in code and tests, use the constructors:
/// - `Value::num(42)`, `Value::sym("x")`, `Value::str("hi")`, `Value::err("oops")`
/// - `Value::sexpr(vec![...])` for evaluable lists, `Value::qexpr(vec![...])` for literal ones
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(NumberType),
    Error(String),
    Symbol(String),
    String(String),
    Function(Function),
    /// Evaluable list: applying the first (evaluated) item to the rest
    SExpr(Vec<Value>),
    /// Literal list: never evaluated implicitly
    QExpr(Vec<Value>),
}

/// A callable value
#[derive(Debug, Clone, PartialEq)]
pub enum Function {
    Native(Native),
    Closure(Closure),
}

/// Reference to a host-implemented primitive in the builtin registry.
///
/// Natives are copied and compared by identity: two natives are equal only
/// when they refer to the same registry entry.
#[derive(Clone, Copy)]
pub struct Native(&'static BuiltinOp);

impl Native {
    pub fn new(op: &'static BuiltinOp) -> Self {
        Native(op)
    }

    pub fn op(&self) -> &'static BuiltinOp {
        self.0
    }

    pub fn name(&self) -> &'static str {
        self.0.name
    }
}

impl PartialEq for Native {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Native({})", self.0.name)
    }
}

/// User-defined function: formals, body and the environment its bindings land in.
///
/// The closure exclusively owns `env`. Binding arguments writes into it, which is how
/// a partially applied closure carries the arguments it has already received.
#[derive(Debug, Clone)]
pub struct Closure {
    /// Symbol names still waiting to be bound, in order (`&` included)
    pub formals: Vec<String>,
    /// Items of the body list; evaluated as an s-expression once all formals are bound
    pub body: Vec<Value>,
    pub env: Environment,
}

impl Closure {
    pub fn new(formals: Vec<String>, body: Vec<Value>) -> Self {
        Closure {
            formals,
            body,
            env: Environment::new(),
        }
    }
}

impl Closure {
    /// A closure is one level above its body list and the values bound in its scope
    fn nested_deeper_than(&self, limit: usize) -> bool {
        let Some(inner) = limit.checked_sub(1) else {
            return true;
        };
        list_deeper_than(&self.body, inner)
            || self.env.any_binding(|value| value.nested_deeper_than(inner))
    }
}

fn list_deeper_than(items: &[Value], limit: usize) -> bool {
    match limit.checked_sub(1) {
        Some(inner) => items.iter().any(|item| item.nested_deeper_than(inner)),
        None => true,
    }
}

impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        // The captured environment is deliberately not part of equality
        self.formals == other.formals && self.body == other.body
    }
}

impl Value {
    pub fn num(n: NumberType) -> Self {
        Value::Number(n)
    }

    pub fn err(message: impl Into<String>) -> Self {
        Value::Error(message.into())
    }

    pub fn sym(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    pub fn str(text: impl Into<String>) -> Self {
        Value::String(text.into())
    }

    pub fn sexpr(items: Vec<Value>) -> Self {
        Value::SExpr(items)
    }

    pub fn qexpr(items: Vec<Value>) -> Self {
        Value::QExpr(items)
    }

    /// The empty s-expression `()`, returned by side-effecting builtins
    pub fn unit() -> Self {
        Value::SExpr(Vec::new())
    }

    pub fn native(op: &'static BuiltinOp) -> Self {
        Value::Function(Function::Native(Native::new(op)))
    }

    pub fn lambda(formals: Vec<String>, body: Vec<Value>) -> Self {
        Value::Function(Function::Closure(Closure::new(formals, body)))
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Number(_) => ValueType::Number,
            Value::Error(_) => ValueType::Error,
            Value::Symbol(_) => ValueType::Symbol,
            Value::String(_) => ValueType::String,
            Value::Function(_) => ValueType::Function,
            Value::SExpr(_) => ValueType::SExpr,
            Value::QExpr(_) => ValueType::QExpr,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// True when lists and closures nest inside this value more than `limit` levels
    /// deep. Never descends further than `limit + 1` levels itself.
    pub fn nested_deeper_than(&self, limit: usize) -> bool {
        match self {
            Value::SExpr(items) | Value::QExpr(items) => list_deeper_than(items, limit),
            Value::Function(Function::Closure(closure)) => closure.nested_deeper_than(limit),
            _ => false,
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<NumberType> for Value {
    fn from(n: NumberType) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Number(b.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Errors cross into the language as ordinary values carrying their message
impl From<Error> for Value {
    fn from(err: Error) -> Self {
        Value::Error(err.to_string())
    }
}

/// Helper for building numbers in tests
#[cfg(test)]
pub(crate) fn num(n: NumberType) -> Value {
    Value::Number(n)
}

/// Helper for building symbols in tests
#[cfg(test)]
pub(crate) fn sym(name: &str) -> Value {
    Value::Symbol(name.to_owned())
}

/// Helper for building literal lists in tests
#[cfg(test)]
pub(crate) fn qexpr<const N: usize>(items: [Value; N]) -> Value {
    Value::QExpr(items.into())
}

/// Helper for building evaluable lists in tests
#[cfg(test)]
pub(crate) fn sexpr<const N: usize>(items: [Value; N]) -> Value {
    Value::SExpr(items.into())
}

fn write_seq<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    open: char,
    items: &[T],
    close: char,
) -> fmt::Result {
    write!(f, "{open}")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, "{close}")
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for ch in s.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            '\0' => write!(f, "\\0")?,
            '\u{7}' => write!(f, "\\a")?,
            '\u{8}' => write!(f, "\\b")?,
            '\u{b}' => write!(f, "\\v")?,
            '\u{c}' => write!(f, "\\f")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Error(message) => write!(f, "Error: {message}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::String(s) => write_escaped(f, s),
            Value::Function(func) => write!(f, "{func}"),
            Value::SExpr(items) => write_seq(f, '(', items, ')'),
            Value::QExpr(items) => write_seq(f, '{', items, '}'),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Native(_) => write!(f, "<builtin>"),
            Function::Closure(closure) => {
                write!(f, "(\\ ")?;
                write_seq(f, '{', &closure.formals, '}')?;
                write!(f, " ")?;
                write_seq(f, '{', &closure.body, '}')?;
                write!(f, ")")
            }
        }
    }
}
