//! Lispy - runtime core of a small Lisp-like language
//!
//! This crate provides a tagged value model, a lexically scoped environment chain and a
//! tree-walking evaluator with closures, automatic partial application, variadic binding
//! and built-in primitives. Errors are ordinary values rather than control-flow
//! exceptions: every failure surfaces as a [`value::Value::Error`] through the same
//! channel as a normal result.
//!
//! ```text
//! lispy> def {add} (\ {x y} {+ x y})
//! ()
//! lispy> def {inc} (add 1)
//! ()
//! lispy> inc 41
//! 42
//! lispy> (\ {x & xs} {xs}) 1 2 3
//! {2 3}
//! lispy> / 10 0
//! Error: Division by Zero!
//! ```
//!
//! ## Evaluation Model
//!
//! - **S-expressions** `( ... )` are evaluable: every child is evaluated left to right,
//!   the first error wins, and the first element is applied to the rest.
//! - **Q-expressions** `{ ... }` are literal lists, never evaluated implicitly. They hold
//!   data, lambda formals and bodies, and the branches of `if`.
//! - **Closures** bind their formals positionally. Supplying fewer arguments returns a
//!   partially applied closure; `&` in the formals collects the remaining arguments.
//! - **`def`** binds in the global environment, **`=`** in the current one.
//!
//! ## Ownership
//!
//! Argument lists are passed by value into natives and closures: the callee owns them
//! and releases them on every path. Copying a value is a deep copy, including a
//! closure's captured environment, so no two closures ever share a mutable scope.
//!
//! ## Modules
//!
//! - `value`: the tagged [`value::Value`] model and its printer
//! - `environment`: chained symbol tables
//! - `evaluator`: expression reduction and the function calling protocol
//! - `builtinops`: the registry of native primitives
//! - `reader` / `parser`: source text to AST nodes to values
//! - `interpreter`: convenience facade tying the pieces together

use std::fmt;

pub mod builtinops;
pub mod config;
pub mod environment;
pub mod evaluator;
pub mod interpreter;
pub mod parser;
pub mod reader;
mod stack;
pub mod value;

pub use config::{Config, ParseConfig};
pub use interpreter::Interpreter;
pub use value::Value;

use builtinops::Arity;
use value::ValueType;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, stray closing brackets)
    InvalidSyntax,
    /// Input ended before the expression was complete (unterminated string, unclosed list)
    Incomplete,
    /// Expression nesting exceeded the configured parse depth
    TooDeeplyNested,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 60 chars)
    pub context: Option<String>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, context: Option<String>) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
        }
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 60;

        // Show a little of what came before the error
        let context_start = input
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|&i| i <= error_offset.saturating_sub(20))
            .last()
            .unwrap_or(0);

        let context_str: String = input[context_start..].chars().take(MAX_CONTEXT).collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context))
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(context) = &self.context {
            write!(f, " (near: {context})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Every failure the runtime can produce.
///
/// The `Display` text of a variant is exactly the message carried by the
/// [`Value::Error`] it turns into, so natives can build errors with `?` and the
/// registry folds them into values at the language boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Unbound Symbol '{0}'")]
    UnboundSymbol(String),

    #[error(
        "Function '{function}' passed incorrect type for argument {index}. Got {got}, Expected {expected}."
    )]
    IncorrectType {
        function: String,
        index: usize,
        got: ValueType,
        expected: ValueType,
    },

    #[error(
        "Function '{function}' passed incorrect number of arguments. Got {got}, Expected {expected}."
    )]
    IncorrectArgCount {
        function: String,
        got: usize,
        expected: Arity,
    },

    #[error("Function '{function}' passed {{}} for argument {index}.")]
    EmptyList { function: String, index: usize },

    #[error("S-Expression starts with incorrect type. Got {0}, Expected Function.")]
    NotAFunction(ValueType),

    #[error("Function passed too many arguments. Got {got}, Expected {expected}.")]
    TooManyArguments { got: usize, expected: usize },

    #[error("Function format invalid. Symbol '&' not followed by single symbol.")]
    InvalidFormat,

    #[error("Cannot define non-symbol argument {index}. Got {got}, Expected Symbol.")]
    NonSymbolFormal { index: usize, got: ValueType },

    #[error(
        "Function '{function}' passed too many arguments for symbols. Got {symbols}, Expected {values}."
    )]
    SymbolCountMismatch {
        function: String,
        symbols: usize,
        values: usize,
    },

    #[error("Division by Zero!")]
    DivisionByZero,

    #[error("Integer overflow in {0}")]
    Overflow(&'static str),

    #[error("Negative exponent {0} not supported")]
    NegativeExponent(i64),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Evaluation depth limit exceeded (max: {0})")]
    RecursionLimit(usize),

    #[error("Value nesting limit exceeded (max: {0})")]
    NestingLimit(usize),

    #[error("Could not load Library {path}: {reason}")]
    Load { path: String, reason: String },

    /// Raised explicitly by user code through the `error` builtin
    #[error("{0}")]
    User(String),
}

impl Error {
    pub(crate) fn incorrect_type(
        function: &str,
        index: usize,
        got: ValueType,
        expected: ValueType,
    ) -> Self {
        Error::IncorrectType {
            function: function.to_owned(),
            index,
            got,
            expected,
        }
    }
}
