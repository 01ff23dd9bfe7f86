//! Built-in operations registry.
//!
//! Every primitive is described once by a [`BuiltinOp`] entry in a static table: its
//! name, its [`Arity`] and the native function implementing it. At startup
//! [`register_builtins`] binds each entry into the global environment as a
//! [`Native`] value, so evaluation never dispatches on operator names again.
//!
//! ## Calling Convention
//!
//! Natives have the signature
//! `fn(&mut Context, &Environment, Vec<Value>) -> Result<Value, Error>`.
//!
//! - The argument vector is passed **by value**: the native owns it and every path,
//!   success or failure, releases it exactly once (by dropping it or by moving its
//!   items into the result).
//! - The dispatcher ([`call_native`]) validates the argument count against the entry's
//!   [`Arity`] before the native runs; the native then validates argument types.
//! - Failures are returned as `Err(Error)` and folded into a `Value::Error` by the
//!   dispatcher. No native aborts on bad input.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** following the native signature above
//! 2. **Add to BUILTIN_OPS** with its name and arity
//! 3. **Add tests** covering both the success path and each error message

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use tracing::{debug, trace, warn};

use crate::Error;
use crate::environment::Environment;
use crate::evaluator::{Context, eval};
use crate::parser;
use crate::reader;
use crate::value::{Native, NumberType, Value, ValueType};

/// Signature shared by every native primitive
pub type NativeFn = fn(&mut Context, &Environment, Vec<Value>) -> Result<Value, Error>;

/// Number of arguments a builtin accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    /// Check `got` arguments against this arity on behalf of `function`
    pub fn validate(&self, function: &str, got: usize) -> Result<(), Error> {
        let ok = match *self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::IncorrectArgCount {
                function: function.to_owned(),
                got,
                expected: *self,
            })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Any => write!(f, "any number"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug)]
pub struct BuiltinOp {
    /// The symbol this operation is bound to in the global environment
    pub name: &'static str,
    /// Expected number of arguments, validated before `func` runs
    pub arity: Arity,
    pub func: NativeFn,
}

/// Apply a native to an argument list it takes ownership of
pub fn call_native(
    ctx: &mut Context,
    env: &Environment,
    native: Native,
    args: Vec<Value>,
) -> Value {
    let op = native.op();
    trace!(name = op.name, argc = args.len(), "calling builtin");
    let result = match op.arity.validate(op.name, args.len()) {
        Ok(()) => (op.func)(ctx, env, args),
        Err(err) => Err(err),
    };
    result.unwrap_or_else(Value::from)
}

//
// Argument helpers
//

/// Destructure an argument list of known length
fn exact<const N: usize>(function: &str, args: Vec<Value>) -> Result<[Value; N], Error> {
    args.try_into().map_err(|args: Vec<Value>| Error::IncorrectArgCount {
        function: function.to_owned(),
        got: args.len(),
        expected: Arity::Exact(N),
    })
}

fn into_number(function: &str, index: usize, value: Value) -> Result<NumberType, Error> {
    match value {
        Value::Number(n) => Ok(n),
        other => Err(Error::incorrect_type(
            function,
            index,
            other.value_type(),
            ValueType::Number,
        )),
    }
}

fn into_string(function: &str, index: usize, value: Value) -> Result<String, Error> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(Error::incorrect_type(
            function,
            index,
            other.value_type(),
            ValueType::String,
        )),
    }
}

fn into_qexpr(function: &str, index: usize, value: Value) -> Result<Vec<Value>, Error> {
    match value {
        Value::QExpr(items) => Ok(items),
        other => Err(Error::incorrect_type(
            function,
            index,
            other.value_type(),
            ValueType::QExpr,
        )),
    }
}

fn into_non_empty_qexpr(function: &str, index: usize, value: Value) -> Result<Vec<Value>, Error> {
    let items = into_qexpr(function, index, value)?;
    if items.is_empty() {
        return Err(Error::EmptyList {
            function: function.to_owned(),
            index,
        });
    }
    Ok(items)
}

/// Turn a list of symbol values into their names, reporting the first non-symbol
fn symbol_names(
    items: Vec<Value>,
    on_mismatch: impl Fn(usize, ValueType) -> Error,
) -> Result<Vec<String>, Error> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Symbol(name) => Ok(name),
            other => Err(on_mismatch(index, other.value_type())),
        })
        .collect()
}

//
// List operations
//

fn builtin_list(ctx: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    ctx.limit_nesting(Value::QExpr(args))
}

fn builtin_head(_: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    let [list] = exact("head", args)?;
    let mut items = into_non_empty_qexpr("head", 0, list)?;
    items.truncate(1);
    Ok(Value::QExpr(items))
}

fn builtin_tail(_: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    let [list] = exact("tail", args)?;
    let mut items = into_non_empty_qexpr("tail", 0, list)?;
    items.remove(0);
    Ok(Value::QExpr(items))
}

fn builtin_join(_: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    // All arguments are checked before any are consumed
    if let Some((index, bad)) = args
        .iter()
        .enumerate()
        .find(|(_, arg)| !matches!(arg, Value::QExpr(_)))
    {
        return Err(Error::incorrect_type(
            "join",
            index,
            bad.value_type(),
            ValueType::QExpr,
        ));
    }

    let mut joined = Vec::new();
    for (index, arg) in args.into_iter().enumerate() {
        joined.extend(into_qexpr("join", index, arg)?);
    }
    Ok(Value::QExpr(joined))
}

fn builtin_eval(ctx: &mut Context, env: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    let [list] = exact("eval", args)?;
    let items = into_qexpr("eval", 0, list)?;
    Ok(eval(ctx, env, Value::SExpr(items)))
}

//
// Arithmetic
//

/// Binary integer operation folded left over a builtin's operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Rem => "%",
            ArithOp::Pow => "^",
        }
    }

    fn apply(self, x: NumberType, y: NumberType) -> Result<NumberType, Error> {
        match self {
            ArithOp::Add => x.checked_add(y).ok_or(Error::Overflow("addition")),
            ArithOp::Sub => x.checked_sub(y).ok_or(Error::Overflow("subtraction")),
            ArithOp::Mul => x.checked_mul(y).ok_or(Error::Overflow("multiplication")),
            ArithOp::Div if y == 0 => Err(Error::DivisionByZero),
            ArithOp::Div => x.checked_div(y).ok_or(Error::Overflow("division")),
            ArithOp::Rem if y == 0 => Err(Error::DivisionByZero),
            ArithOp::Rem => x.checked_rem(y).ok_or(Error::Overflow("remainder")),
            ArithOp::Pow if y < 0 => Err(Error::NegativeExponent(y)),
            ArithOp::Pow => match (x, u32::try_from(y)) {
                (_, Ok(exponent)) => x
                    .checked_pow(exponent)
                    .ok_or(Error::Overflow("exponentiation")),
                // Exponents past u32 only fit for bases whose powers stay bounded
                (0 | 1, Err(_)) => Ok(x),
                (-1, Err(_)) => Ok(if y % 2 == 0 { 1 } else { -1 }),
                (_, Err(_)) => Err(Error::Overflow("exponentiation")),
            },
        }
    }
}

fn arithmetic(op: ArithOp, args: Vec<Value>) -> Result<Value, Error> {
    let function = op.name();
    let numbers = args
        .into_iter()
        .enumerate()
        .map(|(index, arg)| into_number(function, index, arg))
        .collect::<Result<Vec<_>, _>>()?;

    let mut numbers = numbers.into_iter();
    let Some(first) = numbers.next() else {
        return Err(Error::IncorrectArgCount {
            function: function.to_owned(),
            got: 0,
            expected: Arity::AtLeast(1),
        });
    };

    // A lone operand to '-' is negated
    if op == ArithOp::Sub && numbers.as_slice().is_empty() {
        return first
            .checked_neg()
            .map(Value::Number)
            .ok_or(Error::Overflow("negation"));
    }

    numbers
        .try_fold(first, |acc, n| op.apply(acc, n))
        .map(Value::Number)
}

fn builtin_add(_: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    arithmetic(ArithOp::Add, args)
}

fn builtin_sub(_: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    arithmetic(ArithOp::Sub, args)
}

fn builtin_mul(_: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    arithmetic(ArithOp::Mul, args)
}

fn builtin_div(_: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    arithmetic(ArithOp::Div, args)
}

fn builtin_rem(_: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    arithmetic(ArithOp::Rem, args)
}

fn builtin_pow(_: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    arithmetic(ArithOp::Pow, args)
}

//
// Comparison
//

// Macro to generate numeric ordering functions
macro_rules! numeric_ordering {
    ($name:ident, $op:tt, $op_str:expr) => {
        fn $name(_: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
            let [x, y] = exact($op_str, args)?;
            let x = into_number($op_str, 0, x)?;
            let y = into_number($op_str, 1, y)?;
            Ok(Value::from(x $op y))
        }
    };
}

numeric_ordering!(builtin_gt, >, ">");
numeric_ordering!(builtin_lt, <, "<");
numeric_ordering!(builtin_ge, >=, ">=");
numeric_ordering!(builtin_le, <=, "<=");

fn builtin_eq(_: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    let [x, y] = exact("==", args)?;
    Ok(Value::from(x == y))
}

fn builtin_ne(_: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    let [x, y] = exact("!=", args)?;
    Ok(Value::from(x != y))
}

//
// Control flow and definitions
//

fn builtin_if(ctx: &mut Context, env: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    let [condition, then_branch, else_branch] = exact("if", args)?;
    let condition = into_number("if", 0, condition)?;
    let then_branch = into_qexpr("if", 1, then_branch)?;
    let else_branch = into_qexpr("if", 2, else_branch)?;

    // Only the chosen branch is ever evaluated
    let branch = if condition != 0 {
        then_branch
    } else {
        else_branch
    };
    Ok(eval(ctx, env, Value::SExpr(branch)))
}

/// Where a definition form binds its names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindScope {
    Global,
    Local,
}

fn bind_variables(
    function: &'static str,
    scope: BindScope,
    env: &Environment,
    args: Vec<Value>,
) -> Result<Value, Error> {
    let mut args = args.into_iter();
    let Some(symbols) = args.next() else {
        return Err(Error::IncorrectArgCount {
            function: function.to_owned(),
            got: 0,
            expected: Arity::AtLeast(1),
        });
    };
    let symbols = into_qexpr(function, 0, symbols)?;
    let names = symbol_names(symbols, |index, got| {
        Error::incorrect_type(function, index, got, ValueType::Symbol)
    })?;

    let values: Vec<Value> = args.collect();
    if names.len() != values.len() {
        return Err(Error::SymbolCountMismatch {
            function: function.to_owned(),
            symbols: names.len(),
            values: values.len(),
        });
    }

    for (name, value) in names.into_iter().zip(values) {
        debug!(name = %name, ?scope, "binding");
        match scope {
            BindScope::Global => env.def(name, value),
            BindScope::Local => env.put(name, value),
        }
    }
    Ok(Value::unit())
}

fn builtin_def(_: &mut Context, env: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    bind_variables("def", BindScope::Global, env, args)
}

fn builtin_put(_: &mut Context, env: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    bind_variables("=", BindScope::Local, env, args)
}

fn builtin_lambda(ctx: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    let [formals, body] = exact("\\", args)?;
    let formals = into_qexpr("\\", 0, formals)?;
    let body = into_qexpr("\\", 1, body)?;
    let formals = symbol_names(formals, |index, got| Error::NonSymbolFormal { index, got })?;
    ctx.limit_nesting(Value::lambda(formals, body))
}

//
// Host I/O
//

/// Parse the file at `path` and evaluate each top-level form in order.
///
/// A form that evaluates to an error is printed to the context's output and loading
/// continues with the next form. Only an unreadable or unparsable file fails the load.
pub(crate) fn load_path(ctx: &mut Context, env: &Environment, path: &Path) -> Result<Value, Error> {
    let load_error = |reason: String| Error::Load {
        path: path.display().to_string(),
        reason,
    };

    let source = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
    let ast = parser::parse(&source, &ctx.config().parse).map_err(|e| load_error(e.to_string()))?;

    let forms = match reader::read(&ast) {
        Value::SExpr(forms) => forms,
        other => vec![other],
    };
    debug!(path = %path.display(), forms = forms.len(), "loading file");

    for form in forms {
        let result = eval(ctx, env, form);
        if result.is_error() {
            warn!(path = %path.display(), %result, "top-level form failed");
            ctx.emit(format_args!("{result}\n"));
        }
    }
    Ok(Value::unit())
}

fn builtin_load(ctx: &mut Context, env: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    let [path] = exact("load", args)?;
    let path = into_string("load", 0, path)?;
    load_path(ctx, env, Path::new(&path))
}

fn builtin_print(ctx: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    for arg in &args {
        ctx.emit(format_args!("{arg} "));
    }
    ctx.emit(format_args!("\n"));
    Ok(Value::unit())
}

fn builtin_error(_: &mut Context, _: &Environment, args: Vec<Value>) -> Result<Value, Error> {
    let [message] = exact("error", args)?;
    let message = into_string("error", 0, message)?;
    Err(Error::User(message))
}

/// Global registry of all built-in operations.
static BUILTIN_OPS: [BuiltinOp; 24] = [
    // List operations
    BuiltinOp {
        name: "list",
        arity: Arity::Any,
        func: builtin_list,
    },
    BuiltinOp {
        name: "head",
        arity: Arity::Exact(1),
        func: builtin_head,
    },
    BuiltinOp {
        name: "tail",
        arity: Arity::Exact(1),
        func: builtin_tail,
    },
    BuiltinOp {
        name: "join",
        arity: Arity::AtLeast(1),
        func: builtin_join,
    },
    BuiltinOp {
        name: "eval",
        arity: Arity::Exact(1),
        func: builtin_eval,
    },
    // Arithmetic operations
    BuiltinOp {
        name: "+",
        arity: Arity::AtLeast(1),
        func: builtin_add,
    },
    BuiltinOp {
        name: "-",
        arity: Arity::AtLeast(1),
        func: builtin_sub,
    },
    BuiltinOp {
        name: "*",
        arity: Arity::AtLeast(1),
        func: builtin_mul,
    },
    BuiltinOp {
        name: "/",
        arity: Arity::AtLeast(1),
        func: builtin_div,
    },
    BuiltinOp {
        name: "%",
        arity: Arity::AtLeast(1),
        func: builtin_rem,
    },
    BuiltinOp {
        name: "^",
        arity: Arity::AtLeast(1),
        func: builtin_pow,
    },
    // Ordering
    BuiltinOp {
        name: ">",
        arity: Arity::Exact(2),
        func: builtin_gt,
    },
    BuiltinOp {
        name: "<",
        arity: Arity::Exact(2),
        func: builtin_lt,
    },
    BuiltinOp {
        name: ">=",
        arity: Arity::Exact(2),
        func: builtin_ge,
    },
    BuiltinOp {
        name: "<=",
        arity: Arity::Exact(2),
        func: builtin_le,
    },
    // Equality
    BuiltinOp {
        name: "==",
        arity: Arity::Exact(2),
        func: builtin_eq,
    },
    BuiltinOp {
        name: "!=",
        arity: Arity::Exact(2),
        func: builtin_ne,
    },
    // Control flow
    BuiltinOp {
        name: "if",
        arity: Arity::Exact(3),
        func: builtin_if,
    },
    // Variables and functions
    BuiltinOp {
        name: "def",
        arity: Arity::AtLeast(1),
        func: builtin_def,
    },
    BuiltinOp {
        name: "=",
        arity: Arity::AtLeast(1),
        func: builtin_put,
    },
    BuiltinOp {
        name: "\\",
        arity: Arity::Exact(2),
        func: builtin_lambda,
    },
    // Host I/O
    BuiltinOp {
        name: "load",
        arity: Arity::Exact(1),
        func: builtin_load,
    },
    BuiltinOp {
        name: "print",
        arity: Arity::Any,
        func: builtin_print,
    },
    BuiltinOp {
        name: "error",
        arity: Arity::Exact(1),
        func: builtin_error,
    },
];

/// Lazy static map from name to BuiltinOp (private - use find_builtin_op)
static BUILTIN_BY_NAME: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| BUILTIN_OPS.iter().map(|op| (op.name, op)).collect());

/// Get all builtin operations
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    &BUILTIN_OPS
}

/// Find a builtin operation by name
pub fn find_builtin_op(name: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_NAME.get(name).copied()
}

/// Bind every builtin into `env`
pub fn register_builtins(env: &Environment) {
    for op in get_builtin_ops() {
        env.register_builtin(op);
    }
}
