//! Convenience facade owning a global environment and an evaluation context.

use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::Error;
use crate::builtinops::{load_path, register_builtins};
use crate::config::Config;
use crate::environment::Environment;
use crate::evaluator::{self, Context};
use crate::parser;
use crate::reader;
use crate::value::Value;

/// A ready-to-use interpreter: builtins registered, output going to stdout unless
/// redirected with [`Interpreter::with_output`].
///
/// # Example
/// ```
/// use lispy::{Interpreter, Value};
///
/// let mut lispy = Interpreter::default();
/// lispy.eval_source("def {add} (\\ {x y} {+ x y})").unwrap();
/// assert_eq!(lispy.eval_source("(add 1) 41").unwrap(), Value::num(42));
/// ```
#[derive(Debug)]
pub struct Interpreter {
    ctx: Context,
    env: Environment,
}

impl Interpreter {
    pub fn new(config: Config) -> Self {
        Self::from_context(Context::new(config))
    }

    /// Interpreter whose `print` output and `load` diagnostics go to `out`
    pub fn with_output(config: Config, out: Box<dyn Write>) -> Self {
        Self::from_context(Context::with_output(config, out))
    }

    fn from_context(ctx: Context) -> Self {
        let env = Environment::new();
        register_builtins(&env);
        Interpreter { ctx, env }
    }

    /// The global environment
    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn config(&self) -> &Config {
        self.ctx.config()
    }

    /// Parse `source` and evaluate it as a single s-expression.
    ///
    /// A line such as `+ 1 2` therefore yields `3` without surrounding parentheses.
    /// Only parse failures are returned as `Err`; evaluation failures are ordinary
    /// `Value::Error` results.
    pub fn eval_source(&mut self, source: &str) -> Result<Value, Error> {
        let ast = parser::parse(source, &self.ctx.config().parse)?;
        let value = reader::read(&ast);
        debug!(%value, "evaluating");
        Ok(self.eval(value))
    }

    /// Evaluate an already-read value in the global environment
    pub fn eval(&mut self, value: Value) -> Value {
        evaluator::eval(&mut self.ctx, &self.env, value)
    }

    /// Evaluate every top-level form of a file, exactly like the `load` builtin
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Value {
        load_path(&mut self.ctx, &self.env, path.as_ref()).unwrap_or_else(Value::from)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
