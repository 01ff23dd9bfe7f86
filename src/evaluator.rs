use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};

use tracing::{trace, warn};

use crate::Error;
use crate::builtinops::call_native;
use crate::config::Config;
use crate::environment::Environment;
use crate::stack::ensure_sufficient_stack;
use crate::value::{Closure, Function, Value};

/// Formal that collects all remaining arguments into a list
pub const REST_MARKER: &str = "&";

/// Per-evaluation state threaded through every call.
///
/// Holds the configuration, the current nesting depth and the sink that `print` and
/// `load` write to. Nothing here is global, so independent interpreters never share
/// state.
pub struct Context {
    config: Config,
    depth: usize,
    out: Box<dyn Write>,
}

impl Context {
    /// Context writing to standard output
    pub fn new(config: Config) -> Self {
        Self::with_output(config, Box::new(io::stdout()))
    }

    pub fn with_output(config: Config, out: Box<dyn Write>) -> Self {
        Context {
            config,
            depth: 0,
            out,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current s-expression nesting depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Pass `value` through unless its list or closure nesting exceeds
    /// `Config::max_value_depth`.
    ///
    /// Values are copied, compared, printed and dropped recursively, so every
    /// operation that wraps existing values in a new layer goes through here.
    pub(crate) fn limit_nesting(&self, value: Value) -> Result<Value, Error> {
        let max_depth = self.config.max_value_depth;
        if value.nested_deeper_than(max_depth) {
            warn!(max_depth, "value nesting limit exceeded");
            return Err(Error::NestingLimit(max_depth));
        }
        Ok(value)
    }

    /// Write program output. A failing sink is logged and otherwise ignored.
    pub(crate) fn emit(&mut self, args: fmt::Arguments<'_>) {
        if let Err(err) = self.out.write_fmt(args).and_then(|()| self.out.flush()) {
            warn!(%err, "failed to write program output");
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// Evaluate a value in `env`, consuming it.
///
/// Symbols are looked up, s-expressions are reduced, and everything else (numbers,
/// strings, errors, functions, q-expressions) evaluates to itself. Failures come
/// back as `Value::Error`.
pub fn eval(ctx: &mut Context, env: &Environment, value: Value) -> Value {
    match value {
        Value::Symbol(name) => env.get(&name).unwrap_or_else(Value::from),
        Value::SExpr(items) => {
            let max_depth = ctx.config.max_eval_depth;
            if ctx.depth >= max_depth {
                warn!(max_depth, "evaluation depth limit exceeded");
                return Error::RecursionLimit(max_depth).into();
            }
            ctx.depth += 1;
            let result = ensure_sufficient_stack(|| eval_sexpr(ctx, env, items));
            ctx.depth -= 1;
            result
        }
        other => other,
    }
}

fn eval_sexpr(ctx: &mut Context, env: &Environment, items: Vec<Value>) -> Value {
    // Children are evaluated left to right before anything else happens
    let mut items: Vec<Value> = items.into_iter().map(|item| eval(ctx, env, item)).collect();

    if let Some(index) = items.iter().position(Value::is_error) {
        return items.swap_remove(index);
    }

    let mut items = items.into_iter();
    let Some(first) = items.next() else {
        return Value::unit();
    };
    if items.as_slice().is_empty() {
        return first;
    }

    match first {
        Value::Function(func) => call(ctx, env, func, items.collect()),
        other => Error::NotAFunction(other.value_type()).into(),
    }
}

/// Apply a function value to already-evaluated arguments.
///
/// Natives run immediately. Closures bind arguments to formals in order; when formals
/// remain unbound the result is a partially applied closure, otherwise the body is
/// evaluated with the caller's environment as the enclosing scope.
pub fn call(ctx: &mut Context, env: &Environment, func: Function, args: Vec<Value>) -> Value {
    match func {
        Function::Native(native) => call_native(ctx, env, native, args),
        Function::Closure(closure) => {
            call_closure(ctx, env, closure, args).unwrap_or_else(Value::from)
        }
    }
}

fn call_closure(
    ctx: &mut Context,
    env: &Environment,
    mut closure: Closure,
    args: Vec<Value>,
) -> Result<Value, Error> {
    let given = args.len();
    let total = closure.formals.len();
    let mut formals = VecDeque::from(std::mem::take(&mut closure.formals));
    let mut args = VecDeque::from(args);

    while let Some(arg) = args.pop_front() {
        let Some(formal) = formals.pop_front() else {
            return Err(Error::TooManyArguments {
                got: given,
                expected: total,
            });
        };

        if formal == REST_MARKER {
            let rest = take_rest_formal(&mut formals)?;
            args.push_front(arg);
            let collected = ctx.limit_nesting(Value::QExpr(std::mem::take(&mut args).into()))?;
            closure.env.put(rest, collected);
            break;
        }

        closure.env.put(formal, arg);
    }

    // Arguments ran out right before a variadic marker: the rest list is empty
    if formals.front().is_some_and(|formal| formal == REST_MARKER) {
        formals.pop_front();
        let rest = take_rest_formal(&mut formals)?;
        closure.env.put(rest, Value::QExpr(Vec::new()));
    }

    closure.formals = formals.into();
    if !closure.formals.is_empty() {
        trace!(
            bound = given,
            remaining = closure.formals.len(),
            "partial application"
        );
        return ctx.limit_nesting(Value::Function(Function::Closure(closure)));
    }

    trace!(argc = given, "applying closure");
    closure.env.set_parent(env);
    let body = std::mem::take(&mut closure.body);
    Ok(eval(ctx, &closure.env, Value::SExpr(body)))
}

/// The single symbol that must follow `&`
fn take_rest_formal(formals: &mut VecDeque<String>) -> Result<String, Error> {
    match (formals.pop_front(), formals.is_empty()) {
        (Some(rest), true) => Ok(rest),
        _ => Err(Error::InvalidFormat),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::builtinops::register_builtins;
    use crate::parser::parse;
    use crate::reader::read;
    use crate::value::{num, qexpr, sym};

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),
        SpecificError(&'static str),
    }
    use TestResult::*;

    /// Test environment that maintains state across multiple test cases
    #[derive(Debug)]
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(value.into())
    }

    /// Macro for setup expressions that return `()` (like def)
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, EvalResult(Value::unit()))
        };
    }

    fn global_env() -> Environment {
        let env = Environment::new();
        register_builtins(&env);
        env
    }

    fn quiet_context(config: Config) -> Context {
        Context::with_output(config, Box::new(io::sink()))
    }

    /// Read a whole line of input as one s-expression, the way the REPL does
    fn eval_line(ctx: &mut Context, env: &Environment, input: &str) -> Value {
        let ast = parse(input, &ctx.config().parse)
            .unwrap_or_else(|err| panic!("unexpected parse error for '{input}': {err}"));
        eval(ctx, env, read(&ast))
    }

    /// Execute a single test case with detailed error reporting
    fn execute_test_case(
        ctx: &mut Context,
        env: &Environment,
        input: &str,
        expected: &TestResult,
        test_id: &str,
    ) {
        match (eval_line(ctx, env, input), expected) {
            (Value::Error(message), SpecificError(expected_text)) => {
                assert!(
                    message.contains(expected_text),
                    "{test_id}: error should contain '{expected_text}', got: {message}"
                );
            }
            (actual, SpecificError(expected_text)) => {
                panic!("{test_id}: expected error containing '{expected_text}', got {actual:?}");
            }
            (actual, EvalResult(expected_val)) => {
                assert_eq!(
                    actual, *expected_val,
                    "{test_id}: '{input}' evaluated to {actual}"
                );
            }
        }
    }

    /// Run tests in isolated environments with shared state
    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = global_env();
            let mut ctx = quiet_context(Config::default());
            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(&mut ctx, &env, input, expected, &test_id);
            }
        }
    }

    /// Each case runs in a fresh global environment
    fn run_comprehensive_tests(test_cases: Vec<(&'static str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = global_env();
            let mut ctx = quiet_context(Config::default());
            let test_id = format!("#{}", i + 1);
            execute_test_case(&mut ctx, &env, input, expected, &test_id);
        }
    }

    #[test]
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("9223372036854775807", success(i64::MAX)),
            ("\"hello\"", success("hello")),
            ("{1 2 (+ 1 2)}", success(qexpr([num(1), num(2), Value::sexpr(vec![sym("+"), num(1), num(2)])]))),
            ("{}", success(qexpr([]))),
            // The whole line is one s-expression
            ("", success(Value::unit())),
            ("()", success(Value::unit())),
            ("(5)", success(5)),
            ("((((5))))", success(5)),
            // === ARITHMETIC ===
            ("+ 1 2 3", success(6)),
            ("(+ 1 2 3)", success(6)),
            ("- 10", success(-10)),
            ("- 10 3 2", success(5)),
            ("* 2 (+ 1 2) 4", success(24)),
            ("/ 10 3", success(3)),
            ("% 10 4", success(2)),
            ("^ 3 4", success(81)),
            ("+ (* 2 3) (- 8 2)", success(12)),
            ("/ 10 0", SpecificError("Division by Zero!")),
            ("+ 9223372036854775807 1", SpecificError("Integer overflow")),
            ("+ 1 {2}", SpecificError("Function '+' passed incorrect type for argument 1. Got Q-Expression, Expected Number.")),
            ("+", success(Value::native(crate::builtinops::find_builtin_op("+").unwrap()))),
            // === ERRORS PROPAGATE ===
            ("+ 1 (/ 1 0) undefined", SpecificError("Division by Zero!")),
            ("+ 1 undefined (/ 1 0)", SpecificError("Unbound Symbol 'undefined'")),
            ("1 2 3", SpecificError("S-Expression starts with incorrect type. Got Number, Expected Function.")),
            ("{+} 1", SpecificError("Got Q-Expression, Expected Function")),
            ("error \"custom failure\"", SpecificError("custom failure")),
            // === LIST OPERATIONS ===
            ("list 1 2 3", success(qexpr([num(1), num(2), num(3)]))),
            ("head {1 2 3}", success(qexpr([num(1)]))),
            ("tail {1 2 3}", success(qexpr([num(2), num(3)]))),
            ("join {1} {2 3} {}", success(qexpr([num(1), num(2), num(3)]))),
            ("eval {+ 1 2}", success(3)),
            ("eval (head {(+ 1 2) (+ 10 20)})", success(3)),
            ("eval (tail {tail tail {5 6 7}})", success(qexpr([num(6), num(7)]))),
            ("head {}", SpecificError("Function 'head' passed {} for argument 0.")),
            ("head {1} {2}", SpecificError("Function 'head' passed incorrect number of arguments. Got 2, Expected 1.")),
            // === COMPARISON AND CONDITIONALS ===
            ("> 10 5", success(1)),
            ("<= 10 5", success(0)),
            ("== {1 2} {1 2}", success(1)),
            ("!= \"a\" \"b\"", success(1)),
            ("if (== 1 1) {+ 1 1} {error \"no\"}", success(2)),
            ("if (> 1 2) {error \"no\"} {- 5}", success(-5)),
            // === LAMBDAS ===
            ("(\\ {x y} {+ x y}) 10 20", success(30)),
            ("(\\ {} {42})", success(Value::lambda(vec![], vec![num(42)]))),
            ("(\\ {x y} {+ x y}) 1", success(Value::lambda(vec!["y".into()], vec![sym("+"), sym("x"), sym("y")]))),
            ("((\\ {x y} {+ x y}) 1) 2", success(3)),
            ("(\\ {x & xs} {xs}) 1 2 3", success(qexpr([num(2), num(3)]))),
            ("(\\ {x & xs} {xs}) 1", success(qexpr([]))),
            ("(\\ {& xs} {xs})", success(Value::lambda(vec!["&".into(), "xs".into()], vec![sym("xs")]))),
            ("(\\ {x} {x}) 1 2", SpecificError("Function passed too many arguments. Got 2, Expected 1.")),
            ("(\\ {x &} {x}) 1 2", SpecificError("Function format invalid. Symbol '&' not followed by single symbol.")),
            ("(\\ {x & y z} {x}) 1 2", SpecificError("Symbol '&' not followed by single symbol")),
            ("(\\ {x 1} {x})", SpecificError("Cannot define non-symbol argument 1. Got Number, Expected Symbol.")),
            ("(\\ {x} {undefined}) 1", SpecificError("Unbound Symbol 'undefined'")),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_definitions_and_scoping() {
        let environments = vec![
            TestEnvironment(vec![
                test_setup!("def {x y} 1 2"),
                ("+ x y", success(3)),
                test_setup!("def {x} 10"),
                ("x", success(10)),
                ("def {a} 1 2", SpecificError("Function 'def' passed too many arguments for symbols. Got 1, Expected 2.")),
                ("def {1} 2", SpecificError("Got Number, Expected Symbol")),
            ]),
            // `def` inside a body reaches the global scope, `=` stays local
            TestEnvironment(vec![
                test_setup!("def {g} (\\ {v} {def {shared} v})"),
                test_setup!("def {l} (\\ {v} {= {hidden} v})"),
                test_setup!("g 5"),
                ("shared", success(5)),
                test_setup!("l 6"),
                ("hidden", SpecificError("Unbound Symbol 'hidden'")),
            ]),
            // Parameters shadow globals without replacing them
            TestEnvironment(vec![
                test_setup!("def {x} 100"),
                test_setup!("def {f} (\\ {x} {* x 2})"),
                ("f 4", success(8)),
                ("x", success(100)),
            ]),
            // Free variables resolve through the caller at call time
            TestEnvironment(vec![
                test_setup!("def {show} (\\ {_} {y})"),
                ("show 0", SpecificError("Unbound Symbol 'y'")),
                test_setup!("def {y} 7"),
                ("show 0", success(7)),
            ]),
            // Every child is evaluated even after an earlier one failed
            TestEnvironment(vec![
                ("list (error \"e\") (def {late} 1)", SpecificError("e")),
                ("late", success(1)),
                ("+ (/ 1 0) (def {later} 2)", SpecificError("Division by Zero!")),
                ("later", success(2)),
            ]),
            // A closure without formals is a value, never invoked
            TestEnvironment(vec![
                test_setup!("def {thunk} (\\ {} {y})"),
                ("thunk", success(Value::lambda(vec![], vec![sym("y")]))),
                ("thunk 0", SpecificError("Got 1, Expected 0")),
            ]),
        ];

        run_tests_in_environment(environments);
    }

    #[test]
    fn test_currying_and_variadics() {
        let environments = vec![
            TestEnvironment(vec![
                test_setup!("def {add} (\\ {x y} {+ x y})"),
                test_setup!("def {inc} (add 1)"),
                ("inc 41", success(42)),
                ("inc 1", success(2)),
                // Applying the partial leaves the stored one untouched
                ("inc", success(Value::lambda(vec!["y".into()], vec![sym("+"), sym("x"), sym("y")]))),
                ("add 1 2", success(3)),
                ("add 1 2 3", SpecificError("Function passed too many arguments. Got 3, Expected 2.")),
            ]),
            TestEnvironment(vec![
                test_setup!("def {pack} (\\ {f & xs} {f xs})"),
                ("pack head 1 2 3", success(qexpr([num(1)]))),
                ("pack tail 7", success(qexpr([]))),
                test_setup!("def {sum} (\\ {x & xs} {if (== xs {}) {x} {+ x (eval (join {sum} xs))}})"),
                ("sum 5 6 7", success(18)),
                ("sum 5", success(5)),
            ]),
            TestEnvironment(vec![
                test_setup!("def {fun} (\\ {f b} {def (head f) (\\ (tail f) b)})"),
                test_setup!("fun {flip f a b} {f b a}"),
                ("flip - 1 10", success(9)),
                test_setup!("fun {curry f xs} {eval (join (list f) xs)}"),
                ("curry + {5 6 7}", success(18)),
                test_setup!("fun {uncurry f & xs} {f xs}"),
                ("uncurry head 5 6 7", success(qexpr([num(5)]))),
            ]),
        ];

        run_tests_in_environment(environments);
    }

    #[test]
    fn test_recursive_functions() {
        let environments = vec![
            TestEnvironment(vec![
                test_setup!("def {fact} (\\ {n} {if (<= n 1) {1} {* n (fact (- n 1))}})"),
                ("fact 5", success(120)),
                ("fact 20", success(2_432_902_008_176_640_000_i64)),
                ("fact 21", SpecificError("Integer overflow in multiplication")),
            ]),
            TestEnvironment(vec![
                test_setup!("def {len} (\\ {l} {if (== l {}) {0} {+ 1 (len (tail l))}})"),
                ("len {1 2 3 4}", success(4)),
                test_setup!("def {rev} (\\ {l} {if (== l {}) {{}} {join (rev (tail l)) (head l)}})"),
                ("rev {1 2 3}", success(qexpr([num(3), num(2), num(1)]))),
            ]),
            // Mutual recursion works because lookups happen at call time
            TestEnvironment(vec![
                test_setup!("def {even} (\\ {n} {if (== n 0) {1} {odd (- n 1)}})"),
                test_setup!("def {odd} (\\ {n} {if (== n 0) {0} {even (- n 1)}})"),
                ("even 10", success(1)),
                ("odd 7", success(1)),
            ]),
        ];

        run_tests_in_environment(environments);
    }

    #[test]
    fn test_evaluation_depth_limit() {
        let env = global_env();
        let mut ctx = quiet_context(Config {
            max_eval_depth: 200,
            ..Config::default()
        });

        eval_line(
            &mut ctx,
            &env,
            "def {deep} (\\ {n} {if (== n 0) {0} {+ 1 (deep (- n 1))}})",
        );
        assert_eq!(eval_line(&mut ctx, &env, "deep 10"), num(10));

        let result = eval_line(&mut ctx, &env, "deep 1000");
        assert_eq!(
            result,
            Value::err("Evaluation depth limit exceeded (max: 200)")
        );
        // Depth unwinds fully after a failure
        assert_eq!(ctx.depth(), 0);
        assert_eq!(eval_line(&mut ctx, &env, "deep 5"), num(5));
    }

    #[test]
    fn test_value_nesting_limit() {
        let env = global_env();
        let mut ctx = quiet_context(Config {
            max_value_depth: 64,
            ..Config::default()
        });
        let limit_error = Value::err("Value nesting limit exceeded (max: 64)");

        // Wrapping with `list`
        eval_line(&mut ctx, &env, "def {x} {}");
        for _ in 0..63 {
            assert_eq!(eval_line(&mut ctx, &env, "def {x} (list x)"), Value::unit());
        }
        assert_eq!(eval_line(&mut ctx, &env, "list x"), limit_error);
        assert_eq!(eval_line(&mut ctx, &env, "def {x} (list x)"), limit_error);
        let x = eval_line(&mut ctx, &env, "x");
        assert!(!x.nested_deeper_than(64));
        assert!(x.nested_deeper_than(63));

        // Wrapping through a rest parameter
        eval_line(&mut ctx, &env, "def {wrap} (\\ {& xs} {xs})");
        eval_line(&mut ctx, &env, "def {y} {}");
        for _ in 0..63 {
            assert_eq!(eval_line(&mut ctx, &env, "def {y} (wrap y)"), Value::unit());
        }
        assert_eq!(eval_line(&mut ctx, &env, "wrap y"), limit_error);

        // Wrapping inside partially applied closures
        eval_line(&mut ctx, &env, "def {hold} (\\ {a b} {a})");
        eval_line(&mut ctx, &env, "def {z} 0");
        for _ in 0..63 {
            assert_eq!(eval_line(&mut ctx, &env, "def {z} (hold z)"), Value::unit());
        }
        assert_eq!(eval_line(&mut ctx, &env, "hold z"), limit_error);

        // Flat lists of any length are unaffected
        assert_eq!(
            eval_line(&mut ctx, &env, "eval (join (list list) {1 2 3 4 5 6 7 8})"),
            Value::qexpr((1..=8).map(Value::num).collect())
        );
    }

    #[test]
    fn test_print_writes_to_context_output() {
        use std::cell::RefCell;
        use std::rc::Rc;

        #[derive(Clone, Default)]
        struct SharedBuf(Rc<RefCell<Vec<u8>>>);

        impl Write for SharedBuf {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.borrow_mut().write(buf)
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let buf = SharedBuf::default();
        let env = global_env();
        let mut ctx = Context::with_output(Config::default(), Box::new(buf.clone()));

        let result = eval_line(&mut ctx, &env, "print 1 \"two\" {3}");
        assert_eq!(result, Value::unit());
        let written = String::from_utf8(buf.0.borrow().clone()).unwrap();
        assert_eq!(written, "1 \"two\" {3} \n");
    }

    #[test]
    fn test_closure_values_are_independent() {
        let env = global_env();
        let mut ctx = quiet_context(Config::default());
        eval_line(&mut ctx, &env, "def {add} (\\ {x y} {+ x y})");

        let add = env.get("add").unwrap();
        let Value::Function(func) = add.clone() else {
            panic!("add should be a function");
        };
        let partial = call(&mut ctx, &env, func, vec![num(1)]);

        // Binding into the partial never touches the stored original
        let Value::Function(Function::Closure(partial)) = partial else {
            panic!("expected a partial closure, got {partial:?}");
        };
        assert_eq!(partial.env.get("x").unwrap(), num(1));
        assert_eq!(partial.formals, vec!["y".to_owned()]);
        let Value::Function(Function::Closure(original)) = env.get("add").unwrap() else {
            panic!("add should still be a closure");
        };
        assert!(original.env.get("x").is_err());
        assert_eq!(original.formals.len(), 2);
    }
}
