//! Runtime configuration.
//!
//! A [`Config`] is built once by the embedder (or the `lispy` binary) and handed to
//! the [`Interpreter`](crate::Interpreter), which threads it through every
//! evaluation. There is no process-wide mutable state.

/// Maximum parsing depth to prevent stack overflow attacks
pub const MAX_PARSE_DEPTH: usize = 1_024;

/// Maximum evaluation depth to prevent runaway recursion.
/// Set well above the parse depth to allow for nested function applications.
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Deepest list or closure nesting a value may reach. Values are copied and dropped
/// recursively, so this stays close to the parse depth.
pub const MAX_VALUE_DEPTH: usize = 1_024;

/// Reader settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseConfig {
    /// Accept `;` line comments. When disabled a `;` is a syntax error.
    pub handle_comments: bool,
    /// Deepest list nesting the parser accepts
    pub max_depth: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: true,
            max_depth: MAX_PARSE_DEPTH,
        }
    }
}

/// Interpreter settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Deepest s-expression nesting evaluation may reach before failing with a
    /// recursion limit error
    pub max_eval_depth: usize,
    /// Deepest nesting a value built at runtime may reach before failing with a
    /// nesting limit error
    pub max_value_depth: usize,
    pub parse: ParseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_eval_depth: MAX_EVAL_DEPTH,
            max_value_depth: MAX_VALUE_DEPTH,
            parse: ParseConfig::default(),
        }
    }
}
