//! AST nodes and their conversion into runtime values.
//!
//! The [`parser`](crate::parser) produces a tree of [`AstNode`]s that mirrors the
//! source text, including comments and bracket tokens. [`read`] turns that tree into
//! a [`Value`], dropping everything that carries no meaning at runtime.

use crate::Error;
use crate::value::{NumberType, Value};

/// Syntactic category of an [`AstNode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Number,
    Symbol,
    /// A string literal, still quoted and escaped
    String,
    Comment,
    /// A bracket token: `(`, `)`, `{` or `}`
    Delimiter,
    SExpr,
    QExpr,
    /// The whole program: one child per top-level form
    Root,
}

/// One node of the parse tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstNode {
    pub kind: NodeKind,
    /// Source text of a leaf; empty for lists and the root
    pub contents: String,
    pub children: Vec<AstNode>,
}

impl AstNode {
    pub fn leaf(kind: NodeKind, contents: impl Into<String>) -> Self {
        AstNode {
            kind,
            contents: contents.into(),
            children: Vec::new(),
        }
    }

    pub fn branch(kind: NodeKind, children: Vec<AstNode>) -> Self {
        AstNode {
            kind,
            contents: String::new(),
            children,
        }
    }

    /// Comments and bracket tokens have no runtime value
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, NodeKind::Comment | NodeKind::Delimiter)
    }
}

/// Convert a parse tree into a value.
///
/// The root and s-expression nodes become `Value::SExpr`, q-expression nodes become
/// `Value::QExpr`. A number that does not fit in an integer becomes an error value
/// in place. Trivia read on its own yields the empty s-expression.
pub fn read(node: &AstNode) -> Value {
    match node.kind {
        NodeKind::Number => read_number(&node.contents),
        NodeKind::Symbol => Value::Symbol(node.contents.clone()),
        NodeKind::String => Value::String(read_string(&node.contents)),
        NodeKind::Root | NodeKind::SExpr => Value::SExpr(read_children(node)),
        NodeKind::QExpr => Value::QExpr(read_children(node)),
        NodeKind::Comment | NodeKind::Delimiter => Value::unit(),
    }
}

fn read_children(node: &AstNode) -> Vec<Value> {
    node.children
        .iter()
        .filter(|child| !child.is_trivia())
        .map(read)
        .collect()
}

fn read_number(text: &str) -> Value {
    match text.parse::<NumberType>() {
        Ok(n) => Value::Number(n),
        Err(_) => Error::InvalidNumber(text.to_owned()).into(),
    }
}

/// Strip the surrounding quotes and decode escapes
fn read_string(literal: &str) -> String {
    let inner = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(literal);
    unescape(inner)
}

/// Decode backslash escapes. Unknown escapes are kept verbatim, backslash included.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('a') => out.push('\u{7}'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
