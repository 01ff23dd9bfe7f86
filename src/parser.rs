use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{opt, recognize},
    error::ErrorKind,
    multi::many0,
    sequence::{pair, preceded, terminated},
};

use crate::config::ParseConfig;
use crate::reader::{AstNode, NodeKind};
use crate::stack::ensure_sufficient_stack;
use crate::{Error, ParseError, ParseErrorKind};

/// Characters allowed in symbols besides ASCII letters and digits
pub const SYMBOL_SPECIAL_CHARS: &str = "_+-*/\\=<>!&%^";

pub fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c)
}

type ParseResult<'a> = IResult<&'a str, AstNode>;

/// An unrecoverable error at `input`, stopping any enclosing alternatives
fn failure(input: &str, kind: ErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Failure(nom::error::Error::new(input, kind))
}

/// Convert nom parsing errors to structured parse errors
fn to_parse_error(input: &str, error: &nom::error::Error<&str>, config: &ParseConfig) -> ParseError {
    let position = input.len().saturating_sub(error.input.len());
    match error.code {
        ErrorKind::TooLarge => ParseError::with_context(
            ParseErrorKind::TooDeeplyNested,
            format!("Expression too deeply nested (max depth: {})", config.max_depth),
            input,
            position,
        ),
        ErrorKind::Eof if error.input.starts_with('"') => ParseError::with_context(
            ParseErrorKind::Incomplete,
            "Unterminated string literal",
            input,
            position,
        ),
        ErrorKind::Eof => ParseError::with_context(
            ParseErrorKind::Incomplete,
            "Unexpected end of input: unclosed list",
            input,
            position,
        ),
        _ => unexpected_token(input, error.input),
    }
}

/// Error for leftover input that starts with something no expression can begin with
fn unexpected_token(input: &str, remaining: &str) -> ParseError {
    let position = input.len().saturating_sub(remaining.len());
    let message = match remaining.chars().next() {
        Some(c) => format!("Unexpected '{c}' at position {position}"),
        None => "Unexpected end of input".to_owned(),
    };
    ParseError::with_context(ParseErrorKind::InvalidSyntax, message, input, position)
}

/// Parse an integer literal: an optional minus sign followed by digits
fn parse_number(input: &str) -> ParseResult<'_> {
    let (input, text) = recognize(pair(opt(char('-')), digit1)).parse(input)?;
    Ok((input, AstNode::leaf(NodeKind::Number, text)))
}

/// Parse a symbol (identifier or operator)
fn parse_symbol(input: &str) -> ParseResult<'_> {
    let (input, text) = take_while1(is_symbol_char).parse(input)?;
    Ok((input, AstNode::leaf(NodeKind::Symbol, text)))
}

/// Parse a string literal, keeping its quotes and escapes for the reader
fn parse_string(input: &str) -> ParseResult<'_> {
    let (body, _) = char('"').parse(input)?;
    let mut chars = body.char_indices();

    while let Some((i, ch)) = chars.next() {
        match ch {
            '"' => {
                // Opening quote, body, closing quote
                let end = 1 + i + 1;
                return Ok((&input[end..], AstNode::leaf(NodeKind::String, &input[..end])));
            }
            '\\' => {
                // The escaped character can never close the string
                if chars.next().is_none() {
                    break;
                }
            }
            _ => {}
        }
    }

    // Reached end of input without finding closing quote
    Err(failure(input, ErrorKind::Eof))
}

/// Parse a `;` comment running to the end of the line
fn parse_comment<'a>(input: &'a str, config: &ParseConfig) -> ParseResult<'a> {
    if !config.handle_comments {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Not,
        )));
    }
    let (input, text) =
        recognize(pair(char(';'), take_while(|c: char| c != '\r' && c != '\n'))).parse(input)?;
    Ok((input, AstNode::leaf(NodeKind::Comment, text)))
}

/// Parse a bracketed list, keeping both brackets as delimiter children
fn parse_list<'a>(
    input: &'a str,
    (open, close): (char, char),
    kind: NodeKind,
    config: &ParseConfig,
    depth: usize,
) -> ParseResult<'a> {
    let (rest, _) = char(open).parse(input)?;
    if depth >= config.max_depth {
        return Err(failure(input, ErrorKind::TooLarge));
    }

    let (rest, items) =
        ensure_sufficient_stack(|| many0(|i| parse_expr(i, config, depth + 1)).parse(rest))?;
    let (rest, _) = multispace0.parse(rest)?;

    let Some(rest) = rest.strip_prefix(close) else {
        let code = if rest.is_empty() {
            ErrorKind::Eof
        } else {
            ErrorKind::Char
        };
        return Err(failure(rest, code));
    };

    let mut children = Vec::with_capacity(items.len() + 2);
    children.push(AstNode::leaf(NodeKind::Delimiter, open));
    children.extend(items);
    children.push(AstNode::leaf(NodeKind::Delimiter, close));
    Ok((rest, AstNode::branch(kind, children)))
}

/// Parse one expression, skipping leading whitespace
fn parse_expr<'a>(input: &'a str, config: &ParseConfig, depth: usize) -> ParseResult<'a> {
    preceded(
        multispace0,
        alt((
            parse_number, // Before symbols, so "-5" is a number and "-" a symbol
            parse_symbol,
            parse_string,
            |input| parse_comment(input, config),
            |input| parse_list(input, ('(', ')'), NodeKind::SExpr, config, depth),
            |input| parse_list(input, ('{', '}'), NodeKind::QExpr, config, depth),
        )),
    )
    .parse(input)
}

/// Parse a whole program into a root node holding one child per top-level form.
///
/// # Example
/// ```
/// use lispy::ParseConfig;
/// use lispy::parser::parse;
/// use lispy::reader::NodeKind;
///
/// let root = parse("def {x} 1 ; set up", &ParseConfig::default()).unwrap();
/// assert_eq!(root.kind, NodeKind::Root);
/// assert_eq!(root.children.len(), 4);
/// ```
pub fn parse(input: &str, config: &ParseConfig) -> Result<AstNode, Error> {
    match terminated(many0(|i| parse_expr(i, config, 0)), multispace0).parse(input) {
        Ok(("", forms)) => Ok(AstNode::branch(NodeKind::Root, forms)),
        Ok((remaining, _)) => Err(unexpected_token(input, remaining).into()),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
            Err(to_parse_error(input, &e, config).into())
        }
        Err(nom::Err::Incomplete(_)) => Err(ParseError::new(
            ParseErrorKind::Incomplete,
            "Incomplete input",
            None,
        )
        .into()),
    }
}
