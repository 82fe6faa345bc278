//! Tokenizer, reader and atom classifier.
//!
//! Input is one line of text. Fields are separated by single space
//! characters; within a field, `(` and `)` always stand alone. Nothing else is
//! special: there is no quoting, escaping or comment syntax, and tabs stay
//! part of their token.
//!
//! ```text
//! "(+ 1 2)"        -> ["(", "+", "1", "2", ")"]
//! "(a  b)"         -> ["(", "a", "", "b", ")"]     doubled space keeps an empty token
//! ```

use std::collections::VecDeque;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::all_consuming,
    multi::{many0, separated_list0},
};

use crate::ast::{FloatType, NumberType, Value};
use crate::{Error, ParseError, ParseErrorKind};

/// Reader options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseConfig {
    /// Drop the empty tokens produced by leading, trailing or repeated spaces
    pub skip_empty_tokens: bool,
}

fn is_word_char(c: char) -> bool {
    c != ' ' && c != '(' && c != ')'
}

/// A parenthesis, always a token of its own
fn delimiter(input: &str) -> IResult<&str, &str> {
    alt((tag("("), tag(")"))).parse(input)
}

fn word(input: &str) -> IResult<&str, &str> {
    take_while1(is_word_char).parse(input)
}

/// The tokens of one space-separated field; may be empty
fn field(input: &str) -> IResult<&str, Vec<&str>> {
    many0(alt((delimiter, word))).parse(input)
}

fn fields(input: &str) -> IResult<&str, Vec<Vec<&str>>> {
    all_consuming(separated_list0(char(' '), field)).parse(input)
}

/// Split a line into tokens.
pub fn tokenize(input: &str) -> Result<Vec<String>, Error> {
    tokenize_with_config(input, &ParseConfig::default())
}

pub fn tokenize_with_config(input: &str, config: &ParseConfig) -> Result<Vec<String>, Error> {
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let (_, fields) = fields(input).map_err(|e| {
        ParseError::new(
            ParseErrorKind::InvalidSyntax,
            "could not split input into tokens",
            Some(format!("{e}")),
        )
    })?;

    let mut tokens = Vec::new();
    for field in fields {
        if field.is_empty() {
            if !config.skip_empty_tokens {
                tokens.push(String::new());
            }
        } else {
            tokens.extend(field.into_iter().map(str::to_owned));
        }
    }
    Ok(tokens)
}

/// Parse the first complete expression in `input`.
///
/// Tokens after the first expression are ignored.
pub fn parse(input: &str) -> Result<Value, Error> {
    parse_with_config(input, &ParseConfig::default())
}

pub fn parse_with_config(input: &str, config: &ParseConfig) -> Result<Value, Error> {
    let mut tokens: VecDeque<String> = tokenize_with_config(input, config)?.into();
    read_from_tokens(&mut tokens)
}

/// Read one expression from the front of `tokens`, consuming what it uses
pub fn read_from_tokens(tokens: &mut VecDeque<String>) -> Result<Value, Error> {
    let token = tokens.pop_front().ok_or_else(ParseError::unexpected_eof)?;
    match token.as_str() {
        "(" => {
            let mut elements = Vec::new();
            loop {
                match tokens.front().map(String::as_str) {
                    None => return Err(ParseError::unexpected_eof().into()),
                    Some(")") => {
                        tokens.pop_front();
                        return Ok(Value::List(elements));
                    }
                    Some(_) => elements.push(read_from_tokens(tokens)?),
                }
            }
        }
        ")" => Err(ParseError::unexpected_close().into()),
        _ => Ok(atom(&token)),
    }
}

/// Classify a token: integer, then float, then symbol.
///
/// Integers too large for the exact type read as floats. Float spellings
/// such as `inf` and `nan` are floats too.
pub fn atom(token: &str) -> Value {
    if let Ok(n) = token.parse::<NumberType>() {
        Value::Number(n)
    } else if let Ok(x) = token.parse::<FloatType>() {
        Value::Float(x)
    } else {
        Value::Symbol(token.to_owned())
    }
}
