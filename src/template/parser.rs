//! Parser for the username template language.
//!
//! The language is a small subset of Go's `text/template`:
//!
//! ```text
//! V_{{.DisplayName | uppercase | truncate 64}}_{{random 20}}_{{unix_time}}
//! ```
//!
//! - text outside `{{ }}` is copied verbatim
//! - `.Field` reads a metadata field
//! - `name arg...` calls a function; arguments are integers, quoted strings or fields
//! - `a | f x` passes the value of `a` as the last argument of `f x`
//! - `{{-` and `-}}` trim whitespace around the action

use crate::error::{DbError, DbResult};
use crate::template::funcs::Func;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Text(String),
    Action(Vec<Command>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// A bare operand, e.g. `.RoleName` or `"abc"`.
    Operand(Operand),
    Call { func: Func, args: Vec<Operand> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Operand {
    Int(i64),
    Str(String),
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Field(String),
    Ident(String),
    Int(i64),
    Str(String),
    Pipe,
}

pub(crate) fn parse(source: &str) -> DbResult<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut trim_next_text = false;

    while let Some(start) = rest.find(OPEN) {
        let mut text = &rest[..start];
        if trim_next_text {
            text = text.trim_start();
        }
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open
            .find(CLOSE)
            .ok_or_else(|| DbError::template("unclosed action"))?;
        let mut body = &after_open[..end];

        if let Some(stripped) = trim_marker_left(body) {
            body = stripped;
            text = text.trim_end();
        }
        trim_next_text = false;
        if let Some(stripped) = trim_marker_right(body) {
            body = stripped;
            trim_next_text = true;
        }

        if !text.is_empty() {
            segments.push(Segment::Text(text.to_string()));
        }
        segments.push(Segment::Action(parse_pipeline(body)?));
        rest = &after_open[end + CLOSE.len()..];
    }

    let tail = if trim_next_text { rest.trim_start() } else { rest };
    if !tail.is_empty() {
        segments.push(Segment::Text(tail.to_string()));
    }
    Ok(segments)
}

/// `{{- x` trims preceding text. The dash must be followed by whitespace.
fn trim_marker_left(body: &str) -> Option<&str> {
    let stripped = body.strip_prefix('-')?;
    stripped
        .starts_with(char::is_whitespace)
        .then_some(stripped)
}

/// `x -}}` trims following text. The dash must be preceded by whitespace.
fn trim_marker_right(body: &str) -> Option<&str> {
    let stripped = body.strip_suffix('-')?;
    stripped.ends_with(char::is_whitespace).then_some(stripped)
}

fn parse_pipeline(body: &str) -> DbResult<Vec<Command>> {
    let tokens = tokenize(body)?;
    if tokens.is_empty() {
        return Err(DbError::template("missing value for command"));
    }

    let mut commands = Vec::new();
    for (position, group) in tokens.split(|t| *t == Token::Pipe).enumerate() {
        if group.is_empty() {
            return Err(DbError::template("missing command in pipeline"));
        }
        commands.push(parse_command(group, position > 0)?);
    }
    Ok(commands)
}

fn parse_command(tokens: &[Token], piped: bool) -> DbResult<Command> {
    match &tokens[0] {
        Token::Ident(name) => {
            let func = Func::lookup(name)
                .ok_or_else(|| DbError::template(format!("function \"{name}\" not defined")))?;
            let args = tokens[1..]
                .iter()
                .map(operand)
                .collect::<DbResult<Vec<_>>>()?;
            let supplied = args.len() + usize::from(piped);
            if supplied != func.arity() {
                return Err(DbError::template(format!(
                    "wrong number of args for {}: want {} got {}",
                    func.name(),
                    func.arity(),
                    supplied
                )));
            }
            Ok(Command::Call { func, args })
        }
        _ if piped => Err(DbError::template(
            "non executable command in pipeline stage",
        )),
        _ if tokens.len() > 1 => Err(DbError::template(format!(
            "can't give argument to non-function {:?}",
            tokens[0]
        ))),
        first => Ok(Command::Operand(operand(first)?)),
    }
}

fn operand(token: &Token) -> DbResult<Operand> {
    match token {
        Token::Field(name) => Ok(Operand::Field(name.clone())),
        Token::Int(value) => Ok(Operand::Int(*value)),
        Token::Str(value) => Ok(Operand::Str(value.clone())),
        Token::Ident(name) => Err(DbError::template(format!(
            "function \"{name}\" cannot be used as an argument"
        ))),
        Token::Pipe => Err(DbError::template("unexpected \"|\"")),
    }
}

fn tokenize(body: &str) -> DbResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = body.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '|' => {
                chars.next();
                tokens.push(Token::Pipe);
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, other)) => value.push(other),
                            None => break,
                        },
                        other => value.push(other),
                    }
                }
                if !closed {
                    return Err(DbError::template("unterminated quoted string"));
                }
                tokens.push(Token::Str(value));
            }
            '.' => {
                chars.next();
                let name = take_word(body, &mut chars, i + 1);
                if name.is_empty() {
                    return Err(DbError::template("missing field name after '.'"));
                }
                tokens.push(Token::Field(name.to_string()));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let word = take_word(body, &mut chars, i);
                let value = word
                    .parse::<i64>()
                    .map_err(|_| DbError::template(format!("bad number syntax: {word:?}")))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let word = take_word(body, &mut chars, i);
                tokens.push(Token::Ident(word.to_string()));
            }
            other => {
                return Err(DbError::template(format!(
                    "unexpected character {other:?} in action"
                )));
            }
        }
    }
    Ok(tokens)
}

/// Consume a run of identifier characters starting at byte `start`.
fn take_word<'a>(
    body: &'a str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'a>>,
    start: usize,
) -> &'a str {
    let mut end = body.len();
    while let Some(&(i, c)) = chars.peek() {
        if i >= start && !(c.is_alphanumeric() || c == '_' || (i == start && c == '-')) {
            end = i;
            break;
        }
        chars.next();
    }
    &body[start..end]
}
