use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit1, not_line_ending, one_of},
    combinator::{all_consuming, map, opt, recognize, value},
    multi::many0,
    sequence::pair,
};

use crate::ast::{FALSE_TOKEN, Node, NumberType, TRUE_TOKEN};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Reader settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseConfig {
    /// Treat `;` as the start of a comment running to the end of the line.
    /// A `;` also ends the atom it touches.
    pub handle_comments: bool,
}

/// Lexical token of the s-expression grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Open,
    Close,
    Atom(&'a str),
}

impl Token<'_> {
    fn text(&self) -> &str {
        match self {
            Token::Open => "(",
            Token::Close => ")",
            Token::Atom(text) => text,
        }
    }
}

fn is_atom_char(c: char, config: ParseConfig) -> bool {
    !c.is_whitespace() && c != '(' && c != ')' && !(config.handle_comments && c == ';')
}

/// Parse a comment (`;` to end of line, newline not included)
fn comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char(';'), not_line_ending)).parse(input)
}

/// Skip whitespace, and comments when enabled
fn skip_trivia(input: &str, config: ParseConfig) -> IResult<&str, ()> {
    let whitespace = || take_while(|c: char| c.is_whitespace());
    if config.handle_comments {
        value((), pair(whitespace(), many0(pair(comment, whitespace())))).parse(input)
    } else {
        value((), whitespace()).parse(input)
    }
}

/// Parse one token: a parenthesis or a maximal run of atom characters
fn next_token(input: &str, config: ParseConfig) -> IResult<&str, Token<'_>> {
    alt((
        value(Token::Open, char('(')),
        value(Token::Close, char(')')),
        map(take_while1(move |c: char| is_atom_char(c, config)), Token::Atom),
    ))
    .parse(input)
}

/// Parse a whole token as a decimal integer with optional sign.
///
/// Returns `None` for anything else, including digit strings that overflow
/// the number type.
pub fn parse_number(token: &str) -> Option<NumberType> {
    let parsed: IResult<&str, &str> =
        all_consuming(recognize(pair(opt(one_of("+-")), digit1))).parse(token);
    let (_, digits) = parsed.ok()?;
    digits.parse::<NumberType>().ok()
}

/// True when a token starts the way a number literal does
fn looks_numeric(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('+' | '-') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

/// Reject tokens that claim to be literals but are not valid ones
fn check_atom(token: &str) -> Result<(), &'static str> {
    if token.starts_with('#') && token != TRUE_TOKEN && token != FALSE_TOKEN {
        return Err("Unknown literal (only #t and #f are supported)");
    }
    if looks_numeric(token) && parse_number(token).is_none() {
        return Err("Invalid number literal (expected a 64-bit decimal integer)");
    }
    Ok(())
}

/// Convert nom parsing errors to a syntax error at the failing position
fn nom_error_to_syntax_error(input: &str, error: nom::Err<nom::error::Error<&str>>) -> Error {
    let position = match &error {
        nom::Err::Error(e) | nom::Err::Failure(e) => input.len().saturating_sub(e.input.len()),
        nom::Err::Incomplete(_) => input.len(),
    };
    let near: String = input
        .get(position..)
        .unwrap_or_default()
        .chars()
        .take(10)
        .collect();
    Error::SyntaxError(ParseError::with_context_and_found(
        ParseErrorKind::MalformedAtom,
        format!("Invalid syntax at position {position}"),
        input,
        position,
        Some(near),
    ))
}

fn syntax_error(
    kind: ParseErrorKind,
    message: impl Into<String>,
    input: &str,
    offset: usize,
    found: Option<&str>,
) -> Error {
    Error::SyntaxError(ParseError::with_context_and_found(
        kind,
        message,
        input,
        offset,
        found.map(str::to_owned),
    ))
}

/// Parse a complete S-expression from input using default settings.
pub fn parse_scheme(input: &str) -> Result<Node, Error> {
    parse_scheme_with_config(input, ParseConfig::default())
}

/// Parse exactly one S-expression from input.
///
/// Tokens are read left to right; open lists live on an explicit stack so
/// nesting depth never turns into native recursion. Either a complete tree is
/// returned or an error, never a partial tree.
pub fn parse_scheme_with_config(input: &str, config: ParseConfig) -> Result<Node, Error> {
    // Byte offset of each open '(' and the children read so far
    let mut open_lists: Vec<(usize, Vec<Node>)> = Vec::new();
    let mut result: Option<Node> = None;
    let mut rest = input;

    loop {
        let (after_trivia, ()) =
            skip_trivia(rest, config).map_err(|e| nom_error_to_syntax_error(input, e))?;
        if after_trivia.is_empty() {
            break;
        }

        let offset = input.len() - after_trivia.len();
        let (after_token, token) =
            next_token(after_trivia, config).map_err(|e| nom_error_to_syntax_error(input, e))?;
        rest = after_token;

        if result.is_some() {
            return Err(syntax_error(
                ParseErrorKind::TrailingContent,
                "Unexpected input after complete expression",
                input,
                offset,
                Some(token.text()),
            ));
        }

        let completed = match token {
            Token::Open => {
                if open_lists.len() >= MAX_PARSE_DEPTH {
                    return Err(syntax_error(
                        ParseErrorKind::TooDeeplyNested,
                        format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                        input,
                        offset,
                        Some("("),
                    ));
                }
                open_lists.push((offset, Vec::new()));
                continue;
            }
            Token::Close => match open_lists.pop() {
                Some((_, children)) => Node::List(children),
                None => {
                    return Err(syntax_error(
                        ParseErrorKind::UnmatchedClose,
                        "Unmatched ')' with no open list",
                        input,
                        offset,
                        Some(")"),
                    ));
                }
            },
            Token::Atom(text) => {
                check_atom(text).map_err(|message| {
                    syntax_error(
                        ParseErrorKind::MalformedAtom,
                        message,
                        input,
                        offset,
                        Some(text),
                    )
                })?;
                Node::Atom(text.to_owned())
            }
        };

        match open_lists.last_mut() {
            Some((_, siblings)) => siblings.push(completed),
            None => result = Some(completed),
        }
    }

    if let Some((open_offset, _)) = open_lists.first() {
        return Err(syntax_error(
            ParseErrorKind::Unclosed,
            format!("Unexpected end of input: {} unclosed '('", open_lists.len()),
            input,
            *open_offset,
            None,
        ));
    }

    result.ok_or_else(|| {
        Error::SyntaxError(ParseError::from_message(
            ParseErrorKind::Empty,
            "Empty input: expected an expression",
        ))
    })
}
