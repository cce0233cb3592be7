use std::{fmt, io};

use lazy_static::lazy_static;
use regex::Regex;

use crate::source::{CharSource, StrSource};

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Eof,
    Def,
    Extern,
    Ident(String),
    Number(f64),
    /// Any other single character, operators and punctuation alike.
    Symbol(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Eof => write!(f, "end of input"),
            Token::Def => write!(f, "'def'"),
            Token::Extern => write!(f, "'extern'"),
            Token::Ident(name) => write!(f, "identifier '{}'", name),
            Token::Number(value) => write!(f, "number {}", value),
            Token::Symbol(c) => write!(f, "'{}'", c),
        }
    }
}

/// 1-based line and column of a character in the input.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LexerError {
    #[error("invalid number literal '{0}' at {1}")]
    InvalidNumber(String, Position),
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
}

lazy_static! {
    static ref NUMBER_RE: Regex = Regex::new(r"^(?:[0-9]+\.?[0-9]*|\.[0-9]+)$").unwrap();
}

/// Turns a character source into tokens, one per call to [`Lexer::next_token`].
///
/// Holds a single character of lookahead between calls.
pub struct Lexer<S> {
    source: S,
    last_char: Option<char>,
    position: Position,
    token_position: Position,
}

impl<S: CharSource> Lexer<S> {
    pub fn new(source: S) -> Self {
        let start = Position { line: 1, column: 0 };
        Self {
            source,
            // primed with whitespace so the first call reads from the source
            last_char: Some(' '),
            position: start,
            token_position: start,
        }
    }

    /// Where the most recently returned token started.
    pub fn token_position(&self) -> Position {
        self.token_position
    }

    fn bump(&mut self) -> Result<Option<char>, LexerError> {
        let next = self.source.next_char()?;
        if self.last_char == Some('\n') {
            self.position.line += 1;
            self.position.column = 1;
        } else {
            self.position.column += 1;
        }
        self.last_char = next;
        Ok(next)
    }

    fn bump_while(
        &mut self,
        buf: &mut String,
        pred: impl Fn(char) -> bool,
    ) -> Result<(), LexerError> {
        while let Some(c) = self.last_char {
            if !pred(c) {
                break;
            }
            buf.push(c);
            self.bump()?;
        }
        Ok(())
    }

    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        loop {
            while let Some(c) = self.last_char {
                if !c.is_whitespace() {
                    break;
                }
                self.bump()?;
            }
            self.token_position = self.position;

            let c = match self.last_char {
                Some(c) => c,
                None => return Ok(Token::Eof),
            };

            if c.is_alphabetic() {
                let mut ident = String::new();
                self.bump_while(&mut ident, char::is_alphanumeric)?;
                return Ok(match ident.as_str() {
                    "def" => Token::Def,
                    "extern" => Token::Extern,
                    _ => Token::Ident(ident),
                });
            }

            if c.is_ascii_digit() || c == '.' {
                let mut text = String::new();
                self.bump_while(&mut text, |c| c.is_ascii_digit() || c == '.')?;
                if !NUMBER_RE.is_match(&text) {
                    return Err(LexerError::InvalidNumber(text, self.token_position));
                }
                // overflowing runs parse to infinity, which has no literal form
                return match text.parse::<f64>() {
                    Ok(value) if value.is_finite() => Ok(Token::Number(value)),
                    _ => Err(LexerError::InvalidNumber(text, self.token_position)),
                };
            }

            if c == '#' {
                while let Some(c) = self.bump()? {
                    if c == '\n' || c == '\r' {
                        break;
                    }
                }
                continue;
            }

            self.bump()?;
            return Ok(Token::Symbol(c));
        }
    }
}

/// Tokenize a whole string. The last token is always [`Token::Eof`].
pub fn lex(input: &str) -> Result<Vec<Token>, LexerError> {
    let mut lexer = Lexer::new(StrSource::new(input));
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token == Token::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}
