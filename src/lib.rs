//! Front end for a small kaleidoscope-style expression language.
//!
//! Characters come in through a [`source::CharSource`], the [`lexer::Lexer`]
//! turns them into tokens and the [`parser::Parser`] builds [`ast`] nodes.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod source;

pub use ast::{ASTNode, BinOp, Expression, Function, Prototype};
pub use lexer::{lex, Lexer, LexerError, Position, Token};
pub use parser::{Parser, ParserError};
pub use source::{CharSource, FileSource, StrSource};
