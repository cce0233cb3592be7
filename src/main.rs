use std::process;

use anyhow::Context;
use clap::{App, Arg, ArgGroup};
use kaleido_front::{ASTNode, CharSource, FileSource, Lexer, LexerError, Parser, StrSource, Token};
use tracing_subscriber::EnvFilter;

fn print_tokens(source: impl CharSource) -> anyhow::Result<bool> {
    let mut lexer = Lexer::new(source);
    let mut ok = true;
    loop {
        match lexer.next_token() {
            Ok(Token::Eof) => return Ok(ok),
            Ok(token) => println!("{} {}", lexer.token_position(), token),
            Err(LexerError::Io(err)) => return Err(err).context("failed to read input"),
            Err(err) => {
                eprintln!("error: {}", err);
                ok = false;
            }
        }
    }
}

fn print_ast(source: impl CharSource) -> anyhow::Result<bool> {
    let parser = Parser::new(source);
    let mut ok = true;
    for node in parser {
        match node {
            Ok(ASTNode::Extern(proto)) => println!("extern: {}", proto),
            Ok(ASTNode::Function(func)) if func.prototype.is_anonymous() => {
                println!("expression: {}", func.body)
            }
            Ok(ASTNode::Function(func)) => println!("definition: {}", func),
            Err(err) => {
                eprintln!("error: {}", err);
                ok = false;
            }
        }
    }
    Ok(ok)
}

fn run(source: impl CharSource, tokens_only: bool) -> anyhow::Result<bool> {
    if tokens_only {
        print_tokens(source)
    } else {
        print_ast(source)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = App::new("kaleido")
        .about("lexes and parses kaleidoscope source")
        .arg(
            Arg::with_name("FILE")
                .help("source file to parse")
                .index(1),
        )
        .arg(
            Arg::with_name("expr")
                .short("e")
                .long("expr")
                .takes_value(true)
                .value_name("SOURCE")
                .help("parse SOURCE instead of a file"),
        )
        .arg(
            Arg::with_name("tokens")
                .long("tokens")
                .help("print the token stream instead of the ast"),
        )
        .group(
            ArgGroup::with_name("input")
                .args(&["FILE", "expr"])
                .required(true),
        )
        .get_matches();

    let tokens_only = matches.is_present("tokens");
    let ok = match matches.value_of("expr") {
        Some(source) => run(StrSource::new(source), tokens_only)?,
        None => {
            let path = matches.value_of("FILE").context("no input given")?;
            let source =
                FileSource::open(path).with_context(|| format!("failed to open {}", path))?;
            run(source, tokens_only)?
        }
    };

    if !ok {
        process::exit(1);
    }
    Ok(())
}
