use tracing::{debug, trace, warn};

use crate::{
    ast::{ASTNode, BinOp, Expression, Function, Prototype},
    lexer::{Lexer, LexerError, Position, Token},
    source::{CharSource, StrSource},
};

#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error("expected expression, found {0} at {1}")]
    ExpectedExpression(Token, Position),
    #[error("expected {expected}, found {found} at {position}")]
    UnexpectedToken {
        expected: &'static str,
        found: Token,
        position: Position,
    },
    #[error("expression nested too deeply at {0}")]
    TooDeep(Position),
    #[error(transparent)]
    Lexer(#[from] LexerError),
}

/// Deepest run of nested expressions accepted before giving up.
pub const MAX_NESTING: usize = 256;

pub type PartialParseResult = Result<Expression, ParserError>;

/// Recursive-descent parser holding one token of lookahead.
///
/// Binary operators are resolved by precedence climbing over the table in
/// [`BinOp::precedence`].
pub struct Parser<S> {
    lexer: Lexer<S>,
    current: Token,
    position: Position,
    depth: usize,
    /// Failure reading the first token, reported by the first parse call.
    pending: Option<LexerError>,
}

impl<S: CharSource> Parser<S> {
    /// Creates a parser and reads the first lookahead token. A lexer error on
    /// that token is returned by the first parse call instead.
    pub fn new(source: S) -> Self {
        let mut lexer = Lexer::new(source);
        let (current, pending) = match lexer.next_token() {
            Ok(token) => (token, None),
            Err(err) => (Token::Eof, Some(err)),
        };
        let position = lexer.token_position();
        Self {
            lexer,
            current,
            position,
            depth: 0,
            pending,
        }
    }

    fn check_pending(&mut self) -> Result<(), ParserError> {
        match self.pending.take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    pub fn current_token(&self) -> &Token {
        &self.current
    }

    /// Position of the current token.
    pub fn position(&self) -> Position {
        self.position
    }

    pub fn advance(&mut self) -> Result<&Token, ParserError> {
        self.check_pending()?;
        self.bump()?;
        Ok(&self.current)
    }

    /// Replaces the lookahead with the next token and returns the old one.
    fn bump(&mut self) -> Result<Token, ParserError> {
        let next = self.lexer.next_token()?;
        self.position = self.lexer.token_position();
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn unexpected(&self, expected: &'static str) -> ParserError {
        ParserError::UnexpectedToken {
            expected,
            found: self.current.clone(),
            position: self.position,
        }
    }

    fn expect_symbol(&mut self, symbol: char, expected: &'static str) -> Result<(), ParserError> {
        if self.current == Token::Symbol(symbol) {
            self.bump()?;
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn current_op(&self) -> Option<BinOp> {
        match self.current {
            Token::Symbol(c) => BinOp::from_symbol(c),
            _ => None,
        }
    }

    /// -1 when the lookahead is not a binary operator.
    fn current_precedence(&self) -> i32 {
        self.current_op().map_or(-1, BinOp::precedence)
    }

    fn parse_number(&mut self, value: f64) -> PartialParseResult {
        self.bump()?;
        Ok(Expression::Literal(value))
    }

    // identifier
    // identifier '(' (expression (',' expression)*)? ')'
    fn parse_identifier(&mut self, name: String) -> PartialParseResult {
        self.bump()?;
        if self.current != Token::Symbol('(') {
            return Ok(Expression::Variable(name));
        }
        self.bump()?;

        let mut args = Vec::new();
        while self.current != Token::Symbol(')') {
            args.push(self.parse_expr()?);
            match self.current {
                Token::Symbol(')') => break,
                Token::Symbol(',') => {
                    self.bump()?;
                }
                _ => return Err(self.unexpected("',' or ')'")),
            }
        }
        self.bump()?;

        Ok(Expression::Call(name, args))
    }

    fn parse_nested(&mut self) -> PartialParseResult {
        self.expect_symbol('(', "'('")?;
        let res = self.parse_expr()?;
        self.expect_symbol(')', "')'")?;
        Ok(res)
    }

    fn parse_primary(&mut self) -> PartialParseResult {
        match &self.current {
            Token::Ident(name) => {
                let name = name.clone();
                self.parse_identifier(name)
            }
            Token::Number(value) => {
                let value = *value;
                self.parse_number(value)
            }
            Token::Symbol('(') => self.parse_nested(),
            other => Err(ParserError::ExpectedExpression(other.clone(), self.position)),
        }
    }

    fn parse_rhs(&mut self, expr_precedence: i32, lhs: Expression) -> PartialParseResult {
        let mut result = lhs;

        loop {
            let operator = match self.current_op() {
                Some(op) if op.precedence() >= expr_precedence => op,
                _ => return Ok(result),
            };
            trace!(op = %operator, "binary operator");
            self.bump()?;

            let mut rhs = self.parse_primary()?;

            // a tighter operator after rhs takes rhs as its own left operand
            if operator.precedence() < self.current_precedence() {
                rhs = self.parse_rhs(operator.precedence() + 1, rhs)?;
            }

            result = Expression::binary(operator, result, rhs);
        }
    }

    pub fn parse_expr(&mut self) -> PartialParseResult {
        self.check_pending()?;
        if self.depth >= MAX_NESTING {
            return Err(ParserError::TooDeep(self.position));
        }
        self.depth += 1;
        let res = self
            .parse_primary()
            .and_then(|lhs| self.parse_rhs(0, lhs));
        self.depth -= 1;
        res
    }

    // prototype ::= identifier '(' identifier* ')'
    pub fn parse_prototype(&mut self) -> Result<Prototype, ParserError> {
        self.check_pending()?;
        let name = match &self.current {
            Token::Ident(name) => name.clone(),
            _ => return Err(self.unexpected("function name")),
        };
        self.bump()?;
        self.expect_symbol('(', "'('")?;

        let mut args = Vec::new();
        while let Token::Ident(arg) = &self.current {
            args.push(arg.clone());
            self.bump()?;
        }
        self.expect_symbol(')', "')'")?;

        Ok(Prototype::new(name, args))
    }

    // definition ::= 'def' prototype expression
    pub fn parse_definition(&mut self) -> Result<Function, ParserError> {
        self.check_pending()?;
        self.bump()?;
        let prototype = self.parse_prototype()?;
        let body = self.parse_expr()?;
        Ok(Function { prototype, body })
    }

    // external ::= 'extern' prototype
    pub fn parse_extern(&mut self) -> Result<Prototype, ParserError> {
        self.check_pending()?;
        self.bump()?;
        self.parse_prototype()
    }

    pub fn parse_top_level_expr(&mut self) -> Result<Function, ParserError> {
        let body = self.parse_expr()?;
        Ok(Function::anonymous(body))
    }

    /// Parses the next top-level construct, or `None` once the input is exhausted.
    pub fn parse_item(&mut self) -> Result<Option<ASTNode>, ParserError> {
        self.check_pending()?;
        loop {
            let node = match self.current {
                Token::Eof => return Ok(None),
                Token::Symbol(';') => {
                    self.bump()?;
                    continue;
                }
                Token::Def => {
                    let func = self.parse_definition()?;
                    debug!(name = %func.prototype.name, "parsed a function definition");
                    ASTNode::Function(func)
                }
                Token::Extern => {
                    let proto = self.parse_extern()?;
                    debug!(name = %proto.name, "parsed an extern");
                    ASTNode::Extern(proto)
                }
                _ => {
                    let func = self.parse_top_level_expr()?;
                    debug!("parsed a top level expression");
                    ASTNode::Function(func)
                }
            };
            return Ok(Some(node));
        }
    }

    /// Drops the offending lookahead so the next construct can be attempted.
    fn recover(&mut self) {
        warn!(token = %self.current, position = %self.position, "skipping token after parse error");
        loop {
            match self.bump() {
                Ok(_) => return,
                Err(ParserError::Lexer(LexerError::Io(err))) => {
                    warn!(%err, "giving up on unreadable input");
                    self.current = Token::Eof;
                    return;
                }
                Err(err) => warn!(%err, "skipping malformed input"),
            }
        }
    }
}

impl Parser<StrSource> {
    /// Parses a whole string, stopping at the first error.
    pub fn parse_str(input: &str) -> Result<Vec<ASTNode>, ParserError> {
        let mut parser = Parser::new(StrSource::new(input));
        let mut ast = Vec::new();
        while let Some(node) = parser.parse_item()? {
            ast.push(node);
        }
        Ok(ast)
    }
}

/// Yields every top-level construct, recovering after errors.
impl<S: CharSource> Iterator for Parser<S> {
    type Item = Result<ASTNode, ParserError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.parse_item() {
            Ok(node) => node.map(Ok),
            Err(ParserError::Lexer(LexerError::Io(err))) => {
                self.current = Token::Eof;
                Some(Err(LexerError::Io(err).into()))
            }
            Err(err) => {
                self.recover();
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_expr(input: &str) -> Expression {
        let mut parser = Parser::new(StrSource::new(input));
        let expr = parser.parse_expr().unwrap();
        assert_eq!(parser.current_token(), &Token::Eof);
        expr
    }

    fn parse_err(input: &str) -> ParserError {
        match Parser::parse_str(input) {
            Ok(ast) => panic!("expected {:?} to fail, parsed {:?}", input, ast),
            Err(err) => err,
        }
    }

    fn num(value: f64) -> Expression {
        Expression::Literal(value)
    }

    fn var(name: &str) -> Expression {
        Expression::Variable(name.to_string())
    }

    fn bin(op: BinOp, lhs: Expression, rhs: Expression) -> Expression {
        Expression::binary(op, lhs, rhs)
    }

    #[test]
    fn parse_expr_works() {
        let target = bin(
            BinOp::Add,
            var("x"),
            bin(BinOp::Mul, num(1.0), bin(BinOp::Sub, num(2.0), num(3.0))),
        );
        assert_eq!(parse_expr("x + 1 * (2 - 3)"), target);
    }

    #[test]
    fn mul_binds_tighter_than_add_and_sub() {
        let target = bin(
            BinOp::Sub,
            bin(BinOp::Add, num(1.0), bin(BinOp::Mul, num(2.0), num(3.0))),
            num(4.0),
        );
        assert_eq!(parse_expr("1+2*3-4"), target);
    }

    #[test]
    fn comparison_binds_loosest() {
        let target = bin(
            BinOp::Less,
            bin(BinOp::Add, num(1.0), num(2.0)),
            bin(BinOp::Mul, num(3.0), num(4.0)),
        );
        assert_eq!(parse_expr("1+2<3*4"), target);
    }

    #[test]
    fn equal_precedence_is_left_associative() {
        let target = bin(
            BinOp::Add,
            bin(BinOp::Sub, bin(BinOp::Sub, var("a"), var("b")), var("c")),
            var("d"),
        );
        assert_eq!(parse_expr("a - b - c + d"), target);

        let target = bin(BinOp::Mul, bin(BinOp::Mul, var("a"), var("b")), var("c"));
        assert_eq!(parse_expr("a*b*c"), target);
    }

    #[test]
    fn climbs_back_down_after_tighter_suffix() {
        // a < b + c * d - e  ==>  a < ((b + (c * d)) - e)
        let target = bin(
            BinOp::Less,
            var("a"),
            bin(
                BinOp::Sub,
                bin(BinOp::Add, var("b"), bin(BinOp::Mul, var("c"), var("d"))),
                var("e"),
            ),
        );
        assert_eq!(parse_expr("a < b + c * d - e"), target);
    }

    #[test]
    fn parentheses_leave_no_trace() {
        assert_eq!(parse_expr("((x))"), var("x"));
        assert_eq!(
            parse_expr("(1 + 2) * 3"),
            bin(BinOp::Mul, bin(BinOp::Add, num(1.0), num(2.0)), num(3.0))
        );
    }

    #[test]
    fn calls() {
        assert_eq!(
            parse_expr("foo(1, 2+3)"),
            Expression::Call(
                "foo".to_string(),
                vec![num(1.0), bin(BinOp::Add, num(2.0), num(3.0))]
            )
        );
        assert_eq!(parse_expr("rand()"), Expression::Call("rand".to_string(), vec![]));
        assert_eq!(
            parse_expr("f(g(x), 1,)"),
            Expression::Call(
                "f".to_string(),
                vec![Expression::Call("g".to_string(), vec![var("x")]), num(1.0)]
            )
        );
    }

    #[test]
    fn unknown_symbol_ends_expression() {
        let mut parser = Parser::new(StrSource::new("1 + 2 / 3"));
        assert_eq!(
            parser.parse_expr().unwrap(),
            bin(BinOp::Add, num(1.0), num(2.0))
        );
        assert_eq!(parser.current_token(), &Token::Symbol('/'));
    }

    #[test]
    fn anonymous_top_level_expression() {
        let ast = Parser::parse_str("42").unwrap();
        assert_eq!(
            ast,
            vec![ASTNode::Function(Function {
                prototype: Prototype::new("", vec![]),
                body: num(42.0),
            })]
        );
    }

    #[test]
    fn definitions_and_externs() {
        let source = "
            # declarations
            extern sin(x);
            def thing(x y) sin(x) * y;
            extern rand()
            thing(1, 2)
        ";
        let ast = Parser::parse_str(source).unwrap();
        assert_eq!(
            ast,
            vec![
                ASTNode::Extern(Prototype::new("sin", vec!["x".to_string()])),
                ASTNode::Function(Function {
                    prototype: Prototype::new("thing", vec!["x".to_string(), "y".to_string()]),
                    body: bin(
                        BinOp::Mul,
                        Expression::Call("sin".to_string(), vec![var("x")]),
                        var("y")
                    ),
                }),
                ASTNode::Extern(Prototype::new("rand", vec![])),
                ASTNode::Function(Function::anonymous(Expression::Call(
                    "thing".to_string(),
                    vec![num(1.0), num(2.0)]
                ))),
            ]
        );
    }

    #[test]
    fn empty_input_has_no_items() {
        assert_eq!(Parser::parse_str("").unwrap(), Vec::<ASTNode>::new());
        assert_eq!(Parser::parse_str(" ; ;\n# nothing\n").unwrap(), Vec::<ASTNode>::new());
    }

    #[test]
    fn missing_primary_is_an_error() {
        match parse_err("1 + )") {
            ParserError::ExpectedExpression(found, pos) => {
                assert_eq!(found, Token::Symbol(')'));
                assert_eq!(pos, Position { line: 1, column: 5 });
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(matches!(
            parse_err("foo(1 +"),
            ParserError::ExpectedExpression(Token::Eof, _)
        ));
    }

    #[test]
    fn missing_close_paren_is_an_error() {
        match parse_err("(1 + 2") {
            ParserError::UnexpectedToken {
                expected,
                found,
                position,
            } => {
                assert_eq!(expected, "')'");
                assert_eq!(found, Token::Eof);
                assert_eq!(position, Position { line: 1, column: 7 });
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn call_arguments_need_commas() {
        assert!(matches!(
            parse_err("foo(1 2)"),
            ParserError::UnexpectedToken { expected: "',' or ')'", found: Token::Number(_), .. }
        ));
        assert!(matches!(
            parse_err("foo(1; 2)"),
            ParserError::UnexpectedToken { found: Token::Symbol(';'), .. }
        ));
    }

    #[test]
    fn prototypes_are_checked() {
        assert!(matches!(
            parse_err("def (x) x"),
            ParserError::UnexpectedToken { expected: "function name", .. }
        ));
        assert!(matches!(
            parse_err("def f x) x"),
            ParserError::UnexpectedToken { expected: "'('", .. }
        ));
        assert!(matches!(
            parse_err("extern f(x, y)"),
            ParserError::UnexpectedToken { expected: "')'", found: Token::Symbol(','), .. }
        ));
        assert!(matches!(
            parse_err("extern"),
            ParserError::UnexpectedToken { expected: "function name", found: Token::Eof, .. }
        ));
    }

    #[test]
    fn lexer_errors_propagate() {
        assert!(matches!(
            parse_err("def f(x) x + 1.2.3"),
            ParserError::Lexer(LexerError::InvalidNumber(..))
        ));
    }

    #[test]
    fn iterator_recovers_after_errors() {
        let parser = Parser::new(StrSource::new("1 + ; def f(x) x 2"));
        let items: Vec<_> = parser.collect();
        assert_eq!(items.len(), 3);
        assert!(matches!(
            items[0],
            Err(ParserError::ExpectedExpression(Token::Symbol(';'), _))
        ));
        assert_eq!(
            items[1].as_ref().unwrap(),
            &ASTNode::Function(Function {
                prototype: Prototype::new("f", vec!["x".to_string()]),
                body: var("x"),
            })
        );
        assert_eq!(
            items[2].as_ref().unwrap(),
            &ASTNode::Function(Function::anonymous(num(2.0)))
        );
    }

    #[test]
    fn iterator_recovers_after_lexer_errors() {
        let parser = Parser::new(StrSource::new("1 + 1..2\n3"));
        let items: Vec<_> = parser.collect();
        assert_eq!(items.len(), 2);
        assert!(matches!(
            items[0],
            Err(ParserError::Lexer(LexerError::InvalidNumber(..)))
        ));
        assert_eq!(
            items[1].as_ref().unwrap(),
            &ASTNode::Function(Function::anonymous(num(3.0)))
        );
    }

    #[test]
    fn iterator_recovers_after_leading_lexer_error() {
        let mut parser = Parser::new(StrSource::new("1..2\n3"));
        assert!(matches!(
            parser.next(),
            Some(Err(ParserError::Lexer(LexerError::InvalidNumber(..))))
        ));
        assert_eq!(
            parser.next().unwrap().unwrap(),
            ASTNode::Function(Function::anonymous(num(3.0)))
        );
        assert!(parser.next().is_none());
    }

    #[test]
    fn leading_lexer_error_fails_parse_str() {
        assert!(matches!(
            parse_err(".\n3"),
            ParserError::Lexer(LexerError::InvalidNumber(..))
        ));
    }

    #[test]
    fn advance_walks_the_lookahead() {
        let mut parser = Parser::new(StrSource::new("extern f;"));
        assert_eq!(parser.current_token(), &Token::Extern);
        assert_eq!(parser.advance().unwrap(), &Token::Ident("f".to_string()));
        assert_eq!(parser.position(), Position { line: 1, column: 8 });
        assert_eq!(parser.advance().unwrap(), &Token::Symbol(';'));
        assert_eq!(parser.advance().unwrap(), &Token::Eof);
        assert_eq!(parser.advance().unwrap(), &Token::Eof);
    }

    #[test]
    fn deep_nesting_is_an_error() {
        let nested = |depth: usize| format!("{}1{}", "(".repeat(depth), ")".repeat(depth));

        assert_eq!(parse_expr(&nested(MAX_NESTING - 1)), num(1.0));
        assert!(matches!(
            parse_err(&nested(MAX_NESTING)),
            ParserError::TooDeep(Position { line: 1, column }) if column == MAX_NESTING + 1
        ));
        assert!(matches!(
            parse_err(&nested(100_000)),
            ParserError::TooDeep(_)
        ));

        let calls = format!("{}x{}", "f(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert!(matches!(parse_err(&calls), ParserError::TooDeep(_)));
    }

    #[test]
    fn nesting_depth_resets_after_error() {
        let source = format!("{}1;2 + (3)", "(".repeat(MAX_NESTING + 10));
        let items: Vec<_> = Parser::new(StrSource::new(source)).collect();
        let last = items.last().unwrap().as_ref().unwrap();
        assert_eq!(
            last,
            &ASTNode::Function(Function::anonymous(bin(BinOp::Add, num(2.0), num(3.0))))
        );
    }

    #[test]
    fn parsers_are_independent() {
        let mut a = Parser::new(StrSource::new("x + y"));
        let mut b = Parser::new(StrSource::new("def g(z) z"));
        assert_eq!(a.current_token(), &Token::Ident("x".to_string()));
        assert_eq!(b.current_token(), &Token::Def);
        let def = b.parse_definition().unwrap();
        let expr = a.parse_expr().unwrap();
        assert_eq!(def.prototype.name, "g");
        assert_eq!(expr, bin(BinOp::Add, var("x"), var("y")));
    }

    #[test]
    fn printed_trees_reparse_identically() {
        let sources = [
            "1+2*3-4",
            "1+2<3*4",
            "a - (b - c) * (d < e)",
            "foo(1, 2+3, bar(), x*y)",
            "0.5 * .25 + 10",
            "def add(a b) a + b * 2",
            "def zero() 0",
            "extern sin(x)",
            "extern nothing()",
            "def cmp(x y z) x < y - z < z",
        ];
        for source in &sources {
            for node in Parser::parse_str(source).unwrap() {
                let printed = node.to_string();
                let reparsed = Parser::parse_str(&printed).unwrap();
                assert_eq!(reparsed, vec![node], "printed as {:?}", printed);
            }
        }
    }
}
