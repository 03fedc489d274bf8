//! Recursive-descent parser for watch expressions
//!
//! Precedence, lowest first: offset (`+`/`-` with a determinant right side),
//! cast, unary `*`/`&`, postfix (`.`, `->`, `[]`), primary.

use super::ast::{Access, DetExpr, DetOp, Expr, OffsetOp, ScopedIdent, TypeName, TypeSuffix, UnaryOp};
use super::error::EvalError;
use super::lexer::{tokenize, Token, TokenKind};

/// Parse a watch expression into our AST
pub fn parse_expr(input: &str) -> Result<Expr, EvalError> {
    let mut parser = Parser::new(tokenize(input)?)?;
    let expr = parser.parse_offset()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse a standalone determinant expression (`sizeof(int) * 4`)
pub fn parse_det_expr(input: &str) -> Result<DetExpr, EvalError> {
    let mut parser = Parser::new(tokenize(input)?)?;
    let expr = parser.parse_det()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse a type name (`ns::Point*[]`)
pub fn parse_type_name(input: &str) -> Result<TypeName, EvalError> {
    let mut parser = Parser::new(tokenize(input)?)?;
    let ty = parser.parse_type_name()?;
    parser.expect_end()?;
    Ok(ty)
}

/// Deepest paren, cast or unary nesting accepted
const MAX_NESTING: usize = 64;
/// Longest token stream accepted; bounds the depth of left-nested chains
const MAX_TOKENS: usize = 512;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Result<Self, EvalError> {
        if let Some(extra) = tokens.get(MAX_TOKENS) {
            return Err(EvalError::parse_failure(
                extra.offset,
                extra.kind.to_string(),
                "expression too long",
            ));
        }
        match tokens.last() {
            Some(Token {
                kind: TokenKind::Eof,
                ..
            }) => Ok(Self {
                tokens,
                pos: 0,
                depth: 0,
            }),
            _ => Err(EvalError::internal("token stream has no end-of-input marker")),
        }
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, EvalError>) -> Result<T, EvalError> {
        if self.depth >= MAX_NESTING {
            return Err(self.failure("expression nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + ahead)
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |t| t.offset)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn failure(&self, message: &str) -> EvalError {
        EvalError::parse_failure(self.offset(), self.peek().to_string(), message)
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<(), EvalError> {
        if *self.peek() == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.failure(message))
        }
    }

    fn expect_end(&self) -> Result<(), EvalError> {
        match self.peek() {
            TokenKind::Eof if self.pos == self.tokens.len() - 1 => Ok(()),
            TokenKind::Eof => Err(EvalError::internal("end-of-input marker before the last token")),
            _ => Err(self.failure("unexpected trailing input")),
        }
    }

    fn ident(&mut self, message: &str) -> Result<String, EvalError> {
        match self.peek() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.failure(message)),
        }
    }

    // offset_expr := cast_expr (('+' | '-') det_term)*
    fn parse_offset(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_cast()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => OffsetOp::Add,
                TokenKind::Minus => OffsetOp::Sub,
                _ => break,
            };
            self.advance();
            let offset = self.parse_det_term()?;
            expr = Expr::Offset {
                base: Box::new(expr),
                op,
                offset,
            };
        }
        Ok(expr)
    }

    // cast_expr := '(' type_name ')' cast_expr | unary_expr
    fn parse_cast(&mut self) -> Result<Expr, EvalError> {
        self.nested(|p| {
            if *p.peek() == TokenKind::LParen {
                if let Some((ty, resume)) = p.speculate_cast_type() {
                    p.pos = resume;
                    let expr = p.parse_cast()?;
                    return Ok(Expr::Cast {
                        ty,
                        expr: Box::new(expr),
                    });
                }
            }
            p.parse_unary()
        })
    }

    /// A parenthesized type name counts as a cast only when a cast operand follows.
    fn speculate_cast_type(&mut self) -> Option<(TypeName, usize)> {
        let start = self.pos;
        self.advance();
        let parsed = self
            .parse_type_name()
            .and_then(|ty| self.expect(TokenKind::RParen, "expected `)`").map(|_| ty));
        let resume = self.pos;
        self.pos = start;

        let ty = parsed.ok()?;
        let operand_follows = matches!(
            self.tokens.get(resume).map(|t| &t.kind),
            Some(TokenKind::Ident(_))
                | Some(TokenKind::LParen)
                | Some(TokenKind::LBrace)
                | Some(TokenKind::Star)
                | Some(TokenKind::Amp)
        );
        operand_follows.then_some((ty, resume))
    }

    // unary_expr := ('*' | '&') cast_expr | postfix_expr
    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek() {
            TokenKind::Star => UnaryOp::Deref,
            TokenKind::Amp => UnaryOp::AddrOf,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let expr = self.parse_cast()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    // postfix_expr := primary ('.' ident | '->' ident | '[' det_expr ']')*
    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_primary()?;
        loop {
            let access = match self.peek() {
                TokenKind::Dot => Access::Dot,
                TokenKind::Arrow => Access::Arrow,
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.nested(Self::parse_det)?;
                    self.expect(TokenKind::RBracket, "expected `]`")?;
                    expr = Expr::Index {
                        base: Box::new(expr),
                        index,
                    };
                    continue;
                }
                _ => break,
            };
            self.advance();
            let member = self.ident("expected member name")?;
            expr = Expr::Member {
                base: Box::new(expr),
                access,
                member,
            };
        }
        Ok(expr)
    }

    // primary := '(' expr ')' | '{' expr '}' | scoped_ident
    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_offset()?;
                self.expect(TokenKind::RParen, "expected `)`")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            TokenKind::LBrace => {
                self.advance();
                let inner = self.parse_offset()?;
                self.expect(TokenKind::RBrace, "expected `}`")?;
                Ok(Expr::SingleEval(Box::new(inner)))
            }
            TokenKind::Ident(_) => Ok(Expr::Ident(self.parse_scoped_ident()?)),
            _ => Err(self.failure("expected expression")),
        }
    }

    fn parse_scoped_ident(&mut self) -> Result<ScopedIdent, EvalError> {
        let mut segments = vec![self.ident("expected identifier")?];
        while *self.peek() == TokenKind::ColonColon {
            self.advance();
            segments.push(self.ident("expected identifier after `::`")?);
        }
        Ok(ScopedIdent::new(segments))
    }

    // type_name := scoped_ident ('*' | '[' ']')*
    fn parse_type_name(&mut self) -> Result<TypeName, EvalError> {
        let base = self.parse_scoped_ident()?;
        let mut suffixes = Vec::new();
        loop {
            match (self.peek(), self.peek_at(1)) {
                (TokenKind::Star, _) => {
                    self.advance();
                    suffixes.push(TypeSuffix::Pointer);
                }
                (TokenKind::LBracket, TokenKind::RBracket) => {
                    self.advance();
                    self.advance();
                    suffixes.push(TypeSuffix::Array);
                }
                _ => break,
            }
        }
        Ok(TypeName { base, suffixes })
    }

    // det_expr := det_term (('+' | '-') det_term)*
    fn parse_det(&mut self) -> Result<DetExpr, EvalError> {
        let mut expr = self.parse_det_term()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => DetOp::Add,
                TokenKind::Minus => DetOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_det_term()?;
            expr = DetExpr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    // det_term := det_unary ('*' det_unary)*
    fn parse_det_term(&mut self) -> Result<DetExpr, EvalError> {
        let mut expr = self.parse_det_unary()?;
        while *self.peek() == TokenKind::Star {
            self.advance();
            let right = self.parse_det_unary()?;
            expr = DetExpr::Binary {
                left: Box::new(expr),
                op: DetOp::Mul,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    // det_unary := '-' det_primary | det_primary
    fn parse_det_unary(&mut self) -> Result<DetExpr, EvalError> {
        if *self.peek() == TokenKind::Minus {
            self.advance();
            let inner = self.parse_det_primary()?;
            return Ok(DetExpr::Neg(Box::new(inner)));
        }
        self.parse_det_primary()
    }

    // det_primary := '(' det_expr ')' | 'sizeof' '(' type_name ')' | num_lit
    fn parse_det_primary(&mut self) -> Result<DetExpr, EvalError> {
        match self.peek() {
            TokenKind::Number(value) => {
                let value = *value;
                self.advance();
                Ok(DetExpr::Literal(value))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.nested(Self::parse_det)?;
                self.expect(TokenKind::RParen, "expected `)`")?;
                Ok(DetExpr::Paren(Box::new(inner)))
            }
            TokenKind::Ident(name) if name == "sizeof" => self.parse_sizeof(),
            _ => Err(self.failure("expected integer expression")),
        }
    }

    fn parse_sizeof(&mut self) -> Result<DetExpr, EvalError> {
        let position = self.offset();
        self.advance();
        self.expect(TokenKind::LParen, "expected `(` after sizeof")?;

        match self.peek() {
            TokenKind::Ident(_) => {}
            TokenKind::Eof => return Err(self.failure("expected type name")),
            _ => return Err(EvalError::DetExprUnimplemented { position }),
        }

        let ty = self.parse_type_name()?;
        match self.peek() {
            TokenKind::RParen => {
                self.advance();
                Ok(DetExpr::SizeOf(ty))
            }
            TokenKind::Eof => Err(self.failure("expected `)`")),
            _ => Err(EvalError::DetExprUnimplemented { position }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(ScopedIdent::single(name)))
    }

    #[test]
    fn test_parse_scoped_ident() {
        let expr = parse_expr("ns::inner::value").unwrap();
        assert_eq!(
            expr,
            Expr::Ident(ScopedIdent::new(vec![
                "ns".into(),
                "inner".into(),
                "value".into()
            ]))
        );
    }

    #[test]
    fn test_postfix_binds_tighter_than_deref() {
        let expr = parse_expr("*p->field + 1").unwrap();
        let expected = Expr::Offset {
            base: Box::new(Expr::Unary {
                op: UnaryOp::Deref,
                expr: Box::new(Expr::Member {
                    base: ident("p"),
                    access: Access::Arrow,
                    member: "field".into(),
                }),
            }),
            op: OffsetOp::Add,
            offset: DetExpr::Literal(1),
        };
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_offset_left_associates() {
        let expr = parse_expr("a + 1 - 2").unwrap();
        match expr {
            Expr::Offset {
                base,
                op: OffsetOp::Sub,
                offset: DetExpr::Literal(2),
            } => {
                assert!(matches!(
                    *base,
                    Expr::Offset {
                        op: OffsetOp::Add,
                        offset: DetExpr::Literal(1),
                        ..
                    }
                ));
            }
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn test_offset_rhs_is_multiplicative() {
        let expr = parse_expr("p + 2 * sizeof(int)").unwrap();
        match expr {
            Expr::Offset { offset, .. } => assert!(matches!(
                offset,
                DetExpr::Binary {
                    op: DetOp::Mul,
                    ..
                }
            )),
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn test_cast_with_suffixes() {
        let expr = parse_expr("*(int*)addr + 4").unwrap();
        let Expr::Offset { base, .. } = expr else {
            panic!("expected offset");
        };
        let Expr::Unary {
            op: UnaryOp::Deref,
            expr,
        } = *base
        else {
            panic!("expected deref");
        };
        match *expr {
            Expr::Cast { ty, expr } => {
                assert_eq!(ty.to_string(), "int*");
                assert_eq!(*expr, *ident("addr"));
            }
            other => panic!("expected cast, got {:?}", other),
        }
    }

    #[test]
    fn test_cast_is_right_associative() {
        let expr = parse_expr("(ns::Point**[])(uint8_t*)&raw").unwrap();
        let Expr::Cast { ty, expr } = expr else {
            panic!("expected cast");
        };
        assert_eq!(ty.to_string(), "ns::Point**[]");
        assert!(matches!(*expr, Expr::Cast { .. }));
    }

    #[test]
    fn test_paren_not_cast_without_operand() {
        assert!(matches!(parse_expr("(a).b").unwrap(), Expr::Member { .. }));
        assert!(matches!(parse_expr("(a)[2]").unwrap(), Expr::Index { .. }));
        assert!(matches!(parse_expr("(a) + 2").unwrap(), Expr::Offset { .. }));
        assert!(matches!(parse_expr("(a)").unwrap(), Expr::Paren(_)));
    }

    #[test]
    fn test_single_eval_block() {
        let expr = parse_expr("{list->head}->next").unwrap();
        let Expr::Member { base, member, .. } = expr else {
            panic!("expected member");
        };
        assert_eq!(member, "next");
        assert!(matches!(*base, Expr::SingleEval(_)));
    }

    #[test]
    fn test_index_with_det() {
        let expr = parse_expr("table[-(1 + 2) * 0x10]").unwrap();
        assert_eq!(expr.to_string(), "table[-(1 + 2) * 16]");
    }

    #[test]
    fn test_parse_failure_position() {
        let err = parse_expr("a.").unwrap_err();
        assert!(matches!(err, EvalError::ParseFailure { position: 2, .. }));

        let err = parse_expr("a + b").unwrap_err();
        assert!(matches!(err, EvalError::ParseFailure { position: 4, .. }));

        let err = parse_expr("a b").unwrap_err();
        assert!(matches!(err, EvalError::ParseFailure { position: 2, .. }));

        let err = parse_expr("").unwrap_err();
        assert!(matches!(err, EvalError::ParseFailure { position: 0, .. }));
    }

    #[test]
    fn test_sizeof_expression_form_unimplemented() {
        assert!(matches!(
            parse_expr("a[sizeof(x.y)]"),
            Err(EvalError::DetExprUnimplemented { position: 2 })
        ));
        assert!(matches!(
            parse_det_expr("sizeof(1)"),
            Err(EvalError::DetExprUnimplemented { position: 0 })
        ));
        assert!(matches!(
            parse_det_expr("sizeof(*p)"),
            Err(EvalError::DetExprUnimplemented { .. })
        ));
        assert!(matches!(
            parse_det_expr("sizeof(int"),
            Err(EvalError::ParseFailure { .. })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let shallow = format!("{}x{}", "(".repeat(20), ")".repeat(20));
        assert!(parse_expr(&shallow).is_ok());

        for input in [
            format!("{}x{}", "(".repeat(100), ")".repeat(100)),
            format!("{}p", "*".repeat(100)),
            format!("a[{}1{}]", "(".repeat(100), ")".repeat(100)),
        ] {
            let err = parse_expr(&input).unwrap_err();
            assert!(
                matches!(err, EvalError::ParseFailure { ref message, .. } if message == "expression nested too deeply"),
                "{}: {:?}",
                input.len(),
                err
            );
        }
    }

    #[test]
    fn test_length_limit() {
        let deep = format!("{}x{}", "(".repeat(50_000), ")".repeat(50_000));
        let err = parse_expr(&deep).unwrap_err();
        assert!(matches!(err, EvalError::ParseFailure { ref message, .. } if message == "expression too long"));

        let chain = format!("a{}", ".b".repeat(1_000));
        assert!(matches!(parse_expr(&chain), Err(EvalError::ParseFailure { .. })));
        let sum = vec!["1"; 1_000].join("+");
        assert!(matches!(parse_det_expr(&sum), Err(EvalError::ParseFailure { .. })));
    }

    #[test]
    fn test_sizeof_type_suffixes() {
        let det = parse_det_expr("sizeof(Node*) * 2").unwrap();
        let DetExpr::Binary { left, .. } = det else {
            panic!("expected binary");
        };
        match *left {
            DetExpr::SizeOf(ty) => assert_eq!(ty.suffixes, vec![TypeSuffix::Pointer]),
            other => panic!("expected sizeof, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_type_name() {
        let ty = parse_type_name("ns::Point**[]").unwrap();
        assert_eq!(ty.base.segments, vec!["ns", "Point"]);
        assert_eq!(
            ty.suffixes,
            vec![TypeSuffix::Pointer, TypeSuffix::Pointer, TypeSuffix::Array]
        );
    }

    #[test]
    fn test_print_parse_is_idempotent() {
        let inputs = [
            "counter",
            "ns::state.mode",
            "*p->field + 1",
            "a + 1 - 2",
            "p + (1 + 2)",
            "(uint8_t*)&buf[3] + sizeof(Frame) * 2",
            "{ {list}->next }->value",
            "*(int*)addr + 4",
            "((Point*)base)->y",
            "matrix[1][2 * 3]",
            "(a)(b)",
            "&(*p)",
            "arr[-1]",
            "(T[])  x",
        ];
        for input in inputs {
            let first = parse_expr(input).unwrap();
            let printed = first.to_string();
            let second = parse_expr(&printed).unwrap();
            assert_eq!(first, second, "re-parse of {:?}", printed);
            assert_eq!(printed, second.to_string());
        }
    }
}
