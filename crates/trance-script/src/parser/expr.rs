//! Expressions: a precedence-climbing loop over binary operators, with
//! calls, indexing and member access applied as postfix operations

use crate::ast::*;
use crate::parser::Parser;
use trance_test::syntax::TokenKind;

/// Binding power of binary operators, loosest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
}

/// Operator and binding power of a binary operator token
fn binary_operator(kind: TokenKind) -> Option<(BinaryOp, Precedence)> {
    use Precedence::*;
    let entry = match kind {
        TokenKind::PipePipe => (BinaryOp::Or, Or),
        TokenKind::AmpAmp => (BinaryOp::And, And),
        TokenKind::EqualEqual => (BinaryOp::Eq, Equality),
        TokenKind::BangEqual => (BinaryOp::Ne, Equality),
        TokenKind::Less => (BinaryOp::Lt, Comparison),
        TokenKind::LessEqual => (BinaryOp::Le, Comparison),
        TokenKind::Greater => (BinaryOp::Gt, Comparison),
        TokenKind::GreaterEqual => (BinaryOp::Ge, Comparison),
        TokenKind::Plus => (BinaryOp::Add, Term),
        TokenKind::Minus => (BinaryOp::Sub, Term),
        TokenKind::Star => (BinaryOp::Mul, Factor),
        TokenKind::Slash => (BinaryOp::Div, Factor),
        TokenKind::Percent => (BinaryOp::Mod, Factor),
        _ => return None,
    };
    Some(entry)
}

impl Parser {
    pub(super) fn parse_expression(&mut self) -> Result<Expr, ()> {
        self.parse_binary(Precedence::Lowest)
    }

    /// Operands joined by operators binding tighter than `min`.
    /// Operators of equal power associate to the left.
    fn parse_binary(&mut self, min: Precedence) -> Result<Expr, ()> {
        let mut left = self.parse_unary()?;

        while let Some((op, power)) = binary_operator(self.peek().kind) {
            if power <= min {
                break;
            }
            self.advance();
            let right = self.parse_binary(power)?;
            let span = left.span().merge(right.span());
            left = Expr::Binary(BinaryExpr {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            });
        }

        Ok(left)
    }

    /// `-x` and `!x` bind tighter than any binary operator
    fn parse_unary(&mut self) -> Result<Expr, ()> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        let op_span = self.advance().span;
        let operand = self.parse_unary()?;
        let span = op_span.merge(operand.span());

        Ok(Expr::Unary(UnaryExpr {
            op,
            expr: Box::new(operand),
            span,
        }))
    }

    /// A primary followed by any number of `(args)`, `[index]` and `.field`
    fn parse_postfix(&mut self) -> Result<Expr, ()> {
        let mut expr = self.parse_primary()?;
        loop {
            expr = match self.peek().kind {
                TokenKind::LeftParen => {
                    self.advance();
                    let args = self.parse_list(TokenKind::RightParen, Self::parse_expression)?;
                    let end = self.consume(TokenKind::RightParen, "Expected ')' after arguments")?.span;
                    Expr::Call(CallExpr {
                        span: expr.span().merge(end),
                        callee: Box::new(expr),
                        args,
                    })
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    let end = self.consume(TokenKind::RightBracket, "Expected ']'")?.span;
                    Expr::Index(IndexExpr {
                        span: expr.span().merge(end),
                        target: Box::new(expr),
                        index: Box::new(index),
                    })
                }
                // `target.field` is sugar for `target["field"]`
                TokenKind::Dot => {
                    self.advance();
                    let field = self.consume_identifier("a field name after '.'")?.clone();
                    let key = Expr::Literal(Literal::String(field.lexeme.clone()), field.span);
                    Expr::Index(IndexExpr {
                        span: expr.span().merge(field.span),
                        target: Box::new(expr),
                        index: Box::new(key),
                    })
                }
                _ => return Ok(expr),
            };
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ()> {
        let token = self.peek().clone();
        let literal = match token.kind {
            TokenKind::Number => match token.lexeme.parse::<f64>() {
                Ok(n) => Literal::Number(n),
                Err(_) => {
                    self.error_at(&token, "Invalid number literal");
                    return Err(());
                }
            },
            TokenKind::String => Literal::String(token.lexeme.clone()),
            TokenKind::True => Literal::Bool(true),
            TokenKind::False => Literal::Bool(false),
            TokenKind::Null => Literal::Null,
            TokenKind::Identifier => {
                self.advance();
                return Ok(Expr::Identifier(Identifier {
                    name: token.lexeme,
                    span: token.span,
                }));
            }
            // Parentheses only group; they leave no node behind
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.consume(TokenKind::RightParen, "Expected ')'")?;
                return Ok(inner);
            }
            TokenKind::LeftBracket => return self.parse_array_literal(),
            TokenKind::LeftBrace => return self.parse_record_literal(),
            TokenKind::Fn => return self.parse_function_expr(),
            _ => {
                self.error("Expected expression");
                return Err(());
            }
        };
        self.advance();
        Ok(Expr::Literal(literal, token.span))
    }

    /// Comma-separated items up to (not including) `close`; a trailing comma
    /// is allowed
    fn parse_list<T>(
        &mut self,
        close: TokenKind,
        mut item: impl FnMut(&mut Self) -> Result<T, ()>,
    ) -> Result<Vec<T>, ()> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(item(self)?);
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_array_literal(&mut self) -> Result<Expr, ()> {
        let start = self.consume(TokenKind::LeftBracket, "Expected '['")?.span;
        let elements = self.parse_list(TokenKind::RightBracket, Self::parse_expression)?;
        let end = self.consume(TokenKind::RightBracket, "Expected ']'")?.span;

        Ok(Expr::ArrayLiteral(ArrayLiteral {
            elements,
            span: start.merge(end),
        }))
    }

    /// `{ "key": value, key: value }`; keys are strings or bare identifiers
    fn parse_record_literal(&mut self) -> Result<Expr, ()> {
        let start = self.consume(TokenKind::LeftBrace, "Expected '{'")?.span;
        let fields = self.parse_list(TokenKind::RightBrace, |p| {
            let key = match p.peek().kind {
                TokenKind::String | TokenKind::Identifier => p.advance().clone(),
                _ => {
                    p.error("Expected record key");
                    return Err(());
                }
            };
            p.consume(TokenKind::Colon, "Expected ':' after record key")?;
            Ok((key, p.parse_expression()?))
        })?;
        let end = self.consume(TokenKind::RightBrace, "Expected '}'")?.span;

        let mut seen: Vec<(String, Expr)> = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            if seen.iter().any(|(k, _)| *k == key.lexeme) {
                self.error_at(&key, &format!("Duplicate record key '{}'", key.lexeme));
                return Err(());
            }
            seen.push((key.lexeme, value));
        }

        Ok(Expr::RecordLiteral(RecordLiteral {
            fields: seen,
            span: start.merge(end),
        }))
    }

    /// Anonymous function `fn (params) { body }`
    pub(super) fn parse_function_expr(&mut self) -> Result<Expr, ()> {
        let start = self.consume(TokenKind::Fn, "Expected 'fn'")?.span;
        let params = self.parse_params()?;
        let body = self.parse_function_body()?;

        Ok(Expr::Function(FunctionExpr {
            span: start.merge(body.span),
            params,
            body,
        }))
    }
}
