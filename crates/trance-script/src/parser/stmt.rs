//! Statement parsing

use crate::ast::*;
use crate::parser::Parser;
use trance_test::syntax::{SyntaxError, TokenKind};

impl Parser {
    /// Parse a statement
    pub(super) fn parse_statement(&mut self) -> Result<Stmt, ()> {
        match self.peek().kind {
            TokenKind::Let | TokenKind::Var => self.parse_var_decl(),
            TokenKind::If => self.parse_if_stmt(),
            TokenKind::While => self.parse_while_stmt(),
            TokenKind::For => self.parse_for_in_stmt(),
            TokenKind::Return => self.parse_return_stmt(),
            TokenKind::Break | TokenKind::Continue => self.parse_loop_jump(),
            TokenKind::LeftBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Fn
                if self
                    .peek_next()
                    .is_some_and(|t| t.kind == TokenKind::Identifier) =>
            {
                Ok(Stmt::FunctionDecl(self.parse_function()?))
            }
            _ => self.parse_assign_or_expr_stmt(),
        }
    }

    /// Parse a variable declaration
    pub(super) fn parse_var_decl(&mut self) -> Result<Stmt, ()> {
        let keyword_span = self.peek().span;
        let keyword = self.advance().kind;
        let mutable = keyword == TokenKind::Var;

        let name_token = self.consume_identifier("a variable name")?;
        let name = Identifier {
            name: name_token.lexeme.clone(),
            span: name_token.span,
        };

        self.consume(TokenKind::Equal, "Expected '=' in variable declaration")?;
        let init = self.parse_expression()?;
        let end_span = init.span();
        self.end_statement("variable declaration")?;

        Ok(Stmt::VarDecl(VarDecl {
            mutable,
            name,
            init,
            span: keyword_span.merge(end_span),
        }))
    }

    /// Parse assignment or expression statement
    pub(super) fn parse_assign_or_expr_stmt(&mut self) -> Result<Stmt, ()> {
        let expr = self.parse_expression()?;
        let expr_span = expr.span();

        match self.peek().kind {
            // Regular assignment: x = value
            TokenKind::Equal => {
                self.advance();
                let target = self.expr_to_assign_target(expr)?;
                let value = self.parse_expression()?;
                let end_span = value.span();
                self.end_statement("assignment")?;

                Ok(Stmt::Assign(Assign {
                    target,
                    value,
                    span: expr_span.merge(end_span),
                }))
            }

            // Compound assignment: x += value, x -= value
            TokenKind::PlusEqual | TokenKind::MinusEqual => {
                let op = if self.advance().kind == TokenKind::PlusEqual {
                    CompoundOp::AddAssign
                } else {
                    CompoundOp::SubAssign
                };
                let target = self.expr_to_assign_target(expr)?;
                let value = self.parse_expression()?;
                let end_span = value.span();
                self.end_statement("compound assignment")?;

                Ok(Stmt::CompoundAssign(CompoundAssign {
                    target,
                    op,
                    value,
                    span: expr_span.merge(end_span),
                }))
            }

            // Expression statement
            _ => {
                self.end_statement("expression")?;
                Ok(Stmt::Expr(ExprStmt {
                    expr,
                    span: expr_span,
                }))
            }
        }
    }

    /// Convert an expression to an assignment target
    pub(super) fn expr_to_assign_target(&mut self, expr: Expr) -> Result<AssignTarget, ()> {
        match expr {
            Expr::Identifier(ident) => Ok(AssignTarget::Name(ident)),
            Expr::Index(idx) => Ok(AssignTarget::Index {
                target: idx.target,
                index: idx.index,
                span: idx.span,
            }),
            _ => {
                self.error("Invalid assignment target");
                Err(())
            }
        }
    }

    /// Parse if statement; parentheses around the condition are optional
    pub(super) fn parse_if_stmt(&mut self) -> Result<Stmt, ()> {
        let if_span = self.consume(TokenKind::If, "Expected 'if'")?.span;
        let cond = self.parse_expression()?;

        let then_block = self.parse_block()?;
        let mut end_span = then_block.span;

        let else_block = if self.match_token(TokenKind::Else) {
            let block = if self.check(TokenKind::If) {
                // `else if` desugars to an else block holding one if
                let nested = self.parse_if_stmt()?;
                let span = nested.span();
                Block {
                    statements: vec![nested],
                    span,
                }
            } else {
                self.parse_block()?
            };
            end_span = block.span;
            Some(block)
        } else {
            None
        };

        Ok(Stmt::If(IfStmt {
            cond,
            then_block,
            else_block,
            span: if_span.merge(end_span),
        }))
    }

    /// Parse while loop
    pub(super) fn parse_while_stmt(&mut self) -> Result<Stmt, ()> {
        let while_span = self.consume(TokenKind::While, "Expected 'while'")?.span;
        let cond = self.parse_expression()?;
        let body = self.parse_loop_body()?;
        let end_span = body.span;

        Ok(Stmt::While(WhileStmt {
            cond,
            body,
            span: while_span.merge(end_span),
        }))
    }

    /// Parse `for x in iterable { }` or `for (x in iterable) { }`
    pub(super) fn parse_for_in_stmt(&mut self) -> Result<Stmt, ()> {
        let for_span = self.consume(TokenKind::For, "Expected 'for'")?.span;
        let parenthesized = self.match_token(TokenKind::LeftParen);

        let var_token = self.consume_identifier("a loop variable")?;
        let variable = Identifier {
            name: var_token.lexeme.clone(),
            span: var_token.span,
        };

        self.consume(TokenKind::In, "Expected 'in' after loop variable")?;
        let iterable = self.parse_expression()?;
        if parenthesized {
            self.consume(TokenKind::RightParen, "Expected ')' after for clause")?;
        }

        let body = self.parse_loop_body()?;
        let end_span = body.span;

        Ok(Stmt::ForIn(ForInStmt {
            variable,
            iterable,
            body,
            span: for_span.merge(end_span),
        }))
    }

    fn parse_loop_body(&mut self) -> Result<Block, ()> {
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        body
    }

    /// Parse return statement
    pub(super) fn parse_return_stmt(&mut self) -> Result<Stmt, ()> {
        let return_span = self.consume(TokenKind::Return, "Expected 'return'")?.span;

        let value = if self.check(TokenKind::Semicolon)
            || self.check(TokenKind::RightBrace)
            || self.is_at_end()
        {
            None
        } else {
            Some(self.parse_expression()?)
        };
        let end_span = value.as_ref().map(Expr::span).unwrap_or(return_span);
        self.end_statement("return")?;

        Ok(Stmt::Return(ReturnStmt {
            value,
            span: return_span.merge(end_span),
        }))
    }

    /// Parse `break` or `continue`
    fn parse_loop_jump(&mut self) -> Result<Stmt, ()> {
        let token = self.advance().clone();
        if self.loop_depth == 0 {
            let message = format!("'{}' outside of a loop", token.lexeme);
            self.errors
                .push(SyntaxError::new(message, token.span.line, token.span.column));
            return Err(());
        }
        self.end_statement(&token.lexeme)?;

        Ok(if token.kind == TokenKind::Break {
            Stmt::Break(token.span)
        } else {
            Stmt::Continue(token.span)
        })
    }

    /// Parse block
    pub(super) fn parse_block(&mut self) -> Result<Block, ()> {
        let start_span = self.consume(TokenKind::LeftBrace, "Expected '{'")?.span;
        let mut statements = Vec::new();

        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            statements.push(self.parse_statement()?);
        }

        let end_span = self.consume(TokenKind::RightBrace, "Expected '}'")?.span;

        Ok(Block {
            statements,
            span: start_span.merge(end_span),
        })
    }
}
