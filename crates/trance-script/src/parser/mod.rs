//! Parsing (tokens to AST)
//!
//! Bodies and helpers arrive as snippets cut out of a `.hyp` file. They are
//! lexed with their origin so every span carries the line of the original
//! file. Statements are parsed by recursive descent, expressions by
//! precedence climbing.

mod expr;
mod stmt;

use crate::ast::*;
use std::sync::Arc;
use trance_test::syntax::{Lexer, SyntaxError, Token, TokenKind};

/// Parser state for building AST from tokens
pub struct Parser {
    pub(super) tokens: Vec<Token>,
    pub(super) current: usize,
    pub(super) errors: Vec<SyntaxError>,
    /// Enclosing loops, reset inside function bodies
    pub(super) loop_depth: usize,
}

/// Parse the statements of a body snippet starting at `line`:`column`
pub fn parse_body(text: &str, line: u32, column: u32) -> Result<Vec<Stmt>, SyntaxError> {
    let mut parser = Parser::from_source(text, line, column)?;
    let statements = parser.parse_statements();
    parser.finish(statements)
}

/// Parse a top-level `fn name(params) { ... }` helper snippet
pub fn parse_helper(text: &str, line: u32, column: u32) -> Result<FunctionDecl, SyntaxError> {
    let mut parser = Parser::from_source(text, line, column)?;
    let decl = parser.parse_function();
    if decl.is_ok() && !parser.is_at_end() {
        parser.error("Expected end of helper after function body");
    }
    match decl {
        Ok(decl) => parser.finish(decl),
        Err(()) => Err(parser.first_error()),
    }
}

impl Parser {
    /// Create a new parser for the given tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
            loop_depth: 0,
        }
    }

    fn from_source(text: &str, line: u32, column: u32) -> Result<Self, SyntaxError> {
        let (tokens, mut errors) = Lexer::with_origin(text, line, column).tokenize();
        if !errors.is_empty() {
            return Err(errors.remove(0));
        }
        Ok(Self::new(tokens))
    }

    fn finish<T>(&mut self, parsed: T) -> Result<T, SyntaxError> {
        if self.errors.is_empty() {
            Ok(parsed)
        } else {
            Err(self.first_error())
        }
    }

    fn first_error(&mut self) -> SyntaxError {
        if self.errors.is_empty() {
            let token = self.peek();
            return SyntaxError::new("Invalid syntax", token.span.line, token.span.column);
        }
        self.errors.remove(0)
    }

    /// Parse statements until end of input, recovering after errors
    pub fn parse_statements(&mut self) -> Vec<Stmt> {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            match self.parse_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(_) => self.synchronize(),
            }
        }

        statements
    }

    // === Functions ===

    /// Parse a named function declaration
    pub(super) fn parse_function(&mut self) -> Result<FunctionDecl, ()> {
        let fn_span = self.consume(TokenKind::Fn, "Expected 'fn'")?.span;

        let name_token = self.consume_identifier("a function name")?;
        let name = Identifier {
            name: name_token.lexeme.clone(),
            span: name_token.span,
        };

        let params = self.parse_params()?;
        let body = self.parse_function_body()?;
        let end_span = body.span;

        Ok(FunctionDecl {
            name,
            params,
            body,
            span: fn_span.merge(end_span),
        })
    }

    /// Parse `(a, b, c)`
    pub(super) fn parse_params(&mut self) -> Result<Vec<Identifier>, ()> {
        self.consume(TokenKind::LeftParen, "Expected '(' before parameters")?;

        let mut params: Vec<Identifier> = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                let token = self.consume_identifier("a parameter name")?.clone();
                if params.iter().any(|p| p.name == token.lexeme) {
                    self.error_at(&token, &format!("Duplicate parameter '{}'", token.lexeme));
                    return Err(());
                }
                params.push(Identifier {
                    name: token.lexeme.clone(),
                    span: token.span,
                });

                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(TokenKind::RightParen, "Expected ')' after parameters")?;
        Ok(params)
    }

    /// Function bodies start a fresh loop context
    pub(super) fn parse_function_body(&mut self) -> Result<Arc<Block>, ()> {
        let saved = std::mem::take(&mut self.loop_depth);
        let body = self.parse_block();
        self.loop_depth = saved;
        Ok(Arc::new(body?))
    }

    // === Helper methods ===

    /// Advance to next token
    pub(super) fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current.saturating_sub(1)]
    }

    /// Peek at current token
    pub(super) fn peek(&self) -> &Token {
        let index = self.current.min(self.tokens.len().saturating_sub(1));
        &self.tokens[index]
    }

    /// Peek at the token after the current one
    pub(super) fn peek_next(&self) -> Option<&Token> {
        self.tokens.get(self.current + 1)
    }

    /// Check if at end of token stream
    pub(super) fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    /// Check if current token matches kind
    pub(super) fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    /// Match and consume token if it matches
    pub(super) fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume token of expected kind or error
    pub(super) fn consume(&mut self, kind: TokenKind, message: &str) -> Result<&Token, ()> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            self.error(message);
            Err(())
        }
    }

    /// Consume an identifier token
    pub(super) fn consume_identifier(&mut self, context: &str) -> Result<&Token, ()> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance())
        } else {
            let found = self.peek().clone();
            if TokenKind::keyword(&found.lexeme).is_some() {
                let message = format!(
                    "Expected {}, found reserved word '{}'",
                    context, found.lexeme
                );
                self.errors
                    .push(SyntaxError::new(message, found.span.line, found.span.column));
            } else {
                self.error(&format!("Expected {}", context));
            }
            Err(())
        }
    }

    /// Statements end at ';', or implicitly before '}' and end of input
    pub(super) fn end_statement(&mut self, context: &str) -> Result<(), ()> {
        if self.match_token(TokenKind::Semicolon)
            || self.check(TokenKind::RightBrace)
            || self.is_at_end()
        {
            Ok(())
        } else {
            self.error(&format!("Expected ';' after {}", context));
            Err(())
        }
    }

    /// Record an error at the current token
    pub(super) fn error(&mut self, message: &str) {
        let token = self.peek().clone();
        self.error_at(&token, message);
    }

    pub(super) fn error_at(&mut self, token: &Token, message: &str) {
        let message = if token.kind == TokenKind::Eof {
            format!("{}, found end of body", message)
        } else {
            format!("{}, found '{}'", message, token.lexeme)
        };
        self.errors
            .push(SyntaxError::new(message, token.span.line, token.span.column));
    }

    /// Synchronize after error
    fn synchronize(&mut self) {
        while !self.is_at_end() {
            if self.match_token(TokenKind::Semicolon) {
                return;
            }
            match self.peek().kind {
                TokenKind::Let
                | TokenKind::Var
                | TokenKind::Fn
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return => return,
                _ => {
                    self.advance();
                }
            }
        }
    }
}
