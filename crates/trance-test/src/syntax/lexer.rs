//! Lexical analysis (tokenization)
//!
//! Converts `.hyp` source into tokens with byte spans and absolute line
//! numbers. Snippets cut out of a larger file are lexed with
//! [`Lexer::with_origin`] so their lines still point into the original file.

use crate::syntax::token::{Span, Token, TokenKind};
use crate::syntax::SyntaxError;

/// Lexer state for tokenizing source code
pub struct Lexer {
    chars: Vec<char>,
    /// Current position in chars
    current: usize,
    /// Byte offset of `current`
    byte_pos: usize,
    line: u32,
    column: u32,
    start_byte: usize,
    start_line: u32,
    start_column: u32,
    errors: Vec<SyntaxError>,
}

impl Lexer {
    /// Create a new lexer for a whole file
    pub fn new(source: &str) -> Self {
        Self::with_origin(source, 1, 1)
    }

    /// Create a lexer for text that starts at `line`:`column` of its file
    pub fn with_origin(source: &str, line: u32, column: u32) -> Self {
        Self {
            chars: source.chars().collect(),
            current: 0,
            byte_pos: 0,
            line,
            column,
            start_byte: 0,
            start_line: line,
            start_column: column,
            errors: Vec::new(),
        }
    }

    /// Tokenize the source code, returning tokens and any errors
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<SyntaxError>) {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            if token.kind != TokenKind::Error {
                tokens.push(token);
            }
            if is_eof {
                break;
            }
        }
        (tokens, self.errors)
    }

    fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        self.start_byte = self.byte_pos;
        self.start_line = self.line;
        self.start_column = self.column;

        let Some(c) = self.advance() else {
            return self.make_token(TokenKind::Eof, "");
        };

        match c {
            '(' => self.make_token(TokenKind::LeftParen, "("),
            ')' => self.make_token(TokenKind::RightParen, ")"),
            '{' => self.make_token(TokenKind::LeftBrace, "{"),
            '}' => self.make_token(TokenKind::RightBrace, "}"),
            '[' => self.make_token(TokenKind::LeftBracket, "["),
            ']' => self.make_token(TokenKind::RightBracket, "]"),
            ';' => self.make_token(TokenKind::Semicolon, ";"),
            ',' => self.make_token(TokenKind::Comma, ","),
            ':' => self.make_token(TokenKind::Colon, ":"),
            '.' => self.make_token(TokenKind::Dot, "."),
            '*' => self.make_token(TokenKind::Star, "*"),
            '/' => self.make_token(TokenKind::Slash, "/"),
            '%' => self.make_token(TokenKind::Percent, "%"),
            '+' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::PlusEqual, "+=")
                } else {
                    self.make_token(TokenKind::Plus, "+")
                }
            }
            '-' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::MinusEqual, "-=")
                } else {
                    self.make_token(TokenKind::Minus, "-")
                }
            }
            '!' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::BangEqual, "!=")
                } else {
                    self.make_token(TokenKind::Bang, "!")
                }
            }
            '=' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::EqualEqual, "==")
                } else {
                    self.make_token(TokenKind::Equal, "=")
                }
            }
            '<' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::LessEqual, "<=")
                } else {
                    self.make_token(TokenKind::Less, "<")
                }
            }
            '>' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::GreaterEqual, ">=")
                } else {
                    self.make_token(TokenKind::Greater, ">")
                }
            }
            '&' if self.match_char('&') => self.make_token(TokenKind::AmpAmp, "&&"),
            '|' if self.match_char('|') => self.make_token(TokenKind::PipePipe, "||"),
            '"' => self.string(),
            c if c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' => self.identifier(),
            other => self.error(format!("unexpected character '{}'", other)),
        }
    }

    /// Scan a string literal; the token lexeme holds the decoded value
    fn string(&mut self) -> Token {
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return self.error("unterminated string"),
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.advance() {
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some(other) => {
                            return self.error(format!("invalid escape sequence '\\{}'", other))
                        }
                        None => return self.error("unterminated string"),
                    };
                    value.push(escaped);
                }
                Some(_) => {
                    if let Some(c) = self.advance() {
                        value.push(c);
                    }
                }
            }
        }
        self.make_token(TokenKind::String, value)
    }

    /// Scan a number literal (integer, decimal or scientific notation)
    fn number(&mut self) -> Token {
        let start = self.current - 1;
        self.consume_digits();

        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            self.consume_digits();
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let signed = matches!(self.peek_next(), Some('+') | Some('-'));
            let digit_at = if signed { 2 } else { 1 };
            if self
                .chars
                .get(self.current + digit_at)
                .is_some_and(|c| c.is_ascii_digit())
            {
                self.advance();
                if signed {
                    self.advance();
                }
                self.consume_digits();
            }
        }

        let text: String = self.chars[start..self.current].iter().collect();
        self.make_token(TokenKind::Number, text)
    }

    fn consume_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
    }

    fn identifier(&mut self) -> Token {
        let start = self.current - 1;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        let text: String = self.chars[start..self.current].iter().collect();
        let kind = TokenKind::keyword(&text).unwrap_or(TokenKind::Identifier);
        self.make_token(kind, text)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                }
                Some('/') if self.peek_next() == Some('*') => {
                    let line = self.line;
                    let column = self.column;
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            None => {
                                self.errors.push(SyntaxError::new(
                                    "unterminated block comment",
                                    line,
                                    column,
                                ));
                                return;
                            }
                            Some('*') if self.peek_next() == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = *self.chars.get(self.current)?;
        self.current += 1;
        self.byte_pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.current).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.current + 1).copied()
    }

    fn make_token(&self, kind: TokenKind, lexeme: impl Into<String>) -> Token {
        Token::new(
            kind,
            lexeme,
            Span::new(
                self.start_byte,
                self.byte_pos,
                self.start_line,
                self.start_column,
            ),
        )
    }

    fn error(&mut self, message: impl Into<String>) -> Token {
        self.errors.push(SyntaxError::new(
            message,
            self.start_line,
            self.start_column,
        ));
        self.make_token(TokenKind::Error, "")
    }
}
