//! Declaration parser for `.hyp` files
//!
//! Produces a raw declaration tree. Bodies are not parsed here: each block is
//! cut out as a [`Snippet`] by brace matching on tokens (strings and comments
//! are already resolved by the lexer) and handed to the evaluator later.
//! Semantic checks (arity, duplicates, missing bodies) belong to the loader.

use crate::source::Snippet;
use crate::syntax::{Lexer, SyntaxError, Token, TokenKind};
use crate::value::Value;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub(crate) struct FileDecl {
    pub helpers: Vec<Snippet>,
    pub root: GroupDecl,
}

#[derive(Debug, Default)]
pub(crate) struct GroupDecl {
    pub name: String,
    pub line: u32,
    pub serial: bool,
    pub tags: Vec<String>,
    pub fixtures: Vec<FixtureItem>,
    pub children: Vec<ChildDecl>,
}

#[derive(Debug)]
pub(crate) enum ChildDecl {
    Group(GroupDecl),
    Unit(UnitDecl),
}

#[derive(Debug, Default)]
pub(crate) struct FixtureItem {
    pub name: String,
    pub global: bool,
    pub line: u32,
    pub setup: Option<Snippet>,
    pub teardown: Option<Snippet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitKeyword {
    Test,
    Bench,
    Load,
}

#[derive(Debug)]
pub(crate) struct UnitDecl {
    pub keyword: UnitKeyword,
    pub name: String,
    pub line: u32,
    pub body: Option<Snippet>,
    pub fixtures: Vec<FixtureItem>,
    pub timeout_ms: Option<u64>,
    pub tags: Vec<String>,
    pub skip: Option<String>,
    pub params: Option<(Vec<Vec<Value>>, u32)>,
    pub data: Option<(String, u32)>,
    pub iterations: Option<u64>,
    pub warmup: Option<u64>,
    pub concurrency: Option<u64>,
}

/// Name of the anonymous fixture formed by `setup`/`teardown` blocks
pub const DEFAULT_FIXTURE: &str = "default";

pub(crate) fn parse_file(source: &str) -> Result<FileDecl, SyntaxError> {
    let (tokens, errors) = Lexer::new(source).tokenize();
    if let Some(first) = errors.into_iter().next() {
        return Err(first);
    }
    DeclParser {
        source,
        tokens,
        current: 0,
    }
    .file()
}

struct DeclParser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    current: usize,
}

impl<'a> DeclParser<'a> {
    fn file(mut self) -> Result<FileDecl, SyntaxError> {
        let mut decl = FileDecl::default();
        while !self.is_at_end() {
            if self.check(TokenKind::Fn) {
                decl.helpers.push(self.helper()?);
                continue;
            }
            self.group_item(&mut decl.root)?;
        }
        Ok(decl)
    }

    /// Items allowed at file level and inside groups
    fn group_item(&mut self, group: &mut GroupDecl) -> Result<(), SyntaxError> {
        let token = self.peek().clone();
        match (token.kind, token.lexeme.as_str()) {
            (TokenKind::Identifier, "group") => {
                let child = self.group()?;
                group.children.push(ChildDecl::Group(child));
            }
            (TokenKind::Identifier, "test") => {
                let unit = self.unit(UnitKeyword::Test)?;
                group.children.push(ChildDecl::Unit(unit));
            }
            (TokenKind::Identifier, "bench") => {
                let unit = self.unit(UnitKeyword::Bench)?;
                group.children.push(ChildDecl::Unit(unit));
            }
            (TokenKind::Identifier, "load") => {
                let unit = self.unit(UnitKeyword::Load)?;
                group.children.push(ChildDecl::Unit(unit));
            }
            (TokenKind::Identifier, "fixture") => {
                let fixture = self.fixture()?;
                group.fixtures.push(fixture);
            }
            (TokenKind::Identifier, "setup") | (TokenKind::Identifier, "teardown") => {
                self.anonymous_block(&mut group.fixtures)?;
            }
            _ => {
                return Err(self.error_at(
                    &token,
                    format!(
                        "expected a declaration (group, test, bench, load, fixture, setup, teardown or fn), found '{}'",
                        describe(&token)
                    ),
                ))
            }
        }
        Ok(())
    }

    fn group(&mut self) -> Result<GroupDecl, SyntaxError> {
        let keyword = self.advance();
        let name = self.string("group name")?;
        let mut group = GroupDecl {
            name,
            line: keyword.span.line,
            ..GroupDecl::default()
        };

        loop {
            if self.check_word("serial") {
                self.advance();
                group.serial = true;
            } else if self.check_word("tags") {
                self.advance();
                group.tags.extend(self.string_list()?);
            } else {
                break;
            }
        }

        self.expect(TokenKind::LeftBrace, "'{' after group header")?;
        while !self.check(TokenKind::RightBrace) {
            if self.is_at_end() {
                return Err(self.error_here("unterminated group"));
            }
            self.group_item(&mut group)?;
        }
        self.advance();
        Ok(group)
    }

    fn unit(&mut self, keyword: UnitKeyword) -> Result<UnitDecl, SyntaxError> {
        let start = self.advance();
        let name = self.string("unit name")?;
        let mut unit = UnitDecl {
            keyword,
            name,
            line: start.span.line,
            body: None,
            fixtures: Vec::new(),
            timeout_ms: None,
            tags: Vec::new(),
            skip: None,
            params: None,
            data: None,
            iterations: None,
            warmup: None,
            concurrency: None,
        };

        self.expect(TokenKind::LeftBrace, "'{' after unit name")?;
        while !self.check(TokenKind::RightBrace) {
            if self.is_at_end() {
                return Err(self.error_here("unterminated unit declaration"));
            }
            let token = self.peek().clone();
            if token.kind != TokenKind::Identifier {
                return Err(self.error_at(
                    &token,
                    format!("expected a unit item, found '{}'", describe(&token)),
                ));
            }
            match token.lexeme.as_str() {
                "body" => {
                    self.advance();
                    if unit.body.is_some() {
                        return Err(self.error_at(&token, "duplicate body"));
                    }
                    unit.body = Some(self.block()?);
                }
                "setup" | "teardown" => self.anonymous_block(&mut unit.fixtures)?,
                "fixture" => {
                    let fixture = self.fixture()?;
                    unit.fixtures.push(fixture);
                }
                "timeout" => {
                    self.advance();
                    unit.timeout_ms = Some(self.integer("timeout")?);
                }
                "tags" => {
                    self.advance();
                    unit.tags.extend(self.string_list()?);
                }
                "skip" => {
                    self.advance();
                    let reason = if self.check(TokenKind::String) {
                        self.advance().lexeme
                    } else {
                        "skipped".to_string()
                    };
                    unit.skip = Some(reason);
                }
                "params" => {
                    self.advance();
                    unit.params = Some((self.param_rows()?, token.span.line));
                }
                "data" => {
                    self.advance();
                    let path = self.string("data source path")?;
                    unit.data = Some((path, token.span.line));
                }
                "iterations" => {
                    self.advance();
                    unit.iterations = Some(self.integer("iterations")?);
                }
                "warmup" => {
                    self.advance();
                    unit.warmup = Some(self.integer("warmup")?);
                }
                "concurrency" => {
                    self.advance();
                    unit.concurrency = Some(self.integer("concurrency")?);
                }
                other => {
                    return Err(self.error_at(&token, format!("unknown unit item '{}'", other)))
                }
            }
        }
        self.advance();
        Ok(unit)
    }

    /// `fixture "name" [global] { setup {..} teardown {..} }`
    fn fixture(&mut self) -> Result<FixtureItem, SyntaxError> {
        let keyword = self.advance();
        let name = self.string("fixture name")?;
        let global = if self.check_word("global") {
            self.advance();
            true
        } else {
            false
        };
        let mut item = FixtureItem {
            name,
            global,
            line: keyword.span.line,
            ..FixtureItem::default()
        };

        self.expect(TokenKind::LeftBrace, "'{' after fixture name")?;
        while !self.check(TokenKind::RightBrace) {
            let token = self.peek().clone();
            match token.lexeme.as_str() {
                "setup" if token.kind == TokenKind::Identifier => {
                    self.advance();
                    if item.setup.is_some() {
                        return Err(self.error_at(&token, "duplicate setup block"));
                    }
                    item.setup = Some(self.block()?);
                }
                "teardown" if token.kind == TokenKind::Identifier => {
                    self.advance();
                    if item.teardown.is_some() {
                        return Err(self.error_at(&token, "duplicate teardown block"));
                    }
                    item.teardown = Some(self.block()?);
                }
                _ => {
                    return Err(self.error_at(
                        &token,
                        format!("expected setup or teardown, found '{}'", describe(&token)),
                    ))
                }
            }
        }
        self.advance();
        Ok(item)
    }

    /// Bare `setup {}` / `teardown {}` join the anonymous per-test fixture
    fn anonymous_block(&mut self, fixtures: &mut Vec<FixtureItem>) -> Result<(), SyntaxError> {
        let keyword = self.advance();
        let block = self.block()?;
        let index = match fixtures
            .iter()
            .position(|f| f.name == DEFAULT_FIXTURE && !f.global)
        {
            Some(index) => index,
            None => {
                fixtures.push(FixtureItem {
                    name: DEFAULT_FIXTURE.to_string(),
                    global: false,
                    line: keyword.span.line,
                    ..FixtureItem::default()
                });
                fixtures.len() - 1
            }
        };
        let slot = if keyword.lexeme == "setup" {
            &mut fixtures[index].setup
        } else {
            &mut fixtures[index].teardown
        };
        if slot.is_some() {
            return Err(self.error_at(&keyword, format!("duplicate {} block", keyword.lexeme)));
        }
        *slot = Some(block);
        Ok(())
    }

    /// `fn name(args) { ... }` kept verbatim for the evaluator
    fn helper(&mut self) -> Result<Snippet, SyntaxError> {
        let start = self.advance();
        if !self.check(TokenKind::Identifier) {
            return Err(self.error_here("expected function name after 'fn'"));
        }
        while !self.check(TokenKind::LeftBrace) {
            if self.is_at_end() {
                return Err(self.error_here("expected function body"));
            }
            self.advance();
        }
        let close = self.skip_block()?;
        let text = &self.source[start.span.start..close.span.end];
        Ok(Snippet::new(text, start.span.line, start.span.column))
    }

    /// A `{ ... }` block as a snippet of its inner text
    fn block(&mut self) -> Result<Snippet, SyntaxError> {
        if !self.check(TokenKind::LeftBrace) {
            return Err(self.error_here("expected '{'"));
        }
        let open = self.peek().clone();
        let close = self.skip_block()?;
        let text = &self.source[open.span.end..close.span.start];
        Ok(Snippet::new(text, open.span.line, open.span.column + 1))
    }

    /// Consume a balanced brace block, returning the closing brace
    fn skip_block(&mut self) -> Result<Token, SyntaxError> {
        let open = self.expect(TokenKind::LeftBrace, "'{'")?;
        let mut depth = 1usize;
        loop {
            if self.is_at_end() {
                return Err(self.error_at(&open, "unclosed '{'"));
            }
            let token = self.advance();
            match token.kind {
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(token);
                    }
                }
                _ => {}
            }
        }
    }

    /// `{ [..], [..] }`
    fn param_rows(&mut self) -> Result<Vec<Vec<Value>>, SyntaxError> {
        self.expect(TokenKind::LeftBrace, "'{' after params")?;
        let mut rows = Vec::new();
        while !self.check(TokenKind::RightBrace) {
            if !self.check(TokenKind::LeftBracket) {
                return Err(self.error_here("expected a parameter tuple '[...]'"));
            }
            match self.literal()? {
                Value::Array(items) => rows.push(items),
                _ => return Err(self.error_here("expected a parameter tuple")),
            }
            if !self.match_kind(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBrace, "'}' after parameter tuples")?;
        Ok(rows)
    }

    fn literal(&mut self) -> Result<Value, SyntaxError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number => parse_number(&token).map(Value::Number),
            TokenKind::Minus => {
                let number = self.expect(TokenKind::Number, "number after '-'")?;
                parse_number(&number).map(|n| Value::Number(-n))
            }
            TokenKind::String => Ok(Value::String(token.lexeme)),
            TokenKind::True => Ok(Value::Bool(true)),
            TokenKind::False => Ok(Value::Bool(false)),
            TokenKind::Null => Ok(Value::Null),
            TokenKind::LeftBracket => {
                let mut items = Vec::new();
                while !self.check(TokenKind::RightBracket) {
                    items.push(self.literal()?);
                    if !self.match_kind(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RightBracket, "']'")?;
                Ok(Value::Array(items))
            }
            TokenKind::LeftBrace => {
                let mut fields = BTreeMap::new();
                while !self.check(TokenKind::RightBrace) {
                    let key = self.string("record key")?;
                    self.expect(TokenKind::Colon, "':' after record key")?;
                    fields.insert(key, self.literal()?);
                    if !self.match_kind(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RightBrace, "'}'")?;
                Ok(Value::Record(fields))
            }
            _ => Err(self.error_at(
                &token,
                format!("expected a literal value, found '{}'", describe(&token)),
            )),
        }
    }

    fn string_list(&mut self) -> Result<Vec<String>, SyntaxError> {
        self.expect(TokenKind::LeftBracket, "'[' before tag list")?;
        let mut items = Vec::new();
        while !self.check(TokenKind::RightBracket) {
            items.push(self.string("tag")?);
            if !self.match_kind(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBracket, "']' after tag list")?;
        Ok(items)
    }

    fn string(&mut self, what: &str) -> Result<String, SyntaxError> {
        Ok(self.expect(TokenKind::String, what)?.lexeme)
    }

    fn integer(&mut self, what: &str) -> Result<u64, SyntaxError> {
        let token = self.expect(TokenKind::Number, what)?;
        token
            .lexeme
            .parse::<u64>()
            .map_err(|_| self.error_at(&token, format!("{} must be a non-negative integer", what)))
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        // The token list always ends with Eof
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn check_word(&self, word: &str) -> bool {
        let token = self.peek();
        token.kind == TokenKind::Identifier && token.lexeme == word
    }

    fn match_kind(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, SyntaxError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let token = self.peek().clone();
            Err(self.error_at(
                &token,
                format!("expected {}, found '{}'", what, describe(&token)),
            ))
        }
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        let token = self.peek();
        SyntaxError::new(message, token.span.line, token.span.column)
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, token.span.line, token.span.column)
    }
}

fn describe(token: &Token) -> String {
    match token.kind {
        TokenKind::Eof => "end of file".to_string(),
        TokenKind::String => format!("\"{}\"", token.lexeme),
        _ => token.lexeme.clone(),
    }
}

fn parse_number(token: &Token) -> Result<f64, SyntaxError> {
    token.lexeme.parse::<f64>().map_err(|_| {
        SyntaxError::new(
            format!("invalid number '{}'", token.lexeme),
            token.span.line,
            token.span.column,
        )
    })
}
