//! The evaluator handed to the test core

use crate::ast::{statement_lines, FunctionDecl, Stmt};
use crate::interpreter::{FileScope, Interpreter};
use crate::parser::{parse_body, parse_helper};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use trance_test::{
    BodyRef, RunContext, ScriptError, ScriptEvaluator, Snippet, SourceFile, SyntaxError,
};

/// Tree-walking [`ScriptEvaluator`].
///
/// Parses are cached by snippet id, so a body prepared at load time is not
/// parsed again however many times it runs.
#[derive(Debug, Default)]
pub struct ScriptEngine {
    bodies: DashMap<u64, Arc<Vec<Stmt>>>,
    helpers: DashMap<u64, Arc<FunctionDecl>>,
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn body(&self, snippet: &Snippet) -> Result<Arc<Vec<Stmt>>, SyntaxError> {
        if let Some(cached) = self.bodies.get(&snippet.id) {
            return Ok(cached.clone());
        }
        let statements = Arc::new(parse_body(&snippet.text, snippet.line, snippet.column)?);
        self.bodies.insert(snippet.id, statements.clone());
        Ok(statements)
    }

    fn helper(&self, snippet: &Snippet) -> Result<Arc<FunctionDecl>, SyntaxError> {
        if let Some(cached) = self.helpers.get(&snippet.id) {
            return Ok(cached.clone());
        }
        let decl = Arc::new(parse_helper(&snippet.text, snippet.line, snippet.column)?);
        self.helpers.insert(snippet.id, decl.clone());
        Ok(decl)
    }

    fn file_scope(&self, file: &Arc<SourceFile>) -> Result<Arc<FileScope>, SyntaxError> {
        let mut helpers = HashMap::with_capacity(file.helpers.len());
        for snippet in &file.helpers {
            let decl = self.helper(snippet)?;
            helpers.insert(decl.name.name.clone(), decl);
        }
        Ok(Arc::new(FileScope::new(file.clone(), helpers)))
    }
}

impl ScriptEvaluator for ScriptEngine {
    fn prepare(&self, file: &SourceFile, snippet: &Snippet) -> Result<Vec<u32>, SyntaxError> {
        if file.helpers.iter().any(|h| h.id == snippet.id) {
            let decl = self.helper(snippet)?;
            debug!(file = %file.name, helper = %decl.name.name, "prepared helper");
            return Ok(statement_lines(&decl.body.statements));
        }
        let statements = self.body(snippet)?;
        Ok(statement_lines(&statements))
    }

    fn evaluate(&self, body: &BodyRef, ctx: &RunContext) -> Result<(), ScriptError> {
        let syntax = |e: SyntaxError| ScriptError::raised_at(e.message, e.line);
        let statements = self.body(&body.snippet).map_err(syntax)?;
        let scope = self.file_scope(&body.file).map_err(syntax)?;
        debug!(run = ctx.label(), line = body.line(), "evaluating body");
        Interpreter::new(ctx, &scope).run(&statements)
    }
}
