//! AST interpreter (tree-walking)
//!
//! One [`Interpreter`] evaluates one body, or one call of a script function,
//! against the [`RunContext`] of the run it belongs to. It keeps no state
//! between evaluations: bodies share data only through fixtures.
//!
//! Before every statement the interpreter checks the cancellation token and
//! marks the statement's line as covered, so a timed-out run stops at the
//! next statement or loop iteration.

mod expr;
mod stmt;

use crate::ast::{Block, FunctionDecl};
use crate::error::RuntimeError;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use trance_test::{RunContext, ScriptError, ScriptFunction, SourceFile, Value};

/// Nested script calls allowed on one thread
pub const MAX_CALL_DEPTH: usize = 256;

/// Control flow signal for handling break, continue, and return
#[derive(Debug, Clone, PartialEq)]
pub(super) enum ControlFlow {
    None,
    Break,
    Continue,
    Return(Value),
}

/// A variable slot
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub(crate) value: Value,
    pub(crate) mutable: bool,
}

/// Names visible to every body of one file
#[derive(Debug)]
pub struct FileScope {
    pub(crate) source: Arc<SourceFile>,
    pub(crate) helpers: HashMap<String, Arc<FunctionDecl>>,
}

impl FileScope {
    pub fn new(source: Arc<SourceFile>, helpers: HashMap<String, Arc<FunctionDecl>>) -> Self {
        Self { source, helpers }
    }
}

/// Interpreter state
pub struct Interpreter<'a> {
    pub(super) ctx: &'a RunContext,
    pub(super) file: &'a Arc<FileScope>,
    /// Local scopes (stack of environments)
    pub(super) locals: Vec<HashMap<String, Binding>>,
    /// Current control flow state
    pub(super) control_flow: ControlFlow,
    /// Line of the statement being executed
    pub(super) line: u32,
}

impl<'a> Interpreter<'a> {
    /// Create a new interpreter
    pub fn new(ctx: &'a RunContext, file: &'a Arc<FileScope>) -> Self {
        Self {
            ctx,
            file,
            locals: vec![HashMap::new()],
            control_flow: ControlFlow::None,
            line: 0,
        }
    }

    /// Run a body to completion; a top-level `return` ends it early
    pub fn run(&mut self, statements: &[crate::ast::Stmt]) -> Result<(), ScriptError> {
        self.exec_statements(statements)?;
        self.control_flow = ControlFlow::None;
        Ok(())
    }

    /// Attach the current line to errors raised without one
    pub(super) fn locate(&self, err: ScriptError) -> ScriptError {
        match err {
            ScriptError::Raised {
                message,
                line: None,
            } => ScriptError::raised_at(message, self.line),
            other => other,
        }
    }

    pub(super) fn fail(&self, err: RuntimeError) -> ScriptError {
        ScriptError::raised_at(err.to_string(), self.line)
    }

    // === Scopes ===

    pub(super) fn push_scope(&mut self, scope: HashMap<String, Binding>) {
        self.locals.push(scope);
    }

    pub(super) fn pop_scope(&mut self) {
        if self.locals.len() > 1 {
            self.locals.pop();
        }
    }

    /// Declare in the innermost scope, shadowing outer bindings
    pub(super) fn declare(&mut self, name: &str, value: Value, mutable: bool) {
        if let Some(scope) = self.locals.last_mut() {
            scope.insert(name.to_string(), Binding { value, mutable });
        }
    }

    pub(super) fn lookup(&self, name: &str) -> Option<&Binding> {
        self.locals.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Mutable slot of a `var` binding
    pub(super) fn lookup_mut(&mut self, name: &str) -> Result<&mut Binding, ScriptError> {
        let line = self.line;
        let binding = self
            .locals
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
            .ok_or_else(|| {
                ScriptError::raised_at(
                    RuntimeError::UndefinedVariable(name.to_string()).to_string(),
                    line,
                )
            })?;
        if !binding.mutable {
            return Err(ScriptError::raised_at(
                RuntimeError::ImmutableBinding(name.to_string()).to_string(),
                line,
            ));
        }
        Ok(binding)
    }

    /// Every visible binding, inner scopes shadowing outer ones
    pub(super) fn snapshot(&self) -> HashMap<String, Binding> {
        let mut captured = HashMap::new();
        for scope in &self.locals {
            for (name, binding) in scope {
                captured.insert(name.clone(), binding.clone());
            }
        }
        captured
    }
}

// ============================================================================
// Script functions
// ============================================================================

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Held for the duration of one script call
struct CallGuard;

impl CallGuard {
    fn enter() -> Result<Self, RuntimeError> {
        CALL_DEPTH.with(|depth| {
            if depth.get() >= MAX_CALL_DEPTH {
                return Err(RuntimeError::CallDepth(MAX_CALL_DEPTH));
            }
            depth.set(depth.get() + 1);
            Ok(CallGuard)
        })
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// User-defined function: a helper, a nested `fn` or a `fn (..) {}` literal.
///
/// Closures capture the bindings visible where they were created by value.
#[derive(Clone)]
pub struct Closure {
    pub(crate) name: String,
    pub(crate) params: Vec<String>,
    pub(crate) body: Arc<Block>,
    pub(crate) captured: Arc<HashMap<String, Binding>>,
    pub(crate) file: Arc<FileScope>,
    /// Bind `name` to the function itself inside its body
    pub(crate) recursive: bool,
}

impl Closure {
    /// Closure for a file helper; helpers see only other helpers and builtins
    pub fn helper(decl: &FunctionDecl, file: Arc<FileScope>) -> Self {
        Self {
            name: decl.name.name.clone(),
            params: decl.params.iter().map(|p| p.name.clone()).collect(),
            body: decl.body.clone(),
            captured: Arc::new(HashMap::new()),
            file,
            recursive: false,
        }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("file", &self.file.source.name)
            .finish()
    }
}

impl ScriptFunction for Closure {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, ctx: &RunContext, args: Vec<Value>) -> Result<Value, ScriptError> {
        if args.len() != self.params.len() {
            return Err(RuntimeError::Arity {
                function: self.name.clone(),
                expected: format!(
                    "{} argument{}",
                    self.params.len(),
                    if self.params.len() == 1 { "" } else { "s" }
                ),
                got: args.len(),
            }
            .into());
        }
        let _guard = CallGuard::enter()?;

        let mut interpreter = Interpreter::new(ctx, &self.file);
        interpreter.line = self.body.span.line;

        let mut frame = (*self.captured).clone();
        if self.recursive {
            let itself = Value::Function(trance_test::Callable::new(self.clone()));
            frame.insert(
                self.name.clone(),
                Binding {
                    value: itself,
                    mutable: false,
                },
            );
        }
        for (param, arg) in self.params.iter().zip(args) {
            frame.insert(
                param.clone(),
                Binding {
                    value: arg,
                    mutable: true,
                },
            );
        }
        interpreter.push_scope(frame);

        interpreter.exec_statements(&self.body.statements)?;
        match std::mem::replace(&mut interpreter.control_flow, ControlFlow::None) {
            ControlFlow::Return(value) => Ok(value),
            _ => Ok(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_body;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn file() -> Arc<FileScope> {
        let source = SourceFile::new(PathBuf::from("t.hyp"), "t.hyp");
        Arc::new(FileScope::new(Arc::new(source), HashMap::new()))
    }

    fn run(text: &str) -> (RunContext, Result<(), ScriptError>) {
        let ctx = RunContext::standalone("interp");
        let stmts = parse_body(text, 1, 1).unwrap();
        let file = file();
        let result = Interpreter::new(&ctx, &file).run(&stmts);
        (ctx, result)
    }

    fn output(text: &str) -> String {
        let (ctx, result) = run(text);
        if let Err(e) = result {
            panic!("evaluation failed: {:?}", e);
        }
        ctx.output()
    }

    fn raised(text: &str) -> (String, Option<u32>) {
        match run(text).1 {
            Err(ScriptError::Raised { message, line }) => (message, line),
            other => panic!("expected raised error, got {:?}", other),
        }
    }

    #[test]
    fn test_closures_capture_by_value() {
        let out = output(
            "var n = 1;\n\
             let f = fn () { return n; };\n\
             n = 2;\n\
             print(f(), n);",
        );
        assert_eq!(out, "1 2\n");
    }

    #[test]
    fn test_recursive_named_function() {
        let out = output(
            "fn fact(n) { if n <= 1 { return 1; } return n * fact(n - 1); }\n\
             print(fact(5));",
        );
        assert_eq!(out, "120\n");
    }

    #[test]
    fn test_runaway_recursion_is_an_error() {
        // Run threads get a large stack; the test harness thread does not
        let handle = std::thread::Builder::new()
            .stack_size(32 * 1024 * 1024)
            .spawn(|| raised("fn down(n) { return down(n + 1); }\ndown(0);"))
            .unwrap();
        let (message, _) = handle.join().unwrap();
        assert_eq!(message, "maximum call depth of 256 exceeded");
    }

    #[test]
    fn test_arity_mismatch() {
        let (message, line) = raised("let f = fn (a, b) { return a; };\n\nf(1);");
        assert_eq!(message, "anonymous expects 2 arguments, got 1");
        assert_eq!(line, Some(3));
    }

    #[test]
    fn test_errors_inside_functions_keep_their_line() {
        let (message, line) = raised("fn bad() {\n  return 1 / 0;\n}\nbad();");
        assert_eq!(message, "division by zero");
        assert_eq!(line, Some(2));
    }

    #[test]
    fn test_top_level_return_ends_body() {
        assert_eq!(output("print(1);\nreturn;\nprint(2);"), "1\n");
    }
}
