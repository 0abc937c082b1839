//! Statement execution

use crate::ast::*;
use crate::error::RuntimeError;
use crate::interpreter::{Closure, ControlFlow, Interpreter};
use std::collections::HashMap;
use std::sync::Arc;
use trance_test::{Callable, ScriptError, Value};

impl<'a> Interpreter<'a> {
    /// Execute statements until one changes control flow
    pub(super) fn exec_statements(&mut self, statements: &[Stmt]) -> Result<(), ScriptError> {
        for stmt in statements {
            self.eval_statement(stmt)?;
            if self.control_flow != ControlFlow::None {
                break;
            }
        }
        Ok(())
    }

    /// Execute a block in its own scope
    pub(super) fn exec_block(&mut self, block: &Block) -> Result<(), ScriptError> {
        self.push_scope(HashMap::new());
        let result = self.exec_statements(&block.statements);
        self.pop_scope();
        result
    }

    /// Execute a statement
    pub(super) fn eval_statement(&mut self, stmt: &Stmt) -> Result<(), ScriptError> {
        self.ctx.check_cancelled()?;
        self.line = stmt.line();
        self.ctx.cover(&self.file.source.region(self.line));

        match stmt {
            Stmt::VarDecl(var) => {
                let value = self.eval_expr(&var.init)?;
                self.declare(&var.name.name, value, var.mutable);
            }
            Stmt::FunctionDecl(func) => {
                let closure = Closure {
                    name: func.name.name.clone(),
                    params: func.params.iter().map(|p| p.name.clone()).collect(),
                    body: func.body.clone(),
                    captured: Arc::new(self.snapshot()),
                    file: self.file.clone(),
                    recursive: true,
                };
                self.declare(
                    &func.name.name,
                    Value::Function(Callable::new(closure)),
                    false,
                );
            }
            Stmt::Assign(assign) => {
                let value = self.eval_expr(&assign.value)?;
                self.assign(&assign.target, None, value)?;
            }
            Stmt::CompoundAssign(compound) => {
                let value = self.eval_expr(&compound.value)?;
                self.assign(&compound.target, Some(compound.op), value)?;
            }
            Stmt::If(if_stmt) => self.eval_if(if_stmt)?,
            Stmt::While(while_stmt) => self.eval_while(while_stmt)?,
            Stmt::ForIn(for_in) => self.eval_for_in(for_in)?,
            Stmt::Return(ret) => {
                let value = match &ret.value {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::Null,
                };
                self.control_flow = ControlFlow::Return(value);
            }
            Stmt::Break(_) => self.control_flow = ControlFlow::Break,
            Stmt::Continue(_) => self.control_flow = ControlFlow::Continue,
            Stmt::Block(block) => self.exec_block(block)?,
            Stmt::Expr(expr_stmt) => {
                self.eval_expr(&expr_stmt.expr)?;
            }
        }
        Ok(())
    }

    /// Evaluate an if statement
    fn eval_if(&mut self, if_stmt: &IfStmt) -> Result<(), ScriptError> {
        if self.eval_condition(&if_stmt.cond)? {
            self.exec_block(&if_stmt.then_block)
        } else if let Some(else_block) = &if_stmt.else_block {
            self.exec_block(else_block)
        } else {
            Ok(())
        }
    }

    /// Evaluate a while loop
    fn eval_while(&mut self, while_stmt: &WhileStmt) -> Result<(), ScriptError> {
        loop {
            self.ctx.check_cancelled()?;
            self.line = while_stmt.span.line;
            if !self.eval_condition(&while_stmt.cond)? {
                break;
            }
            self.exec_block(&while_stmt.body)?;
            if self.finish_iteration() {
                break;
            }
        }
        Ok(())
    }

    /// Evaluate `for x in iterable`: arrays by element, strings by
    /// character, records by key
    fn eval_for_in(&mut self, for_in: &ForInStmt) -> Result<(), ScriptError> {
        let items: Vec<Value> = match self.eval_expr(&for_in.iterable)? {
            Value::Array(items) => items,
            Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
            Value::Record(fields) => fields.into_keys().map(Value::String).collect(),
            other => {
                return Err(self.fail(RuntimeError::type_error(format!(
                    "cannot iterate over {}",
                    other.type_name()
                ))))
            }
        };

        for item in items {
            self.ctx.check_cancelled()?;
            let mut scope = HashMap::new();
            scope.insert(
                for_in.variable.name.clone(),
                super::Binding {
                    value: item,
                    mutable: false,
                },
            );
            self.push_scope(scope);
            let result = self.exec_block(&for_in.body);
            self.pop_scope();
            result?;
            if self.finish_iteration() {
                break;
            }
        }
        Ok(())
    }

    /// Consume break/continue after a loop body; true when the loop ends
    fn finish_iteration(&mut self) -> bool {
        match self.control_flow {
            ControlFlow::Break => {
                self.control_flow = ControlFlow::None;
                true
            }
            ControlFlow::Continue => {
                self.control_flow = ControlFlow::None;
                false
            }
            ControlFlow::Return(_) => true,
            ControlFlow::None => false,
        }
    }

    /// Conditions must be booleans
    pub(super) fn eval_condition(&mut self, cond: &Expr) -> Result<bool, ScriptError> {
        match self.eval_expr(cond)? {
            Value::Bool(b) => Ok(b),
            other => Err(self.fail(RuntimeError::type_error(format!(
                "condition must be bool, found {}",
                other.type_name()
            )))),
        }
    }

    // === Assignment ===

    /// Store `value` into `target`, combining with the current value for
    /// compound operators
    fn assign(
        &mut self,
        target: &AssignTarget,
        op: Option<CompoundOp>,
        value: Value,
    ) -> Result<(), ScriptError> {
        match target {
            AssignTarget::Name(id) => {
                let current = match op {
                    Some(_) => Some(self.lookup_mut(&id.name)?.value.clone()),
                    None => None,
                };
                let new_value = self.combine(current, op, value)?;
                self.lookup_mut(&id.name)?.value = new_value;
            }
            AssignTarget::Index { target, index, .. } => {
                let (root, mut path) = self.index_path(target)?;
                path.push(self.eval_expr(index)?);

                let line = self.line;
                let current = match op {
                    Some(_) => {
                        let binding = self.lookup_mut(&root.name)?;
                        Some(get_path(&binding.value, &path).map_err(|e| {
                            ScriptError::raised_at(e.to_string(), line)
                        })?)
                    }
                    None => None,
                };
                let new_value = self.combine(current, op, value)?;
                let binding = self.lookup_mut(&root.name)?;
                set_path(&mut binding.value, &path, new_value)
                    .map_err(|e| ScriptError::raised_at(e.to_string(), line))?;
            }
        }
        Ok(())
    }

    fn combine(
        &self,
        current: Option<Value>,
        op: Option<CompoundOp>,
        value: Value,
    ) -> Result<Value, ScriptError> {
        match (current, op) {
            (Some(current), Some(CompoundOp::AddAssign)) => {
                super::expr::binary_op(BinaryOp::Add, current, value).map_err(|e| self.fail(e))
            }
            (Some(current), Some(CompoundOp::SubAssign)) => {
                super::expr::binary_op(BinaryOp::Sub, current, value).map_err(|e| self.fail(e))
            }
            _ => Ok(value),
        }
    }

    /// Root variable and evaluated keys of `a[i][j]` / `a.b`
    fn index_path<'e>(
        &mut self,
        expr: &'e Expr,
    ) -> Result<(&'e Identifier, Vec<Value>), ScriptError> {
        match expr {
            Expr::Identifier(id) => Ok((id, Vec::new())),
            Expr::Index(idx) => {
                let (root, mut path) = self.index_path(&idx.target)?;
                path.push(self.eval_expr(&idx.index)?);
                Ok((root, path))
            }
            _ => Err(self.fail(RuntimeError::type_error(
                "cannot assign into a temporary value",
            ))),
        }
    }
}

// ============================================================================
// Nested value access
// ============================================================================

/// Read `value[path[0]][path[1]]...`
fn get_path(value: &Value, path: &[Value]) -> Result<Value, RuntimeError> {
    let mut current = value.clone();
    for key in path {
        current = super::expr::index_value(&current, key)?;
    }
    Ok(current)
}

/// Write through `path`; record keys are created, array slots must exist
fn set_path(value: &mut Value, path: &[Value], new_value: Value) -> Result<(), RuntimeError> {
    let Some((key, rest)) = path.split_first() else {
        *value = new_value;
        return Ok(());
    };
    let slot = match (value, key) {
        (Value::Array(items), Value::Number(n)) => {
            let len = items.len();
            let index = super::expr::array_index(*n, len)?;
            &mut items[index]
        }
        (Value::Record(fields), Value::String(name)) => {
            fields.entry(name.clone()).or_insert(Value::Null)
        }
        (target, key) => {
            return Err(RuntimeError::type_error(format!(
                "cannot index {} with {}",
                target.type_name(),
                key.type_name()
            )))
        }
    };
    set_path(slot, rest, new_value)
}

#[cfg(test)]
mod tests {
    use crate::interpreter::{FileScope, Interpreter};
    use crate::parser::parse_body;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Arc;
    use trance_test::{RunContext, ScriptError, SourceFile};

    fn eval(text: &str) -> (RunContext, Result<(), ScriptError>) {
        let ctx = RunContext::standalone("stmt");
        let source = SourceFile::new(PathBuf::from("s.hyp"), "s.hyp");
        let file = Arc::new(FileScope::new(Arc::new(source), HashMap::new()));
        let stmts = parse_body(text, 1, 1).unwrap();
        let result = Interpreter::new(&ctx, &file).run(&stmts);
        (ctx, result)
    }

    fn output(text: &str) -> String {
        let (ctx, result) = eval(text);
        if let Err(e) = result {
            panic!("evaluation failed: {:?}", e);
        }
        ctx.output()
    }

    fn error(text: &str) -> String {
        match eval(text).1 {
            Err(e) => e.message(),
            Ok(()) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_while_with_break_and_continue() {
        let out = output(
            "var i = 0;\n\
             var total = 0;\n\
             while i < 10 {\n\
               i += 1;\n\
               if i % 2 == 0 { continue; }\n\
               if i > 7 { break; }\n\
               total += i;\n\
             }\n\
             print(total);",
        );
        assert_eq!(out, "16\n");
    }

    #[test]
    fn test_for_in_over_collections() {
        let out = output(
            "for x in [1, 2] { print(x); }\n\
             for c in \"ab\" { print(c); }\n\
             for k in { b: 1, a: 2 } { print(k); }",
        );
        assert_eq!(out, "1\n2\na\nb\na\nb\n");
    }

    #[test]
    fn test_block_scoping_and_shadowing() {
        let out = output("let x = 1;\n{ let x = 2; print(x); }\nprint(x);");
        assert_eq!(out, "2\n1\n");
    }

    #[test]
    fn test_nested_index_assignment() {
        let out = output(
            "var rows = [{ name: \"a\", tags: [] }];\n\
             rows[0].name = \"b\";\n\
             rows[0].tags = push(rows[0].tags, 1);\n\
             rows[0][\"count\"] = 3;\n\
             rows[0].count += 2;\n\
             print(rows);",
        );
        assert_eq!(out, "[{\"count\": 5, \"name\": \"b\", \"tags\": [1]}]\n");
    }

    #[rstest]
    #[case("let x = 1; x = 2;", "cannot assign to 'x': declared with let")]
    #[case("y = 2;", "unknown name 'y'")]
    #[case("var a = [1]; a[3] = 2;", "index 3 out of bounds for length 1")]
    #[case("var n = 1; n[0] = 2;", "cannot index number with number")]
    #[case("if 1 { }", "condition must be bool, found number")]
    #[case("for x in 3 { }", "cannot iterate over number")]
    #[case("var s = \"a\"; s -= 1;", "cannot apply '-' to string and number")]
    fn test_statement_errors(#[case] text: &str, #[case] message: &str) {
        assert_eq!(error(text), message);
    }

    #[test]
    fn test_every_executed_statement_is_covered() {
        use trance_test::CoverageMap;
        let coverage = Arc::new(CoverageMap::new());
        let source = SourceFile::new(PathBuf::from("c.hyp"), "c.hyp");
        for line in 1..=4 {
            coverage.register(source.region(line));
        }
        let file = Arc::new(FileScope::new(Arc::new(source), HashMap::new()));
        let ctx = RunContext::standalone("cov").with_coverage(Some(coverage.clone()));
        let stmts = parse_body("let a = 1;\nif a > 5 {\n  print(a);\n}\n", 1, 1).unwrap();
        Interpreter::new(&ctx, &file).run(&stmts).unwrap();

        let summary = coverage.summary();
        assert_eq!((summary.covered, summary.total), (2, 4));
    }
}
