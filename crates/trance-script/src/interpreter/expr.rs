//! Expression evaluation

use crate::ast::*;
use crate::builtins;
use crate::error::RuntimeError;
use crate::interpreter::{Closure, Interpreter};
use std::collections::BTreeMap;
use std::sync::Arc;
use trance_test::{Callable, ScriptError, Value};

impl<'a> Interpreter<'a> {
    /// Evaluate an expression
    pub(super) fn eval_expr(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Literal(lit, _) => Ok(match lit {
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Null => Value::Null,
            }),
            Expr::Identifier(id) => self.resolve_value(&id.name),
            Expr::Unary(unary) => self.eval_unary(unary),
            Expr::Binary(binary) => self.eval_binary(binary),
            Expr::Call(call) => self.eval_call(call),
            Expr::Index(index) => {
                let target = self.eval_expr(&index.target)?;
                let key = self.eval_expr(&index.index)?;
                index_value(&target, &key).map_err(|e| self.fail(e))
            }
            Expr::ArrayLiteral(arr) => {
                let mut items = Vec::with_capacity(arr.elements.len());
                for element in &arr.elements {
                    items.push(self.eval_expr(element)?);
                }
                Ok(Value::Array(items))
            }
            Expr::RecordLiteral(record) => {
                let mut fields = BTreeMap::new();
                for (key, value) in &record.fields {
                    let value = self.eval_expr(value)?;
                    fields.insert(key.clone(), value);
                }
                Ok(Value::Record(fields))
            }
            Expr::Function(func) => Ok(Value::Function(Callable::new(Closure {
                name: "anonymous".to_string(),
                params: func.params.iter().map(|p| p.name.clone()).collect(),
                body: func.body.clone(),
                captured: Arc::new(self.snapshot()),
                file: self.file.clone(),
                recursive: false,
            }))),
        }
    }

    /// Name lookup: mocks, then locals, then file helpers, then builtins
    fn resolve_value(&self, name: &str) -> Result<Value, ScriptError> {
        if let Some(mock) = self.ctx.resolve_mock(name) {
            return Ok(Value::Function(mock));
        }
        if let Some(binding) = self.lookup(name) {
            return Ok(binding.value.clone());
        }
        if let Some(decl) = self.file.helpers.get(name) {
            return Ok(Value::Function(Callable::new(Closure::helper(
                decl,
                self.file.clone(),
            ))));
        }
        builtins::builtin_value(name)
            .ok_or_else(|| self.fail(RuntimeError::UndefinedVariable(name.to_string())))
    }

    fn eval_unary(&mut self, unary: &UnaryExpr) -> Result<Value, ScriptError> {
        let operand = self.eval_expr(&unary.expr)?;
        match (unary.op, operand) {
            (UnaryOp::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (op, other) => Err(self.fail(RuntimeError::type_error(format!(
                "cannot apply '{}' to {}",
                if op == UnaryOp::Negate { "-" } else { "!" },
                other.type_name()
            )))),
        }
    }

    fn eval_binary(&mut self, binary: &BinaryExpr) -> Result<Value, ScriptError> {
        // && and || short-circuit
        if matches!(binary.op, BinaryOp::And | BinaryOp::Or) {
            let left = self.eval_logical_operand(binary.op, &binary.left)?;
            let decided = match binary.op {
                BinaryOp::And => !left,
                _ => left,
            };
            if decided {
                return Ok(Value::Bool(left));
            }
            let right = self.eval_logical_operand(binary.op, &binary.right)?;
            return Ok(Value::Bool(right));
        }

        let left = self.eval_expr(&binary.left)?;
        let right = self.eval_expr(&binary.right)?;
        binary_op(binary.op, left, right).map_err(|e| self.fail(e))
    }

    fn eval_logical_operand(&mut self, op: BinaryOp, expr: &Expr) -> Result<bool, ScriptError> {
        match self.eval_expr(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(self.fail(RuntimeError::type_error(format!(
                "'{}' expects bool operands, found {}",
                op.as_str(),
                other.type_name()
            )))),
        }
    }

    /// Evaluate a call. Named callees resolve like identifiers, except that
    /// builtins are dispatched directly.
    fn eval_call(&mut self, call: &CallExpr) -> Result<Value, ScriptError> {
        let mut args = Vec::with_capacity(call.args.len());

        if let Expr::Identifier(id) = call.callee.as_ref() {
            let callee = self.resolve_callee(&id.name)?;
            for arg in &call.args {
                args.push(self.eval_expr(arg)?);
            }
            let result = match callee {
                Some(function) => function.call(self.ctx, args),
                None => builtins::call_builtin(&id.name, self.ctx, args),
            };
            return result.map_err(|e| self.locate(e));
        }

        let callee = self.eval_expr(&call.callee)?;
        for arg in &call.args {
            args.push(self.eval_expr(arg)?);
        }
        match callee {
            Value::Function(function) => function.call(self.ctx, args).map_err(|e| self.locate(e)),
            other => Err(self.fail(RuntimeError::NotCallable {
                name: "expression".to_string(),
                found: other.type_name(),
            })),
        }
    }

    /// `None` means a builtin
    fn resolve_callee(&self, name: &str) -> Result<Option<Callable>, ScriptError> {
        if let Some(mock) = self.ctx.resolve_mock(name) {
            return Ok(Some(mock));
        }
        if let Some(binding) = self.lookup(name) {
            return match &binding.value {
                Value::Function(function) => Ok(Some(function.clone())),
                other => Err(self.fail(RuntimeError::NotCallable {
                    name: name.to_string(),
                    found: other.type_name(),
                })),
            };
        }
        if let Some(decl) = self.file.helpers.get(name) {
            return Ok(Some(Callable::new(Closure::helper(decl, self.file.clone()))));
        }
        if builtins::is_builtin(name) {
            return Ok(None);
        }
        Err(self.fail(RuntimeError::UndefinedFunction(name.to_string())))
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Apply a non-short-circuit binary operator
pub(super) fn binary_op(op: BinaryOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Array(mut a), Value::Array(b)) => {
                a.extend(b);
                Ok(Value::Array(a))
            }
            (l @ Value::String(_), r) | (l, r @ Value::String(_)) => {
                Ok(Value::String(format!("{}{}", l, r)))
            }
            (l, r) => Err(operand_error(op, &l, &r)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let (a, b) = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => (*a, *b),
                _ => return Err(operand_error(op, &left, &right)),
            };
            match op {
                BinaryOp::Sub => Ok(Value::Number(a - b)),
                BinaryOp::Mul => Ok(Value::Number(a * b)),
                _ if b == 0.0 => Err(RuntimeError::DivideByZero),
                BinaryOp::Div => Ok(Value::Number(a / b)),
                _ => Ok(Value::Number(a % b)),
            }
        }
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => return Err(operand_error(op, &left, &right)),
            };
            let Some(ordering) = ordering else {
                // NaN compares false
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => match (left, right) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(if op == BinaryOp::And {
                a && b
            } else {
                a || b
            })),
            (l, r) => Err(operand_error(op, &l, &r)),
        },
    }
}

fn operand_error(op: BinaryOp, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "cannot apply '{}' to {} and {}",
        op.as_str(),
        left.type_name(),
        right.type_name()
    ))
}

// ============================================================================
// Indexing
// ============================================================================

/// `target[key]`: arrays and strings by integer position, records by key.
/// Missing record keys read as null.
pub(super) fn index_value(target: &Value, key: &Value) -> Result<Value, RuntimeError> {
    match (target, key) {
        (Value::Array(items), Value::Number(n)) => {
            let index = array_index(*n, items.len())?;
            Ok(items[index].clone())
        }
        (Value::String(s), Value::Number(n)) => {
            let len = s.chars().count();
            let index = array_index(*n, len)?;
            Ok(s
                .chars()
                .nth(index)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null))
        }
        (Value::Record(fields), Value::String(name)) => {
            Ok(fields.get(name).cloned().unwrap_or(Value::Null))
        }
        (target, key) => Err(RuntimeError::type_error(format!(
            "cannot index {} with {}",
            target.type_name(),
            key.type_name()
        ))),
    }
}

/// Checked conversion of a numeric index
pub(super) fn array_index(n: f64, len: usize) -> Result<usize, RuntimeError> {
    if n.fract() != 0.0 || n < 0.0 || n >= len as f64 {
        return Err(RuntimeError::OutOfBounds {
            index: trance_test::value::format_number(n),
            len,
        });
    }
    Ok(n as usize)
}
