//! Abstract Syntax Tree (AST) definitions for script bodies

use std::sync::Arc;
use trance_test::syntax::Span;

/// Identifier with its position
#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub name: String,
    pub span: Span,
}

/// Block of statements
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

/// Named function: a file helper or a nested `fn` statement
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Identifier,
    pub params: Vec<Identifier>,
    /// Shared with every closure created from this declaration
    pub body: Arc<Block>,
    pub span: Span,
}

/// Statement
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    VarDecl(VarDecl),
    FunctionDecl(FunctionDecl),
    Assign(Assign),
    CompoundAssign(CompoundAssign),
    If(IfStmt),
    While(WhileStmt),
    ForIn(ForInStmt),
    Return(ReturnStmt),
    Break(Span),
    Continue(Span),
    Block(Block),
    Expr(ExprStmt),
}

/// `let` (immutable) or `var` (mutable) binding
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub mutable: bool,
    pub name: Identifier,
    pub init: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Name(Identifier),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assign {
    pub target: AssignTarget,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    AddAssign,
    SubAssign,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundAssign {
    pub target: AssignTarget,
    pub op: CompoundOp,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub cond: Expr,
    pub then_block: Block,
    pub else_block: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileStmt {
    pub cond: Expr,
    pub body: Block,
    pub span: Span,
}

/// `for x in iterable { }`
#[derive(Debug, Clone, PartialEq)]
pub struct ForInStmt {
    pub variable: Identifier,
    pub iterable: Expr,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprStmt {
    pub expr: Expr,
    pub span: Span,
}

/// Expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal, Span),
    Identifier(Identifier),
    Unary(UnaryExpr),
    Binary(BinaryExpr),
    Call(CallExpr),
    Index(IndexExpr),
    ArrayLiteral(ArrayLiteral),
    RecordLiteral(RecordLiteral),
    Function(FunctionExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub expr: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub callee: Box<Expr>,
    pub args: Vec<Expr>,
    pub span: Span,
}

/// `target[index]`, also produced for `target.field`
#[derive(Debug, Clone, PartialEq)]
pub struct IndexExpr {
    pub target: Box<Expr>,
    pub index: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayLiteral {
    pub elements: Vec<Expr>,
    pub span: Span,
}

/// `{ "key": value, other: value }`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLiteral {
    pub fields: Vec<(String, Expr)>,
    pub span: Span,
}

/// Anonymous function `fn (a, b) { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpr {
    pub params: Vec<Identifier>,
    pub body: Arc<Block>,
    pub span: Span,
}

impl Expr {
    /// Get the span of this expression
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(_, span) => *span,
            Expr::Identifier(id) => id.span,
            Expr::Unary(u) => u.span,
            Expr::Binary(b) => b.span,
            Expr::Call(c) => c.span,
            Expr::Index(i) => i.span,
            Expr::ArrayLiteral(a) => a.span,
            Expr::RecordLiteral(r) => r.span,
            Expr::Function(f) => f.span,
        }
    }
}

impl Stmt {
    /// Get the span of this statement
    pub fn span(&self) -> Span {
        match self {
            Stmt::VarDecl(v) => v.span,
            Stmt::FunctionDecl(f) => f.span,
            Stmt::Assign(a) => a.span,
            Stmt::CompoundAssign(c) => c.span,
            Stmt::If(i) => i.span,
            Stmt::While(w) => w.span,
            Stmt::ForIn(f) => f.span,
            Stmt::Return(r) => r.span,
            Stmt::Break(span) | Stmt::Continue(span) => *span,
            Stmt::Block(b) => b.span,
            Stmt::Expr(e) => e.span,
        }
    }

    /// Line the statement starts on; its coverage region
    pub fn line(&self) -> u32 {
        self.span().line
    }
}

// ============================================================================
// Coverage regions
// ============================================================================

/// Sorted, deduplicated start lines of every statement reachable from
/// `statements`, including nested blocks and function bodies.
pub fn statement_lines(statements: &[Stmt]) -> Vec<u32> {
    let mut lines = Vec::new();
    collect_statements(statements, &mut lines);
    lines.sort_unstable();
    lines.dedup();
    lines
}

fn collect_statements(statements: &[Stmt], out: &mut Vec<u32>) {
    for stmt in statements {
        out.push(stmt.line());
        match stmt {
            Stmt::VarDecl(v) => collect_expr(&v.init, out),
            Stmt::FunctionDecl(f) => collect_statements(&f.body.statements, out),
            Stmt::Assign(a) => {
                collect_target(&a.target, out);
                collect_expr(&a.value, out);
            }
            Stmt::CompoundAssign(c) => {
                collect_target(&c.target, out);
                collect_expr(&c.value, out);
            }
            Stmt::If(i) => {
                collect_expr(&i.cond, out);
                collect_statements(&i.then_block.statements, out);
                if let Some(else_block) = &i.else_block {
                    collect_statements(&else_block.statements, out);
                }
            }
            Stmt::While(w) => {
                collect_expr(&w.cond, out);
                collect_statements(&w.body.statements, out);
            }
            Stmt::ForIn(f) => {
                collect_expr(&f.iterable, out);
                collect_statements(&f.body.statements, out);
            }
            Stmt::Return(r) => {
                if let Some(value) = &r.value {
                    collect_expr(value, out);
                }
            }
            Stmt::Block(b) => collect_statements(&b.statements, out),
            Stmt::Expr(e) => collect_expr(&e.expr, out),
            Stmt::Break(_) | Stmt::Continue(_) => {}
        }
    }
}

fn collect_target(target: &AssignTarget, out: &mut Vec<u32>) {
    if let AssignTarget::Index { target, index, .. } = target {
        collect_expr(target, out);
        collect_expr(index, out);
    }
}

/// Only function literals contribute regions; other expressions are walked
/// to find them.
fn collect_expr(expr: &Expr, out: &mut Vec<u32>) {
    match expr {
        Expr::Function(f) => collect_statements(&f.body.statements, out),
        Expr::Unary(u) => collect_expr(&u.expr, out),
        Expr::Binary(b) => {
            collect_expr(&b.left, out);
            collect_expr(&b.right, out);
        }
        Expr::Call(c) => {
            collect_expr(&c.callee, out);
            for arg in &c.args {
                collect_expr(arg, out);
            }
        }
        Expr::Index(i) => {
            collect_expr(&i.target, out);
            collect_expr(&i.index, out);
        }
        Expr::ArrayLiteral(a) => {
            for element in &a.elements {
                collect_expr(element, out);
            }
        }
        Expr::RecordLiteral(r) => {
            for (_, value) in &r.fields {
                collect_expr(value, out);
            }
        }
        Expr::Literal(..) | Expr::Identifier(_) => {}
    }
}
