//! AST - abstract syntax tree for the Swell language

use swell_error::{Span, Spanned};

/// One parsed `.ht` source file
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub imports: Vec<Import>,
    pub functions: Vec<FnDecl>,
    pub structs: Vec<StructDecl>,
}

/// `import time`
#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub span: Span,
}

/// Function declaration
///
/// `sync` functions complete inline at their call site; everything else
/// becomes an asynchronous continuation. `native` functions have no body
/// here - the runtime provides one.
#[derive(Debug, Clone)]
pub struct FnDecl {
    pub is_sync: bool,
    pub is_native: bool,
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Vec<TypeRep>,
    pub body: Option<Block>,
    pub span: Span,
}

/// Function parameter
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TypeRep,
    pub span: Span,
}

/// `struct Point { Integer\n Integer\n }` - a nominal product type with
/// positional fields
#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<TypeRep>,
    pub span: Span,
}

/// A surface type expression, before resolution
///
/// `&Name` sets the borrow flag; `Name[T, ...]` carries arguments (only
/// meaningful for `Union`, `Tuple` and `Array`).
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRep {
    pub borrowed: bool,
    pub name: String,
    pub args: Vec<TypeRep>,
    pub span: Span,
}

/// A `{ ... }` statement list
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub statements: Vec<Stmt>,
}

/// Statements
#[derive(Debug, Clone)]
pub enum Stmt {
    /// `let a, b = expr` (`must_exist` false) or `set a, b = expr`
    /// (`must_exist` true)
    Bind {
        must_exist: bool,
        names: Vec<String>,
        value: Expr,
        span: Span,
    },

    /// `return expr`
    Return { value: Expr, span: Span },

    /// `if cond [is Type] { ... } else { ... }`
    If {
        cond: Expr,
        narrow: Option<TypeRep>,
        then_block: Block,
        else_block: Block,
        span: Span,
    },

    /// `while cond { ... }`
    While { cond: Expr, body: Block, span: Span },

    /// A bare expression; must produce no values
    Expr { expr: Expr, span: Span },
}

impl Spanned for Stmt {
    fn span(&self) -> Span {
        match self {
            Stmt::Bind { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Expr { span, .. } => *span,
        }
    }
}

/// Comparison operators (integers only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// The operator's source (and C) spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// A full expression: a concatenation chain, optionally compared against
/// another chain. `a + b < c` parses as `(a + b) < c`.
#[derive(Debug, Clone)]
pub struct Expr {
    pub sum: SumExpr,
    pub compare: Option<Comparison>,
    pub span: Span,
}

/// The right side of a comparison
#[derive(Debug, Clone)]
pub struct Comparison {
    pub op: CompareOp,
    pub operand: SumExpr,
}

/// `a + b + c` - lowered as nested `concat` calls, left-associative
#[derive(Debug, Clone)]
pub struct SumExpr {
    pub first: CallExpr,
    pub terms: Vec<CallExpr>,
    pub span: Span,
}

/// A base expression with zero or more argument lists applied to it
#[derive(Debug, Clone)]
pub struct CallExpr {
    pub base: BaseExpr,
    pub calls: Vec<CallArgs>,
    pub span: Span,
}

/// One `(arg, ...)` application
#[derive(Debug, Clone)]
pub struct CallArgs {
    pub args: Vec<Arg>,
    pub span: Span,
}

/// A call argument: either an explicit borrow of a local, or a value
#[derive(Debug, Clone)]
pub enum Arg {
    /// `&name` - the callee gets a reference; the local survives the call
    Borrow { name: String, span: Span },
    /// An owned (or freshly computed) value
    Expr(Expr),
}

/// Atomic expression forms
#[derive(Debug, Clone)]
pub enum BaseExpr {
    /// Identifier reference (`true`/`false` are separate variants)
    Variable { name: String, span: Span },
    /// `true` / `false`
    BoolLit { value: bool, span: Span },
    /// Quoted string
    StringLit { value: String, span: Span },
    /// Integer literal
    IntLit { value: i64, span: Span },
    /// `(a, b, ...)` - at least two elements
    Tuple { items: Vec<Expr>, span: Span },
    /// `[a, b, ...]`
    Array { items: Vec<Expr>, span: Span },
}

impl Spanned for BaseExpr {
    fn span(&self) -> Span {
        match self {
            BaseExpr::Variable { span, .. }
            | BaseExpr::BoolLit { span, .. }
            | BaseExpr::StringLit { span, .. }
            | BaseExpr::IntLit { span, .. }
            | BaseExpr::Tuple { span, .. }
            | BaseExpr::Array { span, .. } => *span,
        }
    }
}
