//! The host-language AST this translator consumes.
//!
//! The host language is a Python-like scripting language; this module only
//! models the subset of its grammar the translator needs to read (per
//! spec §6): class/function definitions, assignments, expression
//! statements, calls, attribute/subscript access, literals, names,
//! if/elif/else, try/except, with, raise, return, and decorator lists.
//! The translator never evaluates these nodes — it only pattern-matches
//! their shape and threads source spans through for diagnostics.

use serde::{Deserialize, Serialize};

/// A byte range in the original source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The smallest span that covers both `self` and `other`.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// A span with no corresponding source text, for synthesized nodes
    /// (e.g. an implicit `Succeed` at the end of an empty function body).
    pub fn synthetic() -> Span {
        Span { start: 0, end: 0 }
    }

    pub fn is_synthetic(&self) -> bool {
        self.start == 0 && self.end == 0
    }
}

/// A literal value as written in source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
}

/// One key in a `data[...]` subscript chain. `data["r"]` and `data[0]` are
/// both legal per the DataRef grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexKey {
    Str(String),
    Int(i64),
}

impl IndexKey {
    /// The JSON-pointer-like rendering used in `ResultPath`/`InputPath`,
    /// e.g. `$['r']` or `$[0]`.
    pub fn to_path_segment(&self) -> String {
        match self {
            IndexKey::Str(s) => format!("['{s}']"),
            IndexKey::Int(i) => format!("[{i}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastKind {
    Str,
    Int,
    Float,
    Bool,
}

impl CastKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "str" => Some(CastKind::Str),
            "int" => Some(CastKind::Int),
            "float" => Some(CastKind::Float),
            "bool" => Some(CastKind::Bool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Is,
    IsNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOpKind {
    And,
    Or,
}

/// A keyword argument passed at a call site: `key=value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kwarg {
    pub name: String,
    pub value: Expr,
}

/// An expression in the subset the translator understands. Everything
/// else the host grammar allows (f-strings, comprehensions, lambdas, ...)
/// simply never appears inside the DSL statement shapes the Statement
/// Visitor recognizes, so it has no representation here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal, Span),
    /// A bare identifier: a task class name, a function name, `data`
    /// itself when unsubscripted, `context`, etc.
    Name(String, Span),
    /// `data[...][...]` — one or more subscripts chained off `data`.
    DataRef(Vec<IndexKey>, Span),
    /// `value.attr`, e.g. `context.stop_execution`.
    Attribute {
        value: Box<Expr>,
        attr: String,
        span: Span,
    },
    /// `func(args..., kw=val...)`.
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<Kwarg>,
        span: Span,
    },
    /// `str(x)`, `int(x)`, `float(x)`, `bool(x)` wrapping a `DataRef`.
    Cast {
        kind: CastKind,
        arg: Box<Expr>,
        span: Span,
    },
    BoolOp {
        op: BoolOpKind,
        values: Vec<Expr>,
        span: Span,
    },
    UnaryNot {
        operand: Box<Expr>,
        span: Span,
    },
    Compare {
        left: Box<Expr>,
        op: CmpOp,
        right: Box<Expr>,
        span: Span,
    },
    /// A `{...}` literal, used by `data.update({...})`.
    Dict {
        entries: Vec<(Expr, Expr)>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(_, s) => *s,
            Expr::Name(_, s) => *s,
            Expr::DataRef(_, s) => *s,
            Expr::Attribute { span, .. } => *span,
            Expr::Call { span, .. } => *span,
            Expr::Cast { span, .. } => *span,
            Expr::BoolOp { span, .. } => *span,
            Expr::UnaryNot { span, .. } => *span,
            Expr::Compare { span, .. } => *span,
            Expr::Dict { span, .. } => *span,
        }
    }

    /// True for `Expr::Name` nodes, used when resolving task/iterator/
    /// branch-function references against module-scope definitions.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Expr::Name(n, _) => Some(n.as_str()),
            _ => None,
        }
    }

    pub fn as_data_ref(&self) -> Option<&[IndexKey]> {
        match self {
            Expr::DataRef(path, _) => Some(path.as_slice()),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<(&Expr, &[Expr], &[Kwarg])> {
        match self {
            Expr::Call {
                func, args, kwargs, ..
            } => Some((func.as_ref(), args.as_slice(), kwargs.as_slice())),
            _ => None,
        }
    }

    pub fn as_str_literal(&self) -> Option<&str> {
        match self {
            Expr::Literal(Literal::Str(s), _) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// The left-hand side of a recognized assignment: `data[...] = ...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub path: Vec<IndexKey>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptHandler {
    /// Exception class names in the `except (A, B):` tuple; empty with
    /// `is_bare` set for a bare `except:`.
    pub exc_types: Vec<String>,
    pub is_bare: bool,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// A function-level decorator: `@schedule(expression="rate(1 hour)")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decorator {
    pub name: String,
    pub args: Vec<Expr>,
    pub kwargs: Vec<Kwarg>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Assign {
        target: Target,
        value: Expr,
        span: Span,
    },
    /// Present in the AST per §6's read-only interface requirement; no
    /// statement shape in §4.1 lowers it, so the Statement Visitor always
    /// raises `SyntaxUnsupported` for it.
    AugAssign {
        target: Target,
        op: String,
        value: Expr,
        span: Span,
    },
    ExprStmt(Expr, Span),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        span: Span,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        span: Span,
    },
    /// `with retry(...): <single statement>`.
    With {
        context_expr: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    Raise {
        exc: Expr,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Pass {
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Assign { span, .. } => *span,
            Stmt::AugAssign { span, .. } => *span,
            Stmt::ExprStmt(_, span) => *span,
            Stmt::If { span, .. } => *span,
            Stmt::Try { span, .. } => *span,
            Stmt::With { span, .. } => *span,
            Stmt::Raise { span, .. } => *span,
            Stmt::Return { span, .. } => *span,
            Stmt::Pass { span } => *span,
        }
    }
}

/// `def name(params...): body`, decorated or not. For task-class methods
/// `body_span` captures the verbatim source range handed through as
/// `TaskDefinition::run_body`; for state-machine functions it is unused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub decorators: Vec<Decorator>,
    pub body: Vec<Stmt>,
    pub span: Span,
    pub body_span: Span,
}

/// A member of a class body: either a simple attribute assignment
/// (`service = "ecs"`) or a method definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClassMember {
    Assign { name: String, value: Expr, span: Span },
    Method(FunctionDef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub body: Vec<ClassMember>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    Class(ClassDef),
    Function(FunctionDef),
}

/// The parsed project source: a flat list of module-scope definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub items: Vec<Item>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_merge_takes_the_outer_bounds() {
        let a = Span::new(5, 10);
        let b = Span::new(2, 7);
        assert_eq!(a.merge(b), Span::new(2, 10));
    }

    #[test]
    fn synthetic_span_is_recognized() {
        assert!(Span::synthetic().is_synthetic());
        assert!(!Span::new(0, 1).is_synthetic());
    }

    #[test]
    fn index_key_path_segment_rendering() {
        assert_eq!(IndexKey::Str("r".into()).to_path_segment(), "['r']");
        assert_eq!(IndexKey::Int(2).to_path_segment(), "[2]");
    }

    #[test]
    fn cast_kind_from_name() {
        assert_eq!(CastKind::from_name("int"), Some(CastKind::Int));
        assert_eq!(CastKind::from_name("nope"), None);
    }
}
