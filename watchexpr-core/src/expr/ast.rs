//! AST definitions for watch expressions
//!
//! `Display` on every node is the canonical printer: parentheses are kept as
//! written, so printing and re-parsing yields the same tree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address-bearing expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    /// Global or static name: `counter`, `ns::state`
    Ident(ScopedIdent),

    /// Parenthesized: `(p)`
    Paren(Box<Expr>),

    /// Single-eval block: `{ p->next }`
    SingleEval(Box<Expr>),

    /// Member access: `a.b`, `p->b`
    Member {
        base: Box<Expr>,
        access: Access,
        member: String,
    },

    /// Subscript: `a[i * 2]`
    Index { base: Box<Expr>, index: DetExpr },

    /// Dereference or address-of: `*p`, `&x`
    Unary { op: UnaryOp, expr: Box<Expr> },

    /// Cast: `(uint32_t*)addr`
    Cast { ty: TypeName, expr: Box<Expr> },

    /// Pointer offset: `p + 4`, `buf - sizeof(int)`
    Offset {
        base: Box<Expr>,
        op: OffsetOp,
        offset: DetExpr,
    },
}

/// Side-effect-free integer arithmetic used in subscripts and offsets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetExpr {
    Literal(i64),
    SizeOf(TypeName),
    Neg(Box<DetExpr>),
    Paren(Box<DetExpr>),
    Binary {
        left: Box<DetExpr>,
        op: DetOp,
        right: Box<DetExpr>,
    },
}

/// `ident(::ident)*`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopedIdent {
    pub segments: Vec<String>,
}

impl ScopedIdent {
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    pub fn single(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }
}

/// Named type with `*` / `[]` suffixes applied left to right
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeName {
    pub base: ScopedIdent,
    pub suffixes: Vec<TypeSuffix>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeSuffix {
    Pointer,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    Dot,
    Arrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Deref,
    AddrOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffsetOp {
    Add,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetOp {
    Add,
    Sub,
    Mul,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Dot => ".",
            Access::Arrow => "->",
        }
    }
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Deref => "*",
            UnaryOp::AddrOf => "&",
        }
    }
}

impl OffsetOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetOp::Add => "+",
            OffsetOp::Sub => "-",
        }
    }
}

impl DetOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetOp::Add => "+",
            DetOp::Sub => "-",
            DetOp::Mul => "*",
        }
    }
}

impl fmt::Display for ScopedIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("::"))
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        for suffix in &self.suffixes {
            match suffix {
                TypeSuffix::Pointer => write!(f, "*")?,
                TypeSuffix::Array => write!(f, "[]")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(ident) => write!(f, "{}", ident),
            Expr::Paren(inner) => write!(f, "({})", inner),
            Expr::SingleEval(inner) => write!(f, "{{{}}}", inner),
            Expr::Member {
                base,
                access,
                member,
            } => write!(f, "{}{}{}", base, access.as_str(), member),
            Expr::Index { base, index } => write!(f, "{}[{}]", base, index),
            Expr::Unary { op, expr } => write!(f, "{}{}", op.as_str(), expr),
            Expr::Cast { ty, expr } => write!(f, "({}){}", ty, expr),
            Expr::Offset { base, op, offset } => write!(f, "{} {} {}", base, op.as_str(), offset),
        }
    }
}

impl fmt::Display for DetExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetExpr::Literal(value) => write!(f, "{}", value),
            DetExpr::SizeOf(ty) => write!(f, "sizeof({})", ty),
            DetExpr::Neg(inner) => write!(f, "-{}", inner),
            DetExpr::Paren(inner) => write!(f, "({})", inner),
            DetExpr::Binary { left, op, right } => write!(f, "{} {} {}", left, op.as_str(), right),
        }
    }
}
