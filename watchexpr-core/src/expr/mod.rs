//! Watch expression module
//!
//! Parses C-like watch expressions and resolves them against a type database.

pub mod ast;
pub mod error;
mod lexer;
pub mod parser;
pub mod resolve;
pub mod value;

pub use ast::{DetExpr, Expr, TypeName};
pub use error::EvalError;
pub use parser::{parse_det_expr, parse_expr, parse_type_name};
pub use resolve::{eval_det, resolve, Resolver};
pub use value::{Address, EvalResult, Evaluation, Materialized, MemoryReader};
