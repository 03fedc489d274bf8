//! WatchExpr Core Library
//!
//! Watch-expression engine for embedded targets:
//! - C-like watch expression grammar and parser
//! - Resolver producing target addresses and types without touching memory
//! - Type/symbol database built from DWARF debug info

pub mod config;
pub mod dwarf;
pub mod engine;
pub mod expr;
pub mod protocol;
pub mod symbols;

pub use config::EngineConfig;
pub use engine::WatchEngine;
pub use expr::{parse_expr, EvalError, EvalResult, Evaluation, Expr, MemoryReader};
pub use protocol::{Request, Response};
pub use symbols::{SymbolStore, TypeDatabase};
