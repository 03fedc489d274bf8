//! JSON-RPC protocol definitions
//!
//! Line-delimited messages between a front end (plot UI, editor plugin) and
//! watchexpr-server.

use crate::dwarf::DwarfError;
use crate::expr::{Address, EvalError, EvalResult, Evaluation};
use crate::symbols::{LoadState, SourceFile, StorageClass, TypeChild};
use serde::{Deserialize, Serialize};

/// Request from a front end to watchexpr-server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    /// Load (or replace) the symbol file
    #[serde(rename = "load_symbols")]
    LoadSymbols { path: String },

    /// Reload the current symbol file
    #[serde(rename = "refresh")]
    Refresh,

    /// Stop a load in progress
    #[serde(rename = "abort_load")]
    AbortLoad,

    #[serde(rename = "status")]
    Status,

    /// Resolve a watch expression; `numeric` rejects non-scalar results
    #[serde(rename = "evaluate")]
    Evaluate {
        expr: String,
        #[serde(default)]
        numeric: bool,
    },

    /// Parse only, returning the canonical text
    #[serde(rename = "parse")]
    Parse { expr: String },

    #[serde(rename = "sizeof")]
    SizeOf { type_name: String },

    #[serde(rename = "list_sources")]
    ListSources,

    #[serde(rename = "list_variables")]
    ListVariables { source: String },

    /// Members or elements of a type, for tree views
    #[serde(rename = "type_children")]
    TypeChildren { type_name: String },

    /// Shutdown the server
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// A variable as listed for one source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub address: u64,
    pub type_name: String,
    pub byte_size: Option<u64>,
    pub storage: StorageClass,
}

/// Response from watchexpr-server to a front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Evaluated {
        result: EvalResult,
        blocks: Vec<Address>,
    },
    Parsed {
        canonical: String,
    },
    Size {
        size: u64,
    },
    Status {
        status: LoadState,
        symbol_file: Option<String>,
    },
    Sources {
        sources: Vec<SourceFile>,
    },
    Variables {
        variables: Vec<VariableInfo>,
    },
    Children {
        children: Vec<TypeChild>,
    },
    Success {
        ok: bool,
    },
    Error {
        error: String,
        kind: String,
    },
}

impl Response {
    pub fn success() -> Self {
        Response::Success { ok: true }
    }

    pub fn error(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Response::Error {
            error: msg.into(),
            kind: kind.into(),
        }
    }

    pub fn evaluated(evaluation: Evaluation) -> Self {
        Response::Evaluated {
            blocks: evaluation.blocks().to_vec(),
            result: evaluation.into_result(),
        }
    }
}

impl From<EvalError> for Response {
    fn from(err: EvalError) -> Self {
        Response::error(err.kind(), err.to_string())
    }
}

impl From<DwarfError> for Response {
    fn from(err: DwarfError) -> Self {
        Response::error(err.kind(), err.to_string())
    }
}

/// JSON-RPC message wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage<T> {
    pub jsonrpc: String,
    pub id: Option<u64>,
    #[serde(flatten)]
    pub content: T,
}

impl<T> RpcMessage<T> {
    pub fn new(id: u64, content: T) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            content,
        }
    }
}
