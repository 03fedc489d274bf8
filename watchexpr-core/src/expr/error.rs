//! Expression error types

use crate::dwarf::DwarfError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    // Parse errors
    #[error("Parse failure at offset {position}: {message} (found {found})")]
    ParseFailure {
        position: usize,
        found: String,
        message: String,
    },

    #[error("Parser internal failure: {message}")]
    ParserInternalFailure { message: String },

    #[error("Unimplemented determinant form at offset {position}: sizeof accepts a type name only")]
    DetExprUnimplemented { position: usize },

    // Resolution errors
    #[error("{}", describe_unknown(.name, .parent.as_deref()))]
    UnknownIdentifier {
        name: String,
        parent: Option<String>,
    },

    #[error("Identifier \"{name}\" is defined more than once")]
    AmbiguousIdentifier { name: String },

    #[error("The type being dereferenced in `{expr}` is not pointer or array type: {type_name}")]
    DereferenceOfNonPointer { expr: String, type_name: String },

    #[error("Only a pointer or an array can be indexed in `{expr}`, got {type_name}")]
    IndexOfNonPointer { expr: String, type_name: String },

    #[error("Member `{member}` accessed on non-struct type {type_name} in `{expr}`")]
    NotStructOrUnion {
        expr: String,
        member: String,
        type_name: String,
    },

    #[error("Got a non-numeric type on evaluation of `{expr}`: {type_name}")]
    NonNumericOnEvaluation { expr: String, type_name: String },

    #[error("Got a non-numeric type on return: {type_name}")]
    NonNumericOnReturn { type_name: String },

    #[error("Type {type_name} has no known size")]
    IncompleteType { type_name: String },

    #[error("Cannot take the address of `{expr}`: it has no location")]
    AddressOfRvalue { expr: String },

    #[error("Cannot take the address of bitfield `{expr}`")]
    AddressOfBitField { expr: String },

    #[error("Integer overflow in `{expr}`")]
    ArithmeticOverflow { expr: String },

    // Database errors surfaced while resolving
    #[error(transparent)]
    Symbols(#[from] DwarfError),
}

fn describe_unknown(name: &str, parent: Option<&str>) -> String {
    match parent {
        Some(parent) => format!("{} does not have a child named {}", parent, name),
        None => format!("Variable \"{}\" does not exist.", name),
    }
}

impl EvalError {
    pub fn parse_failure(position: usize, found: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::ParseFailure {
            position,
            found: found.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        EvalError::ParserInternalFailure {
            message: message.into(),
        }
    }

    pub fn unknown_identifier(name: impl Into<String>) -> Self {
        EvalError::UnknownIdentifier {
            name: name.into(),
            parent: None,
        }
    }

    pub fn unknown_member(name: impl Into<String>, parent: impl Into<String>) -> Self {
        EvalError::UnknownIdentifier {
            name: name.into(),
            parent: Some(parent.into()),
        }
    }

    pub fn overflow(expr: impl ToString) -> Self {
        EvalError::ArithmeticOverflow {
            expr: expr.to_string(),
        }
    }

    /// Stable kind tag for clients that branch on the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::ParseFailure { .. } => "parse_failure",
            EvalError::ParserInternalFailure { .. } => "parser_internal_failure",
            EvalError::DetExprUnimplemented { .. } => "det_expr_unimplemented",
            EvalError::UnknownIdentifier { .. } => "unknown_identifier",
            EvalError::AmbiguousIdentifier { .. } => "ambiguous_identifier",
            EvalError::DereferenceOfNonPointer { .. } => "dereference_of_non_pointer",
            EvalError::IndexOfNonPointer { .. } => "index_of_non_pointer",
            EvalError::NotStructOrUnion { .. } => "not_struct_or_union",
            EvalError::NonNumericOnEvaluation { .. } => "non_numeric_on_evaluation",
            EvalError::NonNumericOnReturn { .. } => "non_numeric_on_return",
            EvalError::IncompleteType { .. } => "incomplete_type",
            EvalError::AddressOfRvalue { .. } => "address_of_rvalue",
            EvalError::AddressOfBitField { .. } => "address_of_bit_field",
            EvalError::ArithmeticOverflow { .. } => "arithmetic_overflow",
            EvalError::Symbols(e) => e.kind(),
        }
    }
}
