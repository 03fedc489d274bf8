//! DWARF debug-info processing
//!
//! `ElfProvider` reads an image into the owned `DebugInfo` tree; `build_database`
//! walks that tree into a `TypeDatabase`.

mod elf;
mod info;
mod walker;

pub use elf::ElfProvider;
pub use info::{AttrValue, DebugEntry, DebugInfo, DebugInfoProvider, EntryRef, ExprOp};
pub use walker::{build_database, BuildOptions};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DwarfError {
    #[error("No symbol file loaded.")]
    NotLoaded,

    #[error("A debug-info API call has failed: {message}")]
    DataAccess { message: String },

    #[error("DWARF: Failed to get machine address size.")]
    AddressSizeUnavailable,

    #[error("DWARF: Referred DIE is not found (offset 0x{offset:x}).")]
    ReferencedEntryNotFound { offset: EntryRef },

    #[error("DWARF: Referred DIE has invalid TAG type {tag} (offset 0x{offset:x}).")]
    UnexpectedTag { offset: EntryRef, tag: String },

    #[error("DWARF: Referred DIE data format is corrupted (offset 0x{offset:x}): {reason}")]
    MalformedEntry { offset: EntryRef, reason: String },

    #[error("DWARF: Attribute {attribute} is not resolvable to a constant expression (offset 0x{offset:x}).")]
    NonConstantAttribute { offset: EntryRef, attribute: String },

    #[error("Symbol loading was aborted.")]
    Aborted,
}

impl DwarfError {
    pub fn data_access(message: impl ToString) -> Self {
        DwarfError::DataAccess {
            message: message.to_string(),
        }
    }

    pub fn malformed(offset: EntryRef, reason: impl Into<String>) -> Self {
        DwarfError::MalformedEntry {
            offset,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DwarfError::NotLoaded => "not_loaded",
            DwarfError::DataAccess { .. } => "data_access_failure",
            DwarfError::AddressSizeUnavailable => "address_size_unavailable",
            DwarfError::ReferencedEntryNotFound { .. } => "referenced_entry_not_found",
            DwarfError::UnexpectedTag { .. } => "unexpected_tag",
            DwarfError::MalformedEntry { .. } => "malformed_entry",
            DwarfError::NonConstantAttribute { .. } => "non_constant_attribute",
            DwarfError::Aborted => "aborted",
        }
    }
}

impl From<gimli::Error> for DwarfError {
    fn from(err: gimli::Error) -> Self {
        DwarfError::data_access(err)
    }
}

impl From<object::Error> for DwarfError {
    fn from(err: object::Error) -> Self {
        DwarfError::data_access(err)
    }
}
