//! Owned debug-info entry tree
//!
//! A format-neutral copy of the `.debug_info` tree. Tags and attribute names
//! reuse gimli's constants; references are global `.debug_info` offsets so
//! that cross-unit references resolve like local ones.

use std::collections::HashMap;
use std::path::Path;

use gimli::{DwAt, DwAte, DwTag};

use super::DwarfError;

/// Global offset of an entry in `.debug_info`
pub type EntryRef = u64;

/// One operation of a location or constant expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprOp {
    /// `DW_OP_addr` / `DW_OP_addrx`
    Address(u64),
    /// `DW_OP_constu` and friends
    Constant(u64),
    /// `DW_OP_plus_uconst`
    PlusConstant(u64),
    /// Anything that needs registers, frames or memory
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Udata(u64),
    Sdata(i64),
    Flag(bool),
    String(String),
    Address(u64),
    Ref(EntryRef),
    Encoding(DwAte),
    Expr(Vec<ExprOp>),
    /// Location lists, block forms and other values the walker does not read
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEntry {
    pub offset: EntryRef,
    pub tag: DwTag,
    pub parent: Option<EntryRef>,
    pub attrs: Vec<(DwAt, AttrValue)>,
    pub children: Vec<EntryRef>,
}

impl DebugEntry {
    pub fn attr(&self, name: DwAt) -> Option<&AttrValue> {
        self.attrs
            .iter()
            .find(|(at, _)| *at == name)
            .map(|(_, value)| value)
    }

    pub fn has(&self, name: DwAt) -> bool {
        self.attr(name).is_some()
    }

    pub fn name(&self) -> Result<Option<&str>, DwarfError> {
        self.string(gimli::DW_AT_name)
    }

    pub fn string(&self, name: DwAt) -> Result<Option<&str>, DwarfError> {
        match self.attr(name) {
            None => Ok(None),
            Some(AttrValue::String(s)) => Ok(Some(s)),
            Some(_) => Err(DwarfError::malformed(
                self.offset,
                format!("{} is not a string", name),
            )),
        }
    }

    pub fn flag(&self, name: DwAt) -> bool {
        match self.attr(name) {
            Some(AttrValue::Flag(v)) => *v,
            Some(AttrValue::Udata(v)) => *v != 0,
            _ => false,
        }
    }

    pub fn reference(&self, name: DwAt) -> Result<Option<EntryRef>, DwarfError> {
        match self.attr(name) {
            None => Ok(None),
            Some(AttrValue::Ref(r)) => Ok(Some(*r)),
            Some(_) => Err(DwarfError::malformed(
                self.offset,
                format!("{} is not a reference", name),
            )),
        }
    }

    /// Integer constant attribute; expressions and references are not constants here
    pub fn constant(&self, name: DwAt) -> Result<Option<i64>, DwarfError> {
        match self.attr(name) {
            None => Ok(None),
            Some(AttrValue::Udata(v)) => Ok(Some(*v as i64)),
            Some(AttrValue::Sdata(v)) => Ok(Some(*v)),
            Some(_) => Err(DwarfError::NonConstantAttribute {
                offset: self.offset,
                attribute: name.to_string(),
            }),
        }
    }

    pub fn unsigned(&self, name: DwAt) -> Result<Option<u64>, DwarfError> {
        match self.constant(name)? {
            Some(v) if v < 0 => Err(DwarfError::malformed(
                self.offset,
                format!("{} is negative", name),
            )),
            other => Ok(other.map(|v| v as u64)),
        }
    }
}

/// A whole image's debug info
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub address_size: Option<u8>,
    /// Compile unit root entries, in section order
    pub units: Vec<EntryRef>,
    entries: HashMap<EntryRef, DebugEntry>,
    next_offset: EntryRef,
}

impl DebugInfo {
    pub fn new(address_size: Option<u8>) -> Self {
        Self {
            address_size,
            ..Default::default()
        }
    }

    pub fn entry(&self, offset: EntryRef) -> Option<&DebugEntry> {
        self.entries.get(&offset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry read from a real section; links it under its parent
    pub fn insert(&mut self, entry: DebugEntry) {
        match entry.parent {
            Some(parent) => {
                if let Some(p) = self.entries.get_mut(&parent) {
                    p.children.push(entry.offset);
                }
            }
            None => self.units.push(entry.offset),
        }
        self.next_offset = self.next_offset.max(entry.offset + 1);
        self.entries.insert(entry.offset, entry);
    }

    /// Append a synthetic entry at the next free offset
    pub fn push(&mut self, parent: Option<EntryRef>, tag: DwTag, attrs: Vec<(DwAt, AttrValue)>) -> EntryRef {
        let offset = self.next_offset;
        self.insert(DebugEntry {
            offset,
            tag,
            parent,
            attrs,
            children: Vec::new(),
        });
        offset
    }
}

/// Source of debug info for a symbol file
pub trait DebugInfoProvider: Send + Sync {
    fn read(&self, path: &Path) -> Result<DebugInfo, DwarfError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_links_children() {
        let mut info = DebugInfo::new(Some(4));
        let cu = info.push(None, gimli::DW_TAG_compile_unit, vec![]);
        let var = info.push(
            Some(cu),
            gimli::DW_TAG_variable,
            vec![(gimli::DW_AT_name, AttrValue::String("x".into()))],
        );
        assert_eq!(info.units, vec![cu]);
        assert_eq!(info.entry(cu).unwrap().children, vec![var]);
        assert_eq!(info.entry(var).unwrap().name().unwrap(), Some("x"));
    }

    #[test]
    fn test_attribute_accessors() {
        let mut info = DebugInfo::new(Some(4));
        let e = info.push(
            None,
            gimli::DW_TAG_member,
            vec![
                (gimli::DW_AT_name, AttrValue::Udata(3)),
                (gimli::DW_AT_upper_bound, AttrValue::Ref(7)),
                (gimli::DW_AT_byte_size, AttrValue::Sdata(-1)),
            ],
        );
        let entry = info.entry(e).unwrap();
        assert!(matches!(entry.name(), Err(DwarfError::MalformedEntry { .. })));
        assert!(matches!(
            entry.constant(gimli::DW_AT_upper_bound),
            Err(DwarfError::NonConstantAttribute { .. })
        ));
        assert!(matches!(
            entry.unsigned(gimli::DW_AT_byte_size),
            Err(DwarfError::MalformedEntry { .. })
        ));
        assert_eq!(entry.constant(gimli::DW_AT_count).unwrap(), None);
    }
}
