//! Reading `.debug_info` out of an object file with gimli

use std::borrow::Cow;
use std::fs;
use std::path::Path;

use gimli::{AttributeValue, EndianSlice, Operation, RunTimeEndian, Unit, UnitOffset};
use object::{Object, ObjectSection};
use tracing::{debug, info};

use super::info::{AttrValue, DebugEntry, DebugInfo, DebugInfoProvider, EntryRef, ExprOp};
use super::DwarfError;

type Reader<'a> = EndianSlice<'a, RunTimeEndian>;

/// Debug-info provider for ELF (and other `object`-readable) images
#[derive(Debug, Default, Clone, Copy)]
pub struct ElfProvider;

impl DebugInfoProvider for ElfProvider {
    fn read(&self, path: &Path) -> Result<DebugInfo, DwarfError> {
        let data = fs::read(path)
            .map_err(|e| DwarfError::data_access(format!("{}: {}", path.display(), e)))?;
        info!("Reading debug info from {} ({} bytes)", path.display(), data.len());
        read_debug_info(&data)
    }
}

/// Parse the DWARF sections of an in-memory object file
pub fn read_debug_info(data: &[u8]) -> Result<DebugInfo, DwarfError> {
    let file = object::File::parse(data)?;

    let endian = if file.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };

    let load_section = |id: gimli::SectionId| -> Result<Cow<[u8]>, gimli::Error> {
        Ok(file
            .section_by_name(id.name())
            .and_then(|s| s.data().ok())
            .map(Cow::Borrowed)
            .unwrap_or(Cow::Borrowed(&[])))
    };

    let dwarf_cow = gimli::Dwarf::load(load_section)?;
    let dwarf = dwarf_cow.borrow(|section| EndianSlice::new(section, endian));

    let mut info = DebugInfo::new(None);
    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        if info.address_size.is_none() {
            info.address_size = Some(header.address_size());
        }
        let unit = dwarf.unit(header)?;
        read_unit(&dwarf, &unit, &mut info)?;
    }

    debug!(
        "Read {} entries in {} units",
        info.len(),
        info.units.len()
    );
    Ok(info)
}

fn read_unit(
    dwarf: &gimli::Dwarf<Reader<'_>>,
    unit: &Unit<Reader<'_>>,
    info: &mut DebugInfo,
) -> Result<(), DwarfError> {
    let mut entries = unit.entries();
    let mut ancestors: Vec<EntryRef> = Vec::new();
    let mut depth: isize = 0;

    while let Some((delta, entry)) = entries.next_dfs()? {
        depth = (depth + delta).max(0);
        ancestors.truncate(depth as usize);

        let offset = global_offset(unit, entry.offset())?;
        let mut attrs = Vec::new();
        let mut iter = entry.attrs();
        while let Some(attr) = iter.next()? {
            let value = convert_value(dwarf, unit, attr.name(), attr.value())?;
            attrs.push((attr.name(), value));
        }

        info.insert(DebugEntry {
            offset,
            tag: entry.tag(),
            parent: ancestors.last().copied(),
            attrs,
            children: Vec::new(),
        });
        ancestors.push(offset);
    }
    Ok(())
}

fn global_offset(unit: &Unit<Reader<'_>>, offset: UnitOffset) -> Result<EntryRef, DwarfError> {
    offset
        .to_debug_info_offset(&unit.header)
        .map(|o| o.0 as EntryRef)
        .ok_or_else(|| DwarfError::data_access("entry outside .debug_info"))
}

fn convert_value(
    dwarf: &gimli::Dwarf<Reader<'_>>,
    unit: &Unit<Reader<'_>>,
    name: gimli::DwAt,
    value: AttributeValue<Reader<'_>>,
) -> Result<AttrValue, DwarfError> {
    Ok(match value {
        AttributeValue::Data1(v) => fixed_data(name, v as u64, 1),
        AttributeValue::Data2(v) => fixed_data(name, v as u64, 2),
        AttributeValue::Data4(v) => fixed_data(name, v as u64, 4),
        AttributeValue::Data8(v) => fixed_data(name, v, 8),
        AttributeValue::Udata(v) => AttrValue::Udata(v),
        AttributeValue::Sdata(v) => AttrValue::Sdata(v),
        AttributeValue::Flag(v) => AttrValue::Flag(v),
        AttributeValue::Encoding(e) => AttrValue::Encoding(e),
        AttributeValue::Addr(a) => AttrValue::Address(a),
        AttributeValue::DebugAddrIndex(index) => AttrValue::Address(dwarf.address(unit, index)?),
        AttributeValue::UnitRef(o) => AttrValue::Ref(global_offset(unit, o)?),
        AttributeValue::DebugInfoRef(o) => AttrValue::Ref(o.0 as EntryRef),
        AttributeValue::Exprloc(expr) => {
            let mut ops = expr.operations(unit.encoding());
            let mut out = Vec::new();
            while let Some(op) = ops.next()? {
                out.push(match op {
                    Operation::Address { address } => ExprOp::Address(address),
                    Operation::AddressIndex { index } => ExprOp::Address(dwarf.address(unit, index)?),
                    Operation::UnsignedConstant { value } => ExprOp::Constant(value),
                    Operation::SignedConstant { value } => ExprOp::Constant(value as u64),
                    Operation::PlusConstant { value } => ExprOp::PlusConstant(value),
                    _ => ExprOp::Other,
                });
            }
            AttrValue::Expr(out)
        }
        v @ (AttributeValue::String(_)
        | AttributeValue::DebugStrRef(_)
        | AttributeValue::DebugStrOffsetsIndex(_)
        | AttributeValue::DebugLineStrRef(_)) => {
            let s = dwarf.attr_string(unit, v)?;
            AttrValue::String(s.to_string_lossy().into_owned())
        }
        _ => AttrValue::Other,
    })
}

/// Fixed-size data forms are unsigned. A 4 or 8 byte all-ones bound is the
/// `-1` some compilers emit for flexible arrays.
fn fixed_data(name: gimli::DwAt, raw: u64, bytes: u32) -> AttrValue {
    let all_ones = u64::MAX >> (64 - bytes * 8);
    match name {
        gimli::DW_AT_upper_bound | gimli::DW_AT_count if bytes >= 4 && raw == all_ones => AttrValue::Sdata(-1),
        _ => AttrValue::Udata(raw),
    }
}
