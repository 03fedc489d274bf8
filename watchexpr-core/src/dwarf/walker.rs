//! Debug-info tree walk that materializes types and symbols

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use gimli::DwTag;
use tracing::{debug, info, warn};

use super::info::{AttrValue, DebugEntry, DebugInfo, EntryRef, ExprOp};
use super::DwarfError;
use crate::symbols::{
    BitField, DatabaseBuilder, DuplicatePolicy, Enumerator, Member, PrimitiveClass, SourceFile,
    StorageClass, Symbol, TypeDatabase, TypeDescriptor, TypeId, TypeKind,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    pub duplicates: DuplicatePolicy,
}

/// Build a database from a debug-info tree.
///
/// `abort` is polled between compile units; once set the build stops with
/// `DwarfError::Aborted`.
pub fn build_database(
    info: &DebugInfo,
    options: &BuildOptions,
    abort: Option<&AtomicBool>,
) -> Result<TypeDatabase, DwarfError> {
    let address_size = match info.address_size {
        Some(size @ 1..=8) => size,
        _ => return Err(DwarfError::AddressSizeUnavailable),
    };

    let mut walker = Walker {
        info,
        db: DatabaseBuilder::new(address_size).with_duplicate_policy(options.duplicates),
        resolved: HashMap::new(),
        in_progress: HashSet::new(),
        unit: None,
        source: None,
        skipped: 0,
    };

    for &unit in &info.units {
        if abort.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            info!("Debug info walk aborted");
            return Err(DwarfError::Aborted);
        }
        walker.walk_unit(unit)?;
    }

    let skipped = walker.skipped;
    let db = walker.db.finish();
    info!(
        "Loaded {} types and {} symbols from {} units ({} variables without static storage)",
        db.type_count(),
        db.symbol_count(),
        info.units.len(),
        skipped
    );
    Ok(db)
}

struct Walker<'a> {
    info: &'a DebugInfo,
    db: DatabaseBuilder,
    resolved: HashMap<EntryRef, TypeId>,
    in_progress: HashSet<EntryRef>,
    /// Current compile unit, registered as a source on its first symbol
    unit: Option<SourceFile>,
    source: Option<usize>,
    skipped: usize,
}

impl<'a> Walker<'a> {
    fn entry(&self, offset: EntryRef) -> Result<&'a DebugEntry, DwarfError> {
        self.info
            .entry(offset)
            .ok_or(DwarfError::ReferencedEntryNotFound { offset })
    }

    fn walk_unit(&mut self, root: EntryRef) -> Result<(), DwarfError> {
        let entry = self.entry(root)?;
        let name = entry.name()?.unwrap_or("<unnamed unit>").to_string();
        debug!("Walking unit {} at 0x{:x}", name, root);

        self.unit = Some(SourceFile {
            name,
            directory: entry.string(gimli::DW_AT_comp_dir)?.map(str::to_string),
            producer: entry.string(gimli::DW_AT_producer)?.map(str::to_string),
        });
        self.source = None;
        self.walk_children(entry)
    }

    fn walk_children(&mut self, entry: &'a DebugEntry) -> Result<(), DwarfError> {
        for &child in &entry.children {
            self.walk(child)?;
        }
        Ok(())
    }

    fn walk(&mut self, offset: EntryRef) -> Result<(), DwarfError> {
        let entry = self.entry(offset)?;
        match entry.tag {
            gimli::DW_TAG_variable => self.add_variable(entry),
            gimli::DW_TAG_subprogram => {
                self.add_function(entry)?;
                self.walk_children(entry)
            }
            gimli::DW_TAG_namespace | gimli::DW_TAG_lexical_block => self.walk_children(entry),
            gimli::DW_TAG_structure_type | gimli::DW_TAG_class_type | gimli::DW_TAG_union_type => {
                self.resolve_type(offset)?;
                self.walk_children(entry)
            }
            tag if is_type_tag(tag) => self.resolve_type(offset).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn source_index(&mut self) -> Option<usize> {
        if self.source.is_none() {
            if let Some(unit) = self.unit.take() {
                self.source = Some(self.db.add_source(unit));
            }
        }
        self.source
    }

    fn add_variable(&mut self, entry: &'a DebugEntry) -> Result<(), DwarfError> {
        let address = match entry.attr(gimli::DW_AT_location) {
            Some(AttrValue::Expr(ops)) => match eval_ops(ops, None) {
                Some(address) => address,
                None => {
                    self.skipped += 1;
                    return Ok(());
                }
            },
            // Declarations and location lists have no fixed address
            _ => return Ok(()),
        };

        let origin = match entry.reference(gimli::DW_AT_specification)? {
            Some(r) => Some(self.entry(r)?),
            None => match entry.reference(gimli::DW_AT_abstract_origin)? {
                Some(r) => Some(self.entry(r)?),
                None => None,
            },
        };

        let name = match (entry.name()?, origin) {
            (Some(name), _) => name,
            (None, Some(origin)) => match origin.name()? {
                Some(name) => name,
                None => return Ok(()),
            },
            (None, None) => return Ok(()),
        };

        let type_ref = match entry.reference(gimli::DW_AT_type)? {
            Some(r) => r,
            None => origin
                .map(|o| o.reference(gimli::DW_AT_type))
                .transpose()?
                .flatten()
                .ok_or_else(|| DwarfError::malformed(entry.offset, "variable without type"))?,
        };
        let ty = self.resolve_type(type_ref)?;

        let scoped = self.scoped_name(origin.unwrap_or(entry), name, true)?;
        let external = entry.flag(gimli::DW_AT_external)
            || origin.is_some_and(|o| o.flag(gimli::DW_AT_external));
        let source = self.source_index();
        self.db.add_symbol(Symbol {
            name: scoped,
            address,
            ty,
            storage: if external {
                StorageClass::Global
            } else {
                StorageClass::Static
            },
            source,
        });
        Ok(())
    }

    fn add_function(&mut self, entry: &'a DebugEntry) -> Result<(), DwarfError> {
        let Some(AttrValue::Address(low_pc)) = entry.attr(gimli::DW_AT_low_pc) else {
            return Ok(());
        };
        let origin = match entry.reference(gimli::DW_AT_specification)? {
            Some(r) => self.entry(r)?,
            None => entry,
        };
        let Some(name) = entry.name()?.or(origin.name()?) else {
            return Ok(());
        };
        let scoped = self.scoped_name(origin, name, false)?;
        let ty = self.db.function_type();
        let source = self.source_index();
        self.db.add_symbol(Symbol {
            name: scoped,
            address: *low_pc,
            ty,
            storage: StorageClass::Function,
            source,
        });
        Ok(())
    }

    /// `ns::Outer::name`; functions count as scopes for their static locals
    fn scoped_name(&self, entry: &DebugEntry, name: &str, functions: bool) -> Result<String, DwarfError> {
        let mut parts = vec![name.to_string()];
        let mut parent = entry.parent;
        while let Some(offset) = parent {
            let scope = self.entry(offset)?;
            match scope.tag {
                gimli::DW_TAG_namespace
                | gimli::DW_TAG_structure_type
                | gimli::DW_TAG_class_type
                | gimli::DW_TAG_union_type => {
                    if let Some(n) = scope.name()? {
                        parts.push(n.to_string());
                    }
                }
                gimli::DW_TAG_subprogram if functions => {
                    if let Some(n) = scope.name()? {
                        parts.push(n.to_string());
                    }
                }
                gimli::DW_TAG_compile_unit | gimli::DW_TAG_partial_unit => break,
                _ => {}
            }
            parent = scope.parent;
        }
        parts.reverse();
        Ok(parts.join("::"))
    }

    fn resolve_type(&mut self, offset: EntryRef) -> Result<TypeId, DwarfError> {
        if let Some(&id) = self.resolved.get(&offset) {
            return Ok(id);
        }
        let entry = self.entry(offset)?;
        if !self.in_progress.insert(offset) {
            return Err(DwarfError::malformed(offset, "type reference cycle"));
        }
        let result = self.materialize(entry);
        self.in_progress.remove(&offset);
        let id = result?;
        self.resolved.insert(offset, id);
        Ok(id)
    }

    fn materialize(&mut self, entry: &'a DebugEntry) -> Result<TypeId, DwarfError> {
        match entry.tag {
            gimli::DW_TAG_base_type => self.base_type(entry),
            gimli::DW_TAG_pointer_type
            | gimli::DW_TAG_reference_type
            | gimli::DW_TAG_rvalue_reference_type => self.pointer(entry),
            gimli::DW_TAG_typedef => self.typedef(entry),
            gimli::DW_TAG_const_type
            | gimli::DW_TAG_volatile_type
            | gimli::DW_TAG_restrict_type
            | gimli::DW_TAG_atomic_type
            | gimli::DW_TAG_immutable_type
            | gimli::DW_TAG_packed_type
            | gimli::DW_TAG_shared_type => self.target_or_void(entry),
            gimli::DW_TAG_array_type => self.array(entry),
            gimli::DW_TAG_structure_type | gimli::DW_TAG_class_type | gimli::DW_TAG_union_type => {
                self.composite(entry)
            }
            gimli::DW_TAG_enumeration_type => self.enumeration(entry),
            gimli::DW_TAG_subroutine_type => Ok(self.db.function_type()),
            gimli::DW_TAG_unspecified_type => Ok(self.db.unknown()),
            gimli::DW_TAG_string_type
            | gimli::DW_TAG_ptr_to_member_type
            | gimli::DW_TAG_set_type
            | gimli::DW_TAG_file_type
            | gimli::DW_TAG_subrange_type => {
                debug!("Unsupported type {} at 0x{:x}", entry.tag, entry.offset);
                Ok(self.db.unknown())
            }
            tag => Err(DwarfError::UnexpectedTag {
                offset: entry.offset,
                tag: tag.to_string(),
            }),
        }
    }

    fn target_or_void(&mut self, entry: &DebugEntry) -> Result<TypeId, DwarfError> {
        match entry.reference(gimli::DW_AT_type)? {
            Some(target) => self.resolve_type(target),
            None => Ok(self.db.unknown()),
        }
    }

    fn base_type(&mut self, entry: &DebugEntry) -> Result<TypeId, DwarfError> {
        let size = entry
            .unsigned(gimli::DW_AT_byte_size)?
            .ok_or_else(|| DwarfError::malformed(entry.offset, "base type without byte size"))?;
        let encoding = match entry.attr(gimli::DW_AT_encoding) {
            Some(AttrValue::Encoding(e)) => *e,
            Some(AttrValue::Udata(v)) => gimli::DwAte(*v as u8),
            _ => return Err(DwarfError::malformed(entry.offset, "base type without encoding")),
        };
        let name = entry.name()?.unwrap_or("<unnamed>");

        let integral = matches!(size, 1 | 2 | 4 | 8);
        let class = match encoding {
            gimli::DW_ATE_float if size == 4 || size == 8 => Some(PrimitiveClass::Float),
            gimli::DW_ATE_signed | gimli::DW_ATE_signed_char if integral => Some(PrimitiveClass::Signed),
            gimli::DW_ATE_unsigned | gimli::DW_ATE_unsigned_char | gimli::DW_ATE_UTF if integral => {
                Some(PrimitiveClass::Unsigned)
            }
            gimli::DW_ATE_boolean if integral => Some(PrimitiveClass::Bool),
            _ => None,
        };

        match class {
            Some(class) => {
                let id = self.db.add(TypeDescriptor::primitive(name, size, class));
                self.db.name_type(name, id);
                Ok(id)
            }
            None => {
                warn!("Unsupported base type {} ({} bytes, {})", name, size, encoding);
                Ok(self.db.unknown())
            }
        }
    }

    fn pointer(&mut self, entry: &DebugEntry) -> Result<TypeId, DwarfError> {
        let id = self.db.reserve();
        self.resolved.insert(entry.offset, id);
        let pointee = self.target_or_void(entry)?;
        let size = entry
            .unsigned(gimli::DW_AT_byte_size)?
            .unwrap_or(self.db.address_size() as u64);
        self.db.define(
            id,
            TypeDescriptor {
                name: None,
                size,
                kind: TypeKind::Pointer { pointee },
            },
        );
        Ok(id)
    }

    fn typedef(&mut self, entry: &DebugEntry) -> Result<TypeId, DwarfError> {
        let target = self.target_or_void(entry)?;
        if let Some(name) = entry.name()? {
            let scoped = self.scoped_name(entry, name, false)?;
            self.db.adopt_name(target, &scoped);
            self.db.name_type(&scoped, target);
        }
        Ok(target)
    }

    fn array(&mut self, entry: &DebugEntry) -> Result<TypeId, DwarfError> {
        let element = entry
            .reference(gimli::DW_AT_type)?
            .ok_or_else(|| DwarfError::malformed(entry.offset, "array without element type"))?;
        let element = self.resolve_type(element)?;

        let mut dimensions = Vec::new();
        for &child in &entry.children {
            let sub = self.entry(child)?;
            if matches!(sub.tag, gimli::DW_TAG_subrange_type | gimli::DW_TAG_enumeration_type) {
                dimensions.push(subrange_capacity(sub)?);
            }
        }
        if dimensions.is_empty() {
            dimensions.push(None);
        }

        // `int a[2][3]` lists [2] then [3]; the innermost dimension wraps the element
        let mut ty = element;
        for capacity in dimensions.into_iter().rev() {
            ty = self.db.array_of(ty, capacity);
        }
        Ok(ty)
    }

    fn composite(&mut self, entry: &'a DebugEntry) -> Result<TypeId, DwarfError> {
        let union = entry.tag == gimli::DW_TAG_union_type;
        let id = self.db.reserve();
        self.resolved.insert(entry.offset, id);

        let name = match entry.name()? {
            Some(n) => Some(self.scoped_name(entry, n, false)?),
            None => None,
        };

        let (size, members, complete) = if entry.flag(gimli::DW_AT_declaration) {
            (0, Vec::new(), false)
        } else {
            let size = entry
                .unsigned(gimli::DW_AT_byte_size)?
                .ok_or_else(|| DwarfError::malformed(entry.offset, "structure without byte size"))?;
            let mut members = Vec::new();
            self.collect_members(entry, union, 0, &mut members)?;
            members.sort_by_key(|m| (m.offset, m.bit_field.map_or(0, |b| b.bit_offset)));
            (size, members, true)
        };

        let kind = if union {
            TypeKind::Union { members, complete }
        } else {
            TypeKind::Struct { members, complete }
        };
        self.db.define(
            id,
            TypeDescriptor {
                name: name.clone(),
                size,
                kind,
            },
        );
        if let Some(name) = name {
            self.db.name_type(&name, id);
        }
        Ok(id)
    }

    fn collect_members(
        &mut self,
        entry: &'a DebugEntry,
        union: bool,
        base: u64,
        out: &mut Vec<Member>,
    ) -> Result<(), DwarfError> {
        for &child in &entry.children {
            let child = self.entry(child)?;
            match child.tag {
                gimli::DW_TAG_member => self.add_member(child, union, base, out)?,
                gimli::DW_TAG_inheritance => {
                    if child.has(gimli::DW_AT_virtuality) {
                        warn!("Skipping virtual base class at 0x{:x}", child.offset);
                        continue;
                    }
                    let target = child
                        .reference(gimli::DW_AT_type)?
                        .ok_or_else(|| DwarfError::malformed(child.offset, "inheritance without type"))?;
                    let parent = self.resolve_type(target)?;
                    let (offset, _) = self.member_location(child, false, parent, None)?;
                    if let Some(inherited) = self.db.get(parent).members() {
                        for m in inherited {
                            out.push(Member {
                                offset: base + offset + m.offset,
                                ..m.clone()
                            });
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn add_member(
        &mut self,
        child: &DebugEntry,
        union: bool,
        base: u64,
        out: &mut Vec<Member>,
    ) -> Result<(), DwarfError> {
        // Static data members are declarations; their definitions are variables
        if child.flag(gimli::DW_AT_declaration) || child.flag(gimli::DW_AT_external) {
            return Ok(());
        }
        let target = child
            .reference(gimli::DW_AT_type)?
            .ok_or_else(|| DwarfError::malformed(child.offset, "member without type"))?;
        let ty = self.resolve_type(target)?;
        let bit_size = child.unsigned(gimli::DW_AT_bit_size)?;
        let (offset, bit_field) = self.member_location(child, union, ty, bit_size)?;

        match child.name()? {
            Some(name) => out.push(Member {
                name: name.to_string(),
                offset: base + offset,
                ty,
                bit_field,
            }),
            None => {
                // Anonymous struct/union: its members belong to the parent
                if let Some(nested) = self.db.get(ty).members() {
                    for m in nested {
                        out.push(Member {
                            offset: base + offset + m.offset,
                            ..m.clone()
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn member_location(
        &self,
        child: &DebugEntry,
        union: bool,
        ty: TypeId,
        bit_size: Option<u64>,
    ) -> Result<(u64, Option<BitField>), DwarfError> {
        let non_constant = || DwarfError::NonConstantAttribute {
            offset: child.offset,
            attribute: gimli::DW_AT_data_member_location.to_string(),
        };
        let byte_offset = match child.attr(gimli::DW_AT_data_member_location) {
            None => None,
            Some(AttrValue::Udata(v)) => Some(*v),
            Some(AttrValue::Sdata(v)) if *v >= 0 => Some(*v as u64),
            Some(AttrValue::Expr(ops)) => Some(eval_ops(ops, Some(0)).ok_or_else(non_constant)?),
            Some(_) => return Err(non_constant()),
        };

        let Some(bit_size) = bit_size else {
            return match byte_offset {
                Some(offset) => Ok((offset, None)),
                None if union => Ok((0, None)),
                None => Err(DwarfError::malformed(child.offset, "member without location")),
            };
        };

        if let Some(data_bit_offset) = child.unsigned(gimli::DW_AT_data_bit_offset)? {
            let unit = self.db.get(ty).size.max(1);
            let bit = byte_offset.unwrap_or(0) * 8 + data_bit_offset;
            let storage = bit / (unit * 8) * unit;
            return Ok((
                storage,
                Some(BitField {
                    bit_offset: (bit - storage * 8) as u32,
                    bit_size: bit_size as u32,
                }),
            ));
        }

        let byte_offset = match byte_offset {
            Some(offset) => offset,
            None if union => 0,
            None => return Err(DwarfError::malformed(child.offset, "bitfield without location")),
        };
        let lsb = match child.unsigned(gimli::DW_AT_bit_offset)? {
            // DWARF 2 counts from the most significant bit of the storage unit
            Some(msb_offset) => {
                let storage = child
                    .unsigned(gimli::DW_AT_byte_size)?
                    .unwrap_or(self.db.get(ty).size);
                (storage * 8)
                    .checked_sub(msb_offset + bit_size)
                    .ok_or_else(|| DwarfError::malformed(child.offset, "bit offset outside storage unit"))?
            }
            None => 0,
        };
        Ok((
            byte_offset,
            Some(BitField {
                bit_offset: lsb as u32,
                bit_size: bit_size as u32,
            }),
        ))
    }

    fn enumeration(&mut self, entry: &DebugEntry) -> Result<TypeId, DwarfError> {
        let underlying = match entry.reference(gimli::DW_AT_type)? {
            Some(target) => Some(self.resolve_type(target)?),
            None => None,
        };
        let size = match (entry.unsigned(gimli::DW_AT_byte_size)?, underlying) {
            (Some(size), _) => size,
            (None, Some(u)) => self.db.get(u).size,
            (None, None) => return Err(DwarfError::malformed(entry.offset, "enumeration without byte size")),
        };

        let mut enumerators = Vec::new();
        for &child in &entry.children {
            let child = self.entry(child)?;
            if child.tag != gimli::DW_TAG_enumerator {
                continue;
            }
            if let Some(name) = child.name()? {
                enumerators.push(Enumerator {
                    name: name.to_string(),
                    value: child.constant(gimli::DW_AT_const_value)?.unwrap_or(0),
                });
            }
        }

        let class = match underlying.map(|u| &self.db.get(u).kind) {
            Some(TypeKind::Primitive(class)) => *class,
            _ if enumerators.iter().any(|e| e.value < 0) => PrimitiveClass::Signed,
            _ => PrimitiveClass::Unsigned,
        };
        let name = match entry.name()? {
            Some(n) => Some(self.scoped_name(entry, n, false)?),
            None => None,
        };
        let id = self.db.add(TypeDescriptor {
            name: name.clone(),
            size,
            kind: TypeKind::Enum { class, enumerators },
        });
        if let Some(name) = name {
            self.db.name_type(&name, id);
        }
        Ok(id)
    }
}

fn is_type_tag(tag: DwTag) -> bool {
    matches!(
        tag,
        gimli::DW_TAG_base_type
            | gimli::DW_TAG_pointer_type
            | gimli::DW_TAG_reference_type
            | gimli::DW_TAG_rvalue_reference_type
            | gimli::DW_TAG_typedef
            | gimli::DW_TAG_const_type
            | gimli::DW_TAG_volatile_type
            | gimli::DW_TAG_restrict_type
            | gimli::DW_TAG_atomic_type
            | gimli::DW_TAG_array_type
            | gimli::DW_TAG_enumeration_type
            | gimli::DW_TAG_subroutine_type
    )
}

/// Element count of one array dimension; `None` for flexible or unbounded arrays
fn subrange_capacity(sub: &DebugEntry) -> Result<Option<u64>, DwarfError> {
    if let Some(count) = sub.constant(gimli::DW_AT_count)? {
        return Ok((count > 0).then_some(count as u64));
    }
    let lower = sub.constant(gimli::DW_AT_lower_bound)?.unwrap_or(0);
    match sub.constant(gimli::DW_AT_upper_bound)? {
        // Flexible array members come out as 0 or -1 depending on the compiler
        Some(upper) if upper >= 1 && upper >= lower => Ok(Some((upper - lower + 1) as u64)),
        _ => Ok(None),
    }
}

/// Evaluate a location expression made only of constants and `plus_uconst`
fn eval_ops(ops: &[ExprOp], initial: Option<u64>) -> Option<u64> {
    let mut stack: Vec<u64> = initial.into_iter().collect();
    for op in ops {
        match op {
            ExprOp::Address(v) | ExprOp::Constant(v) => stack.push(*v),
            ExprOp::PlusConstant(n) => {
                let top = stack.pop()?;
                stack.push(top.wrapping_add(*n));
            }
            ExprOp::Other => return None,
        }
    }
    stack.pop()
}
