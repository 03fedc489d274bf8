//! Type/symbol database
//!
//! A `TypeDatabase` is immutable once built. The DWARF walker (and tests)
//! assemble one through `DatabaseBuilder`; the `SymbolStore` publishes it
//! as a shared snapshot.

mod store;
mod types;

pub use store::{FailurePolicy, LoadState, SymbolStore};
pub use types::{
    BitField, Enumerator, Member, PrimitiveClass, Shape, TypeDescriptor, TypeId, TypeKind, TypeRef,
};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// How a symbol came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    Global,
    Static,
    Function,
}

/// A named, addressed, typed entity in the target image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    pub ty: TypeId,
    pub storage: StorageClass,
    /// Index into `TypeDatabase::sources`
    pub source: Option<usize>,
}

/// A compile unit that contributed symbols
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub directory: Option<String>,
    pub producer: Option<String>,
}

/// What to do when two definitions share a scoped name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    FirstWins,
    Reject,
}

/// One expandable child of a type, for tree views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeChild {
    pub name: String,
    pub offset: u64,
    pub ty: TypeRef,
    pub type_name: String,
    pub bit_field: Option<BitField>,
}

const MAX_NAME_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct TypeDatabase {
    address_size: u8,
    types: Vec<TypeDescriptor>,
    type_names: HashMap<String, TypeId>,
    symbols: HashMap<String, Symbol>,
    ambiguous: BTreeSet<String>,
    sources: Vec<SourceFile>,
}

impl TypeDatabase {
    pub fn builder(address_size: u8) -> DatabaseBuilder {
        DatabaseBuilder::new(address_size)
    }

    /// Pointer width of the target in bytes
    pub fn address_size(&self) -> u8 {
        self.address_size
    }

    pub fn unknown(&self) -> TypeId {
        TypeId(0)
    }

    pub fn descriptor(&self, id: TypeId) -> &TypeDescriptor {
        self.types.get(id.index()).unwrap_or(&self.types[0])
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn type_by_name(&self, name: &str) -> Option<TypeId> {
        self.type_names.get(name).copied()
    }

    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Whether `name` was defined more than once under `DuplicatePolicy::Reject`
    pub fn is_ambiguous(&self, name: &str) -> bool {
        self.ambiguous.contains(name)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn sources(&self) -> &[SourceFile] {
        &self.sources
    }

    /// Symbols defined in the compile unit named `source`, sorted by name
    pub fn variables_of(&self, source: &str) -> Vec<&Symbol> {
        let Some(index) = self.sources.iter().position(|s| s.name == source) else {
            return Vec::new();
        };
        let mut found: Vec<&Symbol> = self
            .symbols
            .values()
            .filter(|s| s.source == Some(index) && s.storage != StorageClass::Function)
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    pub fn shape(&self, ty: &TypeRef) -> Shape<'_> {
        match ty {
            TypeRef::Pointer(pointee) => Shape::Pointer((**pointee).clone()),
            TypeRef::Array(element, capacity) => Shape::Array {
                element: (**element).clone(),
                capacity: *capacity,
            },
            TypeRef::Id(id) => match &self.descriptor(*id).kind {
                TypeKind::Primitive(class) => Shape::Primitive(*class),
                TypeKind::Enum { class, .. } => Shape::Enum(*class),
                TypeKind::Pointer { pointee } => Shape::Pointer(TypeRef::Id(*pointee)),
                TypeKind::Array { element, capacity } => Shape::Array {
                    element: TypeRef::Id(*element),
                    capacity: *capacity,
                },
                TypeKind::Struct { members, .. } => Shape::Composite {
                    members,
                    union: false,
                },
                TypeKind::Union { members, .. } => Shape::Composite {
                    members,
                    union: true,
                },
                TypeKind::Function => Shape::Function,
                TypeKind::Unknown => Shape::Unknown,
            },
        }
    }

    /// Byte size, or `None` for incomplete types (`void`, `T[]`, forward declarations)
    pub fn size_of(&self, ty: &TypeRef) -> Option<u64> {
        self.size_of_depth(ty, 0)
    }

    fn size_of_depth(&self, ty: &TypeRef, depth: usize) -> Option<u64> {
        if depth > MAX_NAME_DEPTH {
            return None;
        }
        match ty {
            TypeRef::Pointer(_) => Some(self.address_size as u64),
            TypeRef::Array(element, capacity) => {
                let element = self.size_of_depth(element, depth + 1)?;
                element.checked_mul((*capacity)?)
            }
            TypeRef::Id(id) => {
                let desc = self.descriptor(*id);
                match &desc.kind {
                    TypeKind::Array { element, capacity } => {
                        let element = self.size_of_depth(&TypeRef::Id(*element), depth + 1)?;
                        element.checked_mul((*capacity)?)
                    }
                    TypeKind::Struct { complete, .. } | TypeKind::Union { complete, .. } => {
                        complete.then_some(desc.size)
                    }
                    TypeKind::Unknown => None,
                    _ => Some(desc.size),
                }
            }
        }
    }

    /// C-style display name: `Point`, `uint8_t*`, `int[4]`, `char[]`
    pub fn display_name(&self, ty: &TypeRef) -> String {
        self.display_depth(ty, 0)
    }

    pub fn display_id(&self, id: TypeId) -> String {
        self.display_depth(&TypeRef::Id(id), 0)
    }

    fn display_depth(&self, ty: &TypeRef, depth: usize) -> String {
        if depth > MAX_NAME_DEPTH {
            return "<recursive>".to_string();
        }
        let array = |element: String, capacity: &Option<u64>| match capacity {
            Some(n) => format!("{}[{}]", element, n),
            None => format!("{}[]", element),
        };
        match ty {
            TypeRef::Pointer(pointee) => format!("{}*", self.display_depth(pointee, depth + 1)),
            TypeRef::Array(element, capacity) => {
                array(self.display_depth(element, depth + 1), capacity)
            }
            TypeRef::Id(id) => {
                let desc = self.descriptor(*id);
                match &desc.kind {
                    TypeKind::Pointer { pointee } => {
                        format!("{}*", self.display_depth(&TypeRef::Id(*pointee), depth + 1))
                    }
                    TypeKind::Array { element, capacity } => {
                        array(self.display_depth(&TypeRef::Id(*element), depth + 1), capacity)
                    }
                    TypeKind::Unknown => desc.name.clone().unwrap_or_else(|| "<unknown>".to_string()),
                    TypeKind::Struct { .. } => desc
                        .name
                        .clone()
                        .unwrap_or_else(|| "<anonymous struct>".to_string()),
                    TypeKind::Union { .. } => desc
                        .name
                        .clone()
                        .unwrap_or_else(|| "<anonymous union>".to_string()),
                    TypeKind::Enum { .. } => desc
                        .name
                        .clone()
                        .unwrap_or_else(|| "<anonymous enum>".to_string()),
                    TypeKind::Function => desc.name.clone().unwrap_or_else(|| "<function>".to_string()),
                    TypeKind::Primitive(_) => desc.name.clone().unwrap_or_else(|| "<primitive>".to_string()),
                }
            }
        }
    }

    /// Members of a composite (looking through one pointer) or elements of a sized array
    pub fn children_of(&self, ty: &TypeRef) -> Vec<TypeChild> {
        let target = match self.shape(ty) {
            Shape::Pointer(pointee) => pointee,
            _ => ty.clone(),
        };
        match self.shape(&target) {
            Shape::Composite { members, .. } => members
                .iter()
                .map(|m| TypeChild {
                    name: m.name.clone(),
                    offset: m.offset,
                    ty: TypeRef::Id(m.ty),
                    type_name: self.display_id(m.ty),
                    bit_field: m.bit_field,
                })
                .collect(),
            Shape::Array {
                element,
                capacity: Some(capacity),
            } => {
                let step = self.size_of(&element).unwrap_or(0);
                let type_name = self.display_name(&element);
                (0..capacity)
                    .map(|i| TypeChild {
                        name: format!("[{}]", i),
                        offset: i * step,
                        ty: element.clone(),
                        type_name: type_name.clone(),
                        bit_field: None,
                    })
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Incremental construction of a `TypeDatabase`
#[derive(Debug)]
pub struct DatabaseBuilder {
    address_size: u8,
    types: Vec<TypeDescriptor>,
    type_names: HashMap<String, TypeId>,
    symbols: HashMap<String, Symbol>,
    ambiguous: BTreeSet<String>,
    sources: Vec<SourceFile>,
    duplicates: DuplicatePolicy,
    function_type: Option<TypeId>,
}

impl DatabaseBuilder {
    pub fn new(address_size: u8) -> Self {
        Self {
            address_size,
            types: vec![TypeDescriptor::unknown()],
            type_names: HashMap::new(),
            symbols: HashMap::new(),
            ambiguous: BTreeSet::new(),
            sources: Vec::new(),
            duplicates: DuplicatePolicy::default(),
            function_type: None,
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn address_size(&self) -> u8 {
        self.address_size
    }

    /// The shared unknown type
    pub fn unknown(&self) -> TypeId {
        TypeId(0)
    }

    /// Reserve a slot to be filled by `define`; reads as unknown until then
    pub fn reserve(&mut self) -> TypeId {
        self.add(TypeDescriptor::unknown())
    }

    pub fn define(&mut self, id: TypeId, descriptor: TypeDescriptor) {
        if id.index() == 0 {
            return;
        }
        if let Some(slot) = self.types.get_mut(id.index()) {
            *slot = descriptor;
        }
    }

    pub fn add(&mut self, descriptor: TypeDescriptor) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(descriptor);
        id
    }

    pub fn get(&self, id: TypeId) -> &TypeDescriptor {
        self.types.get(id.index()).unwrap_or(&self.types[0])
    }

    /// Add a primitive and register it under its name
    pub fn primitive(&mut self, name: &str, size: u64, class: PrimitiveClass) -> TypeId {
        let id = self.add(TypeDescriptor::primitive(name, size, class));
        self.name_type(name, id);
        id
    }

    pub fn pointer_to(&mut self, pointee: TypeId) -> TypeId {
        let size = self.address_size as u64;
        self.add(TypeDescriptor {
            name: None,
            size,
            kind: TypeKind::Pointer { pointee },
        })
    }

    pub fn array_of(&mut self, element: TypeId, capacity: Option<u64>) -> TypeId {
        let size = capacity
            .and_then(|n| n.checked_mul(self.get(element).size))
            .unwrap_or(0);
        self.add(TypeDescriptor {
            name: None,
            size,
            kind: TypeKind::Array { element, capacity },
        })
    }

    /// Add a complete struct (or union) and register it under `name`
    pub fn composite(&mut self, name: &str, size: u64, members: Vec<Member>, union: bool) -> TypeId {
        let kind = if union {
            TypeKind::Union {
                members,
                complete: true,
            }
        } else {
            TypeKind::Struct {
                members,
                complete: true,
            }
        };
        let id = self.add(TypeDescriptor {
            name: Some(name.to_string()),
            size,
            kind,
        });
        self.name_type(name, id);
        id
    }

    /// Shared opaque descriptor for code addresses
    pub fn function_type(&mut self) -> TypeId {
        if let Some(id) = self.function_type {
            return id;
        }
        let size = self.address_size as u64;
        let id = self.add(TypeDescriptor {
            name: None,
            size,
            kind: TypeKind::Function,
        });
        self.function_type = Some(id);
        id
    }

    /// Register a type name. The first definition wins, except that a
    /// complete composite replaces an incomplete one.
    pub fn name_type(&mut self, name: &str, id: TypeId) {
        match self.type_names.get(name) {
            None => {
                self.type_names.insert(name.to_string(), id);
            }
            Some(&existing) if existing != id && self.is_incomplete(existing) && !self.is_incomplete(id) => {
                self.type_names.insert(name.to_string(), id);
            }
            Some(_) => {}
        }
    }

    fn is_incomplete(&self, id: TypeId) -> bool {
        matches!(
            self.get(id).kind,
            TypeKind::Struct { complete: false, .. } | TypeKind::Union { complete: false, .. }
        )
    }

    /// Give an anonymous composite or enum the name of the typedef that introduces it
    pub fn adopt_name(&mut self, id: TypeId, name: &str) {
        if id.index() == 0 {
            return;
        }
        if let Some(desc) = self.types.get_mut(id.index()) {
            let nameable = desc.is_composite() || matches!(desc.kind, TypeKind::Enum { .. });
            if nameable && desc.name.is_none() {
                desc.name = Some(name.to_string());
            }
        }
    }

    pub fn add_source(&mut self, source: SourceFile) -> usize {
        self.sources.push(source);
        self.sources.len() - 1
    }

    pub fn add_symbol(&mut self, symbol: Symbol) {
        let Some(existing) = self.symbols.get(&symbol.name) else {
            self.symbols.insert(symbol.name.clone(), symbol);
            return;
        };

        if existing.address == symbol.address {
            return;
        }
        if existing.storage == StorageClass::Static && symbol.storage == StorageClass::Global {
            debug!("Global {} shadows a static of the same name", symbol.name);
            self.symbols.insert(symbol.name.clone(), symbol);
            return;
        }
        if existing.storage == StorageClass::Global && symbol.storage == StorageClass::Static {
            return;
        }

        match self.duplicates {
            DuplicatePolicy::FirstWins => {
                warn!(
                    "Duplicate symbol {} at 0x{:x}; keeping definition at 0x{:x}",
                    symbol.name, symbol.address, existing.address
                );
            }
            DuplicatePolicy::Reject => {
                warn!("Duplicate symbol {} marked ambiguous", symbol.name);
                self.ambiguous.insert(symbol.name);
            }
        }
    }

    /// Point forward declarations at the complete definition registered under
    /// the same name, typically from another compile unit
    fn complete_declarations(&mut self) {
        let mut completed = 0;
        for index in 1..self.types.len() {
            let id = TypeId(index as u32);
            if !self.is_incomplete(id) {
                continue;
            }
            let full = match self.types[index].name.as_ref().and_then(|n| self.type_names.get(n)) {
                Some(&full) if full != id && !self.is_incomplete(full) => full,
                _ => continue,
            };
            self.types[index] = self.types[full.index()].clone();
            completed += 1;
        }
        if completed > 0 {
            debug!("Completed {} forward declarations", completed);
        }
    }

    pub fn finish(mut self) -> TypeDatabase {
        self.complete_declarations();
        TypeDatabase {
            address_size: self.address_size,
            types: self.types,
            type_names: self.type_names,
            symbols: self.symbols,
            ambiguous: self.ambiguous,
            sources: self.sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, offset: u64, ty: TypeId) -> Member {
        Member {
            name: name.into(),
            offset,
            ty,
            bit_field: None,
        }
    }

    fn sample() -> TypeDatabase {
        let mut b = TypeDatabase::builder(4);
        let int = b.primitive("int", 4, PrimitiveClass::Signed);
        let chr = b.primitive("char", 1, PrimitiveClass::Signed);
        let point = b.composite(
            "Point",
            8,
            vec![member("x", 0, int), member("y", 4, int)],
            false,
        );
        let int_arr = b.array_of(int, Some(3));
        let chars = b.array_of(chr, None);
        let point_ptr = b.pointer_to(point);
        let src = b.add_source(SourceFile {
            name: "main.c".into(),
            directory: Some("/work".into()),
            producer: None,
        });
        for (name, address, ty) in [
            ("origin", 0x2000_0000, point),
            ("values", 0x2000_0010, int_arr),
            ("banner", 0x2000_0020, chars),
            ("cursor", 0x2000_0030, point_ptr),
        ] {
            b.add_symbol(Symbol {
                name: name.into(),
                address,
                ty,
                storage: StorageClass::Global,
                source: Some(src),
            });
        }
        b.finish()
    }

    #[test]
    fn test_sizes_and_names() {
        let db = sample();
        let values = db.symbol("values").unwrap().ty;
        assert_eq!(db.size_of(&values.into()), Some(12));
        assert_eq!(db.display_id(values), "int[3]");

        let banner = db.symbol("banner").unwrap().ty;
        assert_eq!(db.size_of(&banner.into()), None);
        assert_eq!(db.display_id(banner), "char[]");

        let cursor = db.symbol("cursor").unwrap().ty;
        assert_eq!(db.size_of(&cursor.into()), Some(4));
        assert_eq!(db.display_id(cursor), "Point*");

        let built = TypeRef::Id(db.type_by_name("Point").unwrap())
            .pointer_to()
            .pointer_to()
            .array_of(None);
        assert_eq!(db.display_name(&built), "Point**[]");
        assert_eq!(db.display_name(&TypeRef::Id(db.unknown())), "<unknown>");
    }

    #[test]
    fn test_children_of() {
        let db = sample();
        let cursor = db.symbol("cursor").unwrap().ty;
        let children = db.children_of(&cursor.into());
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].name, "y");
        assert_eq!(children[1].offset, 4);
        assert_eq!(children[1].type_name, "int");

        let values = db.symbol("values").unwrap().ty;
        let elements = db.children_of(&values.into());
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[2].name, "[2]");
        assert_eq!(elements[2].offset, 8);
    }

    #[test]
    fn test_variables_of_source() {
        let db = sample();
        let names: Vec<&str> = db.variables_of("main.c").iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["banner", "cursor", "origin", "values"]);
        assert!(db.variables_of("other.c").is_empty());
    }

    #[test]
    fn test_duplicate_policies() {
        let symbol = |address, storage| Symbol {
            name: "count".into(),
            address,
            ty: TypeId(0),
            storage,
            source: None,
        };

        let mut first = DatabaseBuilder::new(4);
        first.add_symbol(symbol(0x100, StorageClass::Static));
        first.add_symbol(symbol(0x200, StorageClass::Static));
        let db = first.finish();
        assert_eq!(db.symbol("count").unwrap().address, 0x100);
        assert!(!db.is_ambiguous("count"));

        let mut global = DatabaseBuilder::new(4);
        global.add_symbol(symbol(0x100, StorageClass::Static));
        global.add_symbol(symbol(0x200, StorageClass::Global));
        assert_eq!(global.finish().symbol("count").unwrap().address, 0x200);

        let mut reject = DatabaseBuilder::new(4).with_duplicate_policy(DuplicatePolicy::Reject);
        reject.add_symbol(symbol(0x100, StorageClass::Static));
        reject.add_symbol(symbol(0x200, StorageClass::Static));
        assert!(reject.finish().is_ambiguous("count"));
    }

    #[test]
    fn test_complete_definition_replaces_declaration() {
        let mut b = DatabaseBuilder::new(4);
        let decl = b.add(TypeDescriptor {
            name: Some("Opaque".into()),
            size: 0,
            kind: TypeKind::Struct {
                members: Vec::new(),
                complete: false,
            },
        });
        b.name_type("Opaque", decl);
        let full = b.composite("Opaque", 16, Vec::new(), false);
        let anonymous = b.add(TypeDescriptor {
            name: None,
            size: 0,
            kind: TypeKind::Union {
                members: Vec::new(),
                complete: false,
            },
        });
        let db = b.finish();
        assert_eq!(db.type_by_name("Opaque"), Some(full));
        assert_eq!(db.size_of(&full.into()), Some(16));
        assert_eq!(db.size_of(&decl.into()), Some(16));
        assert_eq!(db.size_of(&anonymous.into()), None);
    }
}
