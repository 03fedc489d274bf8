//! Type descriptors
//!
//! Descriptors live in an arena owned by the database and refer to each other
//! through `TypeId`, so self-referential types (`struct Node { Node *next; }`)
//! are plain indices. `TypeRef` composes arena types with pointer/array
//! layers built on the fly by casts and `&`.

use serde::{Deserialize, Serialize};

/// Index into the type arena of one database snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Scalar category of a primitive or enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveClass {
    Signed,
    Unsigned,
    Float,
    Bool,
}

/// Bit placement of a bitfield member inside its storage unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitField {
    /// Bits above the member's byte offset, counting from the least significant bit
    pub bit_offset: u32,
    pub bit_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub offset: u64,
    pub ty: TypeId,
    pub bit_field: Option<BitField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enumerator {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeKind {
    Primitive(PrimitiveClass),
    Pointer {
        pointee: TypeId,
    },
    Array {
        element: TypeId,
        capacity: Option<u64>,
    },
    Struct {
        members: Vec<Member>,
        complete: bool,
    },
    Union {
        members: Vec<Member>,
        complete: bool,
    },
    /// Opaque code address; only its size matters
    Function,
    Enum {
        class: PrimitiveClass,
        enumerators: Vec<Enumerator>,
    },
    /// Unresolved, unsupported or corrupt type
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Fully scoped name; pointer and array names are derived
    pub name: Option<String>,
    pub size: u64,
    pub kind: TypeKind,
}

impl TypeDescriptor {
    pub fn unknown() -> Self {
        Self {
            name: None,
            size: 0,
            kind: TypeKind::Unknown,
        }
    }

    pub fn primitive(name: impl Into<String>, size: u64, class: PrimitiveClass) -> Self {
        Self {
            name: Some(name.into()),
            size,
            kind: TypeKind::Primitive(class),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.kind, TypeKind::Struct { .. } | TypeKind::Union { .. })
    }

    pub fn members(&self) -> Option<&[Member]> {
        match &self.kind {
            TypeKind::Struct { members, .. } | TypeKind::Union { members, .. } => Some(members),
            _ => None,
        }
    }
}

/// A type as seen by the resolver: an arena type, or a pointer/array layer over one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeRef {
    Id(TypeId),
    Pointer(Box<TypeRef>),
    Array(Box<TypeRef>, Option<u64>),
}

impl TypeRef {
    pub fn pointer_to(self) -> TypeRef {
        TypeRef::Pointer(Box::new(self))
    }

    pub fn array_of(self, capacity: Option<u64>) -> TypeRef {
        TypeRef::Array(Box::new(self), capacity)
    }
}

impl From<TypeId> for TypeRef {
    fn from(id: TypeId) -> Self {
        TypeRef::Id(id)
    }
}

/// Structural view of a `TypeRef`, one level deep
#[derive(Debug, Clone, PartialEq)]
pub enum Shape<'a> {
    Primitive(PrimitiveClass),
    Enum(PrimitiveClass),
    Pointer(TypeRef),
    Array {
        element: TypeRef,
        capacity: Option<u64>,
    },
    Composite {
        members: &'a [Member],
        union: bool,
    },
    Function,
    Unknown,
}

impl Shape<'_> {
    /// Integer-like values usable in offset arithmetic
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Shape::Primitive(PrimitiveClass::Signed | PrimitiveClass::Unsigned | PrimitiveClass::Bool)
                | Shape::Enum(_)
        )
    }

    /// Values a plotter can decode as a number
    pub fn is_numeric(&self) -> bool {
        matches!(self, Shape::Primitive(_) | Shape::Enum(_) | Shape::Pointer(_))
    }
}
