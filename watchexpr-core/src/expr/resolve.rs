//! Resolver: AST + type database -> evaluation result
//!
//! Follows C semantics for the supported subset: `p + n` scales by the
//! pointee size, `a[i]` is `*(a + i)`, arrays decay to pointers to their
//! first element, `&` needs an lvalue.

use super::ast::{Access, DetExpr, DetOp, Expr, OffsetOp, ScopedIdent, TypeName, TypeSuffix, UnaryOp};
use super::error::EvalError;
use super::value::{Address, EvalResult, Evaluation};
use crate::symbols::{BitField, Shape, TypeDatabase, TypeRef};

/// Resolve `expr` against one database snapshot
pub fn resolve(db: &TypeDatabase, expr: &Expr) -> Result<Evaluation, EvalError> {
    Resolver::new(db).resolve(expr)
}

/// Evaluate a determinant expression to a constant
pub fn eval_det(db: &TypeDatabase, det: &DetExpr) -> Result<i64, EvalError> {
    Resolver::new(db).eval_det(det)
}

/// Intermediate value while walking the tree
#[derive(Debug, Clone)]
enum Operand {
    Located {
        address: Address,
        ty: TypeRef,
        bit_field: Option<BitField>,
    },
    Value {
        value: Address,
        ty: TypeRef,
    },
}

impl Operand {
    fn ty(&self) -> &TypeRef {
        match self {
            Operand::Located { ty, .. } | Operand::Value { ty, .. } => ty,
        }
    }

    fn retype(self, ty: TypeRef) -> Operand {
        match self {
            Operand::Located { address, .. } => Operand::Located {
                address,
                ty,
                bit_field: None,
            },
            Operand::Value { value, .. } => Operand::Value { value, ty },
        }
    }
}

pub struct Resolver<'db> {
    db: &'db TypeDatabase,
    blocks: Vec<Address>,
}

impl<'db> Resolver<'db> {
    pub fn new(db: &'db TypeDatabase) -> Self {
        Self {
            db,
            blocks: Vec::new(),
        }
    }

    pub fn resolve(mut self, expr: &Expr) -> Result<Evaluation, EvalError> {
        let operand = self.operand(expr)?;
        let result = self.finish(operand);
        Ok(Evaluation::new(result, self.blocks))
    }

    fn finish(&self, operand: Operand) -> EvalResult {
        match operand {
            Operand::Located {
                address,
                ty,
                bit_field,
            } => EvalResult::Located {
                byte_size: self.db.size_of(&ty),
                type_name: self.db.display_name(&ty),
                address,
                ty,
                bit_field,
            },
            Operand::Value {
                value: Address::Absolute(value),
                ty,
            } => EvalResult::Constant {
                value: value as i64,
                type_name: self.db.display_name(&ty),
                ty: Some(ty),
            },
            Operand::Value { value, ty } => EvalResult::Computed {
                type_name: self.db.display_name(&ty),
                value,
                ty,
            },
        }
    }

    fn operand(&mut self, expr: &Expr) -> Result<Operand, EvalError> {
        match expr {
            Expr::Ident(ident) => self.identifier(ident),
            Expr::Paren(inner) => self.operand(inner),
            Expr::SingleEval(inner) => {
                let operand = self.operand(inner)?;
                Ok(self.hoist(operand))
            }
            Expr::Member {
                base,
                access,
                member,
            } => {
                let target = self.operand(base)?;
                let target = match access {
                    Access::Dot => target,
                    Access::Arrow => self.deref(target, base)?,
                };
                self.member(target, base, member)
            }
            Expr::Index { base, index } => {
                let target = self.operand(base)?;
                if !matches!(self.db.shape(target.ty()), Shape::Pointer(_) | Shape::Array { .. }) {
                    return Err(EvalError::IndexOfNonPointer {
                        expr: base.to_string(),
                        type_name: self.db.display_name(target.ty()),
                    });
                }
                let index = self.eval_det(index)?;
                let moved = self.add_offset(target, index, base, expr)?;
                self.deref(moved, expr)
            }
            Expr::Unary {
                op: UnaryOp::Deref,
                expr: inner,
            } => {
                let target = self.operand(inner)?;
                self.deref(target, inner)
            }
            Expr::Unary {
                op: UnaryOp::AddrOf,
                expr: inner,
            } => {
                let target = self.operand(inner)?;
                address_of(target, inner)
            }
            Expr::Cast { ty, expr: inner } => {
                let ty = self.type_ref(ty)?;
                Ok(self.operand(inner)?.retype(ty))
            }
            Expr::Offset { base, op, offset } => {
                let n = self.eval_det(offset)?;
                let n = match op {
                    OffsetOp::Add => n,
                    OffsetOp::Sub => n.checked_neg().ok_or_else(|| EvalError::overflow(expr))?,
                };
                let target = self.operand(base)?;
                self.add_offset(target, n, base, expr)
            }
        }
    }

    fn identifier(&self, ident: &ScopedIdent) -> Result<Operand, EvalError> {
        let name = ident.to_string();
        if self.db.is_ambiguous(&name) {
            return Err(EvalError::AmbiguousIdentifier { name });
        }
        let symbol = self
            .db
            .symbol(&name)
            .ok_or_else(|| EvalError::unknown_identifier(&name))?;
        Ok(Operand::Located {
            address: Address::Absolute(symbol.address),
            ty: symbol.ty.into(),
            bit_field: None,
        })
    }

    /// Single-eval block: compute the address once and refer to it by slot
    fn hoist(&mut self, operand: Operand) -> Operand {
        match operand {
            Operand::Located {
                address,
                ty,
                bit_field,
            } => Operand::Located {
                address: self.slot(address),
                ty,
                bit_field,
            },
            Operand::Value { value, ty } => Operand::Value {
                value: self.slot(value),
                ty,
            },
        }
    }

    fn slot(&mut self, address: Address) -> Address {
        match address {
            Address::Absolute(_) | Address::Slot { offset: 0, .. } => address,
            other => {
                self.blocks.push(other);
                Address::Slot {
                    index: self.blocks.len() - 1,
                    offset: 0,
                }
            }
        }
    }

    fn pointer_width(&self, ty: &TypeRef) -> u8 {
        self.db
            .size_of(ty)
            .and_then(|size| u8::try_from(size).ok())
            .filter(|width| (1..=8).contains(width))
            .unwrap_or(self.db.address_size())
    }

    fn deref(&self, operand: Operand, expr: &Expr) -> Result<Operand, EvalError> {
        let shape = self.db.shape(operand.ty());
        match (operand, shape) {
            (
                Operand::Located {
                    address,
                    ty,
                    bit_field: None,
                },
                Shape::Pointer(pointee),
            ) => Ok(Operand::Located {
                address: address.load(self.pointer_width(&ty)),
                ty: pointee,
                bit_field: None,
            }),
            (
                Operand::Located {
                    address,
                    bit_field: None,
                    ..
                },
                Shape::Array { element, .. },
            ) => Ok(Operand::Located {
                address,
                ty: element,
                bit_field: None,
            }),
            (Operand::Value { value, .. }, Shape::Pointer(pointee))
            | (Operand::Value { value, .. }, Shape::Array { element: pointee, .. }) => {
                Ok(Operand::Located {
                    address: value,
                    ty: pointee,
                    bit_field: None,
                })
            }
            (operand, _) => Err(EvalError::DereferenceOfNonPointer {
                expr: expr.to_string(),
                type_name: self.db.display_name(operand.ty()),
            }),
        }
    }

    fn member(&self, operand: Operand, base: &Expr, member: &str) -> Result<Operand, EvalError> {
        let not_composite = |ty: &TypeRef| EvalError::NotStructOrUnion {
            expr: base.to_string(),
            member: member.to_string(),
            type_name: self.db.display_name(ty),
        };
        let (address, ty) = match operand {
            Operand::Located {
                address,
                ty,
                bit_field: None,
            } => (address, ty),
            other => return Err(not_composite(other.ty())),
        };
        let Shape::Composite { members, .. } = self.db.shape(&ty) else {
            return Err(not_composite(&ty));
        };
        let found = members
            .iter()
            .find(|m| m.name == member)
            .ok_or_else(|| EvalError::unknown_member(member, self.db.display_name(&ty)))?;
        Ok(Operand::Located {
            address: address.offset_by(found.offset as i64),
            ty: found.ty.into(),
            bit_field: found.bit_field,
        })
    }

    /// Byte size of one step of pointer arithmetic over `ty`
    fn step(&self, ty: &TypeRef) -> Result<i64, EvalError> {
        self.db
            .size_of(ty)
            .and_then(|size| i64::try_from(size).ok())
            .ok_or_else(|| EvalError::IncompleteType {
                type_name: self.db.display_name(ty),
            })
    }

    fn scaled(&self, n: i64, element: &TypeRef, expr: &Expr) -> Result<i64, EvalError> {
        n.checked_mul(self.step(element)?)
            .ok_or_else(|| EvalError::overflow(expr))
    }

    /// `base + n` with C scaling; the result is always an rvalue
    fn add_offset(&self, operand: Operand, n: i64, base: &Expr, expr: &Expr) -> Result<Operand, EvalError> {
        let non_numeric = |ty: &TypeRef| EvalError::NonNumericOnEvaluation {
            expr: base.to_string(),
            type_name: self.db.display_name(ty),
        };
        let shape = self.db.shape(operand.ty());
        match operand {
            Operand::Located {
                ref ty,
                bit_field: Some(_),
                ..
            } => Err(non_numeric(ty)),
            Operand::Located { address, ty, .. } => match shape {
                Shape::Array { element, .. } => Ok(Operand::Value {
                    value: address.offset_by(self.scaled(n, &element, expr)?),
                    ty: element.pointer_to(),
                }),
                Shape::Pointer(pointee) => Ok(Operand::Value {
                    value: address
                        .load(self.pointer_width(&ty))
                        .offset_by(self.scaled(n, &pointee, expr)?),
                    ty,
                }),
                s if s.is_integral() => {
                    let width = self.pointer_width(&ty);
                    Ok(Operand::Value {
                        value: address.load(width).offset_by(n),
                        ty,
                    })
                }
                _ => Err(non_numeric(&ty)),
            },
            Operand::Value { value, ty } => match shape {
                Shape::Array { element, .. } => Ok(Operand::Value {
                    value: value.offset_by(self.scaled(n, &element, expr)?),
                    ty: element.pointer_to(),
                }),
                Shape::Pointer(pointee) => Ok(Operand::Value {
                    value: value.offset_by(self.scaled(n, &pointee, expr)?),
                    ty,
                }),
                s if s.is_integral() => Ok(Operand::Value {
                    value: value.offset_by(n),
                    ty,
                }),
                _ => Err(non_numeric(&ty)),
            },
        }
    }

    pub fn eval_det(&self, det: &DetExpr) -> Result<i64, EvalError> {
        match det {
            DetExpr::Literal(value) => Ok(*value),
            DetExpr::Paren(inner) => self.eval_det(inner),
            DetExpr::SizeOf(ty) => {
                let size = self.size_of(ty)?;
                i64::try_from(size).map_err(|_| EvalError::overflow(det))
            }
            DetExpr::Neg(inner) => self
                .eval_det(inner)?
                .checked_neg()
                .ok_or_else(|| EvalError::overflow(det)),
            DetExpr::Binary { left, op, right } => {
                let l = self.eval_det(left)?;
                let r = self.eval_det(right)?;
                match op {
                    DetOp::Add => l.checked_add(r),
                    DetOp::Sub => l.checked_sub(r),
                    DetOp::Mul => l.checked_mul(r),
                }
                .ok_or_else(|| EvalError::overflow(det))
            }
        }
    }

    /// Look up a type name and apply its `*` / `[]` suffixes
    pub fn type_ref(&self, name: &TypeName) -> Result<TypeRef, EvalError> {
        let base = name.base.to_string();
        let id = self
            .db
            .type_by_name(&base)
            .ok_or_else(|| EvalError::unknown_identifier(&base))?;
        Ok(name
            .suffixes
            .iter()
            .fold(TypeRef::Id(id), |ty, suffix| match suffix {
                TypeSuffix::Pointer => ty.pointer_to(),
                TypeSuffix::Array => ty.array_of(None),
            }))
    }

    pub fn size_of(&self, name: &TypeName) -> Result<u64, EvalError> {
        let ty = self.type_ref(name)?;
        self.db
            .size_of(&ty)
            .ok_or_else(|| EvalError::IncompleteType {
                type_name: name.to_string(),
            })
    }
}

fn address_of(operand: Operand, expr: &Expr) -> Result<Operand, EvalError> {
    match operand {
        Operand::Located {
            bit_field: Some(_), ..
        } => Err(EvalError::AddressOfBitField {
            expr: expr.to_string(),
        }),
        Operand::Located { address, ty, .. } => Ok(Operand::Value {
            value: address,
            ty: ty.pointer_to(),
        }),
        Operand::Value { .. } => Err(EvalError::AddressOfRvalue {
            expr: expr.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::{parse_det_expr, parse_expr};
    use crate::expr::value::{Materialized, MemoryReader};
    use crate::symbols::{
        Member, PrimitiveClass, StorageClass, Symbol, TypeDescriptor, TypeId, TypeKind,
    };
    use std::collections::HashMap;

    struct MapReader {
        memory: HashMap<u64, u64>,
        reads: Vec<u64>,
    }

    impl MapReader {
        fn new(memory: &[(u64, u64)]) -> Self {
            Self {
                memory: memory.iter().copied().collect(),
                reads: Vec::new(),
            }
        }
    }

    impl MemoryReader for MapReader {
        type Error = String;

        fn read_pointer(&mut self, address: u64, _width: u8) -> Result<u64, String> {
            self.reads.push(address);
            self.memory
                .get(&address)
                .copied()
                .ok_or_else(|| format!("unmapped 0x{:x}", address))
        }
    }

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
        let chr = b.primitive("char", 1, PrimitiveClass::Signed);
        let int = b.primitive("int", 4, PrimitiveClass::Signed);
        let u64_ = b.primitive("uint64_t", 8, PrimitiveClass::Unsigned);
        let float = b.primitive("float", 4, PrimitiveClass::Float);
        let pair = b.composite("Pair", 16, vec![member("a", 0, u64_), member("b", 8, u64_)], false);
        let point = b.composite("Point", 8, vec![member("x", 0, int), member("y", 4, int)], false);
        let flags = b.composite(
            "Flags",
            4,
            vec![Member {
                name: "mode".into(),
                offset: 0,
                ty: int,
                bit_field: Some(BitField {
                    bit_offset: 3,
                    bit_size: 2,
                }),
            }],
            false,
        );

        let node = b.reserve();
        let node_ptr = b.pointer_to(node);
        b.define(
            node,
            TypeDescriptor {
                name: Some("Node".into()),
                size: 8,
                kind: TypeKind::Struct {
                    members: vec![member("next", 0, node_ptr), member("value", 4, int)],
                    complete: true,
                },
            },
        );
        b.name_type("Node", node);

        let char_ptr = b.pointer_to(chr);
        let int_ptr = b.pointer_to(int);
        let u64_ptr = b.pointer_to(u64_);
        let pair_ptr = b.pointer_to(pair);
        let unknown = b.unknown();
        let void_ptr = b.pointer_to(unknown);
        let values = b.array_of(int, Some(4));
        let points = b.array_of(point, Some(3));
        let function = b.function_type();

        for (name, address, ty) in [
            ("c", 0x1000, chr),
            ("i", 0x1004, int),
            ("q", 0x1008, u64_),
            ("pair", 0x1010, pair),
            ("pc", 0x1100, char_ptr),
            ("pi", 0x1104, int_ptr),
            ("pq", 0x1108, u64_ptr),
            ("ppair", 0x110c, pair_ptr),
            ("values", 0x1200, values),
            ("points", 0x1300, points),
            ("origin", 0x1400, point),
            ("head", 0x1500, node_ptr),
            ("flags", 0x1600, flags),
            ("ratio", 0x1700, float),
            ("vp", 0x1800, void_ptr),
            ("ns::counter", 0x1900, int),
            ("main", 0x8000, function),
        ] {
            b.add_symbol(Symbol {
                name: name.into(),
                address,
                ty,
                storage: StorageClass::Global,
                source: None,
            });
        }
        b.finish()
    }

    fn eval(db: &TypeDatabase, text: &str) -> Result<Evaluation, EvalError> {
        resolve(db, &parse_expr(text).unwrap())
    }

    fn located_at(evaluation: &Evaluation) -> Option<u64> {
        match evaluation.result() {
            EvalResult::Located { address, .. } => address.as_absolute(),
            _ => None,
        }
    }

    #[test]
    fn test_identifier() {
        let db = sample();
        let e = eval(&db, "ns::counter").unwrap();
        assert!(matches!(
            e.result(),
            EvalResult::Located { address: Address::Absolute(0x1900), byte_size: Some(4), type_name, .. }
                if type_name == "int"
        ));
        assert!(e.blocks().is_empty());
    }

    #[test]
    fn test_pointer_scaling() {
        let db = sample();
        for (name, size) in [("pc", 1), ("pi", 4), ("pq", 8), ("ppair", 16)] {
            let e = eval(&db, &format!("{} + 1", name)).unwrap();
            let EvalResult::Computed { value, .. } = e.result() else {
                panic!("{} + 1 is not computed", name);
            };
            let base = db.symbol(name).unwrap().address;
            assert_eq!(*value, Address::Absolute(base).load(4).offset_by(size));

            let mut reader = MapReader::new(&[(base, 0x5000)]);
            assert_eq!(e.materialize(&mut reader), Ok(Materialized::Value(0x5000 + size as u64)));
        }
    }

    #[test]
    fn test_array_offsets_are_constant() {
        let db = sample();
        let e = eval(&db, "values + 2").unwrap();
        assert!(matches!(
            e.result(),
            EvalResult::Constant { value: 0x1208, type_name, .. } if type_name == "int*"
        ));
        let e = eval(&db, "values - 1").unwrap();
        assert!(matches!(e.result(), EvalResult::Constant { value: 0x11fc, .. }));
    }

    #[test]
    fn test_member_offsets() {
        let db = sample();
        assert_eq!(located_at(&eval(&db, "origin.y").unwrap()), Some(0x1404));
        assert_eq!(located_at(&eval(&db, "points[2].y").unwrap()), Some(0x1314));
        assert_eq!(located_at(&eval(&db, "points->y").unwrap()), Some(0x1304));
        assert_eq!(located_at(&eval(&db, "(&origin)->y").unwrap()), Some(0x1404));

        let e = eval(&db, "head->next->value").unwrap();
        let mut reader = MapReader::new(&[(0x1500, 0x3000), (0x3000, 0x4000)]);
        assert_eq!(e.materialize(&mut reader), Ok(Materialized::Address(0x4004)));
        assert_eq!(reader.reads, vec![0x1500, 0x3000]);
    }

    #[test]
    fn test_index_and_offset_duality() {
        let db = sample();
        for (indexed, offset) in [
            ("values[3]", "*(values + 3)"),
            ("pi[3]", "*(pi + 3)"),
            ("points[1]", "*(points + 1)"),
            ("ppair[2]", "*(ppair + 2)"),
        ] {
            assert_eq!(eval(&db, indexed).unwrap(), eval(&db, offset).unwrap(), "{}", indexed);
        }
        assert_eq!(located_at(&eval(&db, "values[sizeof(int) - 1]").unwrap()), Some(0x120c));
    }

    #[test]
    fn test_cast_round_trip() {
        let db = sample();
        assert_eq!(eval(&db, "*(Point*)&origin").unwrap(), eval(&db, "origin").unwrap());

        let e = eval(&db, "*(int*)&pair").unwrap();
        assert!(matches!(
            e.result(),
            EvalResult::Located { address: Address::Absolute(0x1010), type_name, .. } if type_name == "int"
        ));

        let e = eval(&db, "(uint64_t*)pi").unwrap();
        assert!(matches!(e.result(), EvalResult::Located { type_name, .. } if type_name == "uint64_t*"));
        let e = eval(&db, "((uint64_t*)pi)[1]").unwrap();
        let mut reader = MapReader::new(&[(0x1104, 0x7000)]);
        assert_eq!(e.materialize(&mut reader), Ok(Materialized::Address(0x7008)));
    }

    #[test]
    fn test_address_of() {
        let db = sample();
        let e = eval(&db, "&origin.y").unwrap();
        assert!(matches!(
            e.result(),
            EvalResult::Constant { value: 0x1404, type_name, .. } if type_name == "int*"
        ));
        let e = eval(&db, "&head->value").unwrap();
        assert!(matches!(e.result(), EvalResult::Computed { .. }));

        assert!(matches!(
            eval(&db, "&flags.mode"),
            Err(EvalError::AddressOfBitField { expr }) if expr == "flags.mode"
        ));
        assert!(matches!(
            eval(&db, "&(pi + 1)"),
            Err(EvalError::AddressOfRvalue { .. })
        ));
    }

    #[test]
    fn test_integer_offsets_load_the_value() {
        let db = sample();
        let e = eval(&db, "i + 2").unwrap();
        let mut reader = MapReader::new(&[(0x1004, 40)]);
        assert_eq!(e.materialize(&mut reader), Ok(Materialized::Value(42)));
    }

    #[test]
    fn test_unknown_member_names_the_type() {
        let db = sample();
        let err = eval(&db, "origin.z").unwrap_err();
        assert_eq!(err, EvalError::unknown_member("z", "Point"));
        assert_eq!(
            eval(&db, "missing").unwrap_err(),
            EvalError::unknown_identifier("missing")
        );
    }

    #[test]
    fn test_shape_errors() {
        let db = sample();
        assert!(matches!(
            eval(&db, "*i"),
            Err(EvalError::DereferenceOfNonPointer { expr, type_name }) if expr == "i" && type_name == "int"
        ));
        assert!(matches!(
            eval(&db, "origin->x"),
            Err(EvalError::DereferenceOfNonPointer { .. })
        ));
        assert!(matches!(
            eval(&db, "i[0]"),
            Err(EvalError::IndexOfNonPointer { .. })
        ));
        assert!(matches!(
            eval(&db, "i.x"),
            Err(EvalError::NotStructOrUnion { member, .. }) if member == "x"
        ));
        assert!(matches!(
            eval(&db, "ratio + 1"),
            Err(EvalError::NonNumericOnEvaluation { type_name, .. }) if type_name == "float"
        ));
        assert!(matches!(
            eval(&db, "origin + 1"),
            Err(EvalError::NonNumericOnEvaluation { .. })
        ));
        assert!(matches!(
            eval(&db, "flags.mode + 1"),
            Err(EvalError::NonNumericOnEvaluation { .. })
        ));
        assert!(matches!(
            eval(&db, "vp + 1"),
            Err(EvalError::IncompleteType { .. })
        ));
        assert!(matches!(
            eval(&db, "values + 0x7fffffffffffffff"),
            Err(EvalError::ArithmeticOverflow { .. })
        ));
    }

    #[test]
    fn test_require_numeric() {
        let db = sample();
        assert!(eval(&db, "origin.x").unwrap().require_numeric(&db).is_ok());
        assert!(eval(&db, "head").unwrap().require_numeric(&db).is_ok());
        assert!(eval(&db, "flags.mode").unwrap().require_numeric(&db).is_ok());
        assert!(matches!(
            eval(&db, "origin").unwrap().require_numeric(&db),
            Err(EvalError::NonNumericOnReturn { type_name }) if type_name == "Point"
        ));
        assert!(matches!(
            eval(&db, "values").unwrap().require_numeric(&db),
            Err(EvalError::NonNumericOnReturn { .. })
        ));
    }

    #[test]
    fn test_single_eval_blocks() {
        let db = sample();
        let e = eval(&db, "{{head->next}->next}->value").unwrap();
        assert_eq!(e.blocks().len(), 2);

        let memory = [(0x1500, 0x3000), (0x3000, 0x4000), (0x4000, 0x5000)];
        let mut reader = MapReader::new(&memory);
        assert_eq!(e.materialize(&mut reader), Ok(Materialized::Address(0x5004)));
        assert_eq!(reader.reads, vec![0x1500, 0x3000, 0x4000]);

        // An absolute block folds away
        let e = eval(&db, "{origin}.y").unwrap();
        assert!(e.blocks().is_empty());
        assert_eq!(located_at(&e), Some(0x1404));
    }

    #[test]
    fn test_block_around_rvalue() {
        let db = sample();
        let e = eval(&db, "{pi + 1}[1]").unwrap();
        assert_eq!(e.blocks().len(), 1);
        let mut reader = MapReader::new(&[(0x1104, 0x6000)]);
        assert_eq!(e.materialize(&mut reader), Ok(Materialized::Address(0x6008)));
        assert_eq!(reader.reads.len(), 1);
    }

    #[test]
    fn test_determinants() {
        let db = sample();
        let det = |text: &str| eval_det(&db, &parse_det_expr(text).unwrap());
        assert_eq!(det("sizeof(int) * 2 + 1").unwrap(), 9);
        assert_eq!(det("sizeof(Pair)").unwrap(), 16);
        assert_eq!(det("sizeof(Node*)").unwrap(), 4);
        assert_eq!(det("-(3 - 5)").unwrap(), 2);
        assert_eq!(det("sizeof(Nope)").unwrap_err(), EvalError::unknown_identifier("Nope"));
        assert!(matches!(det("sizeof(int[])"), Err(EvalError::IncompleteType { .. })));
        assert!(matches!(
            det("0x7fffffffffffffff + 1"),
            Err(EvalError::ArithmeticOverflow { .. })
        ));
    }

    #[test]
    fn test_function_symbols() {
        let db = sample();
        let e = eval(&db, "&main").unwrap();
        assert!(matches!(e.result(), EvalResult::Constant { value: 0x8000, .. }));
    }
}
