//! Evaluation results
//!
//! Resolving an expression never touches target memory. Pointer loads are
//! described by an `Address` program that a `MemoryReader` runs later.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::EvalError;
use crate::symbols::{BitField, TypeDatabase, TypeRef};

/// Target address, possibly depending on memory reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Address {
    Absolute(u64),
    /// Read a `width`-byte little-endian value at `from`, then add `offset`
    Load {
        from: Box<Address>,
        width: u8,
        offset: i64,
    },
    /// Value of single-eval block `index`, plus `offset`
    Slot { index: usize, offset: i64 },
}

impl Address {
    pub fn offset_by(self, delta: i64) -> Address {
        match self {
            Address::Absolute(v) => Address::Absolute(v.wrapping_add_signed(delta)),
            Address::Load {
                from,
                width,
                offset,
            } => Address::Load {
                from,
                width,
                offset: offset.wrapping_add(delta),
            },
            Address::Slot { index, offset } => Address::Slot {
                index,
                offset: offset.wrapping_add(delta),
            },
        }
    }

    /// The value stored at this address
    pub fn load(self, width: u8) -> Address {
        Address::Load {
            from: Box::new(self),
            width,
            offset: 0,
        }
    }

    pub fn as_absolute(&self) -> Option<u64> {
        match self {
            Address::Absolute(v) => Some(*v),
            _ => None,
        }
    }

    fn resolve<R: MemoryReader + ?Sized>(&self, slots: &[u64], reader: &mut R) -> Result<u64, R::Error> {
        match self {
            Address::Absolute(v) => Ok(*v),
            Address::Load {
                from,
                width,
                offset,
            } => {
                let at = from.resolve(slots, reader)?;
                Ok(reader.read_pointer(at, *width)?.wrapping_add_signed(*offset))
            }
            // Slots only refer to earlier blocks, which are already computed
            Address::Slot { index, offset } => {
                Ok(slots.get(*index).copied().unwrap_or_default().wrapping_add_signed(*offset))
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (base, offset) = match self {
            Address::Absolute(v) => return write!(f, "0x{:x}", v),
            Address::Load { from, width, offset } => (format!("[{}]:{}", from, width), *offset),
            Address::Slot { index, offset } => (format!("${}", index), *offset),
        };
        match offset {
            0 => write!(f, "{}", base),
            n if n < 0 => write!(f, "{}-{}", base, n.unsigned_abs()),
            n => write!(f, "{}+{}", base, n),
        }
    }
}

/// Access to target memory, implemented by whoever owns the probe
pub trait MemoryReader {
    type Error;

    /// Read a `width`-byte little-endian unsigned value at `address`
    fn read_pointer(&mut self, address: u64, width: u8) -> Result<u64, Self::Error>;
}

/// Outcome of resolving one watch expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvalResult {
    /// An lvalue: read `byte_size` bytes at `address`
    Located {
        address: Address,
        ty: TypeRef,
        type_name: String,
        byte_size: Option<u64>,
        bit_field: Option<BitField>,
    },
    /// Known without reading memory
    Constant {
        value: i64,
        ty: Option<TypeRef>,
        type_name: String,
    },
    /// An rvalue that depends on memory reads
    Computed {
        value: Address,
        ty: TypeRef,
        type_name: String,
    },
}

impl EvalResult {
    pub fn type_name(&self) -> &str {
        match self {
            EvalResult::Located { type_name, .. }
            | EvalResult::Constant { type_name, .. }
            | EvalResult::Computed { type_name, .. } => type_name,
        }
    }

    pub fn ty(&self) -> Option<&TypeRef> {
        match self {
            EvalResult::Located { ty, .. } | EvalResult::Computed { ty, .. } => Some(ty),
            EvalResult::Constant { ty, .. } => ty.as_ref(),
        }
    }
}

/// Final numbers after running the address program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// Where to read the watched value
    Address(u64),
    /// The watched value itself
    Value(u64),
}

/// A resolved expression together with its single-eval blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    result: EvalResult,
    /// Block `i` may only refer to blocks before it
    blocks: Vec<Address>,
}

impl Evaluation {
    pub(crate) fn new(result: EvalResult, blocks: Vec<Address>) -> Self {
        Self { result, blocks }
    }

    pub fn result(&self) -> &EvalResult {
        &self.result
    }

    pub fn blocks(&self) -> &[Address] {
        &self.blocks
    }

    pub fn into_result(self) -> EvalResult {
        self.result
    }

    /// Run the reads. Each block is computed exactly once per call.
    pub fn materialize<R: MemoryReader + ?Sized>(&self, reader: &mut R) -> Result<Materialized, R::Error> {
        let mut slots = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let value = block.resolve(&slots, reader)?;
            slots.push(value);
        }
        Ok(match &self.result {
            EvalResult::Located { address, .. } => Materialized::Address(address.resolve(&slots, reader)?),
            EvalResult::Constant { value, .. } => Materialized::Value(*value as u64),
            EvalResult::Computed { value, .. } => Materialized::Value(value.resolve(&slots, reader)?),
        })
    }

    /// Reject results a plotter cannot decode as a number
    pub fn require_numeric(&self, db: &TypeDatabase) -> Result<(), EvalError> {
        let Some(ty) = self.result.ty() else {
            return Ok(());
        };
        if db.shape(ty).is_numeric() {
            Ok(())
        } else {
            Err(EvalError::NonNumericOnReturn {
                type_name: self.result.type_name().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u64);

    impl MemoryReader for Fixed {
        type Error = String;

        fn read_pointer(&mut self, address: u64, _width: u8) -> Result<u64, String> {
            if address == 0 {
                return Err("null read".to_string());
            }
            Ok(self.0)
        }
    }

    #[test]
    fn test_offsets_fold() {
        let a = Address::Absolute(0x100).offset_by(8).offset_by(-4);
        assert_eq!(a, Address::Absolute(0x104));

        let l = Address::Absolute(0x100).load(4).offset_by(12).offset_by(-2);
        assert_eq!(
            l,
            Address::Load {
                from: Box::new(Address::Absolute(0x100)),
                width: 4,
                offset: 10
            }
        );
        assert_eq!(l.to_string(), "[0x100]:4+10");
        assert_eq!(Address::Slot { index: 1, offset: -3 }.to_string(), "$1-3");
    }

    #[test]
    fn test_materialize_blocks_then_result() {
        let eval = Evaluation::new(
            EvalResult::Computed {
                value: Address::Slot { index: 0, offset: 4 },
                ty: TypeRef::Id(crate::symbols::TypeDatabase::builder(4).unknown()),
                type_name: "int*".into(),
            },
            vec![Address::Absolute(0x10).load(4)],
        );
        assert_eq!(eval.materialize(&mut Fixed(0x2000)), Ok(Materialized::Value(0x2004)));
    }

    #[test]
    fn test_reader_errors_propagate() {
        let eval = Evaluation::new(
            EvalResult::Located {
                address: Address::Absolute(0).load(4),
                ty: TypeRef::Id(crate::symbols::TypeDatabase::builder(4).unknown()),
                type_name: "int".into(),
                byte_size: Some(4),
                bit_field: None,
            },
            Vec::new(),
        );
        assert_eq!(eval.materialize(&mut Fixed(1)), Err("null read".to_string()));
    }

    #[test]
    fn test_result_serialization() {
        let result = EvalResult::Constant {
            value: 8,
            ty: None,
            type_name: "int".into(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["kind"], "constant");
        assert_eq!(json["value"], 8);
    }
}
