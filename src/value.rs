use std::num::NonZeroU32;

use lazy_static::lazy_static;
use ordered_float::OrderedFloat;

use crate::{ast::Symbol, Id};

lazy_static! {
    static ref BOGUS: Symbol = "__bogus__".into();
    static ref UNIT: Symbol = "Unit".into();
    static ref I64: Symbol = "i64".into();
    static ref F64: Symbol = "f64".into();
    static ref STRING: Symbol = "String".into();
    static ref BOOL: Symbol = "bool".into();
}

/// A runtime value: the name of its sort plus a 64-bit payload.
///
/// Primitive sorts store their payload directly in `bits` (or an index into
/// a per-sort interning table). Values of an eq sort carry an e-class [`Id`],
/// which is only meaningful after canonicalization.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct Value {
    pub tag: Symbol,
    pub bits: u64,
}

impl Value {
    pub fn unit() -> Self {
        Value {
            tag: *UNIT,
            bits: 0,
        }
    }

    pub fn fake() -> Self {
        Value {
            tag: *BOGUS,
            bits: 1234567890,
        }
    }

    pub fn from_id(tag: Symbol, id: Id) -> Self {
        Value {
            tag,
            bits: usize::from(id) as u64,
        }
    }

    pub fn id(&self) -> Id {
        Id::from(self.bits as usize)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self {
            tag: *I64,
            bits: i as u64,
        }
    }
}

impl From<OrderedFloat<f64>> for Value {
    fn from(f: OrderedFloat<f64>) -> Self {
        Self {
            tag: *F64,
            bits: f.into_inner().to_bits(),
        }
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Self {
            tag: *STRING,
            bits: NonZeroU32::from(s).get().into(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self {
            tag: *BOOL,
            bits: b as u64,
        }
    }
}
