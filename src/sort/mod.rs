//! Sorts: the types of values stored in the database.
//!
//! A sort is an `Arc<dyn Sort>`. Primitive sorts store their payload in the
//! bits of a [`Value`]; container sorts intern their contents and store an
//! index; eq sorts store an e-class [`Id`](crate::Id). Parametric container
//! sorts (`Set`, `Map`, `Vec`, `UnstableFn`) are built from a [`Presort`]
//! when a sort declaration names them.
#[macro_use]
mod macros;
use lazy_static::lazy_static;
use ordered_float::OrderedFloat;
use std::fmt::Debug;
use std::{any::Any, sync::Arc};

mod bool;
pub use self::bool::*;
mod rational;
pub use rational::*;
mod string;
pub use string::*;
mod unit;
pub use unit::*;
mod i64;
pub use self::i64::*;
mod f64;
pub use self::f64::*;
mod map;
pub use map::*;
mod set;
pub use set::*;
mod vec;
pub use vec::*;
mod r#fn;
pub use r#fn::*;

use crate::constraint::{AllEqualTypeConstraint, SimpleTypeConstraint, TypeConstraint};
use crate::extract::Extractor;
use crate::termdag::{TermDag, TermId};
use crate::typechecking::{TypeError, TypeInfo};
use crate::unionfind::UnionFind;
use crate::*;

pub type ArcSort = Arc<dyn Sort>;

pub trait Sort: Any + Send + Sync + Debug {
    fn name(&self) -> Symbol;

    fn as_arc_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync + 'static>;

    fn is_eq_sort(&self) -> bool {
        false
    }

    // return true if it is a container sort.
    fn is_container_sort(&self) -> bool {
        false
    }

    // return true if it is a container sort that contains ids.
    // only eq_sort and eq_container_sort need to be canonicalized.
    fn is_eq_container_sort(&self) -> bool {
        false
    }

    /// The elements of a container value, one level deep.
    fn inner_values(&self, _value: &Value) -> Vec<(ArcSort, Value)> {
        debug_assert!(!self.is_container_sort());
        vec![]
    }

    /// Replace every e-class id reachable from `value` by its canonical
    /// representative. Returns whether the value changed.
    fn canonicalize(&self, value: &mut Value, _unionfind: &UnionFind) -> bool {
        debug_assert_eq!(self.name(), value.tag);
        false
    }

    fn register_primitives(self: Arc<Self>, _info: &mut TypeInfo) {}

    /// Build the term for a value of this sort. Eq sorts and containers of
    /// eq sorts consult the extractor for the best term of each class.
    fn extract_term(
        &self,
        egraph: &EGraph,
        value: Value,
        extractor: &Extractor,
        termdag: &mut TermDag,
    ) -> Option<TermId>;
}

/// A sort constructor, instantiated by `(sort Name (Presort args...))`.
pub trait Presort {
    fn presort_name() -> Symbol;
    fn reserved_primitives() -> Vec<Symbol>;
    fn make_sort(
        typeinfo: &mut TypeInfo,
        name: Symbol,
        args: &[Expr],
    ) -> Result<ArcSort, TypeError>;
}

pub type PreSort = fn(&mut TypeInfo, Symbol, &[Expr]) -> Result<ArcSort, TypeError>;

#[derive(Debug)]
pub struct EqSort {
    pub name: Symbol,
}

impl Sort for EqSort {
    fn name(&self) -> Symbol {
        self.name
    }

    fn as_arc_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync + 'static> {
        self
    }

    fn is_eq_sort(&self) -> bool {
        true
    }

    fn canonicalize(&self, value: &mut Value, unionfind: &UnionFind) -> bool {
        debug_assert_eq!(self.name(), value.tag);
        let bits = usize::from(unionfind.find(value.id())) as u64;
        if bits != value.bits {
            value.bits = bits;
            true
        } else {
            false
        }
    }

    fn extract_term(
        &self,
        _egraph: &EGraph,
        value: Value,
        extractor: &Extractor,
        termdag: &mut TermDag,
    ) -> Option<TermId> {
        extractor.find_best_term(value, termdag)
    }
}

pub trait FromSort: Sized {
    type Sort: Sort;
    fn load(sort: &Self::Sort, value: &Value) -> Self;
}

pub trait IntoSort: Sized {
    type Sort: Sort;
    fn store(self, sort: &Self::Sort) -> Option<Value>;
}

impl<T: IntoSort> IntoSort for Option<T> {
    type Sort = T::Sort;

    fn store(self, sort: &Self::Sort) -> Option<Value> {
        self?.store(sort)
    }
}

pub fn literal_to_value(lit: &Literal) -> Value {
    lit.to_value()
}

/// The argument and result sorts of a [`ContainerPrimitive`].
pub(crate) enum Signature {
    /// Input sorts followed by the output sort.
    Fixed(Vec<ArcSort>),
    /// Any number of `element` inputs.
    Variadic { element: ArcSort, output: ArcSort },
}

type PrimitiveBody = dyn Fn(&[Value]) -> Option<Value> + Send + Sync;

/// A primitive over an instance of a container sort. Every container sort
/// registers its own copies, so overloads are told apart by type inference.
pub(crate) struct ContainerPrimitive {
    name: Symbol,
    signature: Signature,
    body: Box<PrimitiveBody>,
}

impl ContainerPrimitive {
    pub(crate) fn new(
        name: &str,
        signature: Signature,
        body: impl Fn(&[Value]) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        ContainerPrimitive {
            name: name.into(),
            signature,
            body: Box::new(body),
        }
    }
}

impl PrimitiveLike for ContainerPrimitive {
    fn name(&self) -> Symbol {
        self.name
    }

    fn get_type_constraints(&self) -> Box<dyn TypeConstraint> {
        match &self.signature {
            Signature::Fixed(sorts) => SimpleTypeConstraint::new(self.name, sorts.clone()).into_box(),
            Signature::Variadic { element, output } => AllEqualTypeConstraint::new(self.name)
                .with_all_arguments_sort(element.clone())
                .with_output_sort(output.clone())
                .into_box(),
        }
    }

    fn apply(&self, values: &[Value], _egraph: Option<&mut EGraph>) -> Option<Value> {
        (self.body)(values)
    }
}

/// Parse the single sort argument of a presort like `Set` or `Vec`.
pub(crate) fn sort_argument(
    typeinfo: &TypeInfo,
    presort: Symbol,
    args: &[Expr],
    position: usize,
) -> Result<ArcSort, TypeError> {
    match args.get(position) {
        Some(Expr::Var(name)) => typeinfo
            .get_sort_by_name(name)
            .cloned()
            .ok_or(TypeError::UndefinedSort(*name)),
        Some(other) => Err(TypeError::PresortArgument(presort, other.clone())),
        None => Err(TypeError::PresortArgument(presort, Expr::call(presort, args.to_vec()))),
    }
}

lazy_static! {
    pub(crate) static ref NOT_EQUAL: Symbol = "!=".into();
}

/// `(!= a b)` holds when two values of the same sort differ.
pub(crate) struct NotEqualPrimitive {
    pub(crate) unit: ArcSort,
}

impl PrimitiveLike for NotEqualPrimitive {
    fn name(&self) -> Symbol {
        *NOT_EQUAL
    }

    fn get_type_constraints(&self) -> Box<dyn TypeConstraint> {
        AllEqualTypeConstraint::new(self.name())
            .with_exact_length(3)
            .with_output_sort(self.unit.clone())
            .into_box()
    }

    fn apply(&self, values: &[Value], _egraph: Option<&mut EGraph>) -> Option<Value> {
        (values[0] != values[1]).then(Value::unit)
    }
}
