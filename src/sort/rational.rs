use num::traits::{Signed, ToPrimitive, Zero};
use num::BigRational;
use std::sync::Mutex;

use crate::util::IndexSet;

use super::*;

type R = BigRational;

/// Arbitrary-precision rationals, interned by the sort. Built with
/// `(rational num den)` from two integers.
#[derive(Debug, Default)]
pub struct RationalSort {
    rats: Mutex<IndexSet<R>>,
}

lazy_static! {
    static ref RATIONAL_SORT_NAME: Symbol = "Rational".into();
}

impl Sort for RationalSort {
    fn name(&self) -> Symbol {
        *RATIONAL_SORT_NAME
    }

    fn as_arc_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync + 'static> {
        self
    }

    #[rustfmt::skip]
    fn register_primitives(self: Arc<Self>, info: &mut TypeInfo) {
        type Opt<T=()> = Option<T>;

        add_primitives!(info, "+" = |a: R, b: R| -> R { a + b });
        add_primitives!(info, "-" = |a: R, b: R| -> R { a - b });
        add_primitives!(info, "*" = |a: R, b: R| -> R { a * b });
        add_primitives!(info, "/" = |a: R, b: R| -> Opt<R> { (!b.is_zero()).then(|| a / b) });
        add_primitives!(info, "neg" = |a: R| -> R { -a });
        add_primitives!(info, "abs" = |a: R| -> R { a.abs() });

        add_primitives!(info, "min" = |a: R, b: R| -> R { a.min(b) });
        add_primitives!(info, "max" = |a: R, b: R| -> R { a.max(b) });

        add_primitives!(info, "<" = |a: R, b: R| -> Opt { (a < b).then_some(()) });
        add_primitives!(info, ">" = |a: R, b: R| -> Opt { (a > b).then_some(()) });
        add_primitives!(info, "<=" = |a: R, b: R| -> Opt { (a <= b).then_some(()) });
        add_primitives!(info, ">=" = |a: R, b: R| -> Opt { (a >= b).then_some(()) });

        add_primitives!(info, "rational" = |a: i64, b: i64| -> Opt<R> { (b != 0).then(|| R::new(a.into(), b.into())) });
        add_primitives!(info, "numer" = |a: R| -> Opt<i64> { a.numer().to_i64() });
        add_primitives!(info, "denom" = |a: R| -> Opt<i64> { a.denom().to_i64() });
        add_primitives!(info, "to-f64" = |a: R| -> Opt<OrderedFloat<f64>> { a.to_f64().map(OrderedFloat) });
    }

    fn extract_term(
        &self,
        _egraph: &EGraph,
        value: Value,
        _extractor: &Extractor,
        termdag: &mut TermDag,
    ) -> Option<TermId> {
        let rat = R::load(self, &value);
        let numer = termdag.lit(Literal::Int(rat.numer().to_i64()?));
        let denom = termdag.lit(Literal::Int(rat.denom().to_i64()?));
        Some(termdag.app("rational".into(), vec![numer, denom]))
    }
}

impl FromSort for R {
    type Sort = RationalSort;

    fn load(sort: &Self::Sort, value: &Value) -> Self {
        let i = value.bits as usize;
        sort.rats.lock().unwrap().get_index(i).unwrap().clone()
    }
}

impl IntoSort for R {
    type Sort = RationalSort;

    fn store(self, sort: &Self::Sort) -> Option<Value> {
        let (i, _) = sort.rats.lock().unwrap().insert_full(self);
        Some(Value {
            tag: sort.name(),
            bits: i as u64,
        })
    }
}
