use ordered_float::OrderedFloat;

use super::*;

/// 64-bit floating point numbers supporting these primitives:
/// - Arithmetic: `+`, `-`, `*`, `/`, `%`, `^`, `neg`, `abs`
/// - Comparisons: `<`, `>`, `<=`, `>=`
/// - Other: `min`, `max`, `to-f64`, `to-i64`, `to-string`
#[derive(Debug)]
pub struct F64Sort;

lazy_static! {
    static ref F64_SORT_NAME: Symbol = "f64".into();
}

type F = OrderedFloat<f64>;

impl Sort for F64Sort {
    fn name(&self) -> Symbol {
        *F64_SORT_NAME
    }

    fn as_arc_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync + 'static> {
        self
    }

    #[rustfmt::skip]
    // We need the closure for division and mod operations, as they can panic.
    // cf https://github.com/rust-lang/rust-clippy/issues/9422
    #[allow(clippy::unnecessary_lazy_evaluations)]
    fn register_primitives(self: Arc<Self>, info: &mut TypeInfo) {
        type Opt<T=()> = Option<T>;

        add_primitives!(info, "+" = |a: F, b: F| -> F { a + b });
        add_primitives!(info, "-" = |a: F, b: F| -> F { a - b });
        add_primitives!(info, "*" = |a: F, b: F| -> F { a * b });
        add_primitives!(info, "/" = |a: F, b: F| -> Opt<F> { (b.0 != 0.0).then(|| a / b) });
        add_primitives!(info, "%" = |a: F, b: F| -> Opt<F> { (b.0 != 0.0).then(|| a % b) });
        add_primitives!(info, "^" = |a: F, b: F| -> F { OrderedFloat(a.powf(*b)) });
        add_primitives!(info, "neg" = |a: F| -> F { -a });

        add_primitives!(info, "<" = |a: F, b: F| -> Opt { (a < b).then(|| ()) });
        add_primitives!(info, ">" = |a: F, b: F| -> Opt { (a > b).then(|| ()) });
        add_primitives!(info, "<=" = |a: F, b: F| -> Opt { (a <= b).then(|| ()) });
        add_primitives!(info, ">=" = |a: F, b: F| -> Opt { (a >= b).then(|| ()) });

        add_primitives!(info, "min" = |a: F, b: F| -> F { a.min(b) });
        add_primitives!(info, "max" = |a: F, b: F| -> F { a.max(b) });
        add_primitives!(info, "abs" = |a: F| -> F { OrderedFloat(a.abs()) });

        // `to-f64` belongs with i64, but the f64 sort is registered after it
        add_primitives!(info, "to-f64" = |a: i64| -> F { OrderedFloat(a as f64) });
        add_primitives!(info, "to-i64" = |a: F| -> i64 { a.0 as i64 });
        // Debug formatting always prints the decimal point
        add_primitives!(info, "to-string" = |a: F| -> Symbol { format!("{:?}", a.0).into() });
    }

    fn extract_term(
        &self,
        _egraph: &EGraph,
        value: Value,
        _extractor: &Extractor,
        termdag: &mut TermDag,
    ) -> Option<TermId> {
        Some(termdag.lit(Literal::F64(F::load(self, &value))))
    }
}

impl IntoSort for F {
    type Sort = F64Sort;

    fn store(self, _sort: &Self::Sort) -> Option<Value> {
        Some(Value::from(self))
    }
}

impl FromSort for F {
    type Sort = F64Sort;

    fn load(_sort: &Self::Sort, value: &Value) -> Self {
        OrderedFloat(f64::from_bits(value.bits))
    }
}
