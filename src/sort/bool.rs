use super::*;

/// Booleans, with `not`, `and`, `or`, `xor` and `=>`.
#[derive(Debug)]
pub struct BoolSort;

lazy_static! {
    static ref BOOL_SORT_NAME: Symbol = "bool".into();
}

impl Sort for BoolSort {
    fn name(&self) -> Symbol {
        *BOOL_SORT_NAME
    }

    fn as_arc_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync + 'static> {
        self
    }

    #[rustfmt::skip]
    fn register_primitives(self: Arc<Self>, info: &mut TypeInfo) {
        add_primitives!(info, "not" = |a: bool| -> bool { !a });
        add_primitives!(info, "and" = |a: bool, b: bool| -> bool { a && b });
        add_primitives!(info, "or" = |a: bool, b: bool| -> bool { a || b });
        add_primitives!(info, "xor" = |a: bool, b: bool| -> bool { a ^ b });
        add_primitives!(info, "=>" = |a: bool, b: bool| -> bool { !a || b });
    }

    fn extract_term(
        &self,
        _egraph: &EGraph,
        value: Value,
        _extractor: &Extractor,
        termdag: &mut TermDag,
    ) -> Option<TermId> {
        Some(termdag.lit(Literal::Bool(value.bits > 0)))
    }
}

impl IntoSort for bool {
    type Sort = BoolSort;

    fn store(self, _sort: &Self::Sort) -> Option<Value> {
        Some(Value::from(self))
    }
}

impl FromSort for bool {
    type Sort = BoolSort;

    fn load(_sort: &Self::Sort, value: &Value) -> Self {
        value.bits != 0
    }
}
