use super::*;

/// Signed 64-bit integers supporting these primitives:
/// - Arithmetic: `+`, `-`, `*`, `/`, `%`
/// - Bitwise: `&`, `|`, `^`, `<<`, `>>`, `not-i64`
/// - Fallible comparisons: `<`, `>`, `<=`, `>=`
/// - Boolean comparisons: `bool-=`, `bool-<`, `bool->`, `bool-<=`, `bool->=`
/// - Other: `min`, `max`, `to-string`, `log2`, `count-matches`
///
/// Fallible comparisons are meant for the top level of a query: the rule
/// `(rule ((< a b)) (...))` only matches when `a` is less than `b`. Boolean
/// comparisons always succeed, so they make sense inside expressions.
///
/// Arithmetic that overflows fails the same way.
#[derive(Debug)]
pub struct I64Sort;

lazy_static! {
    static ref I64_SORT_NAME: Symbol = "i64".into();
}

impl Sort for I64Sort {
    fn name(&self) -> Symbol {
        *I64_SORT_NAME
    }

    fn as_arc_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync + 'static> {
        self
    }

    #[rustfmt::skip]
    fn register_primitives(self: Arc<Self>, info: &mut TypeInfo) {
        type Opt<T=()> = Option<T>;

        add_primitives!(info, "+" = |a: i64, b: i64| -> Opt<i64> { a.checked_add(b) });
        add_primitives!(info, "-" = |a: i64, b: i64| -> Opt<i64> { a.checked_sub(b) });
        add_primitives!(info, "*" = |a: i64, b: i64| -> Opt<i64> { a.checked_mul(b) });
        add_primitives!(info, "/" = |a: i64, b: i64| -> Opt<i64> { a.checked_div(b) });
        add_primitives!(info, "%" = |a: i64, b: i64| -> Opt<i64> { a.checked_rem(b) });

        add_primitives!(info, "&" = |a: i64, b: i64| -> i64 { a & b });
        add_primitives!(info, "|" = |a: i64, b: i64| -> i64 { a | b });
        add_primitives!(info, "^" = |a: i64, b: i64| -> i64 { a ^ b });
        add_primitives!(info, "<<" = |a: i64, b: i64| -> Opt<i64> { b.try_into().ok().and_then(|b| a.checked_shl(b)) });
        add_primitives!(info, ">>" = |a: i64, b: i64| -> Opt<i64> { b.try_into().ok().and_then(|b| a.checked_shr(b)) });
        add_primitives!(info, "not-i64" = |a: i64| -> i64 { !a });

        add_primitives!(info, "log2" = |a: i64| -> Opt<i64> { (a > 0).then(|| a.ilog2() as i64) });

        add_primitives!(info, "<" = |a: i64, b: i64| -> Opt { (a < b).then_some(()) });
        add_primitives!(info, ">" = |a: i64, b: i64| -> Opt { (a > b).then_some(()) });
        add_primitives!(info, "<=" = |a: i64, b: i64| -> Opt { (a <= b).then_some(()) });
        add_primitives!(info, ">=" = |a: i64, b: i64| -> Opt { (a >= b).then_some(()) });

        add_primitives!(info, "bool-=" = |a: i64, b: i64| -> bool { a == b });
        add_primitives!(info, "bool-<" = |a: i64, b: i64| -> bool { a < b });
        add_primitives!(info, "bool->" = |a: i64, b: i64| -> bool { a > b });
        add_primitives!(info, "bool-<=" = |a: i64, b: i64| -> bool { a <= b });
        add_primitives!(info, "bool->=" = |a: i64, b: i64| -> bool { a >= b });

        add_primitives!(info, "min" = |a: i64, b: i64| -> i64 { a.min(b) });
        add_primitives!(info, "max" = |a: i64, b: i64| -> i64 { a.max(b) });

        add_primitives!(info, "to-string" = |a: i64| -> Symbol { a.to_string().into() });

        // lives here because the string sort is registered before the i64 sort
        info.add_primitive(CountMatches {
            name: "count-matches".into(),
            string: info.get_sort_nofail(),
            int: self,
        });
    }

    fn extract_term(
        &self,
        _egraph: &EGraph,
        value: Value,
        _extractor: &Extractor,
        termdag: &mut TermDag,
    ) -> Option<TermId> {
        Some(termdag.lit(Literal::Int(value.bits as _)))
    }
}

impl IntoSort for i64 {
    type Sort = I64Sort;

    fn store(self, _sort: &Self::Sort) -> Option<Value> {
        Some(Value::from(self))
    }
}

impl FromSort for i64 {
    type Sort = I64Sort;

    fn load(_sort: &Self::Sort, value: &Value) -> Self {
        value.bits as Self
    }
}

/// `(count-matches haystack needle)`: the number of non-overlapping
/// occurrences of `needle`.
struct CountMatches {
    name: Symbol,
    string: Arc<StringSort>,
    int: Arc<I64Sort>,
}

impl PrimitiveLike for CountMatches {
    fn name(&self) -> Symbol {
        self.name
    }

    fn get_type_constraints(&self) -> Box<dyn TypeConstraint> {
        AllEqualTypeConstraint::new(self.name())
            .with_all_arguments_sort(self.string.clone())
            .with_exact_length(3)
            .with_output_sort(self.int.clone())
            .into_box()
    }

    fn apply(&self, values: &[Value], _egraph: Option<&mut EGraph>) -> Option<Value> {
        let haystack = Symbol::load(&self.string, &values[0]);
        let needle = Symbol::load(&self.string, &values[1]);
        if needle.as_str().is_empty() {
            return None;
        }
        Some(Value::from(
            haystack.as_str().matches(needle.as_str()).count() as i64,
        ))
    }
}
