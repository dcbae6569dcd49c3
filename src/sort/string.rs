use std::num::NonZeroU32;

use super::*;

/// Interned strings. `+` concatenates any number of strings and
/// `(replace s from to)` replaces every occurrence of `from`.
#[derive(Debug)]
pub struct StringSort;

lazy_static! {
    static ref STRING_SORT_NAME: Symbol = "String".into();
}

impl Sort for StringSort {
    fn name(&self) -> Symbol {
        *STRING_SORT_NAME
    }

    fn as_arc_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync + 'static> {
        self
    }

    fn extract_term(
        &self,
        _egraph: &EGraph,
        value: Value,
        _extractor: &Extractor,
        termdag: &mut TermDag,
    ) -> Option<TermId> {
        let sym = Symbol::load(self, &value);
        Some(termdag.lit(Literal::String(sym)))
    }

    fn register_primitives(self: Arc<Self>, info: &mut TypeInfo) {
        info.add_primitive(Add {
            name: "+".into(),
            string: self.clone(),
        });
        info.add_primitive(Replace {
            name: "replace".into(),
            string: self,
        });
    }
}

impl IntoSort for Symbol {
    type Sort = StringSort;

    fn store(self, _sort: &Self::Sort) -> Option<Value> {
        Some(Value::from(self))
    }
}

impl FromSort for Symbol {
    type Sort = StringSort;

    fn load(_sort: &Self::Sort, value: &Value) -> Self {
        NonZeroU32::new(value.bits as u32)
            .map(Symbol::from)
            .unwrap_or_else(|| panic!("invalid string value {value:?}"))
    }
}

struct Add {
    name: Symbol,
    string: Arc<StringSort>,
}

impl PrimitiveLike for Add {
    fn name(&self) -> Symbol {
        self.name
    }

    fn get_type_constraints(&self) -> Box<dyn TypeConstraint> {
        AllEqualTypeConstraint::new(self.name())
            .with_all_arguments_sort(self.string.clone())
            .into_box()
    }

    fn apply(&self, values: &[Value], _egraph: Option<&mut EGraph>) -> Option<Value> {
        let mut res = String::new();
        for value in values {
            res.push_str(Symbol::load(&self.string, value).as_str());
        }
        Symbol::from(res).store(&self.string)
    }
}

struct Replace {
    name: Symbol,
    string: Arc<StringSort>,
}

impl PrimitiveLike for Replace {
    fn name(&self) -> Symbol {
        self.name
    }

    fn get_type_constraints(&self) -> Box<dyn TypeConstraint> {
        AllEqualTypeConstraint::new(self.name())
            .with_all_arguments_sort(self.string.clone())
            .with_exact_length(4)
            .into_box()
    }

    fn apply(&self, values: &[Value], _egraph: Option<&mut EGraph>) -> Option<Value> {
        let string = Symbol::load(&self.string, &values[0]);
        let from = Symbol::load(&self.string, &values[1]);
        let to = Symbol::load(&self.string, &values[2]);
        let res: Symbol = string.as_str().replace(from.as_str(), to.as_str()).into();
        res.store(&self.string)
    }
}
