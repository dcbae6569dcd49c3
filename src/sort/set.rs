use std::collections::BTreeSet;
use std::sync::Mutex;

use super::*;
use crate::util::IndexSet;

type ValueSet = BTreeSet<Value>;

/// Finite sets of a single element sort, supporting these primitives:
/// - `set-of`, `set-empty`, `set-insert`, `set-remove`, `set-union`
/// - `set-contains`, `set-not-contains` (fallible checks)
/// - `set-length`
#[derive(Debug)]
pub struct SetSort {
    name: Symbol,
    element: ArcSort,
    sets: Mutex<IndexSet<ValueSet>>,
}

impl SetSort {
    pub fn element(&self) -> ArcSort {
        self.element.clone()
    }

    fn load(&self, value: &Value) -> ValueSet {
        let sets = self.sets.lock().unwrap();
        sets.get_index(value.bits as usize).unwrap().clone()
    }

    fn store(&self, set: ValueSet) -> Value {
        let (i, _) = self.sets.lock().unwrap().insert_full(set);
        Value {
            tag: self.name,
            bits: i as u64,
        }
    }
}

impl Presort for SetSort {
    fn presort_name() -> Symbol {
        "Set".into()
    }

    fn reserved_primitives() -> Vec<Symbol> {
        vec![
            "set-of".into(),
            "set-empty".into(),
            "set-insert".into(),
            "set-not-contains".into(),
            "set-contains".into(),
            "set-remove".into(),
            "set-union".into(),
            "set-length".into(),
        ]
    }

    fn make_sort(
        typeinfo: &mut TypeInfo,
        name: Symbol,
        args: &[Expr],
    ) -> Result<ArcSort, TypeError> {
        if args.len() != 1 {
            return Err(TypeError::PresortArgument(
                Self::presort_name(),
                Expr::call(name, args.to_vec()),
            ));
        }
        let element = sort_argument(typeinfo, Self::presort_name(), args, 0)?;
        if element.is_eq_container_sort() {
            return Err(TypeError::DisallowedSort(
                name,
                "Sets nested with other EqSort containers are not allowed".into(),
            ));
        }
        Ok(Arc::new(Self {
            name,
            element,
            sets: Default::default(),
        }))
    }
}

impl Sort for SetSort {
    fn name(&self) -> Symbol {
        self.name
    }

    fn as_arc_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync + 'static> {
        self
    }

    fn is_container_sort(&self) -> bool {
        true
    }

    fn is_eq_container_sort(&self) -> bool {
        self.element.is_eq_sort()
    }

    fn inner_values(&self, value: &Value) -> Vec<(ArcSort, Value)> {
        self.load(value)
            .into_iter()
            .map(|e| (self.element.clone(), e))
            .collect()
    }

    fn canonicalize(&self, value: &mut Value, unionfind: &UnionFind) -> bool {
        let set = self.load(value);
        let mut changed = false;
        let new_set: ValueSet = set
            .into_iter()
            .map(|mut e| {
                changed |= self.element.canonicalize(&mut e, unionfind);
                e
            })
            .collect();
        if changed {
            *value = self.store(new_set);
        }
        changed
    }

    #[rustfmt::skip]
    fn register_primitives(self: Arc<Self>, info: &mut TypeInfo) {
        let set: ArcSort = self.clone();
        let elem = self.element();
        let int: ArcSort = info.get_sort_nofail::<I64Sort>();
        let unit: ArcSort = info.get_sort_nofail::<UnitSort>();

        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("set-empty", Signature::Fixed(vec![set.clone()]), move |_| {
            Some(s.store(ValueSet::new()))
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("set-of", Signature::Variadic { element: elem.clone(), output: set.clone() }, move |xs| {
            Some(s.store(xs.iter().copied().collect()))
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("set-insert", Signature::Fixed(vec![set.clone(), elem.clone(), set.clone()]), move |args| {
            let mut xs = s.load(&args[0]);
            xs.insert(args[1]);
            Some(s.store(xs))
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("set-remove", Signature::Fixed(vec![set.clone(), elem.clone(), set.clone()]), move |args| {
            let mut xs = s.load(&args[0]);
            xs.remove(&args[1]);
            Some(s.store(xs))
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("set-union", Signature::Fixed(vec![set.clone(), set.clone(), set.clone()]), move |args| {
            let mut xs = s.load(&args[0]);
            xs.extend(s.load(&args[1]));
            Some(s.store(xs))
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("set-contains", Signature::Fixed(vec![set.clone(), elem.clone(), unit.clone()]), move |args| {
            s.load(&args[0]).contains(&args[1]).then(Value::unit)
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("set-not-contains", Signature::Fixed(vec![set.clone(), elem, unit]), move |args| {
            (!s.load(&args[0]).contains(&args[1])).then(Value::unit)
        }));
        let s = self;
        info.add_primitive(ContainerPrimitive::new("set-length", Signature::Fixed(vec![set, int]), move |args| {
            Some(Value::from(s.load(&args[0]).len() as i64))
        }));
    }

    fn extract_term(
        &self,
        _egraph: &EGraph,
        value: Value,
        extractor: &Extractor,
        termdag: &mut TermDag,
    ) -> Option<TermId> {
        let set = self.load(&value);
        if set.is_empty() {
            return Some(termdag.app("set-empty".into(), vec![]));
        }
        let mut children = vec![];
        for e in set {
            children.push(extractor.extract_value(e, &self.element, termdag)?);
        }
        Some(termdag.app("set-of".into(), children))
    }
}
