use std::sync::Mutex;

use super::*;
use crate::util::IndexSet;

type ValueVec = Vec<Value>;

/// Finite sequences of a single element sort: `vec-of`, `vec-empty`,
/// `vec-push`, `vec-get` (fails out of bounds) and `vec-length`.
#[derive(Debug)]
pub struct VecSort {
    name: Symbol,
    element: ArcSort,
    vecs: Mutex<IndexSet<ValueVec>>,
}

impl VecSort {
    pub fn element(&self) -> ArcSort {
        self.element.clone()
    }

    pub(crate) fn load(&self, value: &Value) -> ValueVec {
        let vecs = self.vecs.lock().unwrap();
        vecs.get_index(value.bits as usize).unwrap().clone()
    }

    fn store(&self, vec: ValueVec) -> Value {
        let (i, _) = self.vecs.lock().unwrap().insert_full(vec);
        Value {
            tag: self.name,
            bits: i as u64,
        }
    }
}

impl Presort for VecSort {
    fn presort_name() -> Symbol {
        "Vec".into()
    }

    fn reserved_primitives() -> Vec<Symbol> {
        vec![
            "vec-of".into(),
            "vec-empty".into(),
            "vec-push".into(),
            "vec-get".into(),
            "vec-length".into(),
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
                "Vecs nested with other EqSort containers are not allowed".into(),
            ));
        }
        Ok(Arc::new(Self {
            name,
            element,
            vecs: Default::default(),
        }))
    }
}

impl Sort for VecSort {
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
        let mut vec = self.load(value);
        let mut changed = false;
        for e in vec.iter_mut() {
            changed |= self.element.canonicalize(e, unionfind);
        }
        if changed {
            *value = self.store(vec);
        }
        changed
    }

    #[rustfmt::skip]
    fn register_primitives(self: Arc<Self>, info: &mut TypeInfo) {
        let vec: ArcSort = self.clone();
        let elem = self.element();
        let int: ArcSort = info.get_sort_nofail::<I64Sort>();

        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("vec-empty", Signature::Fixed(vec![vec.clone()]), move |_| {
            Some(s.store(ValueVec::new()))
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("vec-of", Signature::Variadic { element: elem.clone(), output: vec.clone() }, move |xs| {
            Some(s.store(xs.to_vec()))
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("vec-push", Signature::Fixed(vec![vec.clone(), elem.clone(), vec.clone()]), move |args| {
            let mut xs = s.load(&args[0]);
            xs.push(args[1]);
            Some(s.store(xs))
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("vec-get", Signature::Fixed(vec![vec.clone(), int.clone(), elem]), move |args| {
            let i = i64::load(&I64Sort, &args[1]);
            let xs = s.load(&args[0]);
            usize::try_from(i).ok().and_then(|i| xs.get(i).copied())
        }));
        let s = self;
        info.add_primitive(ContainerPrimitive::new("vec-length", Signature::Fixed(vec![vec, int]), move |args| {
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
        let vec = self.load(&value);
        if vec.is_empty() {
            return Some(termdag.app("vec-empty".into(), vec![]));
        }
        let mut children = vec![];
        for e in vec {
            children.push(extractor.extract_value(e, &self.element, termdag)?);
        }
        Some(termdag.app("vec-of".into(), children))
    }
}
