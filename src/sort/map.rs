use std::collections::BTreeMap;
use std::sync::Mutex;

use super::*;
use crate::util::IndexSet;

type ValueMap = BTreeMap<Value, Value>;

/// Finite maps from a key sort to a value sort, supporting these primitives:
/// - `map-empty`, `map-insert`, `map-remove`
/// - `map-get` (fails when the key is absent)
/// - `map-contains`, `map-not-contains` (fallible checks)
/// - `map-length`
///
/// Maps are printed as a chain of insertions into `(map-empty)`, in key order.
#[derive(Debug)]
pub struct MapSort {
    name: Symbol,
    key: ArcSort,
    value: ArcSort,
    maps: Mutex<IndexSet<ValueMap>>,
}

impl MapSort {
    pub fn key(&self) -> ArcSort {
        self.key.clone()
    }

    pub fn value(&self) -> ArcSort {
        self.value.clone()
    }

    fn load(&self, value: &Value) -> ValueMap {
        let maps = self.maps.lock().unwrap();
        maps.get_index(value.bits as usize).unwrap().clone()
    }

    fn store(&self, map: ValueMap) -> Value {
        let (i, _) = self.maps.lock().unwrap().insert_full(map);
        Value {
            tag: self.name,
            bits: i as u64,
        }
    }
}

impl Presort for MapSort {
    fn presort_name() -> Symbol {
        "Map".into()
    }

    fn reserved_primitives() -> Vec<Symbol> {
        vec![
            "map-empty".into(),
            "map-insert".into(),
            "map-get".into(),
            "map-not-contains".into(),
            "map-contains".into(),
            "map-remove".into(),
            "map-length".into(),
        ]
    }

    fn make_sort(
        typeinfo: &mut TypeInfo,
        name: Symbol,
        args: &[Expr],
    ) -> Result<ArcSort, TypeError> {
        if args.len() != 2 {
            return Err(TypeError::PresortArgument(
                Self::presort_name(),
                Expr::call(name, args.to_vec()),
            ));
        }
        let key = sort_argument(typeinfo, Self::presort_name(), args, 0)?;
        let value = sort_argument(typeinfo, Self::presort_name(), args, 1)?;
        if key.is_eq_container_sort() || value.is_eq_container_sort() {
            return Err(TypeError::DisallowedSort(
                name,
                "Maps nested with other EqSort containers are not allowed".into(),
            ));
        }
        Ok(Arc::new(Self {
            name,
            key,
            value,
            maps: Default::default(),
        }))
    }
}

impl Sort for MapSort {
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
        self.key.is_eq_sort() || self.value.is_eq_sort()
    }

    fn inner_values(&self, value: &Value) -> Vec<(ArcSort, Value)> {
        let mut result = vec![];
        for (k, v) in self.load(value) {
            result.push((self.key.clone(), k));
            result.push((self.value.clone(), v));
        }
        result
    }

    fn canonicalize(&self, value: &mut Value, unionfind: &UnionFind) -> bool {
        let map = self.load(value);
        let mut changed = false;
        // keys that collapse together keep the binding of the larger original key
        let new_map: ValueMap = map
            .into_iter()
            .map(|(mut k, mut v)| {
                changed |= self.key.canonicalize(&mut k, unionfind);
                changed |= self.value.canonicalize(&mut v, unionfind);
                (k, v)
            })
            .collect();
        if changed {
            *value = self.store(new_map);
        }
        changed
    }

    #[rustfmt::skip]
    fn register_primitives(self: Arc<Self>, info: &mut TypeInfo) {
        let map: ArcSort = self.clone();
        let key = self.key();
        let val = self.value();
        let int: ArcSort = info.get_sort_nofail::<I64Sort>();
        let unit: ArcSort = info.get_sort_nofail::<UnitSort>();

        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("map-empty", Signature::Fixed(vec![map.clone()]), move |_| {
            Some(s.store(ValueMap::new()))
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("map-insert", Signature::Fixed(vec![map.clone(), key.clone(), val.clone(), map.clone()]), move |args| {
            let mut m = s.load(&args[0]);
            m.insert(args[1], args[2]);
            Some(s.store(m))
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("map-get", Signature::Fixed(vec![map.clone(), key.clone(), val]), move |args| {
            s.load(&args[0]).get(&args[1]).copied()
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("map-contains", Signature::Fixed(vec![map.clone(), key.clone(), unit.clone()]), move |args| {
            s.load(&args[0]).contains_key(&args[1]).then(Value::unit)
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("map-not-contains", Signature::Fixed(vec![map.clone(), key.clone(), unit]), move |args| {
            (!s.load(&args[0]).contains_key(&args[1])).then(Value::unit)
        }));
        let s = self.clone();
        info.add_primitive(ContainerPrimitive::new("map-remove", Signature::Fixed(vec![map.clone(), key, map.clone()]), move |args| {
            let mut m = s.load(&args[0]);
            m.remove(&args[1]);
            Some(s.store(m))
        }));
        let s = self;
        info.add_primitive(ContainerPrimitive::new("map-length", Signature::Fixed(vec![map, int]), move |args| {
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
        let mut term = termdag.app("map-empty".into(), vec![]);
        for (k, v) in self.load(&value) {
            let k = extractor.extract_value(k, &self.key, termdag)?;
            let v = extractor.extract_value(v, &self.value, termdag)?;
            term = termdag.app("map-insert".into(), vec![term, k, v]);
        }
        Some(term)
    }
}
