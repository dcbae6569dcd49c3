//! Column-level indexes on values from a common eq sort.
//!
//! An index maps the bits of an e-class id to the table offsets of the rows
//! that mention it in one column. Rebuilding uses them to find the rows that
//! reference ids which stopped being canonical.
use smallvec::SmallVec;

use crate::{ast::Symbol, unionfind::UnionFind, util::HashMap, Value};

pub(crate) type Offset = u32;

#[derive(Clone, Debug)]
pub(crate) struct ColumnIndex {
    sort: Symbol,
    ids: HashMap<u64, SmallVec<[Offset; 8]>>,
}

impl ColumnIndex {
    pub(crate) fn new(sort: Symbol) -> ColumnIndex {
        ColumnIndex {
            sort,
            ids: Default::default(),
        }
    }

    pub(crate) fn add(&mut self, v: Value, i: usize) {
        debug_assert_eq!(v.tag, self.sort);
        self.ids.entry(v.bits).or_default().push(i as Offset);
    }

    pub(crate) fn clear(&mut self) {
        self.ids.clear()
    }

    pub(crate) fn get(&self, v: &Value) -> &[Offset] {
        self.ids.get(&v.bits).map(|x| x.as_slice()).unwrap_or(&[])
    }

    /// Offsets of the rows mentioning an id that became non-canonical in the
    /// current rebuild round. Offsets may repeat and may point at stale rows.
    pub(crate) fn to_canonicalize<'a>(
        &'a self,
        uf: &'a UnionFind,
    ) -> impl Iterator<Item = usize> + 'a {
        uf.dirty_ids(self.sort).flat_map(move |id| {
            self.get(&Value::from_id(self.sort, id))
                .iter()
                .map(|off| *off as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_rows_of_dirty_ids() {
        let sort = Symbol::from("T");
        let mut uf = UnionFind::default();
        let a = uf.make_set();
        let b = uf.make_set();
        let mut index = ColumnIndex::new(sort);
        index.add(Value::from_id(sort, a), 0);
        index.add(Value::from_id(sort, b), 1);
        index.add(Value::from_id(sort, b), 4);

        assert_eq!(index.to_canonicalize(&uf).count(), 0);
        uf.union(a, b, sort);
        uf.clear_recent_ids();
        let mut offsets: Vec<usize> = index.to_canonicalize(&uf).collect();
        offsets.sort();
        assert_eq!(offsets, vec![1, 4]);
    }
}
