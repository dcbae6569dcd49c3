//! Union-find over e-class ids, with union by size and path halving.
//!
//! Besides the parent table, the union-find remembers which ids stopped
//! being roots since the last rebuild round. Those "dirty" ids are staged on
//! every union and handed to the relation store in batches: see
//! [`UnionFind::clear_recent_ids`].
use std::fmt::{self, Debug, Display};

use crate::{ast::Symbol, util::HashMap, Value};

/// An opaque e-class identifier.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u32);

impl From<usize> for Id {
    fn from(n: usize) -> Id {
        Id(n as u32)
    }
}

impl From<Id> for usize {
    fn from(id: Id) -> usize {
        id.0 as usize
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id{}", self.0)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnionFind {
    parents: Vec<Id>,
    sizes: Vec<u32>,
    n_unions: usize,
    recent_ids: HashMap<Symbol, Vec<Id>>,
    staged_ids: HashMap<Symbol, Vec<Id>>,
}

impl UnionFind {
    /// The number of ids ever created.
    pub fn size(&self) -> usize {
        self.parents.len()
    }

    /// The number of unions that merged two distinct classes.
    pub fn n_unions(&self) -> usize {
        self.n_unions
    }

    /// Create a fresh singleton class.
    pub fn make_set(&mut self) -> Id {
        let id = Id::from(self.parents.len());
        self.parents.push(id);
        self.sizes.push(1);
        id
    }

    fn parent(&self, query: Id) -> Id {
        match self.parents.get(usize::from(query)) {
            Some(parent) => *parent,
            None => panic!("find on unknown id {query:?}"),
        }
    }

    /// Find the canonical representative without compressing paths.
    pub fn find(&self, mut current: Id) -> Id {
        let mut parent = self.parent(current);
        while current != parent {
            current = parent;
            parent = self.parent(current);
        }
        current
    }

    /// Find the canonical representative, halving the path on the way up.
    pub fn find_mut(&mut self, mut current: Id) -> Id {
        loop {
            let parent = self.parent(current);
            if current == parent {
                return current;
            }
            let grandparent = self.parent(parent);
            self.parents[usize::from(current)] = grandparent;
            current = grandparent;
        }
    }

    /// Merge the classes of `id1` and `id2`; the larger class survives and the
    /// first argument wins ties. The losing root is recorded as dirty for `sort`.
    pub fn union(&mut self, id1: Id, id2: Id, sort: Symbol) -> Id {
        let root1 = self.find_mut(id1);
        let root2 = self.find_mut(id2);
        if root1 == root2 {
            return root1;
        }
        let (winner, loser) = if self.sizes[usize::from(root1)] >= self.sizes[usize::from(root2)] {
            (root1, root2)
        } else {
            (root2, root1)
        };
        self.parents[usize::from(loser)] = winner;
        self.sizes[usize::from(winner)] += self.sizes[usize::from(loser)];
        self.n_unions += 1;
        self.staged_ids.entry(sort).or_default().push(loser);
        winner
    }

    pub fn union_values(&mut self, val1: Value, val2: Value, sort: Symbol) -> Value {
        debug_assert_eq!(val1.tag, val2.tag);
        let id = self.union(val1.id(), val2.id(), sort);
        Value::from_id(val1.tag, id)
    }

    pub fn find_value(&self, value: Value) -> Value {
        Value::from_id(value.tag, self.find(value.id()))
    }

    /// Whether any union happened since the last call to
    /// [`UnionFind::clear_recent_ids`].
    pub fn is_dirty(&self) -> bool {
        self.staged_ids.values().any(|ids| !ids.is_empty())
    }

    /// Whether the current rebuild round has any dirty ids to process.
    pub(crate) fn has_recent_ids(&self) -> bool {
        self.recent_ids.values().any(|ids| !ids.is_empty())
    }

    /// Drain the staged dirty ids into the set consumed by the next rebuild
    /// round, forgetting the ids of the previous round.
    pub(crate) fn clear_recent_ids(&mut self) {
        std::mem::swap(&mut self.recent_ids, &mut self.staged_ids);
        self.staged_ids.values_mut().for_each(Vec::clear);
    }

    /// Ids of `sort` that stopped being roots before the current rebuild round.
    pub(crate) fn dirty_ids(&self, sort: Symbol) -> impl Iterator<Item = Id> + '_ {
        self.recent_ids
            .get(&sort)
            .into_iter()
            .flat_map(|ids| ids.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(us: impl IntoIterator<Item = usize>) -> Vec<Id> {
        us.into_iter().map(|u| u.into()).collect()
    }

    #[test]
    fn union_find() {
        let n = 10;
        let sort = Symbol::from("T");
        let mut uf = UnionFind::default();
        for _ in 0..n {
            uf.make_set();
        }

        // test the initial condition of everyone in their own set
        assert_eq!(uf.parents, ids(0..n));

        // build up one set
        uf.union(Id::from(0), Id::from(1), sort);
        uf.union(Id::from(0), Id::from(2), sort);
        uf.union(Id::from(0), Id::from(3), sort);

        // build up another set
        uf.union(Id::from(6), Id::from(7), sort);
        uf.union(Id::from(6), Id::from(8), sort);
        uf.union(Id::from(6), Id::from(9), sort);

        // this should compress all paths
        for i in 0..n {
            uf.find_mut(Id::from(i));
        }

        // indexes:         0, 1, 2, 3, 4, 5, 6, 7, 8, 9
        let expected = vec![0, 0, 0, 0, 4, 5, 6, 6, 6, 6];
        assert_eq!(uf.parents, ids(expected));
        assert_eq!(uf.n_unions(), 6);
    }

    #[test]
    fn union_by_size_keeps_larger_root() {
        let sort = Symbol::from("T");
        let mut uf = UnionFind::default();
        let a = uf.make_set();
        let b = uf.make_set();
        let c = uf.make_set();
        uf.union(b, c, sort);
        // {b, c} is larger than {a}, so b stays the root even as the second argument
        assert_eq!(uf.union(a, b, sort), b);
        assert_eq!(uf.find(a), b);
    }

    #[test]
    fn find_is_idempotent() {
        let sort = Symbol::from("T");
        let mut uf = UnionFind::default();
        let xs: Vec<Id> = (0..20).map(|_| uf.make_set()).collect();
        for pair in xs.chunks(3) {
            uf.union(pair[0], pair[pair.len() - 1], sort);
        }
        uf.union(xs[0], xs[19], sort);
        for &x in &xs {
            let root = uf.find(x);
            assert_eq!(uf.find(root), root);
            assert_eq!(uf.find_mut(x), root);
        }
    }

    #[test]
    fn dirty_ids_are_staged_per_round() {
        let sort = Symbol::from("T");
        let mut uf = UnionFind::default();
        let a = uf.make_set();
        let b = uf.make_set();
        assert!(!uf.is_dirty());
        uf.union(a, b, sort);
        assert!(uf.is_dirty());
        assert_eq!(uf.dirty_ids(sort).count(), 0);

        uf.clear_recent_ids();
        assert!(!uf.is_dirty());
        assert_eq!(uf.dirty_ids(sort).collect::<Vec<_>>(), vec![b]);

        uf.clear_recent_ids();
        assert!(!uf.has_recent_ids());
    }

    #[test]
    #[should_panic]
    fn find_unknown_id_panics() {
        let uf = UnionFind::default();
        uf.find(Id::from(3));
    }
}
