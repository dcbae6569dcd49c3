//! A table type used to represent functions.
//!
//! Tables are essentially hash tables mapping from vectors of values to values,
//! but they make different trade-offs than standard HashMaps or IndexMaps:
//!
//! * Like indexmap, tables preserve insertion order and support lookups based on
//!   vector-like "offsets" in addition to table keys.
//!
//! * Unlike indexmap, these tables support constant-time removals that preserve
//!   insertion order. Removals merely mark entries as "stale."
//!
//! These features come at the cost of needing to periodically rehash the table.
//! These rehashes must be done explicitly because they perturb the integer
//! table offsets that are otherwise stable. Column-level indexes use raw
//! offsets into the table, and they need to be rebuilt when a rehash happens.
//!
//! Because rows are only ever appended with a non-decreasing timestamp, tables
//! are sorted by timestamp, which makes it cheap to iterate over the rows
//! inserted in a given timestamp range.
use std::{
    hash::{Hash, Hasher},
    mem,
    ops::Range,
};

use hashbrown::HashTable;
use rustc_hash::FxHasher;

use super::binary_search::binary_search_table_by_key;
use crate::{TupleOutput, Value, ValueVec};

type Offset = usize;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
struct TableOffset {
    // Hashes are stored inline in the table to avoid cache misses during
    // probing, and to avoid `vals` lookups entirely during rehashes.
    hash: u64,
    off: Offset,
}

#[derive(Default, Clone, Debug)]
pub(crate) struct Table {
    max_ts: u32,
    n_stale: usize,
    table: HashTable<TableOffset>,
    vals: Vec<(Input, TupleOutput)>,
}

impl Table {
    /// Clear the contents of the table.
    #[cfg(test)]
    pub(crate) fn clear(&mut self) {
        self.max_ts = 0;
        self.n_stale = 0;
        self.table.clear();
        self.vals.clear();
    }

    /// Indicates whether or not the table should be rehashed.
    pub(crate) fn too_stale(&self) -> bool {
        self.n_stale > (self.vals.len() / 2)
    }

    /// Rehashes the table, invalidating any offsets stored into the table.
    pub(crate) fn rehash(&mut self) {
        let mut dst = 0usize;
        self.table.clear();
        self.vals.retain(|(inp, _)| {
            if inp.live() {
                let hash = hash_values(inp.data());
                self.table
                    .insert_unique(hash, TableOffset { hash, off: dst }, |to| to.hash);
                dst += 1;
                true
            } else {
                false
            }
        });
        self.n_stale = 0;
    }

    /// Get the entry in the table for the given values, if they are in the
    /// table.
    pub(crate) fn get(&self, inputs: &[Value]) -> Option<&TupleOutput> {
        let hash = hash_values(inputs);
        let TableOffset { off, .. } = self
            .table
            .find(hash, |to| to.hash == hash && self.vals[to.off].0.data() == inputs)?;
        debug_assert!(self.vals[*off].0.live());
        Some(&self.vals[*off].1)
    }

    /// Insert the given data into the table at the given timestamp. Return the
    /// previous value, if there was one.
    pub(crate) fn insert(&mut self, inputs: &[Value], out: Value, ts: u32) -> Option<Value> {
        let mut res = None;
        self.insert_and_merge(inputs, ts, false, |prev| {
            res = prev;
            out
        });
        res
    }

    /// Insert the given data into the table at the given timestamp. This method
    /// allows for efficient 'merges', conditional on the previous value mapped
    /// to by the given inputs.
    ///
    /// * `on_merge(None)` should return the value mapping to the given slot.
    /// * `on_merge(Some(x))` can return a "merged" value (e.g. the union
    ///   of `x` and `on_merge(None)`).
    ///
    /// Subsumption is sticky: a row that was subsumed stays subsumed.
    pub(crate) fn insert_and_merge(
        &mut self,
        inputs: &[Value],
        ts: u32,
        subsumed: bool,
        on_merge: impl FnOnce(Option<Value>) -> Value,
    ) {
        assert!(ts >= self.max_ts);
        let hash = hash_values(inputs);
        if let Some(to) = self
            .table
            .find_mut(hash, |to| to.hash == hash && self.vals[to.off].0.data() == inputs)
        {
            let (inp, prev) = &mut self.vals[to.off];
            let next = on_merge(Some(prev.value));
            let subsumed = subsumed || prev.subsumed;
            if next == prev.value && subsumed == prev.subsumed {
                return;
            }
            self.max_ts = ts;
            inp.stale_at = ts;
            self.n_stale += 1;
            let k = mem::take(&mut inp.data);
            let new_offset = self.vals.len();
            self.vals.push((
                Input::new(k),
                TupleOutput {
                    value: next,
                    timestamp: ts,
                    subsumed,
                },
            ));
            to.off = new_offset;
            return;
        }
        self.max_ts = ts;
        let new_offset = self.vals.len();
        self.vals.push((
            Input::new(inputs.into()),
            TupleOutput {
                value: on_merge(None),
                timestamp: ts,
                subsumed,
            },
        ));
        self.table.insert_unique(
            hash,
            TableOffset {
                hash,
                off: new_offset,
            },
            |to| to.hash,
        );
    }

    /// Mark the row for `inputs` as subsumed. Returns false if there is no
    /// such row or it was already subsumed.
    pub(crate) fn subsume(&mut self, inputs: &[Value], ts: u32) -> bool {
        match self.get(inputs) {
            Some(out) if !out.subsumed => {
                self.insert_and_merge(inputs, ts, true, |prev| prev.unwrap_or_else(Value::fake));
                true
            }
            _ => false,
        }
    }

    /// One more than the maximum (potentially) valid offset into the table.
    pub(crate) fn len(&self) -> usize {
        self.vals.len()
    }

    /// The number of live rows.
    pub(crate) fn num_live(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is completely empty, including stale entries.
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The minimum timestamp stored by the table, if there is one.
    pub(crate) fn min_ts(&self) -> Option<u32> {
        Some(self.vals.first()?.1.timestamp)
    }

    /// An upper bound for all timestamps stored in the table.
    pub(crate) fn max_ts(&self) -> u32 {
        self.max_ts
    }

    /// Get the timestamp for the entry at index `i`.
    pub(crate) fn get_timestamp(&self, i: usize) -> Option<u32> {
        Some(self.vals.get(i)?.1.timestamp)
    }

    /// Remove the given mapping from the table, returns whether an entry was
    /// removed.
    pub(crate) fn remove(&mut self, inp: &[Value], ts: u32) -> bool {
        let hash = hash_values(inp);
        let Ok(entry) = self
            .table
            .find_entry(hash, |to| to.hash == hash && self.vals[to.off].0.data() == inp)
        else {
            return false;
        };
        let (to, _) = entry.remove();
        self.vals[to.off].0.stale_at = ts;
        self.n_stale += 1;
        self.max_ts = self.max_ts.max(ts);
        true
    }

    /// Returns the entries at the given index if the entry is live and the index in bounds.
    pub(crate) fn get_index(&self, i: usize) -> Option<(&[Value], &TupleOutput)> {
        let (inp, out) = self.vals.get(i)?;
        if !inp.live() {
            return None;
        }
        Some((inp.data(), out))
    }

    /// Iterate over the live entries in the table, in insertion order.
    pub(crate) fn iter(
        &self,
        include_subsumed: bool,
    ) -> impl Iterator<Item = (&[Value], &TupleOutput)> + '_ {
        self.iter_range(0..self.len(), include_subsumed)
            .map(|(_, y, z)| (y, z))
    }

    /// Iterate over the live entries in the offset range, passing back the
    /// offset corresponding to each entry.
    pub(crate) fn iter_range(
        &self,
        range: Range<usize>,
        include_subsumed: bool,
    ) -> impl Iterator<Item = (usize, &[Value], &TupleOutput)> + '_ {
        self.vals[range.clone()]
            .iter()
            .zip(range)
            .filter_map(move |((inp, out), i)| {
                if inp.live() && (include_subsumed || !out.subsumed) {
                    Some((i, inp.data(), out))
                } else {
                    None
                }
            })
    }

    #[cfg(debug_assertions)]
    pub(crate) fn assert_sorted(&self) {
        assert!(self
            .vals
            .windows(2)
            .all(|xs| xs[0].1.timestamp <= xs[1].1.timestamp))
    }

    /// Iterate over the live entries in the timestamp range, passing back their
    /// offset into the table.
    pub(crate) fn iter_timestamp_range(
        &self,
        range: &Range<u32>,
        include_subsumed: bool,
    ) -> impl Iterator<Item = (usize, &[Value], &TupleOutput)> + '_ {
        let indexes = self.transform_range(range);
        self.iter_range(indexes, include_subsumed)
    }

    /// Return the approximate number of entries in the table for the given
    /// timestamp range.
    pub(crate) fn approximate_range_size(&self, range: &Range<u32>) -> usize {
        let indexes = self.transform_range(range);
        indexes.end - indexes.start
    }

    /// Transform a range of timestamps to the corresponding range of indexes
    /// into the table.
    pub(crate) fn transform_range(&self, range: &Range<u32>) -> Range<usize> {
        if let Some(start) = binary_search_table_by_key(self, range.start) {
            if let Some(end) = binary_search_table_by_key(self, range.end) {
                start..end
            } else {
                start..self.len()
            }
        } else {
            0..0
        }
    }
}

fn hash_values(vs: &[Value]) -> u64 {
    // Just hash the bits: all inputs to the same function should have matching
    // column types.
    let mut hasher = FxHasher::default();
    for v in vs {
        v.bits.hash(&mut hasher);
    }
    hasher.finish()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Input {
    data: ValueVec,
    /// The timestamp at which the given input became "stale"
    stale_at: u32,
}

impl Input {
    fn new(data: ValueVec) -> Input {
        Input {
            data,
            stale_at: u32::MAX,
        }
    }

    fn data(&self) -> &[Value] {
        self.data.as_slice()
    }

    fn live(&self) -> bool {
        self.stale_at == u32::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(bits: u64) -> Value {
        Value {
            tag: "testing".into(),
            bits,
        }
    }

    #[test]
    fn insert_get_remove() {
        let mut table = Table::default();
        assert_eq!(table.insert(&[v(1), v(2)], v(3), 0), None);
        assert_eq!(table.get(&[v(1), v(2)]).map(|o| o.value), Some(v(3)));
        assert_eq!(table.insert(&[v(1), v(2)], v(4), 1), Some(v(3)));
        assert_eq!(table.get(&[v(1), v(2)]).map(|o| o.value), Some(v(4)));
        assert_eq!(table.num_live(), 1);
        // the overwritten row is kept around as a stale entry
        assert_eq!(table.len(), 2);

        assert!(table.remove(&[v(1), v(2)], 2));
        assert!(!table.remove(&[v(1), v(2)], 2));
        assert!(table.get(&[v(1), v(2)]).is_none());
        assert!(table.too_stale());
        table.rehash();
        assert!(table.is_empty());
    }

    #[test]
    fn merge_callback_sees_previous_value() {
        let mut table = Table::default();
        table.insert(&[v(0)], v(5), 0);
        table.insert_and_merge(&[v(0)], 1, false, |prev| {
            assert_eq!(prev, Some(v(5)));
            v(5)
        });
        // an unchanged merge does not create a new entry
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&[v(0)]).unwrap().timestamp, 0);
    }

    #[test]
    fn subsumed_rows_are_hidden_from_iteration() {
        let mut table = Table::default();
        table.insert(&[v(0)], v(1), 0);
        table.insert(&[v(1)], v(1), 0);
        assert!(table.subsume(&[v(0)], 1));
        assert!(!table.subsume(&[v(0)], 1));
        assert!(!table.subsume(&[v(9)], 1));
        assert_eq!(table.iter(false).count(), 1);
        assert_eq!(table.iter(true).count(), 2);
        // lookups still see the subsumed row
        assert!(table.get(&[v(0)]).unwrap().subsumed);

        // subsumption survives a later overwrite
        table.insert(&[v(0)], v(2), 2);
        assert!(table.get(&[v(0)]).unwrap().subsumed);
    }

    #[test]
    fn timestamp_ranges() {
        let mut table = Table::default();
        for i in 0..10 {
            table.insert(&[v(i)], v(i), i as u32 / 2);
        }
        let in_range: Vec<u64> = table
            .iter_timestamp_range(&(2..4), false)
            .map(|(_, inp, _)| inp[0].bits)
            .collect();
        assert_eq!(in_range, vec![4, 5, 6, 7]);
        assert_eq!(table.approximate_range_size(&(0..u32::MAX)), 10);
        assert_eq!(table.approximate_range_size(&(5..u32::MAX)), 0);
    }
}
