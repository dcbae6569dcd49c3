use super::table::Table;

/// Binary search a [`Table`] for the smallest offset whose timestamp is greater
/// than or equal to `target`. Returns `None` when every row is older than
/// `target`.
///
/// Stale entries keep their timestamp, so the offsets of a table are sorted
/// by timestamp even when some of them are no longer live.
pub(crate) fn binary_search_table_by_key(data: &Table, target: u32) -> Option<usize> {
    if data.is_empty() || data.max_ts() < target {
        return None;
    }
    match data.min_ts() {
        Some(min) if min >= target => return Some(0),
        _ => {}
    }
    // lower bound: every offset before `lo` is older than `target`,
    // every offset at or after `hi` is not.
    let mut lo = 0;
    let mut hi = data.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match data.get_timestamp(mid) {
            Some(ts) if ts < target => lo = mid + 1,
            _ => hi = mid,
        }
    }
    (lo < data.len()).then_some(lo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn insert_row(table: &mut Table, i: u64, ts: u32) {
        let v = Value {
            tag: "testing".into(),
            bits: i,
        };
        table.insert(&[v], v, ts);
    }

    #[test]
    fn binary_search() {
        let mut map = Table::default();
        assert_eq!(binary_search_table_by_key(&map, 0), None);
        insert_row(&mut map, 1, 1);
        assert_eq!(binary_search_table_by_key(&map, 0), Some(0));
        map.clear();
        for i in 0..128 {
            // a run of four rows at timestamp 24, then a jump to 26
            let ts = if i == 50 || i == 51 { 24 } else { i as u32 / 2 };
            insert_row(&mut map, i, ts);
        }

        assert_eq!(binary_search_table_by_key(&map, 3), Some(6));
        assert_eq!(binary_search_table_by_key(&map, 0), Some(0));
        assert_eq!(binary_search_table_by_key(&map, 63), Some(126));
        assert_eq!(binary_search_table_by_key(&map, 200), None);
        assert_eq!(binary_search_table_by_key(&map, 24), Some(48));
        assert_eq!(binary_search_table_by_key(&map, 25), Some(52));
    }
}
