use std::fmt::{self, Display};

use crate::Symbol;

#[cfg(not(feature = "nondeterministic"))]
pub(crate) type BuildHasher = std::hash::BuildHasherDefault<rustc_hash::FxHasher>;
#[cfg(feature = "nondeterministic")]
pub(crate) type BuildHasher = std::collections::hash_map::RandomState;

pub(crate) type HashMap<K, V> = hashbrown::HashMap<K, V, BuildHasher>;
pub(crate) type HashSet<K> = hashbrown::HashSet<K, BuildHasher>;
pub(crate) type HEntry<'a, A, B> = hashbrown::hash_map::Entry<'a, A, B, BuildHasher>;
pub type IndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasher>;
pub type IndexSet<K> = indexmap::IndexSet<K, BuildHasher>;

/// Displays the items of an iterator separated by a fixed string.
pub(crate) struct ListDisplay<'a, TS>(pub TS, pub &'a str);

impl<TS> Display for ListDisplay<'_, TS>
where
    TS: Clone + IntoIterator,
    TS::Item: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut did_something = false;
        for item in self.0.clone().into_iter() {
            if did_something {
                f.write_str(self.1)?;
            }
            Display::fmt(&item, f)?;
            did_something = true;
        }
        Ok(())
    }
}

/// Like [`ListDisplay`], but uses the `Debug` representation of each item.
pub(crate) struct ListDebug<'a, TS>(pub TS, pub &'a str);

impl<TS> Display for ListDebug<'_, TS>
where
    TS: Clone + IntoIterator,
    TS::Item: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut did_something = false;
        for item in self.0.clone().into_iter() {
            if did_something {
                f.write_str(self.1)?;
            }
            fmt::Debug::fmt(&item, f)?;
            did_something = true;
        }
        Ok(())
    }
}

/// Generates fresh symbols for internal use during flattening.
/// These never collide with user symbols because they carry a reserved prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SymbolGen {
    count: usize,
    reserved_string: String,
}

impl SymbolGen {
    pub(crate) fn new(reserved_string: impl Into<String>) -> Self {
        Self {
            count: 0,
            reserved_string: reserved_string.into(),
        }
    }

    pub(crate) fn fresh(&mut self, name_hint: &Symbol) -> Symbol {
        let s = format!("{}{}{}", self.reserved_string, name_hint, self.count);
        self.count += 1;
        Symbol::from(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_display_separates_items() {
        assert_eq!(ListDisplay([1, 2, 3], ", ").to_string(), "1, 2, 3");
        assert_eq!(ListDisplay(Vec::<i32>::new(), ", ").to_string(), "");
    }

    #[test]
    fn fresh_symbols_carry_the_prefix() {
        let mut gen = SymbolGen::new("$");
        let a = gen.fresh(&"x".into());
        let b = gen.fresh(&"x".into());
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("$x"));
    }
}
