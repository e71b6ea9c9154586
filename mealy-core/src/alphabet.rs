use std::fmt::Display;

use indexmap::IndexSet;
use itertools::Itertools;

use crate::Symbol;

/// An ordered set of symbols.
///
/// # Example
/// ```
/// use mealy_core::Alphabet;
/// let alphabet: Alphabet = ["b", "a", "b"].into_iter().collect();
/// assert_eq!(alphabet.len(), 2);
/// assert_eq!(alphabet.position("a"), Some(1));
/// ```
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Alphabet<S: Symbol = String>(IndexSet<S>);

impl<S: Symbol> Alphabet<S> {
    /// Creates an alphabet without any symbols.
    pub fn empty() -> Self {
        Self(IndexSet::new())
    }

    /// Creates a new alphabet from the given symbols, keeping the first occurrence
    /// of each symbol.
    pub fn new(symbols: impl IntoIterator<Item = S>) -> Self {
        Self(symbols.into_iter().collect())
    }

    /// Returns the number of symbols in the alphabet.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no symbols in the alphabet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks whether `symbol` is part of the alphabet.
    pub fn contains<Q>(&self, symbol: &Q) -> bool
    where
        S: std::borrow::Borrow<Q>,
        Q: std::hash::Hash + Eq + ?Sized,
    {
        self.0.contains(symbol)
    }

    /// Returns the position of `symbol` in the alphabet, if it is present.
    pub fn position<Q>(&self, symbol: &Q) -> Option<usize>
    where
        S: std::borrow::Borrow<Q>,
        Q: std::hash::Hash + Eq + ?Sized,
    {
        self.0.get_index_of(symbol)
    }

    /// Returns the symbol at position `pos`, if it exists.
    pub fn nth(&self, pos: usize) -> Option<&S> {
        self.0.get_index(pos)
    }

    /// Iterates over the symbols in the order in which they were added.
    pub fn iter(&self) -> impl Iterator<Item = &S> + '_ {
        self.0.iter()
    }

    /// Adds `symbol` at the end of the alphabet if it is not yet present and returns
    /// its position.
    pub(crate) fn insert(&mut self, symbol: S) -> usize {
        self.0.insert_full(symbol).0
    }
}

impl<S: Symbol> Default for Alphabet<S> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<S: Symbol> FromIterator<S> for Alphabet<S> {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl<'a> FromIterator<&'a str> for Alphabet<String> {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        Self::new(iter.into_iter().map(str::to_string))
    }
}

impl<S: Symbol> Display for Alphabet<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.0.iter().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::Alphabet;

    #[test]
    fn keeps_first_occurrence_order() {
        let alphabet: Alphabet = ["21.1", "22", "21.1", "53.4"].into_iter().collect();
        assert_eq!(alphabet.len(), 3);
        assert_eq!(
            alphabet.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["21.1", "22", "53.4"]
        );
        assert_eq!(alphabet.nth(2).map(String::as_str), Some("53.4"));
        assert!(alphabet.contains("22"));
        assert!(!alphabet.contains("52.5"));
        assert_eq!(alphabet.to_string(), "{21.1, 22, 53.4}");
    }
}
