use std::{fmt::Display, ops::Deref};

use itertools::Itertools;

use crate::Symbol;

/// Constructs a [`Word`] of strings from the given string-like expressions.
///
/// # Example
/// ```
/// use mealy_core::word;
/// let w = word!["a", "b", "c"];
/// assert_eq!(w.len(), 3);
/// assert_eq!(w.to_string(), "a b c");
/// ```
#[macro_export]
macro_rules! word {
    () => {
        $crate::word::Word::<String>::empty()
    };
    ($($sym:expr),+ $(,)?) => {
        $crate::word::Word::<String>::from_iter([$($sym.to_string()),+])
    };
}

/// A finite sequence of symbols. A word can not be modified after it has been
/// constructed, operations such as [`Word::concat`] produce a new word.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Word<S = String>(Vec<S>);

impl<S> Word<S> {
    /// Returns the empty word.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Returns the symbols of `self` as a slice.
    pub fn as_slice(&self) -> &[S] {
        &self.0
    }

    /// Consumes `self` and returns the underlying symbols.
    pub fn into_vec(self) -> Vec<S> {
        self.0
    }
}

impl<S: Clone> Word<S> {
    /// Produces the concatenation of `self` followed by `other`.
    pub fn concat(&self, other: &Word<S>) -> Self {
        self.0.iter().chain(other.0.iter()).cloned().collect()
    }

}

impl Word<String> {
    /// Splits `line` on whitespace and treats every token as one symbol.
    pub fn from_tokens(line: &str) -> Self {
        line.split_whitespace().map(str::to_string).collect()
    }
}

impl<S> Default for Word<S> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<S> Deref for Word<S> {
    type Target = [S];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S> AsRef<[S]> for Word<S> {
    fn as_ref(&self) -> &[S] {
        &self.0
    }
}

impl<S> From<Vec<S>> for Word<S> {
    fn from(value: Vec<S>) -> Self {
        Self(value)
    }
}

impl<S> FromIterator<S> for Word<S> {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a, S> IntoIterator for &'a Word<S> {
    type Item = &'a S;
    type IntoIter = std::slice::Iter<'a, S>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<S: Symbol> Display for Word<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().join(" "))
    }
}

impl<S: Symbol> std::fmt::Debug for Word<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            write!(f, "ε")
        } else {
            write!(f, "[{}]", self.0.iter().join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Word;

    #[test]
    fn tokens_are_split_on_whitespace() {
        let w = Word::from_tokens("  21.1 22\t53.4 \n");
        assert_eq!(w, word!["21.1", "22", "53.4"]);
        assert!(Word::from_tokens("   \n").is_empty());
    }

    #[test]
    fn concatenation_and_debug() {
        let w = word!["a", "b", "c"];
        assert_eq!(word!["a"].concat(&word!["b", "c"]), w);
        assert_eq!(w.concat(&Word::empty()), w);
        assert_eq!(format!("{w:?}"), "[a b c]");
        assert_eq!(format!("{:?}", Word::<String>::empty()), "ε");
    }
}
