#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::{
    fmt::{Debug, Display},
    hash::Hash,
};

/// An alphabet is an ordered collection of unique symbols. The order in which
/// symbols are added is preserved and determines how transitions are laid out
/// in a [`MealyMachine`].
pub mod alphabet;

/// Finite words over some symbol type, these are immutable once constructed.
#[macro_use]
pub mod word;

/// Defines deterministic, possibly partial Mealy machines.
pub mod mealy;

/// Reading and writing Mealy machines in the DOT (graphviz) format.
pub mod dot;

/// A symbol is anything that can label the input or the output of a transition.
/// Symbols need to be printable, as they are exchanged in textual form with
/// external tools.
pub trait Symbol: Clone + Eq + Hash + Debug + Display {}
impl<S: Clone + Eq + Hash + Debug + Display> Symbol for S {}

/// Type used for referring to states of a [`MealyMachine`].
pub type StateIndex = usize;

/// The prelude is supposed to make using this package easier. Including everything, i.e.
/// `use mealy_core::prelude::*;` should be enough to use the package.
pub mod prelude {
    pub use super::{
        alphabet::Alphabet,
        dot::DotParseError,
        mealy::{MealyBuilder, MealyMachine, Undefined},
        word::Word,
        StateIndex, Symbol,
    };
}

pub use prelude::*;
