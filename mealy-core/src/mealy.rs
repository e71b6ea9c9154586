use std::{fmt::Debug, ops::Range};

use tracing::trace;

use crate::{alphabet::Alphabet, word::Word, StateIndex, Symbol};

#[derive(Clone, PartialEq, Eq, Debug)]
struct Transition<O> {
    target: StateIndex,
    output: O,
}

/// Returned when a run through a [`MealyMachine`] reaches a state that has no
/// transition for the next input symbol.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Undefined {
    /// The state in which the run got stuck.
    pub state: StateIndex,
    /// Position of the first input symbol that could not be read.
    pub position: usize,
}

/// A deterministic Mealy machine, i.e. a transition system in which every transition
/// is labelled with an input symbol and produces an output symbol. Running the machine
/// on a word of length `n` produces a word of `n` outputs, one for each transition
/// that is taken.
///
/// Machines may be partial, in which case [`MealyMachine::transform`] returns `None`
/// for words that leave the defined part.
#[derive(Clone, PartialEq, Eq)]
pub struct MealyMachine<I: Symbol = String, O: Symbol = String> {
    alphabet: Alphabet<I>,
    // indexed by state first and by the position of the input in `alphabet` second
    transitions: Vec<Vec<Option<Transition<O>>>>,
    initial: StateIndex,
}

impl<I: Symbol, O: Symbol> MealyMachine<I, O> {
    /// Creates a machine over the given alphabet that consists of a single initial
    /// state without any transitions.
    pub fn new(alphabet: Alphabet<I>) -> Self {
        let row = vec![None; alphabet.len()];
        Self {
            alphabet,
            transitions: vec![row],
            initial: 0,
        }
    }

    /// Starts building a machine, see [`MealyBuilder`].
    pub fn builder() -> MealyBuilder<I, O> {
        MealyBuilder::default()
    }

    /// Returns the input alphabet.
    pub fn alphabet(&self) -> &Alphabet<I> {
        &self.alphabet
    }

    /// Returns the number of states.
    pub fn size(&self) -> usize {
        self.transitions.len()
    }

    /// Iterates over the indices of all states.
    pub fn state_indices(&self) -> Range<StateIndex> {
        0..self.transitions.len()
    }

    /// Returns the initial state.
    pub fn initial(&self) -> StateIndex {
        self.initial
    }

    /// Makes `state` the initial state. Returns `false` and leaves `self` untouched if
    /// `state` does not exist.
    pub fn set_initial(&mut self, state: StateIndex) -> bool {
        if state >= self.size() {
            return false;
        }
        self.initial = state;
        true
    }

    /// Adds a fresh state without outgoing transitions.
    pub fn add_state(&mut self) -> StateIndex {
        self.transitions.push(vec![None; self.alphabet.len()]);
        self.transitions.len() - 1
    }

    /// Adds states until `state` exists.
    pub(crate) fn ensure_state(&mut self, state: StateIndex) {
        while self.size() <= state {
            self.add_state();
        }
    }

    /// Inserts a transition from `source` on `input` that emits `output` and leads to
    /// `target`. Missing states and input symbols are created on demand. If a transition
    /// for `source` and `input` already existed, it is replaced and its target and output
    /// are returned.
    pub fn add_transition(
        &mut self,
        source: StateIndex,
        input: I,
        output: O,
        target: StateIndex,
    ) -> Option<(StateIndex, O)> {
        self.ensure_state(source.max(target));
        let pos = self.alphabet.insert(input);
        if pos >= self.transitions[0].len() {
            for row in &mut self.transitions {
                row.resize(pos + 1, None);
            }
        }
        trace!("adding transition {source} --{pos}/{output:?}--> {target}");
        self.transitions[source][pos]
            .replace(Transition { target, output })
            .map(|t| (t.target, t.output))
    }

    /// Returns the target and output of the transition from `state` on `input`.
    pub fn edge(&self, state: StateIndex, input: &I) -> Option<(StateIndex, &O)> {
        let pos = self.alphabet.position(input)?;
        self.transitions
            .get(state)?
            .get(pos)?
            .as_ref()
            .map(|t| (t.target, &t.output))
    }

    /// Iterates over all outgoing transitions of `state` as triples of input, output
    /// and target, ordered by the position of the input in the alphabet.
    pub fn edges_from(&self, state: StateIndex) -> impl Iterator<Item = (&I, &O, StateIndex)> {
        self.transitions
            .get(state)
            .into_iter()
            .flat_map(|row| row.iter().enumerate())
            .filter_map(|(pos, t)| {
                let t = t.as_ref()?;
                Some((self.alphabet.nth(pos)?, &t.output, t.target))
            })
    }

    /// Runs the machine on `input` starting in `state`. Gives back the reached state
    /// together with the produced outputs, or the point at which the run got stuck.
    pub fn run_from(&self, state: StateIndex, input: &[I]) -> Result<(StateIndex, Word<O>), Undefined> {
        let mut current = state;
        let mut outputs = Vec::with_capacity(input.len());
        for (position, sym) in input.iter().enumerate() {
            let Some((target, output)) = self.edge(current, sym) else {
                return Err(Undefined {
                    state: current,
                    position,
                });
            };
            outputs.push(output.clone());
            current = target;
        }
        Ok((current, outputs.into()))
    }

    /// Computes the output word that is produced on `input` from the initial state. Gives
    /// `None` if the run leaves the defined part of the machine.
    pub fn transform(&self, input: &[I]) -> Option<Word<O>> {
        self.run_from(self.initial, input).ok().map(|(_, w)| w)
    }

    /// Returns true if every state has a transition for every input symbol.
    pub fn is_complete(&self) -> bool {
        self.transitions
            .iter()
            .all(|row| row.len() == self.alphabet.len() && row.iter().all(Option::is_some))
    }
}

impl<I: Symbol, O: Symbol> Debug for MealyMachine<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "MealyMachine with {} states over {}, initial {}",
            self.size(),
            self.alphabet,
            self.initial
        )?;
        for q in self.state_indices() {
            for (input, output, target) in self.edges_from(q) {
                writeln!(f, "  {q} --{input}/{output}--> {target}")?;
            }
        }
        Ok(())
    }
}

/// Helper for constructing [`MealyMachine`]s from a list of transitions, which are
/// given as tuples `(source, input, output, target)`.
///
/// # Example
/// ```
/// use mealy_core::{word, MealyMachine};
/// let mm: MealyMachine = MealyMachine::builder()
///     .with_transitions([(0, "a", "x", 1), (1, "a", "y", 0)])
///     .into_mealy(0);
/// assert_eq!(mm.transform(&word!["a", "a", "a"]), Some(word!["x", "y", "x"]));
/// ```
#[derive(Clone, Debug)]
pub struct MealyBuilder<I: Symbol = String, O: Symbol = String> {
    alphabet: Alphabet<I>,
    transitions: Vec<(StateIndex, I, O, StateIndex)>,
}

impl<I: Symbol, O: Symbol> Default for MealyBuilder<I, O> {
    fn default() -> Self {
        Self {
            alphabet: Alphabet::empty(),
            transitions: Vec::new(),
        }
    }
}

impl<I: Symbol, O: Symbol> MealyBuilder<I, O> {
    /// Fixes the order of the input symbols. Symbols that only occur in transitions are
    /// appended in order of their first appearance.
    pub fn with_alphabet(mut self, alphabet: Alphabet<I>) -> Self {
        self.alphabet = alphabet;
        self
    }

    /// Adds the given transitions.
    pub fn with_transitions<X, Y, T>(mut self, transitions: T) -> Self
    where
        X: Into<I>,
        Y: Into<O>,
        T: IntoIterator<Item = (StateIndex, X, Y, StateIndex)>,
    {
        self.transitions.extend(
            transitions
                .into_iter()
                .map(|(p, x, y, q)| (p, x.into(), y.into(), q)),
        );
        self
    }

    /// Builds the machine with `initial` as its initial state.
    pub fn into_mealy(self, initial: StateIndex) -> MealyMachine<I, O> {
        let mut mm = MealyMachine::new(self.alphabet);
        mm.ensure_state(initial);
        for (p, x, y, q) in self.transitions {
            mm.add_transition(p, x, y, q);
        }
        mm.initial = initial;
        mm
    }
}
