use std::{io, process::ExitStatus, sync::Arc};

use mealy_core::prelude::*;
use thiserror::Error;
use tracing::trace;

/// A membership query consisting of an (optionally empty) prefix and a suffix. The
/// system is run on the concatenation of both, but only the outputs produced while
/// reading the suffix form the answer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Query {
    prefix: Word,
    suffix: Word,
}

impl Query {
    pub fn new(prefix: Word, suffix: Word) -> Self {
        Self { prefix, suffix }
    }

    /// A query without prefix, its answer is the output for the whole `word`.
    pub fn from_word(word: Word) -> Self {
        Self::new(Word::empty(), word)
    }

    pub fn prefix(&self) -> &Word {
        &self.prefix
    }

    pub fn suffix(&self) -> &Word {
        &self.suffix
    }

    /// The complete input, i.e. prefix followed by suffix.
    pub fn input(&self) -> Word {
        self.prefix.concat(&self.suffix)
    }

    /// Number of input symbols in prefix and suffix together.
    pub fn len(&self) -> usize {
        self.prefix.len() + self.suffix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An input word on which hypothesis and system disagree, together with the output
/// the system produced for it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Counterexample {
    pub input: Word,
    pub output: Word,
}

impl Counterexample {
    pub fn new(input: Word, output: Word) -> Self {
        Self { input, output }
    }

    /// The counterexample as a query without prefix.
    pub fn query(&self) -> Query {
        Query::from_word(self.input.clone())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MembershipError {
    #[error("system has no transition for symbol {position} of \"{input}\"")]
    Undefined { input: Word, position: usize },
    #[error("membership oracle answered {answered} out of {asked} queries")]
    MissingAnswers { asked: usize, answered: usize },
    #[error("membership oracle workers are no longer running")]
    Disconnected,
}

/// Answers membership queries by running them on the system under learning. Batches
/// are answered in order, i.e. the `i`-th output belongs to the `i`-th query.
pub trait MembershipOracle {
    fn answer_queries(&self, queries: &[Query]) -> Result<Vec<Word>, MembershipError>;

    fn answer_query(&self, query: &Query) -> Result<Word, MembershipError> {
        let answers = self.answer_queries(std::slice::from_ref(query))?;
        let answered = answers.len();
        answers
            .into_iter()
            .next()
            .ok_or(MembershipError::MissingAnswers { asked: 1, answered })
    }
}

impl<M: MembershipOracle + ?Sized> MembershipOracle for &M {
    fn answer_queries(&self, queries: &[Query]) -> Result<Vec<Word>, MembershipError> {
        M::answer_queries(self, queries)
    }
}

impl<M: MembershipOracle + ?Sized> MembershipOracle for Arc<M> {
    fn answer_queries(&self, queries: &[Query]) -> Result<Vec<Word>, MembershipError> {
        M::answer_queries(self, queries)
    }
}

impl<M: MembershipOracle + ?Sized> MembershipOracle for Box<M> {
    fn answer_queries(&self, queries: &[Query]) -> Result<Vec<Word>, MembershipError> {
        M::answer_queries(self, queries)
    }
}

/// Reason why an external test generator broke its side of the protocol.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("no counterexample but process stream still active")]
    StillRunning,
    #[error("external program failed with {0}")]
    Failed(ExitStatus),
    #[error("test \"{0}\" leaves the defined part of the hypothesis")]
    UnknownInput(Word),
}

/// Fatal failures of an equivalence query. Running out of budget is not among them,
/// it is handled by the search itself.
#[derive(Debug, Error)]
pub enum EquivalenceError {
    #[error("unable to start the external program {command}: {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("unable to communicate with the external program: {0}")]
    Communication(#[source] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
    #[error("membership query failed: {0}")]
    Membership(#[from] MembershipError),
}

impl EquivalenceError {
    /// Names the step of a search attempt that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            EquivalenceError::Launch { .. } => "launch",
            EquivalenceError::Communication(_) => "communication",
            EquivalenceError::Protocol(_) => "protocol",
            EquivalenceError::Membership(_) => "membership",
        }
    }
}

/// Searches for a word on which the hypothesis and the system under learning
/// produce different outputs.
pub trait EquivalenceOracle {
    /// Returns `Ok(None)` if no counterexample could be found. `inputs` is the alphabet
    /// the learner works with, implementations are free to test over different ones.
    fn find_counterexample(
        &mut self,
        hypothesis: &MealyMachine,
        inputs: &Alphabet,
    ) -> Result<Option<Counterexample>, EquivalenceError>;
}

/// A membership oracle that simulates a known [`MealyMachine`]. This is mainly useful for
/// experiments, where the system under learning is given as a model.
#[derive(Debug, Clone)]
pub struct SimulatorOracle {
    automaton: MealyMachine,
}

impl SimulatorOracle {
    pub fn new(automaton: MealyMachine) -> Self {
        Self { automaton }
    }

    pub fn automaton(&self) -> &MealyMachine {
        &self.automaton
    }

    fn answer(&self, query: &Query) -> Result<Word, MembershipError> {
        let undefined = |offset: usize, position: usize| MembershipError::Undefined {
            input: query.input(),
            position: offset + position,
        };
        let (state, _) = self
            .automaton
            .run_from(self.automaton.initial(), query.prefix())
            .map_err(|u| undefined(0, u.position))?;
        let (_, output) = self
            .automaton
            .run_from(state, query.suffix())
            .map_err(|u| undefined(query.prefix().len(), u.position))?;
        trace!("simulated {:?} -> {:?}", query.input(), output);
        Ok(output)
    }
}

impl MembershipOracle for SimulatorOracle {
    fn answer_queries(&self, queries: &[Query]) -> Result<Vec<Word>, MembershipError> {
        queries.iter().map(|q| self.answer(q)).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use mealy_core::prelude::*;
    use mealy_core::word;

    use super::{MembershipError, MembershipOracle, Query, SimulatorOracle};

    /// Outputs the number of `b`s read so far modulo three after every symbol.
    pub(crate) fn mod3() -> MealyMachine {
        MealyMachine::builder()
            .with_transitions([
                (0, "a", "0", 0),
                (0, "b", "1", 1),
                (1, "a", "1", 1),
                (1, "b", "2", 2),
                (2, "a", "2", 2),
                (2, "b", "0", 0),
            ])
            .into_mealy(0)
    }

    #[test_log::test]
    fn simulator_answers_suffix_outputs_only() {
        let oracle = SimulatorOracle::new(mod3());
        let answers = oracle
            .answer_queries(&[
                Query::new(word!["b", "b"], word!["a", "b"]),
                Query::from_word(word!["b", "a", "b"]),
                Query::new(word!["b"], word![]),
            ])
            .unwrap();
        assert_eq!(answers, vec![word!["2", "0"], word!["1", "1", "2"], word![]]);
    }

    #[test_log::test]
    fn undefined_symbols_are_reported_with_their_position() {
        let oracle = SimulatorOracle::new(mod3());
        let err = oracle
            .answer_query(&Query::new(word!["a"], word!["b", "c"]))
            .unwrap_err();
        assert_eq!(
            err,
            MembershipError::Undefined {
                input: word!["a", "b", "c"],
                position: 2
            }
        );
    }
}
