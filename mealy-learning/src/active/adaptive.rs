use std::num::NonZeroU64;

use mealy_core::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use super::{
    AttemptOutcome, Counterexample, EquivalenceError, EquivalenceOracle, MembershipOracle,
    SubprocessOracle,
};

/// Number of tests that may be tried per alphabet before the first escalation.
pub const DEFAULT_BOUND: NonZeroU64 = match NonZeroU64::new(100) {
    Some(bound) => bound,
    None => unreachable!(),
};

const ESCALATION_FACTOR: NonZeroU64 = match NonZeroU64::new(10) {
    Some(factor) => factor,
    None => unreachable!(),
};

/// Position of an [`AdaptiveOracle`] in its search: the alphabet that is tried next
/// and the number of tests every attempt may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchState {
    alphabet: usize,
    bound: NonZeroU64,
}

impl SearchState {
    pub fn new(bound: NonZeroU64) -> Self {
        Self { alphabet: 0, bound }
    }

    pub fn alphabet_index(&self) -> usize {
        self.alphabet
    }

    pub fn bound(&self) -> u64 {
        self.bound.get()
    }

    fn advance(&mut self) {
        self.alphabet += 1;
    }

    /// Starts over with the first alphabet and ten times the bound.
    fn escalate(&mut self) {
        self.alphabet = 0;
        self.bound = self.bound.saturating_mul(ESCALATION_FACTOR);
    }
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new(DEFAULT_BOUND)
    }
}

#[derive(Debug, Clone, Copy, Error)]
#[error("the adaptive search needs at least one alphabet")]
pub struct NoAlphabets;

/// Equivalence oracle that tries a list of alphabets in a fixed order, typically small
/// and targeted ones first and the full alphabet last. Each alphabet gets one attempt of
/// the underlying [`SubprocessOracle`] with the current bound. When all alphabets failed
/// to produce a counterexample, the bound is multiplied by ten and the search starts
/// over with the first alphabet.
///
/// The position of the search survives between calls: after a counterexample the next
/// call continues with the alphabet that produced it, at the same bound. There is no
/// upper limit on the bound, so [`EquivalenceOracle::find_counterexample`] only returns
/// once a counterexample is found. Use [`AdaptiveOracle::search_round`] to keep control
/// over the total effort.
pub struct AdaptiveOracle<M> {
    alphabets: Vec<Alphabet>,
    state: SearchState,
    attempts: SubprocessOracle<M>,
}

impl<M: MembershipOracle> AdaptiveOracle<M> {
    pub fn new(alphabets: Vec<Alphabet>, attempts: SubprocessOracle<M>) -> Result<Self, NoAlphabets> {
        if alphabets.is_empty() {
            return Err(NoAlphabets);
        }
        Ok(Self {
            alphabets,
            state: SearchState::default(),
            attempts,
        })
    }

    /// Replaces the bound that is used until the first escalation.
    pub fn with_bound(mut self, bound: NonZeroU64) -> Self {
        self.state = SearchState::new(bound);
        self
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn alphabets(&self) -> &[Alphabet] {
        &self.alphabets
    }

    pub fn attempts(&self) -> &SubprocessOracle<M> {
        &self.attempts
    }

    /// Tries the remaining alphabets at the current bound. If none of them yields a
    /// counterexample, the bound is escalated and `None` is returned.
    pub fn search_round(
        &mut self,
        hypothesis: &MealyMachine,
    ) -> Result<Option<Counterexample>, EquivalenceError> {
        while let Some(alphabet) = self.alphabets.get(self.state.alphabet) {
            info!(
                "Testing with subalphabet {} at bound {}",
                self.state.alphabet,
                self.state.bound()
            );
            match self
                .attempts
                .search(hypothesis, alphabet, self.state.bound())?
            {
                AttemptOutcome::Counterexample(ce) => return Ok(Some(ce)),
                AttemptOutcome::BoundExceeded => {
                    debug!("bound reached for subalphabet {}", self.state.alphabet)
                }
                AttemptOutcome::Exhausted { tested } => debug!(
                    "subalphabet {} exhausted after {tested} tests",
                    self.state.alphabet
                ),
            }
            self.state.advance();
        }

        info!("Increasing bound by a factor of {ESCALATION_FACTOR}");
        self.state.escalate();
        Ok(None)
    }
}

impl<M: MembershipOracle> EquivalenceOracle for AdaptiveOracle<M> {
    /// The alphabets given at construction are used, `inputs` is ignored.
    fn find_counterexample(
        &mut self,
        hypothesis: &MealyMachine,
        _inputs: &Alphabet,
    ) -> Result<Option<Counterexample>, EquivalenceError> {
        loop {
            if let Some(ce) = self.search_round(hypothesis)? {
                return Ok(Some(ce));
            }
        }
    }
}
