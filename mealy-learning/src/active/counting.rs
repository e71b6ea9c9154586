use std::{
    fmt::Display,
    sync::{Arc, Mutex, PoisonError},
};

use mealy_core::Word;
use tracing::info;

use super::{MembershipError, MembershipOracle, Query};

/// Number of queries and of input symbols that have been posed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryCounts {
    pub queries: u64,
    pub symbols: u64,
}

impl Display for QueryCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} queries, {} symbols", self.queries, self.symbols)
    }
}

/// Shared handle to the counts of a [`CountingOracle`]. Cloning the handle does not
/// duplicate the counts, so the learning loop can log and reset them while the
/// oracle itself is owned by a learner or an equivalence oracle.
#[derive(Debug, Clone)]
pub struct QueryCounter {
    label: Arc<str>,
    counts: Arc<Mutex<QueryCounts>>,
}

impl QueryCounter {
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            label: label.into(),
            counts: Arc::default(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the current counts.
    pub fn counts(&self) -> QueryCounts {
        *self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, queries: u64, symbols: u64) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.queries += queries;
        counts.symbols += symbols;
    }

    pub fn reset(&self) {
        *self.counts.lock().unwrap_or_else(PoisonError::into_inner) = QueryCounts::default();
    }

    pub fn log(&self) {
        let counts = self.counts();
        info!(
            "{}: queries: {}, symbols: {}",
            self.label, counts.queries, counts.symbols
        );
    }

    /// Logs the current counts, resets them and gives back what was logged. Reading
    /// and resetting happen under the same lock, so no batch is lost in between.
    pub fn log_and_reset(&self) -> QueryCounts {
        let counts = std::mem::take(&mut *self.counts.lock().unwrap_or_else(PoisonError::into_inner));
        info!(
            "{}: queries: {}, symbols: {}",
            self.label, counts.queries, counts.symbols
        );
        counts
    }
}

/// A membership oracle which maintains a count of the number of queries and symbols
/// that flow through it, and otherwise simply delegates. Useful for measuring how
/// many queries learners and equivalence oracles need.
#[derive(Debug, Clone)]
pub struct CountingOracle<M> {
    delegate: M,
    counter: QueryCounter,
}

impl<M: MembershipOracle> CountingOracle<M> {
    pub fn new(delegate: M, label: impl Into<Arc<str>>) -> Self {
        Self {
            delegate,
            counter: QueryCounter::new(label),
        }
    }

    pub fn counter(&self) -> &QueryCounter {
        &self.counter
    }

    pub fn delegate(&self) -> &M {
        &self.delegate
    }

    pub fn reset(&self) {
        self.counter.reset()
    }

    pub fn log_and_reset(&self) -> QueryCounts {
        self.counter.log_and_reset()
    }
}

impl<M: MembershipOracle> MembershipOracle for CountingOracle<M> {
    fn answer_queries(&self, queries: &[Query]) -> Result<Vec<Word>, MembershipError> {
        let symbols = queries.iter().map(|q| q.len() as u64).sum();
        self.counter.record(queries.len() as u64, symbols);
        self.delegate.answer_queries(queries)
    }
}
