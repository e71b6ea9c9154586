//! Active learning of Mealy machines against a black-box system, with an equivalence
//! oracle that obtains its test cases from an external generator process.
#![allow(missing_docs)]

/// Deals with the active learning setting: membership and equivalence oracles as well
/// as the loop that drives a learner until no counterexample is found.
pub mod active;

pub mod prelude {
    pub use super::active::{
        AdaptiveOracle, AttemptOutcome, Counterexample, CountingOracle, EquivalenceError,
        EquivalenceOracle, Experiment, GeneratorCommand, Learner, LearningError,
        LearningReport, MembershipError, MembershipOracle, ParallelOracle, ProtocolViolation,
        NoAlphabets, Query, QueryCounter, QueryCounts, SearchState, SimulatorOracle, StageStatistics,
        SubprocessConfig, SubprocessOracle,
    };
    pub use mealy_core::prelude::*;
}
