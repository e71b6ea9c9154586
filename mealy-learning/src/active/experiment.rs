use std::{
    fs::File,
    io::{self, BufWriter},
    path::{Path, PathBuf},
};

use mealy_core::prelude::*;
use thiserror::Error;
use tracing::{debug, error, info};

use super::{Counterexample, EquivalenceError, EquivalenceOracle, QueryCounter, QueryCounts};

/// File to which the final hypothesis is written unless configured otherwise.
pub const DEFAULT_OUTPUT: &str = "last_hypothesis.dot";

/// The interface through which an active learning algorithm (L*, TTT, ...) is driven.
/// The learner owns its hypothesis and poses membership queries on its own.
pub trait Learner {
    type Error: std::error::Error + 'static;

    fn start_learning(&mut self) -> Result<(), Self::Error>;

    /// Refines the hypothesis with a counterexample. Returns whether the hypothesis
    /// changed.
    fn refine_hypothesis(&mut self, counterexample: &Counterexample) -> Result<bool, Self::Error>;

    fn hypothesis_model(&self) -> &MealyMachine;
}

#[derive(Debug, Error)]
pub enum LearningError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Learner(E),
    #[error("equivalence query of stage {stage} failed ({}): {source}", .source.stage())]
    Equivalence {
        stage: usize,
        #[source]
        source: EquivalenceError,
    },
    #[error("unable to write the final hypothesis to {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Queries that were posed during one stage of the experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStatistics {
    pub stage: usize,
    /// Size of the hypothesis that was tested in this stage.
    pub states: usize,
    pub learning: QueryCounts,
    pub testing: QueryCounts,
}

#[derive(Debug, Clone)]
pub struct LearningReport {
    pub hypothesis: MealyMachine,
    /// The first entry holds the queries of [`Learner::start_learning`], every further
    /// entry those of one refinement and the equivalence query preceding it.
    pub stages: Vec<StageStatistics>,
    /// Queries of the final, successful equivalence query.
    pub last: StageStatistics,
}

#[derive(Debug)]
enum Phase {
    Initializing,
    Learning,
    Testing,
    Refining(Counterexample),
    Converged,
}

/// Drives a [`Learner`] with an [`EquivalenceOracle`] until the oracle no longer finds
/// a counterexample, keeping track of the queries of both.
///
/// Every stage the current hypothesis size and the counts of the learning and the
/// testing counter are logged and then reset. On success, the final hypothesis is
/// written in DOT format.
pub struct Experiment<L, E> {
    learner: L,
    oracle: E,
    alphabet: Alphabet,
    learning: Option<QueryCounter>,
    testing: Option<QueryCounter>,
    output: Option<PathBuf>,
}

impl<L: Learner, E: EquivalenceOracle> Experiment<L, E> {
    pub fn new(learner: L, oracle: E, alphabet: Alphabet) -> Self {
        Self {
            learner,
            oracle,
            alphabet,
            learning: None,
            testing: None,
            output: Some(PathBuf::from(DEFAULT_OUTPUT)),
        }
    }

    /// Counter of the membership oracle used by the learner.
    pub fn with_learning_counter(mut self, counter: QueryCounter) -> Self {
        self.learning = Some(counter);
        self
    }

    /// Counter of the membership oracle used by the equivalence oracle.
    pub fn with_testing_counter(mut self, counter: QueryCounter) -> Self {
        self.testing = Some(counter);
        self
    }

    /// Where to write the final hypothesis, `None` disables writing it.
    pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
        self.output = output;
        self
    }

    fn log_and_reset_counters(&self) -> (QueryCounts, QueryCounts) {
        let take = |c: &Option<QueryCounter>| {
            c.as_ref()
                .map(QueryCounter::log_and_reset)
                .unwrap_or_default()
        };
        (take(&self.learning), take(&self.testing))
    }

    fn stage_statistics(&self, stage: usize) -> StageStatistics {
        let states = self.learner.hypothesis_model().size();
        info!("Hypothesis: {states}");
        let (learning, testing) = self.log_and_reset_counters();
        StageStatistics {
            stage,
            states,
            learning,
            testing,
        }
    }

    /// Runs the experiment to completion. Errors of the learner and the equivalence
    /// oracle end the experiment immediately.
    pub fn run(mut self) -> Result<LearningReport, LearningError<L::Error>> {
        let mut stages = Vec::new();
        let mut phase = Phase::Initializing;

        loop {
            phase = match phase {
                Phase::Initializing => {
                    debug!("starting learner");
                    self.learner
                        .start_learning()
                        .map_err(|e| self.abort(stages.len(), LearningError::Learner(e)))?;
                    Phase::Learning
                }
                Phase::Learning => {
                    let stage = stages.len();
                    info!("stage {stage}");
                    stages.push(self.stage_statistics(stage));
                    Phase::Testing
                }
                Phase::Testing => {
                    let stage = stages.len() - 1;
                    match self
                        .oracle
                        .find_counterexample(self.learner.hypothesis_model(), &self.alphabet)
                    {
                        Ok(Some(ce)) => Phase::Refining(ce),
                        Ok(None) => Phase::Converged,
                        Err(source) => {
                            return Err(self.abort(stage, LearningError::Equivalence { stage, source }))
                        }
                    }
                }
                Phase::Refining(ce) => {
                    debug!("refining with counterexample {:?} / {:?}", ce.input, ce.output);
                    let changed = self
                        .learner
                        .refine_hypothesis(&ce)
                        .map_err(|e| self.abort(stages.len() - 1, LearningError::Learner(e)))?;
                    if !changed {
                        debug!("counterexample {:?} did not change the hypothesis", ce.input);
                    }
                    Phase::Learning
                }
                Phase::Converged => break,
            };
        }

        info!("Done with learning, no counterexample found after:");
        let last = self.stage_statistics(stages.len());
        let hypothesis = self.learner.hypothesis_model().clone();

        if let Some(path) = &self.output {
            write_hypothesis(path, &hypothesis, &self.alphabet).map_err(|source| {
                LearningError::Persist {
                    path: path.clone(),
                    source,
                }
            })?;
            info!("wrote final hypothesis to {}", path.display());
        }

        Ok(LearningReport {
            hypothesis,
            stages,
            last,
        })
    }

    fn abort(&self, stage: usize, e: LearningError<L::Error>) -> LearningError<L::Error> {
        error!("aborting in stage {stage}: {e}");
        e
    }
}

fn write_hypothesis(path: &Path, hypothesis: &MealyMachine, alphabet: &Alphabet) -> io::Result<()> {
    hypothesis.write_dot(alphabet, BufWriter::new(File::create(path)?))
}
