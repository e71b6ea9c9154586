use std::{io, thread::JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use mealy_core::Word;
use tracing::{debug, trace, warn};

use super::{MembershipError, MembershipOracle, Query};

pub const DEFAULT_POOL_SIZE: usize = 4;
pub const DEFAULT_BATCH_SIZE: usize = 5;

type Answers = Result<Vec<Word>, MembershipError>;

struct Job {
    offset: usize,
    queries: Vec<Query>,
    reply: Sender<(usize, Answers)>,
}

/// Answers batches of membership queries with a fixed pool of worker threads. A batch
/// is split into chunks of at most `batch_size` queries, which are distributed over the
/// workers. Every worker owns its own delegate, which is produced by a supplier when the
/// pool is created.
pub struct ParallelOracle {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    batch_size: usize,
}

impl ParallelOracle {
    /// Spawns `pool_size` workers, each answering queries with a delegate obtained from
    /// `supplier`. Both sizes are raised to at least one.
    pub fn new<M, F>(pool_size: usize, batch_size: usize, supplier: F) -> io::Result<Self>
    where
        M: MembershipOracle + Send + 'static,
        F: Fn() -> M,
    {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let workers = (0..pool_size.max(1))
            .map(|i| {
                let delegate = supplier();
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("membership-{i}"))
                    .spawn(move || work(delegate, receiver))
            })
            .collect::<io::Result<Vec<_>>>()?;
        debug!("started {} membership query workers", workers.len());

        Ok(Self {
            jobs: Some(sender),
            workers,
            batch_size: batch_size.max(1),
        })
    }

    /// Creates a pool with the default sizes of four workers and batches of five.
    pub fn with_defaults<M, F>(supplier: F) -> io::Result<Self>
    where
        M: MembershipOracle + Send + 'static,
        F: Fn() -> M,
    {
        Self::new(DEFAULT_POOL_SIZE, DEFAULT_BATCH_SIZE, supplier)
    }

    pub fn pool_size(&self) -> usize {
        self.workers.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

fn work<M: MembershipOracle>(delegate: M, jobs: Receiver<Job>) {
    for job in jobs.iter() {
        trace!("answering {} queries at offset {}", job.queries.len(), job.offset);
        let answers = delegate.answer_queries(&job.queries);
        // the caller may have given up on the batch already
        let _ = job.reply.send((job.offset, answers));
    }
}

impl MembershipOracle for ParallelOracle {
    fn answer_queries(&self, queries: &[Query]) -> Result<Vec<Word>, MembershipError> {
        let Some(jobs) = &self.jobs else {
            return Err(MembershipError::Disconnected);
        };
        let (reply, replies) = crossbeam_channel::unbounded();
        let mut pending = 0;
        for (n, chunk) in queries.chunks(self.batch_size).enumerate() {
            jobs.send(Job {
                offset: n * self.batch_size,
                queries: chunk.to_vec(),
                reply: reply.clone(),
            })
            .map_err(|_| MembershipError::Disconnected)?;
            pending += 1;
        }
        drop(reply);

        let mut answers: Vec<Option<Word>> = vec![None; queries.len()];
        for _ in 0..pending {
            let (offset, chunk) = replies.recv().map_err(|_| MembershipError::Disconnected)?;
            for (i, answer) in chunk?.into_iter().enumerate() {
                if let Some(slot) = answers.get_mut(offset + i) {
                    *slot = Some(answer);
                }
            }
        }

        let answered = answers.iter().filter(|a| a.is_some()).count();
        answers
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(MembershipError::MissingAnswers {
                asked: queries.len(),
                answered,
            })
    }
}

impl Drop for ParallelOracle {
    fn drop(&mut self) {
        // closing the channel lets every worker leave its loop
        self.jobs.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("membership query worker panicked");
            }
        }
    }
}
