//! Bounded worker pool used by every pooled pipeline stage.
//!
//! A fixed number of workers pull tasks one at a time from a shared,
//! unbounded queue. [`WorkerPool::drain`] closes the queue and waits for
//! every worker, which makes each stage a hard barrier: nothing from the
//! next stage is submitted before the previous pool has drained.
//!
//! Task failures and panics are logged and counted; they never stop a
//! worker or the pool.

use crate::error::{PipelineError, Result};
use crate::logging::RunLogger;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// A unit of work executed by a [`WorkerPool`]
///
/// Tasks within a stage must be independent: completion order is
/// unspecified.
pub trait PipelineTask: Send + 'static {
    /// Short description used in log lines
    fn label(&self) -> String;

    fn run(self) -> impl Future<Output = Result<()>> + Send;
}

/// Counts for one drained pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub panicked: usize,
}

impl PoolReport {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed + self.panicked
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.panicked == 0
    }

    fn merge(&mut self, other: &WorkerTally) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.panicked += other.panicked;
    }
}

#[derive(Debug, Default)]
struct WorkerTally {
    succeeded: usize,
    failed: usize,
    panicked: usize,
}

/// Fixed-size pool of workers sharing one task queue
pub struct WorkerPool<T: PipelineTask> {
    name: String,
    sender: mpsc::UnboundedSender<T>,
    workers: Vec<JoinHandle<WorkerTally>>,
    submitted: usize,
    logger: Arc<dyn RunLogger>,
}

impl<T: PipelineTask> WorkerPool<T> {
    /// Start `workers` workers; must be called inside a tokio runtime
    pub fn new(name: impl Into<String>, workers: usize, logger: Arc<dyn RunLogger>) -> Result<Self> {
        if workers == 0 {
            return Err(PipelineError::configuration(
                "Worker pool needs at least one worker",
            ));
        }

        let name = name.into();
        let (sender, receiver) = mpsc::unbounded_channel::<T>();
        let queue = Arc::new(Mutex::new(receiver));

        let handles = (0..workers)
            .map(|id| {
                let queue = Arc::clone(&queue);
                let logger = Arc::clone(&logger);
                let pool_name = name.clone();
                tokio::spawn(worker_loop(pool_name, id, queue, logger))
            })
            .collect();

        logger.debug(&format!("Started {} pool with {} workers", name, workers));

        Ok(Self {
            name,
            sender,
            workers: handles,
            submitted: 0,
            logger,
        })
    }

    /// Queue a task; never blocks
    pub fn submit(&mut self, task: T) -> Result<()> {
        self.sender.send(task).map_err(|e| PipelineError::TaskPanicked {
            task: e.0.label(),
            message: format!("{} pool has no running workers", self.name),
        })?;
        self.submitted += 1;
        Ok(())
    }

    /// Close the queue and wait until every queued task has finished
    pub async fn drain(self) -> PoolReport {
        let Self {
            name,
            sender,
            workers,
            submitted,
            logger,
        } = self;
        drop(sender);

        let mut report = PoolReport {
            submitted,
            ..Default::default()
        };

        for handle in workers {
            match handle.await {
                Ok(tally) => report.merge(&tally),
                Err(e) => logger.error(&format!("{} pool worker died: {}", name, e)),
            }
        }

        logger.info(&format!(
            "{} stage drained: {} tasks, {} succeeded, {} failed, {} panicked",
            name, report.submitted, report.succeeded, report.failed, report.panicked
        ));

        report
    }

    /// Run `tasks` on a fresh pool and wait for all of them
    pub async fn run_stage(
        name: impl Into<String>,
        workers: usize,
        tasks: impl IntoIterator<Item = T>,
        logger: Arc<dyn RunLogger>,
    ) -> Result<PoolReport> {
        let mut pool = Self::new(name, workers, logger)?;
        for task in tasks {
            pool.submit(task)?;
        }
        Ok(pool.drain().await)
    }
}

async fn worker_loop<T: PipelineTask>(
    pool_name: String,
    id: usize,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<T>>>,
    logger: Arc<dyn RunLogger>,
) -> WorkerTally {
    let mut tally = WorkerTally::default();

    loop {
        // Lock only while waiting for the next task, never while running it
        let next = { queue.lock().await.recv().await };
        let Some(task) = next else {
            break;
        };

        let label = task.label();
        logger.debug(&format!("[{} worker {}] starting {}", pool_name, id, label));

        // A separate task isolates panics from the worker loop
        match tokio::spawn(task.run()).await {
            Ok(Ok(())) => tally.succeeded += 1,
            Ok(Err(e)) => {
                tally.failed += 1;
                logger.error(&format!("[{}] {} failed: {}", pool_name, label, e));
            }
            Err(e) => {
                tally.panicked += 1;
                logger.error(&format!("[{}] {} panicked: {}", pool_name, label, e));
            }
        }
    }

    tally
}
