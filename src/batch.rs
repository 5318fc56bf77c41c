//! Concurrent runs of independent scenarios.
//!
//! A simulation step depends on the previous one, so a single run never
//! parallelizes. Independent scenarios share nothing and run on a bounded
//! pool of worker threads instead.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{BatchError, RespondError, RespondResult, ValidationError};
use crate::rates::RateSource;
use crate::simulation::{History, SimulationConfig, SimulationRunner};

/// Stable identifier for a submitted scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioId(Uuid);

impl ScenarioId {
    /// Create a new random scenario ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScenarioId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued scenarios.
    pub queue_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
        }
    }
}

impl BatchConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] if either limit is zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.workers == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "workers must be > 0".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "queue_capacity must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

enum Job {
    Run {
        id: ScenarioId,
        runner: Box<SimulationRunner>,
        reply: Sender<RespondResult<History>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(workers: usize, queue_capacity: usize) -> RespondResult<Self> {
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("respond-scenario-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Run { id, mut runner, reply }) => {
                            let result = runner.run().map(|()| runner.into_history());
                            debug!(
                                target: "respond::batch",
                                scenario = %id,
                                ok = result.is_ok(),
                                "scenario finished"
                            );
                            let _ = reply.send(result);
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .map_err(|e| {
                    RespondError::internal(format!("failed to spawn scenario worker: {e}"))
                })?;
            handles.push(handle);
        }

        Ok(Self {
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    fn try_submit(&self, job: Job) -> Result<(), BatchError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(BatchError::QueueFull {
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(BatchError::Disconnected),
        }
    }

    fn submit_blocking(&self, job: Job) -> Result<(), BatchError> {
        self.tx.send(job).map_err(|_| BatchError::Disconnected)
    }

    fn shutdown(self) {
        // Closing the channel lets workers drain queued jobs and exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Handle to a submitted scenario.
pub struct RunHandle {
    id: ScenarioId,
    rx: Receiver<RespondResult<History>>,
}

impl RunHandle {
    /// Identifier assigned at submission.
    #[must_use]
    pub const fn id(&self) -> ScenarioId {
        self.id
    }

    /// Waits for the scenario to finish.
    ///
    /// # Errors
    ///
    /// Returns the run's own error, or [`BatchError::Disconnected`] if the
    /// worker went away without replying.
    pub fn join(self) -> RespondResult<History> {
        self.rx.recv().map_err(|_| BatchError::Disconnected)?
    }

    /// Waits at most `timeout` for the scenario to finish.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Timeout`] if the run is still going, plus the
    /// errors of [`RunHandle::join`].
    pub fn join_timeout(self, timeout: Duration) -> RespondResult<History> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => BatchError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => BatchError::Disconnected,
        })?
    }
}

/// Runs scenarios on a bounded worker pool.
///
/// Scenarios are validated on the submitting thread; only valid runners are
/// queued. Dropping the runner drains the queue and joins every worker.
pub struct BatchRunner {
    pool: WorkerPool,
}

impl BatchRunner {
    /// Starts the worker threads.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid config, or an internal
    /// error if a worker thread cannot be spawned.
    pub fn new(config: BatchConfig) -> RespondResult<Self> {
        config.validate()?;
        let pool = WorkerPool::start(config.workers, config.queue_capacity)?;
        Ok(Self { pool })
    }

    /// Queues a scenario without blocking.
    ///
    /// # Errors
    ///
    /// Returns any error from [`SimulationRunner::new`], or
    /// [`BatchError::QueueFull`] when the queue is at capacity.
    pub fn submit(
        &self,
        rates: Arc<dyn RateSource>,
        config: SimulationConfig,
    ) -> RespondResult<RunHandle> {
        let (job, handle) = Self::job(rates, config)?;
        self.pool.try_submit(job)?;
        debug!(target: "respond::batch", scenario = %handle.id, "scenario queued");
        Ok(handle)
    }

    /// Runs every scenario and returns the histories in input order.
    ///
    /// Waits for queue space instead of failing when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns the first error, in input order.
    pub fn run_all(
        &self,
        scenarios: impl IntoIterator<Item = (Arc<dyn RateSource>, SimulationConfig)>,
    ) -> RespondResult<Vec<History>> {
        let mut handles = Vec::new();
        for (rates, config) in scenarios {
            let (job, handle) = Self::job(rates, config)?;
            self.pool.submit_blocking(job)?;
            debug!(target: "respond::batch", scenario = %handle.id, "scenario queued");
            handles.push(handle);
        }
        handles.into_iter().map(RunHandle::join).collect()
    }

    fn job(
        rates: Arc<dyn RateSource>,
        config: SimulationConfig,
    ) -> RespondResult<(Job, RunHandle)> {
        let runner = SimulationRunner::new(rates, config)?;
        let id = ScenarioId::new();
        let (tx, rx) = bounded::<RespondResult<History>>(1);
        let job = Job::Run {
            id,
            runner: Box::new(runner),
            reply: tx,
        };
        Ok((job, RunHandle { id, rx }))
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> Result<Receiver<()>, BatchError> {
        let (tx, rx) = bounded::<()>(1);
        self.pool.try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl Drop for BatchRunner {
    fn drop(&mut self) {
        let pool = std::mem::replace(
            &mut self.pool,
            WorkerPool {
                tx: bounded::<Job>(1).0,
                workers: Vec::new(),
                queue_capacity: 1,
            },
        );
        pool.shutdown();
    }
}
