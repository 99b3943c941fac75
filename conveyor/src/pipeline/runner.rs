//! Join handles for dispatched runs.

use crate::cancellation::CancellationToken;
use crate::errors::ConveyorError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Identity of one dispatched run.
#[derive(Debug, Clone)]
struct RunInfo {
    pipeline: String,
    run_id: Uuid,
    token: CancellationToken,
}

/// Handle on one or more running pipelines.
///
/// Dropping a runner does not stop the run; call [`Runner::cancel`] to stop
/// the sources and [`Runner::wait`] to join every worker.
#[derive(Debug)]
pub struct Runner {
    runs: Vec<RunInfo>,
    tasks: Vec<(String, JoinHandle<()>)>,
    timers: Vec<JoinHandle<()>>,
}

impl Runner {
    pub(crate) fn new(pipeline: impl Into<String>, run_id: Uuid, token: CancellationToken) -> Self {
        Self {
            runs: vec![RunInfo {
                pipeline: pipeline.into(),
                run_id,
                token,
            }],
            tasks: Vec::new(),
            timers: Vec::new(),
        }
    }

    pub(crate) fn push_task(&mut self, worker: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.push((worker.into(), handle));
    }

    pub(crate) fn push_timer(&mut self, handle: JoinHandle<()>) {
        self.timers.push(handle);
    }

    /// Returns the run ids covered by this runner.
    #[must_use]
    pub fn run_ids(&self) -> Vec<Uuid> {
        self.runs.iter().map(|r| r.run_id).collect()
    }

    /// Returns the number of workers being joined.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.tasks.len()
    }

    /// Fires every run's cancellation token. Sources stop before their next
    /// item; admitted items still drain.
    pub fn cancel(&self, reason: &str) {
        for run in &self.runs {
            run.token.cancel(reason);
        }
    }

    /// Waits until every stage, connector and flush controller has
    /// terminated. Pending timeout timers are aborted.
    ///
    /// # Errors
    ///
    /// Returns [`ConveyorError::Join`] for the first worker that panicked or
    /// was aborted. The remaining workers are still joined.
    pub async fn wait(self) -> Result<(), ConveyorError> {
        let mut first_error = None;

        for (worker, handle) in self.tasks {
            if let Err(err) = handle.await {
                warn!(worker = %worker, error = %err, "Worker did not finish cleanly");
                first_error.get_or_insert(ConveyorError::Join {
                    worker,
                    message: err.to_string(),
                });
            }
        }

        for timer in self.timers {
            timer.abort();
        }

        for run in &self.runs {
            info!(pipeline = %run.pipeline, run_id = %run.run_id, "Pipeline run finished");
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// Combines several runners into one whose [`Runner::wait`] joins them all.
#[must_use]
pub fn join_runners(runners: impl IntoIterator<Item = Runner>) -> Runner {
    let mut joined = Runner {
        runs: Vec::new(),
        tasks: Vec::new(),
        timers: Vec::new(),
    };
    for runner in runners {
        joined.runs.extend(runner.runs);
        joined.tasks.extend(runner.tasks);
        joined.timers.extend(runner.timers);
    }
    joined
}
