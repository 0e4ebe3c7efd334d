use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use mllib::{MlError, TrainContext};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    task::{self, JoinSet},
    time,
};

use crate::{
    error::{ApiError, Result},
    job::{Job, JobSnapshot},
    service::{Service, ServiceState},
};

/// What a bounded-wait status poll observed.
#[derive(Debug)]
pub struct StatusReport {
    pub snapshot: JobSnapshot,
    /// How long the poll waited, never more than the requested timeout.
    pub waited: Duration,
    /// Whether the timeout elapsed before the job reached a terminal state.
    pub timed_out: bool,
}

/// Runs training jobs in the background, one task per job.
pub struct Scheduler {
    tasks: Mutex<JoinSet<()>>,
    retention: usize,
}

impl Scheduler {
    /// Creates a new `Scheduler`.
    ///
    /// # Arguments
    /// * `retention` - The amount of terminal jobs kept per service.
    pub fn new(retention: usize) -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            retention,
        }
    }

    /// Starts an async training job on `service`.
    ///
    /// The service stays `Training` until the job's record is terminal, and goes back to `Idle`
    /// before `terminal()` waiters are woken.
    ///
    /// # Arguments
    /// * `service` - The service to train.
    /// * `params` - The call's parameters, handed to the backend untouched.
    /// * `data` - Input references.
    ///
    /// # Returns
    /// The running job, or a `Conflict` error if the service is busy.
    pub fn submit(&self, service: &Service, params: Value, data: Vec<String>) -> Result<Arc<Job>> {
        let guard = service.acquire(ServiceState::Training)?;
        let job = service.create_job(self.retention);
        let backend = service.backend();

        info!(service = service.name(), job = job.id(); "training job started");

        let task_job = job.clone();
        let task = async move {
            let train_job = task_job.clone();
            let res = task::spawn_blocking(move || {
                let ctx = TrainContext::new(train_job.cancel_token(), &*train_job);
                backend.train(&params, &data, &ctx)
            })
            .await;

            let settled = match res {
                Ok(Ok(output)) => task_job.settle_output(output),
                Ok(Err(MlError::Cancelled)) => task_job.settle_error(None),
                Ok(Err(e)) => {
                    warn!(job = task_job.id(); "training failed: {e}");
                    task_job.settle_error(Some(e.to_string()))
                }
                Err(e) => {
                    warn!(job = task_job.id(); "training task failed: {e}");
                    task_job.settle_error(Some(e.to_string()))
                }
            };

            // Readers see the job terminal before the service goes idle, and waiters are only
            // woken once it is idle.
            drop(guard);

            if let Some(state) = settled {
                task_job.publish(state);
            }
        };

        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);

        Ok(job)
    }

    /// Waits up to `timeout` for a job to end, then reports on it.
    ///
    /// Never side-effecting, a timed out poll leaves the job running.
    ///
    /// # Arguments
    /// * `service` - The job's service.
    /// * `id` - The job's id.
    /// * `timeout` - The longest the call may wait, zero returns at once.
    pub async fn status(&self, service: &Service, id: u64, timeout: Duration) -> Result<StatusReport> {
        let job = service.job(id).ok_or(ApiError::JobNotFound(id))?;
        let start = Instant::now();

        let timed_out = time::timeout(timeout, job.terminal()).await.is_err();
        let waited = if timed_out {
            timeout
        } else {
            start.elapsed().min(timeout)
        };

        debug!(job = id, timed_out = timed_out; "status polled");

        Ok(StatusReport {
            snapshot: job.snapshot(),
            waited,
            timed_out,
        })
    }

    /// Stops a running job, waiting until it acknowledges.
    ///
    /// A job that already ended is reported as is.
    pub async fn cancel(&self, service: &Service, id: u64) -> Result<JobSnapshot> {
        let job = service.job(id).ok_or(ApiError::JobNotFound(id))?;
        let state = job.cancel().await;

        info!(service = service.name(), job = id, state = state.as_str(); "training job deleted");
        Ok(job.snapshot())
    }

    /// Waits for every background task to return.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                warn!("job task failed: {e}");
            }
        }
    }
}
