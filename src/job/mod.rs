mod table;

pub use table::JobTable;

use std::time::{Duration, Instant};

use log::{debug, info};
use mllib::{MeasureHist, Measures, ProgressSink, TrainOutput};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The lifecycle of a training job, `Finished` and `Terminated` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Finished,
    Terminated,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Terminated => "terminated",
        }
    }
}

/// A consistent copy of a job's record.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: u64,
    pub state: JobState,
    pub measures: Measures,
    pub hist: MeasureHist,
    /// Why the job terminated, when it failed.
    pub error: Option<String>,
    pub elapsed: Duration,
}

struct Record {
    state: JobState,
    measures: Measures,
    hist: MeasureHist,
    error: Option<String>,
}

/// One training execution.
///
/// The record is only written while the job is running, once it reaches a terminal state
/// every later write is dropped.
pub struct Job {
    id: u64,
    started_at: Instant,
    record: Mutex<Record>,
    state_tx: watch::Sender<JobState>,
    cancel: CancellationToken,
}

impl Job {
    /// Creates a new running `Job`.
    ///
    /// # Arguments
    /// * `id` - The job's id within its service.
    pub fn new(id: u64) -> Self {
        let (state_tx, _) = watch::channel(JobState::Running);

        Self {
            id,
            started_at: Instant::now(),
            record: Mutex::new(Record {
                state: JobState::Running,
                measures: Measures::new(),
                hist: MeasureHist::new(),
                error: None,
            }),
            state_tx,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.record.lock().state
    }

    /// The token the backend checks at each of its checkpoints.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let record = self.record.lock();

        JobSnapshot {
            id: self.id,
            state: record.state,
            measures: record.measures.clone(),
            hist: record.hist.clone(),
            error: record.error.clone(),
            elapsed: self.started_at.elapsed(),
        }
    }

    /// Waits until the job reaches a terminal state.
    pub async fn terminal(&self) -> JobState {
        let mut rx = self.state_tx.subscribe();
        match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            // Unreachable while `self` holds the sender.
            Err(_) => self.state(),
        }
    }

    /// Requests cancellation and waits for the job's acknowledgement.
    ///
    /// # Returns
    /// The terminal state, a job that already ended is left untouched.
    pub async fn cancel(&self) -> JobState {
        if !self.state().is_terminal() {
            debug!(job = self.id; "cancellation requested");
            self.cancel.cancel();
        }

        self.terminal().await
    }

    /// Ends the job with the backend's final output.
    ///
    /// A job that was asked to stop ends terminated, even if the backend made it to the end.
    pub fn finish(&self, output: TrainOutput) {
        if let Some(state) = self.settle_output(output) {
            self.publish(state);
        }
    }

    /// Ends the job as terminated.
    ///
    /// # Arguments
    /// * `error` - The failure's detail, `None` when the job was cancelled.
    pub fn terminate(&self, error: Option<String>) {
        if let Some(state) = self.settle_error(error) {
            self.publish(state);
        }
    }

    /// Freezes the record with the backend's final output.
    ///
    /// Readers see the terminal state at once, `terminal()` waiters only once it is published.
    ///
    /// # Returns
    /// The state to publish, `None` if the job had already settled.
    pub(crate) fn settle_output(&self, output: TrainOutput) -> Option<JobState> {
        let state = if self.cancel.is_cancelled() {
            JobState::Terminated
        } else {
            JobState::Finished
        };

        self.settle(state, |record| {
            record.measures = output.measures;
            if !output.hist.is_empty() {
                record.hist = output.hist;
            }
        })
    }

    /// Freezes the record as terminated.
    pub(crate) fn settle_error(&self, error: Option<String>) -> Option<JobState> {
        self.settle(JobState::Terminated, |record| record.error = error)
    }

    /// Wakes the `terminal()` waiters of a settled job.
    pub(crate) fn publish(&self, state: JobState) {
        self.state_tx.send_replace(state);

        info!(
            job = self.id,
            state = state.as_str(),
            secs = self.started_at.elapsed().as_secs_f64();
            "job ended"
        );
    }

    fn settle(&self, state: JobState, update: impl FnOnce(&mut Record)) -> Option<JobState> {
        let mut record = self.record.lock();
        if record.state.is_terminal() {
            return None;
        }

        update(&mut record);
        record.state = state;
        Some(state)
    }
}

impl ProgressSink for Job {
    fn report(&self, measures: &Measures) {
        let mut record = self.record.lock();
        if record.state == JobState::Running {
            record.measures.clone_from(measures);
        }
    }

    fn append_hist(&self, name: &str, value: f64) {
        let mut record = self.record.lock();
        if record.state == JobState::Running {
            record.hist.entry(name.to_string()).or_default().push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;

    fn measures(loss: f64) -> Measures {
        Measures::from([("train_loss".to_string(), loss)])
    }

    #[test]
    fn test_progress_is_frozen_once_terminal() {
        let job = Job::new(1);
        job.report(&measures(0.5));
        job.append_hist("train_loss", 0.5);
        job.terminate(None);

        job.report(&measures(0.1));
        job.append_hist("train_loss", 0.1);

        let snap = job.snapshot();
        assert_eq!(snap.state, JobState::Terminated);
        assert_eq!(snap.measures["train_loss"], 0.5);
        assert_eq!(snap.hist["train_loss"], vec![0.5]);
    }

    #[test]
    fn test_no_transition_leaves_a_terminal_state() {
        let job = Job::new(1);
        job.terminate(Some("boom".into()));
        job.finish(TrainOutput::default());

        let snap = job.snapshot();
        assert_eq!(snap.state, JobState::Terminated);
        assert_eq!(snap.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_finish_after_cancel_is_terminated() {
        let job = Job::new(1);
        job.cancel_token().cancel();
        job.finish(TrainOutput {
            measures: measures(0.2),
            ..Default::default()
        });

        let snap = job.snapshot();
        assert_eq!(snap.state, JobState::Terminated);
        assert_eq!(snap.measures["train_loss"], 0.2);
    }

    #[test]
    fn test_terminal_wakes_waiters() {
        let job = Job::new(1);
        let mut terminal = task::spawn(job.terminal());
        assert_pending!(terminal.poll());

        job.finish(TrainOutput::default());
        assert!(terminal.is_woken());
        assert_ready_eq!(terminal.poll(), JobState::Finished);
    }

    #[test]
    fn test_waiters_wake_only_once_published() {
        let job = Job::new(1);
        let mut terminal = task::spawn(job.terminal());
        assert_pending!(terminal.poll());

        let state = job.settle_error(Some("boom".into())).unwrap();
        assert_eq!(job.state(), JobState::Terminated);
        assert_eq!(job.snapshot().error.as_deref(), Some("boom"));
        assert!(job.settle_output(TrainOutput::default()).is_none());
        assert_pending!(terminal.poll());

        job.publish(state);
        assert!(terminal.is_woken());
        assert_ready_eq!(terminal.poll(), JobState::Terminated);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_waits_for_acknowledgement() {
        let job = Arc::new(Job::new(1));

        let worker = {
            let job = job.clone();
            tokio::spawn(async move {
                job.cancel_token().cancelled().await;
                job.terminate(None);
            })
        };

        assert_eq!(job.cancel().await, JobState::Terminated);
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_on_terminal_job_is_a_noop() {
        let job = Job::new(1);
        job.finish(TrainOutput::default());

        assert_eq!(job.cancel().await, JobState::Finished);
        assert!(!job.cancel_token().is_cancelled());
    }
}
