mod state;

pub use state::{BusyGuard, ServiceState};

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{info, warn};
use mllib::{ClearMode, Measures, MlBackend, MlLib, Prediction, ProgressSink, TrainContext, TrainOutput};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{sync::watch, task};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ApiError, Result},
    job::{Job, JobState, JobTable},
};

/// One named model instance.
///
/// A service runs at most one of `train` and `predict` at a time, tracked by its
/// `ServiceState`.
pub struct Service {
    name: String,
    kind: MlLib,
    description: String,
    backend: Arc<dyn MlBackend>,
    state: Arc<watch::Sender<ServiceState>>,
    closing: AtomicBool,
    jobs: Mutex<JobTable>,
    sync_cancel: Mutex<Option<CancellationToken>>,
}

/// Sync training returns its output directly, progress has nowhere to go.
struct Discard;

impl ProgressSink for Discard {
    fn report(&self, _: &Measures) {}

    fn append_hist(&self, _: &str, _: f64) {}
}

impl Service {
    /// Creates a new idle `Service`.
    ///
    /// # Arguments
    /// * `name` - The service's unique name.
    /// * `kind` - The library `backend` implements.
    /// * `description` - Free text given at creation.
    /// * `backend` - The model backend.
    pub fn new(name: String, kind: MlLib, description: String, backend: Arc<dyn MlBackend>) -> Self {
        let (state, _) = watch::channel(ServiceState::Idle);

        Self {
            name,
            kind,
            description,
            backend,
            state: Arc::new(state),
            closing: AtomicBool::new(false),
            jobs: Mutex::new(JobTable::new()),
            sync_cancel: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MlLib {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    pub fn backend(&self) -> Arc<dyn MlBackend> {
        self.backend.clone()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Marks the service as being torn down.
    ///
    /// # Returns
    /// `false` if it was already marked.
    pub fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    /// Moves the service from `Idle` into `to`.
    ///
    /// # Returns
    /// A `Conflict` error if the service is busy.
    pub fn acquire(&self, to: ServiceState) -> Result<BusyGuard> {
        if self.is_closing() {
            return Err(ApiError::ServiceNotFound(self.name.clone()));
        }

        BusyGuard::acquire(&self.state, to).map_err(|busy| {
            ApiError::Conflict(format!("service {} is busy {}", self.name, busy.as_str()))
        })
    }

    pub fn job(&self, id: u64) -> Option<Arc<Job>> {
        self.jobs.lock().get(id)
    }

    /// Registers a new running job and drops old terminal ones.
    ///
    /// # Arguments
    /// * `retention` - How many terminal jobs to keep.
    pub fn create_job(&self, retention: usize) -> Arc<Job> {
        let mut jobs = self.jobs.lock();
        jobs.prune(retention);
        let job = jobs.create();
        drop(jobs);

        if self.is_closing() {
            job.cancel_token().cancel();
        }

        job
    }

    pub fn job_states(&self) -> Vec<(u64, JobState)> {
        self.jobs.lock().states()
    }

    /// Trains in the caller's context until the backend returns.
    ///
    /// # Arguments
    /// * `params` - The call's parameters, handed to the backend untouched.
    /// * `data` - Input references.
    pub async fn train_sync(&self, params: Value, data: Vec<String>) -> Result<TrainOutput> {
        let _guard = self.acquire(ServiceState::Training)?;

        let cancel = CancellationToken::new();
        *self.sync_cancel.lock() = Some(cancel.clone());
        if self.is_closing() {
            cancel.cancel();
        }

        let backend = self.backend();
        let res = task::spawn_blocking(move || {
            backend.train(&params, &data, &TrainContext::new(&cancel, &Discard))
        })
        .await;

        self.sync_cancel.lock().take();

        match res {
            Ok(out) => out.map_err(ApiError::from),
            Err(e) => Err(ApiError::BackendFailure(e.to_string())),
        }
    }

    /// Runs inference over `data`, rejected while the service is training.
    pub async fn predict(&self, params: Value, data: Vec<String>) -> Result<Vec<Prediction>> {
        let _guard = self.acquire(ServiceState::Predicting)?;

        let backend = self.backend();
        match task::spawn_blocking(move || backend.predict(&params, &data)).await {
            Ok(res) => res.map_err(ApiError::from),
            Err(e) => Err(ApiError::BackendFailure(e.to_string())),
        }
    }

    /// Terminates everything the service is running and releases its backend.
    ///
    /// Must be preceded by a successful `begin_close`, no new operation starts after it.
    ///
    /// # Arguments
    /// * `mode` - Whether the backend's files are removed as well.
    pub async fn shutdown(&self, mode: ClearMode) -> Result<()> {
        if let Some(cancel) = self.sync_cancel.lock().as_ref() {
            cancel.cancel();
        }

        let running = self.jobs.lock().running();
        for job in running {
            let state = job.cancel().await;
            info!(service = self.name.as_str(), job = job.id(), state = state.as_str(); "job stopped by service teardown");
        }

        let mut rx = self.state.subscribe();
        if rx.wait_for(|s| *s == ServiceState::Idle).await.is_err() {
            warn!(service = self.name.as_str(); "state channel closed during teardown");
        }

        let backend = self.backend();
        match task::spawn_blocking(move || backend.clear(mode)).await {
            Ok(res) => res.map_err(ApiError::from),
            Err(e) => Err(ApiError::BackendFailure(e.to_string())),
        }
    }
}
