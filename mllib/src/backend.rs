use std::{collections::BTreeMap, path::PathBuf};

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{ClearMode, MlError, MlLib, Result};

/// Named scalar measures of a model, e.g. `train_loss` or `acc`.
pub type Measures = BTreeMap<String, f64>;

/// Per-measure history, in the order the values were produced.
pub type MeasureHist = BTreeMap<String, Vec<f64>>;

/// Receives training progress while a backend's `train` call is running.
pub trait ProgressSink: Send + Sync {
    /// Publishes the latest measures, replacing the ones reported before.
    fn report(&self, measures: &Measures);

    /// Appends one value to the history of measure `name`.
    fn append_hist(&self, name: &str, value: f64);
}

/// Everything a backend needs from its caller while training.
///
/// Backends must call `checkpoint` at least once per iteration, cancellation is only
/// observed there.
pub struct TrainContext<'a> {
    cancel: &'a CancellationToken,
    progress: &'a dyn ProgressSink,
}

impl<'a> TrainContext<'a> {
    /// Creates a new `TrainContext`.
    ///
    /// # Arguments
    /// * `cancel` - Token tripped by the caller to stop training.
    /// * `progress` - Where progress gets published to.
    pub fn new(cancel: &'a CancellationToken, progress: &'a dyn ProgressSink) -> Self {
        Self { cancel, progress }
    }

    /// A cooperative cancellation point.
    ///
    /// # Returns
    /// `MlError::Cancelled` if cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(MlError::Cancelled);
        }

        Ok(())
    }

    pub fn report(&self, measures: &Measures) {
        self.progress.report(measures);
    }

    pub fn append_hist(&self, name: &str, value: f64) {
        self.progress.append_hist(name, value);
    }
}

/// The final result of a completed training call.
#[derive(Debug, Default, Clone)]
pub struct TrainOutput {
    pub measures: Measures,
    pub hist: MeasureHist,
}

/// A class and its score for one input item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassScore {
    pub cat: String,
    pub prob: f64,
}

/// The backend's answer for one input item.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub uri: String,
    pub classes: Vec<ClassScore>,
}

/// The capability every model library must provide to be served.
///
/// Calls are CPU bound and blocking, the serving layer runs them off the async runtime.
pub trait MlBackend: Send + Sync {
    /// The library this backend implements.
    fn kind(&self) -> MlLib;

    /// Checks the configuration the backend was built with.
    ///
    /// # Returns
    /// An `InvalidConfig` or `UnknownConnector` error if the service can't be served.
    fn validate_config(&self) -> Result<()>;

    /// Trains the model.
    ///
    /// # Arguments
    /// * `params` - The call's `{input, mllib, output}` parameters, untouched by the caller.
    /// * `data` - Input references, their meaning depends on the input connector.
    /// * `ctx` - Cancellation and progress reporting.
    ///
    /// # Returns
    /// The final measures and history, or `MlError::Cancelled` if stopped at a checkpoint.
    fn train(&self, params: &Value, data: &[String], ctx: &TrainContext<'_>) -> Result<TrainOutput>;

    /// Runs inference over `data`, returning one prediction per item and in the same order.
    fn predict(&self, params: &Value, data: &[String]) -> Result<Vec<Prediction>>;

    /// Writes the current model into the repository.
    ///
    /// # Returns
    /// The written file, or `None` if there is no model to write yet.
    fn snapshot(&self) -> Result<Option<PathBuf>>;

    /// Releases the backend's state, and its files when `mode` asks so.
    fn clear(&self, mode: ClearMode) -> Result<()>;
}
