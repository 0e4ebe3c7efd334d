//! Model backends served by the daemon.
//!
//! A backend owns one model and knows how to train it and how to predict with it, the
//! serving layer only ever talks to it through `MlBackend`.

mod backend;
mod config;
pub mod connectors;
mod error;
mod kind;
pub mod softmax;

use std::sync::Arc;

pub use backend::{
    ClassScore, MeasureHist, Measures, MlBackend, Prediction, ProgressSink, TrainContext,
    TrainOutput,
};
pub use config::{ModelConfig, merge_section};
pub use error::{MlError, Result};
pub use kind::{ClearMode, MlLib};

/// Builds the backend for a library.
///
/// # Arguments
/// * `kind` - The library to build.
/// * `config` - The model configuration of the service being created.
///
/// # Returns
/// The backend, or an error if `config` is rejected by it.
pub fn build(kind: MlLib, config: ModelConfig) -> Result<Arc<dyn MlBackend>> {
    let backend: Arc<dyn MlBackend> = match kind {
        MlLib::Softmax => Arc::new(softmax::SoftmaxBackend::new(config)?),
    };

    backend.validate_config()?;
    Ok(backend)
}
