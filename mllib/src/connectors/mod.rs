//! Input connectors turn input references into feature matrices.

mod csv;
mod image;

use std::{path::Path, str::FromStr};

use ndarray::{Array2, Axis};
use rand::{Rng, seq::SliceRandom};
use serde_json::Value;

use crate::{MlError, Result};

pub use csv::CsvParams;
pub use image::{ImageParams, decode_pgm};

/// The input connectors a service can be configured with.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    #[default]
    Csv,
    Image,
}

impl FromStr for ConnectorKind {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "csv" => Ok(Self::Csv),
            "image" => Ok(Self::Image),
            other => Err(MlError::UnknownConnector(other.to_string())),
        }
    }
}

/// A labelled feature matrix, one row per sample.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub x: Array2<f32>,
    pub labels: Vec<usize>,
    pub classes: Vec<String>,
}

impl Dataset {
    /// The amount of samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// The amount of features per sample.
    pub fn features(&self) -> usize {
        self.x.ncols()
    }

    /// Splits off the last `ratio` of the samples as a held-out set.
    ///
    /// # Arguments
    /// * `ratio` - The fraction of samples to hold out, clamped to `[0, 1)`.
    /// * `shuffle` - Whether to shuffle the samples before splitting.
    /// * `rng` - Used for shuffling.
    ///
    /// # Returns
    /// The `(train, test)` pair, `test` is empty when `ratio` is `0`.
    pub fn split<R: Rng>(self, ratio: f64, shuffle: bool, rng: &mut R) -> (Dataset, Dataset) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if shuffle {
            order.shuffle(rng);
        }

        let ratio = ratio.clamp(0.0, 0.99);
        let ntest = (self.len() as f64 * ratio).floor() as usize;
        let (train_idx, test_idx) = order.split_at(self.len() - ntest);

        (self.select(train_idx), self.select(test_idx))
    }

    fn select(&self, idx: &[usize]) -> Dataset {
        Dataset {
            x: self.x.select(Axis(0), idx),
            labels: idx.iter().map(|&i| self.labels[i]).collect(),
            classes: self.classes.clone(),
        }
    }
}

/// Builds a dataset out of parsed rows.
///
/// # Arguments
/// * `rows` - The feature rows, all must share the same length.
/// * `labels` - One class index per row.
/// * `classes` - The class names, indexed by label.
/// * `uri` - Where the rows came from, for error reporting.
pub(crate) fn assemble(
    rows: Vec<Vec<f32>>,
    labels: Vec<usize>,
    classes: Vec<String>,
    uri: &str,
) -> Result<Dataset> {
    let features = rows.first().map(Vec::len).unwrap_or(0);
    if let Some(i) = rows.iter().position(|r| r.len() != features) {
        return Err(MlError::Data {
            uri: uri.to_string(),
            msg: format!("row {i} has {} features, expected {features}", rows[i].len()),
        });
    }

    let nrows = rows.len();
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    let x = Array2::from_shape_vec((nrows, features), flat).map_err(|e| MlError::Data {
        uri: uri.to_string(),
        msg: e.to_string(),
    })?;

    Ok(Dataset { x, labels, classes })
}

/// Resolves a connector from the merged `input` parameters.
pub fn connector_kind(input: &Value) -> Result<ConnectorKind> {
    match input.get("connector").and_then(Value::as_str) {
        Some(name) => name.parse(),
        None => Ok(ConnectorKind::default()),
    }
}

/// Loads a training set.
///
/// # Arguments
/// * `kind` - The connector to use.
/// * `input` - The merged `input` parameters.
/// * `data` - Input references, the repository default is used when empty.
/// * `repository` - The model repository.
/// * `nclasses` - The configured amount of classes, if any.
pub fn load_train_set(
    kind: ConnectorKind,
    input: &Value,
    data: &[String],
    repository: &Path,
    nclasses: Option<usize>,
) -> Result<Dataset> {
    match kind {
        ConnectorKind::Csv => {
            let params: CsvParams = serde_json::from_value(input.clone())?;
            let default = repository.join("train.csv").display().to_string();
            csv::load_files(&params, uris_or(data, default), nclasses)
        }
        ConnectorKind::Image => {
            let params: ImageParams = serde_json::from_value(input.clone())?;
            let default = repository.join("train").display().to_string();
            image::load_dirs(&params, uris_or(data, default))
        }
    }
}

/// Extracts the features of a single item to predict.
pub fn load_item(kind: ConnectorKind, input: &Value, item: &str) -> Result<Vec<f32>> {
    match kind {
        ConnectorKind::Csv => {
            let params: CsvParams = serde_json::from_value(input.clone())?;
            csv::parse_inline(&params, item)
        }
        ConnectorKind::Image => {
            let params: ImageParams = serde_json::from_value(input.clone())?;
            image::load_file(&params, Path::new(item))
        }
    }
}

fn uris_or(data: &[String], default: String) -> Vec<String> {
    if data.is_empty() {
        vec![default]
    } else {
        data.to_vec()
    }
}
