use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::{MlError, Result};

const PROB_EPS: f64 = 1e-7;

/// Per-feature min-max scaling fitted on the training set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scale {
    min: Vec<f32>,
    max: Vec<f32>,
}

impl Scale {
    /// Fits the scaling on the columns of `x`.
    pub fn fit(x: ArrayView2<f32>) -> Self {
        let min = x
            .axis_iter(Axis(1))
            .map(|c| c.fold(f32::INFINITY, |a, &b| a.min(b)))
            .collect();
        let max = x
            .axis_iter(Axis(1))
            .map(|c| c.fold(f32::NEG_INFINITY, |a, &b| a.max(b)))
            .collect();

        Self { min, max }
    }

    /// Scales every row of `x` in place into `[0, 1]`, constant columns map to `0`.
    pub fn apply(&self, x: &mut Array2<f32>) {
        for mut row in x.rows_mut() {
            for ((v, lo), hi) in row.iter_mut().zip(&self.min).zip(&self.max) {
                let span = hi - lo;
                *v = if span > 0.0 { (*v - lo) / span } else { 0.0 };
            }
        }
    }
}

/// A multinomial logistic regression model.
#[derive(Debug, Clone)]
pub struct SoftmaxModel {
    weights: Array2<f32>,
    bias: Array1<f32>,
    classes: Vec<String>,
    scale: Option<Scale>,
    iteration: usize,
}

/// The on-disk form of a `SoftmaxModel`.
#[derive(Serialize, Deserialize)]
struct ModelFile {
    features: usize,
    classes: Vec<String>,
    weights: Vec<f32>,
    bias: Vec<f32>,
    scale: Option<Scale>,
    iteration: usize,
}

impl SoftmaxModel {
    /// Creates a zero initialised model.
    ///
    /// # Arguments
    /// * `features` - The amount of input features.
    /// * `classes` - The class names, one output per class.
    pub fn new(features: usize, classes: Vec<String>) -> Self {
        let nclasses = classes.len();

        Self {
            weights: Array2::zeros((features, nclasses)),
            bias: Array1::zeros(nclasses),
            classes,
            scale: None,
            iteration: 0,
        }
    }

    pub fn features(&self) -> usize {
        self.weights.nrows()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn scale(&self) -> Option<&Scale> {
        self.scale.as_ref()
    }

    pub fn set_scale(&mut self, scale: Scale) {
        self.scale = Some(scale);
    }

    /// Computes the class probabilities for every row of `x`.
    pub fn probs(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut logits = x.dot(&self.weights) + &self.bias;

        for mut row in logits.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }

        logits
    }

    /// Makes a single SGD step over a batch.
    ///
    /// # Arguments
    /// * `x` - The batch's features.
    /// * `labels` - The batch's labels.
    /// * `lr` - The learning rate.
    ///
    /// # Returns
    /// The batch's mean cross-entropy before the step.
    pub fn step(&mut self, x: ArrayView2<f32>, labels: &[usize], lr: f32) -> f64 {
        let n = labels.len().max(1) as f32;
        let mut delta = self.probs(x);
        let loss = cross_entropy(delta.view(), labels);

        for (mut row, &label) in delta.rows_mut().into_iter().zip(labels) {
            row[label] -= 1.0;
            row.mapv_inplace(|v| v / n);
        }

        let grad_w = x.t().dot(&delta);
        let grad_b = delta.sum_axis(Axis(0));
        self.weights.scaled_add(-lr, &grad_w);
        self.bias.scaled_add(-lr, &grad_b);
        self.iteration += 1;

        loss
    }

    /// Serializes the model into a json document.
    pub fn to_json(&self) -> Result<String> {
        let file = ModelFile {
            features: self.features(),
            classes: self.classes.clone(),
            weights: self.weights.iter().copied().collect(),
            bias: self.bias.to_vec(),
            scale: self.scale.clone(),
            iteration: self.iteration,
        };

        serde_json::to_string(&file).map_err(|e| MlError::InvalidConfig(e.to_string()))
    }

    /// Deserializes a model written by `to_json`.
    pub fn from_json(text: &str, uri: &str) -> Result<Self> {
        let bad = |msg: String| MlError::Data {
            uri: uri.to_string(),
            msg,
        };

        let file: ModelFile = serde_json::from_str(text).map_err(|e| bad(e.to_string()))?;
        let nclasses = file.classes.len();
        let weights = Array2::from_shape_vec((file.features, nclasses), file.weights)
            .map_err(|e| bad(e.to_string()))?;

        if file.bias.len() != nclasses {
            return Err(bad(format!("{} biases for {nclasses} classes", file.bias.len())));
        }

        Ok(Self {
            weights,
            bias: Array1::from_vec(file.bias),
            classes: file.classes,
            scale: file.scale,
            iteration: file.iteration,
        })
    }
}

/// Mean cross-entropy of `probs` against `labels`.
///
/// Probabilities are clamped away from `0` and `1`, so the result is always positive.
pub fn cross_entropy(probs: ArrayView2<f32>, labels: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }

    let total: f64 = probs
        .rows()
        .into_iter()
        .zip(labels)
        .map(|(row, &label)| -(row[label] as f64).clamp(PROB_EPS, 1.0 - PROB_EPS).ln())
        .sum();

    total / labels.len() as f64
}

/// Index of the highest probability in `row`.
pub fn argmax(row: ArrayView1<f32>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
        .0
}
