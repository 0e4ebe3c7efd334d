use serde::Deserialize;
use serde_json::Value;

use crate::{MlError, Result, config::merge_section};

const DEFAULT_ITERATIONS: usize = 1000;
const DEFAULT_BASE_LR: f32 = 0.1;
const DEFAULT_BATCH_SIZE: usize = 32;
const DEFAULT_BEST: usize = 1;

/// The measures the softmax backend knows how to evaluate.
pub const KNOWN_MEASURES: [&str; 3] = ["acc", "mcll", "f1"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    pub iterations: Option<usize>,
    pub base_lr: Option<f32>,
    /// Evaluate the requested measures every `test_interval` iterations, `0` for only at the end.
    pub test_interval: usize,
    /// Snapshot the model every `snapshot` iterations, `0` for only at the end.
    pub snapshot: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NetParams {
    pub batch_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MllibParams {
    pub solver: SolverParams,
    pub net: NetParams,
    pub nclasses: Option<usize>,
    pub seed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OutputParams {
    pub measure: Vec<String>,
    pub measure_hist: bool,
    pub best: Option<usize>,
}

/// The resolved parameters of a single training call.
#[derive(Debug)]
pub struct TrainParams {
    pub input: Value,
    pub mllib: MllibParams,
    pub output: OutputParams,
}

impl TrainParams {
    /// Resolves the call's parameters over the service defaults.
    ///
    /// # Returns
    /// An `InvalidParams` error if a section is malformed or an unknown measure is requested.
    pub fn resolve(defaults: &Value, call: &Value) -> Result<Self> {
        let input = merge_section(defaults, call, "input");
        let mllib: MllibParams = serde_json::from_value(merge_section(defaults, call, "mllib"))?;
        let output: OutputParams = serde_json::from_value(merge_section(defaults, call, "output"))?;

        if let Some(unknown) = output
            .measure
            .iter()
            .find(|m| !KNOWN_MEASURES.contains(&m.as_str()))
        {
            return Err(MlError::InvalidParams(format!("unknown measure {unknown}")));
        }

        if mllib.net.batch_size == Some(0) {
            return Err(MlError::InvalidParams("batch_size must be positive".to_string()));
        }

        Ok(Self {
            input,
            mllib,
            output,
        })
    }

    pub fn iterations(&self) -> usize {
        self.mllib.solver.iterations.unwrap_or(DEFAULT_ITERATIONS)
    }

    pub fn base_lr(&self) -> f32 {
        self.mllib.solver.base_lr.unwrap_or(DEFAULT_BASE_LR)
    }

    pub fn batch_size(&self) -> usize {
        self.mllib.net.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }
}

/// The resolved parameters of a single prediction call.
#[derive(Debug)]
pub struct PredictParams {
    pub input: Value,
    pub best: usize,
}

impl PredictParams {
    pub fn resolve(defaults: &Value, call: &Value) -> Result<Self> {
        let input = merge_section(defaults, call, "input");
        let output: OutputParams = serde_json::from_value(merge_section(defaults, call, "output"))?;

        Ok(Self {
            input,
            best: output.best.unwrap_or(DEFAULT_BEST),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults_apply() {
        let params = TrainParams::resolve(&Value::Null, &json!({})).unwrap();
        assert_eq!(params.iterations(), DEFAULT_ITERATIONS);
        assert_eq!(params.batch_size(), DEFAULT_BATCH_SIZE);
        assert!(!params.output.measure_hist);
    }

    #[test]
    fn test_call_parameters_are_read() {
        let call = json!({
            "mllib": {"gpu": true, "solver": {"iterations": 250, "base_lr": 0.01}, "net": {"batch_size": 8}},
            "output": {"measure": ["acc", "f1"], "measure_hist": true}
        });

        let params = TrainParams::resolve(&Value::Null, &call).unwrap();
        assert_eq!(params.iterations(), 250);
        assert_eq!(params.batch_size(), 8);
        assert_eq!(params.output.measure, vec!["acc", "f1"]);
        assert!(params.output.measure_hist);
    }

    #[test]
    fn test_unknown_measure_is_rejected() {
        let call = json!({"output": {"measure": ["auc"]}});
        assert!(matches!(
            TrainParams::resolve(&Value::Null, &call),
            Err(MlError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_predict_best_defaults_to_one() {
        let params = PredictParams::resolve(&Value::Null, &json!({"output": {"best": 3}})).unwrap();
        assert_eq!(params.best, 3);

        let params = PredictParams::resolve(&Value::Null, &json!({})).unwrap();
        assert_eq!(params.best, 1);
    }
}
