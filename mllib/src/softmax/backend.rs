use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use ndarray::{Array2, Axis};
use parking_lot::RwLock;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde_json::Value;

use super::{
    metrics,
    model::{Scale, SoftmaxModel},
    params::{PredictParams, TrainParams},
};
use crate::{
    ClassScore, ClearMode, MeasureHist, Measures, MlBackend, MlError, MlLib, ModelConfig,
    Prediction, Result, TrainContext, TrainOutput,
    connectors::{self, ConnectorKind, Dataset},
};

const SNAPSHOT_PREFIX: &str = "model_iter_";
const SNAPSHOT_EXT: &str = "json";

/// A `MlBackend` serving a multinomial logistic regression classifier.
///
/// Training works on a private copy of the model, the served model is only swapped once
/// training completes, so predictions never observe a half trained model.
pub struct SoftmaxBackend {
    config: ModelConfig,
    model: RwLock<Option<SoftmaxModel>>,
}

impl SoftmaxBackend {
    /// Creates a new `SoftmaxBackend`, loading the newest snapshot in the repository if any.
    ///
    /// # Arguments
    /// * `config` - The service's model configuration.
    ///
    /// # Returns
    /// An `InvalidConfig` error if the repository isn't a directory, or a `Data` error if
    /// its newest snapshot is unreadable.
    pub fn new(config: ModelConfig) -> Result<Self> {
        if !config.repository.is_dir() {
            return Err(MlError::InvalidConfig(format!(
                "repository {} is not a directory",
                config.repository.display()
            )));
        }

        let model = match latest_snapshot(&config.repository)? {
            Some(path) => {
                let text = fs::read_to_string(&path)?;
                let model = SoftmaxModel::from_json(&text, &path.display().to_string())?;
                info!(path = path.display().to_string().as_str(); "loaded model snapshot");
                Some(model)
            }
            None => None,
        };

        Ok(Self {
            config,
            model: RwLock::new(model),
        })
    }

    fn connector(&self, input: &Value) -> Result<ConnectorKind> {
        connectors::connector_kind(input)
    }

    fn write_snapshot(&self, model: &SoftmaxModel) -> Result<PathBuf> {
        let path = self.config.repository.join(format!(
            "{SNAPSHOT_PREFIX}{}.{SNAPSHOT_EXT}",
            model.iteration()
        ));
        fs::write(&path, model.to_json()?)?;
        debug!(path = path.display().to_string().as_str(); "wrote model snapshot");
        Ok(path)
    }

    fn load_train_set(&self, params: &TrainParams, data: &[String]) -> Result<Dataset> {
        let kind = self.connector(&params.input)?;
        connectors::load_train_set(
            kind,
            &params.input,
            data,
            &self.config.repository,
            params.mllib.nclasses,
        )
    }
}

impl MlBackend for SoftmaxBackend {
    fn kind(&self) -> MlLib {
        MlLib::Softmax
    }

    fn validate_config(&self) -> Result<()> {
        let input = self.config.section("input");
        let kind = self.connector(input)?;

        if let Some(nclasses) = self.config.section("mllib").get("nclasses") {
            match nclasses.as_u64() {
                Some(n) if n >= 2 => {}
                _ => {
                    return Err(MlError::InvalidConfig(format!(
                        "nclasses must be an integer greater than one, got {nclasses}"
                    )));
                }
            }
        }

        if kind == ConnectorKind::Image {
            let params: connectors::ImageParams = serde_json::from_value(input.clone())
                .map_err(|e| MlError::InvalidConfig(e.to_string()))?;
            if params.width.is_some() != params.height.is_some() {
                return Err(MlError::InvalidConfig(
                    "width and height must be given together".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn train(&self, params: &Value, data: &[String], ctx: &TrainContext<'_>) -> Result<TrainOutput> {
        let params = TrainParams::resolve(&self.config.parameters, params)?;
        let mut rng = match params.mllib.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let dataset = self.load_train_set(&params, data)?;
        let (test_split, shuffle) = split_params(&params.input);
        let (mut train, mut test) = dataset.split(test_split, shuffle, &mut rng);

        if train.is_empty() {
            return Err(MlError::InvalidParams("the training split is empty".to_string()));
        }

        let nclasses = train.classes.len();
        let mut model = SoftmaxModel::new(train.features(), train.classes.clone());

        if params.input.get("scale").and_then(Value::as_bool).unwrap_or(false) {
            let scale = Scale::fit(train.x.view());
            scale.apply(&mut train.x);
            scale.apply(&mut test.x);
            model.set_scale(scale);
        }

        let eval_set = if test.is_empty() { &train } else { &test };
        let iterations = params.iterations();
        let lr = params.base_lr();
        let test_interval = params.mllib.solver.test_interval;
        let snapshot = params.mllib.solver.snapshot;
        let mut batches = Batches::new(train.len(), params.batch_size());
        let mut hist = MeasureHist::new();
        let mut measures = Measures::new();

        info!(
            samples = train.len(),
            features = train.features(),
            classes = nclasses,
            iterations = iterations;
            "training softmax model"
        );

        for iteration in 1..=iterations {
            ctx.checkpoint()?;

            let idx = batches.next(&mut rng);
            let x = train.x.select(Axis(0), idx);
            let labels: Vec<usize> = idx.iter().map(|&i| train.labels[i]).collect();
            let loss = model.step(x.view(), &labels, lr);

            measures.insert("iteration".to_string(), iteration as f64);
            measures.insert("train_loss".to_string(), loss);
            if params.output.measure_hist {
                record(&mut hist, ctx, "train_loss", loss);
            }

            let at_end = iteration == iterations;
            if at_end || (test_interval > 0 && iteration % test_interval == 0) {
                let tested = evaluate(&model, eval_set, nclasses, &params.output.measure);
                if params.output.measure_hist {
                    for (name, value) in &tested {
                        record(&mut hist, ctx, name, *value);
                    }
                }
                measures.extend(tested);
            }

            ctx.report(&measures);

            if snapshot > 0 && iteration % snapshot == 0 && !at_end {
                if let Err(e) = self.write_snapshot(&model) {
                    warn!(iteration = iteration; "failed to write snapshot: {e}");
                }
            }
        }

        self.write_snapshot(&model)?;
        *self.model.write() = Some(model);

        Ok(TrainOutput { measures, hist })
    }

    fn predict(&self, params: &Value, data: &[String]) -> Result<Vec<Prediction>> {
        let params = PredictParams::resolve(&self.config.parameters, params)?;
        let kind = self.connector(&params.input)?;

        let guard = self.model.read();
        let model = guard.as_ref().ok_or(MlError::NotTrained)?;

        let mut rows = Vec::with_capacity(data.len() * model.features());
        for item in data {
            let features = connectors::load_item(kind, &params.input, item)?;
            if features.len() != model.features() {
                return Err(MlError::InvalidParams(format!(
                    "{item} has {} features, the model expects {}",
                    features.len(),
                    model.features()
                )));
            }
            rows.extend(features);
        }

        let mut x = Array2::from_shape_vec((data.len(), model.features()), rows)
            .map_err(|e| MlError::InvalidParams(e.to_string()))?;
        if let Some(scale) = model.scale() {
            scale.apply(&mut x);
        }

        let probs = model.probs(x.view());
        let predictions = data
            .iter()
            .zip(probs.rows())
            .map(|(uri, row)| {
                let mut classes: Vec<ClassScore> = row
                    .iter()
                    .zip(model.classes())
                    .map(|(&p, cat)| ClassScore {
                        cat: cat.clone(),
                        prob: p as f64,
                    })
                    .collect();
                classes.sort_by(|a, b| b.prob.total_cmp(&a.prob));
                classes.truncate(params.best.max(1));

                Prediction {
                    uri: uri.clone(),
                    classes,
                }
            })
            .collect();

        Ok(predictions)
    }

    fn snapshot(&self) -> Result<Option<PathBuf>> {
        match self.model.read().as_ref() {
            Some(model) => self.write_snapshot(model).map(Some),
            None => Ok(None),
        }
    }

    fn clear(&self, mode: ClearMode) -> Result<()> {
        self.model.write().take();

        if mode == ClearMode::Lib {
            for path in snapshots(&self.config.repository)? {
                fs::remove_file(&path)?;
                debug!(path = path.display().to_string().as_str(); "removed model snapshot");
            }
        }

        Ok(())
    }
}

fn record(hist: &mut MeasureHist, ctx: &TrainContext<'_>, name: &str, value: f64) {
    hist.entry(name.to_string()).or_default().push(value);
    ctx.append_hist(name, value);
}

fn evaluate(model: &SoftmaxModel, set: &Dataset, nclasses: usize, wanted: &[String]) -> Measures {
    let probs = model.probs(set.x.view());
    metrics::evaluate(probs.view(), &set.labels, nclasses, wanted)
}

fn split_params(input: &Value) -> (f64, bool) {
    let test_split = input.get("test_split").and_then(Value::as_f64).unwrap_or(0.0);
    let shuffle = input.get("shuffle").and_then(Value::as_bool).unwrap_or(false);
    (test_split, shuffle)
}

/// Walks over a shuffled permutation of the samples, one batch at a time.
struct Batches {
    order: Vec<usize>,
    cursor: usize,
    size: usize,
}

impl Batches {
    fn new(len: usize, size: usize) -> Self {
        Self {
            order: (0..len).collect(),
            cursor: len,
            size: size.min(len),
        }
    }

    fn next<R: Rng>(&mut self, rng: &mut R) -> &[usize] {
        if self.cursor + self.size > self.order.len() {
            self.order.shuffle(rng);
            self.cursor = 0;
        }

        let batch = &self.order[self.cursor..self.cursor + self.size];
        self.cursor += self.size;
        batch
    }
}

/// Every snapshot file in `repository`, with its iteration.
fn snapshots_with_iter(repository: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut found = Vec::new();

    for entry in fs::read_dir(repository)? {
        let path = entry?.path();
        let iteration = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(SNAPSHOT_PREFIX))
            .and_then(|n| n.strip_suffix(&format!(".{SNAPSHOT_EXT}")))
            .and_then(|n| n.parse().ok());

        if let Some(iteration) = iteration {
            found.push((iteration, path));
        }
    }

    Ok(found)
}

fn snapshots(repository: &Path) -> Result<Vec<PathBuf>> {
    Ok(snapshots_with_iter(repository)?
        .into_iter()
        .map(|(_, path)| path)
        .collect())
}

fn latest_snapshot(repository: &Path) -> Result<Option<PathBuf>> {
    Ok(snapshots_with_iter(repository)?
        .into_iter()
        .max_by_key(|(iteration, _)| *iteration)
        .map(|(_, path)| path))
}
