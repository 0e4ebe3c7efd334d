use std::{
    fs,
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use mllib::{
    ClearMode, Measures, MlError, MlLib, ModelConfig, ProgressSink, TrainContext, build,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Recorder {
    reports: AtomicUsize,
    last: Mutex<Measures>,
    hist: Mutex<Vec<(String, f64)>>,
}

impl ProgressSink for Recorder {
    fn report(&self, measures: &Measures) {
        self.reports.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = measures.clone();
    }

    fn append_hist(&self, name: &str, value: f64) {
        self.hist.lock().push((name.to_string(), value));
    }
}

fn scratch_repo(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("mllib-{tag}-{}-{nanos}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Two features, the label is whether the first one is the largest.
fn write_separable_csv(repo: &PathBuf) {
    let mut text = String::from("id,a,b,label\n");
    for i in 0..200 {
        let a = (i % 20) as f32 / 20.0;
        let b = ((i * 7) % 20) as f32 / 20.0;
        if a == b {
            continue;
        }
        text.push_str(&format!("{i},{a},{b},{}\n", (a > b) as u8));
    }
    fs::write(repo.join("train.csv"), text).unwrap();
}

fn csv_params() -> Value {
    json!({
        "input": {"connector": "csv", "id": "id", "label": "label"},
        "mllib": {"nclasses": 2, "seed": 11}
    })
}

fn train_call(iterations: usize) -> Value {
    json!({
        "mllib": {"solver": {"iterations": iterations, "base_lr": 0.5}, "net": {"batch_size": 16}},
        "output": {"measure": ["acc", "mcll", "f1"], "measure_hist": true}
    })
}

#[test]
fn test_train_then_predict_on_csv() {
    let repo = scratch_repo("csv");
    write_separable_csv(&repo);

    let backend = build(MlLib::Softmax, ModelConfig::new(&repo, csv_params())).unwrap();
    assert_eq!(backend.kind(), MlLib::Softmax);

    let cancel = CancellationToken::new();
    let recorder = Recorder::default();
    let ctx = TrainContext::new(&cancel, &recorder);

    let out = backend.train(&train_call(300), &[], &ctx).unwrap();

    assert_eq!(out.measures["iteration"], 300.0);
    assert!(out.measures["train_loss"] > 0.0);
    assert!(out.measures["acc"] > 0.7);
    assert_eq!(out.measures["acc"], out.measures["accp"]);
    assert!(out.measures.contains_key("f1"));
    assert_eq!(out.hist["train_loss"].len(), 300);
    assert_eq!(recorder.reports.load(Ordering::SeqCst), 300);
    assert!(recorder.hist.lock().iter().any(|(name, _)| name == "acc"));

    let data = vec!["0.9,0.1".to_string(), "0.1,0.9".to_string()];
    let predictions = backend.predict(&json!({"output": {"best": 2}}), &data).unwrap();

    assert_eq!(predictions.len(), 2);
    assert_eq!(predictions[0].uri, "0.9,0.1");
    assert_eq!(predictions[0].classes.len(), 2);
    assert_eq!(predictions[0].classes[0].cat, "1");
    assert_eq!(predictions[1].classes[0].cat, "0");
    assert!(predictions[0].classes[0].prob >= predictions[0].classes[1].prob);

    assert!(repo.join("model_iter_300.json").exists());
    fs::remove_dir_all(&repo).unwrap();
}

#[test]
fn test_new_backend_loads_latest_snapshot() {
    let repo = scratch_repo("reload");
    write_separable_csv(&repo);

    let first = build(MlLib::Softmax, ModelConfig::new(&repo, csv_params())).unwrap();
    let cancel = CancellationToken::new();
    let recorder = Recorder::default();
    first
        .train(&train_call(20), &[], &TrainContext::new(&cancel, &recorder))
        .unwrap();

    let second = build(MlLib::Softmax, ModelConfig::new(&repo, csv_params())).unwrap();
    let predictions = second.predict(&Value::Null, &["0.5,0.5".to_string()]).unwrap();
    assert_eq!(predictions[0].classes.len(), 1);

    second.clear(ClearMode::Lib).unwrap();
    assert!(!repo.join("model_iter_20.json").exists());
    assert!(matches!(
        second.predict(&Value::Null, &["0.5,0.5".to_string()]),
        Err(MlError::NotTrained)
    ));

    fs::remove_dir_all(&repo).unwrap();
}

#[test]
fn test_snapshot_rewrites_the_current_model() {
    let repo = scratch_repo("snapshot");
    write_separable_csv(&repo);

    let backend = build(MlLib::Softmax, ModelConfig::new(&repo, csv_params())).unwrap();
    assert_eq!(backend.snapshot().unwrap(), None);

    let cancel = CancellationToken::new();
    let recorder = Recorder::default();
    backend
        .train(&train_call(20), &[], &TrainContext::new(&cancel, &recorder))
        .unwrap();

    let written = repo.join("model_iter_20.json");
    fs::remove_file(&written).unwrap();

    assert_eq!(backend.snapshot().unwrap(), Some(written.clone()));
    assert!(written.exists());

    fs::remove_dir_all(&repo).unwrap();
}

#[test]
fn test_cancelled_training_stops_at_checkpoint() {
    let repo = scratch_repo("cancel");
    write_separable_csv(&repo);

    let backend = build(MlLib::Softmax, ModelConfig::new(&repo, csv_params())).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let recorder = Recorder::default();

    let err = backend
        .train(&train_call(100), &[], &TrainContext::new(&cancel, &recorder))
        .unwrap_err();

    assert!(matches!(err, MlError::Cancelled));
    assert_eq!(recorder.reports.load(Ordering::SeqCst), 0);
    assert!(matches!(
        backend.predict(&Value::Null, &["0.5,0.5".to_string()]),
        Err(MlError::NotTrained)
    ));

    fs::remove_dir_all(&repo).unwrap();
}

#[test]
fn test_missing_repository_is_rejected() {
    let repo = std::env::temp_dir().join(format!("mllib-missing-{}", std::process::id()));
    let err = build(MlLib::Softmax, ModelConfig::new(&repo, Value::Null)).err().unwrap();
    assert!(matches!(err, MlError::InvalidConfig(_)));
}

#[test]
fn test_unknown_connector_is_rejected_at_build() {
    let repo = scratch_repo("connector");
    let params = json!({"input": {"connector": "text"}});
    let err = build(MlLib::Softmax, ModelConfig::new(&repo, params)).err().unwrap();
    assert!(matches!(err, MlError::UnknownConnector(_)));
    fs::remove_dir_all(&repo).unwrap();
}

fn write_pgm(path: PathBuf, level: u8) {
    let mut bytes = b"P5\n2 2\n255\n".to_vec();
    bytes.extend([level; 4]);
    fs::write(path, bytes).unwrap();
}

#[test]
fn test_image_predict_requires_dimensions() {
    let repo = scratch_repo("image");
    for (class, level) in [("dark", 10), ("light", 240)] {
        let dir = repo.join("train").join(class);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..4 {
            write_pgm(dir.join(format!("{i}.pgm")), level + i);
        }
    }

    let params = json!({"input": {"connector": "image", "width": 2, "height": 2}, "mllib": {"seed": 1}});
    let backend = build(MlLib::Softmax, ModelConfig::new(&repo, params)).unwrap();

    let cancel = CancellationToken::new();
    let recorder = Recorder::default();
    let call = json!({"mllib": {"solver": {"iterations": 50, "base_lr": 1.0}}, "output": {"measure": ["acc"]}});
    let out = backend
        .train(&call, &[], &TrainContext::new(&cancel, &recorder))
        .unwrap();
    assert!(out.measures["train_loss"] > 0.0);

    let item = repo.join("train/light/0.pgm").display().to_string();
    let predictions = backend.predict(&Value::Null, &[item.clone()]).unwrap();
    assert_eq!(predictions[0].classes[0].cat, "light");
    assert!(predictions[0].classes[0].prob > 0.0);

    let err = backend
        .predict(&json!({"input": {"width": null, "height": null}}), &[item])
        .unwrap_err();
    assert!(err.is_validation());

    fs::remove_dir_all(&repo).unwrap();
}
