use std::{sync::Arc, time::Duration};

use log::warn;
use mllib::ClearMode;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::{
    config::ServiceConfig,
    envelope::{Envelope, Head, training_body},
    error::{ApiError, Result},
    job::JobState,
    registry::Registry,
};

const TRAIN: &str = "/train";
const PREDICT: &str = "/predict";
const INFO: &str = "/info";

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    #[serde(default)]
    clear: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrainRequest {
    service: String,
    #[serde(default, rename = "async")]
    background: bool,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    data: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    service: String,
    job: u64,
    #[serde(default)]
    timeout: f64,
}

#[derive(Debug, Deserialize)]
struct JobRequest {
    service: String,
    job: u64,
}

#[derive(Debug, Deserialize)]
struct PredictRequest {
    service: String,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    data: Vec<String>,
}

/// The serving api, taking json documents and answering serialized envelopes.
///
/// Every entry point also has a `Value` flavour used by the daemon.
#[derive(Clone)]
pub struct JsonApi {
    registry: Arc<Registry>,
}

impl JsonApi {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn info(&self) -> String {
        self.info_value().to_json()
    }

    pub async fn service_create(&self, name: &str, json: &str) -> String {
        let res = async { self.create(name, parse(json)?).await }.await;
        respond(res)
    }

    pub fn service_info(&self, name: &str) -> String {
        respond(self.describe(name))
    }

    pub async fn service_delete(&self, name: &str, json: &str) -> String {
        let res = async { self.delete(name, parse(json)?).await }.await;
        respond(res)
    }

    pub async fn service_train(&self, json: &str) -> String {
        let res = async { self.train(parse(json)?).await }.await;
        respond(res)
    }

    pub async fn service_train_status(&self, json: &str) -> String {
        let res = async { self.train_status(parse(json)?).await }.await;
        respond(res)
    }

    pub async fn service_train_delete(&self, json: &str) -> String {
        let res = async { self.train_delete(parse(json)?).await }.await;
        respond(res)
    }

    pub async fn service_predict(&self, json: &str) -> String {
        let res = async { self.predict(parse(json)?).await }.await;
        respond(res)
    }

    pub(crate) fn info_value(&self) -> Envelope {
        Envelope::ok().head(Head::new(INFO).services(self.registry.names()))
    }

    pub(crate) async fn create(&self, name: &str, body: Value) -> Result<Envelope> {
        let config: ServiceConfig = from_body(body)?;
        self.registry.create(name, config).await?;
        Ok(Envelope::created())
    }

    pub(crate) fn describe(&self, name: &str) -> Result<Envelope> {
        let service = self.registry.lookup(name)?;
        let jobs: Vec<Value> = service
            .job_states()
            .into_iter()
            .map(|(id, state)| json!({"job": id, "status": state}))
            .collect();

        Ok(Envelope::ok().body(json!({
            "name": service.name(),
            "mllib": service.kind().name(),
            "description": service.description(),
            "state": service.state(),
            "jobs": jobs,
        })))
    }

    pub(crate) async fn delete(&self, name: &str, body: Value) -> Result<Envelope> {
        let request: DeleteRequest = if body.is_null() {
            DeleteRequest { clear: None }
        } else {
            from_body(body)?
        };

        let mode = match request.clear.as_deref() {
            Some(mode) => mode
                .parse::<ClearMode>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
            None => ClearMode::default(),
        };

        self.registry.delete(name, mode).await?;
        Ok(Envelope::ok())
    }

    pub(crate) async fn train(&self, body: Value) -> Result<Envelope> {
        let request: TrainRequest = from_body(body)?;
        let service = self.registry.lookup(&request.service)?;
        let start = Instant::now();

        if request.background {
            let job = self
                .registry
                .scheduler()
                .submit(&service, request.parameters, request.data)?;

            return Ok(Envelope::created().head(Head::new(TRAIN).job(job.id(), JobState::Running)));
        }

        let output = service.train_sync(request.parameters, request.data).await?;

        Ok(Envelope::created()
            .head(Head::new(TRAIN).time(start.elapsed().as_secs_f64()))
            .body(training_body(&output.measures, &output.hist)))
    }

    pub(crate) async fn train_status(&self, body: Value) -> Result<Envelope> {
        let request: StatusRequest = from_body(body)?;
        let timeout = Duration::try_from_secs_f64(request.timeout)
            .map_err(|e| ApiError::BadRequest(format!("timeout {}: {e}", request.timeout)))?;

        let service = self.registry.lookup(&request.service)?;
        let report = self
            .registry
            .scheduler()
            .status(&service, request.job, timeout)
            .await?;

        let time = if report.timed_out {
            request.timeout
        } else {
            report.waited.as_secs_f64()
        };

        let snapshot = report.snapshot;
        let envelope = match &snapshot.error {
            Some(msg) => Envelope::error(&ApiError::BackendFailure(msg.clone())),
            None => Envelope::ok(),
        };

        Ok(envelope
            .head(Head::new(TRAIN).time(time).job(snapshot.id, snapshot.state))
            .body(training_body(&snapshot.measures, &snapshot.hist)))
    }

    pub(crate) async fn train_delete(&self, body: Value) -> Result<Envelope> {
        let request: JobRequest = from_body(body)?;
        let service = self.registry.lookup(&request.service)?;
        let start = Instant::now();

        let snapshot = self
            .registry
            .scheduler()
            .cancel(&service, request.job)
            .await?;

        Ok(Envelope::ok()
            .head(
                Head::new(TRAIN)
                    .time(start.elapsed().as_secs_f64())
                    .job(snapshot.id, snapshot.state),
            )
            .body(training_body(&snapshot.measures, &snapshot.hist)))
    }

    pub(crate) async fn predict(&self, body: Value) -> Result<Envelope> {
        let request: PredictRequest = from_body(body)?;
        let service = self.registry.lookup(&request.service)?;
        let start = Instant::now();

        let predictions = service.predict(request.parameters, request.data).await?;

        Ok(Envelope::ok()
            .head(
                Head::new(PREDICT)
                    .service(service.name())
                    .time(start.elapsed().as_secs_f64()),
            )
            .body(json!({ "predictions": predictions })))
    }
}

/// Turns a call's outcome into its serialized envelope.
pub(crate) fn respond(res: Result<Envelope>) -> String {
    envelope_of(res).to_json()
}

pub(crate) fn envelope_of(res: Result<Envelope>) -> Envelope {
    res.unwrap_or_else(|e| {
        warn!(code = e.code(), dd_code = e.dd_code(); "call failed: {e}");
        Envelope::error(&e)
    })
}

fn parse(json: &str) -> Result<Value> {
    if json.trim().is_empty() {
        return Ok(Value::Null);
    }

    Ok(serde_json::from_str(json)?)
}

fn from_body<T: DeserializeOwned>(body: Value) -> Result<T> {
    Ok(serde_json::from_value(body)?)
}
