//! The `{status, head, body}` shape every call answers with.

use mllib::{MeasureHist, Measures};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::{error::ApiError, job::JobState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub code: u16,
    pub msg: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dd_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dd_msg: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Head {
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<String>>,
}

impl Head {
    pub fn new(method: &'static str) -> Self {
        Self {
            method,
            service: None,
            time: None,
            job: None,
            status: None,
            services: None,
        }
    }

    pub fn service(mut self, name: &str) -> Self {
        self.service = Some(name.to_string());
        self
    }

    pub fn time(mut self, secs: f64) -> Self {
        self.time = Some(secs);
        self
    }

    pub fn job(mut self, id: u64, state: JobState) -> Self {
        self.job = Some(id);
        self.status = Some(state);
        self
    }

    pub fn services(mut self, names: Vec<String>) -> Self {
        self.services = Some(names);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<Head>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Envelope {
    fn with_status(code: u16, msg: &'static str) -> Self {
        Self {
            status: Status {
                code,
                msg,
                dd_code: None,
                dd_msg: None,
            },
            head: None,
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::with_status(200, "OK")
    }

    pub fn created() -> Self {
        Self::with_status(201, "Created")
    }

    pub fn error(err: &ApiError) -> Self {
        let mut envelope = Self::with_status(err.code(), err.msg());
        envelope.status.dd_code = Some(err.dd_code());
        envelope.status.dd_msg = Some(err.to_string());
        envelope
    }

    pub fn head(mut self, head: Head) -> Self {
        self.head = Some(head);
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(text) => text,
            Err(e) => Envelope::error(&ApiError::BackendFailure(e.to_string()))
                .without_payload()
                .to_json(),
        }
    }

    fn without_payload(mut self) -> Self {
        self.head = None;
        self.body = None;
        self
    }
}

/// The body of a training report.
///
/// History series are keyed `<measure>_hist`, `measure_hist` is left out when there's none.
pub fn training_body(measures: &Measures, hist: &MeasureHist) -> Value {
    let mut body = Map::new();
    body.insert("measure".to_string(), json!(measures));

    if !hist.is_empty() {
        let series: Map<String, Value> = hist
            .iter()
            .map(|(name, values)| (format!("{name}_hist"), json!(values)))
            .collect();
        body.insert("measure_hist".to_string(), Value::Object(series));
    }

    Value::Object(body)
}
