//! The entry points of the serving api.

mod daemon;
mod json_api;

pub use daemon::{Daemon, Listener, serve_connection};
pub use json_api::JsonApi;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{envelope::Envelope, error::ApiError};
use json_api::envelope_of;

/// The api calls reachable through the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Call {
    Info,
    ServiceCreate,
    ServiceInfo,
    ServiceDelete,
    ServiceTrain,
    ServiceTrainStatus,
    ServiceTrainDelete,
    ServicePredict,
}

/// One request line: `{"call": ..., "service": ..., "body": {...}}`.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub call: Call,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub body: Value,
}

impl JsonApi {
    /// Serves one daemon request.
    ///
    /// Calls addressing a service through their body take the request's `service` when the
    /// body doesn't name one.
    pub async fn handle(&self, request: Request) -> Envelope {
        let Request {
            call,
            service,
            body,
        } = request;

        let res = match call {
            Call::Info => Ok(self.info_value()),
            Call::ServiceCreate => match require_service(service) {
                Ok(name) => self.create(&name, body).await,
                Err(e) => Err(e),
            },
            Call::ServiceInfo => require_service(service).and_then(|name| self.describe(&name)),
            Call::ServiceDelete => match require_service(service) {
                Ok(name) => self.delete(&name, body).await,
                Err(e) => Err(e),
            },
            Call::ServiceTrain => self.train(with_service(body, service)).await,
            Call::ServiceTrainStatus => self.train_status(with_service(body, service)).await,
            Call::ServiceTrainDelete => self.train_delete(with_service(body, service)).await,
            Call::ServicePredict => self.predict(with_service(body, service)).await,
        };

        envelope_of(res)
    }
}

fn require_service(service: Option<String>) -> Result<String, ApiError> {
    service.ok_or_else(|| ApiError::BadRequest("missing service name".to_string()))
}

fn with_service(body: Value, service: Option<String>) -> Value {
    let mut map = match body {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => return other,
    };

    if let Some(name) = service {
        map.entry("service").or_insert(Value::String(name));
    }

    Value::Object(map)
}
