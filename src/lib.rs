pub mod api;
pub mod config;
pub mod envelope;
pub mod error;
pub mod job;
pub mod registry;
pub mod scheduler;
pub mod service;

pub use api::{Call, Daemon, JsonApi, Listener, Request};
pub use config::{DaemonConfig, ServiceConfig};
pub use envelope::Envelope;
pub use error::{ApiError, Result};
pub use job::{Job, JobSnapshot, JobState};
pub use registry::{BackendFactory, MllibFactory, Registry};
pub use scheduler::{Scheduler, StatusReport};
pub use service::{Service, ServiceState};
