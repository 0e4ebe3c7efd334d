use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use futures::future;
use log::{info, warn};
use mllib::{ClearMode, MlBackend, MlLib, ModelConfig};
use parking_lot::RwLock;
use tokio::task;

use crate::{
    config::ServiceConfig,
    error::{ApiError, Result},
    scheduler::Scheduler,
    service::Service,
};

/// Builds the backend of a service being created.
pub trait BackendFactory: Send + Sync {
    fn build(&self, kind: MlLib, config: ModelConfig) -> mllib::Result<Arc<dyn MlBackend>>;
}

/// Builds backends out of the `mllib` crate.
pub struct MllibFactory;

impl BackendFactory for MllibFactory {
    fn build(&self, kind: MlLib, config: ModelConfig) -> mllib::Result<Arc<dyn MlBackend>> {
        mllib::build(kind, config)
    }
}

/// The process-wide map from service name to `Service`.
///
/// The map lock is only held to look up, insert or remove an entry, never across a
/// backend call, so unrelated services never wait on each other.
pub struct Registry {
    services: RwLock<HashMap<String, Arc<Service>>>,
    factory: Arc<dyn BackendFactory>,
    scheduler: Scheduler,
}

impl Registry {
    /// Creates a new empty `Registry` over the `mllib` backends.
    ///
    /// # Arguments
    /// * `job_retention` - The amount of terminal jobs kept per service.
    pub fn new(job_retention: usize) -> Self {
        Self::with_factory(Arc::new(MllibFactory), job_retention)
    }

    /// Creates a new empty `Registry` over the backends built by `factory`.
    pub fn with_factory(factory: Arc<dyn BackendFactory>, job_retention: usize) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            factory,
            scheduler: Scheduler::new(job_retention),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Creates and registers a service.
    ///
    /// # Arguments
    /// * `name` - The service's name, must not be taken.
    /// * `config` - The service's configuration.
    ///
    /// # Returns
    /// An `AlreadyExists` error on a name collision, or the backend's construction error.
    pub async fn create(&self, name: &str, config: ServiceConfig) -> Result<Arc<Service>> {
        if name.is_empty() {
            return Err(ApiError::BadRequest("empty service name".to_string()));
        }
        if self.services.read().contains_key(name) {
            return Err(ApiError::AlreadyExists(name.to_string()));
        }

        let kind: MlLib = config.mllib.parse().map_err(ApiError::UnknownLibrary)?;
        let model = ModelConfig::new(config.model.repository, config.parameters);
        let factory = self.factory.clone();

        let backend = task::spawn_blocking(move || factory.build(kind, model))
            .await
            .map_err(|e| ApiError::BackendFailure(e.to_string()))?
            .map_err(ApiError::from_creation)?;

        let service = Arc::new(Service::new(
            name.to_string(),
            kind,
            config.description,
            backend,
        ));

        match self.services.write().entry(name.to_string()) {
            Entry::Occupied(_) => return Err(ApiError::AlreadyExists(name.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(service.clone());
            }
        }

        info!(service = name, mllib = kind.name(); "service created");
        Ok(service)
    }

    /// Resolves a live service by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<Service>> {
        self.services
            .read()
            .get(name)
            .filter(|service| !service.is_closing())
            .cloned()
            .ok_or_else(|| ApiError::ServiceNotFound(name.to_string()))
    }

    /// Names of every live service, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .values()
            .filter(|service| !service.is_closing())
            .map(|service| service.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Tears a service down and unregisters it.
    ///
    /// Running jobs are terminated first, then the backend is released with `mode`, then
    /// the entry is removed. The service is invisible to lookups from the moment the
    /// teardown starts.
    pub async fn delete(&self, name: &str, mode: ClearMode) -> Result<()> {
        let service = self.lookup(name)?;
        if !service.begin_close() {
            return Err(ApiError::ServiceNotFound(name.to_string()));
        }

        let res = service.shutdown(mode).await;

        {
            let mut services = self.services.write();
            if services.get(name).is_some_and(|s| Arc::ptr_eq(s, &service)) {
                services.remove(name);
            }
        }

        match &res {
            Ok(()) => info!(service = name; "service deleted"),
            Err(e) => warn!(service = name; "service deleted, releasing its backend failed: {e}"),
        }

        res
    }

    /// Deletes every service, keeping their files, and waits for their jobs to return.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.services.read().keys().cloned().collect();

        let deletes = names.iter().map(|name| self.delete(name, ClearMode::Mem));
        for (name, res) in names.iter().zip(future::join_all(deletes).await) {
            if let Err(e) = res {
                warn!(service = name.as_str(); "teardown failed: {e}");
            }
        }

        self.scheduler.drain().await;
    }
}
