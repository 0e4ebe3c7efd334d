use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

/// The coarse operation a service is busy with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Idle,
    Training,
    Predicting,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Training => "training",
            Self::Predicting => "predicting",
        }
    }
}

/// Holds a service busy, it goes back to `Idle` when the guard is dropped.
pub struct BusyGuard {
    state: Arc<watch::Sender<ServiceState>>,
}

impl BusyGuard {
    /// Moves an idle service into `to`.
    ///
    /// The check and the transition happen under the channel's lock, so two callers can
    /// never both leave `Idle`.
    ///
    /// # Returns
    /// The guard, or the state the service is currently busy with.
    pub fn acquire(
        state: &Arc<watch::Sender<ServiceState>>,
        to: ServiceState,
    ) -> Result<Self, ServiceState> {
        let mut current = ServiceState::Idle;
        let acquired = state.send_if_modified(|s| {
            current = *s;
            if *s == ServiceState::Idle {
                *s = to;
                true
            } else {
                false
            }
        });

        if acquired {
            Ok(Self {
                state: state.clone(),
            })
        } else {
            Err(current)
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.state.send_replace(ServiceState::Idle);
    }
}
