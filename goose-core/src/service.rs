//! Lifecycle contract shared by every long-lived service in the engine.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

/// One-shot channel carrying `true` once a lifecycle transition completes.
pub type LifecycleSignal = oneshot::Receiver<bool>;

/// Failures raised by lifecycle transitions.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ServiceError {
    #[error("service is already running")]
    AlreadyRunning,
    #[error("service is not running")]
    NotRunning,
    #[error("service failed to start: {0}")]
    StartupFailed(String),
}

/// A service that can be started and stopped exactly once per cycle.
///
/// `start` on a running service and `stop` on a stopped one are errors;
/// `start` after a completed `stop` re-initializes cleanly. Callers block on
/// the returned signal when they need to know the transition finished.
#[async_trait]
pub trait Service: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &'static str;

    /// Fire up the service.
    async fn start(&self) -> Result<LifecycleSignal, ServiceError>;

    /// Shut the service down, releasing any held resources.
    async fn stop(&self) -> Result<LifecycleSignal, ServiceError>;
}

/// Build a signal that already carries its completion value, for transitions
/// that finish synchronously.
#[must_use]
pub fn completed_signal() -> LifecycleSignal {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(true);
    rx
}
