//! Admission control awaited before every agent call.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::error::AgentError;

/// Held for the duration of one agent call; dropping it releases the slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl GatePermit {
    /// A permit that holds no resource.
    pub fn free() -> Self {
        Self { _permit: None }
    }
}

/// Injected concurrency or rate limiter shared across sessions.
#[async_trait]
pub trait RateGate: Send + Sync {
    /// Wait for admission. Errors are reported as transient agent failures.
    async fn acquire(&self) -> Result<GatePermit, AgentError>;
}

/// Admits every call immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

#[async_trait]
impl RateGate for Unbounded {
    async fn acquire(&self) -> Result<GatePermit, AgentError> {
        Ok(GatePermit::free())
    }
}

/// Caps the number of in-flight agent calls across all sessions sharing it.
#[derive(Debug, Clone)]
pub struct SemaphoreGate {
    semaphore: Arc<Semaphore>,
    permits: usize,
}

impl SemaphoreGate {
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
        }
    }

    pub fn permits(&self) -> usize {
        self.permits
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl RateGate for SemaphoreGate {
    async fn acquire(&self) -> Result<GatePermit, AgentError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::Transient("rate gate closed".to_string()))?;
        Ok(GatePermit {
            _permit: Some(permit),
        })
    }
}
