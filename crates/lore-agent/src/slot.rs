//! Single-flight inference per persona.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};

/// Guard proving the holder owns the inference slot. Dropping it frees the
/// slot, whether the work finished or was cancelled.
#[derive(Debug)]
pub struct SlotGuard {
    _guard: OwnedMutexGuard<()>,
}

/// The persona's one inference slot, shared by the foreground path and
/// background tasks.
#[derive(Debug, Clone, Default)]
pub struct InferenceSlot {
    inner: Arc<Mutex<()>>,
}

impl InferenceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the slot. Returns [`AgentError::Cancelled`] if `cancel`
    /// fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<SlotGuard> {
        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            guard = self.inner.clone().lock_owned() => Ok(SlotGuard { _guard: guard }),
        }
    }

    /// Take the slot only if it is free right now.
    pub fn try_acquire(&self) -> Option<SlotGuard> {
        self.inner
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| SlotGuard { _guard: guard })
    }

    pub fn is_busy(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
