use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;

use crate::error::PipelineError;

/// Pipeline lifecycle. `Recovering` is entered by the capture thread when
/// the device drops mid-run and left again on the first successful read.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Initializing,
    Running,
    Recovering { reason: String },
    Stopping,
    Stopped,
}

impl PipelineState {
    /// The edges the runtime actually drives: startup, the capture thread's
    /// disconnect/retry cycle, and ordered teardown.
    fn may_become(&self, next: &PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Initializing, Running)
                | (Running, Recovering { .. } | Stopping)
                | (Recovering { .. }, Running | Stopping)
                | (Stopping, Stopped)
        )
    }
}

/// Shared lifecycle handle. Clones drive and observe the same state; every
/// accepted transition is broadcast to the subscriber queue.
#[derive(Clone)]
pub struct StateManager {
    inner: Arc<RwLock<PipelineState>>,
    notify_tx: Sender<PipelineState>,
    notify_rx: Receiver<PipelineState>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = crossbeam_channel::unbounded();
        Self {
            inner: Arc::new(RwLock::new(PipelineState::Initializing)),
            notify_tx,
            notify_rx,
        }
    }

    /// Apply a lifecycle edge. Edges the lifecycle does not allow are
    /// rejected, e.g. a recovery report arriving after teardown has begun.
    pub fn transition(&self, next: PipelineState) -> Result<(), PipelineError> {
        let mut current = self.inner.write();
        if !current.may_become(&next) {
            return Err(PipelineError::Fatal(format!(
                "lifecycle does not allow {:?} -> {:?}",
                *current, next
            )));
        }
        tracing::info!("State transition: {:?} -> {:?}", *current, next);
        *current = next.clone();
        let _ = self.notify_tx.send(next);
        Ok(())
    }

    pub fn current(&self) -> PipelineState {
        self.inner.read().clone()
    }

    /// Accepted transitions, in order. Intended for a single observer;
    /// clones of the receiver share one queue.
    pub fn subscribe(&self) -> Receiver<PipelineState> {
        self.notify_rx.clone()
    }
}
