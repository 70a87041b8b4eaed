use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::{
    task::WorkerStatus,
    worker::{WorkerMessage, WorkerName},
};

/// A lightweight view of a running worker, handed to task hooks and status
/// listeners.
///
/// The context does not keep the worker alive: once the runtime has exited,
/// calls to [`WorkerContext::reconfigure`] are silently ignored.
pub struct WorkerContext<C> {
    name: WorkerName,
    status_rx: watch::Receiver<WorkerStatus>,
    tx: mpsc::WeakUnboundedSender<WorkerMessage<C>>,
}

impl<C> WorkerContext<C> {
    pub(crate) fn new(
        name: WorkerName,
        status_rx: watch::Receiver<WorkerStatus>,
        tx: mpsc::WeakUnboundedSender<WorkerMessage<C>>,
    ) -> Self {
        Self {
            name,
            status_rx,
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The status as of the latest transition.
    pub fn status(&self) -> WorkerStatus {
        *self.status_rx.borrow()
    }

    /// Whether the worker runtime has exited.
    pub(crate) fn is_detached(&self) -> bool {
        self.status_rx.has_changed().is_err()
    }

    /// Replaces the worker configuration.
    ///
    /// With `process_immediately`, whatever delay was pending is discarded
    /// and the next cycle is armed right away (only while started).
    pub fn reconfigure(&self, config: C, process_immediately: bool) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(WorkerMessage::Reconfigure {
                config,
                process_immediately,
            });
        }
    }

    /// A context whose runtime is already gone, frozen in `status`.
    #[cfg(test)]
    pub(crate) fn detached(name: &str, status: WorkerStatus) -> Self {
        let (_status_tx, status_rx) = watch::channel(status);
        let (tx, _rx) = mpsc::unbounded_channel();
        Self::new(Arc::from(name), status_rx, tx.downgrade())
    }
}

impl<C> Clone for WorkerContext<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            status_rx: self.status_rx.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<C> std::fmt::Debug for WorkerContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}
