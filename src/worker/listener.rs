use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use crate::worker::WorkerContext;

/// Callback invoked on every status transition of a worker.
///
/// Listeners are compared by `Arc` identity: keep a clone of the `Arc` you
/// registered to remove it later.
pub type StatusListener<C> = Arc<dyn Fn(&WorkerContext<C>) + Send + Sync>;

/// Ordered set of status listeners.
pub(crate) struct StatusListeners<C> {
    listeners: Vec<StatusListener<C>>,
}

impl<C> StatusListeners<C> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, listener: StatusListener<C>) {
        if !self.contains(&listener) {
            self.listeners.push(listener);
        }
    }

    pub(crate) fn remove(&mut self, listener: &StatusListener<C>) {
        self.listeners.retain(|known| !Arc::ptr_eq(known, listener));
    }

    pub(crate) fn contains(&self, listener: &StatusListener<C>) -> bool {
        self.listeners.iter().any(|known| Arc::ptr_eq(known, listener))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Calls every listener in registration order.
    ///
    /// A panicking listener is logged and skipped; the others still run.
    pub(crate) fn notify(&self, ctx: &WorkerContext<C>) {
        for listener in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(ctx))).is_err() {
                tracing::error!(
                    worker = ctx.name(),
                    status = %ctx.status(),
                    "status listener panicked"
                );
            }
        }
    }
}
