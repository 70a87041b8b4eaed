//! Live reconfiguration of workers from an external change feed.
//!
//! A [`ChangeSource`] hands out [`Subscription`]s filtered to the records a
//! worker cares about. [`Watched`] decorates a [`Task`](crate::Task) with such
//! a subscription: every change carrying a full document becomes the worker's
//! new configuration and triggers a cycle immediately.
//!
//! ```text
//!   ChangeSource ──watch(filter)──► Subscription ──► watch loop
//!                                                      │ Change(Some(doc))
//!                                                      ▼
//!                                  WorkerContext::reconfigure(doc, true)
//! ```

pub(crate) mod memory;
pub(crate) mod watched;

use async_trait::async_trait;

pub use memory::{MemorySource, MemorySubscription};
pub use watched::{Watched, DEFAULT_RECONNECT_DELAY};

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("change source unavailable: {0}")]
    Unavailable(String),
    #[error("change stream error: {0}")]
    Stream(String),
}

/// Whether change events should carry the full, current document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullDocument {
    #[default]
    Omit,
    /// Look up the document as it is after the change.
    UpdateLookup,
}

#[derive(Debug)]
pub enum ChangeEvent<D> {
    /// A relevant record changed. The document is present when it was
    /// requested and the source could provide it.
    Change(Option<D>),
    /// A non-fatal error reported by the feed.
    Error(WatchError),
}

/// A live feed of change events. `None` from [`Subscription::next_event`]
/// means the feed closed.
#[async_trait]
pub trait Subscription: Send + 'static {
    type Document: Send + 'static;

    async fn next_event(&mut self) -> Option<ChangeEvent<Self::Document>>;

    async fn close(&mut self);
}

/// Something that can be watched for changes, such as a database collection.
#[async_trait]
pub trait ChangeSource: Send + Sync + 'static {
    /// Selects the records relevant to one subscriber.
    type Filter: Send + Sync + 'static;
    type Subscription: Subscription;

    async fn watch(
        &self,
        filter: &Self::Filter,
        full_document: FullDocument,
    ) -> Result<Self::Subscription, WatchError>;
}
