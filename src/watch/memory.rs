use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::watch::{ChangeEvent, ChangeSource, FullDocument, Subscription, WatchError};

/// An in-process [`ChangeSource`] where documents are published by key.
///
/// Handy for tests and for wiring workers together inside one process. Each
/// subscription filters on a single key.
pub struct MemorySource<K, D> {
    state: Arc<Mutex<MemoryState<K, D>>>,
}

struct MemoryState<K, D> {
    subscribers: Vec<MemorySubscriber<K, D>>,
    next_id: u64,
    opened: usize,
    available: bool,
}

struct MemorySubscriber<K, D> {
    id: u64,
    key: K,
    full_document: FullDocument,
    tx: mpsc::UnboundedSender<ChangeEvent<D>>,
}

fn lock<K, D>(state: &Mutex<MemoryState<K, D>>) -> MutexGuard<'_, MemoryState<K, D>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, D> MemorySource<K, D>
where
    K: Eq + Clone + Send + Sync + 'static,
    D: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                subscribers: Vec::new(),
                next_id: 0,
                opened: 0,
                available: true,
            })),
        }
    }

    /// Sends a change for `key` to every matching subscription. Returns how
    /// many subscriptions received it.
    pub fn publish(&self, key: &K, document: D) -> usize {
        let mut state = lock(&self.state);
        state.subscribers.retain(|subscriber| !subscriber.tx.is_closed());
        let mut delivered = 0;
        for subscriber in state.subscribers.iter().filter(|s| s.key == *key) {
            let document = match subscriber.full_document {
                FullDocument::UpdateLookup => Some(document.clone()),
                FullDocument::Omit => None,
            };
            if subscriber.tx.send(ChangeEvent::Change(document)).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Reports a feed error to every subscription on `key`.
    pub fn publish_error(&self, key: &K, message: &str) {
        let state = lock(&self.state);
        for subscriber in state.subscribers.iter().filter(|s| s.key == *key) {
            let _ = subscriber
                .tx
                .send(ChangeEvent::Error(WatchError::Stream(message.to_string())));
        }
    }

    /// Closes every subscription on `key` from the source side. Returns how
    /// many were closed.
    pub fn close_subscriptions(&self, key: &K) -> usize {
        let mut state = lock(&self.state);
        let before = state.subscribers.len();
        state.subscribers.retain(|subscriber| subscriber.key != *key);
        before - state.subscribers.len()
    }

    /// While unavailable, [`ChangeSource::watch`] fails.
    pub fn set_available(&self, available: bool) {
        lock(&self.state).available = available;
    }

    /// Number of subscriptions ever opened.
    pub fn opened_count(&self) -> usize {
        lock(&self.state).opened
    }

    /// Number of subscriptions currently open.
    pub fn active_count(&self) -> usize {
        let mut state = lock(&self.state);
        state.subscribers.retain(|subscriber| !subscriber.tx.is_closed());
        state.subscribers.len()
    }
}

impl<K, D> Default for MemorySource<K, D>
where
    K: Eq + Clone + Send + Sync + 'static,
    D: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, D> Clone for MemorySource<K, D> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl<K, D> ChangeSource for MemorySource<K, D>
where
    K: Eq + Clone + Send + Sync + 'static,
    D: Clone + Send + 'static,
{
    type Filter = K;
    type Subscription = MemorySubscription<K, D>;

    async fn watch(
        &self,
        filter: &K,
        full_document: FullDocument,
    ) -> Result<MemorySubscription<K, D>, WatchError> {
        let mut state = lock(&self.state);
        if !state.available {
            return Err(WatchError::Unavailable("memory source is offline".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_id;
        state.next_id += 1;
        state.opened += 1;
        state.subscribers.push(MemorySubscriber {
            id,
            key: filter.clone(),
            full_document,
            tx,
        });
        Ok(MemorySubscription {
            id,
            rx,
            state: Arc::downgrade(&self.state),
        })
    }
}

pub struct MemorySubscription<K, D> {
    id: u64,
    rx: mpsc::UnboundedReceiver<ChangeEvent<D>>,
    state: Weak<Mutex<MemoryState<K, D>>>,
}

impl<K, D> MemorySubscription<K, D> {
    fn detach(&mut self) {
        if let Some(state) = self.state.upgrade() {
            let id = self.id;
            lock(&state).subscribers.retain(|subscriber| subscriber.id != id);
        }
        self.rx.close();
    }
}

#[async_trait]
impl<K, D> Subscription for MemorySubscription<K, D>
where
    K: Send + 'static,
    D: Send + 'static,
{
    type Document = D;

    async fn next_event(&mut self) -> Option<ChangeEvent<D>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.detach();
    }
}

impl<K, D> Drop for MemorySubscription<K, D> {
    fn drop(&mut self) {
        self.detach();
    }
}
