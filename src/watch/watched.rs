use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{
    task::{ProcessResult, Task, TaskResult},
    watch::{ChangeEvent, ChangeSource, FullDocument, Subscription},
    worker::WorkerContext,
};

/// Wait before retrying when a closed subscription cannot be reopened.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Decorates a task so its worker is reconfigured from a [`ChangeSource`].
///
/// The subscription is opened by the start hook and closed by the stop hook.
/// While the worker is starting or started, a subscription that closes on its
/// own is reopened with the same filter. Errors reported by the feed are
/// logged and otherwise ignored. Dropping the decorator stops its watch loop.
pub struct Watched<T, S: ChangeSource> {
    inner: T,
    source: Arc<S>,
    filter: Arc<S::Filter>,
    reconnect_delay: Duration,
    active: Mutex<Option<ActiveWatch>>,
}

/// Dropping it cancels the watch loop.
struct ActiveWatch {
    cancel_on_drop: DropGuard,
    join_handle: JoinHandle<()>,
}

impl<T, S> Watched<T, S>
where
    T: Task,
    S: ChangeSource,
    S::Subscription: Subscription<Document = T::Config>,
{
    pub fn new(inner: T, source: Arc<S>, filter: S::Filter) -> Self {
        Self {
            inner,
            source,
            filter: Arc::new(filter),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            active: Mutex::new(None),
        }
    }

    /// Sets the wait between attempts to reopen a closed subscription when
    /// the source refuses it.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    async fn open_watch(&self, ctx: &WorkerContext<T::Config>) -> TaskResult {
        let subscription = self
            .source
            .watch(&self.filter, FullDocument::UpdateLookup)
            .await?;
        tracing::debug!(worker = ctx.name(), "change subscription opened");

        let token = CancellationToken::new();
        let watch_loop = WatchLoop {
            source: Arc::clone(&self.source),
            filter: Arc::clone(&self.filter),
            ctx: ctx.clone(),
            token: token.clone(),
            reconnect_delay: self.reconnect_delay,
        };
        let join_handle = tokio::spawn(watch_loop.run(subscription));
        // A previous loop, if any, is cancelled as it drops.
        *self.active.lock().await = Some(ActiveWatch {
            cancel_on_drop: token.drop_guard(),
            join_handle,
        });
        Ok(())
    }

    async fn close_watch(&self) {
        let Some(active) = self.active.lock().await.take() else {
            return;
        };
        let ActiveWatch {
            cancel_on_drop,
            join_handle,
        } = active;
        drop(cancel_on_drop);
        if let Err(join_error) = join_handle.await {
            tracing::warn!(error = %join_error, "change subscription loop panicked");
        }
    }
}

#[async_trait]
impl<T, S> Task for Watched<T, S>
where
    T: Task,
    S: ChangeSource,
    S::Subscription: Subscription<Document = T::Config>,
{
    type Config = T::Config;

    async fn on_start(&self, ctx: &WorkerContext<T::Config>) -> TaskResult {
        self.open_watch(ctx).await?;
        if let Err(error) = self.inner.on_start(ctx).await {
            self.close_watch().await;
            return Err(error);
        }
        Ok(())
    }

    async fn on_stop(&self, ctx: &WorkerContext<T::Config>) -> TaskResult {
        self.close_watch().await;
        self.inner.on_stop(ctx).await
    }

    async fn process(
        &self,
        ctx: &WorkerContext<T::Config>,
        config: &mut T::Config,
    ) -> ProcessResult {
        self.inner.process(ctx, config).await
    }
}

struct WatchLoop<S: ChangeSource, C> {
    source: Arc<S>,
    filter: Arc<S::Filter>,
    ctx: WorkerContext<C>,
    token: CancellationToken,
    reconnect_delay: Duration,
}

impl<S, C> WatchLoop<S, C>
where
    S: ChangeSource,
    S::Subscription: Subscription<Document = C>,
    C: Send + 'static,
{
    async fn run(self, mut subscription: S::Subscription) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    subscription.close().await;
                    tracing::debug!(worker = self.ctx.name(), "change subscription closed");
                    return;
                }
                event = subscription.next_event() => event,
            };

            match event {
                Some(ChangeEvent::Change(Some(document))) => {
                    tracing::debug!(worker = self.ctx.name(), "configuration replaced by change");
                    self.ctx.reconfigure(document, true);
                }
                Some(ChangeEvent::Change(None)) => {}
                Some(ChangeEvent::Error(error)) => {
                    tracing::warn!(
                        worker = self.ctx.name(),
                        error = %error,
                        "change subscription error"
                    );
                }
                None => match self.reopen().await {
                    Some(reopened) => subscription = reopened,
                    None => return,
                },
            }
        }
    }

    /// Opens a replacement for a subscription that closed by itself, for as
    /// long as the worker stays starting or started and its runtime is alive.
    async fn reopen(&self) -> Option<S::Subscription> {
        loop {
            if self.token.is_cancelled()
                || self.ctx.is_detached()
                || !self.ctx.status().is_active()
            {
                return None;
            }
            match self
                .source
                .watch(&self.filter, FullDocument::UpdateLookup)
                .await
            {
                Ok(subscription) => {
                    tracing::debug!(worker = self.ctx.name(), "change subscription reopened");
                    return Some(subscription);
                }
                Err(error) => {
                    tracing::warn!(
                        worker = self.ctx.name(),
                        error = %error,
                        retry_in = ?self.reconnect_delay,
                        "could not reopen change subscription"
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => return None,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }
    }
}
