pub(crate) mod builder;
pub(crate) mod context;
pub(crate) mod listener;

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

pub use builder::{WorkerBuilder, DEFAULT_DELAY_ON_ERROR};
pub use context::WorkerContext;
pub use listener::StatusListener;

use crate::task::{ProcessResult, Task, TaskResult, WorkerStatus};
use listener::StatusListeners;

pub(crate) type WorkerName = Arc<str>;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("the runtime of worker `{0}` is no longer running")]
    RuntimeGone(String),
}

/// Messages processed by a [`WorkerRuntime`], from handles and from the
/// runtime's own spawned hooks, timers and cycles.
pub(crate) enum WorkerMessage<C> {
    /// Answered once the start transition settles.
    Start(oneshot::Sender<()>),
    /// Answered once the stop transition settles.
    Stop(oneshot::Sender<()>),
    Reconfigure {
        config: C,
        process_immediately: bool,
    },
    AddListener(StatusListener<C>),
    RemoveListener(StatusListener<C>),
    GetConfig(oneshot::Sender<C>),
    StartSettled(TaskResult),
    StopSettled(TaskResult),
    /// Carries the id of the timer that expired.
    TimerFired(u64),
    /// `config` is `None` when the cycle panicked.
    ProcessSettled {
        config: Option<C>,
        outcome: ProcessResult,
    },
}

/// Handle to a self-rescheduling background worker.
///
/// Cheap to clone; every clone drives the same worker. The worker runs on
/// its own Tokio task, so a `Worker` must be built inside a Tokio runtime.
/// A worker that is starting, started or stopping keeps running after every
/// handle is dropped. Its runtime exits once it is stopped or failed and no
/// handle is left.
pub struct Worker<T: Task> {
    name: WorkerName,
    delay_on_error: Duration,
    status_rx: watch::Receiver<WorkerStatus>,
    tx: mpsc::UnboundedSender<WorkerMessage<T::Config>>,
}

impl<T: Task> Worker<T> {
    /// Builds a worker with the default settings and spawns its runtime.
    pub fn new(name: impl Into<String>, task: T, config: T::Config) -> Self {
        WorkerBuilder::new(name, task, config).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status_rx.borrow()
    }

    pub fn delay_on_error(&self) -> Duration {
        self.delay_on_error
    }

    /// A receiver that observes every status transition.
    pub fn subscribe_status(&self) -> watch::Receiver<WorkerStatus> {
        self.status_rx.clone()
    }

    /// Starts the worker if it is stopped or failed.
    ///
    /// Resolves once the start hook has settled and the worker is either
    /// started (first cycle armed with no delay) or failed. Does nothing from
    /// any other status.
    pub async fn start(&self) {
        self.request(WorkerMessage::Start).await;
    }

    /// Stops the worker if it is started.
    ///
    /// The pending cycle is cancelled before the stop hook runs. A cycle that
    /// is already running is not interrupted, but nothing is armed after it.
    pub async fn stop(&self) {
        self.request(WorkerMessage::Stop).await;
    }

    /// Replaces the configuration used by the next cycles.
    ///
    /// With `process_immediately`, the pending delay is discarded and the
    /// next cycle runs right away if the worker is started.
    pub fn reconfigure(&self, config: T::Config, process_immediately: bool) {
        let _ = self.tx.send(WorkerMessage::Reconfigure {
            config,
            process_immediately,
        });
    }

    /// The current configuration.
    pub async fn config(&self) -> Result<T::Config, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerMessage::GetConfig(reply_tx))
            .map_err(|_| WorkerError::RuntimeGone(self.name.to_string()))?;
        reply_rx
            .await
            .map_err(|_| WorkerError::RuntimeGone(self.name.to_string()))
    }

    /// Registers a listener called on every status transition.
    pub fn add_status_listener(&self, listener: StatusListener<T::Config>) {
        let _ = self.tx.send(WorkerMessage::AddListener(listener));
    }

    pub fn remove_status_listener(&self, listener: &StatusListener<T::Config>) {
        let _ = self
            .tx
            .send(WorkerMessage::RemoveListener(Arc::clone(listener)));
    }

    async fn request(&self, message: fn(oneshot::Sender<()>) -> WorkerMessage<T::Config>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(message(reply_tx)).is_err() {
            tracing::warn!(worker = %self.name, "worker runtime is gone");
            return;
        }
        let _ = reply_rx.await;
    }
}

impl<T: Task> Clone for Worker<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            delay_on_error: self.delay_on_error,
            status_rx: self.status_rx.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T: Task> std::fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("delay_on_error", &self.delay_on_error)
            .finish()
    }
}

/// The armed timer of a worker. There is never more than one.
#[derive(Debug)]
struct PendingProcess {
    id: u64,
    delay: Duration,
    token: CancellationToken,
}

/// Bookkeeping for the cycle currently running.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    /// `schedule_epoch` when the cycle was fired.
    schedule_epoch: u64,
    /// `config_epoch` when the cycle took its configuration snapshot.
    config_epoch: u64,
}

/// Owns the whole mutable state of one worker.
///
/// Every transition happens inside `handle_message`, so status, timer and
/// configuration are never touched concurrently. Hooks and cycles run on
/// spawned tasks and report back with a message; the status is checked again
/// when that message arrives.
pub(crate) struct WorkerRuntime<T: Task> {
    task: Arc<T>,
    ctx: WorkerContext<T::Config>,
    config: T::Config,
    config_epoch: u64,
    delay_on_error: Duration,
    status_tx: watch::Sender<WorkerStatus>,
    listeners: StatusListeners<T::Config>,
    pending: Option<PendingProcess>,
    schedule_epoch: u64,
    in_flight: Option<InFlight>,
    /// A timer fired while a cycle was still running.
    deferred: bool,
    start_waiters: Vec<oneshot::Sender<()>>,
    stop_waiters: Vec<oneshot::Sender<()>>,
    tx: mpsc::WeakUnboundedSender<WorkerMessage<T::Config>>,
    /// Held while the worker is active so the runtime outlives its handles.
    keep_alive: Option<mpsc::UnboundedSender<WorkerMessage<T::Config>>>,
    rx: mpsc::UnboundedReceiver<WorkerMessage<T::Config>>,
}

impl<T: Task> WorkerRuntime<T> {
    pub(crate) fn new(
        name: String,
        task: T,
        config: T::Config,
        delay_on_error: Duration,
    ) -> (Self, Worker<T>) {
        let name: WorkerName = Arc::from(name);
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(WorkerStatus::Stopped);
        let ctx = WorkerContext::new(Arc::clone(&name), status_rx.clone(), tx.downgrade());

        let runtime = Self {
            task: Arc::new(task),
            ctx,
            config,
            config_epoch: 0,
            delay_on_error,
            status_tx,
            listeners: StatusListeners::new(),
            pending: None,
            schedule_epoch: 0,
            in_flight: None,
            deferred: false,
            start_waiters: Vec::new(),
            stop_waiters: Vec::new(),
            tx: tx.downgrade(),
            keep_alive: None,
            rx,
        };
        let worker = Worker {
            name,
            delay_on_error,
            status_rx,
            tx,
        };
        (runtime, worker)
    }

    /// Processes messages until every sender is gone.
    pub(crate) async fn run(mut self) {
        while self.step().await {}
        self.cancel_process();
        tracing::debug!(worker = self.ctx.name(), "worker runtime exited");
    }

    async fn step(&mut self) -> bool {
        match self.rx.recv().await {
            Some(message) => {
                self.handle_message(message);
                true
            }
            None => false,
        }
    }

    fn handle_message(&mut self, message: WorkerMessage<T::Config>) {
        match message {
            WorkerMessage::Start(reply) => self.start(reply),
            WorkerMessage::Stop(reply) => self.stop(reply),
            WorkerMessage::Reconfigure {
                config,
                process_immediately,
            } => self.reconfigure(config, process_immediately),
            WorkerMessage::AddListener(listener) => self.listeners.add(listener),
            WorkerMessage::RemoveListener(listener) => self.listeners.remove(&listener),
            WorkerMessage::GetConfig(reply) => {
                let _ = reply.send(self.config.clone());
            }
            WorkerMessage::StartSettled(result) => self.start_settled(result),
            WorkerMessage::StopSettled(result) => self.stop_settled(result),
            WorkerMessage::TimerFired(id) => self.timer_fired(id),
            WorkerMessage::ProcessSettled { config, outcome } => {
                self.process_settled(config, outcome)
            }
        }
    }

    fn status(&self) -> WorkerStatus {
        *self.status_tx.borrow()
    }

    fn set_status(&mut self, status: WorkerStatus) {
        let previous = self.status_tx.send_replace(status);
        self.keep_alive = match status {
            WorkerStatus::Stopped | WorkerStatus::Failed => None,
            _ => self.keep_alive.take().or_else(|| self.tx.upgrade()),
        };
        tracing::debug!(
            worker = self.ctx.name(),
            from = %previous,
            to = %status,
            "status changed"
        );
        self.listeners.notify(&self.ctx);
    }

    fn start(&mut self, reply: oneshot::Sender<()>) {
        if !self.status().can_start() {
            let _ = reply.send(());
            return;
        }
        self.start_waiters.push(reply);
        self.set_status(WorkerStatus::Starting);

        let task = Arc::clone(&self.task);
        let ctx = self.ctx.clone();
        self.spawn_hook(
            async move { task.on_start(&ctx).await },
            WorkerMessage::StartSettled,
        );
    }

    fn start_settled(&mut self, result: TaskResult) {
        match result {
            Ok(()) => {
                self.set_status(WorkerStatus::Started);
                self.schedule_process(Duration::ZERO);
            }
            Err(error) => {
                tracing::warn!(worker = self.ctx.name(), error = ?error, "start hook failed");
                self.set_status(WorkerStatus::Failed);
            }
        }
        for waiter in self.start_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn stop(&mut self, reply: oneshot::Sender<()>) {
        if !self.status().is_started() {
            let _ = reply.send(());
            return;
        }
        self.stop_waiters.push(reply);
        self.cancel_process();
        self.set_status(WorkerStatus::Stopping);

        let task = Arc::clone(&self.task);
        let ctx = self.ctx.clone();
        self.spawn_hook(
            async move { task.on_stop(&ctx).await },
            WorkerMessage::StopSettled,
        );
    }

    fn stop_settled(&mut self, result: TaskResult) {
        match result {
            Ok(()) => self.set_status(WorkerStatus::Stopped),
            Err(error) => {
                tracing::warn!(worker = self.ctx.name(), error = ?error, "stop hook failed");
                self.set_status(WorkerStatus::Failed);
            }
        }
        for waiter in self.stop_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn reconfigure(&mut self, config: T::Config, process_immediately: bool) {
        self.config = config;
        self.config_epoch = self.config_epoch.wrapping_add(1);
        if process_immediately {
            self.schedule_process(Duration::ZERO);
        }
    }

    /// Replaces the pending timer with one expiring after `delay`.
    ///
    /// Nothing is armed unless the worker is started.
    fn schedule_process(&mut self, delay: Duration) {
        self.cancel_process();
        self.schedule_epoch = self.schedule_epoch.wrapping_add(1);
        if !self.status().is_started() {
            return;
        }
        let Some(tx) = self.tx.upgrade() else {
            return;
        };

        let id = self.schedule_epoch;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(WorkerMessage::TimerFired(id));
                }
            }
        });
        tracing::trace!(worker = self.ctx.name(), ?delay, "cycle scheduled");
        self.pending = Some(PendingProcess { id, delay, token });
    }

    fn cancel_process(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.token.cancel();
        }
    }

    fn timer_fired(&mut self, id: u64) {
        // A fire that raced a cancellation or a replacement.
        if self.pending.as_ref().map(|pending| pending.id) != Some(id) {
            return;
        }
        if let Some(pending) = self.pending.take() {
            tracing::trace!(worker = self.ctx.name(), delay = ?pending.delay, "cycle timer fired");
        }
        if !self.status().is_started() {
            return;
        }
        if self.in_flight.is_some() {
            self.deferred = true;
            return;
        }
        self.run_process();
    }

    fn run_process(&mut self) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        self.in_flight = Some(InFlight {
            schedule_epoch: self.schedule_epoch,
            config_epoch: self.config_epoch,
        });

        let task = Arc::clone(&self.task);
        let ctx = self.ctx.clone();
        let mut config = self.config.clone();
        tokio::spawn(async move {
            let cycle = tokio::spawn(async move {
                let outcome = task.process(&ctx, &mut config).await;
                (config, outcome)
            });
            let message = match cycle.await {
                Ok((config, outcome)) => WorkerMessage::ProcessSettled {
                    config: Some(config),
                    outcome,
                },
                Err(join_error) => WorkerMessage::ProcessSettled {
                    config: None,
                    outcome: Err(anyhow!("periodic hook panicked: {join_error}")),
                },
            };
            let _ = tx.send(message);
        });
    }

    fn process_settled(&mut self, config: Option<T::Config>, outcome: ProcessResult) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        if let Some(config) = config {
            if flight.config_epoch == self.config_epoch {
                self.config = config;
            }
        }

        let next_delay = match outcome {
            Ok(delay) => delay,
            Err(error) => {
                tracing::warn!(
                    worker = self.ctx.name(),
                    error = ?error,
                    retry_in = ?self.delay_on_error,
                    "periodic hook failed"
                );
                self.delay_on_error
            }
        };

        if flight.schedule_epoch == self.schedule_epoch {
            self.schedule_process(next_delay);
        } else if std::mem::take(&mut self.deferred) && self.status().is_started() {
            // A newer schedule fired while this cycle ran; it runs now instead.
            self.cancel_process();
            self.run_process();
        }
    }

    fn spawn_hook<F>(&self, hook: F, settled: fn(TaskResult) -> WorkerMessage<T::Config>)
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let result = match tokio::spawn(hook).await {
                Ok(result) => result,
                Err(join_error) => Err(anyhow!("hook panicked: {join_error}")),
            };
            let _ = tx.send(settled(result));
        });
    }
}
