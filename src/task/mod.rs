use std::time::Duration;

use async_trait::async_trait;

use crate::worker::WorkerContext;

pub type TaskError = anyhow::Error;

pub type TaskResult = Result<(), TaskError>;

/// Outcome of one periodic invocation: how long to wait before the next one.
pub type ProcessResult = Result<Duration, TaskError>;

/// The trait users implement for the body of a [`Worker`](crate::Worker).
///
/// # Hooks and configuration
///
/// `on_start` and `on_stop` run once per `start()` / `stop()` and are
/// optional. `process` runs on every cycle and decides when the next cycle
/// happens by returning a delay. An error from `process` never stops the
/// worker: the next cycle is simply armed after the worker's
/// `delay_on_error`.
///
/// `process` receives the configuration that is current when the cycle
/// starts. Changes it makes through `&mut` are kept for the next cycle,
/// unless the configuration was replaced (see
/// [`Worker::reconfigure`](crate::Worker::reconfigure)) while the cycle was
/// running, in which case the replacement wins.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use async_trait::async_trait;
/// use task_worker::{ProcessResult, Task, WorkerContext};
///
/// #[derive(Clone)]
/// struct Counter {
///     value: u64,
///     every: Duration,
/// }
///
/// struct CountUp;
///
/// #[async_trait]
/// impl Task for CountUp {
///     type Config = Counter;
///
///     async fn process(&self, ctx: &WorkerContext<Counter>, config: &mut Counter) -> ProcessResult {
///         println!("[{}] counter = {}", ctx.name(), config.value);
///         config.value += 1;
///         Ok(config.every)
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + Sized + 'static {
    type Config: Clone + Send + 'static;

    /// Called by `start()`. An error puts the worker in [`WorkerStatus::Failed`].
    async fn on_start(&self, _ctx: &WorkerContext<Self::Config>) -> TaskResult {
        Ok(())
    }

    /// Called by `stop()`. An error puts the worker in [`WorkerStatus::Failed`].
    async fn on_stop(&self, _ctx: &WorkerContext<Self::Config>) -> TaskResult {
        Ok(())
    }

    /// Runs one cycle and returns the delay until the next one.
    async fn process(
        &self,
        ctx: &WorkerContext<Self::Config>,
        config: &mut Self::Config,
    ) -> ProcessResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerStatus {
    #[default]
    Stopped,
    Starting,
    Started,
    Stopping,
    Failed,
}

impl WorkerStatus {
    /// `start()` only has an effect from these states.
    pub fn can_start(&self) -> bool {
        matches!(self, WorkerStatus::Stopped | WorkerStatus::Failed)
    }

    pub fn is_started(&self) -> bool {
        matches!(self, WorkerStatus::Started)
    }

    /// Starting or started: the window in which change subscriptions stay open.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkerStatus::Starting | WorkerStatus::Started)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Started => write!(f, "started"),
            Self::Stopping => write!(f, "stopping"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
