use std::time::Duration;

use crate::{
    task::Task,
    worker::{Worker, WorkerRuntime},
};

/// Delay before retrying after a failed cycle, unless configured otherwise.
pub const DEFAULT_DELAY_ON_ERROR: Duration = Duration::from_secs(30);

/// Builds a [`Worker`] with configurable parameters.
pub struct WorkerBuilder<T: Task> {
    name: String,
    task: T,
    config: T::Config,
    delay_on_error: Duration,
}

impl<T: Task> WorkerBuilder<T> {
    /// Creates a new builder with default configuration values.
    pub fn new(name: impl Into<String>, task: T, config: T::Config) -> Self {
        Self {
            name: name.into(),
            task,
            config,
            delay_on_error: DEFAULT_DELAY_ON_ERROR,
        }
    }

    /// Sets the delay used to re-arm the worker after a failed cycle.
    pub fn with_delay_on_error(mut self, delay: Duration) -> Self {
        self.delay_on_error = delay;
        self
    }

    /// Constructs the `Worker` and spawns its runtime on the current Tokio
    /// runtime. The worker starts out stopped.
    pub fn build(self) -> Worker<T> {
        let (runtime, worker) =
            WorkerRuntime::new(self.name, self.task, self.config, self.delay_on_error);
        tokio::spawn(runtime.run());
        worker
    }
}
