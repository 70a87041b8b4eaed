use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use task_worker::{
    MemorySource, ProcessResult, StatusListener, Task, Watched, Worker, WorkerContext,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct CounterConfig {
    name: String,
    counter: u64,
    frequency: Duration,
}

impl CounterConfig {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            counter: 1,
            frequency: Duration::from_secs(3),
        }
    }
}

/// Logs a counter at the frequency stored in its config.
struct CounterTask;

#[async_trait]
impl Task for CounterTask {
    type Config = CounterConfig;

    async fn process(
        &self,
        ctx: &WorkerContext<CounterConfig>,
        config: &mut CounterConfig,
    ) -> ProcessResult {
        tracing::info!(worker = ctx.name(), counter = config.counter, "tick");
        config.counter += 1;
        Ok(config.frequency)
    }
}

type ConfigStore = MemorySource<String, CounterConfig>;

/// Same as `CounterTask`, but saves its config to the store every ten ticks.
/// The store notifies the watching worker, which runs again right away.
struct SavingCounterTask {
    store: ConfigStore,
}

#[async_trait]
impl Task for SavingCounterTask {
    type Config = CounterConfig;

    async fn process(
        &self,
        ctx: &WorkerContext<CounterConfig>,
        config: &mut CounterConfig,
    ) -> ProcessResult {
        tracing::info!(worker = ctx.name(), counter = config.counter, "tick");
        config.counter += 1;
        if config.counter % 10 == 0 {
            tracing::info!(worker = ctx.name(), "saving config, expect an immediate tick");
            self.store.publish(&config.name, config.clone());
        }
        Ok(config.frequency)
    }
}

fn log_status<C: 'static>() -> StatusListener<C> {
    Arc::new(|ctx: &WorkerContext<C>| {
        tracing::info!(worker = ctx.name(), status = %ctx.status(), "status changed");
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let store = ConfigStore::new();

    let counter = Worker::new("COUNTER", CounterTask, CounterConfig::new("COUNTER"));
    let watch_counter = Worker::new(
        "WATCH_COUNTER",
        Watched::new(
            SavingCounterTask {
                store: store.clone(),
            },
            Arc::new(store.clone()),
            "WATCH_COUNTER".to_string(),
        ),
        CounterConfig::new("WATCH_COUNTER"),
    );

    counter.add_status_listener(log_status());
    watch_counter.add_status_listener(log_status());

    tokio::join!(counter.start(), watch_counter.start());

    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "cannot listen for ctrl-c, shutting down");
    }
    tokio::join!(counter.stop(), watch_counter.stop());
}
