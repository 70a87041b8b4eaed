#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use task_worker::{
    ProcessResult, StatusListener, Task, TaskResult, Worker, WorkerContext, WorkerStatus,
};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct CounterConfig {
    pub counter: u64,
    pub frequency: Duration,
}

impl CounterConfig {
    pub fn every_ms(counter: u64, frequency_ms: u64) -> Self {
        Self {
            counter,
            frequency: Duration::from_millis(frequency_ms),
        }
    }
}

/// Records the counter it sees on every cycle, then counts up.
#[derive(Clone, Default)]
pub struct CounterTask {
    pub seen: Arc<Mutex<Vec<u64>>>,
    pub seen_at: Arc<Mutex<Vec<Instant>>>,
    /// Number of upcoming cycles that fail.
    pub failing_cycles: Arc<AtomicUsize>,
    /// How long each cycle takes.
    pub busy: Duration,
}

impl CounterTask {
    pub fn seen(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }

    pub fn seen_at(&self) -> Vec<Instant> {
        self.seen_at.lock().unwrap().clone()
    }
}

#[async_trait]
impl Task for CounterTask {
    type Config = CounterConfig;

    async fn process(
        &self,
        _ctx: &WorkerContext<CounterConfig>,
        config: &mut CounterConfig,
    ) -> ProcessResult {
        self.seen.lock().unwrap().push(config.counter);
        self.seen_at.lock().unwrap().push(Instant::now());
        tokio::time::sleep(self.busy).await;

        let failing = self.failing_cycles.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_cycles.store(failing - 1, Ordering::SeqCst);
            return Err(anyhow::anyhow!("cycle failed"));
        }
        config.counter += 1;
        Ok(config.frequency)
    }
}

/// Counts hook calls; hooks can be made to fail, panic or take time.
#[derive(Clone, Default)]
pub struct HookTask {
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
    pub cycles: Arc<AtomicUsize>,
    pub fail_start: Arc<AtomicBool>,
    pub fail_stop: Arc<AtomicBool>,
    pub panic_start: Arc<AtomicBool>,
    pub panic_stop: Arc<AtomicBool>,
    pub start_time: Duration,
}

#[async_trait]
impl Task for HookTask {
    type Config = ();

    async fn on_start(&self, _ctx: &WorkerContext<()>) -> TaskResult {
        self.starts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.start_time).await;
        if self.panic_start.load(Ordering::SeqCst) {
            panic!("start blew up");
        }
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("start refused");
        }
        Ok(())
    }

    async fn on_stop(&self, _ctx: &WorkerContext<()>) -> TaskResult {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.panic_stop.load(Ordering::SeqCst) {
            panic!("stop blew up");
        }
        if self.fail_stop.load(Ordering::SeqCst) {
            anyhow::bail!("stop refused");
        }
        Ok(())
    }

    async fn process(&self, _ctx: &WorkerContext<()>, _config: &mut ()) -> ProcessResult {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        Ok(Duration::from_secs(10))
    }
}

/// Registers a listener that records every status the worker goes through.
pub fn record_statuses<T: Task>(worker: &Worker<T>) -> Arc<Mutex<Vec<WorkerStatus>>> {
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let recorded = statuses.clone();
    let listener: StatusListener<T::Config> = Arc::new(move |ctx: &WorkerContext<T::Config>| {
        recorded.lock().unwrap().push(ctx.status());
    });
    worker.add_status_listener(listener);
    statuses
}

/// Lets every ready task run, advancing the paused clock by a millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
