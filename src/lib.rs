//! # task-worker
//!
//! `task-worker` runs a repeating async job on a Tokio task and keeps it on
//! schedule. Each cycle decides how long to wait before the next one, failed
//! cycles are retried after a fixed delay, and every lifecycle transition is
//! broadcast to listeners. A worker can also follow an external change feed
//! and reload its configuration whenever the feed says it changed.
//!
//! ## Quick example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use task_worker::{ProcessResult, Task, Worker, WorkerContext};
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl Task for Printer {
//!     type Config = String;
//!
//!     async fn process(&self, _ctx: &WorkerContext<String>, config: &mut String) -> ProcessResult {
//!         println!("{config}");
//!         Ok(Duration::from_secs(1))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let worker = Worker::new("printer", Printer, "hello".to_string());
//!     worker.start().await;
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     worker.stop().await;
//! }
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//!           start()           on_start ok           stop()            on_stop ok
//! stopped ─────────► starting ────────────► started ────────► stopping ────────────► stopped
//!                       │                                        │
//!                       └── on_start err ──► failed ◄── on_stop err
//!                                              │
//!                                              └── start() ──► starting
//! ```
//!
//! * **Self-scheduling** – `process` returns the delay until the next cycle;
//!   the first cycle runs as soon as the worker is started.
//! * **One timer, serial cycles** – at most one cycle is pending and cycles
//!   never overlap.
//! * **Failure handling** – a failed cycle is retried after `delay_on_error`
//!   (30 s by default); failing hooks move the worker to `failed`.
//! * **Live reconfiguration** – `reconfigure` swaps the configuration, and
//!   [`Watched`] does it automatically from a [`ChangeSource`].
//!
//! ## API overview
//!
//! | Worker method                          | Purpose                                        |
//! | -------------------------------------- | ---------------------------------------------- |
//! | `start().await`                        | Start from `stopped` or `failed`               |
//! | `stop().await`                         | Stop from `started`                            |
//! | `status()`                             | Return the current `WorkerStatus`              |
//! | `reconfigure(config, now)`             | Replace the configuration, optionally run now  |
//! | `add_status_listener(listener)`        | Observe every status transition                |
//! | `subscribe_status()`                   | `watch::Receiver` over the status              |

pub use task::{ProcessResult, Task, TaskError, TaskResult, WorkerStatus};
pub use watch::{
    ChangeEvent, ChangeSource, FullDocument, MemorySource, MemorySubscription, Subscription,
    WatchError, Watched, DEFAULT_RECONNECT_DELAY,
};
pub use worker::{
    StatusListener, Worker, WorkerBuilder, WorkerContext, WorkerError, DEFAULT_DELAY_ON_ERROR,
};

mod task;
mod watch;
mod worker;
