mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::pause;

use task_worker::{MemorySource, Watched, Worker, WorkerStatus};

use common::{record_statuses, settle, CounterConfig, CounterTask, HookTask};

const NAME: &str = "watch_counter";

type Source = MemorySource<String, CounterConfig>;
type WatchedCounter = Watched<CounterTask, Source>;

fn watched_worker(source: &Source, task: CounterTask, frequency_ms: u64) -> Worker<WatchedCounter> {
    let watched = Watched::new(task, Arc::new(source.clone()), NAME.to_string())
        .with_reconnect_delay(Duration::from_millis(100));
    Worker::new(NAME, watched, CounterConfig::every_ms(1, frequency_ms))
}

#[tokio::test]
async fn test_start_opens_one_subscription() {
    pause();
    let source = Source::new();
    let worker = watched_worker(&source, CounterTask::default(), 10_000);

    worker.start().await;

    assert_eq!(worker.status(), WorkerStatus::Started);
    assert_eq!(source.opened_count(), 1);
    assert_eq!(source.active_count(), 1);
}

#[tokio::test]
async fn test_change_replaces_config_and_runs_immediately() {
    pause();
    let source = Source::new();
    let task = CounterTask::default();
    let worker = watched_worker(&source, task.clone(), 10_000);

    worker.start().await;
    settle().await;
    assert_eq!(task.seen(), vec![1]);

    let delivered = source.publish(&NAME.to_string(), CounterConfig::every_ms(42, 10_000));
    assert_eq!(delivered, 1);
    settle().await;

    assert_eq!(task.seen(), vec![1, 42]);
    assert_eq!(worker.config().await.unwrap().counter, 43);

    // The delay pending before the change was discarded.
    tokio::time::sleep(Duration::from_millis(9_990)).await;
    assert_eq!(task.seen(), vec![1, 42]);
}

#[tokio::test]
async fn test_changes_for_other_workers_are_ignored() {
    pause();
    let source = Source::new();
    let task = CounterTask::default();
    let worker = watched_worker(&source, task.clone(), 10_000);

    worker.start().await;
    settle().await;

    assert_eq!(
        source.publish(&"someone_else".to_string(), CounterConfig::every_ms(9, 5)),
        0
    );
    settle().await;
    assert_eq!(task.seen(), vec![1]);
}

#[tokio::test]
async fn test_closed_subscription_is_reopened() {
    pause();
    let source = Source::new();
    let task = CounterTask::default();
    let worker = watched_worker(&source, task.clone(), 10_000);
    let statuses = record_statuses(&worker);

    worker.start().await;
    settle().await;

    assert_eq!(source.close_subscriptions(&NAME.to_string()), 1);
    settle().await;

    assert_eq!(source.opened_count(), 2);
    assert_eq!(source.active_count(), 1);
    assert_eq!(worker.status(), WorkerStatus::Started);
    assert_eq!(
        *statuses.lock().unwrap(),
        vec![WorkerStatus::Starting, WorkerStatus::Started]
    );

    source.publish(&NAME.to_string(), CounterConfig::every_ms(7, 10_000));
    settle().await;
    assert_eq!(task.seen(), vec![1, 7]);
}

#[tokio::test]
async fn test_subscription_errors_are_swallowed() {
    pause();
    let source = Source::new();
    let task = CounterTask::default();
    let worker = watched_worker(&source, task.clone(), 10_000);
    let statuses = record_statuses(&worker);

    worker.start().await;
    settle().await;

    source.publish_error(&NAME.to_string(), "replica set election");
    settle().await;

    assert_eq!(worker.status(), WorkerStatus::Started);
    assert_eq!(task.seen(), vec![1]);
    assert_eq!(source.opened_count(), 1);
    assert_eq!(
        *statuses.lock().unwrap(),
        vec![WorkerStatus::Starting, WorkerStatus::Started]
    );

    source.publish(&NAME.to_string(), CounterConfig::every_ms(5, 10_000));
    settle().await;
    assert_eq!(task.seen(), vec![1, 5]);
}

#[tokio::test]
async fn test_stop_closes_subscription_without_reconnecting() {
    pause();
    let source = Source::new();
    let task = CounterTask::default();
    let worker = watched_worker(&source, task.clone(), 10_000);

    worker.start().await;
    settle().await;
    worker.stop().await;

    assert_eq!(worker.status(), WorkerStatus::Stopped);
    assert_eq!(source.active_count(), 0);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.opened_count(), 1);
    assert_eq!(source.publish(&NAME.to_string(), CounterConfig::every_ms(3, 5)), 0);
    assert_eq!(task.seen(), vec![1]);
}

#[tokio::test]
async fn test_restart_opens_a_fresh_subscription() {
    pause();
    let source = Source::new();
    let worker = watched_worker(&source, CounterTask::default(), 10_000);

    worker.start().await;
    worker.stop().await;
    worker.start().await;

    assert_eq!(worker.status(), WorkerStatus::Started);
    assert_eq!(source.opened_count(), 2);
    assert_eq!(source.active_count(), 1);
}

#[tokio::test]
async fn test_unavailable_source_fails_start() {
    pause();
    let source = Source::new();
    source.set_available(false);
    let task = CounterTask::default();
    let worker = watched_worker(&source, task.clone(), 10_000);

    worker.start().await;
    settle().await;

    assert_eq!(worker.status(), WorkerStatus::Failed);
    assert!(task.seen().is_empty());
}

#[tokio::test]
async fn test_reopen_retries_until_source_is_back() {
    pause();
    let source = Source::new();
    let worker = watched_worker(&source, CounterTask::default(), 10_000);

    worker.start().await;
    source.set_available(false);
    source.close_subscriptions(&NAME.to_string());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(source.active_count(), 0);
    assert_eq!(worker.status(), WorkerStatus::Started);

    source.set_available(true);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(source.opened_count(), 2);
    assert_eq!(source.active_count(), 1);
}

#[tokio::test]
async fn test_failed_inner_start_closes_subscription() {
    pause();
    let source: MemorySource<String, ()> = MemorySource::new();
    let task = HookTask::default();
    task.fail_start.store(true, Ordering::SeqCst);
    let watched = Watched::new(task.clone(), Arc::new(source.clone()), NAME.to_string());
    let worker = Worker::new(NAME, watched, ());

    worker.start().await;

    assert_eq!(worker.status(), WorkerStatus::Failed);
    assert_eq!(source.opened_count(), 1);
    assert_eq!(source.active_count(), 0);
    assert_eq!(task.cycles.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_started_worker_follows_changes_without_handles() {
    pause();
    let source = Source::new();
    let task = CounterTask::default();
    let worker = watched_worker(&source, task.clone(), 10_000);

    worker.start().await;
    settle().await;
    drop(worker);

    source.close_subscriptions(&NAME.to_string());
    settle().await;
    assert_eq!(source.opened_count(), 2);
    assert_eq!(source.active_count(), 1);

    source.publish(&NAME.to_string(), CounterConfig::every_ms(8, 10_000));
    settle().await;
    assert_eq!(task.seen(), vec![1, 8]);
}
