/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use fluvia::executor::{AttemptOutcome, FnExecutor, FunctionExecutor};
use fluvia::listener::{Listener, PollingListener, QueueWatcher};
use fluvia::models::WorkItem;
use fluvia::store::{MemoryQueueProvider, MemoryQueueStore, QueueStore, QueueStoreProvider};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::fixtures::{
    fast_dispatch_config, init_test_logging, wait_until, CollectingFaultSink, RecordingExecutor,
};

async fn fill(store: &MemoryQueueStore, count: usize) {
    store.create_if_not_exists().await.unwrap();
    for i in 0..count {
        store
            .enqueue(format!("item-{i}").into_bytes())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_batches_drain_queue_without_duplicates() {
    init_test_logging();
    let provider = MemoryQueueProvider::new();
    let source = provider.store("orders");
    fill(&source, 25).await;

    let recorder = RecordingExecutor::new();
    let listener = PollingListener::builder(
        provider.queue("orders"),
        provider.queue("orders-poison"),
        recorder.executor(|_| AttemptOutcome::Succeeded),
    )
    .config(fast_dispatch_config(10, 5))
    .build();

    listener.start().await.unwrap();
    wait_until(Duration::from_secs(5), || source.is_empty()).await;
    listener.stop().await.unwrap();

    assert_eq!(source.stats().non_empty_fetches, 3);
    let seen = recorder.seen();
    assert_eq!(seen.len(), 25);
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), 25, "an item was processed twice");
    assert!(provider
        .get("orders-poison")
        .map_or(true, |poison| poison.is_empty()));
    assert_eq!(listener.stats().succeeded, 25);
}

#[tokio::test]
async fn test_always_failing_item_is_poisoned_after_max_attempts() {
    init_test_logging();
    let provider = MemoryQueueProvider::new();
    let source = provider.store("orders");
    fill(&source, 0).await;
    source.enqueue(b"broken".to_vec()).await.unwrap();
    source.enqueue(b"fine".to_vec()).await.unwrap();

    let recorder = RecordingExecutor::new();
    let listener = PollingListener::builder(
        provider.queue("orders"),
        provider.queue("orders-poison"),
        recorder.executor(|item| AttemptOutcome::from(item.payload != b"broken")),
    )
    .config(fast_dispatch_config(10, 2))
    .build();

    listener.start().await.unwrap();
    wait_until(Duration::from_secs(5), || source.is_empty()).await;
    listener.stop().await.unwrap();

    let poison = provider.get("orders-poison").expect("poison queue created");
    assert_eq!(poison.payloads(), vec![b"broken".to_vec()]);
    let attempts = recorder
        .seen()
        .iter()
        .filter(|payload| payload.as_slice() == b"broken")
        .count();
    assert_eq!(attempts, 2);
    assert_eq!(listener.stats().poisoned, 1);
}

#[tokio::test]
async fn test_panicking_function_counts_as_failure_and_is_reported() {
    init_test_logging();
    let provider = MemoryQueueProvider::new();
    let source = provider.store("orders");
    fill(&source, 0).await;
    source.enqueue(b"explodes".to_vec()).await.unwrap();
    source.enqueue(b"fine".to_vec()).await.unwrap();

    let executor: Arc<dyn FunctionExecutor<WorkItem>> =
        Arc::new(FnExecutor::new(|item: WorkItem| async move {
            if item.payload == b"explodes" {
                panic!("function blew up");
            }
            AttemptOutcome::Succeeded
        }));
    let sink = Arc::new(CollectingFaultSink::default());
    let listener = PollingListener::builder(
        provider.queue("orders"),
        provider.queue("orders-poison"),
        executor,
    )
    .config(fast_dispatch_config(4, 2))
    .fault_sink(sink.clone())
    .build();

    listener.start().await.unwrap();
    wait_until(Duration::from_secs(5), || source.is_empty()).await;
    listener.stop().await.unwrap();

    let poison = provider.get("orders-poison").expect("poison queue created");
    assert_eq!(poison.payloads(), vec![b"explodes".to_vec()]);
    let stats = listener.stats();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.poisoned, 1);

    let reports = sink.reports();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|(source, message)| {
        source == "queue:orders" && message.contains("function blew up")
    }));
}

#[tokio::test]
async fn test_failing_item_below_max_stays_in_source() {
    init_test_logging();
    let provider = MemoryQueueProvider::new();
    let source = provider.store("orders");
    fill(&source, 0).await;
    source.enqueue(b"flaky".to_vec()).await.unwrap();

    let recorder = RecordingExecutor::new();
    let listener = PollingListener::builder(
        provider.queue("orders"),
        provider.queue("orders-poison"),
        recorder.executor(|_| AttemptOutcome::Failed),
    )
    .config(fast_dispatch_config(10, 100))
    .build();

    listener.start().await.unwrap();
    wait_until(Duration::from_secs(5), || recorder.seen().len() >= 3).await;
    listener.stop().await.unwrap();

    assert_eq!(source.len(), 1);
    assert!(source.dequeue_count_of(b"flaky").unwrap() >= 3);
    assert!(provider
        .get("orders-poison")
        .map_or(true, |poison| poison.is_empty()));
}

#[tokio::test]
async fn test_in_flight_stays_within_batch_plus_threshold() {
    init_test_logging();
    let store = MemoryQueueStore::new("work");
    fill(&store, 30).await;

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let executor: Arc<dyn FunctionExecutor<WorkItem>> = {
        let current = current.clone();
        let peak = peak.clone();
        Arc::new(FnExecutor::new(move |_item: WorkItem| {
            let current = current.clone();
            let peak = peak.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                AttemptOutcome::Succeeded
            }
        }))
    };

    let config = fast_dispatch_config(4, 5);
    let limit = config.batch_size() + config.new_batch_threshold();
    let listener = PollingListener::builder(
        Arc::new(store.clone()),
        Arc::new(MemoryQueueStore::missing("work-poison")),
        executor,
    )
    .config(config)
    .build();

    listener.start().await.unwrap();
    wait_until(Duration::from_secs(10), || store.is_empty()).await;
    listener.stop().await.unwrap();

    assert!(peak.load(Ordering::SeqCst) <= limit);
    assert!(peak.load(Ordering::SeqCst) > 1, "dispatches never overlapped");
}

#[tokio::test]
async fn test_missing_queue_backs_off_without_faults() {
    init_test_logging();
    let source = MemoryQueueStore::missing("ghost");
    let sink = Arc::new(CollectingFaultSink::default());
    let recorder = RecordingExecutor::new();
    let listener = PollingListener::builder(
        Arc::new(source.clone()),
        Arc::new(MemoryQueueStore::missing("ghost-poison")),
        recorder.executor(|_| AttemptOutcome::Succeeded),
    )
    .config(fast_dispatch_config(4, 5))
    .fault_sink(sink.clone())
    .build();

    listener.start().await.unwrap();
    wait_until(Duration::from_secs(2), || source.stats().fetch_calls >= 3).await;
    listener.stop().await.unwrap();

    assert!(sink.reports().is_empty());
    assert!(recorder.seen().is_empty());
}

#[tokio::test]
async fn test_poisoned_items_wake_poison_listener() {
    init_test_logging();
    let provider = MemoryQueueProvider::new();
    let watcher = Arc::new(QueueWatcher::new());
    let source = provider.store("orders");
    fill(&source, 0).await;

    let recorder = RecordingExecutor::new();
    let poison_recorder = RecordingExecutor::new();
    let main = PollingListener::builder(
        provider.queue("orders"),
        provider.queue("orders-poison"),
        recorder.executor(|_| AttemptOutcome::Failed),
    )
    .config(fast_dispatch_config(4, 1))
    .watcher(watcher.clone())
    .build();

    // The poison listener idles at a long interval and relies on the wake.
    let slow_config = fluvia::DispatchConfig::builder()
        .min_poll_interval(Duration::from_secs(30))
        .max_poll_interval(Duration::from_secs(60))
        .build()
        .unwrap();
    let poison_listener = PollingListener::builder(
        provider.queue("orders-poison"),
        provider.queue("orders-poison-poison"),
        poison_recorder.executor(|_| AttemptOutcome::Succeeded),
    )
    .config(slow_config)
    .watcher(watcher.clone())
    .build();

    poison_listener.start().await.unwrap();
    main.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    watcher
        .enqueue(provider.queue("orders").as_ref(), b"doomed".to_vec())
        .await
        .unwrap();
    wait_until(Duration::from_secs(2), || poison_recorder.seen().len() == 1).await;

    main.stop().await.unwrap();
    poison_listener.stop().await.unwrap();
    assert_eq!(poison_recorder.seen(), vec![b"doomed".to_vec()]);
}
