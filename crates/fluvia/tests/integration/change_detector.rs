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

use chrono::{TimeZone, Utc};
use fluvia::change::{ContainerListener, HybridChangeDetector};
use fluvia::executor::{AttemptOutcome, FnExecutor, FunctionExecutor};
use fluvia::listener::Listener;
use fluvia::models::{ObjectInfo, ObservedObject};
use fluvia::store::{JsonFileCursorStore, MemoryContainerStore, MemoryCursorStore, ScanCursorStore};
use fluvia::ScanConfig;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::fixtures::{init_test_logging, wait_until, CollectingFaultSink};

fn scan_config(budget: usize) -> ScanConfig {
    ScanConfig::builder()
        .scan_budget_per_cycle(budget)
        .sweep_backdate(Duration::ZERO)
        .min_poll_interval(Duration::from_millis(5))
        .max_poll_interval(Duration::from_millis(40))
        .build()
        .unwrap()
}

fn name_recorder() -> (Arc<Mutex<Vec<String>>>, Arc<dyn FunctionExecutor<ObservedObject>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let executor = Arc::new(FnExecutor::new(move |observed: ObservedObject| {
        let sink = sink.clone();
        async move {
            sink.lock().push(observed.object.name);
            AttemptOutcome::Succeeded
        }
    }));
    (seen, executor)
}

#[tokio::test]
async fn test_listener_pages_through_large_container_once() {
    init_test_logging();
    let store = MemoryContainerStore::new();
    store.create_container("uploads");
    for i in 0..25 {
        store.put_object("uploads", &format!("file-{i:02}"), 10);
    }

    let detector = Arc::new(HybridChangeDetector::new(
        Arc::new(store.clone()),
        Arc::new(MemoryCursorStore::new()),
        scan_config(10),
    ));
    let (seen, executor) = name_recorder();
    detector.register("uploads", None, executor).await.unwrap();

    let listener = ContainerListener::new(detector.clone());
    listener.start().await.unwrap();
    wait_until(Duration::from_secs(3), || seen.lock().len() >= 25).await;
    // A few more cycles must not dispatch anything again.
    tokio::time::sleep(Duration::from_millis(100)).await;
    listener.stop().await.unwrap();

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 25);
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), 25);
    assert!(store.list_calls() >= 3);
}

#[tokio::test]
async fn test_cursor_file_survives_restart() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryContainerStore::new();
    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
    let t1 = t0 + chrono::Duration::minutes(10);
    store.create_container("reports");
    store.put_object_at("reports", "january.csv", 100, t0);
    store.put_object_at("reports", "february.csv", 100, t1);

    {
        let detector = HybridChangeDetector::new(
            Arc::new(store.clone()),
            Arc::new(JsonFileCursorStore::new(dir.path())),
            scan_config(100),
        );
        let (seen, executor) = name_recorder();
        detector.register("reports", None, executor).await.unwrap();
        let report = detector.run_cycle().await;
        assert_eq!(report.sweeps_completed, 1);
        assert_eq!(seen.lock().len(), 2);
    }

    let cursors = JsonFileCursorStore::new(dir.path());
    let persisted = cursors.load("reports").await.unwrap().unwrap();
    assert_eq!(persisted.last_sweep, t1);

    // Objects at the boundary are seen again after a restart; older ones are not.
    let t2 = t1 + chrono::Duration::minutes(5);
    store.put_object_at("reports", "march.csv", 100, t2);
    let detector = HybridChangeDetector::new(
        Arc::new(store.clone()),
        Arc::new(cursors),
        scan_config(100),
    );
    let (seen, executor) = name_recorder();
    detector.register("reports", None, executor).await.unwrap();
    detector.run_cycle().await;

    let mut names = seen.lock().clone();
    names.sort();
    assert_eq!(names, vec!["february.csv".to_string(), "march.csv".to_string()]);
}

#[tokio::test]
async fn test_failed_notification_is_retried_next_cycle() {
    init_test_logging();
    let store = MemoryContainerStore::new();
    store.create_container("inbox");
    let detector = HybridChangeDetector::new(
        Arc::new(store.clone()),
        Arc::new(MemoryCursorStore::new()),
        scan_config(100),
    );

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let executor: Arc<dyn FunctionExecutor<ObservedObject>> =
        Arc::new(FnExecutor::new(move |_observed: ObservedObject| {
            let counter = counter.clone();
            async move { AttemptOutcome::from(counter.fetch_add(1, Ordering::SeqCst) > 0) }
        }));
    detector.register("inbox", None, executor).await.unwrap();

    // Not yet visible in listings, so only the notification path can find it.
    let object = ObjectInfo {
        name: "late.eml".into(),
        etag: "etag-1".into(),
        last_modified: Utc::now(),
        size: 42,
    };
    detector.notify("inbox", object).unwrap();

    let first = detector.run_cycle().await;
    assert_eq!(first.failed, 1);
    assert_eq!(detector.pending_notifications("inbox"), 1);

    let second = detector.run_cycle().await;
    assert_eq!(second.succeeded, 1);
    assert_eq!(detector.pending_notifications("inbox"), 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unregistered_container_stops_dispatching() {
    init_test_logging();
    let store = MemoryContainerStore::new();
    store.create_container("uploads");
    let detector = HybridChangeDetector::new(
        Arc::new(store.clone()),
        Arc::new(MemoryCursorStore::new()),
        scan_config(100),
    );
    let (seen, executor) = name_recorder();
    detector.register("uploads", None, executor).await.unwrap();
    store.put_object("uploads", "one.txt", 1);
    detector.run_cycle().await;

    detector.unregister("uploads").await.unwrap();
    store.put_object("uploads", "two.txt", 1);
    let report = detector.run_cycle().await;

    assert_eq!(report.dispatched, 0);
    assert_eq!(seen.lock().as_slice(), ["one.txt".to_string()]);
    assert!(detector.containers().await.is_empty());
}

#[tokio::test]
async fn test_panicking_function_is_reported_and_listener_keeps_running() {
    init_test_logging();
    let store = MemoryContainerStore::new();
    store.create_container("uploads");
    let detector = Arc::new(HybridChangeDetector::new(
        Arc::new(store.clone()),
        Arc::new(MemoryCursorStore::new()),
        scan_config(100),
    ));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    let executor: Arc<dyn FunctionExecutor<ObservedObject>> =
        Arc::new(FnExecutor::new(move |observed: ObservedObject| {
            let recorded = recorded.clone();
            async move {
                if observed.object.name == "boom.txt" {
                    panic!("corrupt upload");
                }
                recorded.lock().push(observed.object.name);
                AttemptOutcome::Succeeded
            }
        }));
    detector.register("uploads", None, executor).await.unwrap();

    let sink = Arc::new(CollectingFaultSink::default());
    let listener = ContainerListener::new(detector.clone()).with_fault_sink(sink.clone());
    listener.start().await.unwrap();

    store.put_object("uploads", "boom.txt", 1);
    wait_until(Duration::from_secs(2), || !sink.reports().is_empty()).await;
    store.put_object("uploads", "later.txt", 1);
    wait_until(Duration::from_secs(2), || {
        seen.lock().iter().any(|name| name == "later.txt")
    })
    .await;

    assert!(listener.is_running());
    listener.stop().await.unwrap();
    let reports = sink.reports();
    assert!(reports.iter().all(|(source, message)| {
        source == "container:uploads" && message.contains("corrupt upload")
    }));
}
