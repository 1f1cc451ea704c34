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

use fluvia::dynamic::{
    DynamicListenerManager, InMemoryStatusOracle, ListenerStatus, ScaleRegistry,
};
use fluvia::executor::AttemptOutcome;
use fluvia::listener::{Listener, PollingListener};
use fluvia::store::{MemoryQueueProvider, QueueStore, QueueStoreProvider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::fixtures::{fast_dispatch_config, init_test_logging, wait_until, RecordingExecutor};

struct Harness {
    provider: MemoryQueueProvider,
    oracle: Arc<InMemoryStatusOracle>,
    registry: Arc<ScaleRegistry>,
    manager: DynamicListenerManager,
    recorder: Arc<RecordingExecutor>,
    created: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        let oracle = Arc::new(InMemoryStatusOracle::new(Duration::from_millis(20)));
        let registry = Arc::new(ScaleRegistry::new());
        let manager = DynamicListenerManager::new(oracle.clone(), registry.clone())
            .with_retry_interval(Duration::from_millis(20));
        Self {
            provider: MemoryQueueProvider::new(),
            oracle,
            registry,
            manager,
            recorder: Arc::new(RecordingExecutor::new()),
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Factory building a fresh polling listener on the `thumbnails` queue.
    fn factory(&self) -> impl Fn() -> Arc<dyn Listener> + Send + Sync + 'static {
        let provider = self.provider.clone();
        let recorder = self.recorder.clone();
        let created = self.created.clone();
        move || -> Arc<dyn Listener> {
            created.fetch_add(1, Ordering::SeqCst);
            Arc::new(
                PollingListener::builder(
                    provider.queue("thumbnails"),
                    provider.queue("thumbnails-poison"),
                    recorder.executor(|_| AttemptOutcome::Succeeded),
                )
                .config(fast_dispatch_config(4, 3))
                .build(),
            )
        }
    }
}

#[tokio::test]
async fn test_disabled_function_starts_listening_once_enabled() {
    init_test_logging();
    let harness = Harness::new();
    let store = harness.provider.store("thumbnails");
    store.create_if_not_exists().await.unwrap();
    store.enqueue(b"first".to_vec()).await.unwrap();

    harness.oracle.set_enabled("thumbnails", false);
    let listener = harness
        .manager
        .create_listener("thumbnails", harness.factory())
        .unwrap();
    listener.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(harness.created.load(Ordering::SeqCst), 0);
    assert!(!harness.registry.contains("thumbnails"));
    assert!(harness.recorder.seen().is_empty());
    assert_eq!(store.stats().fetch_calls, 0);

    harness.oracle.set_enabled("thumbnails", true);
    wait_until(Duration::from_secs(2), || store.is_empty()).await;
    assert!(listener.is_running());
    assert!(harness.registry.contains("thumbnails"));
    assert_eq!(
        harness.manager.status_of("thumbnails"),
        Some(ListenerStatus::Enabled)
    );

    harness.manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disable_pauses_and_reenable_uses_fresh_listener() {
    init_test_logging();
    let harness = Harness::new();
    let store = harness.provider.store("thumbnails");
    store.create_if_not_exists().await.unwrap();

    let listener = harness
        .manager
        .create_listener("thumbnails", harness.factory())
        .unwrap();
    listener.start().await.unwrap();
    assert_eq!(harness.created.load(Ordering::SeqCst), 1);

    harness.oracle.set_enabled("thumbnails", false);
    wait_until(Duration::from_secs(2), || !listener.is_running()).await;
    assert!(!harness.registry.contains("thumbnails"));

    // Work arriving while paused waits for the next enable.
    store.enqueue(b"queued-while-paused".to_vec()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(harness.recorder.seen().is_empty());

    harness.oracle.set_enabled("thumbnails", true);
    wait_until(Duration::from_secs(2), || store.is_empty()).await;
    assert_eq!(harness.created.load(Ordering::SeqCst), 2);
    assert_eq!(
        harness.recorder.seen(),
        vec![b"queued-while-paused".to_vec()]
    );

    harness.manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stopped_listener_is_never_restarted() {
    init_test_logging();
    let harness = Harness::new();
    harness.oracle.set_enabled("thumbnails", false);
    let listener = harness
        .manager
        .create_listener("thumbnails", harness.factory())
        .unwrap();
    listener.start().await.unwrap();
    listener.stop().await.unwrap();

    harness.oracle.set_enabled("thumbnails", true);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(harness.created.load(Ordering::SeqCst), 0);
    assert!(!listener.is_running());
    assert!(!harness.registry.contains("thumbnails"));
}

#[tokio::test]
async fn test_oracle_outage_keeps_current_state() {
    init_test_logging();
    let harness = Harness::new();
    let listener = harness
        .manager
        .create_listener("thumbnails", harness.factory())
        .unwrap();
    listener.start().await.unwrap();
    assert!(listener.is_running());

    harness.oracle.fail("thumbnails", "control plane unreachable");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(listener.is_running());
    assert_eq!(harness.created.load(Ordering::SeqCst), 1);

    harness.oracle.recover("thumbnails");
    harness.oracle.set_enabled("thumbnails", false);
    wait_until(Duration::from_secs(2), || !listener.is_running()).await;

    harness.manager.shutdown().await.unwrap();
    assert!(harness.registry.is_empty());
}
