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
use fluvia::listener::{Listener, QueueWatcher};
use fluvia::shared_queue::{SharedDispatchQueue, SharedQueueState, StaticHostId};
use fluvia::store::{MemoryQueueProvider, QueueStore};
use fluvia::SharedQueueError;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::fixtures::{fast_dispatch_config, init_test_logging, wait_until};

fn shared_queue(provider: &MemoryQueueProvider) -> SharedDispatchQueue {
    SharedDispatchQueue::new(
        "Fluvia",
        Arc::new(provider.clone()),
        Arc::new(StaticHostId("Host_01".into())),
        Arc::new(QueueWatcher::new()),
    )
    .with_config(fast_dispatch_config(8, 2))
}

fn collecting_handler(
    outcome: AttemptOutcome,
) -> (Arc<Mutex<Vec<Value>>>, Arc<dyn FunctionExecutor<Value>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = Arc::new(FnExecutor::new(move |data: Value| {
        let sink = sink.clone();
        async move {
            sink.lock().push(data);
            outcome
        }
    }));
    (seen, handler)
}

#[tokio::test]
async fn test_messages_are_routed_by_function_id() {
    init_test_logging();
    let provider = MemoryQueueProvider::new();
    let queue = shared_queue(&provider);
    queue.initialize().unwrap();

    let (orders, orders_handler) = collecting_handler(AttemptOutcome::Succeeded);
    let (invoices, invoices_handler) = collecting_handler(AttemptOutcome::Succeeded);
    queue.register_handler("orders", orders_handler).unwrap();
    queue.register_handler("invoices", invoices_handler).unwrap();
    queue.start().await.unwrap();

    queue.enqueue("orders", &json!({"id": 1})).await.unwrap();
    queue.enqueue("invoices", &json!({"id": 2})).await.unwrap();
    queue.enqueue("orders", &json!({"id": 3})).await.unwrap();

    wait_until(Duration::from_secs(2), || {
        orders.lock().len() == 2 && invoices.lock().len() == 1
    })
    .await;
    queue.stop().await.unwrap();

    let mut order_ids: Vec<i64> = orders
        .lock()
        .iter()
        .filter_map(|v| v["id"].as_i64())
        .collect();
    order_ids.sort();
    assert_eq!(order_ids, vec![1, 3]);
    assert_eq!(invoices.lock()[0]["id"], 2);

    let name = queue.queue_name().unwrap();
    assert_eq!(name, "fluvia-host-01");
    assert!(provider.store(&name).is_empty());
}

#[tokio::test]
async fn test_unknown_function_id_is_deleted_not_poisoned() {
    init_test_logging();
    let provider = MemoryQueueProvider::new();
    let queue = shared_queue(&provider);
    queue.initialize().unwrap();
    let (_, handler) = collecting_handler(AttemptOutcome::Succeeded);
    queue.register_handler("orders", handler).unwrap();
    queue.start().await.unwrap();

    queue
        .enqueue("retired-function", &json!({"stale": true}))
        .await
        .unwrap();

    let name = queue.queue_name().unwrap();
    let store = provider.store(&name);
    wait_until(Duration::from_secs(2), || store.is_empty()).await;
    queue.stop().await.unwrap();

    let poison = provider.store(&format!("{name}-poison"));
    assert!(poison.is_empty());
    assert_eq!(store.stats().deletes, 1);
}

#[tokio::test]
async fn test_failing_handler_poisons_after_max_attempts() {
    init_test_logging();
    let provider = MemoryQueueProvider::new();
    let queue = shared_queue(&provider);
    queue.initialize().unwrap();
    let (seen, handler) = collecting_handler(AttemptOutcome::Failed);
    queue.register_handler("orders", handler).unwrap();
    queue.start().await.unwrap();

    queue.enqueue("orders", &json!({"id": 7})).await.unwrap();

    let name = queue.queue_name().unwrap();
    let poison = provider.store(&format!("{name}-poison"));
    wait_until(Duration::from_secs(2), || poison.len() == 1).await;
    queue.stop().await.unwrap();

    assert_eq!(seen.lock().len(), 2);
    let message: Value = serde_json::from_slice(&poison.payloads()[0]).unwrap();
    assert_eq!(message["function_id"], "orders");
    assert_eq!(message["data"]["id"], 7);
}

#[tokio::test]
async fn test_zero_handlers_never_polls() {
    init_test_logging();
    let provider = MemoryQueueProvider::new();
    let queue = shared_queue(&provider);
    queue.initialize().unwrap();
    queue.start().await.unwrap();
    assert_eq!(queue.state(), SharedQueueState::Started);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let name = queue.queue_name().unwrap();
    assert_eq!(provider.store(&name).stats().fetch_calls, 0);
    assert!(!queue.listener().unwrap().is_running());
    queue.stop().await.unwrap();
}

#[tokio::test]
async fn test_registration_after_start_is_rejected() {
    init_test_logging();
    let provider = MemoryQueueProvider::new();
    let queue = shared_queue(&provider);
    queue.initialize().unwrap();
    let (_, first) = collecting_handler(AttemptOutcome::Succeeded);
    queue.register_handler("orders", first).unwrap();
    queue.start().await.unwrap();

    let (_, late) = collecting_handler(AttemptOutcome::Succeeded);
    let result = queue.register_handler("invoices", late);
    assert!(matches!(
        result,
        Err(SharedQueueError::InvalidState {
            actual: "Started",
            ..
        })
    ));
    assert_eq!(queue.registered_functions(), vec!["orders".to_string()]);

    queue.stop().await.unwrap();
    queue.stop().await.unwrap();
    assert_eq!(queue.state(), SharedQueueState::Stopped);
}

#[tokio::test]
async fn test_enqueue_before_start_creates_queue() {
    init_test_logging();
    let provider = MemoryQueueProvider::new();
    let queue = shared_queue(&provider);
    queue.initialize().unwrap();

    queue.enqueue("orders", &json!({"early": true})).await.unwrap();

    let store = provider.store(&queue.queue_name().unwrap());
    assert_eq!(store.len(), 1);
    assert!(!store.create_if_not_exists().await.unwrap());
}
