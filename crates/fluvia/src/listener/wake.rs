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

//! Wake-up signalling for listeners on locally written queues.
//!
//! When this process writes to a queue that one of its own listeners polls,
//! there is no reason for the listener to sit out its backoff interval. The
//! [`QueueWatcher`] lets writers enqueue and wake every local subscriber of
//! that queue in one step:
//!
//! ```rust,ignore
//! let watcher = Arc::new(QueueWatcher::new());
//! let wake = watcher.subscribe("orders");
//!
//! // Writer side
//! watcher.enqueue(store.as_ref(), payload).await?;
//!
//! // Listener side, inside the poll wait
//! tokio::select! {
//!     _ = tokio::time::sleep(delay) => {}
//!     _ = wake.notified() => {}
//! }
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::debug;

use crate::error::StoreError;
use crate::store::QueueStore;

/// Routes "item added" signals to listeners of a queue.
///
/// Subscribers are held weakly; a listener that is dropped stops receiving
/// signals without unsubscribing.
#[derive(Debug, Default)]
pub struct QueueWatcher {
    subscribers: Mutex<HashMap<String, Vec<Weak<Notify>>>>,
}

impl QueueWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to signals for `queue`.
    pub fn subscribe(&self, queue: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.subscribers
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push(Arc::downgrade(&notify));
        notify
    }

    /// Wakes every live subscriber of `queue`. Returns how many were woken.
    ///
    /// Uses `notify_one` so a signal sent while the listener is mid-poll is
    /// kept and consumed by its next wait.
    pub fn notify(&self, queue: &str) -> usize {
        let mut subscribers = self.subscribers.lock();
        let Some(entries) = subscribers.get_mut(queue) else {
            return 0;
        };
        entries.retain(|weak| weak.strong_count() > 0);
        let mut woken = 0;
        for notify in entries.iter().filter_map(Weak::upgrade) {
            notify.notify_one();
            woken += 1;
        }
        if entries.is_empty() {
            subscribers.remove(queue);
        }
        debug!(queue = %queue, woken = woken, "Queue wake signal sent");
        woken
    }

    /// Enqueues `payload` and wakes the queue's local subscribers.
    pub async fn enqueue(&self, store: &dyn QueueStore, payload: Vec<u8>) -> Result<(), StoreError> {
        store.enqueue(payload).await?;
        self.notify(store.name());
        Ok(())
    }

    /// Number of live subscribers of `queue`.
    pub fn subscriber_count(&self, queue: &str) -> usize {
        self.subscribers
            .lock()
            .get(queue)
            .map(|entries| entries.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}
