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

//! Delivery-budget enforcement.
//!
//! The router never counts attempts itself. The store hands out each item
//! with its delivery count, and an item that fails on its last permitted
//! delivery is copied to the poison queue and removed from the source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::error::StoreError;
use crate::executor::AttemptOutcome;
use crate::listener::wake::QueueWatcher;
use crate::models::WorkItem;
use crate::store::QueueStore;
use crate::telemetry;

/// What happened to an item after its attempt completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Succeeded and deleted from the source queue.
    Deleted,
    /// Failed on its last permitted delivery and moved to the poison queue.
    Poisoned,
    /// Failed and handed back to the source queue for redelivery.
    Released,
    /// A store call failed; the item is left to lease expiry.
    Abandoned,
}

/// Applies the delivery budget to completed attempts.
pub struct PoisonRouter {
    source: Arc<dyn QueueStore>,
    poison: Arc<dyn QueueStore>,
    watcher: Option<Arc<QueueWatcher>>,
    max_dequeue_count: u32,
    visibility_timeout: Duration,
    shutting_down: AtomicBool,
}

impl PoisonRouter {
    pub fn new(
        source: Arc<dyn QueueStore>,
        poison: Arc<dyn QueueStore>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            source,
            poison,
            watcher: None,
            max_dequeue_count: config.max_dequeue_count(),
            visibility_timeout: config.visibility_timeout(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Wakes listeners of the poison queue through `watcher` after each move.
    pub fn with_watcher(mut self, watcher: Arc<QueueWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn poison_queue_name(&self) -> &str {
        self.poison.name()
    }

    /// Refuses new attempts from now on.
    pub fn shut_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Whether a failure of `item` now would exhaust its delivery budget.
    pub fn is_last_attempt(&self, item: &WorkItem) -> bool {
        item.dequeue_count >= self.max_dequeue_count
    }

    /// Asks to start an attempt. A refused item is left to lease expiry.
    pub fn begin_attempt(&self, item: &WorkItem) -> bool {
        if self.shutting_down.load(Ordering::SeqCst) {
            debug!(
                queue = %self.source.name(),
                item_id = %item.id,
                "Refusing attempt during shutdown"
            );
            return false;
        }
        true
    }

    /// Applies the outcome of an attempt to `item`.
    pub async fn complete_attempt(&self, item: &WorkItem, outcome: AttemptOutcome) -> Completion {
        let result = match outcome {
            AttemptOutcome::Succeeded => self.source.delete(item).await.map(|_| Completion::Deleted),
            AttemptOutcome::Failed if self.is_last_attempt(item) => self.move_to_poison(item).await,
            AttemptOutcome::Failed => self
                .source
                .renew_lease(item, self.visibility_timeout)
                .await
                .map(|_| Completion::Released),
        };

        match result {
            Ok(completion) => completion,
            Err(e) if e.is_item_gone() => {
                debug!(
                    queue = %self.source.name(),
                    item_id = %item.id,
                    error = %e,
                    "Item no longer held while completing attempt"
                );
                Completion::Abandoned
            }
            Err(e) => {
                warn!(
                    queue = %self.source.name(),
                    item_id = %item.id,
                    outcome = ?outcome,
                    error = %e,
                    "Failed to complete attempt; item left to lease expiry"
                );
                Completion::Abandoned
            }
        }
    }

    async fn move_to_poison(&self, item: &WorkItem) -> Result<Completion, StoreError> {
        if self.poison.create_if_not_exists().await? {
            debug!(poison_queue = %self.poison.name(), "Created poison queue");
        }
        self.poison.enqueue(item.payload.clone()).await?;
        self.source.delete(item).await?;

        if let Some(watcher) = &self.watcher {
            watcher.notify(self.poison.name());
        }
        telemetry::log_item_poisoned(
            self.source.name(),
            self.poison.name(),
            &item.id,
            item.dequeue_count,
        );
        Ok(Completion::Poisoned)
    }
}
