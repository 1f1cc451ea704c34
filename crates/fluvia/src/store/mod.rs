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

//! Store contracts consumed by the listener engine.
//!
//! The engine does not talk to any particular cloud service. It polls and
//! leases through these traits, and hosts plug in clients for their storage
//! backend. In-memory implementations live in [`memory`] and a JSON-file
//! cursor store in [`file`].
//!
//! The queue abstraction follows the visibility-timeout model: an item handed
//! to one consumer is hidden from others until its lease expires or is
//! extended, and deleting it requires the lease token it was fetched with.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;
use crate::models::{ContainerScanCursor, ObjectPage, WorkItem};

pub use file::JsonFileCursorStore;
pub use memory::{
    MemoryContainerStore, MemoryCursorStore, MemoryQueueProvider, MemoryQueueStats,
    MemoryQueueStore,
};

/// A leasing queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Name of the queue, used for logging and wake-up routing.
    fn name(&self) -> &str;

    /// Creates the queue if needed. Returns `true` if it was created.
    async fn create_if_not_exists(&self) -> Result<bool, StoreError>;

    /// Fetches up to `max` visible items, leasing each for `lease`.
    ///
    /// Must report a missing queue as [`StoreError::NotFound`], a queue being
    /// deleted as [`StoreError::Conflict`] and server-side failures as
    /// [`StoreError::Transient`].
    async fn fetch_batch(&self, max: usize, lease: Duration) -> Result<Vec<WorkItem>, StoreError>;

    /// Deletes an item using the lease token it was fetched with.
    async fn delete(&self, item: &WorkItem) -> Result<(), StoreError>;

    /// Sets the item's lease to expire `duration` from now and returns the new
    /// expiry. A zero duration makes the item visible again immediately.
    async fn renew_lease(
        &self,
        item: &WorkItem,
        duration: Duration,
    ) -> Result<DateTime<Utc>, StoreError>;

    /// Appends a new item.
    async fn enqueue(&self, payload: Vec<u8>) -> Result<(), StoreError>;
}

/// Resolves queue stores by name.
pub trait QueueStoreProvider: Send + Sync {
    fn queue(&self, name: &str) -> Arc<dyn QueueStore>;
}

/// Lists objects in containers.
#[async_trait]
pub trait ContainerStore: Send + Sync {
    /// Lists one page of objects in `container`, ordered by name.
    async fn list_page(
        &self,
        container: &str,
        prefix: Option<&str>,
        continuation: Option<&str>,
        page_size: usize,
    ) -> Result<ObjectPage, StoreError>;
}

/// Persists container scan cursors across restarts.
#[async_trait]
pub trait ScanCursorStore: Send + Sync {
    async fn load(&self, container: &str) -> Result<Option<ContainerScanCursor>, StoreError>;

    async fn save(&self, container: &str, cursor: &ContainerScanCursor) -> Result<(), StoreError>;
}
