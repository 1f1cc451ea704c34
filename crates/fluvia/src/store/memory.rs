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

//! In-memory stores.
//!
//! These implement the store contracts faithfully enough to exercise the
//! engine end to end: leases hide items until they expire, deletes and
//! renewals check the lease token, and missing queues report `NotFound`.
//! Tests can inject fetch errors and inspect call counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{ContainerStore, QueueStore, QueueStoreProvider, ScanCursorStore};
use crate::error::StoreError;
use crate::models::{ContainerScanCursor, ObjectInfo, ObjectPage, WorkItem};

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

fn lease_deadline(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now.checked_add_signed(to_chrono(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug)]
struct StoredItem {
    seq: u64,
    payload: Vec<u8>,
    dequeue_count: u32,
    inserted_at: DateTime<Utc>,
    visible_at: DateTime<Utc>,
    lease_token: Option<String>,
}

/// Call counters of a [`MemoryQueueStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryQueueStats {
    pub fetch_calls: u64,
    pub non_empty_fetches: u64,
    pub fetched_items: u64,
    pub deletes: u64,
    pub renewals: u64,
    pub enqueues: u64,
}

#[derive(Default)]
struct QueueState {
    exists: bool,
    next_seq: u64,
    items: BTreeMap<String, StoredItem>,
    fetch_errors: VecDeque<StoreError>,
    stats: MemoryQueueStats,
}

impl fmt::Debug for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueState")
            .field("exists", &self.exists)
            .field("item_count", &self.items.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// A leasing queue held in memory.
#[derive(Debug, Clone)]
pub struct MemoryQueueStore {
    name: String,
    state: Arc<Mutex<QueueState>>,
}

impl MemoryQueueStore {
    /// Creates an existing, empty queue.
    pub fn new(name: impl Into<String>) -> Self {
        let store = Self::missing(name);
        store.state.lock().exists = true;
        store
    }

    /// Creates a handle to a queue that does not exist yet.
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// Deletes or recreates the queue.
    pub fn set_exists(&self, exists: bool) {
        let mut state = self.state.lock();
        state.exists = exists;
        if !exists {
            state.items.clear();
        }
    }

    /// Queues an error to be returned by the next `fetch_batch` call.
    pub fn inject_fetch_error(&self, error: StoreError) {
        self.state.lock().fetch_errors.push_back(error);
    }

    /// Number of items stored, leased or not.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payloads of all stored items in insertion order.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        let state = self.state.lock();
        let mut items: Vec<&StoredItem> = state.items.values().collect();
        items.sort_by_key(|item| item.seq);
        items.into_iter().map(|item| item.payload.clone()).collect()
    }

    /// Delivery count of the item holding `payload`, if present.
    pub fn dequeue_count_of(&self, payload: &[u8]) -> Option<u32> {
        let state = self.state.lock();
        state
            .items
            .values()
            .find(|item| item.payload == payload)
            .map(|item| item.dequeue_count)
    }

    pub fn stats(&self) -> MemoryQueueStats {
        self.state.lock().stats
    }

    fn check_exists(&self, state: &QueueState) -> Result<(), StoreError> {
        if state.exists {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                resource: self.name.clone(),
            })
        }
    }

    fn leased_item<'a>(
        &self,
        state: &'a mut QueueState,
        item: &WorkItem,
    ) -> Result<&'a mut StoredItem, StoreError> {
        self.check_exists(state)?;
        let stored = state
            .items
            .get_mut(&item.id)
            .ok_or_else(|| StoreError::NotFound {
                resource: format!("{}/{}", self.name, item.id),
            })?;
        if stored.lease_token.as_deref() != Some(item.lease_token.as_str()) {
            return Err(StoreError::LeaseLost {
                item_id: item.id.clone(),
            });
        }
        Ok(stored)
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_if_not_exists(&self) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let created = !state.exists;
        state.exists = true;
        Ok(created)
    }

    async fn fetch_batch(&self, max: usize, lease: Duration) -> Result<Vec<WorkItem>, StoreError> {
        let mut state = self.state.lock();
        state.stats.fetch_calls += 1;
        if let Some(error) = state.fetch_errors.pop_front() {
            return Err(error);
        }
        self.check_exists(&state)?;

        let now = Utc::now();
        let mut visible: Vec<(u64, String)> = state
            .items
            .iter()
            .filter(|(_, item)| item.visible_at <= now)
            .map(|(id, item)| (item.seq, id.clone()))
            .collect();
        visible.sort();
        visible.truncate(max);

        let expires_at = lease_deadline(now, lease);
        let mut batch = Vec::with_capacity(visible.len());
        for (_, id) in visible {
            if let Some(stored) = state.items.get_mut(&id) {
                let token = Uuid::new_v4().to_string();
                stored.dequeue_count += 1;
                stored.visible_at = expires_at;
                stored.lease_token = Some(token.clone());
                batch.push(WorkItem {
                    id,
                    payload: stored.payload.clone(),
                    dequeue_count: stored.dequeue_count,
                    inserted_at: stored.inserted_at,
                    lease_token: token,
                    lease_expires_at: expires_at,
                });
            }
        }

        if !batch.is_empty() {
            state.stats.non_empty_fetches += 1;
            state.stats.fetched_items += batch.len() as u64;
        }
        Ok(batch)
    }

    async fn delete(&self, item: &WorkItem) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        self.leased_item(&mut state, item)?;
        state.items.remove(&item.id);
        state.stats.deletes += 1;
        Ok(())
    }

    async fn renew_lease(
        &self,
        item: &WorkItem,
        duration: Duration,
    ) -> Result<DateTime<Utc>, StoreError> {
        let mut state = self.state.lock();
        let stored = self.leased_item(&mut state, item)?;
        let expires_at = lease_deadline(Utc::now(), duration);
        stored.visible_at = expires_at;
        state.stats.renewals += 1;
        Ok(expires_at)
    }

    async fn enqueue(&self, payload: Vec<u8>) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        self.check_exists(&state)?;
        let now = Utc::now();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.items.insert(
            Uuid::new_v4().to_string(),
            StoredItem {
                seq,
                payload,
                dequeue_count: 0,
                inserted_at: now,
                visible_at: now,
                lease_token: None,
            },
        );
        state.stats.enqueues += 1;
        Ok(())
    }
}

/// Hands out [`MemoryQueueStore`]s by name, creating missing queues lazily.
///
/// Queues created by the provider start out non-existent, as a real queue
/// client would for a name nobody has created yet.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueProvider {
    queues: Arc<Mutex<HashMap<String, MemoryQueueStore>>>,
}

impl MemoryQueueProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the concrete store for `name`, creating the handle if needed.
    pub fn store(&self, name: &str) -> MemoryQueueStore {
        self.queues
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| MemoryQueueStore::missing(name))
            .clone()
    }

    /// Returns the store for `name` only if a handle was already created.
    pub fn get(&self, name: &str) -> Option<MemoryQueueStore> {
        self.queues.lock().get(name).cloned()
    }

    /// Names of all queue handles created so far.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl QueueStoreProvider for MemoryQueueProvider {
    fn queue(&self, name: &str) -> Arc<dyn QueueStore> {
        Arc::new(self.store(name))
    }
}

/// Containers of objects held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryContainerStore {
    containers: Arc<Mutex<HashMap<String, BTreeMap<String, ObjectInfo>>>>,
    list_calls: Arc<Mutex<u64>>,
}

impl MemoryContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty container if it does not exist.
    pub fn create_container(&self, container: &str) {
        self.containers
            .lock()
            .entry(container.to_string())
            .or_default();
    }

    /// Writes an object modified now and returns its metadata.
    pub fn put_object(&self, container: &str, name: &str, size: u64) -> ObjectInfo {
        self.put_object_at(container, name, size, Utc::now())
    }

    /// Writes an object with an explicit modification time.
    pub fn put_object_at(
        &self,
        container: &str,
        name: &str,
        size: u64,
        last_modified: DateTime<Utc>,
    ) -> ObjectInfo {
        let info = ObjectInfo {
            name: name.to_string(),
            etag: Uuid::new_v4().to_string(),
            last_modified,
            size,
        };
        self.containers
            .lock()
            .entry(container.to_string())
            .or_default()
            .insert(name.to_string(), info.clone());
        info
    }

    /// Number of `list_page` calls served.
    pub fn list_calls(&self) -> u64 {
        *self.list_calls.lock()
    }
}

#[async_trait]
impl ContainerStore for MemoryContainerStore {
    async fn list_page(
        &self,
        container: &str,
        prefix: Option<&str>,
        continuation: Option<&str>,
        page_size: usize,
    ) -> Result<ObjectPage, StoreError> {
        *self.list_calls.lock() += 1;
        let containers = self.containers.lock();
        let objects = containers
            .get(container)
            .ok_or_else(|| StoreError::NotFound {
                resource: container.to_string(),
            })?;

        let mut page: Vec<ObjectInfo> = objects
            .values()
            .filter(|object| prefix.map_or(true, |p| object.name.starts_with(p)))
            .filter(|object| continuation.map_or(true, |after| object.name.as_str() > after))
            .take(page_size.saturating_add(1))
            .cloned()
            .collect();

        let continuation = if page.len() > page_size {
            page.truncate(page_size);
            page.last().map(|object| object.name.clone())
        } else {
            None
        };
        Ok(ObjectPage {
            objects: page,
            continuation,
        })
    }
}

/// Scan cursors held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    cursors: Arc<Mutex<HashMap<String, ContainerScanCursor>>>,
    saves: Arc<Mutex<u64>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cursor last saved for `container`.
    pub fn get(&self, container: &str) -> Option<ContainerScanCursor> {
        self.cursors.lock().get(container).cloned()
    }

    /// Number of `save` calls served.
    pub fn saves(&self) -> u64 {
        *self.saves.lock()
    }
}

#[async_trait]
impl ScanCursorStore for MemoryCursorStore {
    async fn load(&self, container: &str) -> Result<Option<ContainerScanCursor>, StoreError> {
        Ok(self.get(container))
    }

    async fn save(&self, container: &str, cursor: &ContainerScanCursor) -> Result<(), StoreError> {
        self.cursors
            .lock()
            .insert(container.to_string(), cursor.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}
