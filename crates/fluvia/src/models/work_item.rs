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

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A leased message fetched from a queue store.
///
/// Every field is assigned by the store. Listeners read the payload and the
/// delivery count but never modify them; the lease token is handed back to
/// the store on delete and renew.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Store-assigned identity.
    pub id: String,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Number of times the store has handed this item out, including this one.
    pub dequeue_count: u32,
    /// When the item was first enqueued.
    pub inserted_at: DateTime<Utc>,
    /// Opaque handle proving ownership of the current lease.
    pub lease_token: String,
    /// When the current lease expires unless renewed.
    pub lease_expires_at: DateTime<Utc>,
}

impl WorkItem {
    /// Time left on the lease, zero if it already expired.
    pub fn lease_remaining(&self) -> Duration {
        (self.lease_expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// The payload as UTF-8 text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
