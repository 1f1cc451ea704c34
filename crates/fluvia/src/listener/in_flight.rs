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

//! In-flight dispatch accounting.
//!
//! Unlike a semaphore, the tracker never refuses a dispatch: a whole batch is
//! always handed out. The poll loop instead waits for the count to fall back
//! to the new-batch threshold before fetching again, and stop waits for it to
//! reach zero.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct TrackerState {
    count: Mutex<usize>,
    changed: Notify,
}

/// Counts dispatches that are currently running.
#[derive(Debug, Clone, Default)]
pub struct InFlightTracker {
    state: Arc<TrackerState>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new dispatch. The count drops again when the token is dropped.
    pub fn acquire(&self) -> InFlightToken {
        *self.state.count.lock() += 1;
        InFlightToken {
            state: self.state.clone(),
        }
    }

    /// Number of dispatches currently running.
    pub fn count(&self) -> usize {
        *self.state.count.lock()
    }

    /// Waits until at most `limit` dispatches are running.
    pub async fn wait_until_at_most(&self, limit: usize) {
        loop {
            let notified = self.state.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the
            // await is not missed.
            notified.as_mut().enable();
            if self.count() <= limit {
                return;
            }
            notified.await;
        }
    }

    /// Waits until no dispatch is running.
    pub async fn wait_idle(&self) {
        self.wait_until_at_most(0).await
    }
}

/// Marks one running dispatch.
///
/// Tokens are moved into the dispatch task, so the count is released even if
/// the task panics or is aborted.
#[derive(Debug)]
pub struct InFlightToken {
    state: Arc<TrackerState>,
}

impl Drop for InFlightToken {
    fn drop(&mut self) {
        {
            let mut count = self.state.count.lock();
            *count = count.saturating_sub(1);
        }
        self.state.changed.notify_waiters();
    }
}
