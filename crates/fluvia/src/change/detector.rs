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

//! The hybrid notification and scan detector.
//!
//! Each cycle visits every registered container once:
//!
//! 1. Drain the container's notification queue and dispatch each object.
//!    Failed notifications go back on the queue for the next cycle.
//! 2. List one page of the container, sized so that all containers together
//!    stay within the per-cycle scan budget, and dispatch every object
//!    modified at or after the sweep boundary.
//! 3. When the listing is exhausted the sweep is complete: the newest
//!    modification time seen, minus a small backdate, becomes the new
//!    boundary and is persisted. If anything failed during the sweep the
//!    boundary is pulled back to the oldest failure so the next sweep sees
//!    it again.
//!
//! Objects that succeeded are remembered by name and entity tag, so an
//! object seen first by notification and then by the scan is dispatched
//! once.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::error::{DetectorError, FunctionPanic, StoreError};
use crate::executor::{attempt_catching_panics, AttemptOutcome, FunctionExecutor};
use crate::models::{ContainerScanCursor, ObjectInfo, ObservedObject};
use crate::store::{ContainerStore, ScanCursorStore};
use crate::telemetry;

/// Counters for one detection cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub notifications_drained: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub sweeps_completed: usize,
    /// Listing failures that were not transient, by container.
    pub faults: Vec<(String, StoreError)>,
    /// Function attempts that panicked, by container. Each also counts as failed.
    pub panics: Vec<(String, FunctionPanic)>,
}

impl CycleReport {
    /// Whether the cycle dispatched anything.
    pub fn found_work(&self) -> bool {
        self.dispatched > 0
    }
}

struct ContainerRegistration {
    prefix: Option<String>,
    executor: Arc<dyn FunctionExecutor<ObservedObject>>,
    cursor: ContainerScanCursor,
    /// Successfully processed objects: name to (etag, last_modified).
    processed: HashMap<String, (String, DateTime<Utc>)>,
    /// Oldest modification time that failed during the current sweep.
    earliest_failure: Option<DateTime<Utc>>,
    sweep_failures: usize,
}

impl ContainerRegistration {
    fn already_processed(&self, object: &ObjectInfo) -> bool {
        self.processed
            .get(&object.name)
            .map_or(false, |(etag, _)| *etag == object.etag)
    }

    fn record_failure(&mut self, modified: DateTime<Utc>) {
        self.sweep_failures += 1;
        self.earliest_failure = Some(match self.earliest_failure {
            Some(earliest) => earliest.min(modified),
            None => modified,
        });
    }
}

/// Detects new objects in registered containers.
pub struct HybridChangeDetector {
    containers: Arc<dyn ContainerStore>,
    cursors: Arc<dyn ScanCursorStore>,
    config: ScanConfig,
    registrations: tokio::sync::Mutex<BTreeMap<String, ContainerRegistration>>,
    notifications: Mutex<HashMap<String, VecDeque<ObjectInfo>>>,
    wake: Arc<Notify>,
}

impl HybridChangeDetector {
    pub fn new(
        containers: Arc<dyn ContainerStore>,
        cursors: Arc<dyn ScanCursorStore>,
        config: ScanConfig,
    ) -> Self {
        Self {
            containers,
            cursors,
            config,
            registrations: tokio::sync::Mutex::new(BTreeMap::new()),
            notifications: Mutex::new(HashMap::new()),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Signalled whenever a notification is queued.
    pub fn wake_signal(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Registers `container`, resuming from its persisted cursor if any.
    pub async fn register(
        &self,
        container: &str,
        prefix: Option<String>,
        executor: Arc<dyn FunctionExecutor<ObservedObject>>,
    ) -> Result<(), DetectorError> {
        let mut registrations = self.registrations.lock().await;
        if registrations.contains_key(container) {
            return Err(DetectorError::AlreadyRegistered(container.to_string()));
        }

        let cursor = match self.cursors.load(container).await? {
            Some(cursor) => ContainerScanCursor::from_boundary(cursor.last_sweep),
            None => ContainerScanCursor::initial(),
        };
        info!(
            container = %container,
            boundary = %cursor.last_sweep,
            "Registered container for change detection"
        );

        registrations.insert(
            container.to_string(),
            ContainerRegistration {
                prefix,
                executor,
                cursor,
                processed: HashMap::new(),
                earliest_failure: None,
                sweep_failures: 0,
            },
        );
        self.notifications
            .lock()
            .insert(container.to_string(), VecDeque::new());
        Ok(())
    }

    /// Stops detecting changes in `container`. Pending notifications are dropped.
    pub async fn unregister(&self, container: &str) -> Result<(), DetectorError> {
        let mut registrations = self.registrations.lock().await;
        if registrations.remove(container).is_none() {
            return Err(DetectorError::NotRegistered(container.to_string()));
        }
        self.notifications.lock().remove(container);
        Ok(())
    }

    /// Registered container names in sorted order.
    pub async fn containers(&self) -> Vec<String> {
        self.registrations.lock().await.keys().cloned().collect()
    }

    /// The in-memory cursor of `container`.
    pub async fn cursor(&self, container: &str) -> Option<ContainerScanCursor> {
        self.registrations
            .lock()
            .await
            .get(container)
            .map(|r| r.cursor.clone())
    }

    /// Queues a change notification for `container`.
    pub fn notify(&self, container: &str, object: ObjectInfo) -> Result<(), DetectorError> {
        {
            let mut notifications = self.notifications.lock();
            let queue = notifications
                .get_mut(container)
                .ok_or_else(|| DetectorError::NotRegistered(container.to_string()))?;
            queue.push_back(object);
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Number of queued notifications for `container`.
    pub fn pending_notifications(&self, container: &str) -> usize {
        self.notifications
            .lock()
            .get(container)
            .map_or(0, VecDeque::len)
    }

    /// Objects listed per container per cycle.
    fn page_size(&self, container_count: usize) -> usize {
        (self.config.scan_budget_per_cycle() / container_count.max(1)).max(1)
    }

    /// Runs one detection cycle over every registered container.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let mut registrations = self.registrations.lock().await;
        if registrations.is_empty() {
            return report;
        }
        let page_size = self.page_size(registrations.len());

        for (container, registration) in registrations.iter_mut() {
            self.drain_notifications(container, registration, &mut report)
                .await;
            self.scan_page(container, registration, page_size, &mut report)
                .await;
        }
        report
    }

    async fn drain_notifications(
        &self,
        container: &str,
        registration: &mut ContainerRegistration,
        report: &mut CycleReport,
    ) {
        let drained: Vec<ObjectInfo> = match self.notifications.lock().get_mut(container) {
            Some(queue) => queue.drain(..).collect(),
            None => return,
        };
        report.notifications_drained += drained.len();

        let mut retry = Vec::new();
        for object in drained {
            if registration.already_processed(&object) {
                continue;
            }
            if !Self::dispatch(container, registration, object.clone(), report).await {
                registration.record_failure(object.last_modified);
                retry.push(object);
            }
        }

        if !retry.is_empty() {
            debug!(container = %container, count = retry.len(), "Re-queueing failed notifications");
            if let Some(queue) = self.notifications.lock().get_mut(container) {
                for object in retry.into_iter().rev() {
                    queue.push_front(object);
                }
            }
        }
    }

    async fn scan_page(
        &self,
        container: &str,
        registration: &mut ContainerRegistration,
        page_size: usize,
        report: &mut CycleReport,
    ) {
        let page = match self
            .containers
            .list_page(
                container,
                registration.prefix.as_deref(),
                registration.cursor.continuation.as_deref(),
                page_size,
            )
            .await
        {
            Ok(page) => page,
            Err(e) if e.is_backoff() => {
                debug!(container = %container, error = %e, "Listing failed; retrying next cycle");
                return;
            }
            Err(e) => {
                report.faults.push((container.to_string(), e));
                return;
            }
        };

        for object in page.objects {
            if object.last_modified > registration.cursor.current_sweep {
                registration.cursor.current_sweep = object.last_modified;
            }
            if !registration.cursor.is_new(object.last_modified)
                || registration.already_processed(&object)
            {
                continue;
            }
            let modified = object.last_modified;
            if !Self::dispatch(container, registration, object, report).await {
                registration.record_failure(modified);
            }
        }

        registration.cursor.continuation = page.continuation;
        if registration.cursor.continuation.is_none() {
            self.complete_sweep(container, registration).await;
            report.sweeps_completed += 1;
        }
    }

    async fn complete_sweep(&self, container: &str, registration: &mut ContainerRegistration) {
        let cursor = &registration.cursor;
        let mut boundary = if cursor.current_sweep > cursor.last_sweep {
            let backdate = chrono::Duration::from_std(self.config.sweep_backdate())
                .unwrap_or_else(|_| chrono::Duration::zero());
            cursor
                .current_sweep
                .checked_sub_signed(backdate)
                .unwrap_or(cursor.current_sweep)
                .max(cursor.last_sweep)
        } else {
            cursor.last_sweep
        };
        let failures = std::mem::take(&mut registration.sweep_failures);
        if let Some(earliest) = registration.earliest_failure.take() {
            boundary = boundary.min(earliest);
        }

        if boundary == registration.cursor.last_sweep {
            registration.cursor.current_sweep = boundary;
            return;
        }

        let next = ContainerScanCursor::from_boundary(boundary);
        if let Err(e) = self.cursors.save(container, &next).await {
            warn!(container = %container, error = %e, "Failed to persist scan cursor");
        }
        registration.cursor = next;
        registration
            .processed
            .retain(|_, (_, modified)| *modified >= boundary);
        telemetry::log_sweep_completed(container, &boundary.to_rfc3339(), failures);
    }

    async fn dispatch(
        container: &str,
        registration: &mut ContainerRegistration,
        object: ObjectInfo,
        report: &mut CycleReport,
    ) -> bool {
        report.dispatched += 1;
        let observed = ObservedObject {
            container: container.to_string(),
            object,
        };
        let outcome =
            match attempt_catching_panics(registration.executor.as_ref(), &observed).await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    report.panics.push((container.to_string(), panic));
                    AttemptOutcome::Failed
                }
            };
        if outcome.is_success() {
            report.succeeded += 1;
            let object = observed.object;
            registration
                .processed
                .insert(object.name, (object.etag, object.last_modified));
            true
        } else {
            report.failed += 1;
            warn!(
                container = %container,
                object = %observed.object.name,
                "Function attempt failed for object"
            );
            false
        }
    }
}
