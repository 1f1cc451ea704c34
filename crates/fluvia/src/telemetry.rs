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

//! Structured lifecycle events.
//!
//! Events that operators alert on (poisoned items, lost leases, listeners
//! toggled by the status oracle, unhandled faults) are emitted here with a
//! stable `event_type` field so log pipelines can match on them without
//! parsing messages. Each event also bumps a counter through the `metrics`
//! facade; without an installed recorder the counters are no-ops.

use std::time::Duration;

/// Event type names.
pub mod events {
    /// An item exceeded its delivery budget and moved to the poison queue.
    pub const ITEM_POISONED: &str = "item.poisoned";
    /// A lease renewal request failed.
    pub const LEASE_RENEWAL_FAILED: &str = "lease.renewal_failed";
    /// A managed listener was enabled by the status oracle.
    pub const LISTENER_ENABLED: &str = "listener.enabled";
    /// A managed listener was disabled by the status oracle.
    pub const LISTENER_DISABLED: &str = "listener.disabled";
    /// A fault not attributable to one item.
    pub const FAULT_UNHANDLED: &str = "fault.unhandled";
    /// A container sweep completed and its cursor was persisted.
    pub const CONTAINER_SWEEP_COMPLETED: &str = "container.sweep_completed";
    /// A shared queue message named a function with no registered handler.
    pub const ROUTING_UNKNOWN_KEY: &str = "routing.unknown_key";
}

/// Metric names.
pub mod metric_names {
    pub const ITEMS_POISONED: &str = "fluvia_items_poisoned_total";
    pub const LEASE_RENEWAL_FAILURES: &str = "fluvia_lease_renewal_failures_total";
    pub const LISTENER_TOGGLES: &str = "fluvia_listener_toggles_total";
    pub const UNHANDLED_FAULTS: &str = "fluvia_unhandled_faults_total";
    pub const SWEEPS_COMPLETED: &str = "fluvia_container_sweeps_total";
}

/// Log an item moved to the poison queue.
pub fn log_item_poisoned(queue: &str, poison_queue: &str, item_id: &str, dequeue_count: u32) {
    metrics::counter!(metric_names::ITEMS_POISONED, "queue" => queue.to_string()).increment(1);
    tracing::warn!(
        event_type = events::ITEM_POISONED,
        queue = %queue,
        poison_queue = %poison_queue,
        item_id = %item_id,
        dequeue_count = dequeue_count,
        "Item moved to poison queue"
    );
}

/// Log a failed lease renewal.
pub fn log_lease_renewal_failed(queue: &str, item_id: &str, error: &str, will_retry: bool) {
    metrics::counter!(metric_names::LEASE_RENEWAL_FAILURES, "queue" => queue.to_string())
        .increment(1);
    tracing::warn!(
        event_type = events::LEASE_RENEWAL_FAILED,
        queue = %queue,
        item_id = %item_id,
        error = %error,
        will_retry = will_retry,
        "Lease renewal failed"
    );
}

/// Log a managed listener being enabled.
pub fn log_listener_enabled(function_id: &str, next_check: Duration) {
    metrics::counter!(metric_names::LISTENER_TOGGLES, "state" => "enabled").increment(1);
    tracing::info!(
        event_type = events::LISTENER_ENABLED,
        function_id = %function_id,
        next_check_ms = next_check.as_millis() as u64,
        "Listener enabled"
    );
}

/// Log a managed listener being disabled.
pub fn log_listener_disabled(function_id: &str, next_check: Duration) {
    metrics::counter!(metric_names::LISTENER_TOGGLES, "state" => "disabled").increment(1);
    tracing::info!(
        event_type = events::LISTENER_DISABLED,
        function_id = %function_id,
        next_check_ms = next_check.as_millis() as u64,
        "Listener disabled"
    );
}

/// Log a fault that is not attributable to one work item.
pub fn log_unhandled_fault(source: &str, error: &str) {
    metrics::counter!(metric_names::UNHANDLED_FAULTS, "source" => source.to_string())
        .increment(1);
    tracing::error!(
        event_type = events::FAULT_UNHANDLED,
        source = %source,
        error = %error,
        "Unhandled listener fault"
    );
}

/// Log a completed container sweep.
pub fn log_sweep_completed(container: &str, persisted_boundary: &str, failed_notifications: usize) {
    metrics::counter!(metric_names::SWEEPS_COMPLETED, "container" => container.to_string())
        .increment(1);
    tracing::info!(
        event_type = events::CONTAINER_SWEEP_COMPLETED,
        container = %container,
        persisted_boundary = %persisted_boundary,
        failed_notifications = failed_notifications,
        "Container sweep completed"
    );
}

/// Log a shared queue message for an unknown function.
pub fn log_unknown_routing_key(queue: &str, function_id: &str, item_id: &str) {
    tracing::warn!(
        event_type = events::ROUTING_UNKNOWN_KEY,
        queue = %queue,
        function_id = %function_id,
        item_id = %item_id,
        "No handler registered for function; discarding message"
    );
}
