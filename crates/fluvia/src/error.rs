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

//! Error types for the listener engine.
//!
//! Errors are split by concern. Store errors carry enough structure for a
//! listener to tell "back off and try again" apart from "something is
//! misconfigured", which is the only distinction the polling loop cares about.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by queue, container and cursor stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The queue or container does not exist.
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    /// The resource is being deleted or was modified concurrently.
    #[error("Conflicting operation on {resource}")]
    Conflict { resource: String },

    /// The store is temporarily unavailable (server-side failure, throttling).
    #[error("Transient store failure: {message}")]
    Transient { message: String },

    /// The lease on an item is no longer held by this consumer.
    #[error("Lease lost for item {item_id}")]
    LeaseLost { item_id: String },

    /// Cursor persistence I/O failure.
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cursor (de)serialization failure.
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other store failure. Treated as fatal by listeners.
    #[error("Store error: {message}")]
    Other { message: String },
}

impl StoreError {
    /// Whether a polling loop should treat this error as "no work found"
    /// and back off rather than report a fault.
    pub fn is_backoff(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. } | StoreError::Conflict { .. } | StoreError::Transient { .. }
        )
    }

    /// Whether the error means the item is already gone or no longer ours.
    pub fn is_item_gone(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. } | StoreError::LeaseLost { .. } | StoreError::Conflict { .. }
        )
    }
}

/// Errors raised by listener lifecycle operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Listener has already been started")]
    AlreadyStarted,

    #[error("Listener has been stopped and cannot be restarted")]
    AlreadyStopped,

    #[error("Listener task failed: {0}")]
    TaskFailed(String),

    #[error("Function {0} already has a managed listener")]
    AlreadyManaged(String),

    #[error("Status oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Shared queue error: {0}")]
    SharedQueue(#[from] SharedQueueError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the shared dispatch queue.
#[derive(Debug, Error)]
pub enum SharedQueueError {
    #[error("Invalid shared queue state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Shared queue initialization failed: {0}")]
    Initialization(String),

    #[error("A handler is already registered for function {0}")]
    DuplicateHandler(String),

    #[error("Failed to encode shared queue message: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors reported by a listener status oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Status unavailable for {function_id}: {message}")]
    Unavailable {
        function_id: String,
        message: String,
    },
}

/// Errors resolving the logical host identifier.
#[derive(Debug, Error)]
#[error("Failed to resolve host id: {message}")]
pub struct HostIdError {
    pub message: String,
}

/// A function attempt panicked instead of returning an outcome.
#[derive(Debug, Error)]
#[error("Function attempt panicked: {message}")]
pub struct FunctionPanic {
    pub message: String,
}

/// Errors raised by the container change detector.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Container {0} is already registered")]
    AlreadyRegistered(String),

    #[error("Container {0} is not registered")]
    NotRegistered(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
