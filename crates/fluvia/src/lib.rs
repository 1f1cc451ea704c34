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

//! # Fluvia
//!
//! Fluvia is the trigger-listener engine of a function host. It turns
//! "something may have happened" on a queue or an object-storage container
//! into function executions, with bounded concurrency, lease renewal,
//! poison-item quarantine and crash-safe scan bookkeeping.
//!
//! ## Components
//!
//! - [`listener::PollingListener`]: fetch, dispatch and back off on one queue.
//! - [`shared_queue::SharedDispatchQueue`]: one physical queue per host,
//!   routed to many functions by a key embedded in each message.
//! - [`dynamic::DynamicListenerManager`]: starts and pauses listeners as an
//!   external status oracle dictates.
//! - [`change::HybridChangeDetector`]: notification drain plus budgeted
//!   listing sweeps for containers.
//!
//! Every dispatch ends at a [`executor::FunctionExecutor`], which reports a
//! structured [`executor::AttemptOutcome`] instead of raising errors.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use fluvia::prelude::*;
//! use std::sync::Arc;
//!
//! let provider = MemoryQueueProvider::new();
//! let executor = Arc::new(FnExecutor::new(|item: WorkItem| async move {
//!     println!("got {} bytes", item.payload.len());
//!     AttemptOutcome::Succeeded
//! }));
//!
//! let listener = PollingListener::builder(
//!     provider.queue("orders"),
//!     provider.queue("orders-poison"),
//!     executor,
//! )
//! .config(DispatchConfig::builder().batch_size(16).build()?)
//! .build();
//!
//! listener.start().await?;
//! ```
//!
//! Storage backends plug in through the traits in [`store`]. In-memory
//! implementations and a JSON-file cursor store are included.

pub mod change;
pub mod config;
pub mod delay;
pub mod dynamic;
pub mod error;
pub mod executor;
pub mod listener;
pub mod models;
pub mod shared_queue;
pub mod store;
pub mod telemetry;

pub use config::{DispatchConfig, HostConfig, ScanConfig};
pub use error::{
    ConfigError, DetectorError, FunctionPanic, HostIdError, ListenerError, OracleError,
    SharedQueueError, StoreError,
};
pub use executor::{AttemptOutcome, FaultSink, FnExecutor, FunctionExecutor, TracingFaultSink};
pub use models::{ContainerScanCursor, ObjectInfo, ObservedObject, WorkItem};

/// Commonly used types.
pub mod prelude {
    pub use crate::change::{ContainerListener, HybridChangeDetector};
    pub use crate::config::{DispatchConfig, HostConfig, ScanConfig};
    pub use crate::delay::{DelayStrategy, LinearSpeedup, RandomizedExponentialBackoff};
    pub use crate::dynamic::{
        DynamicListener, DynamicListenerManager, ListenerStatus, ListenerStatusOracle,
        ScaleRegistry,
    };
    pub use crate::executor::{AttemptOutcome, FaultSink, FnExecutor, FunctionExecutor};
    pub use crate::listener::{Listener, PollingListener, QueueWatcher};
    pub use crate::models::{ObjectInfo, ObservedObject, WorkItem};
    pub use crate::shared_queue::{HostIdProvider, SharedDispatchQueue, StaticHostId};
    pub use crate::store::{
        ContainerStore, MemoryContainerStore, MemoryCursorStore, MemoryQueueProvider,
        QueueStore, QueueStoreProvider, ScanCursorStore,
    };
}
