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

//! Queue listeners.
//!
//! A [`PollingListener`] repeatedly fetches a batch of leased items from a
//! [`QueueStore`](crate::store::QueueStore), dispatches each one concurrently
//! to a [`FunctionExecutor`](crate::executor::FunctionExecutor), and backs off
//! when the queue is empty. Each dispatch is wrapped by a [`LeaseRenewer`]
//! that keeps the item hidden while it runs and a [`PoisonRouter`] that
//! deletes, releases or quarantines it afterwards.
//!
//! ```text
//!          timer / wake
//!   Idle ───────────────▶ Polling ──non-empty──▶ Dispatching
//!    ▲                      │                        │
//!    └────empty / error─────┘     in-flight > threshold
//!    ▲                                               ▼
//!    └─────────────capacity freed──────────── WaitingForCapacity
//! ```

pub mod in_flight;
pub mod lease;
pub mod poison;
pub mod polling;
pub mod wake;

use async_trait::async_trait;

use crate::error::ListenerError;

pub use in_flight::{InFlightToken, InFlightTracker};
pub use lease::LeaseRenewer;
pub use poison::{Completion, PoisonRouter};
pub use polling::{ListenerStats, PollingListener, PollingListenerBuilder};
pub use wake::QueueWatcher;

/// A startable, stoppable source of dispatches.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Starts listening. Starting a listener twice is an error.
    async fn start(&self) -> Result<(), ListenerError>;

    /// Stops listening and waits for in-flight dispatches to finish.
    /// Stopping a listener that never started is a no-op.
    async fn stop(&self) -> Result<(), ListenerError>;

    /// Whether the listener is currently running.
    fn is_running(&self) -> bool;
}
