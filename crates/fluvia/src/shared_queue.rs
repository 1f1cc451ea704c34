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

//! Host-wide shared dispatch queue.
//!
//! Many logical consumers (functions) share one physical queue per host.
//! Each message carries the id of the function it is meant for; a single
//! [`PollingListener`] drains the queue and routes every message to the
//! handler registered under that id.
//!
//! The queue moves strictly forward through its lifecycle:
//!
//! ```text
//! Created ──initialize──▶ Initialized ──start──▶ Started ──stop──▶ Stopped
//!                          (register_handler)
//! ```
//!
//! Handlers can only be registered while `Initialized`, so by the time the
//! queue starts it knows whether any handler exists; with none it never
//! polls at all.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::error::{HostIdError, ListenerError, SharedQueueError, StoreError};
use crate::executor::{AttemptOutcome, FaultSink, FunctionExecutor, TracingFaultSink};
use crate::listener::{Listener, PollingListener, QueueWatcher};
use crate::models::WorkItem;
use crate::store::{QueueStore, QueueStoreProvider};
use crate::telemetry;

/// Longest queue name accepted by common queue services.
pub const MAX_QUEUE_NAME_LEN: usize = 63;

const POISON_SUFFIX: &str = "-poison";

/// Resolves the logical identifier of this host.
pub trait HostIdProvider: Send + Sync {
    fn host_id(&self) -> Result<String, HostIdError>;
}

/// A fixed host id.
#[derive(Debug, Clone)]
pub struct StaticHostId(pub String);

impl HostIdProvider for StaticHostId {
    fn host_id(&self) -> Result<String, HostIdError> {
        if self.0.trim().is_empty() {
            return Err(HostIdError {
                message: "host id is empty".into(),
            });
        }
        Ok(self.0.clone())
    }
}

/// The envelope written to the shared queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedQueueMessage {
    pub function_id: String,
    pub data: serde_json::Value,
}

/// Derives the shared queue name for a host.
///
/// The name is lower-cased, every character outside `[a-z0-9]` becomes `-`,
/// and it is truncated so that the poison queue name still fits in
/// [`MAX_QUEUE_NAME_LEN`].
pub fn shared_queue_name(prefix: &str, host_id: &str) -> String {
    let raw = format!("{prefix}-{host_id}").to_lowercase();
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(MAX_QUEUE_NAME_LEN - POISON_SUFFIX.len())
        .collect();
    while name.ends_with('-') {
        name.pop();
    }
    name
}

/// Name of the poison queue paired with `queue_name`.
pub fn poison_queue_name(queue_name: &str) -> String {
    format!("{queue_name}{POISON_SUFFIX}")
}

/// Lifecycle state of a [`SharedDispatchQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SharedQueueState {
    Created,
    Initialized,
    Started,
    Stopped,
}

impl SharedQueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharedQueueState::Created => "Created",
            SharedQueueState::Initialized => "Initialized",
            SharedQueueState::Started => "Started",
            SharedQueueState::Stopped => "Stopped",
        }
    }
}

type HandlerMap = HashMap<String, Arc<dyn FunctionExecutor<serde_json::Value>>>;

/// Routes shared queue items to registered handlers.
struct MessageRouter {
    queue_name: String,
    handlers: Arc<RwLock<HandlerMap>>,
}

#[async_trait]
impl FunctionExecutor<WorkItem> for MessageRouter {
    async fn attempt(&self, item: &WorkItem) -> AttemptOutcome {
        let message: SharedQueueMessage = match serde_json::from_slice(&item.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    queue = %self.queue_name,
                    item_id = %item.id,
                    error = %e,
                    "Undecodable shared queue message"
                );
                return AttemptOutcome::Failed;
            }
        };

        let handler = self.handlers.read().get(&message.function_id).cloned();
        match handler {
            Some(handler) => handler.attempt(&message.data).await,
            None => {
                // Stale keys from earlier deployments are dropped, not poisoned.
                telemetry::log_unknown_routing_key(&self.queue_name, &message.function_id, &item.id);
                AttemptOutcome::Succeeded
            }
        }
    }
}

struct Resolved {
    store: Arc<dyn QueueStore>,
    listener: Arc<PollingListener>,
}

struct SharedState {
    lifecycle: SharedQueueState,
    resolved: Option<Resolved>,
    init_error: Option<String>,
}

/// One physical queue multiplexed across many functions.
pub struct SharedDispatchQueue {
    prefix: String,
    provider: Arc<dyn QueueStoreProvider>,
    host_ids: Arc<dyn HostIdProvider>,
    watcher: Arc<QueueWatcher>,
    config: DispatchConfig,
    fault_sink: Arc<dyn FaultSink>,
    handlers: Arc<RwLock<HandlerMap>>,
    state: Mutex<SharedState>,
}

impl SharedDispatchQueue {
    pub fn new(
        prefix: impl Into<String>,
        provider: Arc<dyn QueueStoreProvider>,
        host_ids: Arc<dyn HostIdProvider>,
        watcher: Arc<QueueWatcher>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            provider,
            host_ids,
            watcher,
            config: DispatchConfig::default(),
            fault_sink: Arc::new(TracingFaultSink),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            state: Mutex::new(SharedState {
                lifecycle: SharedQueueState::Created,
                resolved: None,
                init_error: None,
            }),
        }
    }

    /// Sets the dispatch configuration of the underlying listener.
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_fault_sink(mut self, fault_sink: Arc<dyn FaultSink>) -> Self {
        self.fault_sink = fault_sink;
        self
    }

    pub fn state(&self) -> SharedQueueState {
        self.state.lock().lifecycle
    }

    /// Physical queue name, once initialization succeeded.
    pub fn queue_name(&self) -> Option<String> {
        self.state
            .lock()
            .resolved
            .as_ref()
            .map(|r| r.store.name().to_string())
    }

    /// Function ids with a registered handler.
    pub fn registered_functions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The underlying listener, once initialization succeeded.
    pub fn listener(&self) -> Option<Arc<PollingListener>> {
        self.state
            .lock()
            .resolved
            .as_ref()
            .map(|r| r.listener.clone())
    }

    fn invalid_state(expected: &'static str, actual: SharedQueueState) -> SharedQueueError {
        SharedQueueError::InvalidState {
            expected,
            actual: actual.as_str(),
        }
    }

    /// Resolves the host id and builds, without starting, the listener.
    ///
    /// A failure to resolve the queue is not returned here. It is kept and
    /// raised by the first [`register_handler`](Self::register_handler) call,
    /// so a host that never uses the shared queue never sees it.
    pub fn initialize(&self) -> Result<(), SharedQueueError> {
        let mut state = self.state.lock();
        if state.lifecycle != SharedQueueState::Created {
            return Err(Self::invalid_state("Created", state.lifecycle));
        }
        state.lifecycle = SharedQueueState::Initialized;

        let host_id = match self.host_ids.host_id() {
            Ok(host_id) => host_id,
            Err(e) => {
                debug!(error = %e, "Deferring shared queue initialization failure");
                state.init_error = Some(e.to_string());
                return Ok(());
            }
        };

        let queue_name = shared_queue_name(&self.prefix, &host_id);
        let store = self.provider.queue(&queue_name);
        let poison_store = self.provider.queue(&poison_queue_name(&queue_name));
        let router = MessageRouter {
            queue_name: queue_name.clone(),
            handlers: self.handlers.clone(),
        };
        let listener = PollingListener::builder(store.clone(), poison_store, Arc::new(router))
            .config(self.config.clone())
            .watcher(self.watcher.clone())
            .fault_sink(self.fault_sink.clone())
            .build();

        info!(queue = %queue_name, host_id = %host_id, "Shared dispatch queue initialized");
        state.resolved = Some(Resolved {
            store,
            listener: Arc::new(listener),
        });
        Ok(())
    }

    /// Registers the handler for `function_id`.
    pub fn register_handler(
        &self,
        function_id: impl Into<String>,
        handler: Arc<dyn FunctionExecutor<serde_json::Value>>,
    ) -> Result<(), SharedQueueError> {
        let function_id = function_id.into();
        let state = self.state.lock();
        if let Some(message) = &state.init_error {
            return Err(SharedQueueError::Initialization(message.clone()));
        }
        if state.lifecycle != SharedQueueState::Initialized {
            return Err(Self::invalid_state("Initialized", state.lifecycle));
        }

        let mut handlers = self.handlers.write();
        if handlers.contains_key(&function_id) {
            return Err(SharedQueueError::DuplicateHandler(function_id));
        }
        debug!(function_id = %function_id, "Registered shared queue handler");
        handlers.insert(function_id, handler);
        Ok(())
    }

    /// Starts polling if any handler was registered.
    pub async fn start(&self) -> Result<(), SharedQueueError> {
        let target = {
            let mut state = self.state.lock();
            if state.lifecycle != SharedQueueState::Initialized {
                return Err(Self::invalid_state("Initialized", state.lifecycle));
            }
            state.lifecycle = SharedQueueState::Started;
            if self.handlers.read().is_empty() {
                None
            } else {
                state
                    .resolved
                    .as_ref()
                    .map(|r| (r.store.clone(), r.listener.clone()))
            }
        };

        let Some((store, listener)) = target else {
            debug!("No shared queue handlers registered; not polling");
            return Ok(());
        };
        store.create_if_not_exists().await?;
        listener.start().await.map_err(Self::listener_error)?;
        Ok(())
    }

    /// Stops polling and waits for in-flight dispatches.
    pub async fn stop(&self) -> Result<(), SharedQueueError> {
        let listener = {
            let mut state = self.state.lock();
            match state.lifecycle {
                SharedQueueState::Started => state.lifecycle = SharedQueueState::Stopped,
                SharedQueueState::Stopped => return Ok(()),
                other => return Err(Self::invalid_state("Started", other)),
            }
            // Start never launched the listener when no handler was registered.
            if self.handlers.read().is_empty() {
                None
            } else {
                state.resolved.as_ref().map(|r| r.listener.clone())
            }
        };

        let Some(listener) = listener else {
            debug!("No shared queue handlers registered; nothing to stop");
            return Ok(());
        };
        listener.stop().await.map_err(Self::listener_error)?;
        Ok(())
    }

    /// Writes a message for `function_id` and wakes the local listener.
    pub async fn enqueue<T: Serialize>(
        &self,
        function_id: &str,
        data: &T,
    ) -> Result<(), SharedQueueError> {
        let store = {
            let state = self.state.lock();
            if let Some(message) = &state.init_error {
                return Err(SharedQueueError::Initialization(message.clone()));
            }
            match &state.resolved {
                Some(resolved) => resolved.store.clone(),
                None => return Err(Self::invalid_state("Initialized", state.lifecycle)),
            }
        };

        let message = SharedQueueMessage {
            function_id: function_id.to_string(),
            data: serde_json::to_value(data)?,
        };
        let payload = serde_json::to_vec(&message)?;

        match self.watcher.enqueue(store.as_ref(), payload.clone()).await {
            Err(StoreError::NotFound { .. }) => {
                store.create_if_not_exists().await?;
                self.watcher.enqueue(store.as_ref(), payload).await?;
            }
            other => other?,
        }
        Ok(())
    }

    fn listener_error(error: ListenerError) -> SharedQueueError {
        match error {
            ListenerError::Store(e) => SharedQueueError::Store(e),
            other => SharedQueueError::Initialization(other.to_string()),
        }
    }
}
