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

//! Dynamic listener wrapper and manager.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::oracle::{ListenerStatus, ListenerStatusOracle};
use super::registry::ScaleRegistry;
use crate::error::ListenerError;
use crate::listener::Listener;
use crate::telemetry;

/// Creates a fresh inner listener each time a function is enabled.
pub trait ListenerFactory: Send + Sync {
    fn create(&self) -> Arc<dyn Listener>;
}

impl<F> ListenerFactory for F
where
    F: Fn() -> Arc<dyn Listener> + Send + Sync,
{
    fn create(&self) -> Arc<dyn Listener> {
        self()
    }
}

struct MonitorHandles {
    monitor_handle: Option<tokio::task::JoinHandle<()>>,
    shutdown_sender: Option<broadcast::Sender<()>>,
}

struct DynamicCore {
    function_id: String,
    factory: Arc<dyn ListenerFactory>,
    oracle: Arc<dyn ListenerStatusOracle>,
    registry: Arc<ScaleRegistry>,
    retry_interval: Duration,
    /// Serializes start, pause, restart and stop of the inner listener.
    inner: tokio::sync::Mutex<Option<Arc<dyn Listener>>>,
    status: Mutex<ListenerStatus>,
    running: AtomicBool,
    stopped: AtomicBool,
}

/// A listener enabled and disabled by a [`ListenerStatusOracle`].
pub struct DynamicListener {
    core: Arc<DynamicCore>,
    handles: tokio::sync::Mutex<MonitorHandles>,
}

impl DynamicListener {
    pub fn function_id(&self) -> &str {
        &self.core.function_id
    }

    /// Status last reported by the oracle.
    pub fn status(&self) -> ListenerStatus {
        *self.core.status.lock()
    }

    /// Whether the wrapper has been stopped for good.
    pub fn is_stopped(&self) -> bool {
        self.core.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Listener for DynamicListener {
    async fn start(&self) -> Result<(), ListenerError> {
        if self.is_stopped() {
            return Err(ListenerError::AlreadyStopped);
        }
        let mut handles = self.handles.lock().await;
        if handles.monitor_handle.is_some() {
            return Err(ListenerError::AlreadyStarted);
        }

        let core = &self.core;
        let (enabled, interval) = match core.oracle.status(&core.function_id).await {
            Ok(report) => (report.enabled, report.next_check_interval),
            Err(e) => {
                warn!(
                    function_id = %core.function_id,
                    error = %e,
                    "Status oracle unavailable at start; listening until it answers"
                );
                (true, core.retry_interval)
            }
        };

        if enabled {
            let mut inner = core.inner.lock().await;
            let listener = core.factory.create();
            listener.start().await?;
            *inner = Some(listener);
            core.running.store(true, Ordering::SeqCst);
            core.registry.add(&core.function_id);
            *core.status.lock() = ListenerStatus::Enabled;
            telemetry::log_listener_enabled(&core.function_id, interval);
        } else {
            core.registry.remove(&core.function_id);
            *core.status.lock() = ListenerStatus::Disabled;
            telemetry::log_listener_disabled(&core.function_id, interval);
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        handles.monitor_handle = Some(tokio::spawn(core.clone().monitor(interval, shutdown_rx)));
        handles.shutdown_sender = Some(shutdown_tx);
        debug!(
            function_id = %core.function_id,
            enabled = enabled,
            next_check_ms = interval.as_millis() as u64,
            "Dynamic listener monitoring started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), ListenerError> {
        if self.core.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut handles = self.handles.lock().await;
        if let Some(sender) = handles.shutdown_sender.take() {
            let _ = sender.send(());
        }
        if let Some(handle) = handles.monitor_handle.take() {
            handle
                .await
                .map_err(|e| ListenerError::TaskFailed(e.to_string()))?;
        }

        let core = &self.core;
        let listener = core.inner.lock().await.take();
        core.running.store(false, Ordering::SeqCst);
        core.registry.remove(&core.function_id);
        if let Some(listener) = listener {
            listener.stop().await?;
        }
        info!(function_id = %core.function_id, "Dynamic listener stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }
}

impl DynamicCore {
    async fn monitor(self: Arc<Self>, mut interval: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.recv() => break,
            }
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            match self.oracle.status(&self.function_id).await {
                Ok(report) => {
                    interval = report.next_check_interval;
                    self.apply(report.enabled, interval).await;
                }
                Err(e) => {
                    // Keep the current state and ask again after the last interval.
                    warn!(
                        function_id = %self.function_id,
                        error = %e,
                        retry_ms = interval.as_millis() as u64,
                        "Status oracle query failed"
                    );
                }
            }
        }
        debug!(function_id = %self.function_id, "Dynamic listener monitor exited");
    }

    async fn apply(&self, enabled: bool, next_check: Duration) {
        let mut inner = self.inner.lock().await;
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        match (enabled, inner.is_some()) {
            (true, false) => {
                let listener = self.factory.create();
                if let Err(e) = listener.start().await {
                    warn!(
                        function_id = %self.function_id,
                        error = %e,
                        "Failed to restart listener"
                    );
                    return;
                }
                *inner = Some(listener);
                self.running.store(true, Ordering::SeqCst);
                self.registry.add(&self.function_id);
                *self.status.lock() = ListenerStatus::Enabled;
                telemetry::log_listener_enabled(&self.function_id, next_check);
            }
            (false, true) => {
                if let Some(listener) = inner.take() {
                    if let Err(e) = listener.stop().await {
                        warn!(
                            function_id = %self.function_id,
                            error = %e,
                            "Error while pausing listener"
                        );
                    }
                }
                self.running.store(false, Ordering::SeqCst);
                self.registry.remove(&self.function_id);
                *self.status.lock() = ListenerStatus::Disabled;
                telemetry::log_listener_disabled(&self.function_id, next_check);
            }
            (true, true) => *self.status.lock() = ListenerStatus::Enabled,
            (false, false) => *self.status.lock() = ListenerStatus::Disabled,
        }
    }
}

/// Creates and tracks dynamic listeners for a host.
pub struct DynamicListenerManager {
    oracle: Arc<dyn ListenerStatusOracle>,
    registry: Arc<ScaleRegistry>,
    retry_interval: Duration,
    listeners: Mutex<HashMap<String, Arc<DynamicListener>>>,
}

impl DynamicListenerManager {
    /// Interval used when the oracle fails before giving any interval.
    pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

    pub fn new(oracle: Arc<dyn ListenerStatusOracle>, registry: Arc<ScaleRegistry>) -> Self {
        Self {
            oracle,
            registry,
            retry_interval: Self::DEFAULT_RETRY_INTERVAL,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn registry(&self) -> &Arc<ScaleRegistry> {
        &self.registry
    }

    /// Wraps `factory` in a dynamic listener for `function_id`.
    ///
    /// The function joins the scale registry right away, as every listener
    /// does at host start; a disabled status at first start removes it.
    pub fn create_listener(
        &self,
        function_id: impl Into<String>,
        factory: impl ListenerFactory + 'static,
    ) -> Result<Arc<DynamicListener>, ListenerError> {
        let function_id = function_id.into();
        let mut listeners = self.listeners.lock();
        if listeners.contains_key(&function_id) {
            return Err(ListenerError::AlreadyManaged(function_id));
        }

        let listener = Arc::new(DynamicListener {
            core: Arc::new(DynamicCore {
                function_id: function_id.clone(),
                factory: Arc::new(factory),
                oracle: self.oracle.clone(),
                registry: self.registry.clone(),
                retry_interval: self.retry_interval,
                inner: tokio::sync::Mutex::new(None),
                status: Mutex::new(ListenerStatus::Unknown),
                running: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
            handles: tokio::sync::Mutex::new(MonitorHandles {
                monitor_handle: None,
                shutdown_sender: None,
            }),
        });
        self.registry.add(&function_id);
        listeners.insert(function_id, listener.clone());
        Ok(listener)
    }

    pub fn is_managed(&self, function_id: &str) -> bool {
        self.listeners.lock().contains_key(function_id)
    }

    pub fn status_of(&self, function_id: &str) -> Option<ListenerStatus> {
        self.listeners.lock().get(function_id).map(|l| l.status())
    }

    /// Managed function ids in sorted order.
    pub fn managed_functions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.listeners.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stops every managed listener and its monitor.
    pub async fn shutdown(&self) -> Result<(), ListenerError> {
        let listeners: Vec<Arc<DynamicListener>> =
            self.listeners.lock().values().cloned().collect();
        let results = join_all(listeners.iter().map(|listener| listener.stop())).await;
        let mut first_error = None;
        for (listener, result) in listeners.iter().zip(results) {
            if let Err(e) = result {
                warn!(function_id = %listener.function_id(), error = %e, "Error stopping dynamic listener");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
