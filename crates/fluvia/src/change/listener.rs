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

//! Drives detection cycles on a timer.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use super::detector::HybridChangeDetector;
use crate::delay::{DelayStrategy, RandomizedExponentialBackoff};
use crate::error::ListenerError;
use crate::executor::{FaultSink, TracingFaultSink};
use crate::listener::Listener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Created,
    Running,
    Stopped,
}

struct RuntimeHandles {
    cycle_handle: Option<tokio::task::JoinHandle<()>>,
    shutdown_sender: Option<broadcast::Sender<()>>,
}

/// Runs [`HybridChangeDetector`] cycles, backing off while containers are
/// quiet and waking early when a notification arrives.
pub struct ContainerListener {
    detector: Arc<HybridChangeDetector>,
    fault_sink: Arc<dyn FaultSink>,
    state: Mutex<LifecycleState>,
    runtime_handles: RwLock<RuntimeHandles>,
}

impl ContainerListener {
    pub fn new(detector: Arc<HybridChangeDetector>) -> Self {
        Self {
            detector,
            fault_sink: Arc::new(TracingFaultSink),
            state: Mutex::new(LifecycleState::Created),
            runtime_handles: RwLock::new(RuntimeHandles {
                cycle_handle: None,
                shutdown_sender: None,
            }),
        }
    }

    pub fn with_fault_sink(mut self, fault_sink: Arc<dyn FaultSink>) -> Self {
        self.fault_sink = fault_sink;
        self
    }

    pub fn detector(&self) -> &Arc<HybridChangeDetector> {
        &self.detector
    }

    async fn run(
        detector: Arc<HybridChangeDetector>,
        fault_sink: Arc<dyn FaultSink>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let config = detector.config().clone();
        let mut delay_strategy =
            RandomizedExponentialBackoff::new(config.min_poll_interval(), config.max_poll_interval());
        let wake = detector.wake_signal();

        loop {
            let report = detector.run_cycle().await;
            for (container, error) in &report.faults {
                fault_sink.report(&format!("container:{container}"), error);
            }
            for (container, panic) in &report.panics {
                fault_sink.report(&format!("container:{container}"), panic);
            }
            if report.found_work() {
                debug!(
                    dispatched = report.dispatched,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "Detection cycle dispatched objects"
                );
            }

            let delay = delay_strategy.next_delay(report.found_work());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wake.notified() => {}
                _ = shutdown_rx.recv() => break,
            }
        }
    }
}

#[async_trait]
impl Listener for ContainerListener {
    async fn start(&self) -> Result<(), ListenerError> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Created => *state = LifecycleState::Running,
                LifecycleState::Running => return Err(ListenerError::AlreadyStarted),
                LifecycleState::Stopped => return Err(ListenerError::AlreadyStopped),
            }
        }

        let mut handles = self.runtime_handles.write().await;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        handles.cycle_handle = Some(tokio::spawn(Self::run(
            self.detector.clone(),
            self.fault_sink.clone(),
            shutdown_rx,
        )));
        handles.shutdown_sender = Some(shutdown_tx);
        info!("Container listener started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ListenerError> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Running => *state = LifecycleState::Stopped,
                LifecycleState::Created | LifecycleState::Stopped => return Ok(()),
            }
        }

        let mut handles = self.runtime_handles.write().await;
        if let Some(sender) = handles.shutdown_sender.take() {
            let _ = sender.send(());
        }
        if let Some(handle) = handles.cycle_handle.take() {
            handle
                .await
                .map_err(|e| ListenerError::TaskFailed(e.to_string()))?;
        }
        info!("Container listener stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        *self.state.lock() == LifecycleState::Running
    }
}
