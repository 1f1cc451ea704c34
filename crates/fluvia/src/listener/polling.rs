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

//! The polling queue listener.
//!
//! # Example
//!
//! ```rust,ignore
//! let listener = PollingListener::builder(queue, poison_queue, executor)
//!     .config(DispatchConfig::builder().batch_size(10).build()?)
//!     .watcher(watcher.clone())
//!     .build();
//!
//! listener.start().await?;
//! // ...
//! listener.stop().await?; // waits for in-flight dispatches
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify, RwLock};
use tracing::{debug, info, warn};

use super::in_flight::InFlightTracker;
use super::lease::LeaseRenewer;
use super::poison::{Completion, PoisonRouter};
use super::wake::QueueWatcher;
use super::Listener;
use crate::config::DispatchConfig;
use crate::delay::{DelayStrategy, RandomizedExponentialBackoff};
use crate::error::ListenerError;
use crate::executor::{
    attempt_catching_panics, AttemptOutcome, FaultSink, FunctionExecutor, TracingFaultSink,
};
use crate::models::WorkItem;
use crate::store::QueueStore;

/// Snapshot of a listener's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Fetch attempts, including empty and failed ones.
    pub fetch_cycles: u64,
    pub non_empty_fetches: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub poisoned: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    fetch_cycles: AtomicU64,
    non_empty_fetches: AtomicU64,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    poisoned: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ListenerStats {
        ListenerStats {
            fetch_cycles: self.fetch_cycles.load(Ordering::Relaxed),
            non_empty_fetches: self.non_empty_fetches.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            poisoned: self.poisoned.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Created,
    Running,
    Stopped,
}

/// Background task and shutdown channel of a running listener.
struct RuntimeHandles {
    poll_handle: Option<tokio::task::JoinHandle<()>>,
    shutdown_sender: Option<broadcast::Sender<()>>,
}

/// State shared between the listener handle, its poll loop and its dispatch tasks.
struct ListenerCore {
    store: Arc<dyn QueueStore>,
    executor: Arc<dyn FunctionExecutor<WorkItem>>,
    router: PoisonRouter,
    config: DispatchConfig,
    fault_sink: Arc<dyn FaultSink>,
    wake: Arc<Notify>,
    in_flight: InFlightTracker,
    stats: StatsCounters,
}

/// Builder for [`PollingListener`].
pub struct PollingListenerBuilder {
    store: Arc<dyn QueueStore>,
    poison_store: Arc<dyn QueueStore>,
    executor: Arc<dyn FunctionExecutor<WorkItem>>,
    config: DispatchConfig,
    watcher: Option<Arc<QueueWatcher>>,
    fault_sink: Arc<dyn FaultSink>,
}

impl PollingListenerBuilder {
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Subscribes the listener to wake signals for its queue and lets its
    /// poison router signal the poison queue.
    pub fn watcher(mut self, watcher: Arc<QueueWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn fault_sink(mut self, fault_sink: Arc<dyn FaultSink>) -> Self {
        self.fault_sink = fault_sink;
        self
    }

    pub fn build(self) -> PollingListener {
        let mut router = PoisonRouter::new(self.store.clone(), self.poison_store, &self.config);
        let wake = match &self.watcher {
            Some(watcher) => {
                router = router.with_watcher(watcher.clone());
                watcher.subscribe(self.store.name())
            }
            None => Arc::new(Notify::new()),
        };

        PollingListener {
            core: Arc::new(ListenerCore {
                store: self.store,
                executor: self.executor,
                router,
                config: self.config,
                fault_sink: self.fault_sink,
                wake,
                in_flight: InFlightTracker::new(),
                stats: StatsCounters::default(),
            }),
            state: Mutex::new(LifecycleState::Created),
            runtime_handles: RwLock::new(RuntimeHandles {
                poll_handle: None,
                shutdown_sender: None,
            }),
        }
    }
}

/// Polls one queue and dispatches its items.
pub struct PollingListener {
    core: Arc<ListenerCore>,
    state: Mutex<LifecycleState>,
    runtime_handles: RwLock<RuntimeHandles>,
}

impl PollingListener {
    /// Starts building a listener for `store` that poisons into `poison_store`.
    pub fn builder(
        store: Arc<dyn QueueStore>,
        poison_store: Arc<dyn QueueStore>,
        executor: Arc<dyn FunctionExecutor<WorkItem>>,
    ) -> PollingListenerBuilder {
        PollingListenerBuilder {
            store,
            poison_store,
            executor,
            config: DispatchConfig::default(),
            watcher: None,
            fault_sink: Arc::new(TracingFaultSink),
        }
    }

    pub fn queue_name(&self) -> &str {
        self.core.store.name()
    }

    pub fn poison_queue_name(&self) -> &str {
        self.core.router.poison_queue_name()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.core.config
    }

    /// Cuts the current poll wait short.
    pub fn wake(&self) {
        self.core.wake.notify_one();
    }

    /// Number of dispatches currently running.
    pub fn in_flight(&self) -> usize {
        self.core.in_flight.count()
    }

    pub fn stats(&self) -> ListenerStats {
        self.core.stats.snapshot()
    }
}

#[async_trait]
impl Listener for PollingListener {
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
        let core = self.core.clone();
        handles.poll_handle = Some(tokio::spawn(core.run(shutdown_rx)));
        handles.shutdown_sender = Some(shutdown_tx);

        info!(
            queue = %self.core.store.name(),
            batch_size = self.core.config.batch_size(),
            new_batch_threshold = self.core.config.new_batch_threshold(),
            "Queue listener started"
        );
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

        self.core.router.shut_down();
        let mut handles = self.runtime_handles.write().await;
        if let Some(sender) = handles.shutdown_sender.take() {
            let _ = sender.send(());
        }
        if let Some(handle) = handles.poll_handle.take() {
            handle
                .await
                .map_err(|e| ListenerError::TaskFailed(e.to_string()))?;
        }

        info!(queue = %self.core.store.name(), "Queue listener stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        *self.state.lock() == LifecycleState::Running
    }
}

impl ListenerCore {
    async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut delay_strategy = RandomizedExponentialBackoff::new(
            self.config.min_poll_interval(),
            self.config.max_poll_interval(),
        );
        let threshold = self.config.new_batch_threshold();

        loop {
            if self.in_flight.count() > threshold {
                debug!(
                    queue = %self.store.name(),
                    in_flight = self.in_flight.count(),
                    threshold = threshold,
                    "Waiting for dispatch capacity"
                );
                tokio::select! {
                    _ = self.in_flight.wait_until_at_most(threshold) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }

            let found_work = self.poll_once().await;
            let delay = delay_strategy.next_delay(found_work);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {
                    debug!(queue = %self.store.name(), "Poll wait cut short by wake signal");
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        debug!(
            queue = %self.store.name(),
            in_flight = self.in_flight.count(),
            "Draining in-flight dispatches"
        );
        self.in_flight.wait_idle().await;
    }

    /// Runs one fetch cycle. Returns whether any item was fetched.
    async fn poll_once(self: &Arc<Self>) -> bool {
        StatsCounters::bump(&self.stats.fetch_cycles);
        let batch = match self
            .store
            .fetch_batch(self.config.batch_size(), self.config.lease_duration())
            .await
        {
            Ok(batch) => batch,
            Err(e) if e.is_backoff() => {
                debug!(queue = %self.store.name(), error = %e, "Fetch failed; backing off");
                return false;
            }
            Err(e) => {
                self.fault_sink
                    .report(&format!("queue:{}", self.store.name()), &e);
                return false;
            }
        };

        if batch.is_empty() {
            return false;
        }

        StatsCounters::bump(&self.stats.non_empty_fetches);
        debug!(queue = %self.store.name(), batch = batch.len(), "Dispatching batch");
        for item in batch {
            let token = self.in_flight.acquire();
            let core = self.clone();
            tokio::spawn(async move {
                let _token = token;
                core.dispatch(item).await;
            });
        }
        true
    }

    async fn dispatch(&self, item: WorkItem) {
        if !self.router.begin_attempt(&item) {
            return;
        }
        StatsCounters::bump(&self.stats.dispatched);

        let renewer = LeaseRenewer::new(self.store.clone(), &self.config);
        let attempt = attempt_catching_panics(self.executor.as_ref(), &item);
        let outcome = match renewer.renew_while(&item, attempt).await {
            Ok(outcome) => outcome,
            Err(panic) => {
                self.fault_sink
                    .report(&format!("queue:{}", self.store.name()), &panic);
                AttemptOutcome::Failed
            }
        };

        match outcome {
            AttemptOutcome::Succeeded => StatsCounters::bump(&self.stats.succeeded),
            AttemptOutcome::Failed => {
                StatsCounters::bump(&self.stats.failed);
                warn!(
                    queue = %self.store.name(),
                    item_id = %item.id,
                    dequeue_count = item.dequeue_count,
                    "Function attempt failed"
                );
            }
        }

        if self.router.complete_attempt(&item, outcome).await == Completion::Poisoned {
            StatsCounters::bump(&self.stats.poisoned);
        }
    }
}
