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

//! Configuration types for queue listeners and the container change detector.
//!
//! Both [`DispatchConfig`] and [`ScanConfig`] are immutable once built and are
//! constructed through builders that validate the combination of values:
//!
//! ```rust,ignore
//! let config = DispatchConfig::builder()
//!     .batch_size(32)
//!     .max_dequeue_count(3)
//!     .build()?;
//! ```
//!
//! Hosts that keep their settings in a file can deserialize a [`HostConfig`]
//! from TOML and convert its sections:
//!
//! ```toml
//! [queues]
//! batch_size = 16
//! max_poll_interval_ms = 30000
//!
//! [containers]
//! scan_budget_per_cycle = 5000
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Per-listener dispatch configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct DispatchConfig {
    batch_size: usize,
    new_batch_threshold: usize,
    max_dequeue_count: u32,
    min_poll_interval: Duration,
    max_poll_interval: Duration,
    visibility_timeout: Duration,
    lease_duration: Duration,
    min_renewal_interval: Duration,
}

impl DispatchConfig {
    /// Largest batch a queue store is asked for in one fetch.
    pub const MAX_BATCH_SIZE: usize = 32;

    /// Creates a new configuration builder with default values.
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::default()
    }

    /// Maximum number of items fetched per poll.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// In-flight dispatch count above which the listener stops fetching.
    pub fn new_batch_threshold(&self) -> usize {
        self.new_batch_threshold
    }

    /// Delivery attempts after which a failing item is poisoned.
    pub fn max_dequeue_count(&self) -> u32 {
        self.max_dequeue_count
    }

    /// Floor of the poll interval.
    pub fn min_poll_interval(&self) -> Duration {
        self.min_poll_interval
    }

    /// Ceiling of the poll interval.
    pub fn max_poll_interval(&self) -> Duration {
        self.max_poll_interval
    }

    /// Delay before a failed, non-poisoned item becomes visible again.
    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    /// Lease requested from the store when fetching.
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Shortest interval between two lease renewals.
    pub fn min_renewal_interval(&self) -> Duration {
        self.min_renewal_interval
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let batch_size = 16;
        Self {
            batch_size,
            new_batch_threshold: batch_size / 2,
            max_dequeue_count: 5,
            min_poll_interval: Duration::from_millis(100),
            max_poll_interval: Duration::from_secs(60),
            visibility_timeout: Duration::ZERO,
            lease_duration: Duration::from_secs(600),
            min_renewal_interval: Duration::from_secs(60),
        }
    }
}

/// Builder for [`DispatchConfig`].
#[derive(Debug, Clone, Default)]
pub struct DispatchConfigBuilder {
    config: DispatchConfig,
    new_batch_threshold: Option<usize>,
}

impl DispatchConfigBuilder {
    /// Sets the batch size. The new-batch threshold follows it unless set explicitly.
    pub fn batch_size(mut self, value: usize) -> Self {
        self.config.batch_size = value;
        self
    }

    /// Sets the in-flight threshold explicitly.
    pub fn new_batch_threshold(mut self, value: usize) -> Self {
        self.new_batch_threshold = Some(value);
        self
    }

    /// Sets the poison threshold.
    pub fn max_dequeue_count(mut self, value: u32) -> Self {
        self.config.max_dequeue_count = value;
        self
    }

    /// Sets the poll interval floor.
    pub fn min_poll_interval(mut self, value: Duration) -> Self {
        self.config.min_poll_interval = value;
        self
    }

    /// Sets the poll interval ceiling.
    pub fn max_poll_interval(mut self, value: Duration) -> Self {
        self.config.max_poll_interval = value;
        self
    }

    /// Sets the release delay for failed items.
    pub fn visibility_timeout(mut self, value: Duration) -> Self {
        self.config.visibility_timeout = value;
        self
    }

    /// Sets the lease duration requested on fetch.
    pub fn lease_duration(mut self, value: Duration) -> Self {
        self.config.lease_duration = value;
        self
    }

    /// Sets the minimum renewal interval.
    pub fn min_renewal_interval(mut self, value: Duration) -> Self {
        self.config.min_renewal_interval = value;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<DispatchConfig, ConfigError> {
        let mut config = self.config;
        config.new_batch_threshold = self
            .new_batch_threshold
            .unwrap_or(config.batch_size / 2);

        if config.batch_size == 0 || config.batch_size > DispatchConfig::MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: format!(
                    "{} is outside 1..={}",
                    config.batch_size,
                    DispatchConfig::MAX_BATCH_SIZE
                ),
            });
        }
        if config.max_dequeue_count == 0 {
            return Err(ConfigError::Invalid {
                field: "max_dequeue_count",
                reason: "must be at least 1".into(),
            });
        }
        if config.min_poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "min_poll_interval",
                reason: "must be positive".into(),
            });
        }
        if config.min_poll_interval > config.max_poll_interval {
            return Err(ConfigError::Invalid {
                field: "min_poll_interval",
                reason: format!(
                    "{:?} exceeds max_poll_interval {:?}",
                    config.min_poll_interval, config.max_poll_interval
                ),
            });
        }
        if config.lease_duration.is_zero() {
            return Err(ConfigError::Invalid {
                field: "lease_duration",
                reason: "must be positive".into(),
            });
        }
        if config.min_renewal_interval >= config.lease_duration {
            return Err(ConfigError::Invalid {
                field: "min_renewal_interval",
                reason: format!(
                    "{:?} is not shorter than lease_duration {:?}",
                    config.min_renewal_interval, config.lease_duration
                ),
            });
        }
        Ok(config)
    }
}

/// Configuration of the container change detector and its listener.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ScanConfig {
    scan_budget_per_cycle: usize,
    min_poll_interval: Duration,
    max_poll_interval: Duration,
    sweep_backdate: Duration,
}

impl ScanConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Objects listed per cycle, shared across all registered containers.
    pub fn scan_budget_per_cycle(&self) -> usize {
        self.scan_budget_per_cycle
    }

    /// Delay between cycles that found new objects.
    pub fn min_poll_interval(&self) -> Duration {
        self.min_poll_interval
    }

    /// Ceiling of the delay between idle cycles.
    pub fn max_poll_interval(&self) -> Duration {
        self.max_poll_interval
    }

    /// Margin subtracted from a completed sweep's boundary before persisting it.
    pub fn sweep_backdate(&self) -> Duration {
        self.sweep_backdate
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_budget_per_cycle: 10_000,
            min_poll_interval: Duration::from_secs(1),
            max_poll_interval: Duration::from_secs(10),
            sweep_backdate: Duration::from_secs(2),
        }
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug, Clone, Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    pub fn scan_budget_per_cycle(mut self, value: usize) -> Self {
        self.config.scan_budget_per_cycle = value;
        self
    }

    pub fn min_poll_interval(mut self, value: Duration) -> Self {
        self.config.min_poll_interval = value;
        self
    }

    pub fn max_poll_interval(mut self, value: Duration) -> Self {
        self.config.max_poll_interval = value;
        self
    }

    pub fn sweep_backdate(mut self, value: Duration) -> Self {
        self.config.sweep_backdate = value;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<ScanConfig, ConfigError> {
        let config = self.config;
        if config.scan_budget_per_cycle == 0 {
            return Err(ConfigError::Invalid {
                field: "scan_budget_per_cycle",
                reason: "must be at least 1".into(),
            });
        }
        if config.min_poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "min_poll_interval",
                reason: "must be positive".into(),
            });
        }
        if config.min_poll_interval > config.max_poll_interval {
            return Err(ConfigError::Invalid {
                field: "min_poll_interval",
                reason: format!(
                    "{:?} exceeds max_poll_interval {:?}",
                    config.min_poll_interval, config.max_poll_interval
                ),
            });
        }
        Ok(config)
    }
}

/// Queue section of a host configuration file. Durations are milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSection {
    pub batch_size: Option<usize>,
    pub new_batch_threshold: Option<usize>,
    pub max_dequeue_count: Option<u32>,
    pub min_poll_interval_ms: Option<u64>,
    pub max_poll_interval_ms: Option<u64>,
    pub visibility_timeout_ms: Option<u64>,
    pub lease_duration_ms: Option<u64>,
    pub min_renewal_interval_ms: Option<u64>,
}

/// Container section of a host configuration file. Durations are milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerSection {
    pub scan_budget_per_cycle: Option<usize>,
    pub min_poll_interval_ms: Option<u64>,
    pub max_poll_interval_ms: Option<u64>,
    pub sweep_backdate_ms: Option<u64>,
}

/// Host-level settings as read from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Prefix of the shared dispatch queue name.
    pub shared_queue_prefix: Option<String>,
    pub queues: QueueSection,
    pub containers: ContainerSection,
}

impl HostConfig {
    /// Default prefix of the shared dispatch queue name.
    pub const DEFAULT_SHARED_QUEUE_PREFIX: &'static str = "fluvia-shared";

    /// Parses a host configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a host configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Shared queue prefix, falling back to the default.
    pub fn shared_queue_prefix(&self) -> &str {
        self.shared_queue_prefix
            .as_deref()
            .unwrap_or(Self::DEFAULT_SHARED_QUEUE_PREFIX)
    }

    /// Builds the dispatch configuration, applying defaults for missing keys.
    pub fn dispatch_config(&self) -> Result<DispatchConfig, ConfigError> {
        let q = &self.queues;
        let mut builder = DispatchConfig::builder();
        if let Some(v) = q.batch_size {
            builder = builder.batch_size(v);
        }
        if let Some(v) = q.new_batch_threshold {
            builder = builder.new_batch_threshold(v);
        }
        if let Some(v) = q.max_dequeue_count {
            builder = builder.max_dequeue_count(v);
        }
        if let Some(v) = q.min_poll_interval_ms {
            builder = builder.min_poll_interval(Duration::from_millis(v));
        }
        if let Some(v) = q.max_poll_interval_ms {
            builder = builder.max_poll_interval(Duration::from_millis(v));
        }
        if let Some(v) = q.visibility_timeout_ms {
            builder = builder.visibility_timeout(Duration::from_millis(v));
        }
        if let Some(v) = q.lease_duration_ms {
            builder = builder.lease_duration(Duration::from_millis(v));
        }
        if let Some(v) = q.min_renewal_interval_ms {
            builder = builder.min_renewal_interval(Duration::from_millis(v));
        }
        builder.build()
    }

    /// Builds the scan configuration, applying defaults for missing keys.
    pub fn scan_config(&self) -> Result<ScanConfig, ConfigError> {
        let c = &self.containers;
        let mut builder = ScanConfig::builder();
        if let Some(v) = c.scan_budget_per_cycle {
            builder = builder.scan_budget_per_cycle(v);
        }
        if let Some(v) = c.min_poll_interval_ms {
            builder = builder.min_poll_interval(Duration::from_millis(v));
        }
        if let Some(v) = c.max_poll_interval_ms {
            builder = builder.max_poll_interval(Duration::from_millis(v));
        }
        if let Some(v) = c.sweep_backdate_ms {
            builder = builder.sweep_backdate(Duration::from_millis(v));
        }
        builder.build()
    }
}
