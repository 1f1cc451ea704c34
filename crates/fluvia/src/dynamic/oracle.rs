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

//! Listener status oracles.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::OracleError;

/// Last known status of a managed listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    /// The oracle has not been asked yet.
    Unknown,
    Enabled,
    Disabled,
}

/// An oracle's answer for one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub enabled: bool,
    /// When to ask again. The oracle, not the manager, decides the cadence.
    pub next_check_interval: Duration,
}

/// Decides whether a function's listener should be running.
#[async_trait]
pub trait ListenerStatusOracle: Send + Sync {
    async fn status(&self, function_id: &str) -> Result<StatusReport, OracleError>;
}

/// Oracle backed by an in-process table, toggled by the host.
///
/// Functions without an entry are enabled.
#[derive(Debug)]
pub struct InMemoryStatusOracle {
    check_interval: Mutex<Duration>,
    disabled: Mutex<HashSet<String>>,
    failing: Mutex<HashMap<String, String>>,
}

impl InMemoryStatusOracle {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            check_interval: Mutex::new(check_interval),
            disabled: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_enabled(&self, function_id: &str, enabled: bool) {
        let mut disabled = self.disabled.lock();
        if enabled {
            disabled.remove(function_id);
        } else {
            disabled.insert(function_id.to_string());
        }
    }

    pub fn set_check_interval(&self, interval: Duration) {
        *self.check_interval.lock() = interval;
    }

    /// Makes queries for `function_id` fail until [`recover`](Self::recover) is called.
    pub fn fail(&self, function_id: &str, message: &str) {
        self.failing
            .lock()
            .insert(function_id.to_string(), message.to_string());
    }

    pub fn recover(&self, function_id: &str) {
        self.failing.lock().remove(function_id);
    }
}

#[async_trait]
impl ListenerStatusOracle for InMemoryStatusOracle {
    async fn status(&self, function_id: &str) -> Result<StatusReport, OracleError> {
        if let Some(message) = self.failing.lock().get(function_id) {
            return Err(OracleError::Unavailable {
                function_id: function_id.to_string(),
                message: message.clone(),
            });
        }
        Ok(StatusReport {
            enabled: !self.disabled.lock().contains(function_id),
            next_check_interval: *self.check_interval.lock(),
        })
    }
}
