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

//! The set of functions contributing to autoscaling signals.

use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Functions whose listeners currently feed the host's scale monitor.
///
/// Shared between the dynamic listener manager, which adds and removes
/// entries, and whatever collects scale signals, which only reads snapshots.
#[derive(Debug, Default)]
pub struct ScaleRegistry {
    members: Mutex<BTreeSet<String>>,
}

impl ScaleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `function_id`. Returns `false` if it was already present.
    pub fn add(&self, function_id: &str) -> bool {
        self.members.lock().insert(function_id.to_string())
    }

    /// Removes `function_id`. Returns `false` if it was not present.
    pub fn remove(&self, function_id: &str) -> bool {
        self.members.lock().remove(function_id)
    }

    pub fn contains(&self, function_id: &str) -> bool {
        self.members.lock().contains(function_id)
    }

    /// Current members in sorted order.
    pub fn snapshot(&self) -> Vec<String> {
        self.members.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
