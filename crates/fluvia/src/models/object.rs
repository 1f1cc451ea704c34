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

//! Object-storage types used by the container change detector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata of one object in a container listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub name: String,
    /// Entity tag; changes whenever the object content changes.
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// An object observed in a specific container, as handed to executors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedObject {
    pub container: String,
    pub object: ObjectInfo,
}

/// One page of a container listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<ObjectInfo>,
    /// Token for the next page; `None` when the listing is exhausted.
    pub continuation: Option<String>,
}

/// Scan progress for one container.
///
/// `last_sweep` is the boundary below which every object has been observed.
/// `current_sweep` tracks the newest modification time seen by the sweep in
/// progress and becomes the next `last_sweep` when the sweep completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerScanCursor {
    pub last_sweep: DateTime<Utc>,
    pub current_sweep: DateTime<Utc>,
    #[serde(default)]
    pub continuation: Option<String>,
}

impl ContainerScanCursor {
    /// Cursor for a container that has never been scanned; every existing
    /// object counts as new.
    pub fn initial() -> Self {
        Self::from_boundary(DateTime::<Utc>::MIN_UTC)
    }

    /// Cursor resuming from a persisted boundary.
    pub fn from_boundary(boundary: DateTime<Utc>) -> Self {
        Self {
            last_sweep: boundary,
            current_sweep: boundary,
            continuation: None,
        }
    }

    /// Whether an object modified at `modified` belongs to the new set.
    /// Inclusive so that objects sharing the boundary's rounded timestamp are
    /// not skipped.
    pub fn is_new(&self, modified: DateTime<Utc>) -> bool {
        modified >= self.last_sweep
    }
}

impl Default for ContainerScanCursor {
    fn default() -> Self {
        Self::initial()
    }
}
