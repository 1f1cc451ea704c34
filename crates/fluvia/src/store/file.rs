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

//! Scan cursors persisted as JSON files, one per container.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ScanCursorStore;
use crate::error::StoreError;
use crate::models::ContainerScanCursor;

/// Stores each container's cursor as `<dir>/<container>.cursor.json`.
///
/// Bytes of the container name outside `[A-Za-z0-9.-]` are written as `%XX`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous cursor intact.
#[derive(Debug, Clone)]
pub struct JsonFileCursorStore {
    dir: PathBuf,
}

impl JsonFileCursorStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn cursor_path(&self, container: &str) -> PathBuf {
        // Percent-encoding keeps distinct container names on distinct files.
        let mut file_stem = String::with_capacity(container.len());
        for byte in container.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
                file_stem.push(char::from(byte));
            } else {
                file_stem.push_str(&format!("%{byte:02X}"));
            }
        }
        self.dir.join(format!("{file_stem}.cursor.json"))
    }
}

#[async_trait]
impl ScanCursorStore for JsonFileCursorStore {
    async fn load(&self, container: &str) -> Result<Option<ContainerScanCursor>, StoreError> {
        let path = self.cursor_path(container);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let cursor = serde_json::from_str(&json)?;
        debug!(container = %container, path = %path.display(), "Loaded scan cursor");
        Ok(Some(cursor))
    }

    async fn save(&self, container: &str, cursor: &ContainerScanCursor) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.cursor_path(container);
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(cursor)?;
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &path).await?;
        debug!(container = %container, path = %path.display(), "Saved scan cursor");
        Ok(())
    }
}
