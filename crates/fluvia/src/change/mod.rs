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

//! Change detection for object-storage containers.
//!
//! Containers have no queue to lease from, so new objects are found two
//! ways: change notifications pushed by the host (fast, but lossy) and
//! budgeted listing sweeps (slow, but complete). The [`HybridChangeDetector`]
//! merges both and keeps a per-container cursor so that a restart resumes
//! the sweep instead of reprocessing the container.

pub mod detector;
pub mod listener;

pub use detector::{CycleReport, HybridChangeDetector};
pub use listener::ContainerListener;
