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

//! Oracle-driven enabling and disabling of listeners.
//!
//! A [`DynamicListener`] wraps a listener factory. When started it asks a
//! [`ListenerStatusOracle`] whether the function should be listening, and
//! keeps asking at whatever interval the oracle returns. Enabling creates and
//! starts a fresh inner listener and adds the function to the
//! [`ScaleRegistry`]; disabling stops and discards the inner listener and
//! removes the function from the registry. Once the wrapper itself is
//! stopped it never comes back, whatever the oracle says.

pub mod manager;
pub mod oracle;
pub mod registry;

pub use manager::{DynamicListener, DynamicListenerManager, ListenerFactory};
pub use oracle::{InMemoryStatusOracle, ListenerStatus, ListenerStatusOracle, StatusReport};
pub use registry::ScaleRegistry;
