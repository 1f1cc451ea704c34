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

//! The function-dispatch contract.
//!
//! Listeners hand every unit of work to a [`FunctionExecutor`] and only look
//! at the structured [`AttemptOutcome`] it returns. Failures of user code are
//! outcomes, not errors: they never propagate past this boundary. Faults that
//! cannot be attributed to one item go to a [`FaultSink`] instead.
//!
//! # Example
//!
//! ```rust,ignore
//! use fluvia::executor::{AttemptOutcome, FnExecutor};
//!
//! let executor = FnExecutor::new(|item: WorkItem| async move {
//!     match process(&item.payload).await {
//!         Ok(()) => AttemptOutcome::Succeeded,
//!         Err(_) => AttemptOutcome::Failed,
//!     }
//! });
//! ```

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;

use crate::error::FunctionPanic;
use crate::telemetry;

/// Result of one attempt to run a function on an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
}

impl AttemptOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, AttemptOutcome::Succeeded)
    }
}

impl From<bool> for AttemptOutcome {
    fn from(succeeded: bool) -> Self {
        if succeeded {
            AttemptOutcome::Succeeded
        } else {
            AttemptOutcome::Failed
        }
    }
}

/// Invokes user logic for one input.
#[async_trait]
pub trait FunctionExecutor<T: Send + Sync>: Send + Sync {
    /// Attempts to run the function. Listeners count a panic as a failure.
    async fn attempt(&self, input: &T) -> AttemptOutcome;
}

/// Adapts an async closure into a [`FunctionExecutor`].
///
/// The closure receives its own clone of the input.
pub struct FnExecutor<T, F> {
    f: F,
    _input: PhantomData<fn(T)>,
}

impl<T, F> FnExecutor<T, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _input: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> FunctionExecutor<T> for FnExecutor<T, F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = AttemptOutcome> + Send,
{
    async fn attempt(&self, input: &T) -> AttemptOutcome {
        (self.f)(input.clone()).await
    }
}

/// Runs one attempt, catching a panic in user code.
///
/// Listeners count a panic as a failed attempt and hand the error to their
/// fault sink, so a panicking function still ends up in the poison queue.
pub async fn attempt_catching_panics<T: Send + Sync>(
    executor: &dyn FunctionExecutor<T>,
    input: &T,
) -> Result<AttemptOutcome, FunctionPanic> {
    AssertUnwindSafe(executor.attempt(input))
        .catch_unwind()
        .await
        .map_err(|payload| FunctionPanic {
            message: panic_message(payload.as_ref()),
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Receives faults that are not attributable to a single work item.
pub trait FaultSink: Send + Sync {
    /// Reports an unexpected error raised by `source`.
    fn report(&self, source: &str, error: &(dyn std::error::Error + Send + Sync));
}

/// Fault sink that records faults as structured error events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFaultSink;

impl FaultSink for TracingFaultSink {
    fn report(&self, source: &str, error: &(dyn std::error::Error + Send + Sync)) {
        telemetry::log_unhandled_fault(source, &error.to_string());
    }
}
