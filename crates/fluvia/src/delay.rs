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

//! Poll interval strategies.
//!
//! Listeners ask a [`DelayStrategy`] how long to wait before the next poll,
//! telling it whether the previous poll did useful work. Two strategies are
//! provided:
//!
//! - [`RandomizedExponentialBackoff`]: the polling default. Resets to the
//!   floor after a productive poll and roughly doubles after each idle one,
//!   with jitter so that many hosts polling the same queue drift apart.
//! - [`LinearSpeedup`]: used by lease renewal. Starts at a normal interval and
//!   shortens it in fixed steps after each failed attempt.

use rand::Rng;
use std::time::Duration;

/// Computes the next wait from the outcome of the previous execution.
pub trait DelayStrategy: Send {
    /// Returns the delay before the next execution.
    fn next_delay(&mut self, execution_succeeded: bool) -> Duration;
}

/// Exponential backoff between a floor and a ceiling, with jitter.
#[derive(Debug, Clone)]
pub struct RandomizedExponentialBackoff {
    min_interval: Duration,
    max_interval: Duration,
    current: Option<Duration>,
}

impl RandomizedExponentialBackoff {
    /// Fraction of the doubled interval used as jitter, in both directions.
    const RANDOMIZATION_FACTOR: f64 = 0.2;

    /// Creates a strategy bounded by `min_interval` and `max_interval`.
    ///
    /// A `max_interval` smaller than `min_interval` is raised to it.
    pub fn new(min_interval: Duration, max_interval: Duration) -> Self {
        Self {
            min_interval,
            max_interval: max_interval.max(min_interval),
            current: None,
        }
    }

    /// The floor interval.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// The ceiling interval.
    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    fn backoff_from(&self, previous: Duration) -> Duration {
        if previous >= self.max_interval {
            return self.max_interval;
        }
        let doubled = previous.as_secs_f64() * 2.0;
        let jitter = rand::thread_rng()
            .gen_range(-Self::RANDOMIZATION_FACTOR..=Self::RANDOMIZATION_FACTOR);
        let candidate = Duration::from_secs_f64((doubled * (1.0 + jitter)).max(0.0));
        // Idle waits never shrink until the ceiling is reached.
        candidate.clamp(previous, self.max_interval)
    }
}

impl DelayStrategy for RandomizedExponentialBackoff {
    fn next_delay(&mut self, execution_succeeded: bool) -> Duration {
        let next = if execution_succeeded {
            self.min_interval
        } else {
            match self.current {
                None => self.min_interval,
                Some(previous) if previous.is_zero() => self.min_interval,
                Some(previous) => self.backoff_from(previous),
            }
        };
        self.current = Some(next);
        next
    }
}

/// Linearly shortening interval, reset on success.
#[derive(Debug, Clone)]
pub struct LinearSpeedup {
    normal_interval: Duration,
    min_interval: Duration,
    step: Duration,
    current: Duration,
}

impl LinearSpeedup {
    /// Default number of steps between the normal interval and zero.
    pub const DEFAULT_DIVISOR: u32 = 4;

    /// Creates a strategy that starts at `normal_interval` and never goes
    /// below `min_interval`.
    pub fn new(normal_interval: Duration, min_interval: Duration) -> Self {
        Self::with_divisor(normal_interval, min_interval, Self::DEFAULT_DIVISOR)
    }

    /// Creates a strategy whose step is `normal_interval / divisor`.
    pub fn with_divisor(normal_interval: Duration, min_interval: Duration, divisor: u32) -> Self {
        let min_interval = min_interval.min(normal_interval);
        Self {
            normal_interval,
            min_interval,
            step: normal_interval / divisor.max(1),
            current: normal_interval,
        }
    }

    /// The interval used after a success.
    pub fn normal_interval(&self) -> Duration {
        self.normal_interval
    }

    /// The smallest interval ever returned.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl DelayStrategy for LinearSpeedup {
    fn next_delay(&mut self, execution_succeeded: bool) -> Duration {
        self.current = if execution_succeeded {
            self.normal_interval
        } else {
            self.current
                .saturating_sub(self.step)
                .max(self.min_interval)
        };
        self.current
    }
}
