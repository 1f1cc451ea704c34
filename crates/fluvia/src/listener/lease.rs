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

//! Lease renewal for in-flight items.
//!
//! A renewer is not a background task of its own. [`LeaseRenewer::renew_while`]
//! polls the renewal schedule and the dispatch future side by side in the
//! dispatch task, so renewals stop the moment the dispatch returns and can
//! never race the delete or release that follows it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::DispatchConfig;
use crate::delay::{DelayStrategy, LinearSpeedup};
use crate::error::StoreError;
use crate::models::WorkItem;
use crate::store::QueueStore;
use crate::telemetry;

/// Keeps one item's lease alive while it is being dispatched.
pub struct LeaseRenewer {
    store: Arc<dyn QueueStore>,
    lease_duration: Duration,
    min_renewal_interval: Duration,
    speedup: LinearSpeedup,
    renewals: u32,
}

impl LeaseRenewer {
    /// Upper bound on a single renewal request.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(store: Arc<dyn QueueStore>, config: &DispatchConfig) -> Self {
        let lease_duration = config.lease_duration();
        let min_renewal_interval = config.min_renewal_interval();
        Self {
            store,
            lease_duration,
            min_renewal_interval,
            speedup: LinearSpeedup::new(lease_duration / 2, min_renewal_interval),
            renewals: 0,
        }
    }

    /// Delay before the first renewal: half the lease.
    pub fn first_delay(&self) -> Duration {
        self.lease_duration / 2
    }

    /// Delay before the next renewal given the strategy's suggestion and the
    /// time left on the lease.
    fn bounded_delay(&self, suggested: Duration, remaining: Duration) -> Duration {
        suggested.min(remaining / 2).max(self.min_renewal_interval)
    }

    /// Runs `work` to completion while renewing `item`'s lease.
    pub async fn renew_while<F>(mut self, item: &WorkItem, work: F) -> F::Output
    where
        F: Future,
    {
        tokio::pin!(work);
        let mut item = item.clone();
        let mut delay = self.first_delay();
        loop {
            // The dispatch keeps running while a renewal request is pending.
            let renewal = tokio::select! {
                biased;
                output = &mut work => return output,
                result = async {
                    tokio::time::sleep(delay).await;
                    self.renew_once(&mut item).await
                } => result,
            };

            match renewal {
                Ok(()) => {
                    let suggested = self.speedup.next_delay(true);
                    delay = self.bounded_delay(suggested, item.lease_remaining());
                }
                Err(e) if e.is_item_gone() => {
                    telemetry::log_lease_renewal_failed(
                        self.store.name(),
                        &item.id,
                        &e.to_string(),
                        false,
                    );
                    // Renewals are over for this item but the dispatch still runs.
                    return work.await;
                }
                Err(e) => {
                    telemetry::log_lease_renewal_failed(
                        self.store.name(),
                        &item.id,
                        &e.to_string(),
                        true,
                    );
                    let suggested = self.speedup.next_delay(false);
                    delay = self.bounded_delay(suggested, item.lease_remaining());
                }
            }
        }
    }

    async fn renew_once(&mut self, item: &mut WorkItem) -> Result<(), StoreError> {
        let renewal = self.store.renew_lease(item, self.lease_duration);
        let expires_at = match tokio::time::timeout(Self::REQUEST_TIMEOUT, renewal).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StoreError::Transient {
                    message: format!("lease renewal timed out after {:?}", Self::REQUEST_TIMEOUT),
                })
            }
        };
        item.lease_expires_at = expires_at;
        self.renewals += 1;
        debug!(
            queue = %self.store.name(),
            item_id = %item.id,
            renewals = self.renewals,
            expires_at = %expires_at,
            "Lease renewed"
        );
        Ok(())
    }
}
