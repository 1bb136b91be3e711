//! Batched, paced, retrying classification engine.
//!
//! One engine serves both the address-type oracle and the denylist service;
//! the endpoint is injected through [`ClassificationEndpoint`] and all
//! batching, pacing, retry and abort behavior comes from a
//! [`ClassificationPolicy`].
//!
//! Batches run strictly one after another. Inside a batch every address gets
//! its own task; tasks return their result and only the driving task writes
//! the result map.

use crate::config::{ClassificationPolicy, ExhaustionPolicy};
use crate::schemas::StageStatus;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Retryable failure of a single endpoint call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Successful answer from an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    /// Definite negative (e.g. not-found); resolves the item without retry
    Absent,
}

/// One external classification capability
#[async_trait]
pub trait ClassificationEndpoint: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn submit(&self, address: &str) -> Result<Lookup<Self::Output>, EndpointError>;
}

/// Result of one engine run
#[derive(Debug)]
pub struct ClassificationOutcome<T> {
    /// Resolved addresses; unresolved ones are simply missing
    pub results: HashMap<String, Lookup<T>>,
    pub status: StageStatus,
    /// Addresses that exhausted their retries (at most one decides an abort)
    pub exhausted: Vec<String>,
    /// Total endpoint calls made, including retries
    pub calls: usize,
}

impl<T> ClassificationOutcome<T> {
    fn empty() -> Self {
        Self {
            results: HashMap::new(),
            status: StageStatus::Completed,
            exhausted: Vec::new(),
            calls: 0,
        }
    }
}

/// Per-task result handed back to the driving task
struct ItemReport<T> {
    address: String,
    result: Option<Lookup<T>>,
    attempts: u32,
}

pub struct BatchClassifier {
    policy: ClassificationPolicy,
}

impl BatchClassifier {
    pub fn new(policy: ClassificationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ClassificationPolicy {
        &self.policy
    }

    /// Classify `addresses` against `endpoint`.
    pub async fn run<E>(
        &self,
        endpoint: Arc<E>,
        addresses: &[String],
    ) -> ClassificationOutcome<E::Output>
    where
        E: ClassificationEndpoint,
    {
        let mut outcome = ClassificationOutcome::empty();
        if addresses.is_empty() {
            return outcome;
        }

        let batch_size = self.policy.batch_size.max(1);
        let total_batches = addresses.len().div_ceil(batch_size);

        info!(
            "[{}] Classifying {} addresses in {} batches of up to {}",
            endpoint.name(),
            addresses.len(),
            total_batches,
            batch_size
        );

        for (batch_idx, batch) in addresses.chunks(batch_size).enumerate() {
            debug!(
                "[{}] Batch {}/{} ({} addresses)",
                endpoint.name(),
                batch_idx + 1,
                total_batches,
                batch.len()
            );

            let mut tasks = JoinSet::new();
            let mut task_addresses = HashMap::with_capacity(batch.len());
            for address in batch {
                let endpoint = Arc::clone(&endpoint);
                let policy = self.policy.clone();
                let task_address = address.clone();
                let handle = tasks.spawn(async move {
                    classify_one(endpoint.as_ref(), &policy, task_address).await
                });
                task_addresses.insert(handle.id(), address.clone());
            }

            // Drain the whole batch even once an item has failed for good.
            let mut batch_failures = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(report) => {
                        outcome.calls += report.attempts as usize;
                        match report.result {
                            Some(lookup) => {
                                outcome.results.insert(report.address, lookup);
                            }
                            None => batch_failures.push(report.address),
                        }
                    }
                    Err(e) => {
                        // A crashed task counts as an exhausted address
                        match task_addresses.remove(&e.id()) {
                            Some(address) => {
                                warn!(
                                    "[{}] Classification task for {} failed: {}",
                                    endpoint.name(),
                                    address,
                                    e
                                );
                                batch_failures.push(address);
                            }
                            None => warn!(
                                "[{}] Classification task {} failed: {}",
                                endpoint.name(),
                                e.id(),
                                e
                            ),
                        }
                    }
                }
            }

            if !batch_failures.is_empty() {
                batch_failures.sort();
                match self.policy.on_exhaustion {
                    ExhaustionPolicy::Abort => {
                        let failed_address = batch_failures[0].clone();
                        outcome.exhausted.extend(batch_failures);
                        warn!(
                            "[{}] Aborted after batch {}/{}: {} failed after {} attempts. Continuing with {} addresses already classified",
                            endpoint.name(),
                            batch_idx + 1,
                            total_batches,
                            failed_address,
                            self.policy.max_retries,
                            outcome.results.len()
                        );
                        outcome.status = StageStatus::Aborted { failed_address };
                        return outcome;
                    }
                    ExhaustionPolicy::Skip => {
                        warn!(
                            "[{}] {} addresses left unresolved in batch {}/{}",
                            endpoint.name(),
                            batch_failures.len(),
                            batch_idx + 1,
                            total_batches
                        );
                        outcome.exhausted.extend(batch_failures);
                    }
                }
            }

            if batch_idx + 1 < total_batches && !self.policy.inter_batch_delay().is_zero() {
                tokio::time::sleep(self.policy.inter_batch_delay()).await;
            }
        }

        info!(
            "[{}] Complete: {}/{} addresses resolved ({} calls)",
            endpoint.name(),
            outcome.results.len(),
            addresses.len(),
            outcome.calls
        );

        outcome
    }
}

/// Attempt one address until it resolves or its retries run out.
async fn classify_one<E>(
    endpoint: &E,
    policy: &ClassificationPolicy,
    address: String,
) -> ItemReport<E::Output>
where
    E: ClassificationEndpoint,
{
    let max_attempts = policy.max_retries.max(1);

    for attempt in 1..=max_attempts {
        let result = match tokio::time::timeout(policy.call_timeout(), endpoint.submit(&address))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(EndpointError::Timeout(policy.call_timeout())),
        };

        match result {
            Ok(lookup) => {
                return ItemReport {
                    address,
                    result: Some(lookup),
                    attempts: attempt,
                };
            }
            Err(e) => {
                warn!(
                    "[{}] {} (attempt {}/{}): {}",
                    endpoint.name(),
                    address,
                    attempt,
                    max_attempts,
                    e
                );
                if attempt < max_attempts {
                    tokio::time::sleep(policy.backoff_for(attempt)).await;
                }
            }
        }
    }

    ItemReport {
        address,
        result: None,
        attempts: max_attempts,
    }
}
