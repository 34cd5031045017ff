//! Relay workers
//!
//! One worker runs per (destination chain, signing key). A worker sweeps
//! `INCOMING` for records that belong to its destination and whose backoff has
//! elapsed, claims each into `WORKING`, relays it and records the outcome.
//! Workers share no state besides the store.

pub mod auditor;
pub mod supervisor;

pub use auditor::Auditor;
pub use supervisor::spawn_supervised;

use crate::backend::{Backend, RelayResult, Relayer};
use crate::chain::SigningKey;
use crate::config::Settings;
use crate::error::RelayerResult;
use crate::metrics;
use crate::queue::{ClaimOutcome, RelayQueue, Resolution, RetryPolicy};
use crate::store::{Status, Table};
use crate::vaa::SignedVaa;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument};

/// Identity of one worker/auditor pair. Built once at startup.
#[derive(Debug, Clone)]
pub struct WorkerDescriptor {
    pub index: usize,
    pub target_chain_id: u16,
    pub target_chain_name: String,
    pub signing_key: SigningKey,
}

impl WorkerDescriptor {
    pub fn label(&self) -> String {
        format!("{}-{}", self.target_chain_name, self.index)
    }
}

/// One descriptor per signing key per destination chain
pub fn build_descriptors(settings: &Settings, backend: &Backend) -> Vec<WorkerDescriptor> {
    let mut descriptors = Vec::new();
    for chain_id in backend.destination_chains(settings) {
        let Some(chain) = settings.get_chain_by_id(chain_id) else {
            warn!("Destination chain {} has no [chains] entry, no workers", chain_id);
            continue;
        };
        let keys = chain.signing_keys();
        if keys.is_empty() {
            warn!("Chain {} has no signing keys, no workers", chain.name);
        }
        for (index, secret) in keys.into_iter().enumerate() {
            descriptors.push(WorkerDescriptor {
                index,
                target_chain_id: chain_id,
                target_chain_name: chain.name.clone(),
                signing_key: SigningKey::new(chain_id, index, secret),
            });
        }
    }
    descriptors
}

/// Whether a queued record is meant for `chain_id`.
///
/// Policies without destination routing accept everything. A record whose
/// destination cannot be determined is skipped.
pub(crate) fn is_for_destination(relayer: &dyn Relayer, vaa_hex: &str, chain_id: u16) -> bool {
    if !relayer.routes_by_destination() {
        return true;
    }
    match SignedVaa::from_hex(vaa_hex).and_then(|vaa| relayer.target_chain_id(&vaa)) {
        Ok(target) => target == chain_id,
        Err(e) => {
            debug!("Skipping unroutable record: {}", e);
            false
        }
    }
}

/// Tally of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub claimed: usize,
    pub completed: usize,
    pub requeued: usize,
    pub failed: usize,
}

pub struct RelayWorker {
    descriptor: WorkerDescriptor,
    queue: Arc<RelayQueue>,
    relayer: Arc<dyn Relayer>,
    policy: RetryPolicy,
    idle: Duration,
}

impl RelayWorker {
    pub fn new(
        descriptor: WorkerDescriptor,
        queue: Arc<RelayQueue>,
        relayer: Arc<dyn Relayer>,
        policy: RetryPolicy,
        idle: Duration,
    ) -> Self {
        Self {
            descriptor,
            queue,
            relayer,
            policy,
            idle,
        }
    }

    /// Keys in `INCOMING` this worker may claim at `now`
    pub async fn find_workable(&self, now: DateTime<Utc>) -> RelayerResult<Vec<String>> {
        let mut workable = Vec::new();
        for (key, payload) in self.queue.scan(Table::Incoming).await? {
            if !self.policy.is_ready(&payload, now) {
                continue;
            }
            if !is_for_destination(
                self.relayer.as_ref(),
                &payload.vaa_bytes,
                self.descriptor.target_chain_id,
            ) {
                continue;
            }
            workable.push(key);
        }
        Ok(workable)
    }

    /// Claim, relay and resolve one key. `Ok(None)` when the claim was lost.
    pub async fn process(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> RelayerResult<Option<(RelayResult, Resolution)>> {
        let chain = self.descriptor.target_chain_name.as_str();
        let payload = match self.queue.claim(key, now).await? {
            ClaimOutcome::Claimed(payload) => payload,
            ClaimOutcome::Vanished => {
                debug!("Lost claim race for {}", key);
                return Ok(None);
            }
            ClaimOutcome::AlreadyWorking => {
                metrics::record_already_executed(chain);
                return Ok(None);
            }
        };

        let started = Instant::now();
        let attempt = self
            .relayer
            .relay(&payload.vaa_bytes, false, &self.descriptor.signing_key);
        let result = match tokio::time::timeout(self.policy.attempt_timeout, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => RelayResult::error(e.to_string()),
            Err(_) => RelayResult::error(format!(
                "relay timed out after {:?}",
                self.policy.attempt_timeout
            )),
        };

        let resolution = self
            .queue
            .resolve(key, payload, &result, self.policy.max_retries, Utc::now())
            .await?;

        match resolution {
            Resolution::Terminal(Status::Completed) => {
                metrics::record_success(chain, started.elapsed().as_secs_f64());
                info!("Relayed {}: {}", key, result.result);
            }
            Resolution::Terminal(status) => {
                metrics::record_failure(chain);
                error!("Relay of {} failed permanently ({:?}): {}", key, status, result.result);
            }
            Resolution::Requeued { retries } => {
                metrics::record_failure(chain);
                warn!(
                    "Relay of {} failed (attempt {}), retry in {:?}: {}",
                    key,
                    retries,
                    self.policy.wait_for(retries),
                    result.result
                );
            }
            Resolution::Abandoned => {
                warn!("Result for {} discarded, claim was reclaimed: {}", key, result.result);
            }
        }
        Ok(Some((result, resolution)))
    }

    /// One discovery pass over `INCOMING`. Per-record failures are logged and skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> RelayerResult<SweepReport> {
        let mut report = SweepReport::default();
        for key in self.find_workable(now).await? {
            match self.process(&key, Utc::now()).await {
                Ok(Some((_, resolution))) => {
                    report.claimed += 1;
                    match resolution {
                        Resolution::Terminal(Status::Completed) => report.completed += 1,
                        Resolution::Terminal(_) => report.failed += 1,
                        Resolution::Requeued { .. } => report.requeued += 1,
                        Resolution::Abandoned => {}
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Processing {} failed: {}", key, e),
            }
        }
        Ok(report)
    }

    /// Sweep forever, sleeping between passes
    pub async fn run(self) -> RelayerResult<()> {
        let span = tracing::info_span!("relay-worker", worker = %self.descriptor.label());
        self.run_loop().instrument(span).await
    }

    async fn run_loop(&self) -> RelayerResult<()> {
        info!(
            "Worker started for chain {} with key {}",
            self.descriptor.target_chain_id, self.descriptor.index
        );
        loop {
            match self.sweep(Utc::now()).await {
                Ok(report) if report.claimed > 0 => debug!("Sweep: {:?}", report),
                Ok(_) => {}
                Err(e) => warn!("Sweep failed: {}", e),
            }
            tokio::time::sleep(self.idle).await;
        }
    }
}
