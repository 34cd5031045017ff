//! Reconciliation of finished work in `WORKING`

use super::{is_for_destination, WorkerDescriptor};
use crate::backend::Relayer;
use crate::error::RelayerResult;
use crate::metrics;
use crate::queue::RelayQueue;
use crate::store::{Status, StorePayload, Table};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Auditor timings
#[derive(Debug, Clone, Copy)]
pub struct AuditTimings {
    pub interval: Duration,
    /// Records younger than this are left alone
    pub min_age: Duration,
    /// Pending/Error records older than this are reclaimed
    pub stuck_age: Duration,
    pub store_retry: Duration,
}

/// Tally of one audit pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AuditReport {
    pub confirmed: usize,
    pub rolled_back: usize,
    pub purged: usize,
    pub reclaimed: usize,
    pub stuck: usize,
}

pub struct Auditor {
    descriptor: WorkerDescriptor,
    queue: Arc<RelayQueue>,
    relayer: Arc<dyn Relayer>,
    timings: AuditTimings,
}

fn older_than(payload: &StorePayload, age: Duration, now: DateTime<Utc>) -> bool {
    match (now - payload.timestamp).to_std() {
        Ok(elapsed) => elapsed >= age,
        Err(_) => false,
    }
}

impl Auditor {
    pub fn new(
        descriptor: WorkerDescriptor,
        queue: Arc<RelayQueue>,
        relayer: Arc<dyn Relayer>,
        timings: AuditTimings,
    ) -> Self {
        Self {
            descriptor,
            queue,
            relayer,
            timings,
        }
    }

    /// Walk this auditor's records in `WORKING` once
    pub async fn audit_pass(&self, now: DateTime<Utc>) -> RelayerResult<AuditReport> {
        let chain = self.descriptor.target_chain_name.as_str();
        let mut report = AuditReport::default();

        for (key, payload) in self.queue.scan(Table::Working).await? {
            if !is_for_destination(
                self.relayer.as_ref(),
                &payload.vaa_bytes,
                self.descriptor.target_chain_id,
            ) {
                continue;
            }
            if !older_than(&payload, self.timings.min_age, now) {
                continue;
            }

            match payload.status {
                Status::FatalError => {
                    if self.queue.retire(&key).await? {
                        info!("Purged failed record {}", key);
                        report.purged += 1;
                    }
                }
                Status::Completed => {
                    let check = match self
                        .relayer
                        .relay(&payload.vaa_bytes, true, &self.descriptor.signing_key)
                        .await
                    {
                        Ok(check) => check,
                        Err(e) => {
                            warn!("Finality check for {} failed, will retry: {}", key, e);
                            continue;
                        }
                    };
                    if !self.queue.retire(&key).await? {
                        debug!("{} already handled by another auditor", key);
                        continue;
                    }
                    if check.status == Status::Completed {
                        metrics::record_confirmed(chain);
                        report.confirmed += 1;
                        info!("Confirmed {}", key);
                    } else {
                        self.queue.requeue(&key, &payload.reset(now)).await?;
                        metrics::record_rollback(chain);
                        report.rolled_back += 1;
                        warn!("{} no longer finalized, requeued: {}", key, check.result);
                    }
                }
                Status::Pending | Status::Error => {
                    if !older_than(&payload, self.timings.stuck_age, now) {
                        warn!("Claim {} stuck in {:?} since {}", key, payload.status, payload.timestamp);
                        report.stuck += 1;
                        continue;
                    }
                    if !self.queue.retire(&key).await? {
                        continue;
                    }
                    let mut reclaimed = payload;
                    reclaimed.status = Status::Error;
                    self.queue.requeue(&key, &reclaimed).await?;
                    metrics::record_stuck_reclaimed(chain);
                    report.reclaimed += 1;
                    warn!(
                        "Reclaimed abandoned claim {} after {} attempts",
                        key, reclaimed.retries
                    );
                }
            }
        }
        Ok(report)
    }

    pub async fn run(self) -> RelayerResult<()> {
        let span = tracing::info_span!("audit-worker", worker = %self.descriptor.label());
        self.run_loop().instrument(span).await
    }

    async fn run_loop(&self) -> RelayerResult<()> {
        info!("Auditor started for chain {}", self.descriptor.target_chain_id);
        loop {
            if let Err(e) = self.queue.ping().await {
                error!("Store unavailable, retrying in {:?}: {}", self.timings.store_retry, e);
                tokio::time::sleep(self.timings.store_retry).await;
                continue;
            }
            match self.audit_pass(Utc::now()).await {
                Ok(report) if report != AuditReport::default() => debug!("Audit: {:?}", report),
                Ok(_) => {}
                Err(e) => warn!("Audit pass failed: {}", e),
            }
            tokio::time::sleep(self.timings.interval).await;
        }
    }
}
