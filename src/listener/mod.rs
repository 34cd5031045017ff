//! Message intake
//!
//! Validates raw messages with the backend's listener policy, drops ones that
//! are already known and queues the rest.

use crate::backend::{EmitterFilter, Listener};
use crate::error::RelayerResult;
use crate::metrics;
use crate::queue::{QueueLocation, RelayQueue};
use crate::store::{StoreKey, StorePayload};
use crate::vaa::SignedVaa;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    Rejected(String),
    Duplicate(QueueLocation),
    Enqueued { key: StoreKey },
}

pub struct Intake {
    listener: Arc<dyn Listener>,
    queue: Arc<RelayQueue>,
    filters: Vec<EmitterFilter>,
}

impl Intake {
    pub fn new(listener: Arc<dyn Listener>, queue: Arc<RelayQueue>) -> Self {
        let filters = listener.emitter_filters();
        Self {
            listener,
            queue,
            filters,
        }
    }

    pub fn queue(&self) -> &Arc<RelayQueue> {
        &self.queue
    }

    fn emitter_allowed(&self, vaa: &SignedVaa) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        let emitter = vaa.emitter_address_hex();
        self.filters
            .iter()
            .any(|f| f.chain_id == vaa.emitter_chain && f.emitter_address == emitter)
    }

    /// Validate, dedup and queue one raw message
    pub async fn process(&self, raw: &[u8]) -> RelayerResult<IntakeOutcome> {
        let parsed = match self.listener.validate(raw) {
            Ok(parsed) => parsed,
            Err(reason) => {
                debug!("Rejected message: {}", reason);
                return Ok(IntakeOutcome::Rejected(reason));
            }
        };
        let vaa = parsed.vaa;
        if !self.emitter_allowed(&vaa) {
            let reason = format!(
                "emitter {}/{} not subscribed",
                vaa.emitter_chain,
                vaa.emitter_address_hex()
            );
            debug!("Rejected message: {}", reason);
            return Ok(IntakeOutcome::Rejected(reason));
        }

        let key = StoreKey::from_vaa(&vaa);
        let key_json = key.to_json()?;
        match self.queue.check_queue(&key_json).await {
            Ok(Some(location)) => {
                metrics::record_intake_duplicate();
                debug!("Dropping duplicate {} found in {:?}", key, location);
                return Ok(IntakeOutcome::Duplicate(location));
            }
            Ok(None) => {}
            Err(e) => warn!("Dedup check for {} failed, queueing anyway: {}", key, e),
        }

        let payload = StorePayload::new(vaa.to_hex(), Utc::now());
        if !self.queue.enqueue(&key, &payload).await? {
            metrics::record_intake_duplicate();
            return Ok(IntakeOutcome::Duplicate(QueueLocation::Backlog));
        }

        metrics::record_vaa_received();
        info!("Queued {}: {}", key, parsed.summary);
        Ok(IntakeOutcome::Enqueued { key })
    }

    /// Retry flushing the backlog until the process exits
    pub async fn run_backlog_drain(self: Arc<Self>, interval: Duration) -> RelayerResult<()> {
        loop {
            tokio::time::sleep(interval).await;
            if self.queue.backlog_len().await == 0 {
                continue;
            }
            match self.queue.flush_backlog().await {
                Ok(flushed) => info!("Flushed {} backlog entries", flushed),
                Err(e) => warn!("Backlog flush failed: {}", e),
            }
        }
    }
}
