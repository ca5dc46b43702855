//! Cross-domain handoff of lookup results to the presentation side.
//!
//! The pipeline and its consumer are not tick-synchronized, so results
//! cross over as messages. The channel is a single slot (tokio `watch`): a
//! new result overwrites one the consumer has not read yet, mirroring the
//! result register. Every result carries a sequence number so the consumer
//! can tell how many it missed.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::debug;

use crate::coordinator::LookupResult;
use crate::error::{Result, SnoopError};

/// A result as it crosses the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Sequence number, starting at 1
    pub seq: u64,
    /// Pipeline tick on which the result landed
    pub tick: u64,
    /// The result itself
    pub result: LookupResult,
}

/// Producer half, owned by the pipeline.
pub struct ResultPublisher {
    tx: watch::Sender<Option<Delivery>>,
    seq: AtomicU64,
}

impl ResultPublisher {
    /// Overwrite the slot with a new result. Never blocks; succeeds even
    /// if no consumer is listening.
    pub fn publish(&self, tick: u64, result: LookupResult) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.tx.send_replace(Some(Delivery { seq, tick, result }));
        debug!(seq, tick, matched = result.match_found, "result published");
        seq
    }

    /// Number of results published so far.
    pub fn published(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    /// True while at least one subscriber is alive.
    pub fn has_subscribers(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    /// Another consumer over the same slot.
    pub fn subscribe(&self) -> ResultSubscriber {
        ResultSubscriber {
            rx: self.tx.subscribe(),
            last_seq: 0,
        }
    }
}

/// What the consumer sees when it reads the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Latest delivery
    pub delivery: Delivery,
    /// Results overwritten before this consumer read them
    pub missed: u64,
}

/// Consumer half, owned by the presentation side.
pub struct ResultSubscriber {
    rx: watch::Receiver<Option<Delivery>>,
    last_seq: u64,
}

impl ResultSubscriber {
    /// Wait for a result newer than the last one seen.
    /// Fails once the publisher is dropped and nothing new is pending.
    pub async fn next(&mut self) -> Result<Received> {
        loop {
            if let Some(received) = self.poll() {
                return Ok(received);
            }
            self.rx
                .changed()
                .await
                .map_err(|_| SnoopError::HandoffClosed)?;
        }
    }

    /// Read the slot without waiting.
    pub fn poll(&mut self) -> Option<Received> {
        let current = *self.rx.borrow_and_update();
        let delivery = current.filter(|d| d.seq > self.last_seq)?;
        let missed = delivery.seq - self.last_seq - 1;
        self.last_seq = delivery.seq;
        Some(Received { delivery, missed })
    }
}

/// Create a connected publisher/subscriber pair.
pub fn channel() -> (ResultPublisher, ResultSubscriber) {
    let (tx, rx) = watch::channel(None);
    (
        ResultPublisher {
            tx,
            seq: AtomicU64::new(0),
        },
        ResultSubscriber { rx, last_seq: 0 },
    )
}
