//! Offline local replica: a cached snapshot plus an ordered queue of
//! pending writes, replayed strictly in enqueue order once connectivity
//! returns.
//!
//! The replica is explicit state injected by the caller, never ambient
//! module state. After a replay the caller re-fetches server truth and
//! adopts it rather than trusting any intermediate state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::{apply_to_snapshot, SheetStore, WriteOp};
use crate::{derive_sheet, SheetError, SheetView, Snapshot};

/// One pending write with the wall time it was queued at.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QueuedWrite {
    pub op: WriteOp,
    pub queued_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplaySummary {
    /// Writes confirmed by the store, removed from the queue.
    pub applied: usize,
    /// Writes the store rejected, retained for a later retry.
    pub retained: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LocalReplica {
    snapshot: Option<Snapshot>,
    queue: Vec<QueuedWrite>,
}

impl LocalReplica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt fresh server truth, replacing the cached snapshot.
    pub fn adopt(&mut self, snapshot: Snapshot) {
        self.snapshot = Some(snapshot);
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Re-derive the sheet view from the cached snapshot through the same
    /// engine the server uses.
    pub fn derive(&self) -> Option<SheetView> {
        self.snapshot.as_ref().map(derive_sheet)
    }

    /// Apply a write to the cached snapshot and queue it for replay.
    pub fn apply_local(&mut self, op: WriteOp, queued_at: DateTime<Utc>) -> Result<(), SheetError> {
        if let Some(snapshot) = self.snapshot.as_mut() {
            apply_to_snapshot(snapshot, &op)?;
        }
        self.queue.push(QueuedWrite { op, queued_at });
        Ok(())
    }

    pub fn pending(&self) -> &[QueuedWrite] {
        &self.queue
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Replay pending writes strictly in enqueue order.
    ///
    /// A rejected write is retained (in order) so a later retry is not
    /// silently lost; confirmed writes are removed. The caller should
    /// re-fetch and [`adopt`](Self::adopt) server truth afterwards.
    pub fn replay(&mut self, store: &mut dyn SheetStore) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        let mut retained = Vec::new();
        for item in self.queue.drain(..) {
            match store.apply(&item.op) {
                Ok(()) => summary.applied += 1,
                Err(_) => {
                    summary.retained += 1;
                    retained.push(item);
                }
            }
        }
        self.queue = retained;
        summary
    }

    /// Drain the queue for an external (async) replay path that cannot go
    /// through [`SheetStore::apply`]; the caller puts rejected items back
    /// with [`retain_pending`](Self::retain_pending).
    pub fn drain_pending(&mut self) -> Vec<QueuedWrite> {
        self.queue.drain(..).collect()
    }

    /// Restore items an external replay could not deliver, keeping order.
    pub fn retain_pending(&mut self, retained: Vec<QueuedWrite>) {
        self.queue = retained;
    }

    /// SHA-256 over the canonical snapshot JSON; used to discard stale
    /// responses and to skip redundant adoption.
    pub fn fingerprint(&self) -> Option<String> {
        self.snapshot.as_ref().map(snapshot_fingerprint)
    }
}

/// Hex SHA-256 of a snapshot's canonical JSON encoding.
pub fn snapshot_fingerprint(snapshot: &Snapshot) -> String {
    let bytes = serde_json::to_vec(snapshot).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}
