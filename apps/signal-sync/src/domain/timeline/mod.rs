//! Signal Timeline
//!
//! Ordering and deduplication rules for the synchronized record set, and the
//! state object observed by consumers.
//!
//! # Merge Contract
//!
//! - Every record from both inputs is kept, except that a known id appears
//!   only once: the first occurrence wins, with existing records ahead of
//!   incoming ones.
//! - Records with the sentinel id skip id dedup. Only an exact copy of a
//!   sentinel record already kept is dropped, which makes redelivery harmless.
//! - The result is stable-sorted ascending by timestamp.
//!
//! Together these make `merge(&merge(s, i), i) == merge(s, i)`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::signal::{Signal, SignalFingerprint};

/// Merge incoming records into an existing timeline.
#[must_use]
pub fn merge(existing: &[Signal], incoming: impl IntoIterator<Item = Signal>) -> Vec<Signal> {
    let incoming = incoming.into_iter();
    let mut merged = Vec::with_capacity(existing.len() + incoming.size_hint().0);
    let mut seen_ids = HashSet::new();
    let mut seen_sentinels: HashSet<SignalFingerprint> = HashSet::new();

    for signal in existing.iter().cloned().chain(incoming) {
        let keep = match signal.id.known() {
            Some(id) => seen_ids.insert(id),
            None => seen_sentinels.insert(signal.fingerprint()),
        };
        if keep {
            merged.push(signal);
        }
    }

    // sort_by_key is stable, ties keep arrival order
    merged.sort_by_key(|s| s.timestamp);
    merged
}

// =============================================================================
// Synchronized State
// =============================================================================

/// Externally observable result of a subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncState {
    /// Records ascending by timestamp, unique by known id.
    pub records: Vec<Signal>,
    /// True until a snapshot or bootstrap has been applied.
    pub loading: bool,
    /// True while a live stream session is open.
    pub connected: bool,
    /// When the last heartbeat acknowledgement arrived.
    pub last_pong_at: Option<DateTime<Utc>>,
    /// Consecutive reconnect attempts since the last successful open.
    pub reconnect_attempt: u32,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            loading: true,
            connected: false,
            last_pong_at: None,
            reconnect_attempt: 0,
        }
    }
}

impl SyncState {
    /// Replace the record set with an authoritative batch and clear `loading`.
    pub fn replace(&mut self, records: impl IntoIterator<Item = Signal>) {
        self.records = merge(&[], records);
        self.loading = false;
    }

    /// Merge one incoming record. Returns whether it was kept.
    ///
    /// A record that sorts at or after the newest one held is appended in
    /// place; anything else goes through a full [`merge`].
    pub fn apply(&mut self, record: Signal) -> bool {
        if self.contains(&record) {
            return false;
        }
        if self.latest().is_none_or(|tail| tail.timestamp <= record.timestamp) {
            self.records.push(record);
        } else {
            self.extend(std::iter::once(record));
        }
        true
    }

    /// Check whether `record` would be dropped as a duplicate.
    fn contains(&self, record: &Signal) -> bool {
        match record.id.known() {
            Some(_) => self.records.iter().any(|held| held.id == record.id),
            None => {
                let fingerprint = record.fingerprint();
                self.records
                    .iter()
                    .any(|held| held.id.is_unknown() && held.fingerprint() == fingerprint)
            }
        }
    }

    /// Merge several incoming records.
    pub fn extend(&mut self, records: impl IntoIterator<Item = Signal>) {
        self.records = merge(&self.records, records);
    }

    /// Copy the connection fields of `other`, leaving the records untouched.
    pub fn sync_status_from(&mut self, other: &Self) {
        self.loading = other.loading;
        self.connected = other.connected;
        self.last_pong_at = other.last_pong_at;
        self.reconnect_attempt = other.reconnect_attempt;
    }

    /// Most recent record, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&Signal> {
        self.records.last()
    }

    /// Oldest record, if any.
    #[must_use]
    pub fn oldest(&self) -> Option<&Signal> {
        self.records.first()
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
