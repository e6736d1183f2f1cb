//! In-memory implementation of `AuditSink`.
//!
//! `InMemoryAuditLog` keeps all entries in a `Vec` behind a single `Mutex`.
//! That mutex is the global ordering point: `sequence`, `timestamp` and
//! `prev_hash` are all assigned inside it, so concurrent producers queue at
//! the append boundary instead of racing.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::debug;

use tinyclaw_contracts::{
    audit::{AuditEntry, AuditRecord},
    error::{TinyclawError, TinyclawResult},
};
use tinyclaw_core::{
    traits::{AuditSink, Clock},
    SystemClock,
};

use crate::{
    chain::{hash_entry, verify_chain, ChainBreak},
    snapshot::AuditSnapshot,
};

// ── Chain state shared by every backend ───────────────────────────────────────

/// The mutable interior of an audit log.
///
/// Building an entry and committing it are separate steps so a durable
/// backend can persist between them and leave the state untouched when the
/// write fails.
#[derive(Debug)]
pub(crate) struct ChainState {
    /// All entries committed so far, in append order.
    pub(crate) entries: Vec<AuditEntry>,

    /// Digest of the last committed entry, or `GENESIS_HASH`.
    pub(crate) last_hash: String,

    /// Timestamp of the last committed entry.
    pub(crate) last_timestamp: u64,
}

impl ChainState {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            last_hash: AuditEntry::GENESIS_HASH.to_string(),
            last_timestamp: 0,
        }
    }

    /// Rebuild state from a previously persisted chain, verifying it first.
    pub(crate) fn from_entries(entries: Vec<AuditEntry>) -> Result<Self, ChainBreak> {
        verify_chain(&entries)?;
        let last_hash = entries
            .last()
            .map(hash_entry)
            .unwrap_or_else(|| AuditEntry::GENESIS_HASH.to_string());
        let last_timestamp = entries.last().map(|e| e.timestamp).unwrap_or(0);
        Ok(Self {
            entries,
            last_hash,
            last_timestamp,
        })
    }

    /// Build the entry that would be appended next. Does not modify state.
    ///
    /// The timestamp is clamped to the previous one so the chain stays
    /// non-decreasing even if the clock regresses.
    pub(crate) fn next_entry(&self, record: AuditRecord, now: u64) -> TinyclawResult<AuditEntry> {
        let sequence =
            u32::try_from(self.entries.len()).map_err(|_| TinyclawError::AuditWriteFailed {
                reason: "audit sequence space exhausted".to_string(),
            })?;

        Ok(AuditEntry {
            sequence,
            timestamp: now.max(self.last_timestamp),
            event_type: record.event_type,
            event_detail: record.detail,
            agent_id: record.agent_id,
            session_key: record.session_key,
            prev_hash: self.last_hash.clone(),
            request_id: record.request_id,
        })
    }

    /// Make `entry` part of the chain and advance the head.
    pub(crate) fn commit(&mut self, entry: AuditEntry) {
        self.last_hash = hash_entry(&entry);
        self.last_timestamp = entry.timestamp;
        self.entries.push(entry);
    }

    pub(crate) fn snapshot(&self) -> AuditSnapshot {
        AuditSnapshot {
            entries: self.entries.clone(),
            head_hash: self.last_hash.clone(),
            taken_at: Utc::now(),
        }
    }
}

pub(crate) fn lock_poisoned<E: std::fmt::Display>(e: E) -> TinyclawError {
    TinyclawError::AuditWriteFailed {
        reason: format!("audit state lock poisoned: {}", e),
    }
}

// ── Public log ────────────────────────────────────────────────────────────────

/// An in-memory, append-only audit log backed by a SHA-256 hash chain.
///
/// # Thread safety
///
/// `append()` acquires the internal `Mutex` for the whole build-and-commit
/// step. Share the log as `Arc<InMemoryAuditLog>` (or `Arc<dyn AuditSink>`).
pub struct InMemoryAuditLog {
    clock: Arc<dyn Clock>,
    pub(crate) state: Mutex<ChainState>,
}

impl InMemoryAuditLog {
    /// Create an empty log stamped by `clock`.
    ///
    /// Pass the same clock to the authorizer so grant expiry and audit
    /// timestamps agree.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(ChainState::new()),
        }
    }

    /// Copy every entry appended so far along with the current head.
    pub fn snapshot(&self) -> TinyclawResult<AuditSnapshot> {
        let state = self.state.lock().map_err(lock_poisoned)?;
        Ok(state.snapshot())
    }

    /// Snapshot the log and verify the copy.
    ///
    /// Safe to call while other threads append. A broken chain comes back as
    /// `TinyclawError::AuditChainBroken` carrying the first broken index.
    pub fn verify_integrity(&self) -> TinyclawResult<()> {
        self.snapshot()?.verify()?;
        Ok(())
    }

    /// Digest the next entry will link to.
    pub fn head_hash(&self) -> TinyclawResult<String> {
        let state = self.state.lock().map_err(lock_poisoned)?;
        Ok(state.last_hash.clone())
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.entries.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }
}

// ── AuditSink impl ────────────────────────────────────────────────────────────

impl AuditSink for InMemoryAuditLog {
    /// Append one record to the hash chain.
    ///
    /// Returns `Err(AuditWriteFailed)` only if the internal mutex is poisoned
    /// or the sequence space is exhausted.
    fn append(&self, record: AuditRecord) -> TinyclawResult<AuditEntry> {
        let mut state = self.state.lock().map_err(lock_poisoned)?;

        let entry = state.next_entry(record, self.clock.now_millis())?;
        state.commit(entry.clone());

        debug!(
            sequence = entry.sequence,
            event_type = %entry.event_type,
            "audit entry appended"
        );

        Ok(entry)
    }
}
