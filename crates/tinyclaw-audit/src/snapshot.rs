//! Point-in-time copies of an audit log.
//!
//! Verification never runs against a live log. Callers take a snapshot under
//! the log's lock, release it, and verify the copy while producers keep
//! appending.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tinyclaw_contracts::audit::AuditEntry;

use crate::chain::{verify_chain_with_head, ChainBreak};

/// A consistent copy of every entry appended so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSnapshot {
    /// All entries in chain order (sequence 0 first).
    pub entries: Vec<AuditEntry>,

    /// Digest of the last entry, or `GENESIS_HASH` for an empty log. The next
    /// appended entry will carry this as its `prev_hash`.
    pub head_hash: String,

    /// Wall-clock time (UTC) the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl AuditSnapshot {
    /// Verify every link and pin the last entry to `head_hash`.
    pub fn verify(&self) -> Result<(), ChainBreak> {
        verify_chain_with_head(&self.entries, &self.head_hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
