//! Hash-chain primitives: canonical encoding, hashing, and verification.
//!
//! Every field of an entry contributes to its digest, in the order of the
//! persisted schema. The encoding is pinned byte-for-byte so independent
//! implementations hash identically:
//!
//!   1. sequence      — 4 bytes, big-endian
//!   2. timestamp     — 8 bytes, big-endian
//!   3. event_type    — 1 byte, the fixed wire discriminant
//!   4. event_detail  — string field
//!   5. agent_id      — string field
//!   6. session_key   — string field
//!   7. prev_hash     — string field
//!   8. request_id    — string field
//!
//! A string field is one presence byte (`0` absent, `1` present); a present
//! value follows as an 8-byte big-endian length and its UTF-8 bytes. An
//! empty string and an absent value therefore encode differently.

use sha2::{Digest, Sha256};
use thiserror::Error;

use tinyclaw_contracts::{audit::AuditEntry, error::TinyclawError};

/// Why verification stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakKind {
    /// `sequence` is not equal to the entry's position.
    SequenceGap,
    /// Entry 0 does not link to the genesis hash.
    GenesisMismatch,
    /// This entry no longer hashes to what its successor committed to.
    DigestMismatch,
    /// `timestamp` went backwards relative to the previous entry.
    TimestampRegression,
    /// The last entry does not hash to the expected head.
    HeadMismatch,
}

impl BreakKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakKind::SequenceGap => "sequence gap",
            BreakKind::GenesisMismatch => "genesis mismatch",
            BreakKind::DigestMismatch => "digest mismatch",
            BreakKind::TimestampRegression => "timestamp regression",
            BreakKind::HeadMismatch => "head mismatch",
        }
    }
}

impl std::fmt::Display for BreakKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The first point at which a chain fails verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("audit chain broken at index {index}: {kind}")]
pub struct ChainBreak {
    pub index: usize,
    pub kind: BreakKind,
}

impl From<ChainBreak> for TinyclawError {
    fn from(brk: ChainBreak) -> Self {
        TinyclawError::AuditChainBroken {
            index: brk.index,
            reason: brk.kind.to_string(),
        }
    }
}

/// Encode `entry` in the canonical byte layout described in the module docs.
pub fn canonical_bytes(entry: &AuditEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(160 + entry.event_detail.len());
    buf.extend_from_slice(&entry.sequence.to_be_bytes());
    buf.extend_from_slice(&entry.timestamp.to_be_bytes());
    buf.push(entry.event_type.code());
    put_str(&mut buf, Some(entry.event_detail.as_str()));
    put_str(&mut buf, entry.agent_id.as_deref());
    put_str(&mut buf, entry.session_key.as_deref());
    put_str(&mut buf, Some(entry.prev_hash.as_str()));
    put_str(&mut buf, entry.request_id.as_deref());
    buf
}

fn put_str(buf: &mut Vec<u8>, value: Option<&str>) {
    match value {
        None => buf.push(0),
        Some(s) => {
            buf.push(1);
            buf.extend_from_slice(&(s.len() as u64).to_be_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
    }
}

/// SHA-256 of the canonical encoding, as 64 lowercase hex characters.
///
/// This is the value the next entry stores as its `prev_hash`.
pub fn hash_entry(entry: &AuditEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(entry));
    hex::encode(hasher.finalize())
}

/// Verify a chain from genesis.
///
/// Checks, in order, for every entry: its `sequence` equals its position,
/// its `prev_hash` equals the digest of the previous entry (or
/// `GENESIS_HASH`), and its `timestamp` is not earlier than the previous one.
///
/// A link mismatch into entry `i > 0` is reported at `i - 1`: that is the
/// earliest entry whose content no longer matches the commitment made to it.
/// An empty chain is valid.
///
/// Tampering with the LAST entry's content leaves every link intact. Use
/// [`verify_chain_with_head`] with a known head digest to cover it.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), ChainBreak> {
    let mut expected_prev = AuditEntry::GENESIS_HASH.to_string();
    let mut last_timestamp = 0u64;

    for (index, entry) in entries.iter().enumerate() {
        if entry.sequence as usize != index {
            return Err(ChainBreak {
                index,
                kind: BreakKind::SequenceGap,
            });
        }

        if entry.prev_hash != expected_prev {
            return Err(match index {
                0 => ChainBreak {
                    index,
                    kind: BreakKind::GenesisMismatch,
                },
                _ => ChainBreak {
                    index: index - 1,
                    kind: BreakKind::DigestMismatch,
                },
            });
        }

        if index > 0 && entry.timestamp < last_timestamp {
            return Err(ChainBreak {
                index,
                kind: BreakKind::TimestampRegression,
            });
        }

        last_timestamp = entry.timestamp;
        expected_prev = hash_entry(entry);
    }

    Ok(())
}

/// Verify a chain and additionally pin its last entry to `head`.
///
/// `head` is the digest of the last entry (or `GENESIS_HASH` for an empty
/// chain), as returned by a log's `head_hash()`.
pub fn verify_chain_with_head(entries: &[AuditEntry], head: &str) -> Result<(), ChainBreak> {
    verify_chain(entries)?;

    let computed = entries
        .last()
        .map(hash_entry)
        .unwrap_or_else(|| AuditEntry::GENESIS_HASH.to_string());

    if computed != head {
        return Err(ChainBreak {
            index: entries.len().saturating_sub(1),
            kind: BreakKind::HeadMismatch,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tinyclaw_contracts::audit::{AuditEntry, AuditEventType};

    use super::*;

    fn entry(sequence: u32, timestamp: u64, prev_hash: &str) -> AuditEntry {
        AuditEntry {
            sequence,
            timestamp,
            event_type: AuditEventType::RouteResolved,
            event_detail: format!("event-{sequence}"),
            agent_id: Some("main".to_string()),
            session_key: None,
            prev_hash: prev_hash.to_string(),
            request_id: None,
        }
    }

    /// Digests computed by an independent implementation of the layout.
    #[test]
    fn canonical_hash_matches_reference_vectors() {
        let first = AuditEntry {
            sequence: 0,
            timestamp: 1_700_000_000_000,
            event_type: AuditEventType::RouteResolved,
            event_detail: r#"{"agent_id":"main"}"#.to_string(),
            agent_id: Some("main".to_string()),
            session_key: Some("agent:main:slack:default:main".to_string()),
            prev_hash: AuditEntry::GENESIS_HASH.to_string(),
            request_id: None,
        };
        let first_hash = hash_entry(&first);
        assert_eq!(
            first_hash,
            "96a8d2d3f0ddd509756f8c15b0f7ba0734810c17b33c193133d27e4022f085ec"
        );

        let second = AuditEntry {
            sequence: 1,
            timestamp: 1_700_000_000_005,
            event_type: AuditEventType::ToolDenied,
            event_detail: "denied".to_string(),
            agent_id: Some("main".to_string()),
            session_key: None,
            prev_hash: first_hash,
            request_id: Some("req-1".to_string()),
        };
        assert_eq!(
            hash_entry(&second),
            "65a20fa2090e9758445c5fd7b57aaf174b6a06c5b76fe35f14fa6190eded29e3"
        );
    }

    #[test]
    fn absent_and_empty_fields_hash_differently() {
        let mut a = entry(0, 1, AuditEntry::GENESIS_HASH);
        a.request_id = None;
        let mut b = a.clone();
        b.request_id = Some(String::new());
        assert_ne!(hash_entry(&a), hash_entry(&b));
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let mut a = entry(0, 1, AuditEntry::GENESIS_HASH);
        a.agent_id = Some("ab".to_string());
        a.session_key = Some("c".to_string());
        let mut b = a.clone();
        b.agent_id = Some("a".to_string());
        b.session_key = Some("bc".to_string());
        assert_ne!(hash_entry(&a), hash_entry(&b));
    }

    #[test]
    fn genesis_mismatch_reported_at_zero() {
        let bad = entry(0, 1, "ff");
        let brk = verify_chain(&[bad]).unwrap_err();
        assert_eq!(brk.index, 0);
        assert_eq!(brk.kind, BreakKind::GenesisMismatch);
    }

    #[test]
    fn sequence_gap_detected() {
        let e0 = entry(0, 1, AuditEntry::GENESIS_HASH);
        let e1 = entry(2, 2, &hash_entry(&e0));
        let brk = verify_chain(&[e0, e1]).unwrap_err();
        assert_eq!(brk, ChainBreak { index: 1, kind: BreakKind::SequenceGap });
    }

    #[test]
    fn timestamp_regression_detected() {
        let e0 = entry(0, 10, AuditEntry::GENESIS_HASH);
        let e1 = entry(1, 9, &hash_entry(&e0));
        let brk = verify_chain(&[e0, e1]).unwrap_err();
        assert_eq!(brk, ChainBreak { index: 1, kind: BreakKind::TimestampRegression });
    }

    #[test]
    fn equal_timestamps_are_allowed() {
        let e0 = entry(0, 10, AuditEntry::GENESIS_HASH);
        let e1 = entry(1, 10, &hash_entry(&e0));
        assert!(verify_chain(&[e0, e1]).is_ok());
    }

    #[test]
    fn head_pins_last_entry() {
        let e0 = entry(0, 1, AuditEntry::GENESIS_HASH);
        let head = hash_entry(&e0);
        let mut tampered = e0.clone();
        tampered.event_detail = "rewritten".to_string();

        assert!(verify_chain_with_head(&[e0], &head).is_ok());
        assert!(verify_chain(std::slice::from_ref(&tampered)).is_ok());
        let brk = verify_chain_with_head(&[tampered], &head).unwrap_err();
        assert_eq!(brk, ChainBreak { index: 0, kind: BreakKind::HeadMismatch });
    }

    #[test]
    fn empty_chain_head_is_genesis() {
        assert!(verify_chain_with_head(&[], AuditEntry::GENESIS_HASH).is_ok());
        assert!(verify_chain_with_head(&[], "abc").is_err());
    }

    #[test]
    fn chain_break_converts_to_error() {
        let err: TinyclawError = ChainBreak { index: 3, kind: BreakKind::DigestMismatch }.into();
        assert!(err.to_string().contains("index 3"));
        assert!(err.to_string().contains("digest mismatch"));
    }
}
