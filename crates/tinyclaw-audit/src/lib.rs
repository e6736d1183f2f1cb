//! # tinyclaw-audit
//!
//! Append-only, SHA-256 hash-chained audit trail for the TinyClaw decision
//! core.
//!
//! ## Overview
//!
//! Every routing and authorization decision is appended as an `AuditEntry`
//! whose `prev_hash` is the digest of the entry before it. Rewriting any
//! entry, even by a single byte, breaks the link to its successor and is
//! reported by `verify_chain` at that entry's index.
//!
//! Two backends implement `AuditSink`:
//! - [`InMemoryAuditLog`] for tests and ephemeral gateways
//! - [`FileAuditLog`] for a durable JSON-lines trail
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tinyclaw_audit::InMemoryAuditLog;
//! use tinyclaw_core::traits::AuditSink;
//!
//! let log = InMemoryAuditLog::default();
//! log.append(AuditRecord::new(AuditEventType::RouteResolved, "..."))?;
//! log.verify_integrity()?;
//! ```

pub mod chain;
pub mod file;
pub mod memory;
pub mod snapshot;

pub use chain::{canonical_bytes, hash_entry, verify_chain, verify_chain_with_head, BreakKind, ChainBreak};
pub use file::{read_entries, verify_file, FileAuditLog};
pub use memory::InMemoryAuditLog;
pub use snapshot::AuditSnapshot;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        fs::{File, OpenOptions},
        io::{self, Write},
        path::Path,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
    };

    use tinyclaw_contracts::{
        audit::{AuditEntry, AuditEventType, AuditRecord},
        error::TinyclawError,
    };
    use tinyclaw_core::{traits::AuditSink, ManualClock};

    use super::{
        file::LogFile, hash_entry, memory::ChainState, read_entries, verify_chain, verify_file,
        BreakKind, FileAuditLog, InMemoryAuditLog,
    };

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn record(detail: &str) -> AuditRecord {
        AuditRecord::new(AuditEventType::RouteResolved, detail)
            .with_agent("main")
            .with_request("req-1")
    }

    fn log_with(details: &[&str]) -> InMemoryAuditLog {
        let log = InMemoryAuditLog::new(Arc::new(ManualClock::new(1_000)));
        for d in details {
            log.append(record(d)).unwrap();
        }
        log
    }

    // ── Tests ─────────────────────────────────────────────────────────────────

    /// Recomputing the chain from genesis reproduces every stored prev_hash.
    #[test]
    fn test_hash_chain_integrity() {
        let log = log_with(&["first", "second", "third"]);
        let snap = log.snapshot().unwrap();

        let mut expected = AuditEntry::GENESIS_HASH.to_string();
        for entry in &snap.entries {
            assert_eq!(entry.prev_hash, expected);
            expected = hash_entry(entry);
        }
        assert_eq!(snap.head_hash, expected);
        assert!(log.verify_integrity().is_ok());
    }

    /// Rewriting an entry's detail is reported at that entry, not later.
    #[test]
    fn test_tamper_detection_reports_tampered_index() {
        for target in 0..4 {
            let log = log_with(&["a", "b", "c", "d", "e"]);
            {
                let mut state = log.state.lock().unwrap();
                state.entries[target].event_detail = "TAMPERED".to_string();
            }

            let snap = log.snapshot().unwrap();
            let brk = verify_chain(&snap.entries).unwrap_err();
            assert_eq!(brk.index, target, "break must be reported at the tampered entry");
            assert_eq!(brk.kind, BreakKind::DigestMismatch);
        }
    }

    /// The last entry has no successor; the head hash covers it.
    #[test]
    fn test_tampering_last_entry_caught_by_head() {
        let log = log_with(&["a", "b", "c"]);
        {
            let mut state = log.state.lock().unwrap();
            state.entries[2].event_detail = "TAMPERED".to_string();
        }

        match log.verify_integrity() {
            Err(TinyclawError::AuditChainBroken { index, reason }) => {
                assert_eq!(index, 2);
                assert!(reason.contains("head"), "unexpected reason: {reason}");
            }
            other => panic!("expected AuditChainBroken, got {:?}", other),
        }
    }

    /// The first entry's prev_hash must equal the genesis sentinel.
    #[test]
    fn test_genesis_hash() {
        let log = log_with(&["first"]);
        let snap = log.snapshot().unwrap();
        assert_eq!(snap.entries.len(), 1);
        assert_eq!(snap.entries[0].prev_hash, AuditEntry::GENESIS_HASH);
    }

    /// Sequence numbers must be 0, 1, 2, … with no gaps or skips.
    #[test]
    fn test_sequence_monotonic() {
        let log = log_with(&["a", "b", "c"]);
        let snap = log.snapshot().unwrap();
        for (idx, entry) in snap.entries.iter().enumerate() {
            assert_eq!(entry.sequence as usize, idx);
        }
    }

    /// Concurrent producers get a gap-free, duplicate-free, valid chain.
    #[test]
    fn test_concurrent_appends_are_totally_ordered() {
        let log = Arc::new(InMemoryAuditLog::default());
        let threads = 8;
        let per_thread = 50;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..per_thread {
                        log.append(
                            AuditRecord::new(AuditEventType::ToolAuthorized, format!("t{t}-{i}")),
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = log.snapshot().unwrap();
        assert_eq!(snap.len(), threads * per_thread);
        let sequences: HashSet<u32> = snap.entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences.len(), threads * per_thread);
        assert_eq!(sequences.iter().max().copied(), Some((threads * per_thread - 1) as u32));
        assert!(snap.verify().is_ok());
    }

    /// Verification of a snapshot is unaffected by later appends.
    #[test]
    fn test_snapshot_is_stable_while_log_grows() {
        let log = log_with(&["a", "b"]);
        let snap = log.snapshot().unwrap();
        log.append(record("c")).unwrap();

        assert_eq!(snap.len(), 2);
        assert!(snap.verify().is_ok());
        assert_eq!(log.len(), 3);
    }

    /// A clock that steps backwards never produces a decreasing timestamp.
    #[test]
    fn test_timestamps_clamped_when_clock_regresses() {
        let clock = Arc::new(ManualClock::new(5_000));
        let log = InMemoryAuditLog::new(clock.clone());
        log.append(record("a")).unwrap();
        clock.set(4_000);
        let second = log.append(record("b")).unwrap();

        assert_eq!(second.timestamp, 5_000);
        assert!(log.verify_integrity().is_ok());
    }

    /// An empty chain is trivially valid.
    #[test]
    fn test_verify_empty() {
        let log = InMemoryAuditLog::default();
        assert!(log.is_empty());
        assert!(log.verify_integrity().is_ok());
        assert!(verify_chain(&[]).is_ok());
        assert_eq!(log.head_hash().unwrap(), AuditEntry::GENESIS_HASH);
    }

    // ── File backend ──────────────────────────────────────────────────────────

    #[test]
    fn test_file_log_persists_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let clock = Arc::new(ManualClock::new(10));

        {
            let log = FileAuditLog::open(&path, clock.clone()).unwrap();
            log.append(record("one")).unwrap();
            log.append(record("two")).unwrap();
        }

        let log = FileAuditLog::open(&path, clock).unwrap();
        let third = log.append(record("three")).unwrap();
        assert_eq!(third.sequence, 2);

        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].prev_hash, hash_entry(&entries[1]));
        assert!(verify_chain(&entries).is_ok());
        assert!(log.verify_integrity().is_ok());
    }

    #[test]
    fn test_file_log_refuses_tampered_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = FileAuditLog::open(&path, Arc::new(ManualClock::new(10))).unwrap();
            log.append(record("original-0")).unwrap();
            log.append(record("original-1")).unwrap();
            log.append(record("original-2")).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, contents.replace("original-0", "rewritten-0")).unwrap();

        match FileAuditLog::open(&path, Arc::new(ManualClock::new(10))) {
            Err(TinyclawError::AuditChainBroken { index, .. }) => assert_eq!(index, 0),
            Err(other) => panic!("expected AuditChainBroken, got {:?}", other),
            Ok(_) => panic!("tampered audit file must not open"),
        }
    }

    #[test]
    fn test_read_entries_reports_garbage_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        std::fs::write(&path, "not json\n").unwrap();

        match read_entries(&path) {
            Err(TinyclawError::AuditChainBroken { index, .. }) => assert_eq!(index, 0),
            other => panic!("expected AuditChainBroken, got {:?}", other),
        }
    }

    /// A crash can lose just the final newline. The entry is complete, so the
    /// log opens, and the next append must start on its own line.
    #[test]
    fn test_file_log_terminates_unfinished_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let clock = Arc::new(ManualClock::new(10));
        {
            let log = FileAuditLog::open(&path, clock.clone()).unwrap();
            log.append(record("one")).unwrap();
            log.append(record("two")).unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, contents.trim_end_matches('\n')).unwrap();

        {
            let log = FileAuditLog::open(&path, clock.clone()).unwrap();
            assert_eq!(log.append(record("three")).unwrap().sequence, 2);
        }

        let log = FileAuditLog::open(&path, clock).unwrap();
        assert_eq!(log.snapshot().unwrap().len(), 3);
        assert!(log.verify_integrity().is_ok());
        assert!(std::fs::read_to_string(&path).unwrap().ends_with('\n'));
    }

    // ── Failed writes ─────────────────────────────────────────────────────────

    /// A file whose writes can be made to tear halfway, and whose truncation
    /// can be made to fail.
    struct FlakyFile {
        inner: File,
        fail_writes: Arc<AtomicBool>,
        fail_truncate: bool,
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes.load(Ordering::SeqCst) {
                self.inner.write_all(&buf[..buf.len() / 2])?;
                return Err(io::Error::new(io::ErrorKind::Other, "device full"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl LogFile for FlakyFile {
        fn sync_data(&mut self) -> io::Result<()> {
            self.inner.sync_data()
        }

        fn set_len(&mut self, len: u64) -> io::Result<()> {
            if self.fail_truncate {
                return Err(io::Error::new(io::ErrorKind::Other, "read-only filesystem"));
            }
            self.inner.set_len(len)
        }
    }

    fn flaky_log(path: &Path, fail_truncate: bool) -> (FileAuditLog, Arc<AtomicBool>) {
        let fail_writes = Arc::new(AtomicBool::new(false));
        let inner = OpenOptions::new().create(true).append(true).open(path).unwrap();
        let file = FlakyFile {
            inner,
            fail_writes: fail_writes.clone(),
            fail_truncate,
        };
        let log = FileAuditLog::with_file(
            path.to_path_buf(),
            Arc::new(ManualClock::new(10)),
            ChainState::new(),
            Box::new(file),
            0,
        );
        (log, fail_writes)
    }

    #[test]
    fn test_failed_append_rolls_back_and_reuses_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let (log, fail_writes) = flaky_log(&path, false);

        log.append(record("kept")).unwrap();

        fail_writes.store(true, Ordering::SeqCst);
        match log.append(record("torn")) {
            Err(TinyclawError::AuditWriteFailed { reason }) => assert!(reason.contains("device full")),
            other => panic!("expected AuditWriteFailed, got {:?}", other),
        }
        fail_writes.store(false, Ordering::SeqCst);

        assert_eq!(log.append(record("after")).unwrap().sequence, 1);

        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].event_detail, "after");
        assert!(verify_chain(&entries).is_ok());
        assert!(FileAuditLog::open(&path, Arc::new(ManualClock::new(20))).is_ok());
    }

    /// When the torn tail cannot be cut off, nothing more may be appended.
    #[test]
    fn test_failed_rollback_poisons_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let (log, fail_writes) = flaky_log(&path, true);

        log.append(record("kept")).unwrap();
        fail_writes.store(true, Ordering::SeqCst);
        assert!(log.append(record("torn")).is_err());
        fail_writes.store(false, Ordering::SeqCst);

        match log.append(record("refused")) {
            Err(TinyclawError::AuditWriteFailed { reason }) => {
                assert!(reason.contains("unusable"), "unexpected reason: {reason}");
            }
            other => panic!("expected AuditWriteFailed, got {:?}", other),
        }
        assert_eq!(log.snapshot().unwrap().len(), 1);

        match FileAuditLog::open(&path, Arc::new(ManualClock::new(20))) {
            Err(TinyclawError::AuditChainBroken { index, .. }) => assert_eq!(index, 1),
            Err(other) => panic!("expected AuditChainBroken, got {:?}", other),
            Ok(_) => panic!("a torn audit file must not open"),
        }
    }

    // ── Head checkpoint ───────────────────────────────────────────────────────

    #[test]
    fn test_recorded_head_catches_rewritten_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let head = {
            let log = FileAuditLog::open(&path, Arc::new(ManualClock::new(10))).unwrap();
            log.append(record("original-0")).unwrap();
            log.append(record("original-1")).unwrap();
            log.append(record("original-2")).unwrap();
            log.snapshot().unwrap().head_hash
        };
        assert_eq!(verify_file(&path, Some(head.as_str())).unwrap(), head);

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, contents.replace("original-2", "rewritten-2")).unwrap();

        // Links alone cannot see it.
        assert!(verify_file(&path, None).is_ok());

        match verify_file(&path, Some(head.as_str())) {
            Err(TinyclawError::AuditChainBroken { index, reason }) => {
                assert_eq!(index, 2);
                assert!(reason.contains("head"), "unexpected reason: {reason}");
            }
            other => panic!("expected AuditChainBroken, got {:?}", other),
        }
        assert!(FileAuditLog::open_with_head(&path, Arc::new(ManualClock::new(20)), &head).is_err());
    }
}
