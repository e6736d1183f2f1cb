//! Durable, JSON-lines implementation of `AuditSink`.
//!
//! One entry per line, in the persisted schema. Each append is written and
//! `sync_data`'d before the in-memory head advances: a failed write leaves
//! the chain exactly as it was, so the next append reuses the sequence
//! number and no gap can appear.
//!
//! If a failed write cannot be rolled back (the file cannot be truncated to
//! its last good length), the log refuses every further append. A forensic
//! trail with a torn tail must be looked at by an operator, not extended.
//!
//! Nothing inside the file commits to its last entry. Operators who record
//! the head digest elsewhere can pin it with [`FileAuditLog::open_with_head`]
//! and [`verify_file`].

use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tracing::{debug, info, warn};

use tinyclaw_contracts::{
    audit::{AuditEntry, AuditRecord},
    error::{TinyclawError, TinyclawResult},
};
use tinyclaw_core::traits::{AuditSink, Clock};

use crate::{
    chain::{verify_chain, verify_chain_with_head},
    memory::{lock_poisoned, ChainState},
    snapshot::AuditSnapshot,
};

/// Read every entry from a JSON-lines audit file without verifying it.
///
/// Blank lines are skipped. A line that does not parse is reported as
/// `AuditChainBroken` at the index it would have occupied.
pub fn read_entries(path: &Path) -> TinyclawResult<Vec<AuditEntry>> {
    let file = File::open(path).map_err(|e| TinyclawError::ConfigError {
        reason: format!("failed to open audit file '{}': {}", path.display(), e),
    })?;

    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| TinyclawError::ConfigError {
            reason: format!("failed to read audit file '{}': {}", path.display(), e),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry =
            serde_json::from_str(&line).map_err(|e| TinyclawError::AuditChainBroken {
                index: entries.len(),
                reason: format!("unparseable entry: {}", e),
            })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Read and verify an audit file, returning its head digest.
///
/// With `expected_head`, the last entry must hash to it; without one,
/// rewriting the last entry goes unnoticed.
pub fn verify_file(path: &Path, expected_head: Option<&str>) -> TinyclawResult<String> {
    let entries = read_entries(path)?;
    match expected_head {
        Some(head) => verify_chain_with_head(&entries, head)?,
        None => verify_chain(&entries)?,
    }
    Ok(head_of(&entries))
}

fn head_of(entries: &[AuditEntry]) -> String {
    entries
        .last()
        .map(crate::chain::hash_entry)
        .unwrap_or_else(|| AuditEntry::GENESIS_HASH.to_string())
}

// ── Storage handle ────────────────────────────────────────────────────────────

/// The file operations an append needs. Implemented for `File`.
pub(crate) trait LogFile: Write + Send {
    fn sync_data(&mut self) -> io::Result<()>;
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync_data(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

fn persist(file: &mut dyn LogFile, line: &[u8]) -> io::Result<()> {
    file.write_all(line)?;
    file.flush()?;
    file.sync_data()
}

/// Terminate a final line that lost its newline in a crash, so the next
/// append starts on a line of its own. Returns the repaired length.
fn terminate_last_line(file: &mut File, len: u64) -> io::Result<u64> {
    if len == 0 {
        return Ok(0);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(len);
    }
    file.write_all(b"\n")?;
    file.sync_data()?;
    Ok(len + 1)
}

struct FileState {
    chain: ChainState,
    file: Box<dyn LogFile>,
    /// File length after the last fully persisted entry.
    committed_len: u64,
    /// Set when a failed write could not be rolled back.
    poisoned: Option<String>,
}

/// An append-only audit log persisted to a JSON-lines file.
pub struct FileAuditLog {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    state: Mutex<FileState>,
}

impl FileAuditLog {
    /// Open `path`, creating it if it does not exist.
    ///
    /// An existing file is replayed and verified. A broken chain fails with
    /// `AuditChainBroken` and the log is not opened. A complete final entry
    /// missing only its newline is terminated before the first append.
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> TinyclawResult<Self> {
        Self::open_inner(path.as_ref(), clock, None)
    }

    /// Like [`open`](Self::open), but also require the last entry to hash to
    /// `head`, a digest recorded outside the file.
    pub fn open_with_head(
        path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
        head: &str,
    ) -> TinyclawResult<Self> {
        Self::open_inner(path.as_ref(), clock, Some(head))
    }

    fn open_inner(path: &Path, clock: Arc<dyn Clock>, head: Option<&str>) -> TinyclawResult<Self> {
        let path = path.to_path_buf();
        let write_failed = |what: &str, e: io::Error| TinyclawError::AuditWriteFailed {
            reason: format!("failed to {} audit file '{}': {}", what, path.display(), e),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| write_failed("open", e))?;
        let len = file.metadata().map_err(|e| write_failed("stat", e))?.len();

        let entries = read_entries(&path)?;
        if let Some(head) = head {
            verify_chain_with_head(&entries, head)?;
        }
        let chain = ChainState::from_entries(entries)?;

        let committed_len = terminate_last_line(&mut file, len)
            .map_err(|e| write_failed("repair the last line of", e))?;
        if committed_len != len {
            warn!(path = %path.display(), "audit file ended without a newline; terminated last entry");
        }

        info!(
            path = %path.display(),
            entries = chain.entries.len(),
            head = %chain.last_hash,
            "audit log opened"
        );

        Ok(Self::with_file(path, clock, chain, Box::new(file), committed_len))
    }

    pub(crate) fn with_file(
        path: PathBuf,
        clock: Arc<dyn Clock>,
        chain: ChainState,
        file: Box<dyn LogFile>,
        committed_len: u64,
    ) -> Self {
        Self {
            path,
            clock,
            state: Mutex::new(FileState {
                chain,
                file,
                committed_len,
                poisoned: None,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy every entry appended so far along with the current head.
    pub fn snapshot(&self) -> TinyclawResult<AuditSnapshot> {
        let state = self.state.lock().map_err(lock_poisoned)?;
        Ok(state.chain.snapshot())
    }

    /// Snapshot the log and verify the copy.
    pub fn verify_integrity(&self) -> TinyclawResult<()> {
        self.snapshot()?.verify()?;
        Ok(())
    }
}

impl AuditSink for FileAuditLog {
    fn append(&self, record: AuditRecord) -> TinyclawResult<AuditEntry> {
        let mut state = self.state.lock().map_err(lock_poisoned)?;

        if let Some(reason) = &state.poisoned {
            return Err(TinyclawError::AuditWriteFailed {
                reason: format!("audit log is unusable after an earlier failure: {}", reason),
            });
        }

        let entry = state.chain.next_entry(record, self.clock.now_millis())?;
        let mut line = serde_json::to_vec(&entry).map_err(|e| TinyclawError::AuditWriteFailed {
            reason: format!("failed to encode audit entry: {}", e),
        })?;
        line.push(b'\n');

        if let Err(e) = persist(state.file.as_mut(), &line) {
            let committed_len = state.committed_len;
            if let Err(truncate_err) = state.file.set_len(committed_len) {
                warn!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "could not roll back partial audit write; refusing further appends"
                );
                state.poisoned = Some(truncate_err.to_string());
            }
            return Err(TinyclawError::AuditWriteFailed {
                reason: format!("failed to persist audit entry {}: {}", entry.sequence, e),
            });
        }

        state.committed_len += line.len() as u64;
        state.chain.commit(entry.clone());

        debug!(
            sequence = entry.sequence,
            event_type = %entry.event_type,
            "audit entry persisted"
        );

        Ok(entry)
    }
}
