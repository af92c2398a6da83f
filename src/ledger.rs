//! Dedup ledger — durable, append-only set of already-published message ids.
//!
//! The ledger is the sole dedup authority: the bot never relies on the
//! mailbox's own read/unread flags. An id is recorded if and only if the
//! message's thread was fully published.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::LedgerError;

/// Durable record of message ids already published. The backing store is
/// swappable; routing and formatting never touch it directly.
pub trait Ledger: Send {
    fn contains(&self, id: &str) -> bool;

    /// Record `id` as published. Recording an already-present id is a no-op.
    /// The entry must be durable before this returns.
    fn record(&mut self, id: &str) -> Result<(), LedgerError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Flat-file ledger: one message id per line. The whole file is read at
/// open; `record` appends a line and fsyncs before returning.
pub struct FileLedger {
    file: File,
    ids: HashSet<String>,
}

impl FileLedger {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|source| LedgerError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let mut ids = HashSet::new();
        let reader = BufReader::new(file.try_clone().map_err(|source| LedgerError::Open {
            path: path.to_path_buf(),
            source,
        })?);
        for line in reader.lines() {
            let line = line.map_err(|source| LedgerError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            let id = line.trim();
            if !id.is_empty() {
                ids.insert(id.to_string());
            }
        }

        Ok(Self { file, ids })
    }
}

impl Ledger for FileLedger {
    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn record(&mut self, id: &str) -> Result<(), LedgerError> {
        if self.ids.contains(id) {
            return Ok(());
        }
        writeln!(self.file, "{id}").map_err(LedgerError::Append)?;
        self.file.flush().map_err(LedgerError::Flush)?;
        self.file.sync_data().map_err(LedgerError::Flush)?;
        self.ids.insert(id.to_string());
        Ok(())
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// In-memory ledger, shared across clones. Not durable — for tests and
/// dry runs only.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ledger for MemoryLedger {
    fn contains(&self, id: &str) -> bool {
        self.ids.lock().unwrap().contains(id)
    }

    fn record(&mut self, id: &str) -> Result<(), LedgerError> {
        self.ids.lock().unwrap().insert(id.to_string());
        Ok(())
    }

    fn len(&self) -> usize {
        self.ids.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FileLedger::open(&dir.path().join("processed.log")).unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.contains("msg-001"));
    }

    #[test]
    fn record_then_contains() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = FileLedger::open(&dir.path().join("processed.log")).unwrap();
        ledger.record("msg-001").unwrap();
        assert!(ledger.contains("msg-001"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn record_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.log");
        let mut ledger = FileLedger::open(&path).unwrap();
        ledger.record("msg-001").unwrap();
        ledger.record("msg-001").unwrap();
        assert_eq!(ledger.len(), 1);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.log");
        {
            let mut ledger = FileLedger::open(&path).unwrap();
            ledger.record("msg-001").unwrap();
            ledger.record("msg-002").unwrap();
        }
        let ledger = FileLedger::open(&path).unwrap();
        assert!(ledger.contains("msg-001"));
        assert!(ledger.contains("msg-002"));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn blank_lines_are_ignored_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.log");
        std::fs::write(&path, "msg-001\n\n  \nmsg-002\n").unwrap();
        let ledger = FileLedger::open(&path).unwrap();
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/processed.log");
        let mut ledger = FileLedger::open(&path).unwrap();
        ledger.record("msg-001").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn memory_ledger_shares_state_across_clones() {
        let mut ledger = MemoryLedger::new();
        let view = ledger.clone();
        ledger.record("msg-001").unwrap();
        assert!(view.contains("msg-001"));
    }
}
