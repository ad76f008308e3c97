//! Append-only position ledger
//!
//! Each account owns one newline-delimited JSON file. Records are only ever
//! appended; the current state is the record with the greatest `id`.
//!
//! Writes go through a [`LedgerWriter`], which holds the account's writer
//! lock for its whole lifetime. Writer locks are process-wide and keyed by
//! ledger path, so separate [`Ledger`] handles on the same data root exclude
//! each other. Readers never take the lock and tolerate a half-written final
//! line by skipping it.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::snapshot::{Action, AvgCosts, Positions, Snapshot, SnapshotDraft, CASH};
use crate::config::exchange_now;

const POSITION_DIR: &str = "position";
const POSITION_FILE: &str = "position.jsonl";

type WriterLocks = StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

static WRITER_LOCKS: OnceLock<WriterLocks> = OnceLock::new();

fn writer_locks() -> &'static WriterLocks {
    WRITER_LOCKS.get_or_init(|| StdMutex::new(HashMap::new()))
}

/// Writer lock shared by every handle that resolves to the same ledger file
fn writer_lock(path: &Path) -> Arc<Mutex<()>> {
    let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut locks = writer_locks()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    locks
        .entry(key)
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid account signature {0:?}")]
    InvalidAccount(String),

    #[error("Ledger I/O failed on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode ledger record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fields of the latest snapshot of an account
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentState {
    pub positions: Positions,
    pub avg_costs: AvgCosts,
    pub realized_pnl: f64,
    /// `None` when the account has no readable records
    pub last_id: Option<u64>,
}

impl CurrentState {
    pub fn cash(&self) -> f64 {
        self.positions.get(CASH).copied().unwrap_or(0.0)
    }
}

/// File-backed ledger store rooted at the agent data directory
#[derive(Clone)]
pub struct Ledger {
    root: PathBuf,
}

impl Ledger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything recorded for an account
    pub fn account_dir(&self, account: &str) -> Result<PathBuf, LedgerError> {
        validate_account(account)?;
        Ok(self.root.join(account))
    }

    /// Path of the account's position ledger
    pub fn path(&self, account: &str) -> Result<PathBuf, LedgerError> {
        Ok(self.account_dir(account)?.join(POSITION_DIR).join(POSITION_FILE))
    }

    pub fn exists(&self, account: &str) -> bool {
        self.path(account).map(|p| p.exists()).unwrap_or(false)
    }

    /// Account signatures with a directory under the data root, sorted
    pub fn accounts(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut accounts: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        accounts.sort();
        accounts
    }

    /// All readable records in file order
    pub fn read_all(&self, account: &str) -> Vec<Snapshot> {
        match self.path(account) {
            Ok(path) => read_records(&path),
            Err(_) => Vec::new(),
        }
    }

    /// Latest readable record (greatest `id`, first seen on ties)
    pub fn latest(&self, account: &str) -> Option<Snapshot> {
        latest_of(self.read_all(account))
    }

    /// Current state of the account; defaults when nothing is readable
    pub fn read_current(&self, account: &str) -> CurrentState {
        match self.latest(account) {
            Some(snap) => CurrentState {
                positions: snap.positions,
                avg_costs: snap.avg_costs,
                realized_pnl: snap.realized_pnl,
                last_id: Some(snap.id),
            },
            None => CurrentState::default(),
        }
    }

    /// Acquire the account's writer lock
    ///
    /// Only one writer per ledger file exists in this process at a time, across
    /// all `Ledger` handles; a second caller waits until the first writer is
    /// dropped.
    pub async fn writer(&self, account: &str) -> Result<LedgerWriter, LedgerError> {
        let path = self.path(account)?;
        let guard = writer_lock(&path).lock_owned().await;
        Ok(LedgerWriter {
            ledger: self.clone(),
            account: account.to_string(),
            path,
            _guard: guard,
        })
    }
}

/// Exclusive write handle for one account's ledger
pub struct LedgerWriter {
    ledger: Ledger,
    account: String,
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl LedgerWriter {
    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn read_current(&self) -> CurrentState {
        self.ledger.read_current(&self.account)
    }

    /// Append one record with `id = last_id + 1` and the current timestamp
    ///
    /// The record is written with a single `write_all` and synced before
    /// returning. An I/O failure means the record was not committed.
    pub fn append(&self, draft: SnapshotDraft) -> Result<Snapshot, LedgerError> {
        let id = self.read_current().last_id.map(|id| id + 1).unwrap_or(0);
        let snapshot = Snapshot {
            date: draft.date,
            timestamp: exchange_now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            id,
            this_action: draft.this_action,
            positions: draft.positions,
            avg_costs: draft.avg_costs,
            realized_pnl: draft.realized_pnl,
        };
        let line = serde_json::to_string(&snapshot)?;
        append_line(&self.path, &line).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(account = %self.account, id = id, action = snapshot.this_action.name(), "Appended ledger record");
        Ok(snapshot)
    }

    /// Seed the ledger with an `init` record unless the file already exists
    pub fn bootstrap_if_missing(
        &self,
        date: NaiveDate,
        start_cash: f64,
    ) -> Result<Option<Snapshot>, LedgerError> {
        if self.path.exists() {
            return Ok(None);
        }
        let mut positions = Positions::new();
        positions.insert(CASH.to_string(), start_cash);
        let snapshot = self.append(SnapshotDraft {
            date: date.format("%Y-%m-%d").to_string(),
            this_action: Action::init(),
            positions,
            avg_costs: AvgCosts::new(),
            realized_pnl: 0.0,
        })?;
        tracing::info!(account = %self.account, start_cash = start_cash, "Bootstrapped paper ledger");
        Ok(Some(snapshot))
    }
}

fn validate_account(account: &str) -> Result<(), LedgerError> {
    let bad = account.trim().is_empty()
        || account == "."
        || account == ".."
        || account.contains(['/', '\\', '\0']);
    if bad {
        Err(LedgerError::InvalidAccount(account.to_string()))
    } else {
        Ok(())
    }
}

fn latest_of(records: Vec<Snapshot>) -> Option<Snapshot> {
    let mut latest: Option<Snapshot> = None;
    for record in records {
        if latest.as_ref().map_or(true, |l| record.id > l.id) {
            latest = Some(record);
        }
    }
    latest
}

/// Read every decodable JSON line of a file, skipping malformed ones
///
/// A missing or unreadable file yields no records.
pub(crate) fn read_records<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable JSONL file");
            }
            return Vec::new();
        }
    };
    let mut records = Vec::new();
    for (lineno, raw) in bytes.split(|b| *b == b'\n').enumerate() {
        let Ok(line) = std::str::from_utf8(raw) else {
            tracing::debug!(path = %path.display(), line = lineno + 1, "Skipping non-UTF-8 line");
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::debug!(path = %path.display(), line = lineno + 1, error = %e, "Skipping malformed line");
            }
        }
    }
    records
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;

    let mut buf = String::with_capacity(line.len() + 2);
    if ends_mid_line(&mut file)? {
        // Torn tail from an interrupted write; start on a fresh line.
        buf.push('\n');
    }
    buf.push_str(line);
    buf.push('\n');

    file.write_all(buf.as_bytes())?;
    file.sync_data()
}

fn ends_mid_line(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
