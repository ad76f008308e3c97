//! Tool call audit log
//!
//! Appends one JSON line per tool call to
//! `<data_root>/<account>/log/<date>/log.jsonl`, the same files the
//! dashboard's log views read. Audit failures are logged and never fail the
//! tool call.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::{exchange_now, exchange_today, Settings};
use crate::error::Result;
use crate::paper_trading::Ledger;

/// Entry in the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub tool: String,
    pub args: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// `ok`, `rejected` (business rejection) or `error`
    pub status: String,
}

/// Appends tool call records for one account
#[derive(Clone)]
pub struct AuditLog {
    dir: Option<PathBuf>,
    /// Pinned trading date; `None` follows the exchange calendar
    pinned_date: Option<NaiveDate>,
    lock: Arc<Mutex<()>>,
}

impl AuditLog {
    /// Log for the configured account; disabled when no signature is set
    pub fn new(settings: &Settings) -> Self {
        let ledger = Ledger::new(settings.data_root.clone());
        let dir = settings
            .signature
            .as_deref()
            .and_then(|account| ledger.account_dir(account).ok())
            .map(|dir| dir.join("log"));
        Self {
            dir,
            pinned_date: settings.today_date,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Trading date entries are filed under, resolved at call time
    pub fn date(&self) -> NaiveDate {
        self.pinned_date.unwrap_or_else(exchange_today)
    }

    /// Path of today's log file, if logging is enabled
    pub fn path(&self) -> Option<PathBuf> {
        let date = self.date().format("%Y-%m-%d").to_string();
        self.dir.as_ref().map(|dir| dir.join(date).join("log.jsonl"))
    }

    pub async fn record(&self, tool: &str, args: &Value, result: &Result<Value>, duration_ms: u64) {
        let Some(path) = self.path() else {
            tracing::debug!(tool = tool, "No account configured, skipping audit entry");
            return;
        };
        let (result_value, error, status) = match result {
            Ok(v) if v.get("error").is_some() => (Some(v.clone()), None, "rejected"),
            Ok(v) => (Some(v.clone()), None, "ok"),
            Err(e) => (None, Some(e.to_string()), "error"),
        };
        let entry = AuditEntry {
            timestamp: exchange_now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            tool: tool.to_string(),
            args: args.clone(),
            result: result_value,
            error,
            duration_ms,
            status: status.to_string(),
        };

        let _guard = self.lock.lock().await;
        if let Err(e) = write_entry(&path, &entry) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write audit log entry");
        }
    }
}

fn write_entry(path: &Path, entry: &AuditEntry) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let json = serde_json::to_string(entry)?;
    writeln!(file, "{}", json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, signature: Option<&str>) -> Settings {
        Settings {
            data_root: dir.path().to_path_buf(),
            signature: signature.map(String::from),
            today_date: NaiveDate::from_ymd_opt(2025, 1, 2),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn records_each_call_under_the_trading_date() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(&settings(&dir, Some("acct")));
        let args = json!({ "action": "get_balance" });

        log.record("upbit/trade", &args, &Ok(json!({ "cash": 1.0 })), 3).await;
        log.record("upbit/trade", &args, &Ok(json!({ "error": "no" })), 1).await;
        log.record("upbit/price", &args, &Err(Error::InvalidArgument("x".into())), 0).await;

        let path = dir.path().join("acct/log/2025-01-02/log.jsonl");
        assert_eq!(log.path().unwrap(), path);
        let entries: Vec<AuditEntry> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let statuses: Vec<&str> = entries.iter().map(|e| e.status.as_str()).collect();
        assert_eq!(statuses, vec!["ok", "rejected", "error"]);
        assert_eq!(entries[0].duration_ms, 3);
        assert_eq!(entries[2].error.as_deref(), Some("Invalid argument: x"));
    }

    #[tokio::test]
    async fn disabled_without_account() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(&settings(&dir, None));
        assert!(log.path().is_none());
        log.record("upbit/trade", &json!({}), &Ok(json!({})), 0).await;
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn unpinned_log_follows_the_exchange_calendar() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            today_date: None,
            ..settings(&dir, Some("acct"))
        };
        let log = AuditLog::new(&settings);

        let before = exchange_today();
        let path = log.path().unwrap();
        let after = exchange_today();
        let filed = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .and_then(|n| NaiveDate::parse_from_str(n, "%Y-%m-%d").ok())
            .unwrap();
        assert!(filed == before || filed == after);
    }
}
