use crate::error::RunnerError;
use crate::executor::RunOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub const LEDGER_FILE: &str = "harness.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub identity: String,
    pub command: String,
    pub outcome: String,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(identity: String, command: String, outcome: RunOutcome, elapsed_ms: u64) -> Self {
        Self {
            identity,
            command,
            outcome: outcome.label().to_string(),
            exit_code: outcome.exit_code(),
            elapsed_ms,
            finished_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub struct RunLedger {
    path: PathBuf,
    file: Mutex<fs::File>,
}

impl RunLedger {
    pub fn open(results_root: &Path) -> Result<Self, RunnerError> {
        let path = results_root.join(LEDGER_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RunnerError::io("open", &path, e))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &LedgerEntry) -> Result<(), RunnerError> {
        let mut line = serde_json::to_vec(entry).map_err(|source| RunnerError::Ledger {
            path: self.path.clone(),
            source,
        })?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&line)
            .and_then(|()| file.flush())
            .map_err(|e| RunnerError::io("append to", &self.path, e))
    }
}

pub fn read_ledger(results_root: &Path) -> Result<Vec<LedgerEntry>, RunnerError> {
    let path = results_root.join(LEDGER_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RunnerError::io("read", path, e)),
    };
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|source| RunnerError::Ledger {
                path: path.clone(),
                source,
            })
        })
        .collect()
}

/// Latest entry of every identity whose last execution did not succeed, in
/// first-run order. Preserve skips these directories on the next pass.
pub fn unfinished_runs(results_root: &Path) -> Result<Vec<LedgerEntry>, RunnerError> {
    let mut latest: Vec<LedgerEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for entry in read_ledger(results_root)? {
        match index.get(&entry.identity) {
            Some(&at) => latest[at] = entry,
            None => {
                index.insert(entry.identity.clone(), latest.len());
                latest.push(entry);
            }
        }
    }
    latest.retain(|entry| entry.outcome != RunOutcome::Succeeded.label());
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn appends_one_line_per_entry() {
        let tmp = TempDir::new().expect("tempdir");
        let ledger = RunLedger::open(tmp.path()).expect("open");
        ledger
            .append(&LedgerEntry::new(
                "a_changes_2_norestarts".to_string(),
                "a check-iterative".to_string(),
                RunOutcome::Succeeded,
                12,
            ))
            .expect("append");
        ledger
            .append(&LedgerEntry::new(
                "b_changes_2_norestarts".to_string(),
                "b check-iterative".to_string(),
                RunOutcome::Failed { code: Some(101) },
                40,
            ))
            .expect("append");

        let entries = read_ledger(tmp.path()).expect("read");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, "succeeded");
        assert_eq!(entries[0].exit_code, Some(0));
        assert_eq!(entries[1].identity, "b_changes_2_norestarts");
        assert_eq!(entries[1].exit_code, Some(101));

        let raw = fs::read_to_string(ledger.path()).expect("raw");
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn reopening_keeps_previous_entries() {
        let tmp = TempDir::new().expect("tempdir");
        for _ in 0..2 {
            let ledger = RunLedger::open(tmp.path()).expect("open");
            ledger
                .append(&LedgerEntry::new(
                    "x".to_string(),
                    "x".to_string(),
                    RunOutcome::TimedOut,
                    1,
                ))
                .expect("append");
        }
        let entries = read_ledger(tmp.path()).expect("read");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.exit_code.is_none()));
    }

    #[test]
    fn missing_ledger_reads_empty() {
        let tmp = TempDir::new().expect("tempdir");
        assert!(read_ledger(tmp.path()).expect("read").is_empty());
        assert!(unfinished_runs(tmp.path()).expect("status").is_empty());
    }

    #[test]
    fn unfinished_runs_keep_the_latest_outcome_per_identity() {
        let tmp = TempDir::new().expect("tempdir");
        let ledger = RunLedger::open(tmp.path()).expect("open");
        let runs = [
            ("a", RunOutcome::TimedOut),
            ("b", RunOutcome::Failed { code: Some(1) }),
            ("c", RunOutcome::Succeeded),
            ("a", RunOutcome::Succeeded),
            ("b", RunOutcome::Failed { code: Some(2) }),
            ("d", RunOutcome::TimedOut),
        ];
        for (identity, outcome) in runs {
            ledger
                .append(&LedgerEntry::new(
                    identity.to_string(),
                    identity.to_string(),
                    outcome,
                    1,
                ))
                .expect("append");
        }

        let unfinished = unfinished_runs(tmp.path()).expect("status");
        let summary: Vec<_> = unfinished
            .iter()
            .map(|e| (e.identity.as_str(), e.outcome.as_str(), e.exit_code))
            .collect();
        assert_eq!(
            summary,
            vec![("b", "failed", Some(2)), ("d", "timed_out", None)]
        );
    }
}
