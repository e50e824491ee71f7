// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transaction log port and its implementations.
//!
//! The coordinator writes a `prepare` record (the commit decision) before it
//! sends any commit request or prepare-stage reply, a `remove` record when a
//! logged transaction completes, and a `hazard` record when participants
//! disagree after the commit decision.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use xatm_proto::{LogStats, XaCode, Xid};

/// Transaction log failures.
#[derive(Debug, Error)]
pub enum LogError {
    /// File I/O failed.
    #[error("log io error: {0}")]
    Io(#[from] std::io::Error),
    /// A record could not be (de)serialized.
    #[error("log record error at line {line}: {source}")]
    Record {
        /// 1-based line number (0 while writing).
        line: usize,
        /// Underlying error.
        source: serde_json::Error,
    },
}

/// Durable record of commit decisions.
pub trait TransactionLog {
    /// Records the commit decision for `trid`.
    fn prepare(&mut self, trid: &Xid) -> Result<(), LogError>;
    /// Records that `trid` completed.
    fn remove(&mut self, trid: &Xid) -> Result<(), LogError>;
    /// Records that `trid` ended with inconsistent participant outcomes.
    fn hazard(&mut self, trid: &Xid, code: XaCode) -> Result<(), LogError>;
    /// Write counters.
    fn stats(&self) -> LogStats;
}

/// One log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    /// Commit decision.
    Prepare {
        /// Transaction.
        trid: Xid,
        /// Unix time in milliseconds.
        at: u64,
    },
    /// Completion.
    Remove {
        /// Transaction.
        trid: Xid,
        /// Unix time in milliseconds.
        at: u64,
    },
    /// Inconsistent outcome.
    Hazard {
        /// Transaction.
        trid: Xid,
        /// Code reported to the owner.
        code: XaCode,
        /// Unix time in milliseconds.
        at: u64,
    },
}

/// A logged decision that never completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDecision {
    /// Transaction.
    pub trid: Xid,
    /// Set when the transaction was flagged for operator attention.
    pub hazard: Option<XaCode>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Log kept in memory; for tests and for domains without durable resources.
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: Vec<LogRecord>,
    stats: LogStats,
}

impl MemoryLog {
    /// Records written so far.
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Decisions without a `remove`.
    pub fn pending(&self) -> Vec<PendingDecision> {
        replay(self.records.iter().cloned())
    }
}

impl TransactionLog for MemoryLog {
    fn prepare(&mut self, trid: &Xid) -> Result<(), LogError> {
        self.records.push(LogRecord::Prepare {
            trid: trid.clone(),
            at: now_millis(),
        });
        self.stats.prepare += 1;
        self.stats.writes += 1;
        Ok(())
    }

    fn remove(&mut self, trid: &Xid) -> Result<(), LogError> {
        self.records.push(LogRecord::Remove {
            trid: trid.clone(),
            at: now_millis(),
        });
        self.stats.remove += 1;
        self.stats.writes += 1;
        Ok(())
    }

    fn hazard(&mut self, trid: &Xid, code: XaCode) -> Result<(), LogError> {
        self.records.push(LogRecord::Hazard {
            trid: trid.clone(),
            code,
            at: now_millis(),
        });
        self.stats.hazard += 1;
        self.stats.writes += 1;
        Ok(())
    }

    fn stats(&self) -> LogStats {
        self.stats
    }
}

/// Append-only JSON-lines log; every record is synced before returning.
#[derive(Debug)]
pub struct JsonLog {
    path: PathBuf,
    file: File,
    stats: LogStats,
}

impl JsonLog {
    /// Opens (or creates) the log at `path`.
    pub fn open(path: &Path) -> Result<Self, LogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            stats: LogStats::default(),
        })
    }

    /// Log file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the log at `path` and returns decisions without a `remove`.
    ///
    /// A malformed final line (torn write) is ignored; malformed lines
    /// elsewhere are errors.
    pub fn pending(path: &Path) -> Result<Vec<PendingDecision>, LogError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
        let last = lines.len();
        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(line) {
                Ok(record) => records.push(record),
                Err(_) if index + 1 == last => break,
                Err(source) => {
                    return Err(LogError::Record {
                        line: index + 1,
                        source,
                    })
                }
            }
        }
        Ok(replay(records))
    }

    fn append(&mut self, record: &LogRecord) -> Result<(), LogError> {
        let mut line =
            serde_json::to_vec(record).map_err(|source| LogError::Record { line: 0, source })?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()?;
        self.stats.writes += 1;
        Ok(())
    }
}

impl TransactionLog for JsonLog {
    fn prepare(&mut self, trid: &Xid) -> Result<(), LogError> {
        self.append(&LogRecord::Prepare {
            trid: trid.clone(),
            at: now_millis(),
        })?;
        self.stats.prepare += 1;
        Ok(())
    }

    fn remove(&mut self, trid: &Xid) -> Result<(), LogError> {
        self.append(&LogRecord::Remove {
            trid: trid.clone(),
            at: now_millis(),
        })?;
        self.stats.remove += 1;
        Ok(())
    }

    fn hazard(&mut self, trid: &Xid, code: XaCode) -> Result<(), LogError> {
        self.append(&LogRecord::Hazard {
            trid: trid.clone(),
            code,
            at: now_millis(),
        })?;
        self.stats.hazard += 1;
        Ok(())
    }

    fn stats(&self) -> LogStats {
        self.stats
    }
}

fn replay<I>(records: I) -> Vec<PendingDecision>
where
    I: IntoIterator<Item = LogRecord>,
{
    let mut open: BTreeMap<Xid, Option<XaCode>> = BTreeMap::new();
    for record in records {
        match record {
            LogRecord::Prepare { trid, .. } => {
                open.insert(trid, None);
            }
            LogRecord::Remove { trid, .. } => {
                open.remove(&trid);
            }
            LogRecord::Hazard { trid, code, .. } => {
                open.insert(trid, Some(code));
            }
        }
    }
    open.into_iter()
        .map(|(trid, hazard)| PendingDecision { trid, hazard })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn memory_log_counts_and_replays() {
        let mut log = MemoryLog::default();
        let a = Xid::create();
        let b = Xid::create();
        log.prepare(&a).unwrap();
        log.prepare(&b).unwrap();
        log.remove(&a).unwrap();
        log.hazard(&b, XaCode::HeuristicHazard).unwrap();

        let stats = log.stats();
        assert_eq!(stats.writes, 4);
        assert_eq!(stats.prepare, 2);
        assert_eq!(stats.remove, 1);
        assert_eq!(stats.hazard, 1);
        assert_eq!(
            log.pending(),
            vec![PendingDecision {
                trid: b,
                hazard: Some(XaCode::HeuristicHazard)
            }]
        );
    }

    #[test]
    fn json_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tm").join("log.jsonl");
        let a = Xid::create();
        let b = Xid::create();
        {
            let mut log = JsonLog::open(&path).unwrap();
            log.prepare(&a).unwrap();
            log.prepare(&b).unwrap();
            log.remove(&b).unwrap();
            assert_eq!(log.stats().writes, 3);
        }
        let pending = JsonLog::pending(&path).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].trid, a);

        let mut log = JsonLog::open(&path).unwrap();
        log.remove(&a).unwrap();
        assert!(JsonLog::pending(&path).unwrap().is_empty());
    }

    #[test]
    fn torn_tail_is_ignored_but_corruption_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let a = Xid::create();
        {
            let mut log = JsonLog::open(&path).unwrap();
            log.prepare(&a).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"record\":\"remo").unwrap();
        assert_eq!(JsonLog::pending(&path).unwrap().len(), 1);

        file.write_all(b"\n{}\n").unwrap();
        assert!(matches!(
            JsonLog::pending(&path),
            Err(LogError::Record { line: 2, .. })
        ));
    }

    #[test]
    fn missing_file_has_nothing_pending() {
        let dir = tempfile::tempdir().unwrap();
        assert!(JsonLog::pending(&dir.path().join("absent")).unwrap().is_empty());
    }
}
