//! Client-side Write-Ahead Log.
//!
//! Every mutating tool call is appended (fsync'd) to
//! `<root>/.memory-wal/operations.jsonl` before the remote attempt. When the
//! server is unreachable the record stays; replay walks records in ascending
//! ULID order through a caller-supplied dispatch function. At-most-once is
//! the server's side of the contract (the `op_id` idempotency table); the
//! log guarantees durability and per-client order.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use ulid::Ulid;

/// Directory under the client root
pub const WAL_DIR: &str = ".memory-wal";
/// Log file name
pub const WAL_FILE: &str = "operations.jsonl";

/// One logged operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    /// ULID; lexicographic order is enqueue order
    pub op_id: String,
    /// Tool name to replay
    pub op_name: String,
    /// Tool arguments as enqueued
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Replay attempts so far
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Tombstone line marking a replayed record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tombstone {
    op_id: String,
    tombstone: bool,
}

/// Result of one replay pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub remaining: usize,
}

/// The write-ahead log client
pub struct WalClient {
    path: PathBuf,
    generator: Mutex<ulid::Generator>,
}

impl WalClient {
    /// Open (creating if needed) the log under `root/.memory-wal/`
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let dir = root.as_ref().join(WAL_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join(WAL_FILE),
            generator: Mutex::new(ulid::Generator::new()),
        })
    }

    /// Open under the current working directory
    pub fn open_in_cwd() -> io::Result<Self> {
        Self::open(std::env::current_dir()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn next_op_id(&self) -> String {
        let mut generator = match self.generator.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        generator
            .generate()
            .unwrap_or_else(|_| Ulid::new())
            .to_string()
    }

    fn append_line(&self, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()
    }

    /// Log a mutating operation before attempting it remotely.
    ///
    /// Returns the record carrying the assigned `op_id`; callers pass that
    /// `op_id` with the remote call so replay is at-most-once.
    pub fn append(
        &self,
        op_name: &str,
        args: Value,
        tenant_id: Option<&str>,
    ) -> io::Result<WalRecord> {
        let record = WalRecord {
            op_id: self.next_op_id(),
            op_name: op_name.to_string(),
            args,
            tenant_id: tenant_id.map(String::from),
            attempts: 0,
            enqueued_at: Utc::now(),
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.append_line(&line)?;
        Ok(record)
    }

    /// Mark one record replayed by appending a tombstone
    pub fn mark_replayed(&self, op_id: &str) -> io::Result<()> {
        let tombstone = Tombstone {
            op_id: op_id.to_string(),
            tombstone: true,
        };
        let line = serde_json::to_string(&tombstone)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.append_line(&line)
    }

    /// Records not yet replayed, in ascending `op_id` order.
    ///
    /// A malformed trailing line (torn write) is ignored; malformed interior
    /// lines are skipped with a warning.
    pub fn pending(&self) -> io::Result<Vec<WalRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let lines: Vec<&str> = content.lines().collect();
        let mut records: Vec<WalRecord> = Vec::new();
        let mut tombstoned: std::collections::HashSet<String> = Default::default();

        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: Value = match serde_json::from_str(line) {
                Ok(value) => value,
                Err(e) => {
                    if index == lines.len() - 1 {
                        debug!("ignoring torn trailing WAL line");
                    } else {
                        warn!("skipping malformed WAL line {index}: {e}");
                    }
                    continue;
                }
            };
            if parsed.get("tombstone").and_then(Value::as_bool) == Some(true) {
                if let Some(op_id) = parsed.get("op_id").and_then(Value::as_str) {
                    tombstoned.insert(op_id.to_string());
                }
                continue;
            }
            match serde_json::from_value::<WalRecord>(parsed) {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping unreadable WAL record at line {index}: {e}"),
            }
        }

        records.retain(|r| !tombstoned.contains(&r.op_id));
        records.sort_by(|a, b| a.op_id.cmp(&b.op_id));
        Ok(records)
    }

    /// Rewrite the log keeping only pending records; returns how many remain
    pub fn compact(&self) -> io::Result<usize> {
        let pending = self.pending()?;
        let tmp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for record in &pending {
                let line = serde_json::to_string(record)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                tmp.write_all(line.as_bytes())?;
                tmp.write_all(b"\n")?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(pending.len())
    }

    /// Replay pending records in order through `dispatch`.
    ///
    /// Stops at the first failure so a single client's enqueue order is
    /// preserved; successful records are tombstoned immediately and the log
    /// is compacted at the end.
    pub async fn replay<F, Fut>(&self, mut dispatch: F) -> io::Result<ReplaySummary>
    where
        F: FnMut(WalRecord) -> Fut,
        Fut: std::future::Future<Output = Result<Value, String>>,
    {
        let pending = self.pending()?;
        let mut replayed = 0;

        for mut record in pending {
            record.attempts += 1;
            match dispatch(record.clone()).await {
                Ok(_) => {
                    self.mark_replayed(&record.op_id)?;
                    replayed += 1;
                }
                Err(e) => {
                    warn!(op_id = %record.op_id, op = %record.op_name, "replay halted: {e}");
                    break;
                }
            }
        }

        if replayed > 0 {
            self.compact()?;
        }
        let remaining = self.pending()?.len();
        Ok(ReplaySummary { replayed, remaining })
    }
}

// ============================================================================
// TESTS
// ============================================================================
