//! SQLite Storage Implementation
//!
//! Core storage struct plus the session-handoff table. Sibling modules in
//! this directory extend [`Store`] with the remaining entities.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{MemoryError, Result};
use crate::model::{CompressionLevel, Handoff, IdentityThreadEntry, JobStatus, JobType};

/// Main storage struct.
///
/// Uses separate reader/writer connections for interior mutability. All
/// methods take `&self`, making Store `Send + Sync` so callers can share an
/// `Arc<Store>` without an outer lock.
pub struct Store {
    pub(super) writer: Mutex<Connection>,
    pub(super) reader: Mutex<Connection>,
    pub(super) dimension: usize,
}

/// Outcome of a job-lease acquisition attempt
#[derive(Debug)]
pub enum JobAcquisition {
    /// The lease was taken; a new running job row exists
    Acquired(crate::model::ConsolidationJob),
    /// Another run holds the lease; its job id is returned
    AlreadyRunning(String),
}

/// Row counts used by system health reporting
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreCounts {
    pub handoffs: i64,
    pub notes: i64,
    pub decisions: i64,
    pub capsules: i64,
    pub feedback: i64,
    pub edges: i64,
    pub events: i64,
    pub embeddings: i64,
}

/// Filter for handoff listings
#[derive(Debug, Clone, Default)]
pub struct HandoffFilter {
    pub with_whom: Option<String>,
    pub session_id: Option<String>,
}

// ============================================================================
// TIMESTAMP HELPERS
// ============================================================================

/// Fixed-width RFC 3339 with millisecond resolution.
///
/// The fixed width keeps lexicographic string comparison consistent with
/// chronological order, which keyset pagination relies on.
pub(super) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(super) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::Permanent(format!("bad timestamp '{s}': {e}")))
}

pub(super) fn json_strings(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

impl Store {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open a store at the given path, or the platform data directory.
    ///
    /// `dimension` pins the embedding width; vectors of any other width are
    /// rejected at write time.
    pub fn open(db_path: Option<PathBuf>, dimension: usize) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("dev", "continuum", "continuum").ok_or_else(
                    || MemoryError::Permanent("could not determine project directories".into()),
                )?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)
                    .map_err(|e| MemoryError::Permanent(format!("create data dir: {e}")))?;
                data_dir.join("continuum.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            dimension,
        })
    }

    /// Pinned embedding dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Every tenant with at least one persisted row
    pub fn tenants(&self) -> Result<Vec<String>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT DISTINCT tenant_id FROM (
                 SELECT tenant_id FROM session_handoffs
                 UNION SELECT tenant_id FROM knowledge_notes
                 UNION SELECT tenant_id FROM decisions
                 UNION SELECT tenant_id FROM agent_feedback
                 UNION SELECT tenant_id FROM capsules
                 UNION SELECT tenant_id FROM edges
             ) ORDER BY tenant_id",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tenants = Vec::new();
        for row in rows {
            tenants.push(row?);
        }
        Ok(tenants)
    }

    /// Row counts for one tenant
    pub fn counts(&self, tenant: &str) -> Result<StoreCounts> {
        let reader = self.reader.lock()?;
        let count = |sql: &str| -> Result<i64> {
            Ok(reader.query_row(sql, params![tenant], |row| row.get(0))?)
        };
        Ok(StoreCounts {
            handoffs: count("SELECT COUNT(*) FROM session_handoffs WHERE tenant_id = ?1")?,
            notes: count("SELECT COUNT(*) FROM knowledge_notes WHERE tenant_id = ?1")?,
            decisions: count("SELECT COUNT(*) FROM decisions WHERE tenant_id = ?1")?,
            capsules: count("SELECT COUNT(*) FROM capsules WHERE tenant_id = ?1")?,
            feedback: count("SELECT COUNT(*) FROM agent_feedback WHERE tenant_id = ?1")?,
            edges: count("SELECT COUNT(*) FROM edges WHERE tenant_id = ?1")?,
            events: count("SELECT COUNT(*) FROM events WHERE tenant_id = ?1")?,
            embeddings: count("SELECT COUNT(*) FROM memory_embeddings WHERE tenant_id = ?1")?,
        })
    }

    // ========================================================================
    // SESSION HANDOFFS
    // ========================================================================

    pub(super) fn row_to_handoff(row: &rusqlite::Row<'_>) -> rusqlite::Result<Handoff> {
        let tags: String = row.get("tags")?;
        let level: String = row.get("compression_level")?;
        let created_at: String = row.get("created_at")?;
        let consolidated_at: Option<String> = row.get("consolidated_at")?;
        Ok(Handoff {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            session_id: row.get("session_id")?,
            with_whom: row.get("with_whom")?,
            experienced: row.get("experienced")?,
            noticed: row.get("noticed")?,
            learned: row.get("learned")?,
            story: row.get("story")?,
            becoming: row.get("becoming")?,
            remember: row.get("remember")?,
            significance: row.get("significance")?,
            tags: json_strings(&tags),
            compression_level: CompressionLevel::parse_name(&level).unwrap_or_default(),
            summary: row.get("summary")?,
            quick_ref: row.get("quick_ref")?,
            integrated_into: row.get("integrated_into")?,
            parent_handoff_id: row.get("parent_handoff_id")?,
            influenced_by: row.get("influenced_by")?,
            consolidated_at: consolidated_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            has_embedding: row.get::<_, i64>("has_embedding")? != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
        })
    }

    /// Persist a new handoff and index it for full-text search
    pub fn insert_handoff(&self, handoff: &Handoff) -> Result<()> {
        let tags_json = serde_json::to_string(&handoff.tags)?;
        let fts_body = format!(
            "{}\n{}\n{}",
            handoff.embedding_text(),
            handoff.remember,
            handoff.tags.join(" ")
        );
        let mut writer = self.writer.lock()?;
        let tx = writer.transaction()?;
        tx.execute(
            "INSERT INTO session_handoffs (
                id, tenant_id, session_id, with_whom,
                experienced, noticed, learned, story, becoming, remember,
                significance, tags, compression_level, summary, quick_ref,
                integrated_into, parent_handoff_id, influenced_by,
                consolidated_at, has_embedding, created_at
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18,
                ?19, ?20, ?21
            )",
            params![
                handoff.id,
                handoff.tenant_id,
                handoff.session_id,
                handoff.with_whom,
                handoff.experienced,
                handoff.noticed,
                handoff.learned,
                handoff.story,
                handoff.becoming,
                handoff.remember,
                handoff.significance,
                tags_json,
                handoff.compression_level.as_str(),
                handoff.summary,
                handoff.quick_ref,
                handoff.integrated_into,
                handoff.parent_handoff_id,
                handoff.influenced_by,
                handoff.consolidated_at.map(fmt_ts),
                handoff.has_embedding as i64,
                fmt_ts(handoff.created_at),
            ],
        )?;
        tx.execute(
            "INSERT INTO handoff_fts (id, tenant_id, body) VALUES (?1, ?2, ?3)",
            params![handoff.id, handoff.tenant_id, fts_body],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Fetch a handoff by id within a tenant
    pub fn get_handoff(&self, tenant: &str, id: &str) -> Result<Option<Handoff>> {
        let reader = self.reader.lock()?;
        let handoff = reader
            .query_row(
                "SELECT * FROM session_handoffs WHERE tenant_id = ?1 AND id = ?2",
                params![tenant, id],
                Self::row_to_handoff,
            )
            .optional()?;
        Ok(handoff)
    }

    /// Most recent handoff, optionally filtered by counterpart
    pub fn last_handoff(&self, tenant: &str, with_whom: Option<&str>) -> Result<Option<Handoff>> {
        let reader = self.reader.lock()?;
        let handoff = reader
            .query_row(
                "SELECT * FROM session_handoffs
                 WHERE tenant_id = ?1 AND (?2 IS NULL OR with_whom = ?2)
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
                params![tenant, with_whom],
                Self::row_to_handoff,
            )
            .optional()?;
        Ok(handoff)
    }

    /// Keyset-paginated listing, newest first.
    ///
    /// `cursor` is the `(created_at, id)` pair of the last row of the
    /// previous page, as stored strings.
    pub fn list_handoffs(
        &self,
        tenant: &str,
        filter: &HandoffFilter,
        limit: usize,
        cursor: Option<(String, String)>,
    ) -> Result<Vec<Handoff>> {
        let (cursor_ts, cursor_id) = match cursor {
            Some((ts, id)) => (Some(ts), Some(id)),
            None => (None, None),
        };
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM session_handoffs
             WHERE tenant_id = ?1
               AND (?2 IS NULL OR with_whom = ?2)
               AND (?3 IS NULL OR session_id = ?3)
               AND (?4 IS NULL OR created_at < ?4
                    OR (created_at = ?4 AND id < ?5))
             ORDER BY created_at DESC, id DESC
             LIMIT ?6",
        )?;
        let rows = stmt.query_map(
            params![
                tenant,
                filter.with_whom,
                filter.session_id,
                cursor_ts,
                cursor_id,
                limit as i64
            ],
            Self::row_to_handoff,
        )?;
        let mut handoffs = Vec::new();
        for row in rows {
            handoffs.push(row?);
        }
        Ok(handoffs)
    }

    /// Materialize the identity thread: `becoming` statements, newest first
    pub fn identity_thread(
        &self,
        tenant: &str,
        with_whom: Option<&str>,
        limit: usize,
    ) -> Result<Vec<IdentityThreadEntry>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT id, becoming, created_at, significance FROM session_handoffs
             WHERE tenant_id = ?1
               AND becoming IS NOT NULL
               AND (?2 IS NULL OR with_whom = ?2)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![tenant, with_whom, limit as i64], |row| {
            let created_at: String = row.get(2)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                created_at,
                row.get::<_, f64>(3)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (handoff_id, becoming, created_at, significance) = row?;
            entries.push(IdentityThreadEntry {
                handoff_id,
                becoming,
                created_at: parse_ts(&created_at)?,
                significance,
            });
        }
        Ok(entries)
    }

    /// Handoffs at `level` created before `cutoff`, oldest first.
    ///
    /// Stable order `(created_at ASC, id ASC)` is the consolidation
    /// tie-break.
    pub fn handoffs_for_compression(
        &self,
        tenant: &str,
        level: CompressionLevel,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Handoff>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM session_handoffs
             WHERE tenant_id = ?1 AND compression_level = ?2 AND created_at < ?3
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(
            params![tenant, level.as_str(), fmt_ts(cutoff)],
            Self::row_to_handoff,
        )?;
        let mut handoffs = Vec::new();
        for row in rows {
            handoffs.push(row?);
        }
        Ok(handoffs)
    }

    /// `becoming` statements not yet integrated, for identity consolidation
    pub fn becoming_statements(&self, tenant: &str) -> Result<Vec<Handoff>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM session_handoffs
             WHERE tenant_id = ?1
               AND becoming IS NOT NULL
               AND compression_level != 'integrated'
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![tenant], Self::row_to_handoff)?;
        let mut handoffs = Vec::new();
        for row in rows {
            handoffs.push(row?);
        }
        Ok(handoffs)
    }

    /// Advance a handoff one compression level, in its own transaction.
    ///
    /// Guards monotonicity in SQL: the row is only touched while it still
    /// sits at the expected prior level.
    pub fn apply_compression(
        &self,
        tenant: &str,
        id: &str,
        from_level: CompressionLevel,
        to_level: CompressionLevel,
        summary: Option<&str>,
        quick_ref: Option<&str>,
        integrated_into: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if to_level <= from_level {
            return Err(MemoryError::Validation(format!(
                "compression must rise: {from_level} -> {to_level}"
            )));
        }
        let writer = self.writer.lock()?;
        let changed = writer.execute(
            "UPDATE session_handoffs SET
                 compression_level = ?1,
                 summary = COALESCE(?2, summary),
                 quick_ref = COALESCE(?3, quick_ref),
                 integrated_into = COALESCE(?4, integrated_into),
                 consolidated_at = ?5
             WHERE tenant_id = ?6 AND id = ?7 AND compression_level = ?8",
            params![
                to_level.as_str(),
                summary,
                quick_ref,
                integrated_into,
                fmt_ts(now),
                tenant,
                id,
                from_level.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Link a handoff to the principle it was integrated into
    pub fn set_integrated_into(&self, tenant: &str, id: &str, principle_id: &str) -> Result<()> {
        let writer = self.writer.lock()?;
        writer.execute(
            "UPDATE session_handoffs SET integrated_into = ?1
             WHERE tenant_id = ?2 AND id = ?3",
            params![principle_id, tenant, id],
        )?;
        Ok(())
    }

    // ========================================================================
    // CONSOLIDATION JOB LEASES
    // ========================================================================

    /// Take the `(tenant, job_type)` lease or learn who holds it.
    ///
    /// A running job whose `started_at` is older than `stale_after` is marked
    /// failed before the check, so crashed runs cannot wedge the lease.
    pub fn acquire_job(
        &self,
        tenant: &str,
        job_type: JobType,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<JobAcquisition> {
        let mut writer = self.writer.lock()?;
        let tx = writer.transaction()?;

        tx.execute(
            "UPDATE consolidation_jobs
             SET status = 'failed', completed_at = ?1, error_message = 'stale lease expired'
             WHERE tenant_id = ?2 AND job_type = ?3 AND status = 'running'
               AND started_at < ?4",
            params![
                fmt_ts(now),
                tenant,
                job_type.as_str(),
                fmt_ts(now - stale_after)
            ],
        )?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM consolidation_jobs
                 WHERE tenant_id = ?1 AND job_type = ?2 AND status = 'running'
                 LIMIT 1",
                params![tenant, job_type.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            tx.commit()?;
            return Ok(JobAcquisition::AlreadyRunning(id));
        }

        let job = crate::model::ConsolidationJob {
            id: crate::ids::new_id(crate::ids::JOB),
            tenant_id: tenant.to_string(),
            job_type,
            status: JobStatus::Running,
            started_at: Some(now),
            completed_at: None,
            items_processed: 0,
            items_affected: 0,
            error_message: None,
            metadata: serde_json::json!({}),
            created_at: now,
        };
        tx.execute(
            "INSERT INTO consolidation_jobs (
                id, tenant_id, job_type, status, started_at,
                items_processed, items_affected, metadata, created_at
            ) VALUES (?1, ?2, ?3, 'running', ?4, 0, 0, '{}', ?5)",
            params![
                job.id,
                job.tenant_id,
                job.job_type.as_str(),
                fmt_ts(now),
                fmt_ts(now)
            ],
        )?;
        tx.commit()?;
        Ok(JobAcquisition::Acquired(job))
    }
}

// ============================================================================
// TESTS
// ============================================================================
