//! Store operations for consolidation jobs, stats, events, and idempotency.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use super::sqlite::{fmt_ts, Store};
use crate::error::Result;
use crate::ids;
use crate::model::{
    ConsolidationJob, ConsolidationStats, JobStatus, JobType, MemoryEvent,
};

impl Store {
    pub(super) fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConsolidationJob> {
        let job_type: String = row.get("job_type")?;
        let status: String = row.get("status")?;
        let started_at: Option<String> = row.get("started_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;
        let metadata: String = row.get("metadata")?;
        let created_at: String = row.get("created_at")?;
        let parse = |s: String| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        };
        Ok(ConsolidationJob {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            job_type: JobType::parse_name(&job_type).unwrap_or(JobType::HandoffCompression),
            status: JobStatus::parse_name(&status).unwrap_or_default(),
            started_at: started_at.and_then(parse),
            completed_at: completed_at.and_then(parse),
            items_processed: row.get("items_processed")?,
            items_affected: row.get("items_affected")?,
            error_message: row.get("error_message")?,
            metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
        })
    }

    pub fn get_job(&self, tenant: &str, id: &str) -> Result<Option<ConsolidationJob>> {
        let reader = self.reader.lock()?;
        let job = reader
            .query_row(
                "SELECT * FROM consolidation_jobs WHERE tenant_id = ?1 AND id = ?2",
                params![tenant, id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// Recent jobs, newest first
    pub fn list_jobs(&self, tenant: &str, limit: usize) -> Result<Vec<ConsolidationJob>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM consolidation_jobs
             WHERE tenant_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![tenant, limit as i64], Self::row_to_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    /// Mark a running job completed with its counters
    pub fn complete_job(
        &self,
        tenant: &str,
        job_id: &str,
        items_processed: i64,
        items_affected: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let writer = self.writer.lock()?;
        writer.execute(
            "UPDATE consolidation_jobs
             SET status = 'completed', completed_at = ?1,
                 items_processed = ?2, items_affected = ?3
             WHERE tenant_id = ?4 AND id = ?5",
            params![fmt_ts(now), items_processed, items_affected, tenant, job_id],
        )?;
        Ok(())
    }

    /// Mark a running job failed, keeping any partial counters
    pub fn fail_job(
        &self,
        tenant: &str,
        job_id: &str,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let writer = self.writer.lock()?;
        writer.execute(
            "UPDATE consolidation_jobs
             SET status = 'failed', completed_at = ?1, error_message = ?2
             WHERE tenant_id = ?3 AND id = ?4",
            params![fmt_ts(now), error_message, tenant, job_id],
        )?;
        Ok(())
    }

    // ========================================================================
    // COMPRESSION STATS
    // ========================================================================

    /// Accumulate rolling counters for `(tenant, stat_date, compression_type)`
    pub fn record_stats(
        &self,
        tenant: &str,
        stat_date: NaiveDate,
        compression_type: &str,
        before_count: i64,
        after_count: i64,
        tokens_saved: i64,
        percentage_saved: f64,
    ) -> Result<()> {
        let writer = self.writer.lock()?;
        writer.execute(
            "INSERT INTO consolidation_stats
                 (tenant_id, stat_date, compression_type,
                  before_count, after_count, tokens_saved, percentage_saved)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(tenant_id, stat_date, compression_type) DO UPDATE SET
                 before_count = before_count + excluded.before_count,
                 after_count = after_count + excluded.after_count,
                 tokens_saved = tokens_saved + excluded.tokens_saved,
                 percentage_saved = excluded.percentage_saved",
            params![
                tenant,
                stat_date.to_string(),
                compression_type,
                before_count,
                after_count,
                tokens_saved,
                percentage_saved
            ],
        )?;
        Ok(())
    }

    /// All stats rows for a tenant, newest date first
    pub fn compression_stats(&self, tenant: &str) -> Result<Vec<ConsolidationStats>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM consolidation_stats
             WHERE tenant_id = ?1
             ORDER BY stat_date DESC, compression_type ASC",
        )?;
        let rows = stmt.query_map(params![tenant], |row| {
            let stat_date: String = row.get("stat_date")?;
            Ok(ConsolidationStats {
                tenant_id: row.get("tenant_id")?,
                stat_date: stat_date.parse().unwrap_or_default(),
                compression_type: row.get("compression_type")?,
                before_count: row.get("before_count")?,
                after_count: row.get("after_count")?,
                tokens_saved: row.get("tokens_saved")?,
                percentage_saved: row.get("percentage_saved")?,
            })
        })?;
        let mut stats = Vec::new();
        for row in rows {
            stats.push(row?);
        }
        Ok(stats)
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// Append one observability event
    pub fn append_event(&self, tenant: &str, kind: &str, subject_id: &str) -> Result<()> {
        let writer = self.writer.lock()?;
        writer.execute(
            "INSERT INTO events (id, tenant_id, kind, subject_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                ids::new_id(ids::EVENT),
                tenant,
                kind,
                subject_id,
                fmt_ts(Utc::now())
            ],
        )?;
        Ok(())
    }

    /// Recent events, newest first
    pub fn recent_events(&self, tenant: &str, limit: usize) -> Result<Vec<MemoryEvent>> {
        let reader = self.reader.lock()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM events
             WHERE tenant_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![tenant, limit as i64], |row| {
            let created_at: String = row.get("created_at")?;
            Ok(MemoryEvent {
                id: row.get("id")?,
                tenant_id: row.get("tenant_id")?,
                kind: row.get("kind")?,
                subject_id: row.get("subject_id")?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_default(),
            })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    // ========================================================================
    // IDEMPOTENCY
    // ========================================================================

    /// Stored result for a previously-executed op_id, if any
    pub fn idempotency_get(&self, tenant: &str, op_id: &str) -> Result<Option<Value>> {
        let reader = self.reader.lock()?;
        let stored: Option<String> = reader
            .query_row(
                "SELECT result FROM idempotency WHERE tenant_id = ?1 AND op_id = ?2",
                params![tenant, op_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// Record the result of a mutating op under its op_id
    pub fn idempotency_put(&self, tenant: &str, op_id: &str, result: &Value) -> Result<()> {
        let writer = self.writer.lock()?;
        writer.execute(
            "INSERT OR REPLACE INTO idempotency (tenant_id, op_id, result, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![tenant, op_id, result.to_string(), fmt_ts(Utc::now())],
        )?;
        Ok(())
    }

    /// Drop idempotency records older than the TTL (spec floor: 24h)
    pub fn purge_idempotency(&self, ttl: Duration, now: DateTime<Utc>) -> Result<i64> {
        let writer = self.writer.lock()?;
        let purged = writer.execute(
            "DELETE FROM idempotency WHERE created_at < ?1",
            params![fmt_ts(now - ttl)],
        )?;
        Ok(purged as i64)
    }
}

// ============================================================================
// TESTS
// ============================================================================
