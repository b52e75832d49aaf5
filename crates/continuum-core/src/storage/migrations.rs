//! Database Migrations
//!
//! Schema migration definitions for the storage layer.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: handoffs, notes, decisions, feedback, capsules, FTS, embeddings, events",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Memory graph edges, consolidation jobs and stats, idempotency table",
        up: MIGRATION_V2_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Core memory entities
const MIGRATION_V1_UP: &str = r#"
-- Session handoffs: never hard-deleted, aged through compression levels
CREATE TABLE IF NOT EXISTS session_handoffs (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    with_whom TEXT NOT NULL,
    experienced TEXT NOT NULL,
    noticed TEXT NOT NULL,
    learned TEXT NOT NULL,
    story TEXT,
    becoming TEXT,
    remember TEXT NOT NULL,
    significance REAL NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    compression_level TEXT NOT NULL DEFAULT 'full',
    summary TEXT,
    quick_ref TEXT,
    integrated_into TEXT,
    parent_handoff_id TEXT,
    influenced_by TEXT,
    consolidated_at TEXT,
    has_embedding INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_handoffs_tenant_created ON session_handoffs(tenant_id, created_at, id);
CREATE INDEX IF NOT EXISTS idx_handoffs_tenant_whom ON session_handoffs(tenant_id, with_whom, created_at);
CREATE INDEX IF NOT EXISTS idx_handoffs_tenant_level ON session_handoffs(tenant_id, compression_level, created_at);

CREATE VIRTUAL TABLE IF NOT EXISTS handoff_fts USING fts5(
    id UNINDEXED,
    tenant_id UNINDEXED,
    body,
    tokenize='porter ascii'
);

-- Knowledge notes: durable facts, preferences, principles
CREATE TABLE IF NOT EXISTS knowledge_notes (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    text TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    project_path TEXT,
    confidence REAL NOT NULL DEFAULT 0.8,
    source_handoffs TEXT NOT NULL DEFAULT '[]',
    has_embedding INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notes_tenant_created ON knowledge_notes(tenant_id, created_at, id);
CREATE INDEX IF NOT EXISTS idx_notes_tenant_project ON knowledge_notes(tenant_id, project_path);

CREATE VIRTUAL TABLE IF NOT EXISTS note_fts USING fts5(
    id UNINDEXED,
    tenant_id UNINDEXED,
    body,
    tokenize='porter ascii'
);

-- Decisions: active -> superseded | archived, never deleted
CREATE TABLE IF NOT EXISTS decisions (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    scope TEXT NOT NULL DEFAULT 'project',
    text TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    supersedes TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_decisions_tenant_status ON decisions(tenant_id, status, created_at);
CREATE INDEX IF NOT EXISTS idx_decisions_tenant_scope ON decisions(tenant_id, scope, status);

-- Agent feedback about the memory system itself
CREATE TABLE IF NOT EXISTS agent_feedback (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    text TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    has_embedding INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedback_tenant_status ON agent_feedback(tenant_id, status, created_at);

CREATE VIRTUAL TABLE IF NOT EXISTS feedback_fts USING fts5(
    id UNINDEXED,
    tenant_id UNINDEXED,
    body,
    tokenize='porter ascii'
);

-- Capsules: curated TTL-bounded bundles
CREATE TABLE IF NOT EXISTS capsules (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    scope TEXT NOT NULL DEFAULT 'user',
    subject_type TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    author_agent_id TEXT NOT NULL,
    audience_agent_ids TEXT NOT NULL DEFAULT '[]',
    ttl_days INTEGER NOT NULL DEFAULT 7,
    status TEXT NOT NULL DEFAULT 'active',
    items TEXT NOT NULL DEFAULT '{}',
    risks TEXT NOT NULL DEFAULT '[]',
    has_embedding INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_capsules_tenant_created ON capsules(tenant_id, created_at, id);
CREATE INDEX IF NOT EXISTS idx_capsules_tenant_expires ON capsules(tenant_id, expires_at);

CREATE VIRTUAL TABLE IF NOT EXISTS capsule_fts USING fts5(
    id UNINDEXED,
    tenant_id UNINDEXED,
    body,
    tokenize='porter ascii'
);

-- Embedding vectors, one row per embedded entity (little-endian f32 BLOB)
CREATE TABLE IF NOT EXISTS memory_embeddings (
    entity_kind TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (entity_kind, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_embeddings_kind_tenant ON memory_embeddings(entity_kind, tenant_id);

-- Append-only observability log
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_tenant_created ON events(tenant_id, created_at);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Graph edges, consolidation bookkeeping, idempotency
const MIGRATION_V2_UP: &str = r#"
-- Typed property edges between memory nodes
CREATE TABLE IF NOT EXISTS edges (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    from_node_id TEXT NOT NULL,
    to_node_id TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_edges_tenant_from ON edges(tenant_id, from_node_id, edge_type);
CREATE INDEX IF NOT EXISTS idx_edges_tenant_to ON edges(tenant_id, to_node_id, edge_type);

-- One lease per (tenant, job_type); stale running jobs get failed and replaced
CREATE TABLE IF NOT EXISTS consolidation_jobs (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    started_at TEXT,
    completed_at TEXT,
    items_processed INTEGER NOT NULL DEFAULT 0,
    items_affected INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_tenant_type_status ON consolidation_jobs(tenant_id, job_type, status);
CREATE INDEX IF NOT EXISTS idx_jobs_tenant_created ON consolidation_jobs(tenant_id, created_at);

-- Rolling compression counters
CREATE TABLE IF NOT EXISTS consolidation_stats (
    tenant_id TEXT NOT NULL,
    stat_date TEXT NOT NULL,
    compression_type TEXT NOT NULL,
    before_count INTEGER NOT NULL DEFAULT 0,
    after_count INTEGER NOT NULL DEFAULT 0,
    tokens_saved INTEGER NOT NULL DEFAULT 0,
    percentage_saved REAL NOT NULL DEFAULT 0.0,
    PRIMARY KEY (tenant_id, stat_date, compression_type)
);

-- At-most-once replay support: duplicate op_ids return the stored result
CREATE TABLE IF NOT EXISTS idempotency (
    tenant_id TEXT NOT NULL,
    op_id TEXT NOT NULL,
    result TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (tenant_id, op_id)
);

CREATE INDEX IF NOT EXISTS idx_idempotency_created ON idempotency(created_at);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // execute_batch handles multi-statement SQL
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

// ============================================================================
// TESTS
// ============================================================================
