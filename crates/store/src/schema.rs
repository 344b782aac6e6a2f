//! Database schema.
//!
//! Timestamps are RFC 3339 TEXT, JSON payloads are serialized TEXT.
//! Plan counters (total/completed/failed) are derivable from `actions`
//! but persisted for cheap queries; `PlanStore` recomputes them inside
//! the same transaction as every action transition.

use rusqlite::Connection;

use crate::db::StoreError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id               TEXT PRIMARY KEY,
            user_id          TEXT NOT NULL,
            agent_kind       TEXT NOT NULL DEFAULT 'manufacturing',
            model_id         TEXT,
            status           TEXT NOT NULL DEFAULT 'active'
                             CHECK (status IN ('active', 'archived', 'expired')),
            metadata         TEXT NOT NULL DEFAULT '{}',
            created_at       TEXT NOT NULL,
            last_activity_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS plans (
            id                TEXT PRIMARY KEY,
            session_id        TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            user_query        TEXT NOT NULL,
            summary           TEXT NOT NULL,
            status            TEXT NOT NULL
                              CHECK (status IN ('new', 'in_progress', 'completed', 'failed', 'cancelled')),
            total_actions     INTEGER NOT NULL DEFAULT 0,
            completed_actions INTEGER NOT NULL DEFAULT 0,
            failed_actions    INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL,
            started_at        TEXT,
            completed_at      TEXT
        );

        CREATE TABLE IF NOT EXISTS actions (
            id              TEXT PRIMARY KEY,
            plan_id         TEXT NOT NULL REFERENCES plans(id) ON DELETE CASCADE,
            action_type     TEXT NOT NULL
                            CHECK (action_type IN ('tool_call', 'analysis', 'response', 'clarification')),
            name            TEXT NOT NULL,
            description     TEXT NOT NULL DEFAULT '',
            tool_name       TEXT,
            arguments       TEXT NOT NULL DEFAULT '{}',
            depends_on      TEXT NOT NULL DEFAULT '[]',
            status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'starting', 'in_progress',
                                              'completed', 'failed', 'cancelled')),
            execution_order INTEGER NOT NULL,
            result          TEXT,
            error_message   TEXT,
            created_at      TEXT NOT NULL,
            started_at      TEXT,
            completed_at    TEXT
        );

        CREATE TABLE IF NOT EXISTS session_memory (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id       TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            memory_key       TEXT NOT NULL,
            tool_name        TEXT,
            tags             TEXT NOT NULL DEFAULT '[]',
            value            TEXT NOT NULL,
            size_bytes       INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL,
            expires_at       TEXT,
            access_count     INTEGER NOT NULL DEFAULT 0,
            last_accessed_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user_activity
            ON sessions(user_id, last_activity_at);
        CREATE INDEX IF NOT EXISTS idx_sessions_activity
            ON sessions(id, last_activity_at);
        CREATE INDEX IF NOT EXISTS idx_plans_session_created
            ON plans(session_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_plans_status
            ON plans(status);
        CREATE INDEX IF NOT EXISTS idx_actions_plan_order
            ON actions(plan_id, execution_order);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_memory_session_key
            ON session_memory(session_id, memory_key);
        CREATE INDEX IF NOT EXISTS idx_memory_expires
            ON session_memory(expires_at) WHERE expires_at IS NOT NULL;
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])?;
    Ok(())
}
