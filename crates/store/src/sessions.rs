//! Session records — who owns the session, which agent variant and model
//! serve it, and when it was last active. Sessions are created on first
//! message and never deleted by the core (archival is external).

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::db::{Database, StoreError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub agent_kind: String,
    pub model_id: Option<String>,
    pub status: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the session if it does not exist; refresh activity either
    /// way. Returns true when the session was newly created.
    pub async fn upsert(&self, session_id: &str, user_id: &str, agent_kind: &str) -> Result<bool, StoreError> {
        let session_id = session_id.to_owned();
        let user_id = user_id.to_owned();
        let agent_kind = agent_kind.to_owned();
        self.db
            .with_conn(move |conn| {
                let now = Utc::now().to_rfc3339();
                conn.execute(
                    r#"
                    INSERT INTO sessions (id, user_id, agent_kind, status, metadata,
                                          created_at, last_activity_at)
                    VALUES (?1, ?2, ?3, 'active', '{}', ?4, ?4)
                    ON CONFLICT (id) DO UPDATE SET
                        user_id = excluded.user_id,
                        last_activity_at = excluded.last_activity_at
                    "#,
                    params![session_id, user_id, agent_kind, now],
                )?;
                // The upsert reports 1 row for both paths; a fresh row is
                // the one whose created_at still equals last_activity_at.
                let is_new: bool = conn.query_row(
                    "SELECT created_at = last_activity_at FROM sessions WHERE id = ?1",
                    [&session_id],
                    |row| row.get(0),
                )?;
                if is_new {
                    tracing::info!(session_id = %session_id, user_id = %user_id, "session created");
                }
                Ok(is_new)
            })
            .await
    }

    /// Refresh `last_activity_at`.
    pub async fn touch(&self, session_id: &str) -> Result<(), StoreError> {
        let session_id = session_id.to_owned();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE sessions SET last_activity_at = ?2 WHERE id = ?1",
                    params![session_id, Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
    }

    /// Record the model serving this session.
    pub async fn set_model(&self, session_id: &str, model_id: &str) -> Result<(), StoreError> {
        let session_id = session_id.to_owned();
        let model_id = model_id.to_owned();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE sessions SET model_id = ?2 WHERE id = ?1",
                    params![session_id, model_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Merge keys into the session metadata object.
    pub async fn merge_metadata(&self, session_id: &str, patch: Value) -> Result<(), StoreError> {
        let session_id = session_id.to_owned();
        self.db
            .with_conn(move |conn| {
                let raw: Option<String> = conn
                    .query_row("SELECT metadata FROM sessions WHERE id = ?1", [&session_id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                let Some(raw) = raw else { return Ok(()) };

                let mut metadata: Value = serde_json::from_str(&raw).unwrap_or_else(|_| Value::Object(Default::default()));
                if let (Value::Object(base), Value::Object(patch)) = (&mut metadata, patch) {
                    for (k, v) in patch {
                        base.insert(k, v);
                    }
                }
                conn.execute(
                    "UPDATE sessions SET metadata = ?2 WHERE id = ?1",
                    params![session_id, serde_json::to_string(&metadata)?],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let session_id = session_id.to_owned();
        self.db
            .with_conn(move |conn| {
                let record = conn
                    .query_row(
                        r#"
                        SELECT id, user_id, agent_kind, model_id, status, metadata,
                               created_at, last_activity_at
                        FROM sessions WHERE id = ?1
                        "#,
                        [&session_id],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, Option<String>>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, String>(5)?,
                                row.get::<_, String>(6)?,
                                row.get::<_, String>(7)?,
                            ))
                        },
                    )
                    .optional()?;

                let Some((id, user_id, agent_kind, model_id, status, metadata, created, activity)) = record
                else {
                    return Ok(None);
                };
                Ok(Some(SessionRecord {
                    session_id: id,
                    user_id,
                    agent_kind,
                    model_id,
                    status,
                    metadata: serde_json::from_str(&metadata)?,
                    created_at: parse_ts(&created)?,
                    last_activity_at: parse_ts(&activity)?,
                }))
            })
            .await
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow(format!("timestamp \"{raw}\": {e}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
