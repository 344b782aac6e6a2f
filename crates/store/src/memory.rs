//! Session memory — the durable key→value scratchpad.
//!
//! Tool outputs land here under the canonical key
//! `tool_result_{action_id}` and are read back by template resolution,
//! the response action, and the final structured payload. Upserts are
//! last-writer-wins per (session, key); reads filter expired rows so
//! correctness never depends on the background sweeper.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::db::{Database, StoreError};

/// Database column limit for `tool_name`.
const TOOL_NAME_MAX: usize = 100;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct MemoryStore {
    db: Database,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStats {
    pub total_items: u64,
    pub total_size_bytes: u64,
    pub unique_tools: u64,
    pub total_accesses: u64,
}

impl MemoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert a value with size accounting and optional expiry.
    pub async fn put(
        &self,
        session_id: &str,
        key: &str,
        value: &Value,
        tool_name: Option<&str>,
        tags: &[String],
        ttl_secs: Option<u64>,
    ) -> Result<(), StoreError> {
        let session_id = session_id.to_owned();
        let key = key.to_owned();
        let value_json = serde_json::to_string(value)?;
        let size_bytes = value_json.len() as i64;
        let tool_name = tool_name.map(truncate_tool_name);
        let tags_json = serde_json::to_string(tags)?;
        let expires_at = ttl_secs.map(|secs| to_ts(Utc::now() + Duration::seconds(secs as i64)));

        if size_bytes > 1_000 {
            tracing::debug!(session_id = %session_id, key = %key, size_bytes, "storing large memory item");
        }

        self.db
            .with_conn(move |conn| {
                let now = to_ts(Utc::now());
                conn.execute(
                    r#"
                    INSERT INTO session_memory
                        (session_id, memory_key, tool_name, tags, value, size_bytes,
                         created_at, updated_at, expires_at, access_count, last_accessed_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, 0, ?7)
                    ON CONFLICT (session_id, memory_key) DO UPDATE SET
                        tool_name = excluded.tool_name,
                        tags = excluded.tags,
                        value = excluded.value,
                        size_bytes = excluded.size_bytes,
                        updated_at = excluded.updated_at,
                        expires_at = excluded.expires_at
                    "#,
                    params![session_id, key, tool_name, tags_json, value_json, size_bytes, now, expires_at],
                )?;
                Ok(())
            })
            .await
    }

    /// Read a value, bumping the access counters. Expired rows are
    /// invisible even before the sweeper removes them.
    pub async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let session_id = session_id.to_owned();
        let key = key.to_owned();
        self.db
            .with_conn(move |conn| {
                let now = to_ts(Utc::now());
                let row: Option<(i64, String)> = conn
                    .query_row(
                        r#"
                        SELECT id, value FROM session_memory
                        WHERE session_id = ?1 AND memory_key = ?2
                          AND (expires_at IS NULL OR expires_at > ?3)
                        "#,
                        params![session_id, key, now],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                let Some((id, raw)) = row else {
                    return Ok(None);
                };

                conn.execute(
                    r#"
                    UPDATE session_memory
                    SET access_count = access_count + 1, last_accessed_at = ?2
                    WHERE id = ?1
                    "#,
                    params![id, now],
                )?;

                let value: Value = serde_json::from_str(&raw)?;
                Ok(Some(unwrap_opaque(value)))
            })
            .await
    }

    /// Delete keys; reports per-key success.
    pub async fn delete(&self, session_id: &str, keys: &[String]) -> Result<Vec<(String, bool)>, StoreError> {
        let session_id = session_id.to_owned();
        let keys = keys.to_vec();
        self.db
            .with_conn(move |conn| {
                let mut results = Vec::with_capacity(keys.len());
                for key in keys {
                    let deleted = conn.execute(
                        "DELETE FROM session_memory WHERE session_id = ?1 AND memory_key = ?2",
                        params![session_id, key],
                    )?;
                    results.push((key, deleted > 0));
                }
                Ok(results)
            })
            .await
    }

    /// List live keys, optionally filtered by a `*` glob pattern,
    /// newest first.
    pub async fn list_keys(&self, session_id: &str, pattern: Option<&str>) -> Result<Vec<String>, StoreError> {
        let session_id = session_id.to_owned();
        let like = pattern.map(|p| p.replace('*', "%"));
        self.db
            .with_conn(move |conn| {
                let now = to_ts(Utc::now());
                let mut stmt = conn.prepare(
                    r#"
                    SELECT memory_key FROM session_memory
                    WHERE session_id = ?1
                      AND (expires_at IS NULL OR expires_at > ?2)
                      AND (?3 IS NULL OR memory_key LIKE ?3)
                    ORDER BY created_at DESC, id DESC
                    "#,
                )?;
                let keys = stmt
                    .query_map(params![session_id, now, like], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await
    }

    /// Keys produced by a given tool, newest first.
    pub async fn by_tool(&self, session_id: &str, tool_name: &str) -> Result<Vec<String>, StoreError> {
        let session_id = session_id.to_owned();
        let tool_name = truncate_tool_name(tool_name);
        self.db
            .with_conn(move |conn| {
                let now = to_ts(Utc::now());
                let mut stmt = conn.prepare(
                    r#"
                    SELECT memory_key FROM session_memory
                    WHERE session_id = ?1 AND tool_name = ?2
                      AND (expires_at IS NULL OR expires_at > ?3)
                    ORDER BY created_at DESC, id DESC
                    "#,
                )?;
                let keys = stmt
                    .query_map(params![session_id, tool_name, now], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await
    }

    /// Keys carrying a given tag, newest first. Tags are a JSON array
    /// column; membership is checked after decode.
    pub async fn by_tag(&self, session_id: &str, tag: &str) -> Result<Vec<String>, StoreError> {
        let session_id = session_id.to_owned();
        let tag = tag.to_owned();
        self.db
            .with_conn(move |conn| {
                let now = to_ts(Utc::now());
                let mut stmt = conn.prepare(
                    r#"
                    SELECT memory_key, tags FROM session_memory
                    WHERE session_id = ?1
                      AND (expires_at IS NULL OR expires_at > ?2)
                    ORDER BY created_at DESC, id DESC
                    "#,
                )?;
                let rows = stmt
                    .query_map(params![session_id, now], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut keys = Vec::new();
                for (key, tags_raw) in rows {
                    let tags: Vec<String> = serde_json::from_str(&tags_raw).unwrap_or_default();
                    if tags.iter().any(|t| t == &tag) {
                        keys.push(key);
                    }
                }
                Ok(keys)
            })
            .await
    }

    /// Canonical write for a tool result:
    /// key `tool_result_{action_id}`, tags `tool_result` + the tool name.
    pub async fn handle_tool_result(
        &self,
        session_id: &str,
        action_id: &str,
        tool_name: &str,
        result: &Value,
    ) -> Result<(), StoreError> {
        let key = format!("tool_result_{action_id}");
        let tags = vec!["tool_result".to_owned(), truncate_tool_name(tool_name)];
        self.put(session_id, &key, result, Some(tool_name), &tags, None)
            .await
    }

    /// Remove expired rows across all sessions. Returns the count.
    pub async fn sweep_expired(&self) -> Result<u64, StoreError> {
        self.db
            .with_conn(move |conn| {
                let now = to_ts(Utc::now());
                let deleted = conn.execute(
                    "DELETE FROM session_memory WHERE expires_at IS NOT NULL AND expires_at < ?1",
                    [now],
                )?;
                if deleted > 0 {
                    tracing::info!(deleted, "swept expired memory items");
                }
                Ok(deleted as u64)
            })
            .await
    }

    /// Usage statistics for a session.
    pub async fn stats(&self, session_id: &str) -> Result<MemoryStats, StoreError> {
        let session_id = session_id.to_owned();
        self.db
            .with_conn(move |conn| {
                conn.query_row(
                    r#"
                    SELECT COUNT(*),
                           COALESCE(SUM(size_bytes), 0),
                           COUNT(DISTINCT tool_name),
                           COALESCE(SUM(access_count), 0)
                    FROM session_memory WHERE session_id = ?1
                    "#,
                    [&session_id],
                    |row| {
                        Ok(MemoryStats {
                            total_items: row.get::<_, i64>(0)? as u64,
                            total_size_bytes: row.get::<_, i64>(1)? as u64,
                            unique_tools: row.get::<_, i64>(2)? as u64,
                            total_accesses: row.get::<_, i64>(3)? as u64,
                        })
                    },
                )
                .map_err(StoreError::from)
            })
            .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn to_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Truncate to the column limit, keeping 97 chars + an ellipsis marker.
fn truncate_tool_name(name: &str) -> String {
    if name.len() <= TOOL_NAME_MAX {
        name.to_owned()
    } else {
        let mut cut = TOOL_NAME_MAX - 3;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &name[..cut])
    }
}

/// Opaque values stored by the serialization fallback arrive as
/// `{"data": <string>, "type": <name>}`; readers get the data back.
fn unwrap_opaque(value: Value) -> Value {
    if let Value::Object(ref obj) = value {
        if obj.len() == 2 && obj.contains_key("data") && obj.contains_key("type") {
            return obj["data"].clone();
        }
    }
    value
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
