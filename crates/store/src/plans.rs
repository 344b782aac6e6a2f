//! Plan store — the authoritative state machine for plans and actions.
//!
//! `update_action_status` enforces the monotonic transition chain and
//! recomputes the persisted plan counters inside the same transaction,
//! so a reader never observes a committed status without matching
//! counters.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value;

use aris_domain::plan::{ActionStatus, ActionType, ExecutionPlan, PlanStatus, PlannedAction};

use crate::db::{Database, StoreError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PlanStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct PlanStore {
    db: Database,
}

impl PlanStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Atomically insert a plan together with all of its actions.
    /// Fails with [`StoreError::DuplicatePlan`] when the id exists.
    pub async fn create_plan(&self, plan: &ExecutionPlan) -> Result<(), StoreError> {
        let plan = plan.clone();
        self.db
            .with_conn(move |conn| {
                let tx = conn.transaction()?;

                let exists: Option<i64> = tx
                    .query_row("SELECT 1 FROM plans WHERE id = ?1", [&plan.plan_id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                if exists.is_some() {
                    return Err(StoreError::DuplicatePlan(plan.plan_id.clone()));
                }

                tx.execute(
                    r#"
                    INSERT INTO plans (id, session_id, user_query, summary, status,
                                       total_actions, completed_actions, failed_actions,
                                       created_at, started_at, completed_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    "#,
                    params![
                        plan.plan_id,
                        plan.session_id,
                        plan.user_query,
                        plan.summary,
                        plan.status.as_str(),
                        plan.actions.len() as i64,
                        plan.actions.iter().filter(|a| a.status == ActionStatus::Completed).count() as i64,
                        plan.actions.iter().filter(|a| a.status == ActionStatus::Failed).count() as i64,
                        to_ts(plan.created_at),
                        plan.started_at.map(to_ts),
                        plan.completed_at.map(to_ts),
                    ],
                )?;

                for action in &plan.actions {
                    tx.execute(
                        r#"
                        INSERT INTO actions (id, plan_id, action_type, name, description,
                                             tool_name, arguments, depends_on, status,
                                             execution_order, result, error_message,
                                             created_at, started_at, completed_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                        "#,
                        params![
                            action.action_id,
                            plan.plan_id,
                            action.action_type.as_str(),
                            action.name,
                            action.description,
                            action.tool_name,
                            serde_json::to_string(&action.arguments)?,
                            serde_json::to_string(&action.depends_on)?,
                            action.status.as_str(),
                            action.execution_order as i64,
                            action.result.as_ref().map(serde_json::to_string).transpose()?,
                            action.error_message,
                            to_ts(action.created_at),
                            action.started_at.map(to_ts),
                            action.completed_at.map(to_ts),
                        ],
                    )?;
                }

                tx.commit()?;
                tracing::info!(
                    plan_id = %plan.plan_id,
                    session_id = %plan.session_id,
                    actions = plan.actions.len(),
                    "plan created"
                );
                Ok(())
            })
            .await
    }

    /// Fully hydrated plan with actions ordered by `execution_order`.
    pub async fn get_plan(&self, plan_id: &str) -> Result<Option<ExecutionPlan>, StoreError> {
        let plan_id = plan_id.to_owned();
        self.db.with_conn(move |conn| load_plan(conn, &plan_id)).await
    }

    /// Set the plan status. The `new → in_progress` transition stamps
    /// `started_at`; any terminal status stamps `completed_at`.
    pub async fn update_plan_status(&self, plan_id: &str, status: PlanStatus) -> Result<(), StoreError> {
        let plan_id = plan_id.to_owned();
        self.db
            .with_conn(move |conn| {
                let now = to_ts(Utc::now());
                let changed = conn.execute(
                    r#"
                    UPDATE plans SET
                        status = ?2,
                        started_at = CASE WHEN ?2 = 'in_progress' AND started_at IS NULL
                                          THEN ?3 ELSE started_at END,
                        completed_at = CASE WHEN ?2 IN ('completed', 'failed', 'cancelled')
                                                 AND completed_at IS NULL
                                            THEN ?3 ELSE completed_at END
                    WHERE id = ?1
                    "#,
                    params![plan_id, status.as_str(), now],
                )?;
                if changed == 0 {
                    return Err(StoreError::PlanNotFound(plan_id));
                }
                Ok(())
            })
            .await
    }

    /// Single-action transition. Rejects non-monotonic transitions,
    /// stores result/error, stamps timing, and recomputes the plan's
    /// persisted counters — all in one transaction.
    pub async fn update_action_status(
        &self,
        plan_id: &str,
        action_id: &str,
        status: ActionStatus,
        result: Option<Value>,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        let plan_id = plan_id.to_owned();
        let action_id = action_id.to_owned();
        self.db
            .with_conn(move |conn| {
                let tx = conn.transaction()?;

                let current: Option<String> = tx
                    .query_row(
                        "SELECT status FROM actions WHERE plan_id = ?1 AND id = ?2",
                        params![plan_id, action_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let current = match current {
                    Some(s) => ActionStatus::parse(&s)
                        .ok_or_else(|| StoreError::CorruptRow(format!("action status \"{s}\"")))?,
                    None => return Err(StoreError::ActionNotFound(action_id)),
                };

                if !current.can_transition_to(status) {
                    return Err(StoreError::InvalidTransition {
                        action_id,
                        from: current.as_str().into(),
                        to: status.as_str().into(),
                    });
                }

                let now = to_ts(Utc::now());
                tx.execute(
                    r#"
                    UPDATE actions SET
                        status = ?3,
                        result = COALESCE(?4, result),
                        error_message = COALESCE(?5, error_message),
                        started_at = CASE WHEN ?3 IN ('starting', 'in_progress') AND started_at IS NULL
                                          THEN ?6 ELSE started_at END,
                        completed_at = CASE WHEN ?3 IN ('completed', 'failed', 'cancelled')
                                                 AND completed_at IS NULL
                                            THEN ?6 ELSE completed_at END
                    WHERE plan_id = ?1 AND id = ?2
                    "#,
                    params![
                        plan_id,
                        action_id,
                        status.as_str(),
                        result.as_ref().map(serde_json::to_string).transpose()?,
                        error_message,
                        now,
                    ],
                )?;

                refresh_counters(&tx, &plan_id)?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Most recent non-terminal plan for the session, if any.
    pub async fn active_plan(&self, session_id: &str) -> Result<Option<ExecutionPlan>, StoreError> {
        let session_id = session_id.to_owned();
        self.db
            .with_conn(move |conn| {
                let plan_id: Option<String> = conn
                    .query_row(
                        r#"
                        SELECT id FROM plans
                        WHERE session_id = ?1 AND status IN ('new', 'in_progress')
                        ORDER BY created_at DESC, rowid DESC
                        LIMIT 1
                        "#,
                        [&session_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match plan_id {
                    Some(id) => load_plan(conn, &id),
                    None => Ok(None),
                }
            })
            .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn to_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow(format!("timestamp \"{raw}\": {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_ts).transpose()
}

fn refresh_counters(tx: &Transaction<'_>, plan_id: &str) -> Result<(), StoreError> {
    tx.execute(
        r#"
        UPDATE plans SET
            completed_actions = (SELECT COUNT(*) FROM actions
                                 WHERE plan_id = ?1 AND status = 'completed'),
            failed_actions = (SELECT COUNT(*) FROM actions
                              WHERE plan_id = ?1 AND status = 'failed')
        WHERE id = ?1
        "#,
        [plan_id],
    )?;
    Ok(())
}

struct ActionRow {
    id: String,
    action_type: String,
    name: String,
    description: String,
    tool_name: Option<String>,
    arguments: String,
    depends_on: String,
    status: String,
    execution_order: i64,
    result: Option<String>,
    error_message: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

fn load_plan(conn: &Connection, plan_id: &str) -> Result<Option<ExecutionPlan>, StoreError> {
    let header = conn
        .query_row(
            r#"
            SELECT session_id, user_query, summary, status,
                   total_actions, completed_actions, failed_actions,
                   created_at, started_at, completed_at
            FROM plans WHERE id = ?1
            "#,
            [plan_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            },
        )
        .optional()?;

    let Some((session_id, user_query, summary, status, total, completed, failed, created, started, ended)) =
        header
    else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        r#"
        SELECT id, action_type, name, description, tool_name, arguments,
               depends_on, status, execution_order, result, error_message,
               created_at, started_at, completed_at
        FROM actions WHERE plan_id = ?1 ORDER BY execution_order
        "#,
    )?;
    let rows = stmt
        .query_map([plan_id], |row| {
            Ok(ActionRow {
                id: row.get(0)?,
                action_type: row.get(1)?,
                name: row.get(2)?,
                description: row.get(3)?,
                tool_name: row.get(4)?,
                arguments: row.get(5)?,
                depends_on: row.get(6)?,
                status: row.get(7)?,
                execution_order: row.get(8)?,
                result: row.get(9)?,
                error_message: row.get(10)?,
                created_at: row.get(11)?,
                started_at: row.get(12)?,
                completed_at: row.get(13)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut actions = Vec::with_capacity(rows.len());
    for row in rows {
        actions.push(PlannedAction {
            action_id: row.id,
            plan_id: plan_id.to_owned(),
            action_type: ActionType::parse(&row.action_type)
                .ok_or_else(|| StoreError::CorruptRow(format!("action type \"{}\"", row.action_type)))?,
            name: row.name,
            description: row.description,
            tool_name: row.tool_name,
            arguments: serde_json::from_str(&row.arguments)?,
            depends_on: serde_json::from_str(&row.depends_on)?,
            status: ActionStatus::parse(&row.status)
                .ok_or_else(|| StoreError::CorruptRow(format!("action status \"{}\"", row.status)))?,
            execution_order: row.execution_order as u32,
            result: row.result.as_deref().map(serde_json::from_str).transpose()?,
            error_message: row.error_message,
            created_at: parse_ts(&row.created_at)?,
            started_at: parse_opt_ts(row.started_at)?,
            completed_at: parse_opt_ts(row.completed_at)?,
        });
    }

    Ok(Some(ExecutionPlan {
        plan_id: plan_id.to_owned(),
        session_id,
        user_query,
        summary,
        status: PlanStatus::parse(&status)
            .ok_or_else(|| StoreError::CorruptRow(format!("plan status \"{status}\"")))?,
        actions,
        total_actions: total as u32,
        completed_actions: completed as u32,
        failed_actions: failed as u32,
        created_at: parse_ts(&created)?,
        started_at: parse_opt_ts(started)?,
        completed_at: parse_opt_ts(ended)?,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionStore;

    async fn stores() -> (PlanStore, SessionStore) {
        let db = Database::open_in_memory().unwrap();
        (PlanStore::new(db.clone()), SessionStore::new(db))
    }

    fn sample_plan(session_id: &str) -> ExecutionPlan {
        let mut fetch = PlannedAction::new("", ActionType::ToolCall, "Fetch data", "Get the data");
        fetch.tool_name = Some("get_fake_data".into());
        fetch.arguments = serde_json::json!({"result_variable_name": "data"});
        let mut respond = PlannedAction::new("", ActionType::Response, "Reply", "Compose the reply");
        respond.depends_on = vec![fetch.action_id.clone()];
        ExecutionPlan::new(session_id, "show me the data", "Fetch data and reply")
            .with_actions(vec![fetch, respond])
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let (plans, sessions) = stores().await;
        sessions.upsert("s1", "user-1", "manufacturing").await.unwrap();

        let plan = sample_plan("s1");
        plans.create_plan(&plan).await.unwrap();

        let loaded = plans.get_plan(&plan.plan_id).await.unwrap().unwrap();
        assert_eq!(loaded.plan_id, plan.plan_id);
        assert_eq!(loaded.session_id, "s1");
        assert_eq!(loaded.user_query, plan.user_query);
        assert_eq!(loaded.summary, plan.summary);
        assert_eq!(loaded.status, PlanStatus::New);
        assert_eq!(loaded.total_actions, 2);
        assert_eq!(loaded.actions.len(), 2);
        // Action order and fields survive.
        assert_eq!(loaded.actions[0].action_id, plan.actions[0].action_id);
        assert_eq!(loaded.actions[0].execution_order, 1);
        assert_eq!(loaded.actions[0].tool_name.as_deref(), Some("get_fake_data"));
        assert_eq!(loaded.actions[0].arguments, plan.actions[0].arguments);
        assert_eq!(loaded.actions[1].depends_on, plan.actions[1].depends_on);
    }

    #[tokio::test]
    async fn duplicate_plan_id_fails() {
        let (plans, sessions) = stores().await;
        sessions.upsert("s1", "u", "manufacturing").await.unwrap();
        let plan = sample_plan("s1");
        plans.create_plan(&plan).await.unwrap();
        let err = plans.create_plan(&plan).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePlan(_)));
    }

    #[tokio::test]
    async fn action_transitions_are_monotonic() {
        let (plans, sessions) = stores().await;
        sessions.upsert("s1", "u", "manufacturing").await.unwrap();
        let plan = sample_plan("s1");
        plans.create_plan(&plan).await.unwrap();
        let action_id = plan.actions[0].action_id.clone();

        plans
            .update_action_status(&plan.plan_id, &action_id, ActionStatus::Starting, None, None)
            .await
            .unwrap();
        plans
            .update_action_status(&plan.plan_id, &action_id, ActionStatus::InProgress, None, None)
            .await
            .unwrap();

        // Backwards transition rejected.
        let err = plans
            .update_action_status(&plan.plan_id, &action_id, ActionStatus::Starting, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        plans
            .update_action_status(
                &plan.plan_id,
                &action_id,
                ActionStatus::Completed,
                Some(serde_json::json!({"rows": 3})),
                None,
            )
            .await
            .unwrap();

        // Out of a terminal state rejected.
        let err = plans
            .update_action_status(&plan.plan_id, &action_id, ActionStatus::InProgress, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let loaded = plans.get_plan(&plan.plan_id).await.unwrap().unwrap();
        assert_eq!(loaded.actions[0].status, ActionStatus::Completed);
        assert_eq!(loaded.actions[0].result, Some(serde_json::json!({"rows": 3})));
        assert!(loaded.actions[0].started_at.is_some());
        assert!(loaded.actions[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn counters_follow_action_statuses() {
        let (plans, sessions) = stores().await;
        sessions.upsert("s1", "u", "manufacturing").await.unwrap();
        let plan = sample_plan("s1");
        plans.create_plan(&plan).await.unwrap();

        plans
            .update_action_status(
                &plan.plan_id,
                &plan.actions[0].action_id,
                ActionStatus::Completed,
                None,
                None,
            )
            .await
            .unwrap();
        plans
            .update_action_status(
                &plan.plan_id,
                &plan.actions[1].action_id,
                ActionStatus::Failed,
                None,
                Some("boom".into()),
            )
            .await
            .unwrap();

        let loaded = plans.get_plan(&plan.plan_id).await.unwrap().unwrap();
        assert_eq!(loaded.completed_actions, 1);
        assert_eq!(loaded.failed_actions, 1);
        assert_eq!(loaded.actions[1].error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn plan_status_timing() {
        let (plans, sessions) = stores().await;
        sessions.upsert("s1", "u", "manufacturing").await.unwrap();
        let plan = sample_plan("s1");
        plans.create_plan(&plan).await.unwrap();

        plans
            .update_plan_status(&plan.plan_id, PlanStatus::InProgress)
            .await
            .unwrap();
        let loaded = plans.get_plan(&plan.plan_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PlanStatus::InProgress);
        assert!(loaded.started_at.is_some());
        assert!(loaded.completed_at.is_none());

        plans
            .update_plan_status(&plan.plan_id, PlanStatus::Completed)
            .await
            .unwrap();
        let loaded = plans.get_plan(&plan.plan_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PlanStatus::Completed);
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn active_plan_skips_terminal_plans() {
        let (plans, sessions) = stores().await;
        sessions.upsert("s1", "u", "manufacturing").await.unwrap();

        let first = sample_plan("s1");
        plans.create_plan(&first).await.unwrap();
        assert_eq!(
            plans.active_plan("s1").await.unwrap().unwrap().plan_id,
            first.plan_id
        );

        plans
            .update_plan_status(&first.plan_id, PlanStatus::Completed)
            .await
            .unwrap();
        assert!(plans.active_plan("s1").await.unwrap().is_none());

        let second = sample_plan("s1");
        plans.create_plan(&second).await.unwrap();
        assert_eq!(
            plans.active_plan("s1").await.unwrap().unwrap().plan_id,
            second.plan_id
        );
    }

    #[tokio::test]
    async fn active_plan_is_session_scoped() {
        let (plans, sessions) = stores().await;
        sessions.upsert("s1", "u", "manufacturing").await.unwrap();
        sessions.upsert("s2", "u", "manufacturing").await.unwrap();

        plans.create_plan(&sample_plan("s1")).await.unwrap();
        assert!(plans.active_plan("s2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_unknown_action_fails() {
        let (plans, sessions) = stores().await;
        sessions.upsert("s1", "u", "manufacturing").await.unwrap();
        let plan = sample_plan("s1");
        plans.create_plan(&plan).await.unwrap();

        let err = plans
            .update_action_status(&plan.plan_id, "ghost", ActionStatus::Starting, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ActionNotFound(_)));
    }
}
