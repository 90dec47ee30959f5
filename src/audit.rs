use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::EventType;

/// Append one audit row for a task transition. Failures are logged and
/// swallowed: the audit trail is observability, and must never take a
/// state-machine transition down with it.
pub async fn record_event(
    pool: &PgPool,
    task_id: Uuid,
    user_id: Uuid,
    event_type: EventType,
    payload: serde_json::Value,
) {
    let result = sqlx::query(
        r#"
        INSERT INTO task_events (event_id, task_id, user_id, event_type, payload)
        VALUES ($1, $2, $3, $4, $5)
    "#,
    )
    .bind(Uuid::new_v4())
    .bind(task_id)
    .bind(user_id)
    .bind(event_type.as_str())
    .bind(payload)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(
            e.cause_chain=?e,
            %task_id,
            event_type=%event_type,
            "failed to record task event"
        );
    }
}
