use serde::Deserialize;
use serde::Serialize;
use sqlx::Executor;
use sqlx::Postgres;
use uuid::Uuid;

use crate::domain::Channel;

pub mod executor;
pub mod ingest;
pub mod outbox;
pub mod retention;
pub mod scheduler;

/// What one pass of a job-driven worker loop did; drives the idle sleep.
#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    TaskCompleted,
    EmptyQueue,
}

/// The structured blob stored in `outbox_messages.payload`: everything a
/// sender needs, frozen at creation time so the send does not depend on any
/// row that might change underneath it.
#[derive(Debug, Serialize, Deserialize)]
pub struct OutboxPayload {
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
}

/// Insert one durable send intent. Callers pass their open transaction so
/// the outbox row commits (or rolls back) together with the task transition
/// it belongs to.
pub async fn create_outbox_message<'a, E>(
    executor: E,
    task_id: Option<Uuid>,
    user_id: Uuid,
    channel: Channel,
    payload: &OutboxPayload,
) -> Result<Uuid, anyhow::Error>
where
    E: Executor<'a, Database = Postgres>,
{
    let outbox_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO outbox_messages
            (outbox_id, task_id, user_id, channel, payload, status, attempts, next_retry_at)
        VALUES ($1, $2, $3, $4, $5, 'queued', 0, now())
    "#,
    )
    .bind(outbox_id)
    .bind(task_id)
    .bind(user_id)
    .bind(channel.as_str())
    .bind(serde_json::to_value(payload)?)
    .execute(executor)
    .await?;
    Ok(outbox_id)
}
