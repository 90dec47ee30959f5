use std::time::Duration as StdDuration;

use chrono::Duration;
use chrono::Utc;
use sqlx::FromRow;
use sqlx::PgPool;
use uuid::Uuid;

use super::OutboxPayload;
use crate::audit::record_event;
use crate::chat_client::ChatClient;
use crate::configuration::Settings;
use crate::domain::Channel;
use crate::domain::ChatNumber;
use crate::domain::EmailAddress;
use crate::domain::EventType;
use crate::email_client::EmailClient;
use crate::startup::get_connection_pool;

/// A claimed `sending` row whose `updated_at` is older than this many poll
/// periods belonged to a sender that died mid-send; the sweep re-queues it.
const STUCK_AFTER_POLLS: u32 = 10;

/// The per-channel send APIs, bundled so the poll loop and tests construct
/// them once.
pub struct SenderClients {
    pub email: EmailClient,
    pub chat: ChatClient,
}

impl SenderClients {
    pub fn from_settings(cfg: &Settings) -> Self {
        Self {
            email: EmailClient::new(
                cfg.email_client.base_url.clone(),
                cfg.email_client.sender().unwrap(),
                cfg.email_client.authorization_token.clone(),
                cfg.email_client.timeout(),
            ),
            chat: ChatClient::new(
                cfg.chat_client.base_url.clone(),
                cfg.chat_client.phone_number_id.clone(),
                cfg.chat_client.access_token.clone(),
                cfg.chat_client.timeout(),
            ),
        }
    }
}

#[derive(FromRow)]
pub struct ClaimedOutbox {
    outbox_id: Uuid,
    task_id: Option<Uuid>,
    user_id: Uuid,
    channel: String,
    payload: serde_json::Value,
    attempts: i32,
}

/// To be run as a separate worker, outside the main API.
pub async fn init_outbox_sender(cfg: Settings) -> Result<(), anyhow::Error> {
    let pool = get_connection_pool(&cfg.database);
    let clients = SenderClients::from_settings(&cfg);
    let poll_interval = StdDuration::from_millis(cfg.pipeline.outbox_poll_interval_ms.max(100));

    loop {
        if let Err(e) = run_outbox_poll(
            &pool,
            &clients,
            cfg.pipeline.outbox_batch_size,
            cfg.pipeline.outbox_max_attempts,
            cfg.pipeline.outbox_poll_interval_ms,
        )
        .await
        {
            tracing::error!(e.cause_chain=?e, "outbox poll failed");
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// One poll: sweep stuck claims back to `queued`, claim a batch, send each
/// row. Per-row outcomes never abort the batch.
#[tracing::instrument(skip(pool, clients))]
pub async fn run_outbox_poll(
    pool: &PgPool,
    clients: &SenderClients,
    batch_size: i64,
    max_attempts: i32,
    poll_interval_ms: u64,
) -> Result<usize, anyhow::Error> {
    requeue_stuck(pool, poll_interval_ms).await?;

    let claimed = sqlx::query_as::<_, ClaimedOutbox>(
        r#"
        UPDATE outbox_messages
        SET status = 'sending', updated_at = now()
        WHERE outbox_id IN (
            SELECT outbox_id FROM outbox_messages
            WHERE status = 'queued'
              AND next_retry_at <= now()
            ORDER BY next_retry_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING outbox_id, task_id, user_id, channel, payload, attempts
    "#,
    )
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    let count = claimed.len();
    for row in claimed {
        deliver(pool, clients, row, max_attempts).await;
    }
    Ok(count)
}

/// Rows stranded in `sending` by a crashed sender go back to `queued`. The
/// claim step is the only producer of `sending`, so anything old enough here
/// is dead, not slow.
async fn requeue_stuck(
    pool: &PgPool,
    poll_interval_ms: u64,
) -> Result<(), anyhow::Error> {
    let cutoff =
        Utc::now() - Duration::milliseconds((poll_interval_ms * STUCK_AFTER_POLLS as u64) as i64);
    let released = sqlx::query(
        r#"
        UPDATE outbox_messages
        SET status = 'queued', updated_at = now()
        WHERE status = 'sending' AND updated_at < $1
    "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    if released.rows_affected() > 0 {
        tracing::warn!(
            count = released.rows_affected(),
            "re-queued outbox rows stuck in sending"
        );
    }
    Ok(())
}

/// Send one claimed row and record the outcome. Errors inside are final for
/// this poll: they either re-queue the row with backoff or fail it for good.
#[tracing::instrument(skip_all, fields(outbox_id=%row.outbox_id, attempts=row.attempts))]
async fn deliver(
    pool: &PgPool,
    clients: &SenderClients,
    row: ClaimedOutbox,
    max_attempts: i32,
) {
    let send_result = send_row(clients, &row).await;

    let outcome = match send_result {
        Ok(()) => mark_sent(pool, &row).await,
        Err(e) => {
            tracing::warn!(error=%e, "send attempt failed");
            mark_failed_attempt(pool, &row, max_attempts, &e).await
        }
    };
    // a store error here leaves the row in `sending`; the stuck sweep picks
    // it up, at the price of a possible duplicate send (at-least-once)
    if let Err(e) = outcome {
        tracing::error!(e.cause_chain=?e, "failed to record send outcome");
    }
}

async fn send_row(
    clients: &SenderClients,
    row: &ClaimedOutbox,
) -> Result<(), String> {
    let channel = Channel::parse(&row.channel)?;
    let payload: OutboxPayload =
        serde_json::from_value(row.payload.clone()).map_err(|e| e.to_string())?;
    match channel {
        Channel::Email => {
            let recipient = EmailAddress::parse(payload.to)?;
            let subject = payload.subject.as_deref().unwrap_or("Follow-up");
            clients
                .email
                .send_email(&recipient, subject, &payload.body)
                .await
                .map_err(|e| e.to_string())
        }
        Channel::Chat => {
            let recipient = ChatNumber::parse(payload.to)?;
            clients
                .chat
                .send_text(&recipient, &payload.body)
                .await
                .map_err(|e| e.to_string())
        }
    }
}

async fn mark_sent(
    pool: &PgPool,
    row: &ClaimedOutbox,
) -> Result<(), anyhow::Error> {
    sqlx::query(
        r#"
        UPDATE outbox_messages
        SET status = 'sent', attempts = attempts + 1, updated_at = now()
        WHERE outbox_id = $1 AND status = 'sending'
    "#,
    )
    .bind(row.outbox_id)
    .execute(pool)
    .await?;

    if let Some(task_id) = row.task_id {
        // 'failed' is included for the admin path: re-sending a failed
        // outbox row successfully completes its task
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'done', updated_at = now()
            WHERE task_id = $1 AND status IN ('sending', 'failed')
        "#,
        )
        .bind(task_id)
        .execute(pool)
        .await?;
        record_event(
            pool,
            task_id,
            row.user_id,
            EventType::Sent,
            serde_json::json!({ "outbox_id": row.outbox_id, "attempts": row.attempts + 1 }),
        )
        .await;
        record_event(pool, task_id, row.user_id, EventType::Done, serde_json::json!({})).await;
    }
    tracing::info!("outbox row sent");
    Ok(())
}

async fn mark_failed_attempt(
    pool: &PgPool,
    row: &ClaimedOutbox,
    max_attempts: i32,
    error: &str,
) -> Result<(), anyhow::Error> {
    let new_attempts = row.attempts + 1;

    if new_attempts >= max_attempts {
        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'failed', attempts = $2, updated_at = now()
            WHERE outbox_id = $1 AND status = 'sending'
        "#,
        )
        .bind(row.outbox_id)
        .bind(new_attempts)
        .execute(pool)
        .await?;

        if let Some(task_id) = row.task_id {
            sqlx::query(
                r#"
                UPDATE tasks
                SET status = 'failed', updated_at = now()
                WHERE task_id = $1 AND status = 'sending'
            "#,
            )
            .bind(task_id)
            .execute(pool)
            .await?;
            record_event(
                pool,
                task_id,
                row.user_id,
                EventType::Failed,
                serde_json::json!({ "reason": error, "attempts": new_attempts }),
            )
            .await;
        }
        tracing::error!(attempts = new_attempts, "outbox row permanently failed");
        return Ok(());
    }

    let next_retry_at = Utc::now() + backoff(new_attempts);
    sqlx::query(
        r#"
        UPDATE outbox_messages
        SET status = 'queued', attempts = $2, next_retry_at = $3, updated_at = now()
        WHERE outbox_id = $1 AND status = 'sending'
    "#,
    )
    .bind(row.outbox_id)
    .bind(new_attempts)
    .bind(next_retry_at)
    .execute(pool)
    .await?;

    if let Some(task_id) = row.task_id {
        record_event(
            pool,
            task_id,
            row.user_id,
            EventType::Retried,
            serde_json::json!({
                "attempts": new_attempts,
                "next_retry_at": next_retry_at,
                "error": error,
            }),
        )
        .await;
    }
    Ok(())
}

/// Delay before retry `n`: `min(30_000 * 2^n, 600_000)` ms, so 60 s, 120 s,
/// 240 s, 480 s, then capped at 600 s.
pub fn backoff(attempts: i32) -> Duration {
    let exp = attempts.clamp(0, 16) as u32;
    let millis = (30_000_i64 << exp).min(600_000);
    Duration::milliseconds(millis)
}
