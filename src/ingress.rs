use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::redact_pii;
use crate::domain::Channel;
use crate::queue::enqueue_job;
use crate::queue::JobKind;
use crate::users::resolve_active_user;

/// One validated webhook event, channel differences already flattened away.
#[derive(Debug)]
pub struct InboundEvent {
    pub channel: Channel,
    pub provider_message_id: String,
    pub sender_address: String,
    pub text: String,
    pub subject: Option<String>,
}

/// What the webhook response reports per event. `Accepted` means the row is
/// durable and an ingest job exists; everything else means we deliberately
/// did nothing.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngressOutcome {
    Accepted { inbound_id: Uuid },
    Duplicate,
    Ignored { reason: &'static str },
}

/// Persist one inbound event and enqueue its ingest job.
///
/// The UNIQUE constraint on `idempotency_key` is the authoritative dedup:
/// webhook retries race here freely and exactly one caller sees
/// `rows_affected > 0`. Text is scrubbed before it ever reaches the store.
#[tracing::instrument(
    skip_all,
    fields(
        channel=%event.channel,
        provider_message_id=%event.provider_message_id,
    )
)]
pub async fn accept_inbound(
    pool: &PgPool,
    event: &InboundEvent,
) -> Result<IngressOutcome, anyhow::Error> {
    let user = match resolve_active_user(pool, event.channel, &event.sender_address).await? {
        Some(user) => user,
        None => {
            return Ok(IngressOutcome::Ignored {
                reason: "unknown_sender",
            })
        }
    };

    let idempotency_key = format!("{}:{}", user.user_id, event.provider_message_id);
    let inbound_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO inbound_messages
            (inbound_id, user_id, channel, provider_message_id, idempotency_key,
             raw_text_redacted, subject, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'received')
        ON CONFLICT (idempotency_key) DO NOTHING
    "#,
    )
    .bind(inbound_id)
    .bind(user.user_id)
    .bind(event.channel.as_str())
    .bind(&event.provider_message_id)
    .bind(&idempotency_key)
    .bind(redact_pii(&event.text))
    .bind(&event.subject)
    .execute(pool)
    .await?;

    if inserted.rows_affected() == 0 {
        // someone else (or a previous delivery of the same webhook) won
        return Ok(IngressOutcome::Duplicate);
    }

    // second-layer dedup: the job identity is the idempotency key, so even a
    // crash between the insert above and this enqueue is healed by the
    // provider's retry without creating a second job
    enqueue_job(
        pool,
        JobKind::Ingest,
        &idempotency_key,
        serde_json::json!({
            "inbound_id": inbound_id,
            "user_id": user.user_id,
        }),
    )
    .await?;

    Ok(IngressOutcome::Accepted { inbound_id })
}
