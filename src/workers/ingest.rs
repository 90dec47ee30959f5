use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;
use sqlx::FromRow;
use sqlx::PgPool;
use uuid::Uuid;

use super::create_outbox_message;
use super::ExecutionOutcome;
use super::OutboxPayload;
use crate::audit::record_event;
use crate::configuration::Settings;
use crate::domain::redact_pii;
use crate::domain::ActionType;
use crate::domain::Channel;
use crate::domain::EventType;
use crate::domain::TaskStatus;
use crate::extraction::ExtractError;
use crate::extraction::ExtractionClient;
use crate::extraction::ExtractionResult;
use crate::queue::dequeue;
use crate::queue::finish_job;
use crate::queue::retry_job_later;
use crate::queue::JobKind;
use crate::startup::get_connection_pool;
use crate::users::get_preferences;
use crate::users::get_user;

/// Once a flaky extractor has burned this many job attempts, stop retrying
/// and park the task as a clarification instead
const EXTRACTOR_RETRY_BUDGET: i32 = 3;

#[derive(Deserialize)]
struct IngestJobPayload {
    inbound_id: Uuid,
}

#[derive(FromRow)]
struct InboundRow {
    user_id: Uuid,
    channel: String,
    raw_text_redacted: String,
    subject: Option<String>,
    status: String,
}

/// To be run as a separate worker, outside the main API. Spawns the
/// configured number of concurrent handlers and runs until the process dies.
pub async fn init_ingest_workers(cfg: Settings) -> Result<(), anyhow::Error> {
    let pool = get_connection_pool(&cfg.database);
    let extractor = Arc::new(ExtractionClient::new(
        cfg.extractor.base_url.clone(),
        cfg.extractor.api_key.clone(),
        cfg.extractor.timeout(),
    ));

    let mut handlers = tokio::task::JoinSet::new();
    for _ in 0..cfg.pipeline.worker_concurrency.max(1) {
        let pool = pool.clone();
        let extractor = extractor.clone();
        handlers.spawn(async move { ingest_loop(&pool, &extractor).await });
    }
    // the loops never return; if one does, something is badly wrong
    while let Some(joined) = handlers.join_next().await {
        joined??;
    }
    Ok(())
}

async fn ingest_loop(
    pool: &PgPool,
    extractor: &ExtractionClient,
) -> Result<(), anyhow::Error> {
    loop {
        match try_ingest_one(pool, extractor).await {
            Ok(ExecutionOutcome::TaskCompleted) => {}
            Ok(ExecutionOutcome::EmptyQueue) => tokio::time::sleep(Duration::from_secs(1)).await,
            Err(e) => {
                tracing::error!(e.cause_chain=?e, "ingest worker pass failed");
                tokio::time::sleep(Duration::from_secs(1)).await
            }
        }
    }
}

/// Claim and run one ingest job. The job row stays locked while we work; a
/// handler error re-queues it with a delay, a crash rolls the claim back.
#[tracing::instrument(skip_all, fields(inbound_id=tracing::field::Empty), err)]
pub async fn try_ingest_one(
    pool: &PgPool,
    extractor: &ExtractionClient,
) -> Result<ExecutionOutcome, anyhow::Error> {
    let Some((transaction, job)) = dequeue(pool, JobKind::Ingest).await? else {
        return Ok(ExecutionOutcome::EmptyQueue);
    };

    let params: IngestJobPayload = match serde_json::from_value(job.payload.clone()) {
        Ok(p) => p,
        Err(e) => {
            // a payload we cannot even parse will never succeed; drop it
            tracing::error!(e.cause_chain=?e, job_id=%job.job_id, "dropping malformed ingest job");
            finish_job(transaction, job.job_id).await?;
            return Ok(ExecutionOutcome::TaskCompleted);
        }
    };
    tracing::Span::current().record("inbound_id", tracing::field::display(params.inbound_id));

    match ingest_inbound(pool, extractor, params.inbound_id, job.attempts).await {
        Ok(()) => finish_job(transaction, job.job_id).await?,
        Err(e) => {
            tracing::warn!(e.cause_chain=?e, inbound_id=%params.inbound_id, "ingest failed, re-queueing");
            retry_job_later(transaction, job.job_id, job.attempts).await?;
        }
    }
    Ok(ExecutionOutcome::TaskCompleted)
}

/// The ingest step itself: inbound `received` -> task + first outbox row ->
/// inbound `processed`, with the writes in one transaction so a replayed job
/// either sees `processed` (no-op) or redoes everything.
async fn ingest_inbound(
    pool: &PgPool,
    extractor: &ExtractionClient,
    inbound_id: Uuid,
    job_attempts: i32,
) -> Result<(), anyhow::Error> {
    let inbound = sqlx::query_as::<_, InboundRow>(
        r#"
        SELECT user_id, channel, raw_text_redacted, subject, status
        FROM inbound_messages
        WHERE inbound_id = $1
    "#,
    )
    .bind(inbound_id)
    .fetch_optional(pool)
    .await?;

    let inbound = match inbound {
        Some(row) if row.status == "received" => row,
        Some(_) => return Ok(()), // already processed; queue replay
        None => {
            tracing::warn!(%inbound_id, "ingest job for unknown inbound row");
            return Ok(());
        }
    };

    let user = match get_user(pool, inbound.user_id).await? {
        Some(user) => user,
        None => {
            tracing::error!(user_id=%inbound.user_id, "inbound row references a missing user");
            return Ok(());
        }
    };
    let prefs = get_preferences(pool, user.user_id).await?;
    let channel = Channel::parse(&inbound.channel).map_err(|e| anyhow::anyhow!(e))?;

    // ingress already scrubbed what it stored; scrubbing again costs nothing
    // and keeps this worker safe against rows written by older versions
    let safe_text = redact_pii(&inbound.raw_text_redacted);

    let extraction = match extractor.extract(&safe_text, &prefs.timezone, Utc::now()).await {
        Ok(result) => result,
        Err(ExtractError::Contract(reason)) => {
            // a malformed result will be malformed on the retry too
            tracing::warn!(%reason, "extractor broke its contract, falling back to clarification");
            ExtractionResult::fallback_clarification()
        }
        Err(e) if job_attempts + 1 < EXTRACTOR_RETRY_BUDGET => {
            // transient extractor trouble: let the queue retry the whole job
            return Err(anyhow::Error::new(e).context("extractor call failed"));
        }
        Err(e) => {
            tracing::warn!(
                e.cause_chain=?e,
                "extractor still failing after retries, falling back to clarification"
            );
            ExtractionResult::fallback_clarification()
        }
    };

    let recipient = user
        .address_on(channel)
        .ok_or_else(|| anyhow::anyhow!("user has no address on channel {channel}"))?
        .to_string();

    let task_id = Uuid::new_v4();
    let mut transaction = pool.begin().await?;

    let (status, events) = match extraction.needs_clarification {
        true => {
            insert_task(
                &mut transaction,
                task_id,
                &user.user_id,
                inbound_id,
                None,
                &extraction,
                TaskStatus::NeedsClarification,
            )
            .await?;
            let payload = OutboxPayload {
                to: recipient,
                subject: matches!(channel, Channel::Email)
                    .then(|| "Quick question about your follow-up".to_string()),
                body: extraction.clarifying_question.clone(),
            };
            create_outbox_message(&mut *transaction, Some(task_id), user.user_id, channel, &payload)
                .await?;
            (
                TaskStatus::NeedsClarification,
                vec![
                    (EventType::Created, serde_json::json!({ "status": "needs_clarification" })),
                    (
                        EventType::ClarificationSent,
                        serde_json::json!({ "question": extraction.clarifying_question }),
                    ),
                ],
            )
        }
        false => {
            let due_at = extraction
                .due_at
                .expect("contract: scheduled extraction carries a due_at");
            insert_task(
                &mut transaction,
                task_id,
                &user.user_id,
                inbound_id,
                Some(due_at),
                &extraction,
                TaskStatus::Pending,
            )
            .await?;
            let payload = OutboxPayload {
                to: recipient,
                subject: matches!(channel, Channel::Email)
                    .then(|| confirmation_subject(inbound.subject.as_deref())),
                body: confirmation_body(
                    extraction.action_type,
                    &extraction.contact_hint,
                    due_at,
                    &prefs.timezone,
                ),
            };
            create_outbox_message(&mut *transaction, Some(task_id), user.user_id, channel, &payload)
                .await?;
            (
                TaskStatus::Pending,
                vec![
                    (EventType::Created, serde_json::json!({ "action_type": extraction.action_type.as_str() })),
                    (EventType::Scheduled, serde_json::json!({ "due_at": due_at })),
                ],
            )
        }
    };

    sqlx::query("UPDATE inbound_messages SET status = 'processed' WHERE inbound_id = $1")
        .bind(inbound_id)
        .execute(&mut *transaction)
        .await?;
    transaction.commit().await?;

    tracing::info!(%task_id, status=%status, "created task from inbound message");
    for (event_type, payload) in events {
        record_event(pool, task_id, user.user_id, event_type, payload).await;
    }
    Ok(())
}

async fn insert_task(
    transaction: &mut crate::queue::PgTransaction,
    task_id: Uuid,
    user_id: &Uuid,
    inbound_id: Uuid,
    due_at: Option<DateTime<Utc>>,
    extraction: &ExtractionResult,
    status: TaskStatus,
) -> Result<(), anyhow::Error> {
    // source_inbound_id is UNIQUE: if a half-committed earlier run already
    // created this task the insert conflicts, and conflicting here is
    // impossible when the inbound flip committed (the status gate catches
    // that case first) -- so DO NOTHING is pure belt-and-braces
    sqlx::query(
        r#"
        INSERT INTO tasks
            (task_id, user_id, source_inbound_id, due_at, action_type,
             contact_hint, context, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_inbound_id) DO NOTHING
    "#,
    )
    .bind(task_id)
    .bind(user_id)
    .bind(inbound_id)
    .bind(due_at)
    .bind(extraction.action_type.as_str())
    .bind(&extraction.contact_hint)
    .bind(&extraction.context)
    .bind(status.as_str())
    .execute(&mut **transaction)
    .await?;
    Ok(())
}

fn confirmation_subject(inbound_subject: Option<&str>) -> String {
    match inbound_subject {
        Some(subject) if !subject.trim().is_empty() => format!("Re: {subject}"),
        _ => "Follow-up scheduled".to_string(),
    }
}

/// Confirmation copy, with the due instant rendered in the user's timezone
/// (falling back to UTC when the preference row holds rubbish)
fn confirmation_body(
    action_type: ActionType,
    contact_hint: &str,
    due_at: DateTime<Utc>,
    timezone: &str,
) -> String {
    let when = format_local(due_at, timezone);
    let who = match contact_hint.trim().is_empty() {
        true => "them".to_string(),
        false => contact_hint.to_string(),
    };
    match action_type {
        ActionType::Remind => {
            format!("Got it. I'll remind you to follow up with {who} on {when}.")
        }
        ActionType::RemindAndDraft => format!(
            "Got it. I'll remind you to follow up with {who} on {when}, with a draft ready to go."
        ),
        ActionType::Send => {
            format!("Got it. I'll send your follow-up to {who} on {when}.")
        }
    }
}

fn format_local(
    instant: DateTime<Utc>,
    timezone: &str,
) -> String {
    match timezone.parse::<Tz>() {
        Ok(tz) => instant
            .with_timezone(&tz)
            .format("%A, %B %-d at %-I:%M %p %Z")
            .to_string(),
        Err(_) => instant.format("%A, %B %-d at %-I:%M %p UTC").to_string(),
    }
}
