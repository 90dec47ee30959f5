use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sqlx::FromRow;
use sqlx::PgPool;
use sqlx::Row;
use uuid::Uuid;

use super::create_outbox_message;
use super::ExecutionOutcome;
use super::OutboxPayload;
use crate::audit::record_event;
use crate::configuration::Settings;
use crate::domain::ActionType;
use crate::domain::Channel;
use crate::domain::DisplayName;
use crate::domain::EventType;
use crate::domain::TaskStatus;
use crate::extraction::Draft;
use crate::extraction::ExtractionClient;
use crate::queue::dequeue;
use crate::queue::finish_job;
use crate::queue::retry_job_later;
use crate::queue::JobKind;
use crate::startup::get_connection_pool;
use crate::users::get_preferences;
use crate::users::get_user;
use crate::users::PreferencesRecord;
use crate::users::UserRecord;

#[derive(Deserialize)]
struct ExecuteJobPayload {
    task_id: Uuid,
}

#[derive(FromRow)]
struct TaskRow {
    user_id: Uuid,
    source_inbound_id: Option<Uuid>,
    action_type: String,
    contact_hint: String,
    context: String,
    status: String,
    attempt_count: i32,
}

/// To be run as a separate worker, outside the main API.
pub async fn init_executor_workers(cfg: Settings) -> Result<(), anyhow::Error> {
    let pool = get_connection_pool(&cfg.database);
    let drafter = Arc::new(ExtractionClient::new(
        cfg.extractor.base_url.clone(),
        cfg.extractor.api_key.clone(),
        cfg.extractor.timeout(),
    ));

    let mut handlers = tokio::task::JoinSet::new();
    for _ in 0..cfg.pipeline.worker_concurrency.max(1) {
        let pool = pool.clone();
        let drafter = drafter.clone();
        handlers.spawn(async move { executor_loop(&pool, &drafter).await });
    }
    while let Some(joined) = handlers.join_next().await {
        joined??;
    }
    Ok(())
}

async fn executor_loop(
    pool: &PgPool,
    drafter: &ExtractionClient,
) -> Result<(), anyhow::Error> {
    loop {
        match try_execute_one(pool, drafter).await {
            Ok(ExecutionOutcome::TaskCompleted) => {}
            Ok(ExecutionOutcome::EmptyQueue) => tokio::time::sleep(Duration::from_secs(1)).await,
            Err(e) => {
                tracing::error!(e.cause_chain=?e, "executor worker pass failed");
                tokio::time::sleep(Duration::from_secs(1)).await
            }
        }
    }
}

/// Claim and run one execute job.
#[tracing::instrument(skip_all, fields(task_id=tracing::field::Empty), err)]
pub async fn try_execute_one(
    pool: &PgPool,
    drafter: &ExtractionClient,
) -> Result<ExecutionOutcome, anyhow::Error> {
    let Some((transaction, job)) = dequeue(pool, JobKind::Execute).await? else {
        return Ok(ExecutionOutcome::EmptyQueue);
    };

    let params: ExecuteJobPayload = match serde_json::from_value(job.payload.clone()) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(e.cause_chain=?e, job_id=%job.job_id, "dropping malformed execute job");
            finish_job(transaction, job.job_id).await?;
            return Ok(ExecutionOutcome::TaskCompleted);
        }
    };
    tracing::Span::current().record("task_id", tracing::field::display(params.task_id));

    match execute_task(pool, drafter, params.task_id).await {
        Ok(()) => finish_job(transaction, job.job_id).await?,
        Err(e) => {
            tracing::warn!(e.cause_chain=?e, task_id=%params.task_id, "execution failed, re-queueing");
            retry_job_later(transaction, job.job_id, job.attempts).await?;
        }
    }
    Ok(ExecutionOutcome::TaskCompleted)
}

/// `due -> executing -> sending`, producing the outbox row in between.
///
/// The claim accepts `executing` as well as `due`: only one execute job
/// exists per task (its identity is `exec:<task_id>`), so re-entering after
/// a crash mid-handler is single-threaded by construction, and a replay
/// after the `sending` flip committed gates out below.
async fn execute_task(
    pool: &PgPool,
    drafter: &ExtractionClient,
    task_id: Uuid,
) -> Result<(), anyhow::Error> {
    let mut transaction = pool.begin().await?;
    let task = sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT user_id, source_inbound_id, action_type, contact_hint, context,
               status, attempt_count
        FROM tasks
        WHERE task_id = $1
        FOR UPDATE
    "#,
    )
    .bind(task_id)
    .fetch_optional(&mut *transaction)
    .await?;

    let task = match task {
        Some(task) => task,
        None => {
            tracing::warn!(%task_id, "execute job for unknown task");
            return Ok(());
        }
    };
    let status = TaskStatus::parse(&task.status).map_err(|e| anyhow::anyhow!(e))?;
    let first_attempt = match status {
        TaskStatus::Due => true,
        TaskStatus::Executing => false, // crashed mid-handler last time
        _ => return Ok(()),             // queue replay after completion
    };

    sqlx::query(
        r#"
        UPDATE tasks
        SET status = 'executing', attempt_count = attempt_count + 1,
            last_attempt_at = now(), updated_at = now()
        WHERE task_id = $1
    "#,
    )
    .bind(task_id)
    .execute(&mut *transaction)
    .await?;
    transaction.commit().await?;

    if first_attempt {
        record_event(
            pool,
            task_id,
            task.user_id,
            EventType::Executing,
            serde_json::json!({ "attempt": task.attempt_count + 1 }),
        )
        .await;
    }

    let user = match get_user(pool, task.user_id).await? {
        Some(user) => user,
        None => {
            // nobody to remind and nobody to send to; terminal
            fail_task(pool, task_id, task.user_id, "user record disappeared").await?;
            return Ok(());
        }
    };
    let prefs = get_preferences(pool, task.user_id).await?;
    let action_type = ActionType::parse(&task.action_type).map_err(|e| anyhow::anyhow!(e))?;

    let channel = resolve_channel(pool, task.source_inbound_id, &prefs).await?;
    let recipient = match user.address_on(channel).or(user.address_on(fallback(&prefs))) {
        Some(address) => address.to_string(),
        None => {
            fail_task(pool, task_id, task.user_id, "user has no deliverable address").await?;
            return Ok(());
        }
    };

    let (subject, body) =
        build_message(pool, drafter, task_id, &task, &user, &prefs, action_type).await;

    let payload = OutboxPayload {
        to: recipient,
        subject: matches!(channel, Channel::Email).then_some(subject),
        body,
    };

    // outbox row and the sending flip land together or not at all
    let mut transaction = pool.begin().await?;
    let outbox_id =
        create_outbox_message(&mut *transaction, Some(task_id), task.user_id, channel, &payload)
            .await?;
    sqlx::query(
        r#"
        UPDATE tasks
        SET status = 'sending', updated_at = now()
        WHERE task_id = $1 AND status = 'executing'
    "#,
    )
    .bind(task_id)
    .execute(&mut *transaction)
    .await?;
    transaction.commit().await?;

    record_event(
        pool,
        task_id,
        task.user_id,
        EventType::Sending,
        serde_json::json!({ "outbox_id": outbox_id }),
    )
    .await;
    Ok(())
}

/// The originating channel when there is one, the preference fallback when
/// the task came from nowhere in particular
async fn resolve_channel(
    pool: &PgPool,
    source_inbound_id: Option<Uuid>,
    prefs: &PreferencesRecord,
) -> Result<Channel, anyhow::Error> {
    if let Some(inbound_id) = source_inbound_id {
        let row = sqlx::query("SELECT channel FROM inbound_messages WHERE inbound_id = $1")
            .bind(inbound_id)
            .fetch_optional(pool)
            .await?;
        if let Some(row) = row {
            return Channel::parse(&row.get::<String, _>("channel")).map_err(|e| anyhow::anyhow!(e));
        }
    }
    Ok(fallback(prefs))
}

fn fallback(prefs: &PreferencesRecord) -> Channel {
    Channel::parse(&prefs.fallback_channel).unwrap_or(Channel::Email)
}

/// Build `(subject, body)` for the action. Drafter calls are best-effort: a
/// failure degrades to the deterministic template instead of failing the
/// task.
async fn build_message(
    pool: &PgPool,
    drafter: &ExtractionClient,
    task_id: Uuid,
    task: &TaskRow,
    user: &UserRecord,
    prefs: &PreferencesRecord,
    action_type: ActionType,
) -> (String, String) {
    let contact = match task.contact_hint.trim().is_empty() {
        true => "your contact".to_string(),
        false => task.contact_hint.clone(),
    };
    // the name was validated when the account was provisioned, but we cannot
    // assume it still is by the time we read it back
    let display_name = DisplayName::parse(user.display_name.clone())
        .unwrap_or_else(|e| {
            tracing::warn!(error=%e, user_id=%user.user_id, "unusable display name");
            DisplayName::parse("there".to_string()).unwrap()
        });

    match action_type {
        ActionType::Remind => (
            format!("Reminder: follow up with {contact}"),
            reminder_body(display_name.as_ref(), &contact, &task.context),
        ),
        ActionType::RemindAndDraft | ActionType::Send => {
            let tone = crate::domain::Tone::parse_or_default(&prefs.tone);
            let draft = match drafter.draft(&task.contact_hint, &task.context, tone).await {
                Ok(draft) => {
                    record_event(
                        pool,
                        task_id,
                        task.user_id,
                        EventType::DraftGenerated,
                        serde_json::json!({ "subject": draft.subject }),
                    )
                    .await;
                    draft
                }
                Err(e) => {
                    tracing::warn!(e.cause_chain=?e, "drafter unavailable, using fallback draft");
                    fallback_draft(&contact, &task.context)
                }
            };
            match action_type {
                ActionType::Send => (draft.subject, draft.body),
                _ => (
                    draft.subject,
                    format!(
                        "Time to follow up with {contact}. Here is a draft you can use:\n\n{}",
                        draft.body
                    ),
                ),
            }
        }
    }
}

fn reminder_body(
    display_name: &str,
    contact: &str,
    context: &str,
) -> String {
    match context.trim().is_empty() {
        true => format!("Hi {display_name}, this is your reminder to follow up with {contact}."),
        false => format!(
            "Hi {display_name}, this is your reminder to follow up with {contact} about {context}."
        ),
    }
}

fn fallback_draft(
    contact: &str,
    context: &str,
) -> Draft {
    let body = match context.trim().is_empty() {
        true => format!("Hi {contact}, just checking in on this. Any update on your end?"),
        false => format!("Hi {contact}, just checking in about {context}. Any update on your end?"),
    };
    Draft {
        subject: format!("Following up with {contact}"),
        body,
    }
}

async fn fail_task(
    pool: &PgPool,
    task_id: Uuid,
    user_id: Uuid,
    reason: &str,
) -> Result<(), anyhow::Error> {
    tracing::error!(%task_id, reason, "failing task");
    sqlx::query(
        r#"
        UPDATE tasks
        SET status = 'failed', updated_at = now()
        WHERE task_id = $1 AND status = 'executing'
    "#,
    )
    .bind(task_id)
    .execute(pool)
    .await?;
    record_event(
        pool,
        task_id,
        user_id,
        EventType::Failed,
        serde_json::json!({ "reason": reason }),
    )
    .await;
    Ok(())
}
