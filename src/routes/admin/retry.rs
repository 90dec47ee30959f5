use actix_web::web;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use anyhow::Context;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::Row;
use uuid::Uuid;

use super::authorize;
use super::AdminError;
use crate::audit::record_event;
use crate::configuration::AdminSettings;
use crate::domain::EventType;
use crate::queue::enqueue_job;
use crate::queue::JobKind;

/// `POST /admin/tasks/{task_id}/retry`
///
/// `failed -> due` is the one backwards edge in the task graph, and only this
/// handler drives it. The status guard in the UPDATE makes a double-retry a
/// 409 instead of a double-execution, and the job identity carries a
/// timestamp so the queue's dedup doesn't mistake it for an old job.
#[tracing::instrument(skip(request, pool, admin))]
pub async fn retry_task(
    request: HttpRequest,
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
    admin: web::Data<AdminSettings>,
) -> Result<HttpResponse, AdminError> {
    authorize(&request, &admin)?;
    let task_id = path.into_inner();

    let row = sqlx::query(
        r#"
        UPDATE tasks
        SET status = 'due', attempt_count = 0, updated_at = now()
        WHERE task_id = $1 AND status = 'failed'
        RETURNING user_id
    "#,
    )
    .bind(task_id)
    .fetch_optional(pool.get_ref())
    .await
    .context("Failed to reset task")?;

    let user_id: Uuid = match row {
        Some(row) => row.get("user_id"),
        None => {
            let exists = sqlx::query("SELECT 1 FROM tasks WHERE task_id = $1")
                .bind(task_id)
                .fetch_optional(pool.get_ref())
                .await
                .context("Failed to look up task")?
                .is_some();
            return Err(match exists {
                true => AdminError::Conflict("task is not in a failed state".into()),
                false => AdminError::NotFound,
            });
        }
    };

    let job_key = format!("retry:{}:{}", task_id, Utc::now().timestamp());
    enqueue_job(
        pool.get_ref(),
        JobKind::Execute,
        &job_key,
        serde_json::json!({ "task_id": task_id }),
    )
    .await
    .context("Failed to enqueue execute job")?;

    record_event(
        pool.get_ref(),
        task_id,
        user_id,
        EventType::Retried,
        serde_json::json!({ "source": "admin" }),
    )
    .await;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "task_id": task_id, "status": "due" })))
}

/// `POST /admin/outbox/{outbox_id}/retry`
///
/// The only way a `failed` outbox row ever moves again.
#[tracing::instrument(skip(request, pool, admin))]
pub async fn retry_outbox(
    request: HttpRequest,
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
    admin: web::Data<AdminSettings>,
) -> Result<HttpResponse, AdminError> {
    authorize(&request, &admin)?;
    let outbox_id = path.into_inner();

    let updated = sqlx::query(
        r#"
        UPDATE outbox_messages
        SET status = 'queued', attempts = 0, next_retry_at = now(), updated_at = now()
        WHERE outbox_id = $1 AND status = 'failed'
    "#,
    )
    .bind(outbox_id)
    .execute(pool.get_ref())
    .await
    .context("Failed to reset outbox row")?;

    if updated.rows_affected() == 0 {
        let exists = sqlx::query("SELECT 1 FROM outbox_messages WHERE outbox_id = $1")
            .bind(outbox_id)
            .fetch_optional(pool.get_ref())
            .await
            .context("Failed to look up outbox row")?
            .is_some();
        return Err(match exists {
            true => AdminError::Conflict("outbox row is not in a failed state".into()),
            false => AdminError::NotFound,
        });
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "outbox_id": outbox_id, "status": "queued" })))
}
