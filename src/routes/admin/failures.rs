use actix_web::web;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use anyhow::Context;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use sqlx::FromRow;
use sqlx::PgPool;
use uuid::Uuid;

use super::authorize;
use super::AdminError;
use crate::configuration::AdminSettings;
use crate::domain::OutboxStatus;
use crate::domain::TaskStatus;

#[derive(Serialize, FromRow)]
pub struct FailedTaskRow {
    task_id: Uuid,
    user_id: Uuid,
    due_at: Option<DateTime<Utc>>,
    action_type: String,
    contact_hint: String,
    context: String,
    attempt_count: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

/// `GET /admin/tasks/failed`
#[tracing::instrument(skip_all)]
pub async fn list_failed_tasks(
    request: HttpRequest,
    pool: web::Data<PgPool>,
    admin: web::Data<AdminSettings>,
) -> Result<HttpResponse, AdminError> {
    authorize(&request, &admin)?;
    let rows = sqlx::query_as::<_, FailedTaskRow>(
        r#"
        SELECT task_id, user_id, due_at, action_type, contact_hint, context,
               attempt_count, last_attempt_at, updated_at
        FROM tasks
        WHERE status = $1
        ORDER BY updated_at DESC
        LIMIT 200
    "#,
    )
    .bind(TaskStatus::Failed.as_str())
    .fetch_all(pool.get_ref())
    .await
    .context("Failed to list failed tasks")?;
    Ok(HttpResponse::Ok().json(rows))
}

#[derive(Serialize, FromRow)]
pub struct FailedOutboxRow {
    outbox_id: Uuid,
    task_id: Option<Uuid>,
    user_id: Uuid,
    channel: String,
    payload: serde_json::Value,
    attempts: i32,
    updated_at: DateTime<Utc>,
}

/// `GET /admin/outbox/failed`
#[tracing::instrument(skip_all)]
pub async fn list_failed_outbox(
    request: HttpRequest,
    pool: web::Data<PgPool>,
    admin: web::Data<AdminSettings>,
) -> Result<HttpResponse, AdminError> {
    authorize(&request, &admin)?;
    let rows = sqlx::query_as::<_, FailedOutboxRow>(
        r#"
        SELECT outbox_id, task_id, user_id, channel, payload, attempts, updated_at
        FROM outbox_messages
        WHERE status = $1
        ORDER BY updated_at DESC
        LIMIT 200
    "#,
    )
    .bind(OutboxStatus::Failed.as_str())
    .fetch_all(pool.get_ref())
    .await
    .context("Failed to list failed outbox rows")?;
    Ok(HttpResponse::Ok().json(rows))
}
