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

#[derive(Serialize, FromRow)]
pub struct TaskEventRow {
    event_id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

/// `GET /admin/tasks/{task_id}/events` — the audit trail, oldest first
#[tracing::instrument(skip(request, pool, admin))]
pub async fn list_task_events(
    request: HttpRequest,
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
    admin: web::Data<AdminSettings>,
) -> Result<HttpResponse, AdminError> {
    authorize(&request, &admin)?;
    let task_id = path.into_inner();
    let rows = sqlx::query_as::<_, TaskEventRow>(
        r#"
        SELECT event_id, event_type, payload, created_at
        FROM task_events
        WHERE task_id = $1
        ORDER BY created_at
    "#,
    )
    .bind(task_id)
    .fetch_all(pool.get_ref())
    .await
    .context("Failed to list task events")?;
    Ok(HttpResponse::Ok().json(rows))
}
