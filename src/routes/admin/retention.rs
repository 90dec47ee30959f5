use actix_web::web;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use anyhow::Context;
use sqlx::PgPool;

use super::authorize;
use super::AdminError;
use crate::configuration::AdminSettings;
use crate::configuration::PipelineSettings;
use crate::workers::retention::redact_expired_inbound;

/// `POST /admin/retention/run` — run the retention sweep now instead of
/// waiting for the periodic worker
#[tracing::instrument(skip_all)]
pub async fn run_retention(
    request: HttpRequest,
    pool: web::Data<PgPool>,
    admin: web::Data<AdminSettings>,
    pipeline: web::Data<PipelineSettings>,
) -> Result<HttpResponse, AdminError> {
    authorize(&request, &admin)?;
    let redacted = redact_expired_inbound(pool.get_ref(), pipeline.retention_days)
        .await
        .context("Failed to run retention sweep")?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "redacted": redacted })))
}
