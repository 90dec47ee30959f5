// this worker is solely responsible for periodically blanking the stored
// text of old inbound rows; the rows themselves stay (they anchor the
// idempotency key forever)

use std::time::Duration as StdDuration;

use chrono::Duration;
use chrono::Utc;
use sqlx::PgPool;

use crate::configuration::Settings;
use crate::domain::RETENTION_MARKER;
use crate::startup::get_connection_pool;

/// Replace `raw_text_redacted` with the retention marker on every inbound
/// row older than `retention_days`. Also callable from the admin surface.
pub async fn redact_expired_inbound(
    pool: &PgPool,
    retention_days: i64,
) -> Result<u64, anyhow::Error> {
    let cutoff = Utc::now() - Duration::days(retention_days);
    let result = sqlx::query(
        r#"
        UPDATE inbound_messages
        SET raw_text_redacted = $2
        WHERE received_at < $1 AND raw_text_redacted <> $2
    "#,
    )
    .bind(cutoff)
    .bind(RETENTION_MARKER)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

async fn retention_loop(
    pool: &PgPool,
    retention_days: i64,
) -> Result<(), anyhow::Error> {
    loop {
        match redact_expired_inbound(pool, retention_days).await {
            Err(e) => {
                tracing::error!(e.cause_chain=?e, "retention sweep failed");
                tokio::time::sleep(StdDuration::from_secs(60)).await
            }
            Ok(redacted) => {
                if redacted > 0 {
                    tracing::info!(redacted, "retention sweep blanked old inbound text");
                }
                tokio::time::sleep(StdDuration::from_secs(3600)).await
            }
        }
    }
}

/// To be run as a separate worker, outside the main API
pub async fn init_retention_worker(cfg: Settings) -> Result<(), anyhow::Error> {
    let pool = get_connection_pool(&cfg.database);
    retention_loop(&pool, cfg.pipeline.retention_days).await
}
