use std::time::Duration;

use sqlx::FromRow;
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::record_event;
use crate::configuration::Settings;
use crate::domain::EventType;
use crate::queue::enqueue_job;
use crate::queue::JobKind;
use crate::startup::get_connection_pool;

#[derive(FromRow)]
pub struct ClaimedTask {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub due_at: chrono::DateTime<chrono::Utc>,
}

/// To be run as a separate worker, outside the main API. One tick per
/// interval; a slow tick delays the next one rather than overlapping it.
pub async fn init_scheduler(cfg: Settings) -> Result<(), anyhow::Error> {
    let pool = get_connection_pool(&cfg.database);
    let mut ticker =
        tokio::time::interval(Duration::from_secs(cfg.pipeline.scheduler_tick_seconds.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match run_scheduler_tick(&pool, cfg.pipeline.scheduler_batch_size).await {
            Ok(claimed) if !claimed.is_empty() => {
                tracing::info!(count = claimed.len(), "marked tasks due")
            }
            Ok(_) => {}
            Err(e) => tracing::error!(e.cause_chain=?e, "scheduler tick failed"),
        }
    }
}

/// Claim up to `batch_size` past-due pending tasks and enqueue their execute
/// jobs, atomically.
///
/// The claim and the job inserts share one transaction: a crash between them
/// cannot strand a task in `due` with no job. Concurrent replicas running the
/// same statement skip each other's locked rows, so no task is ever claimed
/// twice; whatever doesn't fit in the batch waits for the next tick.
#[tracing::instrument(skip(pool))]
pub async fn run_scheduler_tick(
    pool: &PgPool,
    batch_size: i64,
) -> Result<Vec<ClaimedTask>, anyhow::Error> {
    let mut transaction = pool.begin().await?;

    let mut claimed = sqlx::query_as::<_, ClaimedTask>(
        r#"
        UPDATE tasks
        SET status = 'due', updated_at = now()
        WHERE task_id IN (
            SELECT task_id FROM tasks
            WHERE status = 'pending'
              AND due_at <= now()
            ORDER BY due_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING task_id, user_id, due_at
    "#,
    )
    .bind(batch_size)
    .fetch_all(&mut *transaction)
    .await?;
    // UPDATE ... RETURNING has no defined order; downstream wants earliest-due
    // first
    claimed.sort_by_key(|t| t.due_at);

    for task in &claimed {
        enqueue_job(
            &mut *transaction,
            JobKind::Execute,
            &format!("exec:{}", task.task_id),
            serde_json::json!({ "task_id": task.task_id }),
        )
        .await?;
    }
    transaction.commit().await?;

    // audit writes stay outside the transaction: they must never undo a claim
    for task in &claimed {
        record_event(
            pool,
            task.task_id,
            task.user_id,
            EventType::Due,
            serde_json::json!({}),
        )
        .await;
    }
    Ok(claimed)
}
