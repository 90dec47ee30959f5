use chrono::Duration;
use chrono::Utc;
use sqlx::Executor;
use sqlx::FromRow;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Transaction;
use uuid::Uuid;

pub type PgTransaction = Transaction<'static, Postgres>;

/// What a worker pulls off the `jobs` table. The row stays locked by the
/// transaction that dequeued it until the handler finishes or dies.
#[derive(Debug, FromRow)]
pub struct Job {
    pub job_id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Ingest,
    Execute,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Execute => "execute",
        }
    }
}

/// Enqueue a job under a caller-supplied identity. A second enqueue with the
/// same `job_key` is dropped on the floor; the unique index is the dedup.
///
/// Takes any executor so callers can enqueue inside their own transaction
/// (the scheduler claims tasks and enqueues their jobs atomically).
#[tracing::instrument(skip(executor, payload))]
pub async fn enqueue_job<'a, E>(
    executor: E,
    kind: JobKind,
    job_key: &str,
    payload: serde_json::Value,
) -> Result<(), anyhow::Error>
where
    E: Executor<'a, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO jobs (job_id, kind, job_key, payload)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (job_key) DO NOTHING
    "#,
    )
    .bind(Uuid::new_v4())
    .bind(kind.as_str())
    .bind(job_key)
    .bind(payload)
    .execute(executor)
    .await?;
    Ok(())
}

/// Claim one runnable job of `kind`, returning it together with the open
/// transaction that holds its row lock. Concurrent workers skip each other's
/// claims; a worker that dies simply drops the transaction and the row
/// becomes claimable again.
pub async fn dequeue(
    pool: &PgPool,
    kind: JobKind,
) -> Result<Option<(PgTransaction, Job)>, anyhow::Error> {
    let mut transaction = pool.begin().await?;
    let job = sqlx::query_as::<_, Job>(
        r#"
        SELECT job_id, kind, payload, attempts
        FROM jobs
        WHERE kind = $1 AND run_at <= now()
        ORDER BY run_at

        FOR UPDATE -- lock currently selected row
        SKIP LOCKED -- don't select currently locked rows

        LIMIT 1
    "#,
    )
    .bind(kind.as_str())
    .fetch_optional(&mut *transaction)
    .await?;

    Ok(job.map(|j| (transaction, j)))
}

/// The handler succeeded: drop the row and release the lock.
pub async fn finish_job(
    mut transaction: PgTransaction,
    job_id: Uuid,
) -> Result<(), anyhow::Error> {
    sqlx::query("DELETE FROM jobs WHERE job_id = $1")
        .bind(job_id)
        .execute(&mut *transaction)
        .await?;
    transaction.commit().await?;
    Ok(())
}

/// The handler failed on something recoverable: push the row into the future
/// and release the lock. There is no terminal state here; a job retries until
/// its handler's own state gates turn it into a no-op.
pub async fn retry_job_later(
    mut transaction: PgTransaction,
    job_id: Uuid,
    attempts: i32,
) -> Result<(), anyhow::Error> {
    let run_at = Utc::now() + retry_delay(attempts + 1);
    sqlx::query(
        r#"
        UPDATE jobs
        SET attempts = $2, run_at = $3
        WHERE job_id = $1
    "#,
    )
    .bind(job_id)
    .bind(attempts + 1)
    .bind(run_at)
    .execute(&mut *transaction)
    .await?;
    transaction.commit().await?;
    Ok(())
}

/// 10 s, 20 s, 40 s, ... capped at 10 min.
fn retry_delay(attempts: i32) -> Duration {
    let exp = attempts.clamp(1, 16) as u32;
    let seconds = (5_i64 << exp).min(600);
    Duration::seconds(seconds)
}
