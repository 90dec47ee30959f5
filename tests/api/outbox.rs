use chrono::DateTime;
use chrono::Utc;
use nudge::workers::outbox::backoff;
use nudge::workers::outbox::run_outbox_poll;
use sqlx::Row;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;
use crate::helpers::TestAccount;
use crate::helpers::TestApp;

const MAX_ATTEMPTS: i32 = 5;
const POLL_MS: u64 = 5000;

async fn poll(app: &TestApp) -> usize {
    run_outbox_poll(&app.pool, &app.sender_clients(), 20, MAX_ATTEMPTS, POLL_MS)
        .await
        .unwrap()
}

/// The row's retry delay, measured from the store's own clocks
async fn retry_delta_ms(
    app: &TestApp,
    outbox_id: Uuid,
) -> i64 {
    let row = sqlx::query("SELECT next_retry_at, updated_at FROM outbox_messages WHERE outbox_id = $1")
        .bind(outbox_id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    (row.get::<DateTime<Utc>, _>("next_retry_at") - row.get::<DateTime<Utc>, _>("updated_at"))
        .num_milliseconds()
}

async fn make_due_now(
    app: &TestApp,
    outbox_id: Uuid,
) {
    sqlx::query("UPDATE outbox_messages SET next_retry_at = now() WHERE outbox_id = $1")
        .bind(outbox_id)
        .execute(&app.pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn four_failures_then_success_follows_the_backoff_schedule() {
    let app = spawn_app().await;
    let alice = TestAccount::generate();
    alice.store(&app.pool, "UTC", "email").await;
    let task_id = app
        .seed_task(alice.user_id, None, Some(Utc::now()), "remind", "Dana", "", "sending")
        .await;
    let outbox_id = app
        .seed_outbox(Some(task_id), alice.user_id, "email", &alice.email, "queued")
        .await;

    // provider throws four 5xx, then accepts
    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(4)
        .mount(&app.email_server)
        .await;
    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    for (expected_attempts, expected_backoff_ms) in
        [(1, 60_000), (2, 120_000), (3, 240_000), (4, 480_000)]
    {
        assert_eq!(poll(&app).await, 1);

        let row = sqlx::query("SELECT status, attempts FROM outbox_messages WHERE outbox_id = $1")
            .bind(outbox_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("status"), "queued");
        assert_eq!(row.get::<i32, _>("attempts"), expected_attempts);

        // next_retry_at - failure instant within [backoff, backoff + eps]
        let delta = retry_delta_ms(&app, outbox_id).await;
        assert_eq!(
            backoff(expected_attempts).num_milliseconds(),
            expected_backoff_ms
        );
        assert!(
            (expected_backoff_ms - 5_000..=expected_backoff_ms + 5_000).contains(&delta),
            "attempt {expected_attempts}: delta {delta} vs expected {expected_backoff_ms}"
        );

        // a poll before the retry instant must not touch the row
        assert_eq!(poll(&app).await, 0);
        make_due_now(&app, outbox_id).await;
    }

    // fifth attempt succeeds
    assert_eq!(poll(&app).await, 1);
    let row = sqlx::query("SELECT status, attempts FROM outbox_messages WHERE outbox_id = $1")
        .bind(outbox_id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("status"), "sent");
    assert_eq!(row.get::<i32, _>("attempts"), 5);

    let task_status: String = sqlx::query("SELECT status FROM tasks WHERE task_id = $1")
        .bind(task_id)
        .fetch_one(&app.pool)
        .await
        .unwrap()
        .get("status");
    assert_eq!(task_status, "done");

    assert_eq!(
        app.event_types_for(task_id).await,
        vec!["retried", "retried", "retried", "retried", "sent", "done"]
    );
}

#[tokio::test]
async fn five_failures_is_terminal() {
    let app = spawn_app().await;
    let alice = TestAccount::generate();
    alice.store(&app.pool, "UTC", "email").await;
    let task_id = app
        .seed_task(alice.user_id, None, Some(Utc::now()), "remind", "Dana", "", "sending")
        .await;
    let outbox_id = app
        .seed_outbox(Some(task_id), alice.user_id, "email", &alice.email, "queued")
        .await;

    Mock::given(path("/email"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.email_server)
        .await;

    for _ in 0..5 {
        make_due_now(&app, outbox_id).await;
        poll(&app).await;
    }

    let row = sqlx::query("SELECT status, attempts FROM outbox_messages WHERE outbox_id = $1")
        .bind(outbox_id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("status"), "failed");
    assert_eq!(row.get::<i32, _>("attempts"), 5);

    let task_status: String = sqlx::query("SELECT status FROM tasks WHERE task_id = $1")
        .bind(task_id)
        .fetch_one(&app.pool)
        .await
        .unwrap()
        .get("status");
    assert_eq!(task_status, "failed");

    let events = app.event_types_for(task_id).await;
    assert_eq!(events.last().unwrap(), "failed");

    // terminal means terminal: later polls never pick the row up again
    make_due_now(&app, outbox_id).await;
    assert_eq!(poll(&app).await, 0);
}

#[tokio::test]
async fn chat_rows_go_through_the_chat_api() {
    let app = spawn_app().await;
    let bob = TestAccount::generate();
    bob.store(&app.pool, "UTC", "chat").await;
    let task_id = app
        .seed_task(bob.user_id, None, Some(Utc::now()), "remind", "Sam", "", "sending")
        .await;
    app.seed_outbox(Some(task_id), bob.user_id, "chat", &bob.chat_number, "queued")
        .await;

    Mock::given(path(format!(
        "/{}/messages",
        app.settings.chat_client.phone_number_id
    )))
    .and(method("POST"))
    .respond_with(ResponseTemplate::new(200))
    .expect(1)
    .mount(&app.chat_server)
    .await;

    assert_eq!(poll(&app).await, 1);

    let status: String = sqlx::query("SELECT status FROM outbox_messages")
        .fetch_one(&app.pool)
        .await
        .unwrap()
        .get("status");
    assert_eq!(status, "sent");
}

#[tokio::test]
async fn stuck_sending_rows_are_swept_back_and_delivered() {
    let app = spawn_app().await;
    let alice = TestAccount::generate();
    alice.store(&app.pool, "UTC", "email").await;
    let outbox_id = app
        .seed_outbox(None, alice.user_id, "email", &alice.email, "sending")
        .await;
    // a sender died mid-send ten minutes ago
    sqlx::query(
        "UPDATE outbox_messages SET updated_at = now() - interval '10 minutes'
         WHERE outbox_id = $1",
    )
    .bind(outbox_id)
    .execute(&app.pool)
    .await
    .unwrap();

    Mock::given(path("/email"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    assert_eq!(poll(&app).await, 1);

    let status: String = sqlx::query("SELECT status FROM outbox_messages")
        .fetch_one(&app.pool)
        .await
        .unwrap()
        .get("status");
    assert_eq!(status, "sent");
}

#[tokio::test]
async fn fresh_sending_rows_are_left_to_their_owner() {
    let app = spawn_app().await;
    let alice = TestAccount::generate();
    alice.store(&app.pool, "UTC", "email").await;
    app.seed_outbox(None, alice.user_id, "email", &alice.email, "sending")
        .await;

    Mock::given(path("/email"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.email_server)
        .await;

    // claimed seconds ago: someone else is on it
    assert_eq!(poll(&app).await, 0);
}
