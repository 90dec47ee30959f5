use sqlx::Row;

use crate::helpers::spawn_app;
use crate::helpers::spawn_app_with;
use crate::helpers::TestAccount;

fn payload(
    message_id: &str,
    from: &str,
) -> serde_json::Value {
    serde_json::json!({
        "messageId": message_id,
        "from": from,
        "to": "nudge@example.com",
        "subject": "re: invoice",
        "textBody": "remind me to follow up with Dana next Tuesday",
        "timestamp": "2026-03-01T12:00:00Z",
    })
}

#[tokio::test]
async fn first_webhook_is_accepted_and_persisted() {
    let app = spawn_app().await;
    let alice = TestAccount::generate();
    alice.store(&app.pool, "UTC", "email").await;

    let resp = app.post_email_webhook(&payload("msg-1", &alice.email)).await;

    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "accepted");

    let row = sqlx::query("SELECT idempotency_key, status, raw_text_redacted FROM inbound_messages")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(
        row.get::<String, _>("idempotency_key"),
        format!("{}:msg-1", alice.user_id)
    );
    assert_eq!(row.get::<String, _>("status"), "received");

    // exactly one ingest job, keyed by the idempotency key
    assert_eq!(app.job_count("ingest").await, 1);
}

#[tokio::test]
async fn duplicate_webhook_is_reported_and_stored_once() {
    let app = spawn_app().await;
    let alice = TestAccount::generate();
    alice.store(&app.pool, "UTC", "email").await;

    let first = app.post_email_webhook(&payload("msg-1", &alice.email)).await;
    let body: serde_json::Value = first.json().await.unwrap();
    assert_eq!(body["status"], "accepted");

    let second = app.post_email_webhook(&payload("msg-1", &alice.email)).await;
    assert_eq!(second.status().as_u16(), 200);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["status"], "duplicate");

    let n: i64 = sqlx::query("SELECT count(*) AS n FROM inbound_messages")
        .fetch_one(&app.pool)
        .await
        .unwrap()
        .get("n");
    assert_eq!(n, 1);
    // and only one job for the worker to find, so the extractor will be
    // called at most once
    assert_eq!(app.job_count("ingest").await, 1);
}

#[tokio::test]
async fn unknown_sender_is_ignored_without_persistence() {
    let app = spawn_app().await;

    let resp = app
        .post_email_webhook(&payload("msg-1", "stranger@example.com"))
        .await;

    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ignored");
    assert_eq!(body["reason"], "unknown_sender");

    let n: i64 = sqlx::query("SELECT count(*) AS n FROM inbound_messages")
        .fetch_one(&app.pool)
        .await
        .unwrap()
        .get("n");
    assert_eq!(n, 0);
}

#[tokio::test]
async fn sender_casing_does_not_defeat_deduplication() {
    let app = spawn_app().await;
    let alice = TestAccount::generate();
    alice.store(&app.pool, "UTC", "email").await;

    let first = app
        .post_email_webhook(&payload("msg-1", &alice.email.to_uppercase()))
        .await;
    let body: serde_json::Value = first.json().await.unwrap();
    assert_eq!(body["status"], "accepted");

    // same message, provider now cases the header differently
    let second = app.post_email_webhook(&payload("msg-1", &alice.email)).await;
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["status"], "duplicate");
}

#[tokio::test]
async fn deactivated_sender_is_ignored() {
    let app = spawn_app().await;
    let alice = TestAccount::generate();
    alice.store(&app.pool, "UTC", "email").await;
    sqlx::query("UPDATE users SET status = 'suspended' WHERE user_id = $1")
        .bind(alice.user_id)
        .execute(&app.pool)
        .await
        .unwrap();

    let resp = app.post_email_webhook(&payload("msg-1", &alice.email)).await;
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ignored");
}

#[tokio::test]
async fn malformed_payloads_are_rejected() {
    let app = spawn_app().await;

    for (body, msg) in [
        (serde_json::json!({}), "empty object"),
        (serde_json::json!({ "messageId": "m-1" }), "no from/textBody"),
        (
            serde_json::json!({ "messageId": "", "from": "a@b.com", "textBody": "x" }),
            "empty messageId",
        ),
        (
            serde_json::json!({ "messageId": "m-1", "from": "not-an-address", "textBody": "x" }),
            "unparseable from",
        ),
    ] {
        let resp = app.post_email_webhook(&body).await;
        assert_eq!(resp.status().as_u16(), 400, "{msg}");
    }
}

#[tokio::test]
async fn bad_signature_is_rejected_before_parsing() {
    let app = spawn_app().await;
    let alice = TestAccount::generate();
    alice.store(&app.pool, "UTC", "email").await;

    let resp = reqwest::Client::new()
        .post(format!("{}/webhook/email", app.addr))
        .header("X-Webhook-Signature", "deadbeef")
        .json(&payload("msg-1", &alice.email))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    // so is a missing header
    let resp = reqwest::Client::new()
        .post(format!("{}/webhook/email", app.addr))
        .json(&payload("msg-1", &alice.email))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    let n: i64 = sqlx::query("SELECT count(*) AS n FROM inbound_messages")
        .fetch_one(&app.pool)
        .await
        .unwrap()
        .get("n");
    assert_eq!(n, 0);
}

#[tokio::test]
async fn empty_secret_disables_verification() {
    use secrecy::Secret;
    let app = spawn_app_with(|cfg| {
        cfg.webhooks.email_secret = Secret::new(String::new());
    })
    .await;
    let alice = TestAccount::generate();
    alice.store(&app.pool, "UTC", "email").await;

    // unsigned request sails through in dev mode
    let resp = reqwest::Client::new()
        .post(format!("{}/webhook/email", app.addr))
        .json(&payload("msg-1", &alice.email))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn inbound_text_is_redacted_before_persistence() {
    let app = spawn_app().await;
    let alice = TestAccount::generate();
    alice.store(&app.pool, "UTC", "email").await;

    let mut body = payload("msg-1", &alice.email);
    body["textBody"] =
        serde_json::json!("my ssn is 123-45-6789 and card 4111-1111-1111-1111, tell bob@corp.com");
    app.post_email_webhook(&body).await;

    let stored: String = sqlx::query("SELECT raw_text_redacted FROM inbound_messages")
        .fetch_one(&app.pool)
        .await
        .unwrap()
        .get("raw_text_redacted");
    assert!(stored.contains("[SSN_REDACTED]"), "{stored}");
    assert!(stored.contains("[CC_REDACTED]"), "{stored}");
    assert!(stored.contains("[EMAIL_REDACTED]"), "{stored}");
    assert!(!stored.contains("123-45-6789"), "{stored}");
}
