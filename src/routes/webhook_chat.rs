use actix_web::web;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use serde::Deserialize;
use sqlx::PgPool;

use crate::configuration::WebhookSettings;
use crate::domain::Channel;
use crate::ingress::accept_inbound;
use crate::ingress::InboundEvent;
use crate::ingress::IngressOutcome;
use crate::signature::verify_chat_signature;

/// Subscription handshake query: `hub.mode`, `hub.verify_token`,
/// `hub.challenge`
#[derive(Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// `GET /webhook/chat`: echo the challenge iff the provider presents our
/// verify token
pub async fn chat_verify(
    params: web::Query<VerifyParams>,
    webhooks: web::Data<WebhookSettings>,
) -> HttpResponse {
    let subscribe = params.mode.as_deref() == Some("subscribe");
    let token_ok = params.verify_token.as_deref() == Some(webhooks.chat_verify_token.as_str());
    match (subscribe && token_ok, &params.challenge) {
        (true, Some(challenge)) => HttpResponse::Ok().body(challenge.clone()),
        _ => HttpResponse::Unauthorized().finish(),
    }
}

// the provider nests each message three levels deep; everything we don't
// read stays unmodelled
#[derive(Deserialize)]
struct ChatWebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Deserialize)]
struct Change {
    value: ChangeValue,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ChangeValue {
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatMessage {
    id: String,
    from: String,
    #[serde(rename = "type")]
    message_type: Option<String>,
    text: Option<TextContent>,
}

#[derive(Deserialize)]
struct TextContent {
    body: String,
}

/// `POST /webhook/chat`
///
/// A single request can carry many events; each is processed independently
/// and a failure of one never rolls back another. If any event hits a store
/// error the whole request answers 500 so the provider redelivers — the
/// events that did land resolve as duplicates on the retry.
#[tracing::instrument(name = "Receiving chat webhook", skip_all)]
pub async fn chat_webhook(
    request: HttpRequest,
    body: web::Bytes,
    pool: web::Data<PgPool>,
    webhooks: web::Data<WebhookSettings>,
) -> HttpResponse {
    let signature = request
        .headers()
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok());
    if verify_chat_signature(&webhooks.chat_app_secret, &body, signature).is_err() {
        return HttpResponse::Unauthorized().finish();
    }

    let payload: ChatWebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => return HttpResponse::BadRequest().body(format!("invalid payload: {e}")),
    };

    let mut accepted = 0;
    let mut duplicates = 0;
    let mut ignored = 0;
    let mut failed = 0;

    for message in payload
        .entry
        .into_iter()
        .flat_map(|e| e.changes)
        .flat_map(|c| c.value.messages)
    {
        // only text messages carry a followup; reactions, media etc are
        // acknowledged and dropped
        let text = match (message.message_type.as_deref(), message.text) {
            (Some("text") | None, Some(text)) => text.body,
            _ => {
                ignored += 1;
                continue;
            }
        };

        let event = InboundEvent {
            channel: Channel::Chat,
            provider_message_id: message.id,
            sender_address: message.from,
            text,
            subject: None,
        };
        match accept_inbound(&pool, &event).await {
            Ok(IngressOutcome::Accepted { .. }) => accepted += 1,
            Ok(IngressOutcome::Duplicate) => duplicates += 1,
            Ok(IngressOutcome::Ignored { .. }) => ignored += 1,
            Err(e) => {
                tracing::error!(e.cause_chain=?e, "failed to persist chat event");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok().json(serde_json::json!({
        "status": "processed",
        "accepted": accepted,
        "duplicate": duplicates,
        "ignored": ignored,
    }))
}
