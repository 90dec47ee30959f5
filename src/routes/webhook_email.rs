use actix_web::web;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use serde::Deserialize;
use sqlx::PgPool;

use crate::configuration::WebhookSettings;
use crate::domain::Channel;
use crate::domain::EmailAddress;
use crate::ingress::accept_inbound;
use crate::ingress::InboundEvent;
use crate::signature::verify_email_signature;
use crate::utils::error_500;

/// Inbound-email provider payload. `to` and `timestamp` are accepted but
/// unused; user resolution goes through `from`.
#[derive(Deserialize)]
#[allow(dead_code)]
pub struct EmailWebhookPayload {
    #[serde(rename = "messageId")]
    message_id: String,
    from: String,
    to: Option<String>,
    subject: Option<String>,
    #[serde(rename = "textBody")]
    text_body: String,
    timestamp: Option<String>,
}

/// `POST /webhook/email`
///
/// Body is taken raw so the signature can be checked over the exact bytes on
/// the wire. Response taxonomy: 401 bad signature, 400 unparseable payload,
/// 200 `{status: accepted|duplicate|ignored}` otherwise — the provider only
/// retries non-2xx, so 200 is sent exactly once the row is durable (or was
/// already).
#[tracing::instrument(name = "Receiving email webhook", skip_all)]
pub async fn email_webhook(
    request: HttpRequest,
    body: web::Bytes,
    pool: web::Data<PgPool>,
    webhooks: web::Data<WebhookSettings>,
) -> Result<HttpResponse, actix_web::Error> {
    let signature = request
        .headers()
        .get("X-Webhook-Signature")
        .and_then(|v| v.to_str().ok());
    if verify_email_signature(&webhooks.email_secret, &body, signature).is_err() {
        return Ok(HttpResponse::Unauthorized().finish());
    }

    let payload: EmailWebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => return Ok(HttpResponse::BadRequest().body(format!("invalid payload: {e}"))),
    };
    if payload.message_id.is_empty() {
        return Ok(HttpResponse::BadRequest().body("messageId must be non-empty"));
    }
    // canonicalises the sender, so lookup is stable across provider casing
    let from = match EmailAddress::parse(payload.from) {
        Ok(from) => from,
        Err(e) => return Ok(HttpResponse::BadRequest().body(e)),
    };

    let event = InboundEvent {
        channel: Channel::Email,
        provider_message_id: payload.message_id,
        sender_address: from.as_ref().to_string(),
        text: payload.text_body,
        subject: payload.subject,
    };

    // a store failure is the one case where the provider should retry
    let outcome = accept_inbound(&pool, &event).await.map_err(error_500)?;
    Ok(HttpResponse::Ok().json(outcome))
}
