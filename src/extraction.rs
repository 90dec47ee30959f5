use chrono::DateTime;
use chrono::Utc;
use reqwest::Client;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde::Serialize;

use crate::domain::ActionType;
use crate::domain::Tone;

/// Asked when the extractor is unreachable or returns something that violates
/// its contract; the task is then parked in `needs_clarification` like any
/// genuinely ambiguous message.
pub const FALLBACK_QUESTION: &str =
    "I couldn't work out when you'd like this follow-up. When should I remind you?";

/// What the language-model service said about one inbound message.
///
/// Contract: `needs_clarification = true` implies `due_at` is `None` and
/// `clarifying_question` is non-empty; otherwise `due_at` is a real instant.
/// `parse_response` enforces this, so holders of a value can rely on it.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub needs_clarification: bool,
    pub clarifying_question: String,
    pub due_at: Option<DateTime<Utc>>,
    pub action_type: ActionType,
    pub contact_hint: String,
    pub context: String,
}

impl ExtractionResult {
    /// The synthesized result used whenever the service fails us
    pub fn fallback_clarification() -> Self {
        Self {
            needs_clarification: true,
            clarifying_question: FALLBACK_QUESTION.to_string(),
            due_at: None,
            action_type: ActionType::Remind,
            contact_hint: String::new(),
            context: String::new(),
        }
    }
}

/// A short outbound message written on the user's behalf.
#[derive(Debug, Clone, Deserialize)]
pub struct Draft {
    pub subject: String,
    pub body: String,
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    text: &'a str,
    timezone: &'a str,
    now: String,
}

#[derive(Deserialize)]
struct ExtractResponse {
    needs_clarification: bool,
    #[serde(default)]
    clarifying_question: String,
    due_at_iso: Option<String>,
    action_type: String,
    #[serde(default)]
    contact_hint: String,
    #[serde(default)]
    context: String,
}

#[derive(Serialize)]
struct DraftRequest<'a> {
    contact_hint: &'a str,
    context: &'a str,
    tone: &'a str,
}

/// Transport trouble is worth retrying; a response that violates the
/// contract is not, it will be just as wrong next time.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("extractor request failed")]
    Transport(#[from] reqwest::Error),
    #[error("extractor returned an invalid result: {0}")]
    Contract(String),
}

/// Client for the language-model sidecar: `/v1/extract` turns free text into
/// a structured follow-up, `/v1/draft` writes a reply in the user's tone.
/// Both calls carry the client-level timeout; a slow model is a recoverable
/// error, not a hung worker.
pub struct ExtractionClient {
    http_client: Client,
    base_url: String,
    api_key: Secret<String>,
}

impl ExtractionClient {
    pub fn new(
        base_url: String,
        api_key: Secret<String>,
        timeout: std::time::Duration,
    ) -> Self {
        let http_client = Client::builder().timeout(timeout).build().unwrap();
        Self {
            http_client,
            base_url,
            api_key,
        }
    }

    /// Extract a follow-up from `text`. The caller decides what an `Err`
    /// becomes: a queue retry (transport) or the fallback clarification
    /// (contract violation).
    #[tracing::instrument(skip(self, text))]
    pub async fn extract(
        &self,
        text: &str,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<ExtractionResult, ExtractError> {
        let url = format!("{}/v1/extract", self.base_url);
        let body = ExtractRequest {
            text,
            timezone,
            now: now.to_rfc3339(),
        };
        let resp = self
            .http_client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<ExtractResponse>()
            .await?;
        parse_response(resp).map_err(ExtractError::Contract)
    }

    #[tracing::instrument(skip(self, context))]
    pub async fn draft(
        &self,
        contact_hint: &str,
        context: &str,
        tone: Tone,
    ) -> Result<Draft, reqwest::Error> {
        let url = format!("{}/v1/draft", self.base_url);
        let body = DraftRequest {
            contact_hint,
            context,
            tone: tone.as_str(),
        };
        let draft = self
            .http_client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<Draft>()
            .await?;
        Ok(draft)
    }
}

/// Enforce the extractor contract. Violations are `Err`, not panics; the
/// ingest worker downgrades them to the fallback clarification.
fn parse_response(resp: ExtractResponse) -> Result<ExtractionResult, String> {
    let action_type = ActionType::parse(&resp.action_type)?;

    if resp.needs_clarification {
        if resp.due_at_iso.is_some() {
            return Err("needs_clarification with a due_at_iso set".into());
        }
        if resp.clarifying_question.trim().is_empty() {
            return Err("needs_clarification without a clarifying question".into());
        }
        return Ok(ExtractionResult {
            needs_clarification: true,
            clarifying_question: resp.clarifying_question,
            due_at: None,
            action_type,
            contact_hint: resp.contact_hint,
            context: resp.context,
        });
    }

    let due_at_iso = resp.due_at_iso.ok_or("missing due_at_iso")?;
    let due_at = DateTime::parse_from_rfc3339(&due_at_iso)
        .map_err(|e| format!("unparseable due_at_iso {due_at_iso:?}: {e}"))?
        .with_timezone(&Utc);

    Ok(ExtractionResult {
        needs_clarification: false,
        clarifying_question: String::new(),
        due_at: Some(due_at),
        action_type,
        contact_hint: resp.contact_hint,
        context: resp.context,
    })
}
