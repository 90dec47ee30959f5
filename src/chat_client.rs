use reqwest::Client;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Serialize;

use crate::domain::ChatNumber;

/// Graph-API-shaped chat send endpoint:
/// `POST {base_url}/{phone_number_id}/messages` with a bearer token.
pub struct ChatClient {
    http_client: Client,
    base_url: String,
    phone_number_id: String,
    access_token: Secret<String>,
}

#[derive(Serialize)]
struct SendTextRequest<'a> {
    messaging_product: &'a str,
    to: &'a str,
    #[serde(rename = "type")]
    message_type: &'a str,
    text: TextBody<'a>,
}

#[derive(Serialize)]
struct TextBody<'a> {
    body: &'a str,
}

impl ChatClient {
    pub fn new(
        base_url: String,
        phone_number_id: String,
        access_token: Secret<String>,
        timeout: std::time::Duration,
    ) -> Self {
        let http_client = Client::builder().timeout(timeout).build().unwrap();
        Self {
            http_client,
            base_url,
            phone_number_id,
            access_token,
        }
    }

    #[tracing::instrument(skip(self, body))]
    pub async fn send_text(
        &self,
        recipient: &ChatNumber,
        body: &str,
    ) -> Result<(), reqwest::Error> {
        let url = format!("{}/{}/messages", self.base_url, self.phone_number_id);
        let request_body = SendTextRequest {
            messaging_product: "whatsapp",
            to: recipient.as_ref(),
            message_type: "text",
            text: TextBody { body },
        };
        self.http_client
            .post(&url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&request_body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
