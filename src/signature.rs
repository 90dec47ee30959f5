use hmac::Hmac;
use hmac::Mac;
use secrecy::ExposeSecret;
use secrecy::Secret;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Message authentication guarantees that the payload has not been modified
/// in transit and lets the sender be verified. Both channels sign the raw
/// request body with HMAC-SHA256 (RFC 2104); they differ only in header
/// dressing:
///
/// - email: `X-Webhook-Signature: <hex digest>`
/// - chat:  `X-Hub-Signature-256: sha256=<hex digest>`
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing signature header")]
    Missing,
    #[error("Malformed signature header")]
    Malformed,
    #[error("Signature mismatch")]
    Mismatch,
}

/// Check `header_value` (hex digest, no prefix) against the body. An empty
/// secret skips verification entirely.
pub fn verify_email_signature(
    secret: &Secret<String>,
    body: &[u8],
    header_value: Option<&str>,
) -> Result<(), SignatureError> {
    verify(secret, body, header_value, "")
}

/// Same as `verify_email_signature`, but the digest carries the provider's
/// `sha256=` prefix.
pub fn verify_chat_signature(
    secret: &Secret<String>,
    body: &[u8],
    header_value: Option<&str>,
) -> Result<(), SignatureError> {
    verify(secret, body, header_value, "sha256=")
}

fn verify(
    secret: &Secret<String>,
    body: &[u8],
    header_value: Option<&str>,
    prefix: &str,
) -> Result<(), SignatureError> {
    let secret = secret.expose_secret();
    if secret.is_empty() {
        return Ok(());
    }
    let header_value = header_value.ok_or(SignatureError::Missing)?;
    let hex_digest = header_value
        .strip_prefix(prefix)
        .ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(hex_digest).map_err(|_| SignatureError::Malformed)?;

    // key length is unrestricted for hmac
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    // constant-time comparison
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// Sign a body the way a provider would; used by tests and nothing else at
/// runtime.
pub fn sign(
    secret: &str,
    body: &[u8],
) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
