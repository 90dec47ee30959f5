use actix_web::http::header::HeaderMap;
use anyhow::Context;
use secrecy::ExposeSecret;
use secrecy::Secret;
use sha2::Digest;
use sha2::Sha256;

use crate::configuration::AdminSettings;

#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: Secret<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials(#[source] anyhow::Error),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

/// Parse the `Authorization: Basic ...` header of a request (RFCs 2617,
/// 7617). This does not validate anything; for that, see
/// `validate_credentials`.
pub fn basic_authentication(headers: &HeaderMap) -> Result<Credentials, anyhow::Error> {
    use base64::Engine;

    let encoded = headers
        .get("Authorization")
        .context("No Authorization header")?
        .to_str()
        .context("Invalid str")?
        .strip_prefix("Basic ")
        .context("Authorization scheme was not 'Basic'")?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .context("Failed to decode base64")?;
    let decoded = String::from_utf8(decoded).context("Invalid str")?;

    let mut creds = decoded.splitn(2, ':');

    let username = creds
        .next()
        .ok_or_else(|| anyhow::anyhow!("No username"))?
        .to_string();

    let password = creds
        .next()
        .ok_or_else(|| anyhow::anyhow!("No password"))?
        .to_string();
    let password = Secret::new(password);

    Ok(Credentials { username, password })
}

/// Validate supplied credentials against the configured admin account.
///
/// Comparison goes through fixed-width digests so its cost does not depend on
/// how much of the supplied password happens to match.
pub fn validate_credentials(
    creds: &Credentials,
    admin: &AdminSettings,
) -> Result<(), AuthError> {
    let user_ok = digest(&creds.username) == digest(&admin.username);
    let password_ok =
        digest(creds.password.expose_secret()) == digest(admin.password.expose_secret());
    match user_ok && password_ok {
        true => Ok(()),
        false => Err(AuthError::InvalidCredentials(anyhow::anyhow!(
            "Invalid username or password"
        ))),
    }
}

fn digest(s: &str) -> [u8; 32] { Sha256::digest(s.as_bytes()).into() }
