use validator::ValidateEmail;

/// An address the pipeline either resolves a user by (webhook `from`) or
/// hands to the send API (outbox `to`).
///
/// Parsing canonicalises: outer whitespace is dropped and the address is
/// lowercased, so the same sender always maps to the same user no matter how
/// the provider cased the header. Syntax is delegated to `validator`; on top
/// of that we enforce the RFC 5321 path limit, since providers do forward
/// garbage headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(raw: String) -> Result<Self, String> {
        let email = raw.trim().to_lowercase();
        if email.len() > 254 {
            return Err(format!("Email address too long ({} bytes)", email.len()));
        }
        match ValidateEmail::validate_email(&email) {
            true => Ok(Self(email)),
            false => Err(format!("Invalid email address: {raw:?}")),
        }
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str { &self.0 }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
