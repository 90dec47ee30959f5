/// A chat-provider phone number in E.164-ish shape: optional leading `+`,
/// then 6 to 15 digits. Providers send the bare digits; we accept both.
///
/// Must be instantiated with `ChatNumber::parse`.
#[derive(Debug, Clone)]
pub struct ChatNumber(String);

impl ChatNumber {
    pub fn parse(number: String) -> Result<Self, String> {
        let digits = number.strip_prefix('+').unwrap_or(&number);
        let ok = (6..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit());
        match ok {
            true => Ok(Self(number)),
            false => Err(format!("Invalid chat number: {number:?}")),
        }
    }
}

impl AsRef<str> for ChatNumber {
    fn as_ref(&self) -> &str { &self.0 }
}
