use once_cell::sync::Lazy;
use regex::Regex;

/// What `raw_text_redacted` becomes once a row ages past the retention
/// cutoff.
pub const RETENTION_MARKER: &str = "[REDACTED_PER_RETENTION_POLICY]";

// card numbers first: an SSN-shaped window can never match inside a 4-4-4-4
// grouping (word boundaries), but scrubbing the longer pattern first keeps
// that from ever mattering
static CC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d(?:[ -]?\d){15}\b").unwrap());
static SSN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

/// Scrub obvious PII from free text. Applied before anything is persisted and
/// (again, harmlessly) before text reaches the extractor.
pub fn redact_pii(text: &str) -> String {
    let text = CC.replace_all(text, "[CC_REDACTED]");
    let text = SSN.replace_all(&text, "[SSN_REDACTED]");
    EMAIL.replace_all(&text, "[EMAIL_REDACTED]").into_owned()
}
