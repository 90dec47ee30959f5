use unicode_segmentation::UnicodeSegmentation;

/// A user's name exactly as it lands in outbound copy ("Hi {name}, this is
/// your reminder ..."). The account system owns the value; this type only
/// guards what interpolation cannot tolerate:
///
/// - control characters (a stray `\n` would break out of the greeting line,
///   and headers have been smuggled through less),
/// - markup characters, since email bodies may be rendered as HTML
///   downstream,
/// - anything longer than a salutation has any business being (64 graphemes,
///   counted with `unicode-segmentation` so accented and CJK names are
///   measured fairly).
///
/// Outer whitespace is dropped at parse time. Must be instantiated with
/// `DisplayName::parse`; the field stays private so no unchecked value can
/// reach a message body.
#[derive(Debug, Clone)]
pub struct DisplayName(String);

impl DisplayName {
    pub fn parse(raw: String) -> Result<Self, String> {
        let name = raw.trim();
        if name.is_empty() {
            return Err("Display name is empty".to_string());
        }
        if name.graphemes(true).count() > 64 {
            return Err(format!("Display name too long: {name:?}"));
        }
        if name.chars().any(|c| c.is_control()) {
            return Err("Display name contains control characters".to_string());
        }
        if name.chars().any(|c| matches!(c, '<' | '>' | '&')) {
            return Err(format!("Display name contains markup characters: {name:?}"));
        }
        Ok(Self(name.to_string()))
    }
}

impl AsRef<str> for DisplayName {
    fn as_ref(&self) -> &str { &self.0 }
}
