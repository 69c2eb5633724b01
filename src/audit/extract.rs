use regex::Regex;
use std::sync::OnceLock;

fn fenced_json() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)```json\s*(.*?)\s*```").expect("valid regex"))
}

/// Pull the structured payload out of free model text.
///
/// A fenced ```json block wins; otherwise the span from the first `{` to the
/// last `}` is taken. Text with neither is returned trimmed so the parser can
/// report what it saw.
pub fn extract_json_payload(text: &str) -> &str {
    let text = text.trim();

    if let Some(inner) = fenced_json().captures(text).and_then(|c| c.get(1)) {
        return inner.as_str();
    }

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}
