use serde_json::{Map, Value};
use tracing::{debug, warn};

const BANNER_RULE: &str = "// ==================================================";

/// How the explorer's `SourceCode` payload was interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLayout {
    /// Plain source text, passed through untouched.
    SingleFile,
    /// Standard-JSON input with a `sources` map.
    Sources { files: usize },
    /// JSON object without `sources`; top-level keys are treated as paths.
    BestEffort { files: usize },
    /// Looked like JSON but could not be parsed; the raw text is kept.
    Unparsed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedSource {
    pub source_code: String,
    pub layout: SourceLayout,
}

fn looks_like_json(raw: &str) -> bool {
    raw.starts_with("{{") || (raw.starts_with('{') && raw.contains("sources"))
}

fn file_content(entry: &Value) -> &str {
    entry.get("content").and_then(Value::as_str).unwrap_or_default()
}

fn banner(path: &str, content: &str) -> String {
    format!("{BANNER_RULE}\n// File: {path}\n{BANNER_RULE}\n\n{content}")
}

fn join_sources(sources: &Map<String, Value>) -> String {
    sources
        .iter()
        .map(|(path, entry)| banner(path, file_content(entry)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn join_best_effort(entries: &Map<String, Value>) -> String {
    entries
        .iter()
        .map(|(path, entry)| format!("// File: {}\n{}", path, file_content(entry)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Normalize an explorer `SourceCode` payload into one source blob.
///
/// Multi-file payloads come either as `{ "sources": { path: { content } } }`
/// or wrapped in an extra pair of braces (`{{ ... }}`). Files are emitted in
/// the order the explorer listed them. A payload that cannot be parsed is
/// returned verbatim.
pub fn flatten_source(raw: &str) -> FlattenedSource {
    if !looks_like_json(raw) {
        return FlattenedSource {
            source_code: raw.to_string(),
            layout: SourceLayout::SingleFile,
        };
    }

    let json_text = if raw.starts_with("{{") && raw.ends_with("}}") {
        &raw[1..raw.len() - 1]
    } else {
        raw
    };

    let unparsed = |reason: String| {
        warn!("Could not parse multi-file source JSON, using raw output: {}", reason);
        FlattenedSource {
            source_code: raw.to_string(),
            layout: SourceLayout::Unparsed { reason },
        }
    };

    let parsed: Value = match serde_json::from_str(json_text) {
        Ok(value) => value,
        Err(e) => return unparsed(e.to_string()),
    };

    let Some(root) = parsed.as_object() else {
        return unparsed("top-level value is not an object".to_string());
    };

    match root.get("sources").and_then(Value::as_object) {
        Some(sources) => {
            debug!("Flattening {} source files", sources.len());
            FlattenedSource {
                source_code: join_sources(sources),
                layout: SourceLayout::Sources {
                    files: sources.len(),
                },
            }
        }
        None => FlattenedSource {
            source_code: join_best_effort(root),
            layout: SourceLayout::BestEffort { files: root.len() },
        },
    }
}
