//! Extracts the text to speak from a conversation transcript: reads the
//! last assistant message, or falls back to a short default phrase.

use serde_json::Value;
use std::path::Path;

/// Default phrase used when the transcript is missing or has no assistant
/// message, taken from the source hook script's own fallback strings.
pub const FALLBACK_PHRASE: &str = "Задача выполнена";

const MAX_CODE_POINTS: usize = 1000;

/// Reads `transcript_path` as JSON-lines, scans from the last record toward
/// the first for one whose `type` is `"assistant"`, and joins every `"text"`
/// content element (or bare string) in its `message.content` array with
/// single spaces.
///
/// Returns `None` if the file cannot be read or no assistant record exists.
#[must_use]
pub fn extract_last_assistant_message(transcript_path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(transcript_path).ok()?;

    for line in content.lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if record.get("type").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        if let Some(text) = join_message_content(&record) {
            return Some(text);
        }
    }
    None
}

fn join_message_content(record: &Value) -> Option<String> {
    let content = record.get("message")?.get("content")?.as_array()?;
    let parts: Vec<String> = content
        .iter()
        .filter_map(|element| {
            if let Some(text) = element.as_str() {
                return Some(text.to_owned());
            }
            if element.get("type").and_then(Value::as_str) == Some("text") {
                return element
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
            }
            None
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Truncates `text` to at most `MAX_CODE_POINTS` Unicode code points.
#[must_use]
pub fn truncate(text: &str) -> String {
    text.chars().take(MAX_CODE_POINTS).collect()
}

/// Reads the hook's stdin JSON payload (the `{"transcript_path": "..."}`
/// document the host process pipes in) and resolves it to the text that
/// should be spoken: the last assistant message if one can be extracted,
/// otherwise [`FALLBACK_PHRASE`].
#[must_use]
pub fn resolve_text_to_speak(stdin_json: &str) -> String {
    let transcript_path = serde_json::from_str::<Value>(stdin_json)
        .ok()
        .and_then(|v| {
            v.get("transcript_path")
                .and_then(Value::as_str)
                .map(str::to_owned)
        });

    let extracted = transcript_path
        .and_then(|path| extract_last_assistant_message(Path::new(&path)))
        .filter(|text| !text.trim().is_empty());

    truncate(&extracted.unwrap_or_else(|| FALLBACK_PHRASE.to_owned()))
}
