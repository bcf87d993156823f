//! Reduce provider responses to a single reply.

use serde::Deserialize;
use serde_json::Value;

use crate::{BackendError, ReplyText};

/// A labeled reply suggestion as returned by the model
#[derive(Debug, Clone, Deserialize)]
pub struct Suggestion {
    #[serde(default)]
    pub label: Option<String>,
    pub text: String,
}

/// Pull the generated text out of the response shapes providers use.
pub fn extract_text(response: &Value) -> Option<String> {
    if let Some(text) = response["candidates"][0]["content"]["parts"][0]["text"].as_str() {
        return Some(text.to_string());
    }
    for key in ["predictions", "outputs"] {
        let first = &response[key][0];
        if let Some(text) = first["content"].as_str().or_else(|| first.as_str()) {
            return Some(text.to_string());
        }
    }
    None
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Parse model output: a JSON suggestion list, a JSON object with `text`,
/// or plain free text.
pub fn parse_reply(raw: &str) -> Result<ReplyText, BackendError> {
    let clean = strip_fences(raw);
    if clean.is_empty() {
        return Err(BackendError::Parse("AI returned no suggestions".to_string()));
    }

    if clean.starts_with('[') {
        let suggestions: Vec<Suggestion> = serde_json::from_str(clean)
            .map_err(|e| BackendError::Parse(format!("invalid suggestion list: {}", e)))?;
        return suggestions
            .into_iter()
            .find(|s| !s.text.trim().is_empty())
            .map(|s| ReplyText {
                text: s.text.trim().to_string(),
                label: s.label,
            })
            .ok_or_else(|| BackendError::Parse("AI returned no suggestions".to_string()));
    }

    if clean.starts_with('{') {
        let suggestion: Suggestion = serde_json::from_str(clean)
            .map_err(|e| BackendError::Parse(format!("invalid suggestion object: {}", e)))?;
        let text = suggestion.text.trim();
        if text.is_empty() {
            return Err(BackendError::Parse("AI returned an empty reply".to_string()));
        }
        return Ok(ReplyText {
            text: text.to_string(),
            label: suggestion.label,
        });
    }

    Ok(ReplyText {
        text: clean.to_string(),
        label: None,
    })
}

/// Extract and parse in one step.
pub fn reply_from_response(response: &Value) -> Result<ReplyText, BackendError> {
    let text = extract_text(response)
        .ok_or_else(|| BackendError::Parse("response has no generated text".to_string()))?;
    parse_reply(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;

    #[test]
    fn parses_fenced_suggestion_list() {
        let raw = "```json\n[{\"label\":\"Reply\",\"text\":\"Yes, still available!\"}]\n```";
        let reply = parse_reply(raw).expect("parse");
        assert_eq!(reply.text, "Yes, still available!");
        assert_eq!(reply.label.as_deref(), Some("Reply"));
    }

    #[test]
    fn free_text_is_accepted() {
        let reply = parse_reply("  Sure, $90 works.  ").expect("parse");
        assert_eq!(reply.text, "Sure, $90 works.");
        assert!(reply.label.is_none());
    }

    #[test]
    fn broken_json_is_a_parse_error() {
        let err = parse_reply("[{\"label\":").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn empty_list_is_a_parse_error() {
        let err = parse_reply("[]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn extracts_from_known_shapes() {
        let gemini = json!({"candidates":[{"content":{"parts":[{"text":"a"}]}}]});
        let vertex = json!({"predictions":[{"content":"b"}]});
        let bare = json!({"outputs":["c"]});
        assert_eq!(extract_text(&gemini).as_deref(), Some("a"));
        assert_eq!(extract_text(&vertex).as_deref(), Some("b"));
        assert_eq!(extract_text(&bare).as_deref(), Some("c"));
        assert!(extract_text(&json!({"error":"x"})).is_none());
    }
}
