//! Raw document bytes to indexable text.
//!
//! Plain text and Markdown pass through unchanged (after UTF-8 checks).
//! JSON documents are parsed and flattened into `path: value` lines so
//! that keys stay searchable next to their values.

use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::models::DocumentFormat;

/// Decode and normalize `raw` according to `format`.
pub fn extract_text(document_id: &str, format: DocumentFormat, raw: &[u8]) -> EngineResult<String> {
    let text = std::str::from_utf8(raw).map_err(|e| {
        EngineError::invalid_document(document_id, format!("content is not valid UTF-8: {}", e))
    })?;

    let text = match format {
        DocumentFormat::Plain | DocumentFormat::Markdown => text.to_string(),
        DocumentFormat::Json => {
            let value: Value = serde_json::from_str(text).map_err(|e| {
                EngineError::invalid_document(document_id, format!("malformed JSON: {}", e))
            })?;
            let mut lines = Vec::new();
            flatten("", &value, &mut lines);
            lines.join("\n")
        }
    };

    if text.trim().is_empty() {
        return Err(EngineError::invalid_document(
            document_id,
            "document is empty after trimming",
        ));
    }
    Ok(text)
}

fn flatten(path: &str, value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let next = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                flatten(&next, v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten(&format!("{}[{}]", path, i), v, out);
            }
        }
        Value::Null => {}
        Value::String(s) if s.trim().is_empty() => {}
        Value::String(s) => out.push(leaf(path, s)),
        other => out.push(leaf(path, &other.to_string())),
    }
}

fn leaf(path: &str, value: &str) -> String {
    if path.is_empty() {
        value.to_string()
    } else {
        format!("{}: {}", path, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_passthrough() {
        let text = extract_text("d", DocumentFormat::Plain, b"hello\n\nworld").unwrap();
        assert_eq!(text, "hello\n\nworld");
    }

    #[test]
    fn test_json_flattened_by_path() {
        let raw = br#"{"policy": {"title": "Returns", "days": 30}, "faq": ["Keep the receipt"]}"#;
        let text = extract_text("d", DocumentFormat::Json, raw).unwrap();
        assert!(text.contains("policy.title: Returns"));
        assert!(text.contains("policy.days: 30"));
        assert!(text.contains("faq[0]: Keep the receipt"));
    }

    #[test]
    fn test_malformed_json_is_invalid_document() {
        let err = extract_text("d", DocumentFormat::Json, b"{not json").unwrap_err();
        assert!(matches!(err, EngineError::InvalidDocument { .. }));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        assert!(extract_text("d", DocumentFormat::Plain, &[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_json_without_text_is_empty() {
        assert!(extract_text("d", DocumentFormat::Json, br#"{"a": null, "b": ""}"#).is_err());
    }
}
