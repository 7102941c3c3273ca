//! Pull a JSON object out of free-form model output.
//!
//! Models wrap JSON in prose or markdown fences. Extraction tries the widest
//! `{ ... }` span first (first `{` to last `}`), then each balanced object
//! span in order of appearance.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// Extract the first parseable JSON object from `text`.
pub fn extract_json_object(provider: &str, text: &str) -> Result<Value> {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Ok(v);
            }
        }
    }

    for span in balanced_spans(text) {
        if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(span) {
            return Ok(v);
        }
    }

    Err(Error::parse(provider, "no JSON object found in response"))
}

/// Extract and deserialize a JSON object into `T`.
pub fn parse_json<T: DeserializeOwned>(provider: &str, text: &str) -> Result<T> {
    let value = extract_json_object(provider, text)?;
    serde_json::from_value(value).map_err(|e| Error::parse(provider, e.to_string()))
}

/// Balanced `{...}` spans starting at each `{`, in order of appearance.
fn balanced_spans(text: &str) -> impl Iterator<Item = &str> {
    text.match_indices('{')
        .filter_map(move |(start, _)| balanced_from(text, start))
}

/// The balanced object span opening at `start`, string-literal aware.
fn balanced_from(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn plain_object() {
        let v = extract_json_object("p", r#"{"a": 1}"#).unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn object_inside_prose_and_fences() {
        let text = "Here is the course:\n```json\n{\"title\": \"X\", \"n\": {\"k\": 2}}\n```\nEnjoy!";
        let v = extract_json_object("p", text).unwrap();
        assert_eq!(v["n"]["k"], 2);
    }

    #[test]
    fn falls_back_to_balanced_span() {
        // The widest span is invalid because of the trailing brace in prose.
        let text = r#"Result: {"ok": true} and a stray } here"#;
        let v = extract_json_object("p", text).unwrap();
        assert_eq!(v, json!({"ok": true}));
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_balancing() {
        let text = r#"noise { broken {"msg": "a } b", "n": 1} tail"#;
        let v = extract_json_object("p", text).unwrap();
        assert_eq!(v["msg"], "a } b");
    }

    #[test]
    fn no_object_is_a_parse_error() {
        let err = extract_json_object("ollama", "I cannot help with that.").unwrap_err();
        assert!(matches!(err, Error::Parse { ref provider, .. } if provider == "ollama"));
    }

    #[test]
    fn typed_parse_reports_schema_mismatch() {
        #[derive(Deserialize)]
        struct Needs {
            #[allow(dead_code)]
            title: String,
        }
        assert!(parse_json::<Needs>("p", r#"{"title": "ok"}"#).is_ok());
        assert!(matches!(
            parse_json::<Needs>("p", r#"{"other": 1}"#),
            Err(Error::Parse { .. })
        ));
    }
}
