//! Recovery of a structured payload embedded in free-form generated text.
//!
//! Responses may wrap the JSON in commentary or code fences, so parsing
//! cannot rely on the whole body being valid JSON. This module is the only
//! place that knows how to dig the payload out, so retry policy and parsing
//! policy stay independently testable.

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PayloadError {
    #[error("no JSON payload found in response")]
    NotFound,

    #[error("unbalanced JSON delimiters in response")]
    Unbalanced,

    #[error("invalid JSON payload: {0}")]
    Parse(String),
}

/// Extract and parse the first JSON object or array embedded in `text`.
pub fn extract_payload(text: &str) -> Result<Value, PayloadError> {
    let stripped = strip_code_fences(text);
    let slice = balanced_slice(&stripped)?;
    match serde_json::from_str(slice) {
        Ok(value) => Ok(value),
        Err(e) => relaxed_parse(slice).ok_or_else(|| PayloadError::Parse(e.to_string())),
    }
}

/// Remove markdown code-fence markers so the delimiter scan sees only the
/// payload and surrounding prose.
fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Locate the first `{` or `[` and scan forward, counting nested delimiter
/// depth, until it returns to zero. Delimiters inside string literals are
/// ignored.
fn balanced_slice(text: &str) -> Result<&str, PayloadError> {
    let start = text.find(['{', '[']).ok_or(PayloadError::NotFound)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    Err(PayloadError::Unbalanced)
}

/// Best-effort re-parse of near-JSON that uses single quotes for keys or
/// values. Rewrites single-quoted literals to double-quoted ones and tries
/// again; anything still invalid is given up on.
fn relaxed_parse(slice: &str) -> Option<Value> {
    let mut rewritten = String::with_capacity(slice.len());
    let mut in_double = false;
    let mut in_single = false;
    let mut escaped = false;

    for c in slice.chars() {
        if escaped {
            rewritten.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                rewritten.push(c);
                escaped = true;
            }
            '"' if in_single => rewritten.push_str("\\\""),
            '"' => {
                in_double = !in_double;
                rewritten.push(c);
            }
            '\'' if !in_double => {
                in_single = !in_single;
                rewritten.push('"');
            }
            _ => rewritten.push(c),
        }
    }

    serde_json::from_str(&rewritten).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_object() {
        let value = extract_payload(r#"{"method": "get_transaction", "params": {}}"#).unwrap();
        assert_eq!(value["method"], "get_transaction");
    }

    #[test]
    fn fenced_object_with_trailing_prose() {
        let text = "Sure, here is the call:\n```json\n{\"method\": \"get_receipt\", \"params\": {\"tx_hash\": \"0xabc\"}}\n```\nLet me know if you need anything else!";
        let value = extract_payload(text).unwrap();
        assert_eq!(value["method"], "get_receipt");
        assert_eq!(value["params"]["tx_hash"], "0xabc");
    }

    #[test]
    fn leading_commentary_is_ignored() {
        let text = "I analyzed the rows. {\"function\": \"tag_as_expense\", \"rows\": []} done";
        let value = extract_payload(text).unwrap();
        assert_eq!(value["function"], "tag_as_expense");
    }

    #[test]
    fn array_payload() {
        let text = "```\n[{\"function\": \"get_receipt\", \"params\": {}}]\n```";
        let value = extract_payload(text).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["function"], "get_receipt");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let text = r#"{"note": "a } tricky { value", "params": {}} trailing"#;
        let value = extract_payload(text).unwrap();
        assert_eq!(value["note"], "a } tricky { value");
    }

    #[test]
    fn nested_structures() {
        let payload = json!({
            "function": "get_events",
            "rows": [{"contract_address": "0xabc", "filters": {"topics": ["a", "b"]}}]
        });
        let text = format!("prefix {} suffix", payload);
        let value = extract_payload(&text).unwrap();
        assert_eq!(value, payload);
    }

    #[test]
    fn single_quoted_payload_is_recovered() {
        let text = "[{'function': 'get_receipt', 'params': {'tx_hash': '0xabc'}}]";
        let value = extract_payload(text).unwrap();
        assert_eq!(value[0]["function"], "get_receipt");
        assert_eq!(value[0]["params"]["tx_hash"], "0xabc");
    }

    #[test]
    fn prose_only_response() {
        assert_eq!(
            extract_payload("I could not find any transactions to process."),
            Err(PayloadError::NotFound)
        );
    }

    #[test]
    fn empty_response() {
        assert_eq!(extract_payload(""), Err(PayloadError::NotFound));
    }

    #[test]
    fn unbalanced_payload() {
        assert_eq!(
            extract_payload(r#"{"method": "get_transaction", "params": {"#),
            Err(PayloadError::Unbalanced)
        );
    }

    #[test]
    fn garbage_between_delimiters() {
        let result = extract_payload("{this is not json at all}");
        assert!(matches!(result, Err(PayloadError::Parse(_))));
    }
}
