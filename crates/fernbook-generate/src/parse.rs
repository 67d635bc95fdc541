//! Locate the JSON payload inside a service response of unknown shape.
//!
//! Each strategy is a pure `response -> Option<Value>`; they are tried in
//! order and the first hit wins. Nothing here returns an error: a strategy
//! that cannot make sense of the response yields `None` and the next one runs.

use serde_json::Value;

type Strategy = fn(&Value) -> Option<Value>;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("output_parsed", from_output_parsed),
    ("output_content", from_output_content),
    ("output_text", from_output_text),
    ("chat_message", from_chat_message),
];

/// Parsed JSON payload of `response`, or `None` when no strategy finds one.
pub fn extract_json(response: &Value) -> Option<Value> {
    STRATEGIES.iter().find_map(|(name, strategy)| {
        let found = strategy(response);
        if found.is_some() {
            tracing::trace!(strategy = *name, "extracted payload");
        }
        found
    })
}

/// Top-level pre-parsed payload.
fn from_output_parsed(response: &Value) -> Option<Value> {
    response
        .get("output_parsed")
        .filter(|v| !v.is_null())
        .cloned()
}

/// `output[].content[]` blocks: `parsed`, then `json`, then `text`, then annotation texts.
fn from_output_content(response: &Value) -> Option<Value> {
    let items = response.get("output")?.as_array()?;
    items
        .iter()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .find_map(from_content_block)
}

fn from_content_block(block: &Value) -> Option<Value> {
    if let Some(parsed) = block.get("parsed").filter(|v| !v.is_null()) {
        return Some(parsed.clone());
    }
    if let Some(json) = block.get("json").filter(|v| !v.is_null()) {
        return Some(json.clone());
    }
    if let Some(found) = block.get("text").and_then(Value::as_str).and_then(json_from_text) {
        return Some(found);
    }
    block
        .get("annotations")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|a| a.get("text").and_then(Value::as_str))
        .find_map(json_from_text)
}

/// Concatenated `output_text`.
fn from_output_text(response: &Value) -> Option<Value> {
    response
        .get("output_text")
        .and_then(Value::as_str)
        .and_then(json_from_text)
}

/// `choices[].message.content`, either a string or a list of labelled parts.
fn from_chat_message(response: &Value) -> Option<Value> {
    let choices = response.get("choices")?.as_array()?;
    choices
        .iter()
        .filter_map(|choice| choice.pointer("/message/content"))
        .find_map(|content| match content {
            Value::String(text) => json_from_text(text),
            Value::Array(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    Value::String(text) => Some(text.as_str()),
                    other => other.get("text").and_then(Value::as_str),
                })
                .find_map(json_from_text),
            _ => None,
        })
}

/// Parse JSON out of model text that may wrap it in prose or code fences.
///
/// Whole-string objects/arrays are parsed directly; otherwise the first
/// greedy `{...}` or `[...]` span is tried.
pub fn json_from_text(raw: &str) -> Option<Value> {
    let text = raw.trim();
    if looks_complete(text) {
        return serde_json::from_str(text).ok();
    }
    let span = bracket_span(text)?;
    serde_json::from_str(span).ok()
}

fn looks_complete(text: &str) -> bool {
    (text.starts_with('{') && text.ends_with('}')) || (text.starts_with('[') && text.ends_with(']'))
}

/// From the first opening bracket to the last matching closer.
fn bracket_span(text: &str) -> Option<&str> {
    let object = greedy_span(text, '{', '}');
    let array = greedy_span(text, '[', ']');
    match (object, array) {
        (Some((os, oe)), Some((as_, ae))) => {
            if os <= as_ {
                Some(&text[os..=oe])
            } else {
                Some(&text[as_..=ae])
            }
        }
        (Some((s, e)), None) | (None, Some((s, e))) => Some(&text[s..=e]),
        (None, None) => None,
    }
}

fn greedy_span(text: &str, open: char, close: char) -> Option<(usize, usize)> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    Some((start, end))
}

/// Whether the service cut the output short.
pub fn is_incomplete(response: &Value) -> bool {
    let status_incomplete = response.get("status").and_then(Value::as_str) == Some("incomplete");
    let has_details = response
        .get("incomplete_details")
        .is_some_and(|v| !v.is_null());
    status_incomplete || has_details
}

/// Service-reported message from an error body, if any.
pub fn service_error_message(body: &Value) -> Option<String> {
    let message = match body.get("error")? {
        Value::String(message) => Some(message.clone()),
        error => error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    };
    message.filter(|m| !m.trim().is_empty())
}
