//! Best-effort output and metadata extraction from agent responses.
//!
//! Responses are inspected as JSON. Neither function fails: a response with no
//! recognizable shape yields its JSON text as output and no metadata.

use serde_json::{json, Map, Value};

/// Pull the textual answer out of a response
pub fn extract_output(response: &Value) -> String {
    if let Value::String(text) = response {
        return text.clone();
    }

    if let Some(text) = response.get("text").and_then(Value::as_str) {
        return text.to_string();
    }

    if let Some(content) = response.get("content") {
        if let Some(text) = content_text(content) {
            return text;
        }
    }

    if let Some(text) = response
        .pointer("/candidates/0/content")
        .and_then(content_text)
    {
        return text;
    }

    response.to_string()
}

/// Token usage, model name and safety ratings, each omitted when absent
pub fn extract_metadata(response: &Value) -> Map<String, Value> {
    let mut metadata = Map::new();

    let usage = response
        .get("usage_metadata")
        .or_else(|| response.get("usage"))
        .filter(|usage| usage.is_object());
    if let Some(usage) = usage {
        let fields = [
            ("input_tokens", ["prompt_token_count", "input_tokens"]),
            ("output_tokens", ["candidates_token_count", "output_tokens"]),
            ("total_tokens", ["total_token_count", "total_tokens"]),
        ];
        for (key, sources) in fields {
            if let Some(count) = sources.iter().find_map(|source| usage.get(*source)) {
                if !count.is_null() {
                    metadata.insert(key.to_string(), count.clone());
                }
            }
        }
    }

    if let Some(model) = response.get("model").filter(|model| !model.is_null()) {
        metadata.insert("model".to_string(), model.clone());
    }

    if let Some(ratings) = response
        .pointer("/candidates/0/safety_ratings")
        .and_then(Value::as_array)
    {
        let ratings: Vec<Value> = ratings
            .iter()
            .map(|rating| {
                json!({
                    "category": label(rating.get("category")),
                    "probability": label(rating.get("probability")),
                })
            })
            .collect();
        metadata.insert("safety_ratings".to_string(), Value::Array(ratings));
    }

    metadata
}

/// Text of a `content` value: a string, or `parts` text fragments joined by a space
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Object(_) => content.get("parts").and_then(parts_text),
        Value::Array(_) => parts_text(content),
        _ => None,
    }
}

fn parts_text(parts: &Value) -> Option<String> {
    let fragments: Vec<&str> = parts
        .as_array()?
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    (!fragments.is_empty()).then(|| fragments.join(" "))
}

/// Enum-like labels arrive either as strings or as `{"name": ...}` objects
fn label(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(text)) => Value::String(text.clone()),
        Some(other) => other
            .get("name")
            .and_then(Value::as_str)
            .map(|name| Value::String(name.to_string()))
            .unwrap_or_else(|| Value::String(other.to_string())),
        None => Value::Null,
    }
}
