//! Normalization of assistant webhook replies.
//!
//! The webhook is a workflow engine whose reply shape depends on how the
//! workflow was wired: a bare object, an `[{json: {output: ...}}]` envelope,
//! an object with an `output` field, or any of those serialized into a
//! string. [`normalize`] coerces every one of them into an assistant
//! [`Message`] and never fails.

use serde_json::{Map, Value};

use super::models::{FALLBACK_ACTION, MaterialItem, Message, Project};

/// A webhook reply before interpretation
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    /// Body that parsed as JSON
    Json(Value),
    /// Body that was not JSON at all
    Text(String),
}

impl RawResponse {
    /// Interpret a successful response body
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => RawResponse::Json(value),
            Err(_) => RawResponse::Text(body.to_string()),
        }
    }

    /// Reply used when the webhook answered with a non-success status
    pub fn fallback(raw_text: &str) -> Self {
        RawResponse::Json(serde_json::json!({
            "action": FALLBACK_ACTION,
            "content": raw_text,
            "items": [],
        }))
    }
}

/// Convert any webhook reply into an assistant message
pub fn normalize(raw: &RawResponse) -> Message {
    let unwrapped = match raw {
        RawResponse::Json(value) => unwrap_envelope(value),
        RawResponse::Text(text) => Value::String(text.clone()),
    };

    match unwrapped {
        Value::Object(output) => from_output(&output),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(output)) => from_output(&output),
            // Valid JSON that is not an object carries no fields; show the text
            _ => Message::assistant_text(text),
        },
        Value::Null => Message::assistant_text(String::new()),
        other => Message::assistant_text(other.to_string()),
    }
}

/// Apply the unwrap rules in priority order; a null field falls through
fn unwrap_envelope(value: &Value) -> Value {
    match value {
        Value::Array(elements) => match elements.first() {
            Some(first) => non_null(first.pointer("/json/output"))
                .or_else(|| non_null(first.get("json")))
                .unwrap_or(first)
                .clone(),
            None => Value::Null,
        },
        Value::Object(object) => non_null(object.get("output"))
            .or_else(|| non_null(value.pointer("/json/output")))
            .unwrap_or(value)
            .clone(),
        other => other.clone(),
    }
}

fn non_null(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn from_output(output: &Map<String, Value>) -> Message {
    let content = present(output, "content")
        .or_else(|| present(output, "message"))
        .map(stringify)
        .unwrap_or_default();

    let action = present(output, "action")
        .map(stringify)
        .filter(|tag| !tag.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_ACTION.to_string());

    let items: Vec<MaterialItem> = decode_list(output.get("items"))
        .iter()
        .map(material_item)
        .collect();

    let projects: Vec<Project> = decode_list(output.get("projects"))
        .iter()
        .map(project)
        .collect();

    let delivery_date = present(output, "delivery_date")
        .or_else(|| present(output, "deliveryDate"))
        .map(stringify)
        .filter(|date| !date.trim().is_empty());

    let mut message = Message::assistant_text(content);
    message.action = action;
    message.items = items;
    message.projects = projects;
    message.user_selected_items = truthy_flag(output.get("user_selected_items"));
    message.delivery_date = delivery_date;
    message
}

/// A field counts as present unless it is missing or null
fn present<'a>(output: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    non_null(output.get(key))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Arrays pass through, JSON-encoded arrays are parsed, anything else is empty
fn decode_list(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(list)) => list.clone(),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Array(list)) => list,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .filter(|v| !v.is_null())
        .map(stringify)
        .filter(|s| !s.is_empty())
}

fn material_item(raw: &Value) -> MaterialItem {
    // Bare strings name the item
    if let Value::String(name) = raw {
        return MaterialItem {
            name: name.clone(),
            description: String::new(),
            photo: None,
            selected: false,
            desired_quantity: 1,
        };
    }

    MaterialItem {
        name: field(raw, "name").unwrap_or_default(),
        description: field(raw, "description").unwrap_or_default(),
        photo: field(raw, "photo").or_else(|| field(raw, "image")),
        selected: false,
        desired_quantity: quantity(raw.get("quantity")),
    }
}

/// `max(1, numeric(quantity) || 1)`, truncated to a whole number
fn quantity(value: Option<&Value>) -> u32 {
    let numeric = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match numeric {
        Some(n) if n.is_finite() && n >= 1.0 => n.min(u32::MAX as f64) as u32,
        _ => 1,
    }
}

fn project(raw: &Value) -> Project {
    Project {
        id: field(raw, "id")
            .or_else(|| field(raw, "_id"))
            .unwrap_or_default(),
        name: field(raw, "name").unwrap_or_default(),
        address: field(raw, "address")
            .or_else(|| field(raw, "location"))
            .unwrap_or_default(),
        description: field(raw, "description"),
        image: field(raw, "image"),
        status: field(raw, "status"),
    }
}

/// `true`, `"true"` and `1` count as set
fn truthy_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        _ => false,
    }
}
