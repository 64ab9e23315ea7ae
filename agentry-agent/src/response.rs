//! Turning a model reply into an action.
//!
//! Model output is untrusted. Everything goes through [`parse_action`]; a
//! failure there becomes an `error` step, never a crashed loop.
//!
//! Accepted forms, in order of precedence:
//! - native tool calls on the response (the first one wins)
//! - a JSON object `{"thought", "action", "params"}`, bare or inside a
//!   ```` ```json ```` fence, optionally surrounded by prose

use agentry_core::{CompletionResponse, Error, Result};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAction {
    pub thought: String,
    pub action: String,
    /// Always a JSON object
    pub params: Value,
    /// Set when the action came from a native tool call
    pub tool_call_id: Option<String>,
}

impl ParsedAction {
    pub fn is_complete(&self) -> bool {
        self.action == "complete"
    }

    pub fn is_delegate(&self) -> bool {
        self.action == "delegate"
    }

    /// The answer of a `complete` action: `params.result`, else the params
    /// themselves when they carry anything
    pub fn result(&self) -> Value {
        match self.params.get("result") {
            Some(result) => result.clone(),
            None if self.params.as_object().is_some_and(|o| !o.is_empty()) => self.params.clone(),
            None => Value::Null,
        }
    }

    pub fn delegate_target(&self) -> Option<&str> {
        self.params
            .get("agent")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Delegation input as text; structured input is passed on as JSON
    pub fn delegate_input(&self) -> String {
        match self.params.get("input") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

pub fn parse_action(response: &CompletionResponse) -> Result<ParsedAction> {
    let thought = response.content.as_deref().unwrap_or("").trim().to_string();

    if let Some(call) = response.tool_calls.first() {
        let params = if call.arguments.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            call.parse_arguments::<Value>().map_err(|e| {
                Error::malformed_response(format!("tool call `{}` has invalid arguments", call.name))
                    .with_operation("response::parse_action")
                    .set_source(e)
            })?
        };
        return Ok(ParsedAction {
            thought,
            action: call.name.clone(),
            params: as_object(params)?,
            tool_call_id: Some(call.id.clone()),
        });
    }

    let content = response.content.as_deref().unwrap_or("");
    if content.trim().is_empty() {
        return Err(Error::malformed_response("empty response").with_operation("response::parse_action"));
    }

    let json_str = extract_json(content);
    let value: Value = serde_json::from_str(json_str).map_err(|e| {
        Error::malformed_response("response is not a JSON action")
            .with_operation("response::parse_action")
            .with_context("content", truncate(content, 200))
            .set_source(e)
    })?;
    let Value::Object(mut obj) = value else {
        return Err(Error::malformed_response("response JSON is not an object")
            .with_operation("response::parse_action"));
    };

    let action = match obj.remove("action") {
        Some(Value::String(a)) if !a.trim().is_empty() => a.trim().to_string(),
        _ => {
            return Err(Error::malformed_response("missing `action` field")
                .with_operation("response::parse_action"))
        }
    };
    let thought = match obj.remove("thought") {
        Some(Value::String(t)) => t,
        _ => String::new(),
    };
    let mut params = as_object(obj.remove("params").unwrap_or(Value::Null))?;

    if action == "complete" && params.get("result").is_none() {
        if let (Some(result), Some(map)) = (obj.remove("result"), params.as_object_mut()) {
            map.insert("result".into(), result);
        }
    }

    Ok(ParsedAction {
        thought,
        action,
        params,
        tool_call_id: None,
    })
}

fn as_object(value: Value) -> Result<Value> {
    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        _ => Err(Error::malformed_response("`params` must be an object")
            .with_operation("response::parse_action")),
    }
}

/// Pull the JSON payload out of markdown fences or surrounding prose
fn extract_json(content: &str) -> &str {
    let fenced = if content.contains("```json") {
        content
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
    } else if content.contains("```") {
        content.split("```").nth(1)
    } else {
        None
    };
    if let Some(inner) = fenced {
        return inner.trim();
    }

    let trimmed = content.trim();
    if trimmed.starts_with('{') {
        return trimmed;
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}…", head)
    }
}
