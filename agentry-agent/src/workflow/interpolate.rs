//! Variable references in step inputs and conditions.
//!
//! `${name}` and `$name` look a variable up; a dotted path walks into it
//! (`$prev.summary`, `${report.items.0}`). `prev` names the output of the
//! last completed step. Strings render as-is, anything else as JSON.

use super::PREV;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*([A-Za-z_][\w-]*(?:\.[\w-]+)*)\s*\}|\$([A-Za-z_]\w*(?:\.\w+)*)").unwrap()
});

/// Resolve a dotted reference such as `prev.items.0.name`
pub fn lookup(variables: &HashMap<String, Value>, reference: &str) -> Option<Value> {
    let mut segments = reference.split('.');
    let head = segments.next()?;
    let root = if head == "prev" {
        variables.get(PREV)
    } else {
        variables.get(head)
    }?;

    let mut current = root.clone();
    for segment in segments {
        current = descend(current, segment)?;
    }
    Some(current)
}

fn descend(value: Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(mut map) => map.remove(segment),
        Value::Array(mut items) => {
            let idx: usize = segment.parse().ok()?;
            (idx < items.len()).then(|| items.swap_remove(idx))
        }
        // Agent output is often JSON carried in a string
        Value::String(s) => {
            let parsed: Value = serde_json::from_str(&s).ok()?;
            match parsed {
                Value::Object(_) | Value::Array(_) => descend(parsed, segment),
                _ => None,
            }
        }
        _ => None,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn replace(template: &str, variables: &HashMap<String, Value>, keep_missing: bool) -> String {
    REFERENCE
        .replace_all(template, |caps: &Captures| {
            let reference = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            match lookup(variables, reference) {
                Some(value) => render(&value),
                None if keep_missing => caps[0].to_string(),
                None => String::new(),
            }
        })
        .into_owned()
}

/// Substitute every resolvable reference; unresolved ones stay verbatim
pub fn interpolate(template: &str, variables: &HashMap<String, Value>) -> String {
    replace(template, variables, true)
}

/// `a == b`, `a != b`, or the truthiness of a single operand.
///
/// Unresolved references count as empty. Operands may be quoted.
pub fn evaluate_condition(expr: &str, variables: &HashMap<String, Value>) -> bool {
    let expr = expr.trim();
    if let Some((lhs, rhs)) = expr.split_once("!=") {
        return operand(lhs, variables) != operand(rhs.trim_start_matches('='), variables);
    }
    if let Some((lhs, rhs)) = expr.split_once("==") {
        return operand(lhs, variables) == operand(rhs.trim_start_matches('='), variables);
    }
    truthy(&operand(expr, variables))
}

fn operand(raw: &str, variables: &HashMap<String, Value>) -> String {
    let resolved = replace(raw.trim(), variables, false);
    let resolved = resolved.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = resolved
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return inner.to_string();
        }
    }
    resolved.to_string()
}

fn truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "false" | "0" | "no" | "null" | "undefined"
    )
}
