//! Tool-call argument parsing shared by every adapter.
//!
//! Models regularly emit arguments wrapped in markdown fences or cut off
//! mid-object when they hit the output limit. The result is always a JSON
//! object; anything that can't be recovered becomes an empty mapping plus a
//! diagnostic, so the tool fails with a clear "missing arguments" error.

use conclave_core::context::{Arguments, ToolCall};
use conclave_core::ids::ToolCallId;
use serde_json::Value;
use tracing::warn;

/// Parsed arguments plus a note when the raw text was not clean JSON.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedArguments {
    pub arguments: Arguments,
    pub diagnostic: Option<String>,
}

impl ParsedArguments {
    fn clean(arguments: Arguments) -> Self {
        Self {
            arguments,
            diagnostic: None,
        }
    }

    fn noted(arguments: Arguments, note: impl Into<String>) -> Self {
        Self {
            arguments,
            diagnostic: Some(note.into()),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostic.is_none()
    }

    /// Build the tool call, carrying the diagnostic along.
    pub fn into_call(self, id: impl Into<ToolCallId>, name: impl Into<String>) -> ToolCall {
        let call = ToolCall::new(id, name, self.arguments);
        match self.diagnostic {
            Some(note) => call.with_diagnostic(note),
            None => call,
        }
    }
}

const PREVIEW_CHARS: usize = 200;

fn preview(raw: &str) -> String {
    raw.chars().take(PREVIEW_CHARS).collect()
}

/// Parse raw tool-call arguments into a mapping.
pub fn parse_tool_arguments(raw: &str) -> ParsedArguments {
    let mut text = raw.trim();
    if text.is_empty() {
        return ParsedArguments::default();
    }

    if let Some(rest) = text.strip_prefix("```") {
        // Drop the fence line (```json) and a closing fence, if present.
        text = match rest.find('\n') {
            Some(nl) => &rest[nl + 1..],
            None => rest,
        };
        text = text.trim_end();
        text = text.strip_suffix("```").unwrap_or(text).trim();
        if text.is_empty() {
            return ParsedArguments::default();
        }
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => ParsedArguments::clean(map),
        Ok(other) => {
            let kind = json_kind(&other);
            warn!(kind, raw = %preview(raw), "tool arguments are not an object");
            ParsedArguments::noted(
                Arguments::new(),
                format!("arguments parsed to {kind} instead of an object"),
            )
        }
        Err(parse_err) => match repair_incomplete_json(text)
            .and_then(|fixed| serde_json::from_str::<Value>(&fixed).ok())
        {
            Some(Value::Object(map)) => {
                ParsedArguments::noted(map, format!("repaired truncated arguments: {parse_err}"))
            }
            _ => {
                warn!(raw = %preview(raw), error = %parse_err, "malformed tool arguments");
                ParsedArguments::noted(
                    Arguments::new(),
                    format!("malformed arguments: {parse_err}"),
                )
            }
        },
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Close a truncated JSON document: terminate an open string, drop a
/// dangling `,` or complete a dangling `:` with `null`, then close every
/// open bracket and brace in nesting order.
///
/// Returns `None` when nothing is left open.
pub fn repair_incomplete_json(text: &str) -> Option<String> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for ch in text.chars() {
        if escape {
            escape = false;
            continue;
        }
        if in_string {
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
            }
            _ => {}
        }
    }

    if stack.is_empty() && !in_string {
        return None;
    }

    let mut out = text.to_string();
    if in_string {
        if escape {
            out.pop();
        }
        out.push('"');
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    } else if out.ends_with(':') {
        out.push_str("null");
    }

    out.extend(stack.iter().rev());
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(raw: &str) -> Value {
        Value::Object(parse_tool_arguments(raw).arguments)
    }

    #[test]
    fn clean_object() {
        let parsed = parse_tool_arguments(r#"{"q": "test", "n": 3}"#);
        assert!(parsed.is_clean());
        assert_eq!(Value::Object(parsed.arguments), json!({"q": "test", "n": 3}));
    }

    #[test]
    fn empty_and_blank() {
        assert!(parse_tool_arguments("").arguments.is_empty());
        assert!(parse_tool_arguments("   ").arguments.is_empty());
        assert!(parse_tool_arguments("").is_clean());
    }

    #[test]
    fn strips_code_fences() {
        assert_eq!(args("```json\n{\"a\": 1}\n```"), json!({"a": 1}));
        assert_eq!(args("```\n{\"a\": 1}\n```"), json!({"a": 1}));
        assert!(parse_tool_arguments("```json\n```").arguments.is_empty());
    }

    #[test]
    fn repairs_truncated_string() {
        let parsed = parse_tool_arguments(r#"{"q": "te"#);
        assert_eq!(Value::Object(parsed.arguments.clone()), json!({"q": "te"}));
        assert!(parsed.diagnostic.unwrap().contains("repaired"));
    }

    #[test]
    fn repairs_nested_in_order() {
        assert_eq!(
            args(r#"{"items": [{"id": 1}, {"id": 2"#),
            json!({"items": [{"id": 1}, {"id": 2}]})
        );
    }

    #[test]
    fn repairs_dangling_separators() {
        assert_eq!(args(r#"{"a": 1,"#), json!({"a": 1}));
        assert_eq!(args(r#"{"a": 1, "b":"#), json!({"a": 1, "b": null}));
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        assert_eq!(args(r#"{"code": "fn() { x"#), json!({"code": "fn() { x"}));
    }

    #[test]
    fn non_object_becomes_empty_with_diagnostic() {
        let parsed = parse_tool_arguments("[1, 2, 3]");
        assert!(parsed.arguments.is_empty());
        assert!(parsed.diagnostic.unwrap().contains("array"));

        let parsed = parse_tool_arguments(r#""just a string""#);
        assert!(parsed.arguments.is_empty());
    }

    #[test]
    fn unrecoverable_becomes_empty() {
        let parsed = parse_tool_arguments("not json at all");
        assert!(parsed.arguments.is_empty());
        assert!(parsed.diagnostic.unwrap().starts_with("malformed"));

        // Mismatched closer cannot be repaired.
        assert!(parse_tool_arguments(r#"{"a": [1}"#).arguments.is_empty());
    }

    #[test]
    fn repair_returns_none_when_balanced() {
        assert_eq!(repair_incomplete_json(r#"{"a": 1}"#), None);
        assert_eq!(repair_incomplete_json(r#"{"a": tru}"#), None);
    }

    #[test]
    fn into_call_keeps_diagnostic() {
        let clean = parse_tool_arguments(r#"{"q": "x"}"#).into_call("t1", "lookup");
        assert_eq!(clean.diagnostic, None);
        assert_eq!(clean.arguments["q"], json!("x"));

        let broken = parse_tool_arguments("not json at all").into_call("t2", "lookup");
        assert!(broken.is_unparsable());
        assert_eq!(broken.id.as_str(), "t2");
    }
}
