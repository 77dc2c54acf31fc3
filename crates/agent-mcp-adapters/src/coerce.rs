//! Best-effort shaping of loose tool input into an argument map
//!
//! Models do not always call tools with a clean JSON object. They send a
//! bare string, a fenced code block, or JavaScript-style object literals.
//! [`coerce_input`] tries a fixed list of rules in order; the first one that
//! produces a map wins and parse failures fall through to the next rule.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```[\w-]*[ \t]*\r?\n?(.*?)```").ok());

/// Turn arbitrary caller input into the argument map sent with a tool call
///
/// | input | result |
/// |---|---|
/// | object | unchanged |
/// | blank string | `{}` |
/// | string with a fenced JSON object | that object |
/// | string shaped like `{...}` | the object, after repairing unquoted keys and single quotes |
/// | other string without `:` or `{` | `{"input": <string>}` |
/// | array | `{"inputs": <array>}` |
/// | number or boolean | `{"value": <primitive>}` |
/// | anything else | `{}` |
pub fn coerce_input(input: Value) -> Map<String, Value> {
    match input {
        Value::Object(map) => map,
        Value::String(text) => coerce_string(&text),
        Value::Array(_) => single("inputs", input),
        Value::Number(_) | Value::Bool(_) => single("value", input),
        Value::Null => Map::new(),
    }
}

fn coerce_string(text: &str) -> Map<String, Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Map::new();
    }

    if let Some(map) = from_fenced_block(trimmed) {
        return map;
    }

    if let Some(map) = from_object_literal(trimmed) {
        return map;
    }

    if !trimmed.contains(':') && !trimmed.contains('{') {
        return single("input", Value::String(text.to_string()));
    }

    Map::new()
}

fn single(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn from_fenced_block(text: &str) -> Option<Map<String, Value>> {
    let captures = FENCED_BLOCK.as_ref()?.captures(text)?;
    parse_object(captures.get(1)?.as_str().trim())
}

fn from_object_literal(text: &str) -> Option<Map<String, Value>> {
    if !(text.starts_with('{') && text.ends_with('}')) {
        return None;
    }
    parse_object(text).or_else(|| parse_object(&repair_loose_json(text)))
}

/// Quote bare object keys and turn single-quoted strings into JSON strings
pub(crate) fn repair_loose_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    // last structural character emitted outside a string
    let mut last: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' {
            let end = end_of_double_quoted(&chars, i);
            out.extend(&chars[i..end]);
            last = Some('"');
            i = end;
        } else if c == '\'' {
            let (converted, end) = convert_single_quoted(&chars, i);
            out.push_str(&converted);
            last = Some('"');
            i = end;
        } else if is_ident_start(c) && matches!(last, Some('{' | ',')) {
            let mut end = i;
            while end < chars.len() && is_ident_char(chars[end]) {
                end += 1;
            }
            let ident: String = chars[i..end].iter().collect();
            let next = chars[end..].iter().find(|ch| !ch.is_whitespace());
            if next == Some(&':') {
                out.push('"');
                out.push_str(&ident);
                out.push('"');
            } else {
                out.push_str(&ident);
            }
            last = Some('a');
            i = end;
        } else {
            out.push(c);
            if !c.is_whitespace() {
                last = Some(c);
            }
            i += 1;
        }
    }

    out
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '-')
}

/// Index just past the closing quote of the string starting at `start`
fn end_of_double_quoted(chars: &[char], start: usize) -> usize {
    let mut j = start + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            '"' => return j + 1,
            _ => j += 1,
        }
    }
    chars.len()
}

/// Re-emit the single-quoted string at `start` as a JSON string
fn convert_single_quoted(chars: &[char], start: usize) -> (String, usize) {
    let mut out = String::from("\"");
    let mut j = start + 1;

    while j < chars.len() {
        match chars[j] {
            '\\' if chars.get(j + 1) == Some(&'\'') => {
                out.push('\'');
                j += 2;
            }
            '\\' => {
                out.push('\\');
                if let Some(&next) = chars.get(j + 1) {
                    out.push(next);
                }
                j += 2;
            }
            '"' => {
                out.push_str("\\\"");
                j += 1;
            }
            '\'' => {
                out.push('"');
                return (out, j + 1);
            }
            other => {
                out.push(other);
                j += 1;
            }
        }
    }

    out.push('"');
    (out, chars.len())
}
