//! Schema repair and helpers
//!
//! Remote servers regularly publish input schemas that downstream tool-calling
//! APIs reject, most often array fields without `items`. [`normalize_schema`]
//! repairs those in place, recursively, and never fails: a keyword that cannot
//! be repaired is logged and left as it was.

use serde_json::{Map, Value, json};
use tracing::warn;

use crate::Result;
use crate::error::MCPError;

/// Create a JSON Schema object type
///
/// # Arguments
///
/// * `properties` - Map of property names to their schemas
/// * `required` - List of required property names
///
/// # Example
///
/// ```
/// use agent_mcp_adapters::schema::{object, string, number};
/// use serde_json::json;
///
/// let schema = object(
///     json!({
///         "name": string(Some("User's name")),
///         "age": number(Some("User's age")),
///     }),
///     vec!["name"],
/// );
/// assert_eq!(schema["required"][0], "name");
/// ```
pub fn object(properties: Value, required: Vec<&str>) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Create a JSON Schema string type
pub fn string(description: Option<&str>) -> Value {
    typed("string", description)
}

/// Create a JSON Schema number type
pub fn number(description: Option<&str>) -> Value {
    typed("number", description)
}

/// Create a JSON Schema integer type
pub fn integer(description: Option<&str>) -> Value {
    typed("integer", description)
}

/// Create a JSON Schema boolean type
pub fn boolean(description: Option<&str>) -> Value {
    typed("boolean", description)
}

/// Create a JSON Schema array type
///
/// # Arguments
///
/// * `items` - Schema for array items
/// * `description` - Optional description of the array field
pub fn array(items: Value, description: Option<&str>) -> Value {
    let mut schema = typed("array", description);
    schema["items"] = items;
    schema
}

fn typed(type_name: &str, description: Option<&str>) -> Value {
    match description {
        Some(d) => json!({ "type": type_name, "description": d }),
        None => json!({ "type": type_name }),
    }
}

/// Schema accepting any object
pub fn empty_object_schema() -> Value {
    object(json!({}), vec![])
}

/// Item schema for an array field that declared none, chosen by field name
fn default_items(field: Option<&str>) -> Value {
    match field {
        Some("actions") => object(
            json!({
                "type": string(None),
                "selector": string(None),
            }),
            vec![],
        ),
        _ => string(None),
    }
}

/// Repair `schema`, falling back to an empty object schema if the root is unusable
pub fn normalize_schema(schema: Option<&Value>) -> Value {
    try_normalize_schema(schema).unwrap_or_else(|e| {
        warn!("Using an unconstrained schema: {}", e);
        empty_object_schema()
    })
}

/// Repair `schema`, reporting a root that cannot be repaired
///
/// A missing or null schema yields an empty object schema; any other
/// non-object root is an error. The root gets `type: "object"` if it declares
/// no type, and object roots always end up with an object `properties` and an
/// array `required`. Every array-typed node without `items` then gets one (see
/// [`normalize_schema`]); a malformed keyword anywhere in the tree is logged
/// and skipped without undoing the rest of the repair.
pub fn try_normalize_schema(schema: Option<&Value>) -> Result<Value> {
    let mut root = match schema {
        None | Some(Value::Null) => return Ok(empty_object_schema()),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(MCPError::Schema(format!(
                "schema root must be an object, got {}",
                json_type(other)
            )));
        }
    };

    root.entry("type").or_insert_with(|| json!("object"));

    if has_type(&root, "object") {
        for (key, default) in [("properties", json!({})), ("required", json!([]))] {
            let slot = root.entry(key).or_insert(Value::Null);
            let well_formed = match key {
                "properties" => slot.is_object(),
                _ => slot.is_array(),
            };
            if !well_formed {
                if !slot.is_null() {
                    warn!("Replacing root '{}' ({}) with an empty one", key, json_type(slot));
                }
                *slot = default;
            }
        }
    }

    repair_node(&mut root, None);
    Ok(Value::Object(root))
}

/// Repair one schema node and then its children, pre-order
fn repair_node(node: &mut Map<String, Value>, field: Option<&str>) {
    if has_type(node, "array") && node.get("items").is_none_or(Value::is_null) {
        node.insert("items".to_string(), default_items(field));
    }

    match node.get_mut("properties") {
        None | Some(Value::Null) => {}
        Some(Value::Object(properties)) => {
            for (name, child) in properties.iter_mut() {
                repair_child(child, Some(name.as_str()));
            }
        }
        Some(other) => skip_keyword("properties", "an object", other, field),
    }

    match node.get_mut("items") {
        Some(Value::Array(tuple)) => tuple.iter_mut().for_each(|item| repair_child(item, None)),
        Some(items) => repair_child(items, None),
        None => {}
    }

    if let Some(Value::Object(patterns)) = node.get_mut("patternProperties") {
        for branch in patterns.values_mut() {
            repair_child(branch, None);
        }
    }

    for keyword in ["oneOf", "anyOf", "allOf"] {
        match node.get_mut(keyword) {
            None | Some(Value::Null) => {}
            Some(Value::Array(members)) => {
                for member in members.iter_mut() {
                    repair_child(member, field);
                }
            }
            Some(other) => skip_keyword(keyword, "an array", other, field),
        }
    }
}

fn repair_child(child: &mut Value, field: Option<&str>) {
    if let Value::Object(map) = child {
        repair_node(map, field);
    }
}

fn skip_keyword(keyword: &str, expected: &str, found: &Value, field: Option<&str>) {
    warn!(
        "Leaving '{}'{} as-is: expected {}, got {}",
        keyword,
        field.map(|f| format!(" under '{f}'")).unwrap_or_default(),
        expected,
        json_type(found)
    );
}

/// Whether `node` declares `type_name`, either alone or in a type list
fn has_type(node: &Map<String, Value>, type_name: &str) -> bool {
    match node.get("type") {
        Some(Value::String(t)) => t == type_name,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(type_name)),
        _ => false,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate that a value matches a JSON schema (basic validation)
///
/// Only the `type` keyword is checked, including type lists.
pub fn validate_basic(value: &Value, schema: &Value) -> bool {
    let matches = |schema_type: &str| match schema_type {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true, // Unknown type, accept
    };

    match schema.get("type") {
        Some(Value::String(t)) => matches(t),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).any(matches),
        _ => true, // No type constraint, accept anything
    }
}

/// Check tool arguments against a normalized object schema
///
/// Required keys must be present and every known top-level property must
/// match its declared type. Returns a caller-facing description of the first
/// problem found.
pub fn validate_arguments(
    arguments: &Map<String, Value>,
    schema: &Value,
) -> std::result::Result<(), String> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        if let Some(missing) = required
            .iter()
            .filter_map(Value::as_str)
            .find(|key| !arguments.contains_key(*key))
        {
            return Err(format!("missing required argument '{missing}'"));
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in arguments {
            if let Some(property) = properties.get(key) {
                if !validate_basic(value, property) {
                    return Err(format!(
                        "argument '{key}' should be {}, got {}",
                        property.get("type").map(Value::to_string).unwrap_or_default(),
                        json_type(value)
                    ));
                }
            }
        }
    }

    Ok(())
}
