//! Turning untrusted call arguments into a schema-checked JSON object.
//!
//! Parsing and schema validation are separate steps with separate codes:
//! text that is not JSON at all is `MalformedArguments`; JSON that does not
//! match the tool's schema is `InvalidArguments`.

use jsonschema::{error::ValidationErrorKind, Validator};
use serde_json::{Map, Value};

use relais_contracts::error::{RelaisError, RelaisResult};

/// Parse the transport form of a call's arguments.
///
/// Objects pass through. Strings are parsed as JSON. `null` and blank
/// strings mean "no arguments". Any other parsed value is returned as-is
/// and left for the schema check to reject.
pub fn parse_arguments(tool: &str, raw: &Value) -> RelaisResult<Value> {
    match raw {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::String(text) if text.trim().is_empty() => Ok(Value::Object(Map::new())),
        Value::String(text) => {
            serde_json::from_str(text).map_err(|e| RelaisError::MalformedArguments {
                tool: tool.to_string(),
                reason: format!("arguments are not valid JSON: {e}"),
            })
        }
        other => Ok(other.clone()),
    }
}

/// Check parsed arguments against the compiled schema.
///
/// Reports the first violation only, naming the offending field as a JSON
/// pointer. A missing required property is reported at the property's own
/// pointer rather than at its parent.
pub fn check_schema(tool: &str, validator: &Validator, arguments: &Value) -> RelaisResult<()> {
    if !arguments.is_object() {
        return Err(RelaisError::InvalidArguments {
            tool: tool.to_string(),
            field: "/".to_string(),
            reason: "arguments must be a JSON object".to_string(),
        });
    }

    match validator.iter_errors(arguments).next() {
        None => Ok(()),
        Some(error) => {
            let mut field = error.instance_path.to_string();
            if let ValidationErrorKind::Required { property } = &error.kind {
                let name = property.as_str().map(str::to_string).unwrap_or_else(|| property.to_string());
                field = format!("{field}/{name}");
            }
            if field.is_empty() {
                field = "/".to_string();
            }
            Err(RelaisError::InvalidArguments {
                tool: tool.to_string(),
                field,
                reason: error.to_string(),
            })
        }
    }
}
