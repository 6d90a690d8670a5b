//! Read-before-write enforcement.
//!
//! A mutating call may only reference entity identifiers that were already
//! surfaced to the model in this request: the active context id, or ids a
//! read tool returned. This stops a model from acting on an identifier it
//! guessed or hallucinated.
//!
//! Which argument fields carry identifiers is declared per tool
//! (`entity_refs`). Which identifiers a read result surfaces is derived from
//! its `data`:
//!
//! - an `id` key counts as an id of the tool's `result_kind`
//! - a `<kind>_id` or `<kind>Id` key counts as an id of that kind
//!
//! Both rules apply at any depth.

use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use relais_contracts::{
    context::{ContextId, EntityKind},
    error::{RelaisError, RelaisResult},
    known::{KnownEntity, KnownEntityIdSet},
    tool::{ToolDefinition, ToolResult, ValidatedCall},
};
use relais_core::traits::SafetyGuard;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReadBeforeWriteGuard;

impl ReadBeforeWriteGuard {
    pub fn new() -> Self {
        Self
    }
}

impl SafetyGuard for ReadBeforeWriteGuard {
    fn check(
        &self,
        definition: &ToolDefinition,
        call: &ValidatedCall,
        known: &KnownEntityIdSet,
        context: Option<&ContextId>,
    ) -> RelaisResult<Vec<KnownEntity>> {
        let context_id = context.and_then(|ctx| ctx.id.as_deref());
        let mut verified = Vec::new();

        for reference in &definition.entity_refs {
            let segments: Vec<&str> = reference.field.split('.').collect();
            let mut values = Vec::new();
            collect_at(&call.arguments, &segments, &mut values);

            for value in values {
                for id in identifiers(definition, &reference.field, value)? {
                    let accepted = known.contains(reference.kind, &id) || context_id == Some(id.as_str());
                    if !accepted {
                        warn!(
                            tool = %definition.name,
                            tool_call_id = %call.id,
                            field = %reference.field,
                            kind = %reference.kind,
                            id = %id,
                            "unverified entity reference"
                        );
                        return Err(RelaisError::UnverifiedReference {
                            tool: definition.name.clone(),
                            field: reference.field.clone(),
                            kind: reference.kind.to_string(),
                            id,
                        });
                    }
                    verified.push(KnownEntity::new(reference.kind, id));
                }
            }
        }

        verified.sort();
        verified.dedup();
        debug!(tool = %definition.name, verified = verified.len(), "entity references verified");
        Ok(verified)
    }

    fn harvest(&self, definition: &ToolDefinition, result: &ToolResult) -> Vec<KnownEntity> {
        let mut found = Vec::new();
        if result.success {
            if let Some(data) = &result.data {
                harvest_into(data, definition.result_kind, &mut found);
            }
        }
        found
    }
}

/// Walk a dotted path, fanning out over arrays. Missing and null leaves are
/// skipped, so optional references cost nothing.
fn collect_at<'v>(value: &'v Value, segments: &[&str], out: &mut Vec<&'v Value>) {
    match (value, segments.split_first()) {
        (Value::Null, _) => {}
        (Value::Array(items), Some(_)) => {
            for item in items {
                collect_at(item, segments, out);
            }
        }
        (Value::Object(map), Some((head, rest))) => {
            if let Some(next) = map.get(*head) {
                collect_at(next, rest, out);
            }
        }
        (_, Some(_)) => {}
        (leaf, None) => out.push(leaf),
    }
}

/// The identifiers held by one argument value: a string, an integer, or an
/// array of either.
fn identifiers(definition: &ToolDefinition, field: &str, value: &Value) -> RelaisResult<Vec<String>> {
    let bad_type = || RelaisError::InvalidArguments {
        tool: definition.name.clone(),
        field: format!("/{}", field.replace('.', "/")),
        reason: "entity identifier must be a string or an integer".to_string(),
    };

    match value {
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| scalar_id(item).ok_or_else(bad_type))
            .collect(),
        other => scalar_id(other).map(|id| vec![id]).ok_or_else(bad_type),
    }
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

fn harvest_into(value: &Value, result_kind: Option<EntityKind>, out: &mut Vec<KnownEntity>) {
    match value {
        Value::Array(items) => {
            for item in items {
                harvest_into(item, result_kind, out);
            }
        }
        Value::Object(map) => {
            for (key, field) in map {
                let kind = if key == "id" { result_kind } else { kind_of_key(key) };
                if let (Some(kind), Some(id)) = (kind, scalar_id(field)) {
                    out.push(KnownEntity::new(kind, id));
                }
                harvest_into(field, result_kind, out);
            }
        }
        _ => {}
    }
}

/// `client_id` and `clientId` both name a client.
fn kind_of_key(key: &str) -> Option<EntityKind> {
    let prefix = key.strip_suffix("_id").or_else(|| key.strip_suffix("Id"))?;
    EntityKind::from_str(prefix).ok()
}
