//! The tool registry: a TOML catalogue compiled into a call validator.
//!
//! `ToolRegistry` loads tool definitions once at startup, compiles each
//! argument schema, and implements the `CallValidator` trait from
//! relais-core. After load it is immutable.
//!
//! Validation order for a proposed call:
//!
//! 1. Exact name lookup → `UnknownTool` on miss.
//! 2. Argument parsing → `MalformedArguments` on unparsable text.
//! 3. Schema check → `InvalidArguments` naming the first bad field.

use std::collections::HashMap;
use std::path::Path;

use jsonschema::Validator;
use serde::Deserialize;
use tracing::{debug, info, warn};

use relais_contracts::{
    error::{RelaisError, RelaisResult},
    tool::{ToolCall, ToolDefinition, ValidatedCall},
};
use relais_core::traits::CallValidator;

use crate::arguments::{check_schema, parse_arguments};

/// On-disk catalogue layout: a list of `[[tools]]` tables.
#[derive(Debug, Deserialize)]
struct Catalogue {
    #[serde(default)]
    tools: Vec<ToolDefinition>,
}

struct Entry {
    definition: ToolDefinition,
    schema: Validator,
}

/// The immutable set of tools the model may call.
pub struct ToolRegistry {
    entries: Vec<Entry>,
    by_name: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.entries.iter().map(|e| &e.definition.name).collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Parse `s` as a TOML catalogue.
    ///
    /// Returns `RelaisError::ConfigError` if the TOML is malformed or any
    /// definition is rejected by [`ToolRegistry::from_definitions`].
    pub fn from_toml_str(s: &str) -> RelaisResult<Self> {
        let catalogue: Catalogue = toml::from_str(s).map_err(|e| RelaisError::ConfigError {
            reason: format!("failed to parse tool catalogue TOML: {e}"),
        })?;
        Self::from_definitions(catalogue.tools)
    }

    /// Read the catalogue file at `path`.
    pub fn from_file(path: &Path) -> RelaisResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| RelaisError::ConfigError {
            reason: format!("failed to read tool catalogue '{}': {}", path.display(), e),
        })?;
        let registry = Self::from_toml_str(&contents)?;
        info!(path = %path.display(), tools = registry.len(), "tool catalogue loaded");
        Ok(registry)
    }

    /// Build a registry from definitions, compiling every schema.
    ///
    /// Rejects duplicate names, uncompilable schemas, destructive tools that
    /// do not mutate, and read tools that declare `entity_refs`.
    pub fn from_definitions(definitions: Vec<ToolDefinition>) -> RelaisResult<Self> {
        let mut entries = Vec::with_capacity(definitions.len());
        let mut by_name = HashMap::with_capacity(definitions.len());

        for definition in definitions {
            let reject = |reason: String| RelaisError::ConfigError {
                reason: format!("tool '{}': {reason}", definition.name),
            };

            if definition.name.trim().is_empty() {
                return Err(RelaisError::ConfigError {
                    reason: "tool with an empty name".to_string(),
                });
            }
            if by_name.contains_key(&definition.name) {
                return Err(reject("declared more than once".to_string()));
            }
            if definition.destructive && !definition.mutates {
                return Err(reject("destructive tools must also set mutates".to_string()));
            }
            if !definition.mutates && !definition.entity_refs.is_empty() {
                return Err(reject("read tools cannot declare entity_refs".to_string()));
            }

            let schema = jsonschema::validator_for(&definition.arguments)
                .map_err(|e| reject(format!("argument schema does not compile: {e}")))?;

            debug!(
                tool = %definition.name,
                mutates = definition.mutates,
                destructive = definition.destructive,
                "tool registered"
            );
            by_name.insert(definition.name.clone(), entries.len());
            entries.push(Entry { definition, schema });
        }

        Ok(Self { entries, by_name })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.by_name.get(name).map(|&index| &self.entries[index])
    }
}

impl CallValidator for ToolRegistry {
    fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.entry(name).map(|entry| &entry.definition)
    }

    fn definitions(&self) -> Vec<&ToolDefinition> {
        self.entries.iter().map(|entry| &entry.definition).collect()
    }

    fn validate(&self, call: &ToolCall) -> RelaisResult<ValidatedCall> {
        // ── Step 1: Exact name lookup ────────────────────────────────────────
        let entry = self.entry(&call.name).ok_or_else(|| {
            warn!(tool = %call.name, tool_call_id = %call.id, "model proposed an unknown tool");
            RelaisError::UnknownTool { tool: call.name.clone() }
        })?;

        // ── Step 2: Parse ────────────────────────────────────────────────────
        let arguments = parse_arguments(&call.name, &call.arguments)?;

        // ── Step 3: Schema ───────────────────────────────────────────────────
        check_schema(&call.name, &entry.schema, &arguments)?;

        Ok(ValidatedCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        })
    }
}
