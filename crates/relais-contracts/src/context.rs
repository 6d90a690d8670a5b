//! Entity kinds and the per-request context scope.
//!
//! The caller tells the assistant which screen the user is on as `kind` or
//! `kind:id` (or an equivalent `{ "kind": ..., "id": ... }` object). The
//! resolved [`ContextId`] is built once per request and never mutated.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RelaisError, RelaisResult};

/// The closed set of business entity kinds a context or identifier can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Dashboard,
    Client,
    Deal,
    Mission,
    Invoice,
    Quote,
    Contact,
    Proposal,
    Brief,
    Review,
    Settings,
}

impl EntityKind {
    pub const ALL: [EntityKind; 11] = [
        EntityKind::Dashboard,
        EntityKind::Client,
        EntityKind::Deal,
        EntityKind::Mission,
        EntityKind::Invoice,
        EntityKind::Quote,
        EntityKind::Contact,
        EntityKind::Proposal,
        EntityKind::Brief,
        EntityKind::Review,
        EntityKind::Settings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Dashboard => "dashboard",
            EntityKind::Client => "client",
            EntityKind::Deal => "deal",
            EntityKind::Mission => "mission",
            EntityKind::Invoice => "invoice",
            EntityKind::Quote => "quote",
            EntityKind::Contact => "contact",
            EntityKind::Proposal => "proposal",
            EntityKind::Brief => "brief",
            EntityKind::Review => "review",
            EntityKind::Settings => "settings",
        }
    }

    /// Global kinds describe whole screens rather than a single record, so
    /// they carry no identifier.
    pub fn is_global(&self) -> bool {
        matches!(self, EntityKind::Dashboard | EntityKind::Settings)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = RelaisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RelaisError::InvalidContext {
                reason: format!("unknown entity kind '{s}'"),
            })
    }
}

/// The entity the user is currently viewing.
///
/// Invariant: `id` is `Some` and non-empty for every non-global kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextId {
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ContextId {
    /// Build a context, enforcing the id-presence invariant.
    ///
    /// The id is trimmed; an empty (or whitespace-only) id is treated as
    /// absent.
    pub fn new(kind: EntityKind, id: Option<String>) -> RelaisResult<Self> {
        let id = id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty());
        if id.is_none() && !kind.is_global() {
            return Err(RelaisError::InvalidContext {
                reason: format!("context kind '{kind}' requires an id"),
            });
        }
        Ok(Self { kind, id })
    }

    /// Parse the `kind` / `kind:id` string form.
    ///
    /// Rejects more than one separator and empty segments, even when the
    /// leading segment names a valid kind.
    pub fn parse(raw: &str) -> RelaisResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RelaisError::InvalidContext {
                reason: "context is empty".to_string(),
            });
        }

        let segments: Vec<&str> = raw.split(':').collect();
        if segments.len() > 2 {
            return Err(RelaisError::InvalidContext {
                reason: format!("malformed context '{raw}': expected 'kind' or 'kind:id'"),
            });
        }
        if segments.iter().any(|s| s.trim().is_empty()) {
            return Err(RelaisError::InvalidContext {
                reason: format!("malformed context '{raw}': empty segment"),
            });
        }

        let kind: EntityKind = segments[0].trim().parse()?;
        let id = segments.get(1).map(|s| s.to_string());
        Self::new(kind, id)
    }

    /// Resolve the raw `contextId` request field.
    ///
    /// Accepts a string, a `{ kind, id }` object, or `null` (no context).
    pub fn resolve(raw: Option<&Value>) -> RelaisResult<Option<Self>> {
        match raw {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Self::parse(s).map(Some),
            Some(Value::Object(map)) => {
                let kind = match map.get("kind") {
                    Some(Value::String(kind)) => kind.parse::<EntityKind>()?,
                    _ => {
                        return Err(RelaisError::InvalidContext {
                            reason: "context object requires a string 'kind'".to_string(),
                        })
                    }
                };
                let id = match map.get("id") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(id)) => Some(id.clone()),
                    Some(_) => {
                        return Err(RelaisError::InvalidContext {
                            reason: "context 'id' must be a string".to_string(),
                        })
                    }
                };
                Self::new(kind, id).map(Some)
            }
            Some(_) => Err(RelaisError::InvalidContext {
                reason: "context must be a string, an object or null".to_string(),
            }),
        }
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => write!(f, "{}", self.kind),
        }
    }
}
