//! The set of entity identifiers observed during one request.
//!
//! The safety guard only lets a mutating call reference an identifier that is
//! already in this set. It is seeded from the resolved context and grows as
//! read tools return data. It lives for a single request and is never
//! persisted.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::context::{ContextId, EntityKind};

/// One observed `(kind, id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KnownEntity {
    pub kind: EntityKind,
    pub id: String,
}

impl KnownEntity {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

/// Identifiers surfaced to the model so far in this request.
#[derive(Debug, Clone, Default)]
pub struct KnownEntityIdSet {
    inner: HashSet<KnownEntity>,
}

impl KnownEntityIdSet {
    /// A set seeded with the active context, if it carries an id.
    pub fn from_context(context: Option<&ContextId>) -> Self {
        let mut set = Self::default();
        if let Some(ContextId { kind, id: Some(id) }) = context {
            set.observe(KnownEntity::new(*kind, id.clone()));
        }
        set
    }

    /// Record an identifier as observed.
    pub fn observe(&mut self, entity: KnownEntity) {
        self.inner.insert(entity);
    }

    /// Return true if `(kind, id)` has been observed.
    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        self.inner.contains(&KnownEntity::new(kind, id))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KnownEntity> {
        self.inner.iter()
    }
}

impl Extend<KnownEntity> for KnownEntityIdSet {
    fn extend<T: IntoIterator<Item = KnownEntity>>(&mut self, iter: T) {
        self.inner.extend(iter);
    }
}
