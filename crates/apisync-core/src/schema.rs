//! Namespace schema sent once to every new connection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kind of a namespace leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafKind {
    /// Callable procedure.
    Function,
    /// Broadcast-only signal.
    Signal,
    /// Signal with persisted per-dependency values.
    State,
}

impl LeafKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Signal => "signal",
            Self::State => "state",
        }
    }

    /// Whether the leaf accepts subscriptions.
    pub fn is_subscribable(self) -> bool {
        matches!(self, Self::Signal | Self::State)
    }
}

/// Dotted path → leaf kind for every registered leaf.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    entries: BTreeMap<String, LeafKind>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a leaf. Returns the previous kind if the path was already present.
    pub fn insert(&mut self, path: impl Into<String>, kind: LeafKind) -> Option<LeafKind> {
        self.entries.insert(path.into(), kind)
    }

    /// Kind of the leaf at `path`, if registered.
    pub fn kind(&self, path: &str) -> Option<LeafKind> {
        self.entries.get(path).copied()
    }

    /// Whether `path` names a registered leaf.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Iterate `(path, kind)` in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, LeafKind)> {
        self.entries.iter().map(|(p, k)| (p.as_str(), *k))
    }

    /// Paths of a given kind, in path order.
    pub fn paths_of(&self, kind: LeafKind) -> Vec<&str> {
        self.iter()
            .filter(|(_, k)| *k == kind)
            .map(|(p, _)| p)
            .collect()
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the schema has no leaves.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
