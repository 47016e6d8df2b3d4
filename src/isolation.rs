//! # Isolation Policy Resolver
//!
//! Translates a human-supplied label into the [`IsolationLevel`] a store
//! transaction is opened with. Resolution is pure: an unknown label yields
//! `None` and the caller decides whether that is fatal.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Transactional isolation modes understood by the store layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Every statement sees the data committed before it started.
    ReadCommitted,
    /// Every statement sees the snapshot taken when the transaction began.
    /// Updating a row changed by a concurrent committed transaction fails.
    RepeatableRead,
    /// Repeatable read plus commit-time validation of everything read.
    Serializable,
}

/// Raised when a label does not name any [`IsolationLevel`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid isolation level: {0:?} (expected read committed, repeatable read or serializable)")]
pub struct UnresolvedIsolationLevel(pub String);

impl IsolationLevel {
    pub const ALL: [IsolationLevel; 3] = [
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// Resolves a case-insensitive label such as `"Read Committed"`.
    ///
    /// Words may be separated by spaces, hyphens or underscores.
    pub fn resolve(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .chars()
            .map(|c| match c {
                '-' | '_' => ' ',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match normalized.as_str() {
            "read committed" => Some(IsolationLevel::ReadCommitted),
            "repeatable read" => Some(IsolationLevel::RepeatableRead),
            "serializable" => Some(IsolationLevel::Serializable),
            _ => None,
        }
    }

    /// The canonical label, as the datastore spells it.
    pub fn label(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "read committed",
            IsolationLevel::RepeatableRead => "repeatable read",
            IsolationLevel::Serializable => "serializable",
        }
    }

    /// Whether reads are served from a snapshot fixed at `begin`.
    pub fn uses_snapshot(self) -> bool {
        !matches!(self, IsolationLevel::ReadCommitted)
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for IsolationLevel {
    type Err = UnresolvedIsolationLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::resolve(s).ok_or_else(|| UnresolvedIsolationLevel(s.to_string()))
    }
}

impl Serialize for IsolationLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}
