use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a contended resource (a seat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seat_{}", self.0)
    }
}

impl From<u64> for ResourceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Committed state of a resource.
///
/// At any committed point in time exactly one of these holds. The
/// transition `Available -> Reserved` only happens inside a reservation
/// transaction; the reverse only through a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Available,
    Reserved,
}

impl ResourceState {
    pub fn is_available(self) -> bool {
        matches!(self, ResourceState::Available)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceState::Available => "available",
            ResourceState::Reserved => "reserved",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
