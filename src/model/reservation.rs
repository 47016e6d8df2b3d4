use super::ResourceId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a simulated requester.
///
/// Identities are drawn cyclically from a small pool, so several concurrent
/// actors may share one. It is not a uniqueness key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u32);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user_{}", self.0)
    }
}

impl From<u32> for ActorId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Status of a reservation record. Records are only ever created confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Confirmed,
}

/// Evidence of a successful claim on a resource.
///
/// A record for a resource exists only if that resource moved from
/// available to reserved in the same committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub actor: ActorId,
    pub resource: ResourceId,
    pub status: ReservationStatus,
}

impl ReservationRecord {
    /// Creates a confirmed reservation for `actor` on `resource`.
    pub fn confirmed(actor: ActorId, resource: ResourceId) -> Self {
        Self {
            actor,
            resource,
            status: ReservationStatus::Confirmed,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }
}
