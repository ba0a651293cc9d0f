use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for identifiers derived from external natural keys
/// (payment references and the like).
const DERIVED_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a3e_4b5d_4e7f_8a9b_0c1d_2e3f_4a5b);

/// Unique identifier for an aggregate instance (design session, order).
///
/// Wraps a UUID to provide type safety and prevent mixing up
/// aggregate IDs with other UUID-based identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Creates a new random aggregate ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an aggregate ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Derives a stable aggregate ID from a kind and an external key.
    ///
    /// The same `(kind, key)` pair always yields the same ID, which lets a
    /// repeated request target the same aggregate stream.
    pub fn derive(kind: &str, key: &str) -> Self {
        let name = format!("{kind}:{key}");
        Self(Uuid::new_v5(&DERIVED_ID_NAMESPACE, name.as_bytes()))
    }

    /// Parses an aggregate ID from its string form.
    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(value).map(Self)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AggregateId> for Uuid {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}

/// Identity of an authenticated customer.
///
/// Authentication happens upstream; the pipeline only carries the opaque
/// subject string it was handed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Creates an owner ID from a subject string.
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    /// Returns the subject as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_id_new_creates_unique_ids() {
        let id1 = AggregateId::new();
        let id2 = AggregateId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn derived_ids_are_stable_per_key() {
        let a = AggregateId::derive("order", "pi_123");
        let b = AggregateId::derive("order", "pi_123");
        let c = AggregateId::derive("order", "pi_124");
        let d = AggregateId::derive("refund", "pi_123");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn parse_accepts_display_output() {
        let id = AggregateId::new();
        assert_eq!(AggregateId::parse(&id.to_string()).unwrap(), id);
        assert!(AggregateId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn owner_id_serializes_as_plain_string() {
        let owner = OwnerId::new("user-42");
        let json = serde_json::to_string(&owner).unwrap();
        assert_eq!(json, "\"user-42\"");
    }
}
