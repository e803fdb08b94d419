use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{AggregateId, Version};

/// An aggregate's serialized state at a specific version.
///
/// Loading starts from the latest snapshot and replays only the events after
/// `version`. A snapshot never replaces events; the log stays authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g., "Quote").
    pub aggregate_type: String,

    /// The version the state reflects.
    pub version: Version,

    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,

    /// The serialized aggregate state.
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Creates a snapshot from a serializable state.
    pub fn from_state<T: Serialize>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        taken_at: DateTime<Utc>,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            taken_at,
            state: serde_json::to_value(state)?,
        })
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Draft {
        items: u32,
        number: String,
    }

    #[test]
    fn state_survives_snapshotting() {
        let id = AggregateId::new();
        let original = Draft {
            items: 3,
            number: "Q-20240101-ABCDEF12".to_string(),
        };

        let snapshot =
            Snapshot::from_state(id, "Quote", Version::new(50), Utc::now(), &original).unwrap();

        assert_eq!(snapshot.aggregate_id, id);
        assert_eq!(snapshot.version, Version::new(50));
        assert_eq!(snapshot.decode::<Draft>().unwrap(), original);
    }

    #[test]
    fn decode_into_wrong_shape_fails() {
        let snapshot = Snapshot::from_state(
            AggregateId::new(),
            "Quote",
            Version::first(),
            Utc::now(),
            &serde_json::json!({"unexpected": true}),
        )
        .unwrap();

        assert!(snapshot.decode::<Draft>().is_err());
    }
}
