/// Declares a `Copy` newtype over `Uuid` with the conversions every
/// identifier in the quoting core needs.
///
/// The nil UUID is representable so that inbound data can be checked with
/// `is_nil` instead of being silently replaced.
#[macro_export]
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(::uuid::Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(::uuid::Uuid::new_v4())
            }

            /// The all-zero identifier, never produced by `new`.
            pub fn nil() -> Self {
                Self(::uuid::Uuid::nil())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: ::uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> ::uuid::Uuid {
                self.0
            }

            /// Returns true for the nil UUID.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = ::uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                ::uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl From<::uuid::Uuid> for $name {
            fn from(uuid: ::uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for ::uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an aggregate instance.
    ///
    /// Every event in the store is keyed by the aggregate it belongs to.
    AggregateId
);

impl AggregateId {
    /// First eight hex digits, used in human-facing references.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_ascii_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn aggregate_id_new_creates_unique_ids() {
        assert_ne!(AggregateId::new(), AggregateId::new());
    }

    #[test]
    fn nil_is_detected() {
        assert!(AggregateId::nil().is_nil());
        assert!(!AggregateId::new().is_nil());
    }

    #[test]
    fn parse_from_string() {
        let uuid = Uuid::new_v4();
        let id: AggregateId = uuid.to_string().parse().unwrap();
        assert_eq!(id.as_uuid(), uuid);
        assert!("not-a-uuid".parse::<AggregateId>().is_err());
    }

    #[test]
    fn short_reference_is_eight_upper_hex_digits() {
        let uuid = Uuid::parse_str("0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0").unwrap();
        let id = AggregateId::from_uuid(uuid);
        assert_eq!(id.short(), "0F1E2D3C");
    }

    #[test]
    fn serializes_as_plain_uuid() {
        let id = AggregateId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }
}
