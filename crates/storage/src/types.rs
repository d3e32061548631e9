//! Common types used across storage operations.

use bytes::Bytes;

/// Key-value pair returned from range queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// Defines a newtype wrapper around `i64` for record identifiers.
///
/// Each generated type is serialized transparently, converts to and from
/// `i64`, and displays as the bare number.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a user identity.
    ///
    /// # Examples
    ///
    /// ```
    /// use labgate_storage::UserId;
    ///
    /// let id = UserId::from(7);
    /// assert_eq!(i64::from(id), 7);
    /// assert_eq!(id.to_string(), "7");
    /// ```
    UserId
);

define_id!(
    /// Identifier of a lab (the tenant unit).
    LabId
);

define_id!(
    /// Identifier of a stored role record.
    RoleId
);
