//! Numeric identifier types for datasets and interned values.
//!
//! Every identifier is a `u64` wrapped in a newtype so that an entity id can
//! never be passed where an attribute id is expected. On disk identifiers are
//! stored big-endian so that byte order equals numeric order inside keys.
//!
//! # Invariants
//!
//! - Identifiers are allocated from persisted monotonic counters and are
//!   never reused, not even after the owning entry was deleted.
//! - `0` is never allocated; counters start at `1`.

use std::fmt;

/// Size in bytes of every encoded identifier.
pub const ID_SIZE: usize = 8;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            /// Get the raw numeric value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Encode as big-endian bytes for use inside keys.
            #[must_use]
            pub const fn to_key_bytes(self) -> [u8; ID_SIZE] {
                self.0.to_be_bytes()
            }

            /// Decode from the first 8 bytes of `bytes`.
            ///
            /// Returns `None` if fewer than 8 bytes are available.
            #[must_use]
            pub fn from_key_bytes(bytes: &[u8]) -> Option<Self> {
                let head: [u8; ID_SIZE] = bytes.get(..ID_SIZE)?.try_into().ok()?;
                Some(Self(u64::from_be_bytes(head)))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a dataset, assigned by the registry at creation time.
    DatasetId,
    "dataset"
);
numeric_id!(
    /// Identifier of an interned entity.
    EntityId,
    "entity"
);
numeric_id!(
    /// Identifier of an interned attribute (also used for identifier values).
    AttributeId,
    "attribute"
);
numeric_id!(
    /// Identifier of an interned string value.
    StringId,
    "string"
);
numeric_id!(
    /// Identifier of an interned byte-sequence value.
    BytesId,
    "bytes"
);
