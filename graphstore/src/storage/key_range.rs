//! Half-open key ranges for ordered scans.
//!
//! A prefix scan over `prefix` is the range `[prefix, successor(prefix))`
//! where the successor is computed on the byte encoding: trailing `0xFF`
//! bytes are dropped and the last remaining byte is incremented. A prefix
//! consisting only of `0xFF` bytes has no successor and scans to the end of
//! the table.
//!
//! Dataset names are UTF-8, which never contains a `0xFF` byte, and UTF-8
//! byte order equals code point order. Computing the bound on bytes is
//! therefore exact for multi-byte characters and cannot overflow at the
//! maximum code point.

use std::ops::Bound;

/// A half-open range `[start, end)` over byte keys. `end == None` is unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Vec<u8>,
    pub end: Option<Vec<u8>>,
}

impl KeyRange {
    /// The range covering every key.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            start: Vec::new(),
            end: None,
        }
    }

    /// The range of keys starting with `prefix`.
    #[must_use]
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            start: prefix.to_vec(),
            end: prefix_successor(prefix),
        }
    }

    /// The range `[start, end)`.
    #[must_use]
    pub fn between(start: &[u8], end: &[u8]) -> Self {
        Self {
            start: start.to_vec(),
            end: Some(end.to_vec()),
        }
    }

    /// Whether the range cannot contain any key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end.as_ref().is_some_and(|end| *end <= self.start)
    }

    /// Whether `key` lies inside the range.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice() && self.end.as_ref().is_none_or(|end| key < end.as_slice())
    }

    /// Bounds suitable for `BTreeMap::range`.
    ///
    /// Callers must check `is_empty` first: `BTreeMap::range` panics on an
    /// inverted range.
    #[must_use]
    pub fn bounds(&self) -> (Bound<&[u8]>, Bound<&[u8]>) {
        let end = self
            .end
            .as_deref()
            .map_or(Bound::Unbounded, Bound::Excluded);
        (Bound::Included(self.start.as_slice()), end)
    }
}

/// Error returned when a name prefix cannot be turned into a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRangeError {
    /// The prefix is empty.
    EmptyPrefix,
}

impl std::fmt::Display for KeyRangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPrefix => write!(f, "prefix must not be empty"),
        }
    }
}

impl std::error::Error for KeyRangeError {}

/// Compute the range of names starting with `prefix`.
///
/// # Errors
///
/// Returns `KeyRangeError::EmptyPrefix` for an empty prefix.
pub fn name_prefix_range(prefix: &str) -> Result<KeyRange, KeyRangeError> {
    if prefix.is_empty() {
        return Err(KeyRangeError::EmptyPrefix);
    }
    Ok(KeyRange::prefix(prefix.as_bytes()))
}

/// Compute the range of names in `[start, end)`.
#[must_use]
pub fn name_range(start: &str, end: &str) -> KeyRange {
    KeyRange::between(start.as_bytes(), end.as_bytes())
}

/// The smallest key greater than every key starting with `prefix`.
///
/// Returns `None` when no such key exists (empty prefix or all `0xFF`).
#[must_use]
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let keep = prefix.iter().rposition(|&b| b != 0xFF)?;
    let mut successor = prefix[..=keep].to_vec();
    successor[keep] += 1;
    Some(successor)
}
