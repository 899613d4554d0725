//! Values and value references.
//!
//! `Value` is the semantic form handed to the store by the caller (usually
//! produced by an expression evaluator). `ValueRef` is the stored form: values
//! that need interning are replaced by the id of their interned entry, scalars
//! are kept inline.
//!
//! # Encoding
//!
//! A `ValueRef` is encoded as a one-byte tag followed by its payload:
//!
//! ```text
//! +-----+---------------------------------------------+
//! | 0   | tag (see `ValueTag`)                        |
//! | 1-8 | id / integer / float (8 bytes, big-endian)  |
//! | 1   | boolean (1 byte) - boolean tag only         |
//! +-----+---------------------------------------------+
//! ```
//!
//! Integers and floats are stored with an order-preserving transform so that
//! statement keys sort numerically.

use crate::types::ids::{AttributeId, BytesId, EntityId, ID_SIZE, StringId};

const SIGN_BIT: u64 = 1 << 63;

/// Which interning table a value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InternKind {
    /// Entity names and entity references.
    Entity,
    /// Attribute names and identifier values.
    Attribute,
    /// String values.
    String,
    /// Byte-sequence values.
    Bytes,
}

impl InternKind {
    /// Human-readable table name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Entity => "entities",
            Self::Attribute => "attributes",
            Self::String => "string-values",
            Self::Bytes => "byte-values",
        }
    }
}

/// Value tag discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueTag {
    Entity = 0x01,
    Attribute = 0x02,
    String = 0x03,
    Bytes = 0x04,
    Integer = 0x05,
    Float = 0x06,
    Boolean = 0x07,
}

impl TryFrom<u8> for ValueTag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Entity),
            0x02 => Ok(Self::Attribute),
            0x03 => Ok(Self::String),
            0x04 => Ok(Self::Bytes),
            0x05 => Ok(Self::Integer),
            0x06 => Ok(Self::Float),
            0x07 => Ok(Self::Boolean),
            _ => Err(value),
        }
    }
}

/// A semantic value as produced by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A bare identifier (keyword). Interned in the attribute table.
    Identifier(String),
    /// A string literal. Interned in the string-value table.
    String(String),
    /// A 64-bit signed integer. Stored inline.
    Integer(i64),
    /// A 64-bit float. Stored inline.
    Float(f64),
    /// A boolean. Stored inline.
    Boolean(bool),
    /// A reference to another entity by name. Interned in the entity table.
    EntityRef(String),
    /// An opaque byte sequence. Interned in the byte-value table.
    Bytes(Vec<u8>),
}

impl Value {
    /// The interning table and semantic bytes of this value, if it needs interning.
    #[must_use]
    pub fn intern_key(&self) -> Option<(InternKind, &[u8])> {
        match self {
            Self::Identifier(s) => Some((InternKind::Attribute, s.as_bytes())),
            Self::String(s) => Some((InternKind::String, s.as_bytes())),
            Self::EntityRef(s) => Some((InternKind::Entity, s.as_bytes())),
            Self::Bytes(b) => Some((InternKind::Bytes, b.as_slice())),
            Self::Integer(_) | Self::Float(_) | Self::Boolean(_) => None,
        }
    }

    /// The stored form of an inline value. `None` for values needing interning.
    #[must_use]
    pub const fn inline_ref(&self) -> Option<ValueRef> {
        match self {
            Self::Integer(i) => Some(ValueRef::Integer(*i)),
            Self::Float(f) => Some(ValueRef::Float(*f)),
            Self::Boolean(b) => Some(ValueRef::Boolean(*b)),
            _ => None,
        }
    }
}

/// Stored form of a statement's value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRef {
    Entity(EntityId),
    Attribute(AttributeId),
    String(StringId),
    Bytes(BytesId),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl ValueRef {
    /// Build a reference from an interning table kind and raw id.
    #[must_use]
    pub const fn from_interned(kind: InternKind, raw: u64) -> Self {
        match kind {
            InternKind::Entity => Self::Entity(EntityId(raw)),
            InternKind::Attribute => Self::Attribute(AttributeId(raw)),
            InternKind::String => Self::String(StringId(raw)),
            InternKind::Bytes => Self::Bytes(BytesId(raw)),
        }
    }

    /// The interned entry this reference points at, if any.
    #[must_use]
    pub const fn interned(&self) -> Option<(InternKind, u64)> {
        match self {
            Self::Entity(id) => Some((InternKind::Entity, id.0)),
            Self::Attribute(id) => Some((InternKind::Attribute, id.0)),
            Self::String(id) => Some((InternKind::String, id.0)),
            Self::Bytes(id) => Some((InternKind::Bytes, id.0)),
            Self::Integer(_) | Self::Float(_) | Self::Boolean(_) => None,
        }
    }

    /// Get the tag discriminant.
    #[must_use]
    pub const fn tag(&self) -> ValueTag {
        match self {
            Self::Entity(_) => ValueTag::Entity,
            Self::Attribute(_) => ValueTag::Attribute,
            Self::String(_) => ValueTag::String,
            Self::Bytes(_) => ValueTag::Bytes,
            Self::Integer(_) => ValueTag::Integer,
            Self::Float(_) => ValueTag::Float,
            Self::Boolean(_) => ValueTag::Boolean,
        }
    }

    /// Calculate the encoded size of this reference.
    #[must_use]
    pub const fn encoded_size(&self) -> usize {
        match self {
            Self::Boolean(_) => 2,
            _ => 1 + ID_SIZE,
        }
    }

    /// Append the encoded form to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.tag() as u8);
        match self {
            Self::Entity(id) => out.extend_from_slice(&id.to_key_bytes()),
            Self::Attribute(id) => out.extend_from_slice(&id.to_key_bytes()),
            Self::String(id) => out.extend_from_slice(&id.to_key_bytes()),
            Self::Bytes(id) => out.extend_from_slice(&id.to_key_bytes()),
            #[allow(clippy::cast_sign_loss)]
            Self::Integer(i) => out.extend_from_slice(&((*i as u64) ^ SIGN_BIT).to_be_bytes()),
            Self::Float(f) => out.extend_from_slice(&order_float(*f).to_be_bytes()),
            Self::Boolean(b) => out.push(u8::from(*b)),
        }
    }

    /// Serialize this reference to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_size());
        self.encode_into(&mut bytes);
        bytes
    }

    /// Deserialize a reference from bytes.
    ///
    /// Returns the reference and the number of bytes consumed, or `None` if
    /// the bytes are truncated or carry an unknown tag.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<(Self, usize)> {
        let tag = ValueTag::try_from(*bytes.first()?).ok()?;
        if tag == ValueTag::Boolean {
            let flag = *bytes.get(1)?;
            return Some((Self::Boolean(flag != 0), 2));
        }

        let payload: [u8; ID_SIZE] = bytes.get(1..=ID_SIZE)?.try_into().ok()?;
        let raw = u64::from_be_bytes(payload);
        let value = match tag {
            ValueTag::Entity => Self::Entity(EntityId(raw)),
            ValueTag::Attribute => Self::Attribute(AttributeId(raw)),
            ValueTag::String => Self::String(StringId(raw)),
            ValueTag::Bytes => Self::Bytes(BytesId(raw)),
            #[allow(clippy::cast_possible_wrap)]
            ValueTag::Integer => Self::Integer((raw ^ SIGN_BIT) as i64),
            ValueTag::Float => Self::Float(unorder_float(raw)),
            ValueTag::Boolean => return None,
        };
        Some((value, 1 + ID_SIZE))
    }
}

/// Map float bits so that unsigned byte order matches numeric order.
///
/// `-0.0` is stored as `0.0` and every NaN as the canonical quiet NaN, so
/// values that compare equal share one key.
fn order_float(f: f64) -> u64 {
    let bits = if f.is_nan() {
        f64::NAN.to_bits()
    } else if f.to_bits() & !SIGN_BIT == 0 {
        0
    } else {
        f.to_bits()
    };
    if bits & SIGN_BIT == 0 {
        bits | SIGN_BIT
    } else {
        !bits
    }
}

const fn unorder_float(ordered: u64) -> f64 {
    let bits = if ordered & SIGN_BIT == 0 {
        !ordered
    } else {
        ordered & !SIGN_BIT
    };
    f64::from_bits(bits)
}
