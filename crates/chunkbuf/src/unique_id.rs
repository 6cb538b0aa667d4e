//! Chunk identifiers.
//!
//! Every chunk carries a random 16-byte identifier.  It appears in two
//! places: as 32 lowercase hex characters inside the chunk file name
//! (`cio.<hex>.<suffix>`) and as a binary field inside the metadata blob,
//! so resume can cross-check the two.

use std::fmt;

use rand::RngCore;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a chunk identifier in bytes.
pub const UNIQUE_ID_LEN: usize = 16;

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

/// Random 16-byte chunk identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniqueId([u8; UNIQUE_ID_LEN]);

impl UniqueId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        let mut bytes = [0u8; UNIQUE_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw identifier bytes.
    pub fn from_bytes(bytes: [u8; UNIQUE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Identifier bytes.
    pub fn as_bytes(&self) -> &[u8; UNIQUE_ID_LEN] {
        &self.0
    }

    /// Render as 32 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(UNIQUE_ID_LEN * 2);
        for &b in &self.0 {
            out.push(HEX_CHARS[(b >> 4) as usize] as char);
            out.push(HEX_CHARS[(b & 0x0f) as usize] as char);
        }
        out
    }

    /// Parse 32 lowercase hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != UNIQUE_ID_LEN * 2 {
            return None;
        }
        let mut bytes = [0u8; UNIQUE_ID_LEN];
        for (i, pair) in s.as_bytes().chunks(2).enumerate() {
            let hi = hex_val(pair[0])?;
            let lo = hex_val(pair[1])?;
            bytes[i] = (hi << 4) | lo;
        }
        Some(Self(bytes))
    }

    /// Extract the identifier from a chunk file name of the form
    /// `cio.<hex>.<suffix>`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix("cio.")?;
        let (hex, _suffix) = rest.split_once('.')?;
        Self::from_hex(hex)
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UniqueId({})", self.to_hex())
    }
}

// Serialized as raw bytes; decoding also accepts an integer sequence.
impl Serialize for UniqueId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

struct UniqueIdVisitor;

impl<'de> Visitor<'de> for UniqueIdVisitor {
    type Value = UniqueId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} identifier bytes", UNIQUE_ID_LEN)
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<UniqueId, E> {
        if v.len() != UNIQUE_ID_LEN {
            return Err(E::invalid_length(v.len(), &self));
        }
        let mut bytes = [0u8; UNIQUE_ID_LEN];
        bytes.copy_from_slice(v);
        Ok(UniqueId(bytes))
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<UniqueId, A::Error> {
        let mut bytes = [0u8; UNIQUE_ID_LEN];
        for (i, slot) in bytes.iter_mut().enumerate() {
            *slot = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
        }
        if seq.next_element::<u8>()?.is_some() {
            return Err(de::Error::invalid_length(UNIQUE_ID_LEN + 1, &self));
        }
        Ok(UniqueId(bytes))
    }
}

impl<'de> Deserialize<'de> for UniqueId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_bytes(UniqueIdVisitor)
    }
}
