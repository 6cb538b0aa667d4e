//! Chunk metadata codec.
//!
//! A chunk's descriptor is persisted in the chunk file's metadata slot as a
//! compact self-describing MessagePack map with short field names.  Decoding
//! tolerates absent fields (they surface as `None`) and ignores unknown
//! ones, so blobs written by older or newer builds stay readable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::unique_id::UniqueId;

/// Grouping key a chunk accumulates records for.
///
/// The stage map holds at most one writable chunk per key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GroupKey {
    /// Time bucket (Unix seconds), if the stream is time-partitioned.
    pub time_bucket: Option<i64>,
    /// Routing tag.
    pub route: Option<String>,
    /// Additional grouping dimensions.
    pub dimensions: Option<BTreeMap<String, String>>,
}

impl GroupKey {
    /// Key grouping only by routing tag.
    pub fn for_route(route: impl Into<String>) -> Self {
        Self {
            route: Some(route.into()),
            ..Self::default()
        }
    }
}

/// Wire form of a chunk descriptor.
///
/// All fields are optional so that blobs missing some of them still decode;
/// the chunk layer fills in defaults for whatever is absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataBlob {
    /// Chunk identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UniqueId>,
    /// Committed size, as declared at append time.
    #[serde(default, rename = "s", skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Creation time, Unix seconds.
    #[serde(default, rename = "c", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Last commit time, Unix seconds.
    #[serde(default, rename = "m", skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<i64>,
    /// Whether the chunk has been enqueued.
    #[serde(default, rename = "enq", skip_serializing_if = "Option::is_none")]
    pub enqueued: Option<bool>,
    /// Grouping key: time bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timekey: Option<i64>,
    /// Grouping key: routing tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Grouping key: extra dimensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<BTreeMap<String, String>>,
}

impl MetadataBlob {
    /// The grouping key carried by this blob.
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            time_bucket: self.timekey,
            route: self.tag.clone(),
            dimensions: self.variables.clone(),
        }
    }

    /// Store a grouping key into the blob's wire fields.
    pub fn set_group_key(&mut self, key: &GroupKey) {
        self.timekey = key.time_bucket;
        self.tag = key.route.clone();
        self.variables = key.dimensions.clone();
    }
}

/// Metadata encode/decode failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The input is empty; there is nothing to decode.
    #[error("empty metadata input")]
    Empty,

    /// The input is not a decodable metadata map.
    #[error("malformed metadata: {0}")]
    Malformed(#[from] rmp_serde::decode::Error),

    /// The descriptor cannot be encoded.
    #[error("metadata encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Encode a descriptor into its self-describing map form.
pub fn encode(blob: &MetadataBlob) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(blob)?)
}

/// Decode a descriptor.
///
/// Empty input is a distinct error from malformed input: the caller decides
/// whether it means "never staged" or corruption.
pub fn decode(data: &[u8]) -> Result<MetadataBlob, CodecError> {
    if data.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(rmp_serde::from_slice(data)?)
}
