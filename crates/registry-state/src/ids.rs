//! Resource identifier scheme
//!
//! Every record is keyed by a [`ResourceId`]: a UUID version 7 whose leading
//! 48 bits are the Unix-millisecond creation time. IDs produced by one process
//! are strictly increasing, and the canonical external form (36-char lowercase
//! hyphenated hex) sorts lexicographically in the same order as the IDs
//! themselves. That ordering is what lets a list call resume from "everything
//! after ID X" without a separate sequence counter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

/// Length of the canonical hyphenated encoding.
const ENCODED_LEN: usize = 36;

/// Opaque, creation-ordered resource identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(Uuid);

impl ResourceId {
    /// Generate a fresh identifier, greater than every ID previously
    /// generated by this process.
    pub fn new() -> Self {
        ResourceId(Uuid::now_v7())
    }

    /// Parse the canonical external form.
    ///
    /// Accepts only the hyphenated form of a version-7 UUID. Upper-case hex is
    /// tolerated and normalised; every other shape is `InvalidId`.
    pub fn parse(value: &str) -> Result<Self, StorageError> {
        let invalid = || StorageError::InvalidId {
            value: value.to_string(),
        };

        if value.len() != ENCODED_LEN {
            return Err(invalid());
        }
        let uuid = Uuid::try_parse(value).map_err(|_| invalid())?;
        if uuid.get_version_num() != 7 {
            return Err(invalid());
        }
        Ok(ResourceId(uuid))
    }

    /// Milliseconds since the Unix epoch at which the ID was generated.
    pub fn timestamp_ms(&self) -> u64 {
        let bytes = self.0.as_bytes();
        bytes[..6]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ResourceId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}
