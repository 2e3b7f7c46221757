//! Record definitions for the registry collections
//!
//! Collections:
//! - models: named parameter bundles
//! - contexts: named content blobs with metadata
//! - protocols: named, ordered step lists
//! - executions: one row per protocol invocation
//! - data: generic typed byte payloads
//!
//! Every stored document is a [`Record<T>`]: the store-assigned
//! [`ResourceId`], the resource body `T`, and the two timestamps.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::ids::ResourceId;

/// String-to-string mapping used for parameters and metadata.
pub type Metadata = BTreeMap<String, String>;

/// A resource kind that can be kept in a [`crate::ResourceStore`].
pub trait Resource:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Singular name used in errors and logs.
    const KIND: &'static str;
    /// Default collection (table) name.
    const COLLECTION: &'static str;
    /// Fields a list filter may compare for equality.
    const FILTER_FIELDS: &'static [&'static str];

    /// Current value of a filterable field.
    fn field(&self, name: &str) -> Option<&str>;
}

/// A persisted resource: identity, body and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub id: ResourceId,
    #[serde(flatten)]
    pub body: T,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<T> Record<T> {
    /// Assign a fresh ID and stamp both timestamps with the same instant.
    pub fn new(body: T) -> Self {
        let now = Utc::now();
        Record {
            id: ResourceId::new(),
            body,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance `updated_at` to now without ever moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A named parameter bundle. The parameters are opaque to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Metadata,
}

impl Model {
    pub fn new(name: impl Into<String>, model_type: impl Into<String>) -> Self {
        Model {
            name: name.into(),
            model_type: model_type.into(),
            description: String::new(),
            parameters: Metadata::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Metadata) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Resource for Model {
    const KIND: &'static str = "model";
    const COLLECTION: &'static str = "models";
    const FILTER_FIELDS: &'static [&'static str] = &["name", "type"];

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "name" => Some(&self.name),
            "type" => Some(&self.model_type),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// A named content blob.
///
/// Two deployment profiles exist: content-based contexts carry `content`,
/// catalogue-style contexts carry `description` plus `model_ids`. Both
/// shapes are accepted; absent optional fields stay absent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub model_ids: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Context {
    /// Content-based profile.
    pub fn with_content(name: impl Into<String>, content: impl Into<String>) -> Self {
        Context {
            name: name.into(),
            content: Some(content.into()),
            description: None,
            model_ids: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    /// Description + model list profile.
    pub fn with_models(
        name: impl Into<String>,
        description: impl Into<String>,
        model_ids: Vec<String>,
    ) -> Self {
        Context {
            name: name.into(),
            content: None,
            description: Some(description.into()),
            model_ids,
            metadata: Metadata::new(),
        }
    }
}

impl Resource for Context {
    const KIND: &'static str = "context";
    const COLLECTION: &'static str = "contexts";
    const FILTER_FIELDS: &'static [&'static str] = &["name"];

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "name" => Some(&self.name),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ProtocolDef
// ---------------------------------------------------------------------------

/// A named protocol: an ordered list of steps plus default parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDef {
    pub name: String,
    #[serde(rename = "type")]
    pub protocol_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub parameters: Metadata,
}

impl Resource for ProtocolDef {
    const KIND: &'static str = "protocol";
    const COLLECTION: &'static str = "protocols";
    const FILTER_FIELDS: &'static [&'static str] = &["name", "type"];

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "name" => Some(&self.name),
            "type" => Some(&self.protocol_type),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Lifecycle of a protocol invocation.
///
/// `Pending → Running → {Completed | Failed}`; the last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    /// Position in the lifecycle order; terminal states share a rank.
    pub fn rank(&self) -> u8 {
        match self {
            ExecutionStatus::Pending => 0,
            ExecutionStatus::Running => 1,
            ExecutionStatus::Completed | ExecutionStatus::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// Whether a single step from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (ExecutionStatus::Pending, ExecutionStatus::Running)
                | (ExecutionStatus::Running, ExecutionStatus::Completed)
                | (ExecutionStatus::Running, ExecutionStatus::Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(StorageError::InvalidArgument(format!(
                "unknown execution status: {other}"
            ))),
        }
    }
}

/// One invocation of a protocol against a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub protocol_id: String,
    pub context_id: String,
    pub status: ExecutionStatus,
    /// Empty until the execution reaches a terminal status.
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Execution {
    /// A fresh execution in `Pending`.
    pub fn pending(
        protocol_id: impl Into<String>,
        context_id: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Execution {
            protocol_id: protocol_id.into(),
            context_id: context_id.into(),
            status: ExecutionStatus::Pending,
            result: String::new(),
            metadata,
        }
    }
}

impl Resource for Execution {
    const KIND: &'static str = "execution";
    const COLLECTION: &'static str = "executions";
    const FILTER_FIELDS: &'static [&'static str] = &["protocol_id", "context_id", "status"];

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "protocol_id" => Some(&self.protocol_id),
            "context_id" => Some(&self.context_id),
            "status" => Some(self.status.as_str()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// DataRecord
// ---------------------------------------------------------------------------

/// Base64 (standard alphabet) encoding for byte payloads.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// SHA-256 hex digest of a payload.
pub fn content_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// A generic typed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    /// SHA-256 hex of `content`.
    #[serde(default)]
    pub content_digest: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DataRecord {
    pub fn new(data_type: impl Into<String>, content: Vec<u8>, metadata: Metadata) -> Self {
        let digest = content_digest(&content);
        DataRecord {
            data_type: data_type.into(),
            content,
            content_digest: digest,
            metadata,
        }
    }

    /// True when the stored digest matches the payload.
    pub fn verify_digest(&self) -> bool {
        self.content_digest == content_digest(&self.content)
    }
}

impl Resource for DataRecord {
    const KIND: &'static str = "data";
    const COLLECTION: &'static str = "data";
    const FILTER_FIELDS: &'static [&'static str] = &["type"];

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "type" => Some(&self.data_type),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_has_equal_timestamps() {
        let record = Record::new(Model::new("gpt", "llm"));
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn touch_never_moves_updated_at_backwards() {
        let mut record = Record::new(Model::new("gpt", "llm"));
        let future = Utc::now() + chrono::Duration::hours(1);
        record.updated_at = future;
        record.touch();
        assert_eq!(record.updated_at, future);
    }

    #[test]
    fn record_json_is_flat() {
        let record = Record::new(Model::new("gpt", "llm"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["name"], "gpt");
        assert_eq!(value["type"], "llm");
        assert_eq!(value["id"], record.id.to_string());
        let back: Record<Model> = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn status_transitions_only_move_forward() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Pending));
        for terminal in [Completed, Failed] {
            assert!(terminal.is_terminal());
            for next in [Pending, Running, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(Pending.rank() < Running.rank());
        assert!(Running.rank() < Completed.rank());
        assert_eq!(Completed.rank(), Failed.rank());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("done".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn data_content_is_base64_on_the_wire() {
        let data = DataRecord::new("blob", vec![0, 255, 7], Metadata::new());
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["content"], "AP8H");
        assert_eq!(value["type"], "blob");
        let back: DataRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.content, vec![0, 255, 7]);
        assert!(back.verify_digest());
    }

    #[test]
    fn context_profiles_omit_absent_fields() {
        let content = serde_json::to_value(Context::with_content("c", "hello")).unwrap();
        assert_eq!(content["content"], "hello");
        assert!(content.get("description").is_none());

        let catalogue = serde_json::to_value(Context::with_models(
            "c",
            "desc",
            vec!["m1".to_string()],
        ))
        .unwrap();
        assert!(catalogue.get("content").is_none());
        assert_eq!(catalogue["model_ids"][0], "m1");
    }

    #[test]
    fn filter_fields_resolve() {
        let exec = Execution::pending("p1", "c1", Metadata::new());
        for field in Execution::FILTER_FIELDS {
            assert!(exec.field(field).is_some(), "{field}");
        }
        assert_eq!(exec.field("status"), Some("pending"));
        assert_eq!(exec.field("result"), None);
    }
}
