//! Request and response messages, one pair per RPC operation.
//!
//! Records are returned as `registry_state::Record<T>`, which serialises flat:
//! `{ "id", <resource fields>, "created_at", "updated_at" }`.

use chrono::{DateTime, Utc};
use registry_state::{
    base64_bytes, Context, DataRecord, Execution, ExecutionStatus, Metadata, Model, ProtocolDef,
    Record,
};
use serde::{Deserialize, Serialize};

/// Every operation the registry answers, with its route name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateModel,
    GetModel,
    ListModels,
    CreateContext,
    GetContext,
    ListContexts,
    CreateProtocol,
    GetProtocol,
    ListProtocols,
    ExecuteProtocol,
    GetProtocolStatus,
    ListExecutions,
    AddData,
    GetData,
    ListData,
    DeleteData,
}

impl Operation {
    pub const ALL: [Operation; 16] = [
        Operation::CreateModel,
        Operation::GetModel,
        Operation::ListModels,
        Operation::CreateContext,
        Operation::GetContext,
        Operation::ListContexts,
        Operation::CreateProtocol,
        Operation::GetProtocol,
        Operation::ListProtocols,
        Operation::ExecuteProtocol,
        Operation::GetProtocolStatus,
        Operation::ListExecutions,
        Operation::AddData,
        Operation::GetData,
        Operation::ListData,
        Operation::DeleteData,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateModel => "CreateModel",
            Operation::GetModel => "GetModel",
            Operation::ListModels => "ListModels",
            Operation::CreateContext => "CreateContext",
            Operation::GetContext => "GetContext",
            Operation::ListContexts => "ListContexts",
            Operation::CreateProtocol => "CreateProtocol",
            Operation::GetProtocol => "GetProtocol",
            Operation::ListProtocols => "ListProtocols",
            Operation::ExecuteProtocol => "ExecuteProtocol",
            Operation::GetProtocolStatus => "GetProtocolStatus",
            Operation::ListExecutions => "ListExecutions",
            Operation::AddData => "AddData",
            Operation::GetData => "GetData",
            Operation::ListData => "ListData",
            Operation::DeleteData => "DeleteData",
        }
    }

    /// HTTP path of the operation.
    pub fn path(&self) -> String {
        format!("/rpc/{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// Shared shapes
// ---------------------------------------------------------------------------

/// Lookup or removal by ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRequest {
    pub id: String,
}

impl IdRequest {
    pub fn new(id: impl Into<String>) -> Self {
        IdRequest { id: id.into() }
    }
}

/// Page selection. `page_size` 0 means the default; an empty token means
/// the first page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListRequest {
    pub page_size: u32,
    pub page_token: String,
}

impl ListRequest {
    pub fn new(page_size: u32, page_token: impl Into<String>) -> Self {
        ListRequest {
            page_size,
            page_token: page_token.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateModelRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListModelsResponse {
    pub models: Vec<Record<Model>>,
    #[serde(default)]
    pub next_page_token: String,
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateContextRequest {
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListContextsResponse {
    pub contexts: Vec<Record<Context>>,
    #[serde(default)]
    pub next_page_token: String,
}

// ---------------------------------------------------------------------------
// Protocols
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProtocolRequest {
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListProtocolsResponse {
    pub protocols: Vec<Record<ProtocolDef>>,
    #[serde(default)]
    pub next_page_token: String,
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteProtocolRequest {
    /// Also accepted as `model_id`.
    #[serde(alias = "model_id")]
    pub protocol_id: String,
    pub context_id: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub parameters: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteProtocolResponse {
    pub execution_id: String,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetProtocolStatusRequest {
    pub execution_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolStatusResponse {
    pub execution_id: String,
    pub protocol_id: String,
    pub context_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Record<Execution>> for ProtocolStatusResponse {
    fn from(record: Record<Execution>) -> Self {
        ProtocolStatusResponse {
            execution_id: record.id.to_string(),
            protocol_id: record.body.protocol_id,
            context_id: record.body.context_id,
            status: record.body.status,
            result: record.body.result,
            metadata: record.body.metadata,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Executions matching every non-empty filter field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListExecutionsRequest {
    pub protocol_id: String,
    pub context_id: String,
    pub status: Option<ExecutionStatus>,
    pub page_size: u32,
    pub page_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListExecutionsResponse {
    pub executions: Vec<ProtocolStatusResponse>,
    #[serde(default)]
    pub next_page_token: String,
}

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddDataRequest {
    #[serde(rename = "type")]
    pub data_type: String,
    /// Base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListDataRequest {
    /// Empty matches every type.
    #[serde(rename = "type")]
    pub data_type: String,
    pub page_size: u32,
    pub page_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListDataResponse {
    pub data: Vec<Record<DataRecord>>,
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDataResponse {
    pub success: bool,
}
