//! Registry-State: SurrealDB Backend for the MCP registry
//!
//! This crate provides the persistence layer for the model/context/protocol/
//! data registry. It handles all I/O with SurrealDB behind backend-agnostic
//! store traits.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: identifier ordering, cursor pagination, forward-only execution
//! status updates.
//!
//! ## Key Components
//!
//! - `ResourceId`: creation-ordered identifier, doubles as the page cursor
//! - `ResourceStore<T>`: create / get / list / delete for one resource kind
//! - `ExecutionLedger`: compare-and-set status transitions for executions
//! - `SurrealHandle`: connection, migrations, per-collection stores
//! - `fakes::MemoryStore<T>`: in-memory implementation for tests

mod error;
pub mod fakes;
mod handle;
mod ids;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{Collections, Credentials, StoreConfig, SurrealHandle, DEFAULT_OP_TIMEOUT_MS};
pub use ids::ResourceId;
pub use schema::{
    base64_bytes, content_digest, Context, DataRecord, Execution, ExecutionStatus, Metadata, Model,
    ProtocolDef, Record, Resource,
};
pub use storage_traits::{
    ExecutionLedger, Filter, ListQuery, Page, ResourceStore, StorageResult,
};
pub use surreal_store::SurrealStore;

/// Result type for connection and schema setup
pub type Result<T> = std::result::Result<T, StateError>;
