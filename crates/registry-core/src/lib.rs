//! Registry Core Library
//!
//! Everything above persistence: the execution state machine, the RPC
//! facade with its request/response messages and envelope, configuration,
//! tracing set-up and the HTTP client used by `mcpreg`.

pub mod client;
pub mod config;
pub mod error;
pub mod execution;
pub mod facade;
pub mod telemetry;

pub use client::{RegistryClient, DEFAULT_SERVER};
pub use config::{ConnectionConfig, ErrorMode, ExecutionMode, RegistryConfig};
pub use error::{ErrorBody, ErrorCode, RegistryError, Result};
pub use execution::{Executor, PlaceholderRunner, ProtocolRunner, PLACEHOLDER_RESULT};
pub use facade::{Envelope, Operation, Registry, Stores};
pub use telemetry::init_tracing;

pub use registry_state::{
    Context, DataRecord, Execution, ExecutionStatus, Metadata, Model, ProtocolDef, Record,
    ResourceId, StoreConfig, SurrealHandle,
};
