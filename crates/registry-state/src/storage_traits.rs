//! Storage trait definitions for the registry
//!
//! These traits define the core storage abstractions:
//! - `ResourceStore<T>`: create / get / paginated list / delete for one
//!   resource kind
//! - `ExecutionLedger`: a `ResourceStore<Execution>` that can also advance an
//!   execution's status along its forward-only lifecycle
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.
//!
//! ## Pagination contract
//!
//! Records are enumerated in ascending ID order. A page token is the ID of the
//! last record of the previous page and acts as an exclusive lower bound. A
//! page carries `next_page_token` exactly when it is full (`items.len() ==
//! page_size`); a page that happens to exhaust the collection therefore still
//! hands out a token, and the following call returns an empty page without
//! one. Callers treat an empty page or a missing token as the end.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::ids::ResourceId;
use crate::schema::{Execution, ExecutionStatus, Record, Resource};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Filters and list queries
// ---------------------------------------------------------------------------

/// Conjunction of field-equality conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    conditions: Vec<(String, String)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Reject fields the resource does not expose for filtering.
    pub fn validate<T: Resource>(&self) -> StorageResult<()> {
        for (field, _) in &self.conditions {
            if !T::FILTER_FIELDS.contains(&field.as_str()) {
                return Err(StorageError::InvalidArgument(format!(
                    "cannot filter {} by {field:?} (allowed: {})",
                    T::KIND,
                    T::FILTER_FIELDS.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Evaluate against a record body.
    pub fn matches<T: Resource>(&self, body: &T) -> bool {
        self.conditions
            .iter()
            .all(|(field, value)| body.field(field) == Some(value.as_str()))
    }
}

/// One list call: filter, page size and optional resume cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub filter: Filter,
    pub page_size: u32,
    pub page_token: Option<String>,
}

impl ListQuery {
    pub fn new(page_size: u32) -> Self {
        ListQuery {
            filter: Filter::new(),
            page_size,
            page_token: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Resume after the given token. An empty token means "from the start".
    pub fn after(mut self, page_token: impl Into<String>) -> Self {
        let token = page_token.into();
        self.page_token = if token.is_empty() { None } else { Some(token) };
        self
    }

    /// Validate the query for resource `T` and decode the cursor.
    ///
    /// Runs before any backend round-trip.
    pub fn prepare<T: Resource>(&self) -> StorageResult<Option<ResourceId>> {
        if self.page_size == 0 {
            return Err(StorageError::InvalidArgument(
                "page_size must be positive".to_string(),
            ));
        }
        self.filter.validate::<T>()?;
        match self.page_token.as_deref() {
            None | Some("") => Ok(None),
            Some(token) => ResourceId::parse(token).map(Some),
        }
    }
}

/// One page of a list call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<Record<T>>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    /// Build a page from at most `page_size` items in ascending ID order.
    ///
    /// The token is the last item's ID iff the page is full.
    pub fn from_items(items: Vec<Record<T>>, page_size: u32) -> Self {
        let next_page_token = if !items.is_empty() && items.len() == page_size as usize {
            items.last().map(|r| r.id.to_string())
        } else {
            None
        };
        Page {
            items,
            next_page_token,
        }
    }

    pub fn empty() -> Self {
        Page {
            items: Vec::new(),
            next_page_token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ResourceStore: generic CRUD + pagination
// ---------------------------------------------------------------------------

/// Persistence for one resource kind.
///
/// Guarantees:
/// - `create` assigns a fresh, never-reused ID and stamps
///   `created_at == updated_at`.
/// - `get`/`delete` reject malformed IDs with `InvalidId` before touching the
///   backend, and report `NotFound` for well-formed IDs with no record.
/// - `list` follows the pagination contract described in the module docs.
/// - `delete` is not idempotent: a second delete reports `NotFound`.
#[async_trait]
pub trait ResourceStore<T: Resource>: Send + Sync {
    /// Persist a new record and return it with its ID populated.
    async fn create(&self, body: T) -> StorageResult<Record<T>>;

    /// Fetch one record by its external ID.
    async fn get(&self, id: &str) -> StorageResult<Record<T>>;

    /// Enumerate records in ascending ID order.
    async fn list(&self, query: &ListQuery) -> StorageResult<Page<T>>;

    /// Remove one record by its external ID.
    async fn delete(&self, id: &str) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// ExecutionLedger: forward-only status transitions
// ---------------------------------------------------------------------------

/// Check a requested transition before it reaches the backend.
pub fn check_transition(
    id: &ResourceId,
    from: ExecutionStatus,
    to: ExecutionStatus,
) -> StorageResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StorageError::IllegalTransition {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Execution persistence.
///
/// Guarantees:
/// - A transition applies only if the stored status equals `from`
///   (compare-and-set); otherwise `InvalidTransition` reports the actual one.
/// - Every applied transition advances `updated_at`.
/// - `result` is written only when `to` is terminal.
#[async_trait]
pub trait ExecutionLedger: ResourceStore<Execution> {
    async fn transition(
        &self,
        id: &ResourceId,
        from: ExecutionStatus,
        to: ExecutionStatus,
        result: Option<String>,
    ) -> StorageResult<Record<Execution>>;
}
