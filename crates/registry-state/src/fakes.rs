//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryStore<T>`, which satisfies both `ResourceStore<T>` and (for
//! executions) `ExecutionLedger` without any external dependencies. Records
//! live in a `BTreeMap` keyed by ID, so ascending iteration is the pagination
//! order for free.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::ids::ResourceId;
use crate::schema::{Execution, ExecutionStatus, Record, Resource};
use crate::storage_traits::*;

/// In-memory store for one resource kind.
#[derive(Debug)]
pub struct MemoryStore<T> {
    records: Mutex<BTreeMap<ResourceId, Record<T>>>,
    failure: Mutex<Option<StorageError>>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        MemoryStore {
            records: Mutex::new(BTreeMap::new()),
            failure: Mutex::new(None),
        }
    }
}

impl<T: Resource> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `err` (`None` clears it).
    pub fn inject_failure(&self, err: Option<StorageError>) {
        if let Ok(mut slot) = self.failure.lock() {
            *slot = err;
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self) -> StorageResult<MutexGuard<'_, BTreeMap<ResourceId, Record<T>>>> {
        if let Some(err) = self
            .failure
            .lock()
            .map_err(|_| StorageError::Backend("memory store poisoned".to_string()))?
            .clone()
        {
            return Err(err);
        }
        self.records
            .lock()
            .map_err(|_| StorageError::Backend("memory store poisoned".to_string()))
    }
}

#[async_trait]
impl<T: Resource> ResourceStore<T> for MemoryStore<T> {
    async fn create(&self, body: T) -> StorageResult<Record<T>> {
        let record = Record::new(body);
        self.records()?.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> StorageResult<Record<T>> {
        let rid = ResourceId::parse(id)?;
        self.records()?
            .get(&rid)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: T::KIND,
                id: rid.to_string(),
            })
    }

    async fn list(&self, query: &ListQuery) -> StorageResult<Page<T>> {
        let cursor = query.prepare::<T>()?;
        let lower = match cursor {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };

        let records = self.records()?;
        let items: Vec<Record<T>> = records
            .range((lower, Bound::Unbounded))
            .map(|(_, record)| record)
            .filter(|record| query.filter.matches(&record.body))
            .take(query.page_size as usize)
            .cloned()
            .collect();

        Ok(Page::from_items(items, query.page_size))
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        let rid = ResourceId::parse(id)?;
        self.records()?
            .remove(&rid)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound {
                kind: T::KIND,
                id: rid.to_string(),
            })
    }
}

#[async_trait]
impl ExecutionLedger for MemoryStore<Execution> {
    async fn transition(
        &self,
        id: &ResourceId,
        from: ExecutionStatus,
        to: ExecutionStatus,
        result: Option<String>,
    ) -> StorageResult<Record<Execution>> {
        check_transition(id, from, to)?;

        let mut records = self.records()?;
        let record = records.get_mut(id).ok_or_else(|| StorageError::NotFound {
            kind: Execution::KIND,
            id: id.to_string(),
        })?;

        if record.body.status != from {
            return Err(StorageError::InvalidTransition {
                id: id.to_string(),
                expected: from.to_string(),
                actual: record.body.status.to_string(),
                to: to.to_string(),
            });
        }

        record.body.status = to;
        if to.is_terminal() {
            record.body.result = result.unwrap_or_default();
        }
        record.touch();
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Metadata, Model};

    #[tokio::test]
    async fn injected_failure_surfaces_and_clears() {
        let store: MemoryStore<Model> = MemoryStore::new();
        store.inject_failure(Some(StorageError::Unavailable("offline".into())));
        let err = store.create(Model::new("m", "t")).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));

        store.inject_failure(None);
        store.create(Model::new("m", "t")).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn transition_checks_stored_status() {
        let store: MemoryStore<Execution> = MemoryStore::new();
        let exec = store
            .create(Execution::pending("p1", "c1", Metadata::new()))
            .await
            .unwrap();

        let err = store
            .transition(
                &exec.id,
                ExecutionStatus::Running,
                ExecutionStatus::Completed,
                Some("done".into()),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::InvalidTransition { ref actual, .. } if actual == "pending"
        ));
    }
}
