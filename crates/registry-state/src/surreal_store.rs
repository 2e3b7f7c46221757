//! SurrealDB-backed ResourceStore and ExecutionLedger
//!
//! Records are stored as `Row<T>` documents (see `migrations` for the
//! layout), converting to/from `schema::Record<T>` at the boundary. Each
//! operation is bounded by the store's deadline. Reads are simply dropped
//! when it expires. Writes carry a server-side `TIMEOUT` and run on their own
//! task, so a write never lands unseen: an expired `create` is rolled back,
//! and `delete`/`transition` report the outcome the database settled on.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use crate::error::StorageError;
use crate::ids::ResourceId;
use crate::schema::{Execution, ExecutionStatus, Record, Resource};
use crate::storage_traits::{
    check_transition, ExecutionLedger, ListQuery, Page, ResourceStore, StorageResult,
};

/// How long an expired write may take to settle before the caller stops
/// waiting for it.
const SETTLE_GRACE: Duration = Duration::from_secs(5);

/// Document layout shared by all collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Row<T> {
    resource_id: String,
    body: T,
    created_at: SurrealDatetime,
    updated_at: SurrealDatetime,
}

impl<T: Resource> Row<T> {
    fn from_record(record: &Record<T>) -> Self {
        Row {
            resource_id: record.id.to_string(),
            body: record.body.clone(),
            created_at: SurrealDatetime::from(record.created_at),
            updated_at: SurrealDatetime::from(record.updated_at),
        }
    }

    fn into_record(self) -> StorageResult<Record<T>> {
        let id = ResourceId::parse(&self.resource_id).map_err(|_| {
            StorageError::Backend(format!(
                "stored {} has malformed resource_id {:?}",
                T::KIND,
                self.resource_id
            ))
        })?;
        Ok(Record {
            id,
            body: self.body,
            created_at: DateTime::<Utc>::from(self.created_at),
            updated_at: DateTime::<Utc>::from(self.updated_at),
        })
    }
}

/// SurrealDB-backed implementation of [`ResourceStore`] for one collection.
pub struct SurrealStore<T> {
    db: Surreal<Any>,
    table: String,
    op_timeout: Duration,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Clone for SurrealStore<T> {
    fn clone(&self) -> Self {
        SurrealStore {
            db: self.db.clone(),
            table: self.table.clone(),
            op_timeout: self.op_timeout,
            _kind: PhantomData,
        }
    }
}

impl<T: Resource> SurrealStore<T> {
    /// `table` must already be validated (see `Collections::validate`).
    pub fn new(db: Surreal<Any>, table: impl Into<String>, op_timeout: Duration) -> Self {
        SurrealStore {
            db,
            table: table.into(),
            op_timeout,
            _kind: PhantomData,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    // -- private helpers -----------------------------------------------------

    fn timeout_ms(&self) -> u64 {
        self.op_timeout.as_millis().min(u128::from(u64::MAX)) as u64
    }

    fn deadline_exceeded(&self, operation: &'static str) -> StorageError {
        StorageError::DeadlineExceeded {
            operation,
            timeout_ms: self.timeout_ms(),
        }
    }

    /// Server-side bound for write statements, so the database abandons a
    /// statement instead of committing it after the caller's deadline.
    fn timeout_clause(&self) -> String {
        format!("TIMEOUT {}ms", self.timeout_ms().max(1))
    }

    /// Report a statement cancelled by its `TIMEOUT` clause as a deadline.
    fn classify<R>(&self, operation: &'static str, result: StorageResult<R>) -> StorageResult<R> {
        match result {
            Err(StorageError::Backend(message)) if message.contains("exceeded the timeout") => {
                Err(self.deadline_exceeded(operation))
            }
            other => other,
        }
    }

    /// Run a read under the operation deadline. Dropping a read is harmless.
    async fn bounded<F, R>(&self, operation: &'static str, fut: F) -> StorageResult<R>
    where
        F: Future<Output = StorageResult<R>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(self.deadline_exceeded(operation)),
        }
    }

    /// Run a write on its own task and report what it actually did.
    ///
    /// The statement carries a server-side `TIMEOUT`, so it either commits or
    /// fails within the deadline; the extra grace only covers a stalled
    /// connection.
    async fn settled<F, R>(&self, operation: &'static str, write: F) -> StorageResult<R>
    where
        F: Future<Output = StorageResult<R>> + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let table = self.table.clone();
        tokio::spawn(async move {
            if tx.send(write.await).is_err() {
                warn!(%table, operation, "write settled after its caller went away");
            }
        });
        match tokio::time::timeout(self.op_timeout + SETTLE_GRACE, rx).await {
            Ok(Ok(result)) => self.classify(operation, result),
            Ok(Err(_)) => Err(StorageError::Backend(format!("{operation} task ended early"))),
            Err(_) => Err(self.deadline_exceeded(operation)),
        }
    }

    /// Fetch a row by ID, returning the record or NotFound.
    async fn fetch(&self, rid: &ResourceId) -> StorageResult<Record<T>> {
        let sql = format!("SELECT * FROM {} WHERE resource_id = $rid LIMIT 1", self.table);
        let mut res = self
            .db
            .query(sql)
            .bind(("rid", rid.to_string()))
            .await?;

        let rows: Vec<Row<T>> = res.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::NotFound {
                kind: T::KIND,
                id: rid.to_string(),
            })?
            .into_record()
    }

    async fn insert(&self, record: &Record<T>) -> StorageResult<Record<T>> {
        let sql = format!(
            "CREATE type::thing($tb, $rid) CONTENT $row {}",
            self.timeout_clause()
        );
        let mut res = self
            .db
            .query(sql)
            .bind(("tb", self.table.clone()))
            .bind(("rid", record.id.to_string()))
            .bind(("row", Row::from_record(record)))
            .await?
            .check()?;
        let created: Vec<Row<T>> = res.take(0)?;
        created
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::Backend(format!("failed to create {}", T::KIND)))?
            .into_record()
    }

    /// Delete by ID; `false` when nothing matched.
    async fn remove(&self, rid: &ResourceId, timeout: Option<String>) -> StorageResult<bool> {
        let mut sql = format!(
            "DELETE FROM {} WHERE resource_id = $rid RETURN BEFORE",
            self.table
        );
        if let Some(clause) = timeout {
            sql.push(' ');
            sql.push_str(&clause);
        }
        let mut res = self
            .db
            .query(sql)
            .bind(("rid", rid.to_string()))
            .await?;
        let deleted: Vec<Row<T>> = res.take(0)?;
        Ok(!deleted.is_empty())
    }

    /// Build the list statement for an already-validated query.
    fn list_sql(&self, query: &ListQuery, has_cursor: bool) -> String {
        let mut clauses = Vec::new();
        if has_cursor {
            clauses.push("resource_id > $cursor".to_string());
        }
        for (i, (field, _)) in query.filter.conditions().iter().enumerate() {
            clauses.push(format!("body.`{field}` = $f{i}"));
        }

        let mut sql = format!("SELECT * FROM {}", self.table);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY resource_id ASC LIMIT {}",
            query.page_size
        ));
        sql
    }
}

impl SurrealStore<Execution> {
    async fn compare_and_set(
        &self,
        id: &ResourceId,
        from: ExecutionStatus,
        to: ExecutionStatus,
        result: Option<String>,
    ) -> StorageResult<Record<Execution>> {
        let set_result = if to.is_terminal() {
            ", body.result = $result"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE {} SET body.status = $to{set_result}, updated_at = $now \
             WHERE resource_id = $rid AND body.status = $from RETURN AFTER {}",
            self.table,
            self.timeout_clause()
        );

        let mut res = self
            .db
            .query(sql)
            .bind(("rid", id.to_string()))
            .bind(("from", from.as_str().to_string()))
            .bind(("to", to.as_str().to_string()))
            .bind(("result", result.unwrap_or_default()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Vec<Row<Execution>> = res.take(0)?;
        if let Some(row) = updated.into_iter().next() {
            return row.into_record();
        }

        // Nothing matched: either the execution is gone or it moved on.
        let current = self.fetch(id).await?;
        Err(StorageError::InvalidTransition {
            id: id.to_string(),
            expected: from.to_string(),
            actual: current.body.status.to_string(),
            to: to.to_string(),
        })
    }
}

#[async_trait]
impl<T: Resource> ResourceStore<T> for SurrealStore<T> {
    /// The write runs on its own task. If the caller's deadline passes (or
    /// the caller is dropped) before the result is handed over, the task
    /// removes the record again, and an expired call waits for that removal
    /// before reporting `DeadlineExceeded`.
    #[instrument(skip(self, body), fields(table = %self.table))]
    async fn create(&self, body: T) -> StorageResult<Record<T>> {
        let record = Record::new(body);
        debug!(id = %record.id, "creating record");

        let (tx, mut rx) = oneshot::channel();
        let store = self.clone();
        let writer = tokio::spawn(async move {
            let outcome = store.insert(&record).await;
            if let Err(Ok(orphan)) = tx.send(outcome) {
                warn!(
                    id = %orphan.id,
                    table = %store.table,
                    "create outlived its caller, removing record"
                );
                if let Err(err) = store.remove(&orphan.id, None).await {
                    warn!(id = %orphan.id, error = %err, "failed to remove orphaned record");
                }
            }
        });

        match tokio::time::timeout(self.op_timeout, &mut rx).await {
            Ok(Ok(outcome)) => self.classify("create", outcome),
            Ok(Err(_)) => Err(StorageError::Backend("create task ended early".to_string())),
            Err(_) => {
                rx.close();
                if let Ok(outcome) = rx.try_recv() {
                    return self.classify("create", outcome);
                }
                if tokio::time::timeout(SETTLE_GRACE, writer).await.is_err() {
                    warn!(table = %self.table, "create still in flight after its deadline");
                }
                Err(self.deadline_exceeded("create"))
            }
        }
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn get(&self, id: &str) -> StorageResult<Record<T>> {
        let rid = ResourceId::parse(id)?;
        self.bounded("get", self.fetch(&rid)).await
    }

    #[instrument(skip(self), fields(table = %self.table, page_size = query.page_size))]
    async fn list(&self, query: &ListQuery) -> StorageResult<Page<T>> {
        let cursor = query.prepare::<T>()?;
        let sql = self.list_sql(query, cursor.is_some());
        debug!(%sql, "listing records");

        self.bounded("list", async {
            let mut statement = self.db.query(sql);
            if let Some(cursor) = cursor {
                statement = statement.bind(("cursor", cursor.to_string()));
            }
            for (i, (_, value)) in query.filter.conditions().iter().enumerate() {
                statement = statement.bind((format!("f{i}"), value.clone()));
            }

            let mut res = statement.await?;
            let rows: Vec<Row<T>> = res.take(0)?;
            let items = rows
                .into_iter()
                .map(Row::into_record)
                .collect::<StorageResult<Vec<_>>>()?;
            Ok(Page::from_items(items, query.page_size))
        })
        .await
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn delete(&self, id: &str) -> StorageResult<()> {
        let rid = ResourceId::parse(id)?;

        let store = self.clone();
        let clause = self.timeout_clause();
        let existed = self
            .settled("delete", async move { store.remove(&rid, Some(clause)).await })
            .await?;
        if !existed {
            return Err(StorageError::NotFound {
                kind: T::KIND,
                id: rid.to_string(),
            });
        }
        debug!(id = %rid, "record deleted");
        Ok(())
    }
}

#[async_trait]
impl ExecutionLedger for SurrealStore<Execution> {
    #[instrument(skip(self, result), fields(table = %self.table, id = %id, from = %from, to = %to))]
    async fn transition(
        &self,
        id: &ResourceId,
        from: ExecutionStatus,
        to: ExecutionStatus,
        result: Option<String>,
    ) -> StorageResult<Record<Execution>> {
        check_transition(id, from, to)?;

        let store = self.clone();
        let id = *id;
        self.settled("transition", async move {
            store.compare_and_set(&id, from, to, result).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::SurrealHandle;
    use crate::schema::{DataRecord, Metadata, Model};
    use crate::storage_traits::Filter;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        let store = handle.store::<Model>();

        let mut params = Metadata::new();
        params.insert("temperature".into(), "0.2".into());
        let created = store
            .create(Model::new("gpt", "llm").with_parameters(params))
            .await
            .unwrap();
        let loaded = store.get(&created.id.to_string()).await.unwrap();

        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.body, created.body);
        assert_eq!(loaded.created_at, loaded.updated_at);
    }

    #[tokio::test]
    async fn list_sql_combines_cursor_and_filter() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        let store = handle.store::<DataRecord>();
        let query = ListQuery::new(3).with_filter(Filter::new().eq("type", "text"));

        let sql = store.list_sql(&query, true);
        assert_eq!(
            sql,
            "SELECT * FROM data WHERE resource_id > $cursor AND body.`type` = $f0 \
             ORDER BY resource_id ASC LIMIT 3"
        );
        assert_eq!(
            store.list_sql(&ListQuery::new(2), false),
            "SELECT * FROM data ORDER BY resource_id ASC LIMIT 2"
        );
    }

    #[tokio::test]
    async fn expired_deadline_surfaces_as_deadline_exceeded() {
        let short = SurrealStore::<Model>::new(
            surrealdb::engine::any::connect("mem://").await.unwrap(),
            "models",
            Duration::from_millis(10),
        );
        let err = short
            .bounded("get", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, StorageError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::DeadlineExceeded {
                operation: "get",
                timeout_ms: 10
            }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn expired_creates_leave_no_records_behind() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        let mut hurried = handle.store::<Model>();
        hurried.op_timeout = Duration::from_nanos(1);

        let mut kept = Vec::new();
        let mut expired = 0;
        for i in 0..50 {
            match hurried.create(Model::new(format!("m{i}"), "llm")).await {
                Ok(record) => kept.push(record.id),
                Err(StorageError::DeadlineExceeded {
                    operation: "create",
                    ..
                }) => expired += 1,
                Err(other) => panic!("unexpected create error: {other}"),
            }
        }
        assert_eq!(kept.len() + expired, 50);

        let page = handle
            .store::<Model>()
            .list(&ListQuery::new(100))
            .await
            .unwrap();
        let stored: Vec<ResourceId> = page.items.iter().map(|r| r.id).collect();
        assert_eq!(stored, kept);
    }

    #[tokio::test]
    async fn expired_transition_reports_what_was_stored() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        let ledger = handle.store::<Execution>();
        let mut hurried = handle.store::<Execution>();
        hurried.op_timeout = Duration::from_nanos(1);

        for _ in 0..20 {
            let exec = ledger
                .create(Execution::pending("p1", "c1", Metadata::new()))
                .await
                .unwrap();
            let outcome = hurried
                .transition(
                    &exec.id,
                    ExecutionStatus::Pending,
                    ExecutionStatus::Running,
                    None,
                )
                .await;
            let stored = ledger.get(&exec.id.to_string()).await.unwrap();
            match outcome {
                Ok(record) => {
                    assert_eq!(record.body.status, ExecutionStatus::Running);
                    assert_eq!(stored.body.status, ExecutionStatus::Running);
                }
                Err(StorageError::DeadlineExceeded { .. }) => {
                    assert_eq!(stored.body.status, ExecutionStatus::Pending);
                }
                Err(other) => panic!("unexpected transition error: {other}"),
            }
        }
    }
}
