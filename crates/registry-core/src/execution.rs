//! Protocol execution state machine
//!
//! An execution is created `pending`, then advanced by [`Executor::advance`]:
//! `pending → running`, the runner is invoked, and the outcome becomes
//! `completed` (runner output) or `failed` (runner error text). Every step is
//! a compare-and-set on the ledger, so a second worker racing on the same
//! execution fails with `InvalidTransition` instead of rewinding it.

use std::sync::Arc;

use async_trait::async_trait;
use registry_state::{
    Execution, ExecutionLedger, ExecutionStatus, Metadata, Record, ResourceId,
};
use tracing::{debug, info, instrument, warn};

use crate::config::ExecutionMode;
use crate::error::{RegistryError, Result};

pub const PLACEHOLDER_RESULT: &str = "Protocol execution completed successfully";

/// Performs the actual work of a protocol run.
#[async_trait]
pub trait ProtocolRunner: Send + Sync {
    /// Run `execution` and return its result text.
    async fn run(&self, execution: &Record<Execution>) -> anyhow::Result<String>;
}

/// Completes immediately with a fixed result.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRunner;

#[async_trait]
impl ProtocolRunner for PlaceholderRunner {
    async fn run(&self, _execution: &Record<Execution>) -> anyhow::Result<String> {
        Ok(PLACEHOLDER_RESULT.to_string())
    }
}

/// Creates executions and drives them to a terminal status.
#[derive(Clone)]
pub struct Executor {
    ledger: Arc<dyn ExecutionLedger>,
    runner: Arc<dyn ProtocolRunner>,
    mode: ExecutionMode,
    validate_references: bool,
}

impl Executor {
    pub fn new(ledger: Arc<dyn ExecutionLedger>, runner: Arc<dyn ProtocolRunner>) -> Self {
        Executor {
            ledger,
            runner,
            mode: ExecutionMode::default(),
            validate_references: false,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_reference_validation(mut self, enabled: bool) -> Self {
        self.validate_references = enabled;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn ledger(&self) -> &Arc<dyn ExecutionLedger> {
        &self.ledger
    }

    /// Record a new execution and start it according to the mode.
    ///
    /// Inline mode returns the terminal snapshot; background mode returns the
    /// pending one and finishes on a spawned task.
    #[instrument(skip(self, metadata), fields(mode = %self.mode))]
    pub async fn execute(
        &self,
        protocol_id: &str,
        context_id: &str,
        metadata: Metadata,
    ) -> Result<Record<Execution>> {
        self.check_reference("protocol_id", protocol_id)?;
        self.check_reference("context_id", context_id)?;

        let created = self
            .ledger
            .create(Execution::pending(protocol_id, context_id, metadata))
            .await?;
        info!(execution_id = %created.id, "execution created");

        match self.mode {
            ExecutionMode::Inline => self.advance(created.id).await,
            ExecutionMode::Background => {
                let worker = self.clone();
                let id = created.id;
                tokio::spawn(async move {
                    if let Err(err) = worker.advance(id).await {
                        warn!(execution_id = %id, error = %err, "background execution stopped");
                    }
                });
                Ok(created)
            }
        }
    }

    /// Current snapshot of an execution.
    pub async fn status(&self, execution_id: &str) -> Result<Record<Execution>> {
        Ok(self.ledger.get(execution_id).await?)
    }

    /// Move a pending execution through `running` to a terminal status.
    #[instrument(skip(self), fields(execution_id = %id))]
    pub async fn advance(&self, id: ResourceId) -> Result<Record<Execution>> {
        let running = self
            .ledger
            .transition(&id, ExecutionStatus::Pending, ExecutionStatus::Running, None)
            .await?;
        debug!("execution running");

        let (to, result) = match self.runner.run(&running).await {
            Ok(output) => (ExecutionStatus::Completed, output),
            Err(err) => {
                warn!(error = %err, "protocol runner failed");
                (ExecutionStatus::Failed, format!("{err:#}"))
            }
        };

        let finished = self
            .ledger
            .transition(&id, ExecutionStatus::Running, to, Some(result))
            .await?;
        info!(status = %finished.body.status, "execution finished");
        Ok(finished)
    }

    fn check_reference(&self, field: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(RegistryError::invalid_argument(format!("{field} is required")));
        }
        if self.validate_references {
            ResourceId::parse(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_state::fakes::MemoryStore;
    use registry_state::StorageError;
    use registry_state::ResourceStore;
    use std::time::Duration;

    struct FailingRunner;

    #[async_trait]
    impl ProtocolRunner for FailingRunner {
        async fn run(&self, _execution: &Record<Execution>) -> anyhow::Result<String> {
            anyhow::bail!("model endpoint refused the request")
        }
    }

    fn executor(mode: ExecutionMode) -> (Arc<MemoryStore<Execution>>, Executor) {
        let ledger = Arc::new(MemoryStore::<Execution>::new());
        let executor =
            Executor::new(ledger.clone(), Arc::new(PlaceholderRunner)).with_mode(mode);
        (ledger, executor)
    }

    #[tokio::test]
    async fn inline_execution_completes_before_returning() {
        let (_, executor) = executor(ExecutionMode::Inline);
        let exec = executor.execute("p1", "c1", Metadata::new()).await.unwrap();

        assert_eq!(exec.body.status, ExecutionStatus::Completed);
        assert_eq!(exec.body.result, PLACEHOLDER_RESULT);
        assert!(exec.updated_at >= exec.created_at);
    }

    #[tokio::test]
    async fn background_execution_is_observed_pending_then_completed() {
        let (_, executor) = executor(ExecutionMode::Background);
        let exec = executor.execute("p1", "c1", Metadata::new()).await.unwrap();
        assert_eq!(exec.body.status, ExecutionStatus::Pending);
        assert!(exec.body.result.is_empty());

        let id = exec.id.to_string();
        let mut last_rank = 0;
        for _ in 0..100 {
            let snapshot = executor.status(&id).await.unwrap();
            assert!(snapshot.body.status.rank() >= last_rank);
            last_rank = snapshot.body.status.rank();
            if snapshot.body.status.is_terminal() {
                assert_eq!(snapshot.body.status, ExecutionStatus::Completed);
                assert!(!snapshot.body.result.is_empty());
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution never reached a terminal status");
    }

    #[tokio::test]
    async fn runner_error_fails_the_execution() {
        let ledger = Arc::new(MemoryStore::<Execution>::new());
        let executor = Executor::new(ledger, Arc::new(FailingRunner))
            .with_mode(ExecutionMode::Inline);

        let exec = executor.execute("p1", "c1", Metadata::new()).await.unwrap();
        assert_eq!(exec.body.status, ExecutionStatus::Failed);
        assert!(exec.body.result.contains("refused"));
    }

    #[tokio::test]
    async fn second_advance_cannot_rewind() {
        let (ledger, executor) = executor(ExecutionMode::Inline);
        let exec = executor.execute("p1", "c1", Metadata::new()).await.unwrap();

        let err = executor.advance(exec.id).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Storage(StorageError::InvalidTransition { .. })
        ));
        let stored = ledger.get(&exec.id.to_string()).await.unwrap();
        assert_eq!(stored.body.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn empty_references_are_rejected() {
        let (ledger, executor) = executor(ExecutionMode::Inline);
        let err = executor.execute("", "c1", Metadata::new()).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
        let err = executor.execute("p1", "  ", Metadata::new()).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn reference_validation_requires_ids() {
        let (_, executor) = executor(ExecutionMode::Inline);
        let strict = executor.with_reference_validation(true);

        let err = strict.execute("p1", "c1", Metadata::new()).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Storage(StorageError::InvalidId { .. })
        ));

        let ok = strict
            .execute(
                &ResourceId::new().to_string(),
                &ResourceId::new().to_string(),
                Metadata::new(),
            )
            .await
            .unwrap();
        assert_eq!(ok.body.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn status_of_unknown_execution() {
        let (_, executor) = executor(ExecutionMode::Inline);
        let err = executor.status("not-an-id").await.unwrap_err();
        assert!(matches!(err, RegistryError::Storage(StorageError::InvalidId { .. })));

        let err = executor
            .status(&ResourceId::new().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Storage(StorageError::NotFound { .. })));
    }
}
