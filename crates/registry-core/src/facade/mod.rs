//! Transport facade
//!
//! [`Registry`] maps each RPC operation onto exactly one store or executor
//! call. Stores are injected at construction ([`Stores`]), so tests build an
//! isolated registry per case. Handlers turn the returned `Result` into an
//! [`Envelope`]; that conversion is the only place errors change shape.

mod envelope;
mod messages;

pub use envelope::Envelope;
pub use messages::*;

use std::sync::Arc;

use registry_state::fakes::MemoryStore;
use registry_state::{
    Context, DataRecord, Execution, ExecutionLedger, Filter, ListQuery, Metadata, Model, Page,
    ProtocolDef, Record, Resource, ResourceStore, SurrealHandle,
};
use tracing::{debug, instrument};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::execution::{Executor, PlaceholderRunner, ProtocolRunner};

/// Page size used when a request asks for 0.
pub const DEFAULT_PAGE_SIZE: u32 = 10;
/// Largest page a single call returns.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Metadata key carrying the free-form execution input.
pub const INPUT_METADATA_KEY: &str = "input";

/// Resolve the requested page size.
pub fn effective_page_size(requested: u32) -> u32 {
    match requested {
        0 => DEFAULT_PAGE_SIZE,
        n => n.min(MAX_PAGE_SIZE),
    }
}

/// One store per resource kind.
#[derive(Clone)]
pub struct Stores {
    pub models: Arc<dyn ResourceStore<Model>>,
    pub contexts: Arc<dyn ResourceStore<Context>>,
    pub protocols: Arc<dyn ResourceStore<ProtocolDef>>,
    pub executions: Arc<dyn ExecutionLedger>,
    pub data: Arc<dyn ResourceStore<DataRecord>>,
}

impl Stores {
    /// SurrealDB-backed stores sharing one connection.
    pub fn surreal(handle: &SurrealHandle) -> Self {
        Stores {
            models: Arc::new(handle.store::<Model>()),
            contexts: Arc::new(handle.store::<Context>()),
            protocols: Arc::new(handle.store::<ProtocolDef>()),
            executions: Arc::new(handle.store::<Execution>()),
            data: Arc::new(handle.store::<DataRecord>()),
        }
    }

    /// Fresh in-memory stores.
    pub fn in_memory() -> Self {
        Stores {
            models: Arc::new(MemoryStore::<Model>::new()),
            contexts: Arc::new(MemoryStore::<Context>::new()),
            protocols: Arc::new(MemoryStore::<ProtocolDef>::new()),
            executions: Arc::new(MemoryStore::<Execution>::new()),
            data: Arc::new(MemoryStore::<DataRecord>::new()),
        }
    }
}

/// The registry service.
#[derive(Clone)]
pub struct Registry {
    stores: Stores,
    executor: Executor,
}

impl Registry {
    pub fn new(stores: Stores, executor: Executor) -> Self {
        Registry { stores, executor }
    }

    /// Wire `stores` with the placeholder runner and the configured modes.
    pub fn from_config(stores: Stores, config: &RegistryConfig) -> Self {
        Self::with_runner(stores, config, Arc::new(PlaceholderRunner))
    }

    pub fn with_runner(
        stores: Stores,
        config: &RegistryConfig,
        runner: Arc<dyn ProtocolRunner>,
    ) -> Self {
        let executor = Executor::new(stores.executions.clone(), runner)
            .with_mode(config.execution_mode)
            .with_reference_validation(config.validate_references);
        Registry { stores, executor }
    }

    /// In-memory registry with default settings.
    pub fn in_memory() -> Self {
        Self::from_config(Stores::in_memory(), &RegistryConfig::default())
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    // -- models --------------------------------------------------------------

    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create_model(&self, req: CreateModelRequest) -> Result<Record<Model>> {
        require("name", &req.name)?;
        require("type", &req.model_type)?;
        let model = Model::new(req.name, req.model_type)
            .with_description(req.description)
            .with_parameters(req.parameters);
        Ok(self.stores.models.create(model).await?)
    }

    pub async fn get_model(&self, req: IdRequest) -> Result<Record<Model>> {
        Ok(self.stores.models.get(&req.id).await?)
    }

    pub async fn list_models(&self, req: ListRequest) -> Result<ListModelsResponse> {
        let page = list_page::<Model, _>(
            self.stores.models.as_ref(),
            Filter::new(),
            req.page_size,
            req.page_token,
        )
        .await?;
        Ok(ListModelsResponse {
            models: page.items,
            next_page_token: page.next_page_token.unwrap_or_default(),
        })
    }

    // -- contexts ------------------------------------------------------------

    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create_context(&self, req: CreateContextRequest) -> Result<Record<Context>> {
        require("name", &req.name)?;
        let context = Context {
            name: req.name,
            content: req.content,
            description: req.description,
            model_ids: req.model_ids,
            metadata: req.metadata,
        };
        Ok(self.stores.contexts.create(context).await?)
    }

    pub async fn get_context(&self, req: IdRequest) -> Result<Record<Context>> {
        Ok(self.stores.contexts.get(&req.id).await?)
    }

    pub async fn list_contexts(&self, req: ListRequest) -> Result<ListContextsResponse> {
        let page = list_page::<Context, _>(
            self.stores.contexts.as_ref(),
            Filter::new(),
            req.page_size,
            req.page_token,
        )
        .await?;
        Ok(ListContextsResponse {
            contexts: page.items,
            next_page_token: page.next_page_token.unwrap_or_default(),
        })
    }

    // -- protocols -----------------------------------------------------------

    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create_protocol(
        &self,
        req: CreateProtocolRequest,
    ) -> Result<Record<ProtocolDef>> {
        require("name", &req.name)?;
        require("type", &req.protocol_type)?;
        let protocol = ProtocolDef {
            name: req.name,
            protocol_type: req.protocol_type,
            description: req.description,
            steps: req.steps,
            parameters: req.parameters,
        };
        Ok(self.stores.protocols.create(protocol).await?)
    }

    pub async fn get_protocol(&self, req: IdRequest) -> Result<Record<ProtocolDef>> {
        Ok(self.stores.protocols.get(&req.id).await?)
    }

    pub async fn list_protocols(&self, req: ListRequest) -> Result<ListProtocolsResponse> {
        let page = list_page::<ProtocolDef, _>(
            self.stores.protocols.as_ref(),
            Filter::new(),
            req.page_size,
            req.page_token,
        )
        .await?;
        Ok(ListProtocolsResponse {
            protocols: page.items,
            next_page_token: page.next_page_token.unwrap_or_default(),
        })
    }

    // -- executions ----------------------------------------------------------

    #[instrument(skip(self, req), fields(protocol_id = %req.protocol_id, context_id = %req.context_id))]
    pub async fn execute_protocol(
        &self,
        req: ExecuteProtocolRequest,
    ) -> Result<ExecuteProtocolResponse> {
        let mut metadata: Metadata = req.parameters;
        if !req.input.is_empty() {
            metadata.insert(INPUT_METADATA_KEY.to_string(), req.input);
        }
        let execution = self
            .executor
            .execute(&req.protocol_id, &req.context_id, metadata)
            .await?;
        Ok(ExecuteProtocolResponse {
            execution_id: execution.id.to_string(),
            status: execution.body.status,
        })
    }

    pub async fn get_protocol_status(
        &self,
        req: GetProtocolStatusRequest,
    ) -> Result<ProtocolStatusResponse> {
        let execution = self.executor.status(&req.execution_id).await?;
        Ok(execution.into())
    }

    pub async fn list_executions(
        &self,
        req: ListExecutionsRequest,
    ) -> Result<ListExecutionsResponse> {
        let mut filter = Filter::new();
        if !req.protocol_id.is_empty() {
            filter = filter.eq("protocol_id", req.protocol_id);
        }
        if !req.context_id.is_empty() {
            filter = filter.eq("context_id", req.context_id);
        }
        if let Some(status) = req.status {
            filter = filter.eq("status", status.as_str());
        }
        let page = list_page::<Execution, _>(
            self.stores.executions.as_ref(),
            filter,
            req.page_size,
            req.page_token,
        )
        .await?;
        Ok(ListExecutionsResponse {
            executions: page.items.into_iter().map(Into::into).collect(),
            next_page_token: page.next_page_token.unwrap_or_default(),
        })
    }

    // -- data ----------------------------------------------------------------

    #[instrument(skip(self, req), fields(data_type = %req.data_type, bytes = req.content.len()))]
    pub async fn add_data(&self, req: AddDataRequest) -> Result<Record<DataRecord>> {
        require("type", &req.data_type)?;
        let record = DataRecord::new(req.data_type, req.content, req.metadata);
        Ok(self.stores.data.create(record).await?)
    }

    pub async fn get_data(&self, req: IdRequest) -> Result<Record<DataRecord>> {
        Ok(self.stores.data.get(&req.id).await?)
    }

    pub async fn list_data(&self, req: ListDataRequest) -> Result<ListDataResponse> {
        let filter = if req.data_type.is_empty() {
            Filter::new()
        } else {
            Filter::new().eq("type", req.data_type)
        };
        let page = list_page::<DataRecord, _>(
            self.stores.data.as_ref(),
            filter,
            req.page_size,
            req.page_token,
        )
        .await?;
        Ok(ListDataResponse {
            data: page.items,
            next_page_token: page.next_page_token.unwrap_or_default(),
        })
    }

    #[instrument(skip(self, req), fields(id = %req.id))]
    pub async fn delete_data(&self, req: IdRequest) -> Result<DeleteDataResponse> {
        self.stores.data.delete(&req.id).await?;
        debug!("data deleted");
        Ok(DeleteDataResponse { success: true })
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(RegistryError::invalid_argument(format!("{field} is required")))
    } else {
        Ok(())
    }
}

async fn list_page<T, S>(
    store: &S,
    filter: Filter,
    page_size: u32,
    page_token: String,
) -> Result<Page<T>>
where
    T: Resource,
    S: ResourceStore<T> + ?Sized,
{
    let query = ListQuery::new(effective_page_size(page_size))
        .with_filter(filter)
        .after(page_token);
    Ok(store.list(&query).await?)
}
