//! SurrealDB Handle - Connection and store construction
//!
//! Manages the connection and hands out per-collection stores:
//! - `StoreConfig`: endpoint, namespace/database, credentials, collection
//!   names and the per-operation deadline
//! - `SurrealHandle::connect`: connect, authenticate, select ns/db, run
//!   migrations
//! - `SurrealHandle::store::<T>()`: a `SurrealStore<T>` bound to T's
//!   configured collection
//!
//! Supports in-memory (`mem://`), embedded on-disk (`surrealkv://<path>`) and
//! remote (`ws://` / `wss://`) endpoints.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::Resource;
use crate::storage_traits::StorageResult;
use crate::surreal_store::SurrealStore;
use crate::Result;

/// Default per-operation deadline.
pub const DEFAULT_OP_TIMEOUT_MS: u64 = 10_000;

/// Credentials for remote endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Root user (true) or database user (false)
    #[serde(default)]
    pub is_root: bool,
}

/// Collection (table) name per resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Collections {
    pub models: String,
    pub contexts: String,
    pub protocols: String,
    pub executions: String,
    pub data: String,
}

impl Default for Collections {
    fn default() -> Self {
        Collections {
            models: "models".to_string(),
            contexts: "contexts".to_string(),
            protocols: "protocols".to_string(),
            executions: "executions".to_string(),
            data: "data".to_string(),
        }
    }
}

impl Collections {
    /// Configured collection for resource `T`.
    pub fn name_for<T: Resource>(&self) -> &str {
        match T::KIND {
            "model" => &self.models,
            "context" => &self.contexts,
            "protocol" => &self.protocols,
            "execution" => &self.executions,
            "data" => &self.data,
            _ => T::COLLECTION,
        }
    }

    pub fn all(&self) -> [&str; 5] {
        [
            &self.models,
            &self.contexts,
            &self.protocols,
            &self.executions,
            &self.data,
        ]
    }

    /// Table names are interpolated into queries, so keep them to
    /// `[A-Za-z_][A-Za-z0-9_]*` and distinct.
    pub fn validate(&self) -> Result<()> {
        let names = self.all();
        for (i, name) in names.iter().enumerate() {
            let mut chars = name.chars();
            let valid_head = chars
                .next()
                .map(|c| c.is_ascii_alphabetic() || c == '_')
                .unwrap_or(false);
            if !valid_head || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(StateError::Config(format!(
                    "invalid collection name: {name:?}"
                )));
            }
            if names[..i].contains(name) {
                return Err(StateError::Config(format!(
                    "collection {name:?} configured twice"
                )));
            }
        }
        Ok(())
    }
}

/// Connection configuration for the registry database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Endpoint URL (`mem://`, `surrealkv://path`, `ws://host:port`, ...)
    pub url: String,
    pub namespace: String,
    #[serde(alias = "name")]
    pub database: String,
    pub credentials: Option<Credentials>,
    pub collections: Collections,
    /// Deadline applied to every store operation, in milliseconds
    pub op_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            url: "mem://".to_string(),
            namespace: "registry".to_string(),
            database: "main".to_string(),
            credentials: None,
            collections: Collections::default(),
            op_timeout_ms: DEFAULT_OP_TIMEOUT_MS,
        }
    }
}

impl StoreConfig {
    /// In-memory configuration.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout_ms = timeout.as_millis().min(u128::from(u64::MAX)) as u64;
        self
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Overlay environment variables.
    ///
    /// Reads:
    /// - SURREALDB_URL
    /// - SURREALDB_NAMESPACE / SURREALDB_DATABASE
    /// - SURREALDB_USERNAME + SURREALDB_PASSWORD (both required to sign in)
    /// - SURREALDB_ROOT ("true" for root users)
    /// - REGISTRY_OP_TIMEOUT_MS
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::apply_env`] with an explicit variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SURREALDB_URL") {
            self.url = url;
        }
        if let Some(ns) = lookup("SURREALDB_NAMESPACE") {
            self.namespace = ns;
        }
        if let Some(db) = lookup("SURREALDB_DATABASE") {
            self.database = db;
        }
        if let (Some(username), Some(password)) =
            (lookup("SURREALDB_USERNAME"), lookup("SURREALDB_PASSWORD"))
        {
            let is_root = lookup("SURREALDB_ROOT")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            self.credentials = Some(Credentials {
                username,
                password,
                is_root,
            });
        }
        if let Some(raw) = lookup("REGISTRY_OP_TIMEOUT_MS") {
            self.op_timeout_ms = raw.parse().map_err(|_| {
                StateError::Config(format!("REGISTRY_OP_TIMEOUT_MS is not a number: {raw:?}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(StateError::Config("database url is empty".to_string()));
        }
        if self.op_timeout_ms == 0 {
            return Err(StateError::Config(
                "op_timeout_ms must be positive".to_string(),
            ));
        }
        self.collections.validate()
    }
}

/// SurrealDB connection handle for the registry
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
    config: StoreConfig,
}

impl SurrealHandle {
    /// Connect to an in-memory database and set up the schema.
    pub async fn in_memory() -> Result<Self> {
        Self::connect(StoreConfig::in_memory()).await
    }

    /// Connect, authenticate, select namespace/database and migrate.
    #[instrument(skip(config), fields(url = %config.url, namespace = %config.namespace, database = %config.database))]
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        if let Some(path) = config.url.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StateError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        info!("Connecting to SurrealDB");
        let db = surrealdb::engine::any::connect(&config.url)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to connect to {}: {}", config.url, e))
            })?;

        if let Some(creds) = &config.credentials {
            if creds.is_root {
                db.signin(Root {
                    username: &creds.username,
                    password: &creds.password,
                })
                .await
                .map_err(|e| StateError::Connection(format!("Root authentication failed: {e}")))?;
            } else {
                db.signin(Database {
                    namespace: &config.namespace,
                    database: &config.database,
                    username: &creds.username,
                    password: &creds.password,
                })
                .await
                .map_err(|e| {
                    StateError::Connection(format!("Database authentication failed: {e}"))
                })?;
            }
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to select namespace/database: {e}"))
            })?;

        migrations::init_schema(&db, &config.collections).await?;

        info!("SurrealDB connected and schema initialized");
        Ok(SurrealHandle { db, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// A store for resource `T` on its configured collection.
    pub fn store<T: Resource>(&self) -> SurrealStore<T> {
        SurrealStore::new(
            self.db.clone(),
            self.config.collections.name_for::<T>(),
            self.config.op_timeout(),
        )
    }

    /// Round-trip to the database, bounded by the operation deadline.
    pub async fn ping(&self) -> StorageResult<()> {
        match tokio::time::timeout(self.config.op_timeout(), self.db.health()).await {
            Ok(result) => result.map_err(|e| StorageError::Unavailable(e.to_string())),
            Err(_) => Err(StorageError::DeadlineExceeded {
                operation: "ping",
                timeout_ms: self.config.op_timeout_ms,
            }),
        }
    }
}
