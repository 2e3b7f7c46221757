//! SurrealDB schema migrations and initialization
//!
//! Every collection shares one document layout:
//!
//! ```text
//! TABLE <collection> {
//!   id:           RECORD  (<collection>:<resource_id>)
//!   resource_id:  STRING  (unique, cursor key for pagination)
//!   body:         OBJECT  (resource fields)
//!   created_at:   DATETIME
//!   updated_at:   DATETIME
//! }
//! ```
//!
//! Filterable body fields get a secondary index so filtered pages stay cheap.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StateError;
use crate::handle::Collections;
use crate::schema::{Context, DataRecord, Execution, Model, ProtocolDef, Resource};
use crate::Result;

/// Initialize all registry collections.
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>, collections: &Collections) -> Result<()> {
    info!("Initializing registry SurrealDB schema");

    init_collection::<Model>(db, collections.name_for::<Model>()).await?;
    init_collection::<Context>(db, collections.name_for::<Context>()).await?;
    init_collection::<ProtocolDef>(db, collections.name_for::<ProtocolDef>()).await?;
    init_collection::<Execution>(db, collections.name_for::<Execution>()).await?;
    init_collection::<DataRecord>(db, collections.name_for::<DataRecord>()).await?;

    info!("Registry schema initialization complete");
    Ok(())
}

/// Statements defining one collection and its indexes.
pub fn collection_ddl<T: Resource>(table: &str) -> String {
    let mut sql = format!(
        "DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;\n\
         DEFINE INDEX IF NOT EXISTS idx_{table}_resource_id ON TABLE {table} COLUMNS resource_id UNIQUE;\n\
         DEFINE INDEX IF NOT EXISTS idx_{table}_created_at ON TABLE {table} COLUMNS created_at;\n"
    );
    for field in T::FILTER_FIELDS {
        sql.push_str(&format!(
            "DEFINE INDEX IF NOT EXISTS idx_{table}_{field} ON TABLE {table} COLUMNS body.`{field}`, resource_id;\n"
        ));
    }
    sql
}

async fn init_collection<T: Resource>(db: &Surreal<Any>, table: &str) -> Result<()> {
    debug!(table, kind = T::KIND, "Initializing collection");

    db.query(collection_ddl::<T>(table))
        .await
        .and_then(|response| response.check())
        .map_err(|e| StateError::SchemaSetup(format!("{table}: {e}")))?;

    info!("✓ {} table initialized", table);
    Ok(())
}
