//! Typed entity store: declared entity types with typed parameters, a
//! parent/child tree, labeled associations and chunked binary payloads, on
//! top of SQLite or PostgreSQL.

pub mod config;
pub mod data;
pub mod database;
pub mod entity;
pub mod error;
mod indexes;
pub mod query;
pub mod registry;
pub mod session;

use std::sync::Arc;

use common::TypeSchema;
use futures::future::BoxFuture;
use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::{info, instrument, warn};

pub use config::{DataConfig, DatabaseConfig, StoreConfig};
pub use data::{BoxReader, ChunkedData, PayloadStore};
pub use error::{Result, StoreError};
pub use query::{Criterion, Filter, FindOptions, Predicate};
pub use registry::TypeRegistry;
pub use session::{EntityHandle, EntityView, InheritedParams, Session};

/// Entry point: an open connection plus the registry of declared types.
#[derive(Debug, Clone)]
pub struct Store {
    db: DatabaseConnection,
    registry: Arc<TypeRegistry>,
    data_config: DataConfig,
}

impl Store {
    pub fn new(db: DatabaseConnection, data_config: DataConfig) -> Self {
        Self {
            db,
            registry: Arc::new(TypeRegistry::new()),
            data_config,
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn data_config(&self) -> DataConfig {
        self.data_config
    }

    /// Declare a type and record its parameters in the database.
    ///
    /// Returns the stored identity. Registering an unchanged schema again is
    /// a no-op; a changed schema under the same name gets its own identity.
    /// Sessions begun earlier keep the registry they started with.
    pub async fn register(&mut self, schema: TypeSchema) -> Result<String> {
        let identity = registry::persist_schema(&self.db, &schema).await?;
        Arc::make_mut(&mut self.registry).insert(schema);
        Ok(identity)
    }

    /// Register every type recorded in the database. Returns how many were
    /// found.
    #[instrument(skip(self))]
    pub async fn register_from_db(&mut self) -> Result<usize> {
        let schemas = registry::types_from_db(&self.db).await?;
        let count = schemas.len();
        let registry = Arc::make_mut(&mut self.registry);
        for schema in schemas {
            registry.insert(schema);
        }
        info!(types = count, "Loaded types from database");
        Ok(count)
    }

    /// Whether the stored declarations match `schema`.
    pub async fn is_consistent(&self, schema: &TypeSchema) -> Result<bool> {
        registry::is_consistent(&self.db, schema).await
    }

    /// Open a session over a new transaction.
    pub async fn begin(&self) -> Result<Session> {
        let txn = self.db.begin().await?;
        Ok(Session::new(
            txn,
            Arc::clone(&self.registry),
            self.data_config,
        ))
    }

    /// Run `f` in a fresh session. Commits when `f` succeeds; otherwise
    /// rolls back and returns the error from `f`.
    pub async fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T>>,
    {
        let mut session = self.begin().await?;
        match f(&mut session).await {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = session.rollback().await {
                    warn!(error = %rollback, "Rollback after failed transaction also failed");
                }
                Err(e)
            }
        }
    }
}
