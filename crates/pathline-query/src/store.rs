use crate::error::Result;
use crate::statement::CompiledQuery;
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, QueryResult};
use std::sync::Arc;

/// Async seam to the event-log backend.
///
/// Compilers produce a [`CompiledQuery`]; executing it (including any
/// internal parallelism, retries or cancellation) is entirely the store's
/// business. Implementations must be safe to share across tasks.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Execute a compiled query and return all result rows
    async fn query_all(&self, query: &CompiledQuery) -> Result<Vec<QueryResult>>;
}

/// Event store backed by a Postgres `sea_orm` connection
pub struct PostgresEventStore {
    db: Arc<DatabaseConnection>,
}

impl PostgresEventStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn query_all(&self, query: &CompiledQuery) -> Result<Vec<QueryResult>> {
        tracing::debug!(sql = %query.sql, params = query.values.len(), "executing event-store query");
        let rows = self
            .db
            .query_all(query.to_statement(DatabaseBackend::Postgres))
            .await?;
        Ok(rows)
    }
}
