use std::sync::Arc;

use serde_json::Value;
use sqlrest_core::{
    CompileOptions, CompiledQuery, Compiler, Error, Result, RowSet, SchemaSnapshot,
    SelectionNode, SessionContext, SqlValue, parse_request, shape,
};
use sqlrest_sqlite::{CatalogReader, ConnectionPool, SessionManager};

use crate::config::{Config, ConfigError};

/// Failure to bring up a [`Sqlrest`] instance.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] Error),
}

/// One database, its connection pool and its catalog.
///
/// Cheap to share behind an `Arc`; every method takes `&self`. Separate
/// instances never see each other's in-memory databases.
#[derive(Debug)]
pub struct Sqlrest {
    config: Config,
    compile_options: CompileOptions,
    sessions: SessionManager,
    catalog: Arc<CatalogReader>,
}

impl Sqlrest {
    /// Opens the database and every pooled connection.
    pub fn open(config: Config) -> std::result::Result<Self, OpenError> {
        config.validate()?;

        let options = config.connection_options();
        // The pool opens first so an in-memory database exists before the
        // catalog connection attaches to it
        let pool = ConnectionPool::open(options.clone(), config.database.pool_size)?;
        let catalog = Arc::new(CatalogReader::open(&options)?);

        Ok(Self {
            compile_options: config.compile_options(),
            sessions: SessionManager::new(pool, config.statement_timeout()),
            catalog,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        self.sessions.pool()
    }

    /// Current catalog snapshot, reloaded when the schema changed.
    pub async fn catalog(&self) -> Result<Arc<SchemaSnapshot>> {
        let catalog = Arc::clone(&self.catalog);
        tokio::task::spawn_blocking(move || catalog.snapshot())
            .await
            .map_err(|e| Error::ExecutionFailed(e.to_string()))?
    }

    /// Forces the next catalog read to reload.
    pub fn invalidate_catalog(&self) {
        self.catalog.invalidate();
    }

    /// Compiles `node` without running it.
    pub async fn compile(&self, node: &SelectionNode, ctx: &SessionContext) -> Result<CompiledQuery> {
        let snapshot = self.catalog().await?;
        Compiler::new(&snapshot, &self.compile_options).compile(node, ctx)
    }

    /// Compiles, executes under `ctx` and shapes the rows into one JSON
    /// object per root row.
    pub async fn execute(&self, node: &SelectionNode, ctx: SessionContext) -> Result<Vec<Value>> {
        let compiled = self.compile(node, &ctx).await?;
        let rows = self
            .sessions
            .with_context(&ctx, &compiled.sql, &compiled.params)
            .await?;
        shape(&rows, &compiled.shape)
    }

    /// Like [`execute`](Self::execute), starting from PostgREST query
    /// parameters (`select`, `order`, `limit`, `offset` and filters).
    pub async fn execute_query<I, K, V>(
        &self,
        table: &str,
        params: I,
        ctx: SessionContext,
    ) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let node = parse_request(table, params)?;
        self.execute(&node, ctx).await
    }

    /// Runs hand-written SQL under `ctx`. Skips the compiler, not the
    /// identity switch.
    pub async fn execute_raw(
        &self,
        sql: &str,
        params: &[SqlValue],
        ctx: SessionContext,
    ) -> Result<RowSet> {
        self.sessions.with_context(&ctx, sql, params).await
    }

    /// Waits for in-flight executions, then closes every pooled connection.
    /// Later executions fail.
    pub async fn shutdown(&self) {
        self.sessions.pool().close().await;
        #[cfg(feature = "tracing")]
        tracing::info!(pool_size = self.config.database.pool_size, "sqlrest.shutdown");
    }
}
