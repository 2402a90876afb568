//! Pooled query execution over registered data sources.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sluice_core::{
    DataSource, DataSourceCatalog, DataSourceId, DataSourceRegistry, ResultSet, ScriptContext,
    SluiceError,
};
use sqlx::any::{AnyConnectOptions, AnyPoolOptions};
use sqlx::{AnyPool, Column, Executor};
use tokio::sync::{Mutex, RwLock};

use crate::decode;
use crate::script::ScriptRunner;

const MAX_CONNECTIONS_PER_SOURCE: u32 = 5;

struct CachedPool {
    url: String,
    pool: AnyPool,
}

/// Resolves data sources through a catalog and keeps one pool per source.
///
/// A pool is rebuilt when the catalog reports a different URL for the
/// same id.
pub struct SqlRegistry {
    catalog: Arc<dyn DataSourceCatalog>,
    scripts: ScriptRunner,
    connect_timeout: Duration,
    pools: RwLock<HashMap<DataSourceId, CachedPool>>,
    opening: Mutex<()>,
}

impl SqlRegistry {
    pub fn new(catalog: Arc<dyn DataSourceCatalog>, scripts: ScriptRunner) -> Self {
        sqlx::any::install_default_drivers();
        Self {
            catalog,
            scripts,
            connect_timeout: Duration::from_secs(30),
            pools: RwLock::new(HashMap::new()),
            opening: Mutex::new(()),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn cached(&self, source: &DataSource) -> Option<AnyPool> {
        self.pools
            .read()
            .await
            .get(&source.id)
            .filter(|cached| cached.url == source.url)
            .map(|cached| cached.pool.clone())
    }

    async fn pool_for(&self, source: &DataSource) -> Result<AnyPool, SluiceError> {
        if let Some(pool) = self.cached(source).await {
            return Ok(pool);
        }

        // Concurrent first use of a source opens a single pool.
        let _opening = self.opening.lock().await;
        if let Some(pool) = self.cached(source).await {
            return Ok(pool);
        }

        let options = AnyConnectOptions::from_str(&source.url)
            .map_err(|e| SluiceError::DataSourceUnavailable(format!("{}: {e}", source.name)))?;
        let pool = AnyPoolOptions::new()
            .max_connections(MAX_CONNECTIONS_PER_SOURCE)
            .acquire_timeout(self.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| SluiceError::DataSourceUnavailable(format!("{}: {e}", source.name)))?;

        tracing::info!(data_source_id = source.id, name = %source.name, "data source pool opened");

        let previous = self.pools.write().await.insert(
            source.id,
            CachedPool {
                url: source.url.clone(),
                pool: pool.clone(),
            },
        );
        // Runs still holding the old pool finish on it; it closes once the
        // last clone is dropped.
        if previous.is_some() {
            tracing::info!(data_source_id = source.id, "data source URL changed, pool replaced");
        }
        Ok(pool)
    }

    /// Close every pool; used on shutdown.
    pub async fn close(&self) {
        let pools: Vec<CachedPool> = self.pools.write().await.drain().map(|(_, p)| p).collect();
        for cached in pools {
            cached.pool.close().await;
        }
    }
}

fn classify(err: sqlx::Error) -> SluiceError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Configuration(_) => SluiceError::DataSourceUnavailable(err.to_string()),
        other => SluiceError::QueryExecution(other.to_string()),
    }
}

/// Column names from statement metadata, for results without rows.
async fn describe_columns(pool: &AnyPool, sql: &str) -> Vec<String> {
    match pool.describe(sql).await {
        Ok(described) => described
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
        Err(e) => {
            tracing::debug!(error = %e, "could not describe empty result");
            Vec::new()
        }
    }
}

#[async_trait::async_trait]
impl DataSourceRegistry for SqlRegistry {
    async fn execute_query(
        &self,
        data_source_id: DataSourceId,
        sql: &str,
        timeout: Duration,
    ) -> Result<ResultSet, SluiceError> {
        let source = self.catalog.data_source(data_source_id).await?;
        let pool = self.pool_for(&source).await?;

        let rows = tokio::time::timeout(timeout, sqlx::query(sql).fetch_all(&pool))
            .await
            .map_err(|_| SluiceError::TimeoutExceeded {
                secs: timeout.as_secs(),
            })?
            .map_err(classify)?;

        let columns = match rows.first() {
            Some(row) => decode::column_names(row),
            None => describe_columns(&pool, sql).await,
        };
        let rows = rows.iter().map(decode::row_values).collect();
        Ok(ResultSet::new(columns, rows))
    }

    async fn run_script(
        &self,
        data_source_id: DataSourceId,
        script_path: &str,
        function_name: &str,
        context: &ScriptContext,
        timeout: Duration,
    ) -> Result<ResultSet, SluiceError> {
        let source = self.catalog.data_source(data_source_id).await?;
        self.scripts
            .run(script_path, function_name, context, &source, timeout)
            .await
    }

    async fn test_connection(&self, data_source_id: DataSourceId) -> Result<(), SluiceError> {
        let source = self.catalog.data_source(data_source_id).await?;
        let pool = self.pool_for(&source).await?;
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}
