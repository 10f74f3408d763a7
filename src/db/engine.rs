//! Engine creation and validation

use crate::db::driver::{DatabaseBackend, DatabaseEngine, SqlClient};
use crate::db::uri::redact;
use crate::db::{QueryParams, QueryResult};
use crate::error::{ConnectorError, Result};
use tracing::{debug, info, warn};

/// An engine that has completed one trial connection.
///
/// Only [`open_engine`] hands these out.
pub struct EngineHandle {
    engine: Box<dyn DatabaseEngine>,
}

impl EngineHandle {
    pub fn backend(&self) -> DatabaseBackend {
        self.engine.backend()
    }

    /// Run a query through the engine
    pub async fn execute(&self, query: &str, params: &QueryParams) -> Result<QueryResult> {
        debug!(backend = %self.backend(), params = params.len(), "Executing query");
        match self.engine.execute_query(query, params).await {
            Ok(result) => {
                debug!(
                    rows = result.row_count,
                    elapsed_ms = result.execution_time.as_millis() as u64,
                    "Query finished"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(error = %e, "Query failed");
                Err(ConnectorError::query_execution(e))
            }
        }
    }

    /// Release the engine's pooled resources
    pub async fn dispose(self) {
        self.engine.dispose().await;
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("backend", &self.backend())
            .finish()
    }
}

/// Create an engine for `uri` and check it with one open/close cycle.
///
/// Fails fast on an empty URI without calling the client. Any failure while
/// creating or validating the engine is returned as a connection error and
/// the engine is dropped. There are no retries.
pub async fn open_engine(client: &dyn SqlClient, uri: &str) -> Result<EngineHandle> {
    info!("Creating connection to database");
    if uri.trim().is_empty() {
        warn!("The connection string cannot be empty");
        return Err(ConnectorError::EmptyConnectionString);
    }

    let shown = redact(uri);
    let engine = client.create_engine(uri).await.map_err(|e| {
        warn!(uri = %shown, error = %e, "Failed to create database engine");
        ConnectorError::connection(e)
    })?;

    if let Err(e) = validate(engine.as_ref()).await {
        warn!(uri = %shown, error = %e, "Failed to create database engine");
        engine.dispose().await;
        return Err(ConnectorError::connection(e));
    }

    info!(uri = %shown, backend = %engine.backend(), "Database connection created successfully");
    Ok(EngineHandle { engine })
}

async fn validate(engine: &dyn DatabaseEngine) -> anyhow::Result<()> {
    let conn = engine.connect().await?;
    conn.close().await
}
