//! Default SQL client: picks a backend from the URI scheme

use crate::db::driver::{DatabaseBackend, DatabaseEngine, SqlClient};
use crate::db::postgres::PostgresEngine;
use crate::db::sqlserver::SqlServerEngine;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;

/// Client backed by SQLx for PostgreSQL and tiberius for SQL Server
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeClient;

/// Which backend serves a connection URI
pub fn backend_for_uri(uri: &str) -> Result<DatabaseBackend> {
    let (scheme, _) = uri
        .split_once("://")
        .context("Connection string has no scheme")?;

    match scheme.to_ascii_lowercase().as_str() {
        "postgresql" | "postgres" => Ok(DatabaseBackend::Postgres),
        s if s == "mssql" || s.starts_with("mssql+") => Ok(DatabaseBackend::SqlServer),
        other => bail!("No database client available for scheme '{}'", other),
    }
}

#[async_trait]
impl SqlClient for NativeClient {
    async fn create_engine(&self, uri: &str) -> Result<Box<dyn DatabaseEngine>> {
        let engine: Box<dyn DatabaseEngine> = match backend_for_uri(uri)? {
            DatabaseBackend::Postgres => Box::new(PostgresEngine::connect_lazy(uri)?),
            DatabaseBackend::SqlServer => Box::new(SqlServerEngine::from_uri(uri)?),
        };
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::engine::open_engine;
    use std::error::Error as _;
    use std::time::{Duration, Instant};

    // nothing listens on port 1, so the trial connection is refused at once
    async fn assert_refused_once(uri: &str) {
        let start = Instant::now();
        let err = open_engine(&NativeClient, uri).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_connection_error());
        assert!(elapsed < Duration::from_secs(5), "trial connection took {:?}", elapsed);

        let mut chain = Vec::new();
        let mut cause = err.source();
        while let Some(e) = cause {
            chain.push(e.to_string());
            cause = e.source();
        }
        assert!(
            chain.iter().any(|m| m.to_lowercase().contains("refused")),
            "cause not kept: {:?}",
            chain
        );
    }

    #[test]
    fn test_backend_for_uri() {
        assert_eq!(
            backend_for_uri("postgresql://u:p@db1/sales").unwrap(),
            DatabaseBackend::Postgres
        );
        assert_eq!(
            backend_for_uri("postgres://u:p@db1/sales").unwrap(),
            DatabaseBackend::Postgres
        );
        assert_eq!(
            backend_for_uri("mssql+pyodbc://u:p@db2/hr?driver=X").unwrap(),
            DatabaseBackend::SqlServer
        );
        assert!(backend_for_uri("oracle://u:p@db3/x").is_err());
        assert!(backend_for_uri("db1/sales").is_err());
    }

    #[tokio::test]
    async fn test_create_engine_is_lazy() {
        let engine = NativeClient
            .create_engine("mssql+pyodbc://u:p@127.0.0.1:1/hr?driver=ODBC+Driver+17+for+SQL+Server")
            .await
            .unwrap();
        assert_eq!(engine.backend(), DatabaseBackend::SqlServer);

        let engine = NativeClient
            .create_engine("postgresql://u:p@127.0.0.1:1/sales")
            .await
            .unwrap();
        assert_eq!(engine.backend(), DatabaseBackend::Postgres);
        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_postgres_refused_trial_connection_is_not_retried() {
        assert_refused_once("postgresql://u:p@127.0.0.1:1/sales").await;
    }

    #[tokio::test]
    async fn test_sqlserver_refused_trial_connection_is_not_retried() {
        assert_refused_once(
            "mssql+pyodbc://u:p@127.0.0.1:1/hr?driver=ODBC+Driver+17+for+SQL+Server",
        )
        .await;
    }
}
