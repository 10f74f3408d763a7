//! Blocking query façade
//!
//! A [`Connector`] owns one validated engine and a private current-thread
//! tokio runtime that drives it. It must not be used from inside another
//! async runtime.

use crate::config::{CredentialSource, Credentials, EnvFileSource};
use crate::db::{
    build_connection_uri, open_engine, DatabaseBackend, EngineHandle, NativeClient, QueryParams,
    QueryResult, SqlClient,
};
use crate::error::{ConnectorError, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

pub struct Connector {
    // dropped before the runtime that drives it
    engine: EngineHandle,
    runtime: Runtime,
}

impl Connector {
    /// Connect with explicit credentials
    pub fn new(credentials: &Credentials) -> Result<Self> {
        Self::with_client(credentials, Arc::new(NativeClient))
    }

    /// Connect with credentials read from a configuration source
    pub fn from_source<S: CredentialSource + ?Sized>(source: &S) -> Result<Self> {
        Self::from_source_with_client(source, Arc::new(NativeClient))
    }

    /// Connect with credentials read from a `.env` file
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = EnvFileSource::load(path)?;
        Self::from_source(&source)
    }

    /// Connect through a specific SQL client
    pub fn with_client(credentials: &Credentials, client: Arc<dyn SqlClient>) -> Result<Self> {
        let uri = build_connection_uri(credentials)?;
        info!(uri = %uri, kind = %credentials.kind, "Connecting");

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ConnectorError::Runtime)?;
        let engine = runtime.block_on(open_engine(client.as_ref(), uri.as_str()))?;

        Ok(Self { engine, runtime })
    }

    pub fn from_source_with_client<S: CredentialSource + ?Sized>(
        source: &S,
        client: Arc<dyn SqlClient>,
    ) -> Result<Self> {
        let credentials = Credentials::from_source(source)?;
        Self::with_client(&credentials, client)
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.engine.backend()
    }

    /// Execute a SQL query and return every row in memory.
    ///
    /// `params` go to the driver untouched; use the driver's placeholder
    /// syntax in `query`.
    pub fn execute_query(
        &self,
        query: &str,
        params: impl Into<QueryParams>,
    ) -> Result<QueryResult> {
        let params = params.into();
        self.runtime.block_on(self.engine.execute(query, &params))
    }

    /// Shut the engine down, closing any pooled connections
    pub fn close(self) {
        let Connector { engine, runtime } = self;
        runtime.block_on(engine.dispose());
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DB_DATABASE_KEY, DB_DRIVER_KEY, DB_PASSWORD_KEY, DB_SERVER_KEY, DB_TYPE_KEY,
        DB_USERNAME_KEY,
    };
    use crate::db::engine::tests::{FailAt, StubClient};
    use crate::db::Value;
    use crate::error::ConfigError;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    fn mssql_source() -> HashMap<String, String> {
        [
            (DB_TYPE_KEY, "mssql"),
            (DB_SERVER_KEY, "db2"),
            (DB_DATABASE_KEY, "hr"),
            (DB_USERNAME_KEY, "u"),
            (DB_PASSWORD_KEY, "p"),
            (DB_DRIVER_KEY, "ODBC Driver 17 for SQL Server"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_connect_with_explicit_credentials() {
        let client = StubClient::default();
        let creds = Credentials::postgres("db1", "sales", "u", "p");
        let connector = Connector::with_client(&creds, Arc::new(client.clone())).unwrap();

        assert_eq!(connector.backend(), DatabaseBackend::Postgres);
        assert_eq!(
            *client.calls.uris.lock().unwrap(),
            vec!["postgresql://u:p@db1/sales".to_string()]
        );
        assert_eq!(client.calls.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connect_from_source() {
        let client = StubClient::default();
        Connector::from_source_with_client(&mssql_source(), Arc::new(client.clone())).unwrap();

        assert_eq!(
            *client.calls.uris.lock().unwrap(),
            vec!["mssql+pyodbc://u:p@db2/hr?driver=ODBC+Driver+17+for+SQL+Server".to_string()]
        );
    }

    #[test]
    fn test_missing_config_value_fails_before_connecting() {
        let client = StubClient::default();
        let mut source = mssql_source();
        source.remove(DB_DRIVER_KEY);

        let err =
            Connector::from_source_with_client(&source, Arc::new(client.clone())).unwrap_err();
        assert!(matches!(err, ConnectorError::Config(ConfigError::ValueNotFound(_))));
        assert_eq!(client.calls.created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_driver_fails_before_connecting() {
        let client = StubClient::default();
        let creds = Credentials::mssql("db2", "hr", "u", "p", "");

        let err = Connector::with_client(&creds, Arc::new(client.clone())).unwrap_err();
        assert!(matches!(err, ConnectorError::MissingDriver));
        assert_eq!(client.calls.created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_validation_returns_no_connector() {
        let client = StubClient::failing(FailAt::Close);
        let creds = Credentials::postgres("db1", "sales", "u", "p");

        let err = Connector::with_client(&creds, Arc::new(client.clone())).unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(client.calls.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_execute_query_passes_params_unmodified() {
        let client = StubClient::default();
        let creds = Credentials::postgres("db1", "sales", "u", "p");
        let connector = Connector::with_client(&creds, Arc::new(client.clone())).unwrap();

        let query = "SELECT person_name FROM persons WHERE person_number = ?";
        let result = connector.execute_query(query, [Value::Int(8)]).unwrap();
        assert_eq!(result.get(0, "person_name"), Some(&Value::from("My Name")));

        connector
            .execute_query(query, [("person_number", Value::Int(8))])
            .unwrap();
        connector.execute_query("SELECT 1", ()).unwrap();

        let queries = client.calls.queries.lock().unwrap();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0], (query.to_string(), QueryParams::Positional(vec![Value::Int(8)])));
        assert_eq!(
            queries[1].1,
            QueryParams::Named(vec![("person_number".to_string(), Value::Int(8))])
        );
        assert_eq!(queries[2].1, QueryParams::None);
    }

    #[test]
    fn test_execute_query_failure_is_query_error() {
        let client = StubClient::failing(FailAt::Execute);
        let creds = Credentials::postgres("db1", "sales", "u", "p");
        let connector = Connector::with_client(&creds, Arc::new(client)).unwrap();

        let err = connector.execute_query("SELEC 1", ()).unwrap_err();
        assert!(err.is_query_error());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_close_disposes_engine() {
        let client = StubClient::default();
        let creds = Credentials::postgres("db1", "sales", "u", "p");
        let connector = Connector::with_client(&creds, Arc::new(client.clone())).unwrap();

        connector.close();
        assert_eq!(client.calls.disposed.load(Ordering::SeqCst), 1);
    }
}
