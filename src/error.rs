//! Error types for the connector
//!
//! Configuration problems, connectivity problems and query problems each get
//! their own variant so callers can tell them apart. Driver failures are kept
//! as the `source` of the wrapping variant.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while reading credentials from a configuration source
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the specified .env file does not exist: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to parse .env file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("configuration value '{0}' not found")]
    ValueNotFound(String),
}

/// Every failure the connector can surface to its caller
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("unsupported database type: {0}")]
    UnsupportedDatabaseKind(String),

    #[error("a driver is required for MSSQL connections")]
    MissingDriver,

    #[error("the connection string cannot be empty")]
    EmptyConnectionString,

    #[error("failed to create database engine: {source:#}")]
    Connection { source: anyhow::Error },

    #[error("an error occurred while executing the query: {source:#}")]
    QueryExecution { source: anyhow::Error },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl ConnectorError {
    pub fn connection(source: impl Into<anyhow::Error>) -> Self {
        ConnectorError::Connection { source: source.into() }
    }

    pub fn query_execution(source: impl Into<anyhow::Error>) -> Self {
        ConnectorError::QueryExecution { source: source.into() }
    }

    /// True for failures raised before any connection attempt is made
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ConnectorError::Config(_)
                | ConnectorError::UnsupportedDatabaseKind(_)
                | ConnectorError::MissingDriver
                | ConnectorError::EmptyConnectionString
        )
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, ConnectorError::Connection { .. })
    }

    pub fn is_query_error(&self) -> bool {
        matches!(self, ConnectorError::QueryExecution { .. })
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_connection_error_keeps_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ConnectorError::connection(cause);

        assert!(err.is_connection_error());
        assert!(err.to_string().contains("failed to create database engine"));
        assert!(err.to_string().contains("refused"));

        let source = err.source().expect("source should be kept");
        assert_eq!(source.to_string(), "refused");
    }

    #[test]
    fn test_query_error_keeps_context_chain() {
        let cause = anyhow::anyhow!("syntax error at or near \"SELEC\"").context("query failed");
        let err = ConnectorError::query_execution(cause);

        assert!(err.is_query_error());
        let msg = err.to_string();
        assert!(msg.contains("query failed"));
        assert!(msg.contains("syntax error"));
    }

    #[test]
    fn test_config_errors_are_distinguishable() {
        let err: ConnectorError = ConfigError::ValueNotFound("CONNECTOR_DB_TYPE".into()).into();
        assert!(err.is_config_error());
        assert!(!err.is_connection_error());
        assert_eq!(err.to_string(), "configuration value 'CONNECTOR_DB_TYPE' not found");
    }
}
