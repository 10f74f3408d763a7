//! SQL Connector - Library
//! Connect to PostgreSQL or SQL Server from explicit credentials or a `.env`
//! file, and run queries that come back as in-memory tables.

pub mod config;
pub mod connector;
pub mod db;
pub mod error;
pub mod logging;

pub use config::{CredentialSource, Credentials, DatabaseKind, EnvFileSource, ProcessEnvSource};
pub use connector::Connector;
pub use db::{QueryParams, QueryResult, Value};
pub use error::{ConfigError, ConnectorError, Result};
