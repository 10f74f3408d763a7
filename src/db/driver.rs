//! Database driver abstraction traits
//!
//! Defines the seam between the connector and the SQL client libraries:
//! a factory that binds a URI to a lazy engine, the engine itself, and a
//! single physical connection used for validation.

use crate::db::{QueryParams, QueryResult};
use anyhow::Result;
use async_trait::async_trait;

/// Which backend an engine talks to
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DatabaseBackend {
    Postgres,
    SqlServer,
}

impl std::fmt::Display for DatabaseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackend::Postgres => write!(f, "PostgreSQL"),
            DatabaseBackend::SqlServer => write!(f, "SQL Server"),
        }
    }
}

/// Binds a connection URI to an engine.
///
/// Creating an engine does not have to touch the network; reachability is
/// checked afterwards with a trial connection.
#[async_trait]
pub trait SqlClient: Send + Sync {
    async fn create_engine(&self, uri: &str) -> Result<Box<dyn DatabaseEngine>>;
}

/// A re-openable connection resource bound to one database
#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// Which backend this engine represents
    fn backend(&self) -> DatabaseBackend;

    /// Open one physical connection
    async fn connect(&self) -> Result<Box<dyn DatabaseConnection>>;

    /// Execute a SQL query and materialize every row
    async fn execute_query(&self, query: &str, params: &QueryParams) -> Result<QueryResult>;

    /// Release pooled resources. Engines without a pool have nothing to do.
    async fn dispose(&self) {}
}

/// A single open connection
#[async_trait]
pub trait DatabaseConnection: Send {
    async fn close(self: Box<Self>) -> Result<()>;
}
