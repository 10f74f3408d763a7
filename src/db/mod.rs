//! Database module: URI builder, engine lifecycle, PostgreSQL and SQL Server backends

mod client;
mod driver;
pub(crate) mod engine;
mod query;
mod uri;
pub mod postgres;
pub mod sqlserver;

pub use client::*;
pub use driver::*;
pub use engine::{open_engine, EngineHandle};
pub use query::*;
pub use uri::{build_connection_uri, ConnectionUri};
