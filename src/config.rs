//! Credential configuration
//!
//! Credentials are either passed explicitly or read from a [`CredentialSource`]
//! keyed by fixed names. The usual source is a `.env` file; it is parsed into
//! its own map and never exported into the process environment.

use crate::error::{ConfigError, ConnectorError};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

pub const DB_TYPE_KEY: &str = "CONNECTOR_DB_TYPE";
pub const DB_SERVER_KEY: &str = "CONNECTOR_DB_SERVER";
pub const DB_DATABASE_KEY: &str = "CONNECTOR_DB_DATABASE";
pub const DB_USERNAME_KEY: &str = "CONNECTOR_DB_USERNAME";
pub const DB_PASSWORD_KEY: &str = "CONNECTOR_DB_PASSWORD";
pub const DB_DRIVER_KEY: &str = "CONNECTOR_DB_DRIVER";

/// Which kind of database the credentials point at
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DatabaseKind {
    Postgres,
    Mssql,
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseKind::Postgres => write!(f, "postgresql"),
            DatabaseKind::Mssql => write!(f, "mssql"),
        }
    }
}

impl FromStr for DatabaseKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseKind::Postgres),
            "mssql" => Ok(DatabaseKind::Mssql),
            _ => Err(ConnectorError::UnsupportedDatabaseKind(s.to_string())),
        }
    }
}

/// The six named fields identifying how and where to connect
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub kind: DatabaseKind,
    pub host: String,
    pub database: String,
    pub username: String,
    pub password: String,
    /// ODBC driver name, required for MSSQL and ignored otherwise
    pub driver: Option<String>,
}

impl Credentials {
    /// Build credentials from loose strings, parsing the database kind
    pub fn new(
        kind: &str,
        host: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        driver: Option<String>,
    ) -> Result<Self, ConnectorError> {
        Ok(Self {
            kind: kind.parse()?,
            host: host.into(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
            driver,
        })
    }

    pub fn postgres(
        host: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            kind: DatabaseKind::Postgres,
            host: host.into(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
            driver: None,
        }
    }

    pub fn mssql(
        host: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        driver: impl Into<String>,
    ) -> Self {
        Self {
            kind: DatabaseKind::Mssql,
            host: host.into(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
            driver: Some(driver.into()),
        }
    }

    /// Read credentials from a configuration source.
    ///
    /// The driver key is only read when the kind is MSSQL.
    pub fn from_source<S: CredentialSource + ?Sized>(source: &S) -> Result<Self, ConnectorError> {
        let kind: DatabaseKind = source.require(DB_TYPE_KEY)?.parse()?;
        let host = source.require(DB_SERVER_KEY)?;
        let database = source.require(DB_DATABASE_KEY)?;
        let username = source.require(DB_USERNAME_KEY)?;
        let password = source.require(DB_PASSWORD_KEY)?;
        let driver = match kind {
            DatabaseKind::Mssql => Some(source.require(DB_DRIVER_KEY)?),
            DatabaseKind::Postgres => None,
        };

        Ok(Self {
            kind,
            host,
            database,
            username,
            password,
            driver,
        })
    }

    /// The driver, if set and not blank
    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref().filter(|d| !d.trim().is_empty())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"****")
            .field("driver", &self.driver)
            .finish()
    }
}

/// A key-value store that credentials can be read from
pub trait CredentialSource {
    /// Look up a single value
    fn get(&self, key: &str) -> Option<String>;

    /// Look up a value that must be present
    fn require(&self, key: &str) -> Result<String, ConfigError> {
        info!(key, "Loading configuration value");
        self.get(key)
            .ok_or_else(|| ConfigError::ValueNotFound(key.to_string()))
    }
}

impl CredentialSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Values parsed from a `.env` file
#[derive(Clone)]
pub struct EnvFileSource {
    path: PathBuf,
    values: HashMap<String, String>,
}

impl EnvFileSource {
    /// Parse a `.env` file without touching the process environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading environment variable file");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let parse_err = |source: dotenvy::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };

        let mut values = HashMap::new();
        for item in dotenvy::from_path_iter(path).map_err(parse_err)? {
            let (key, value) = item.map_err(parse_err)?;
            values.insert(key, value);
        }

        info!(path = %path.display(), count = values.len(), "Loaded environment variable file");
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }
}

impl fmt::Debug for EnvFileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("EnvFileSource")
            .field("path", &self.path)
            .field("keys", &keys)
            .finish()
    }
}

impl CredentialSource for EnvFileSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Reads the live process environment. Only used when chosen explicitly.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnvSource;

impl CredentialSource for ProcessEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn postgres_pairs() -> Vec<(&'static str, &'static str)> {
        vec![
            (DB_TYPE_KEY, "postgresql"),
            (DB_SERVER_KEY, "db1"),
            (DB_DATABASE_KEY, "sales"),
            (DB_USERNAME_KEY, "u"),
            (DB_PASSWORD_KEY, "p"),
        ]
    }

    #[test]
    fn test_parse_database_kind() {
        assert_eq!("postgresql".parse::<DatabaseKind>().unwrap(), DatabaseKind::Postgres);
        assert_eq!("Postgres".parse::<DatabaseKind>().unwrap(), DatabaseKind::Postgres);
        assert_eq!(" MSSQL ".parse::<DatabaseKind>().unwrap(), DatabaseKind::Mssql);
    }

    #[test]
    fn test_unsupported_database_kind() {
        for kind in ["oracle", "mysql", "", "sqlite"] {
            let err = kind.parse::<DatabaseKind>().unwrap_err();
            assert!(matches!(err, ConnectorError::UnsupportedDatabaseKind(ref k) if k == kind));
        }
        assert!(Credentials::new("oracle", "h", "d", "u", "p", None).is_err());
    }

    #[test]
    fn test_from_source_postgres_ignores_driver() {
        let creds = Credentials::from_source(&source(&postgres_pairs())).unwrap();
        assert_eq!(creds, Credentials::postgres("db1", "sales", "u", "p"));
    }

    #[test]
    fn test_from_source_mssql_requires_driver() {
        let mut pairs = postgres_pairs();
        pairs[0] = (DB_TYPE_KEY, "mssql");

        let err = Credentials::from_source(&source(&pairs)).unwrap_err();
        assert!(matches!(
            err,
            ConnectorError::Config(ConfigError::ValueNotFound(ref k)) if k == DB_DRIVER_KEY
        ));

        pairs.push((DB_DRIVER_KEY, "ODBC Driver 17 for SQL Server"));
        let creds = Credentials::from_source(&source(&pairs)).unwrap();
        assert_eq!(creds.kind, DatabaseKind::Mssql);
        assert_eq!(creds.driver(), Some("ODBC Driver 17 for SQL Server"));
    }

    #[test]
    fn test_from_source_missing_key() {
        let pairs: Vec<_> = postgres_pairs()
            .into_iter()
            .filter(|(k, _)| *k != DB_PASSWORD_KEY)
            .collect();
        let err = Credentials::from_source(&source(&pairs)).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains(DB_PASSWORD_KEY));
    }

    #[test]
    fn test_blank_driver_is_none() {
        let creds = Credentials::mssql("h", "d", "u", "p", "   ");
        assert_eq!(creds.driver(), None);
    }

    #[test]
    fn test_debug_masks_password() {
        let creds = Credentials::postgres("db1", "sales", "u", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_env_file_source_loads_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "CONNECTOR_DB_TYPE=mssql").unwrap();
        writeln!(file, "CONNECTOR_DB_SERVER=db2").unwrap();
        writeln!(file, "CONNECTOR_DB_DATABASE=hr").unwrap();
        writeln!(file, "CONNECTOR_DB_USERNAME=u").unwrap();
        writeln!(file, "CONNECTOR_DB_PASSWORD=p").unwrap();
        writeln!(file, "CONNECTOR_DB_DRIVER=\"ODBC Driver 17 for SQL Server\"").unwrap();

        let source = EnvFileSource::load(file.path()).unwrap();
        assert_eq!(source.get(DB_SERVER_KEY).as_deref(), Some("db2"));

        let creds = Credentials::from_source(&source).unwrap();
        assert_eq!(
            creds,
            Credentials::mssql("db2", "hr", "u", "p", "ODBC Driver 17 for SQL Server")
        );
        // parsed values stay out of the process environment
        assert!(std::env::var(DB_DRIVER_KEY).is_err());
    }

    #[test]
    fn test_process_env_source_missing_key() {
        let err = ProcessEnvSource
            .require("CONNECTOR_DB_SURELY_NOT_SET")
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::ValueNotFound(ref k) if k == "CONNECTOR_DB_SURELY_NOT_SET")
        );
    }

    #[test]
    fn test_env_file_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.env");
        let err = EnvFileSource::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(ref p) if p == &path));
    }
}
