//! Connection URI construction
//!
//! Values are substituted literally; nothing is escaped. The only rewrite is
//! the MSSQL driver name, whose spaces become `+`.

use crate::config::{Credentials, DatabaseKind};
use crate::error::{ConnectorError, Result};
use std::fmt;

/// A connection string in the form the underlying clients understand
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionUri(String);

impl ConnectionUri {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The URI with the password segment replaced, for logs and errors
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

impl fmt::Display for ConnectionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for ConnectionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionUri").field(&self.redacted()).finish()
    }
}

impl AsRef<str> for ConnectionUri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Build the connection URI for a set of credentials
pub fn build_connection_uri(credentials: &Credentials) -> Result<ConnectionUri> {
    let Credentials {
        kind,
        host,
        database,
        username,
        password,
        ..
    } = credentials;

    let uri = match kind {
        DatabaseKind::Postgres => {
            format!("postgresql://{username}:{password}@{host}/{database}")
        }
        DatabaseKind::Mssql => {
            let driver = credentials.driver().ok_or(ConnectorError::MissingDriver)?;
            let driver = driver.replace(' ', "+");
            format!("mssql+pyodbc://{username}:{password}@{host}/{database}?driver={driver}")
        }
    };

    Ok(ConnectionUri(uri))
}

/// Hide whatever sits between `user:` and the last `@` of the authority
pub(crate) fn redact(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let rest_start = scheme_end + 3;
    let authority_end = uri[rest_start..]
        .find(['/', '?'])
        .map(|i| rest_start + i)
        .unwrap_or(uri.len());
    let authority = &uri[rest_start..authority_end];

    match (authority.rfind('@'), authority.find(':')) {
        (Some(at), Some(colon)) if colon < at => format!(
            "{}{}:****{}",
            &uri[..rest_start],
            &authority[..colon],
            &uri[rest_start + at..]
        ),
        _ => uri.to_string(),
    }
}
