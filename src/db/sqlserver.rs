//! SQL Server driver implementation using tiberius
//!
//! tiberius speaks TDS directly, so the ODBC `driver` named in the URI is
//! only recorded. Every connect is a fresh TCP + TDS login.

use crate::db::driver::{DatabaseBackend, DatabaseConnection, DatabaseEngine};
use crate::db::query::{ColumnInfo, QueryParams, QueryResult, Value};
use anyhow::{bail, ensure, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use percent_encoding::percent_decode_str;
use rust_decimal::Decimal;
use std::time::Instant;
use tiberius::numeric::Numeric;
use tiberius::{
    AuthMethod, Client, Column, ColumnData, ColumnType, Config, EncryptionLevel, FromSql, Query,
    QueryStream, Row,
};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};
use url::Url;

type TdsClient = Client<Compat<TcpStream>>;

/// Configuration specific to SQL Server connections
#[derive(Clone, PartialEq, Eq)]
pub struct SqlServerConfig {
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
    pub database: String,
    pub driver: Option<String>,
    pub encrypt: bool,
    pub trust_cert: bool,
}

impl SqlServerConfig {
    /// Parse a `mssql://` or `mssql+<dialect>://` URI
    pub fn from_uri(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).context("Invalid SQL Server connection string")?;
        let scheme = url.scheme();
        ensure!(
            scheme == "mssql" || scheme.starts_with("mssql+"),
            "Not a SQL Server connection string: scheme '{}'",
            scheme
        );

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .context("SQL Server connection string has no host")?
            .to_string();

        let mut config = Self {
            host,
            port: url.port(),
            user: decode(url.username())?,
            password: url.password().map(decode).transpose()?.unwrap_or_default(),
            database: decode(url.path().trim_start_matches('/'))?,
            driver: None,
            encrypt: false,
            trust_cert: true,
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "driver" => config.driver = Some(value.into_owned()),
                "encrypt" => config.encrypt = parse_flag(&key, &value)?,
                "trust_server_certificate" | "TrustServerCertificate" => {
                    config.trust_cert = parse_flag(&key, &value)?
                }
                other => debug!(option = other, "Ignoring SQL Server connection option"),
            }
        }

        Ok(config)
    }

    fn to_tiberius(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.host);
        if let Some(port) = self.port {
            config.port(port);
        }
        if !self.database.is_empty() {
            config.database(&self.database);
        }
        config.authentication(AuthMethod::sql_server(&self.user, &self.password));

        if self.trust_cert {
            config.trust_cert();
        }
        if !self.encrypt {
            config.encryption(EncryptionLevel::NotSupported);
        }
        config
    }
}

impl std::fmt::Debug for SqlServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("driver", &self.driver)
            .field("encrypt", &self.encrypt)
            .field("trust_cert", &self.trust_cert)
            .finish_non_exhaustive()
    }
}

fn decode(raw: &str) -> Result<String> {
    Ok(percent_decode_str(raw)
        .decode_utf8()
        .context("Connection string is not valid UTF-8")?
        .into_owned())
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        _ => bail!("Invalid value '{}' for connection option '{}'", value, key),
    }
}

/// SQL Server engine
pub struct SqlServerEngine {
    pub config: SqlServerConfig,
}

impl SqlServerEngine {
    pub fn from_uri(uri: &str) -> Result<Self> {
        let config = SqlServerConfig::from_uri(uri)?;
        if let Some(driver) = &config.driver {
            info!(driver = %driver, "ODBC driver requested; using native TDS client");
        }
        Ok(Self { config })
    }

    /// Internal TCP + TDS connection
    async fn connect_internal(cfg: &SqlServerConfig) -> Result<TdsClient> {
        let config = cfg.to_tiberius();

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .context("Failed to connect to SQL Server")?;
        tcp.set_nodelay(true)?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .context("Failed to authenticate with SQL Server")?;

        Ok(client)
    }

    async fn run_query(
        client: &mut TdsClient,
        sql: &str,
        values: &[Value],
        start: Instant,
    ) -> Result<QueryResult> {
        let mut query = Query::new(sql.to_string());
        for value in values {
            bind_param(&mut query, value);
        }
        let stream = query.query(client).await.context("SQL Server query failed")?;
        Self::process_results(stream, start).await
    }

    // ---- helpers for query result processing ----

    async fn process_results(mut stream: QueryStream<'_>, start: Instant) -> Result<QueryResult> {
        let columns: Vec<ColumnInfo> = match stream.columns().await? {
            Some(cols) => cols
                .iter()
                .map(|c| ColumnInfo {
                    name: c.name().to_string(),
                    type_name: format_column_type(c),
                })
                .collect(),
            None => Vec::new(),
        };

        let rows = stream
            .into_first_result()
            .await?
            .iter()
            .map(row_values)
            .collect::<Result<Vec<_>>>()?;

        Ok(QueryResult::new(columns, rows, start.elapsed()))
    }
}

#[async_trait]
impl DatabaseEngine for SqlServerEngine {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::SqlServer
    }

    async fn connect(&self) -> Result<Box<dyn DatabaseConnection>> {
        let client = Self::connect_internal(&self.config).await?;
        Ok(Box::new(SqlServerConnection(client)))
    }

    async fn execute_query(&self, query: &str, params: &QueryParams) -> Result<QueryResult> {
        let values: &[Value] = match params {
            QueryParams::None => &[],
            QueryParams::Positional(values) => values,
            QueryParams::Named(_) => {
                bail!("SQL Server does not support named parameters; use @P1, @P2, ... instead")
            }
        };

        let start = Instant::now();
        let mut client = Self::connect_internal(&self.config).await?;
        let outcome = Self::run_query(&mut client, query, values, start).await;

        if let Err(e) = client.close().await {
            debug!(error = %e, "Failed to close SQL Server connection after query");
        }
        outcome
    }
}

struct SqlServerConnection(TdsClient);

#[async_trait]
impl DatabaseConnection for SqlServerConnection {
    async fn close(self: Box<Self>) -> Result<()> {
        let SqlServerConnection(client) = *self;
        client
            .close()
            .await
            .context("Failed to close SQL Server connection")
    }
}

fn bind_param<'a>(query: &mut Query<'a>, value: &Value) {
    match value {
        // NVARCHAR NULL; the server converts it implicitly for other column types
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Decimal(v) => {
            query.bind(Numeric::new_with_scale(v.mantissa(), v.scale() as u8))
        }
        Value::String(v) => query.bind(v.clone()),
        Value::Date(v) => query.bind(*v),
        Value::Time(v) => query.bind(*v),
        Value::DateTime(v) => query.bind(*v),
        Value::DateTimeTz(v) => query.bind(*v),
        Value::Binary(v) => query.bind(v.clone()),
    }
}

// ---- Type conversion helpers ----

fn format_column_type(col: &Column) -> String {
    match col.column_type() {
        ColumnType::Null => "NULL".to_string(),
        ColumnType::Bit | ColumnType::Bitn => "BIT".to_string(),
        ColumnType::Int1 => "TINYINT".to_string(),
        ColumnType::Int2 => "SMALLINT".to_string(),
        ColumnType::Int4 => "INT".to_string(),
        ColumnType::Int8 => "BIGINT".to_string(),
        ColumnType::Intn => "INT".to_string(),
        ColumnType::Float4 => "REAL".to_string(),
        ColumnType::Float8 | ColumnType::Floatn => "FLOAT".to_string(),
        ColumnType::Datetime | ColumnType::Datetimen => "DATETIME".to_string(),
        ColumnType::Datetime4 => "SMALLDATETIME".to_string(),
        ColumnType::Datetime2 => "DATETIME2".to_string(),
        ColumnType::DatetimeOffsetn => "DATETIMEOFFSET".to_string(),
        ColumnType::Daten => "DATE".to_string(),
        ColumnType::Timen => "TIME".to_string(),
        ColumnType::Decimaln => "DECIMAL".to_string(),
        ColumnType::Numericn => "NUMERIC".to_string(),
        ColumnType::Money => "MONEY".to_string(),
        ColumnType::Money4 => "SMALLMONEY".to_string(),
        ColumnType::Guid => "UNIQUEIDENTIFIER".to_string(),
        ColumnType::BigVarChar => "VARCHAR".to_string(),
        ColumnType::BigChar => "CHAR".to_string(),
        ColumnType::NVarchar => "NVARCHAR".to_string(),
        ColumnType::NChar => "NCHAR".to_string(),
        ColumnType::Text => "TEXT".to_string(),
        ColumnType::NText => "NTEXT".to_string(),
        ColumnType::BigVarBin => "VARBINARY".to_string(),
        ColumnType::BigBinary => "BINARY".to_string(),
        ColumnType::Image => "IMAGE".to_string(),
        ColumnType::Xml => "XML".to_string(),
        other => format!("{:?}", other).to_uppercase(),
    }
}

fn numeric_to_decimal(v: &Numeric) -> Value {
    Decimal::try_from_i128_with_scale(v.value(), v.scale() as u32)
        .map(Value::Decimal)
        .unwrap_or_else(|_| Value::String(v.to_string()))
}

/// Convert one TDS cell; SQL NULL arrives as `None` in every variant
fn cell_value(data: &ColumnData<'static>) -> Result<Value> {
    let value = match data {
        ColumnData::U8(v) => v.map(Value::from),
        ColumnData::I16(v) => v.map(Value::from),
        ColumnData::I32(v) => v.map(Value::from),
        ColumnData::I64(v) => v.map(Value::Int),
        ColumnData::F32(v) => v.map(Value::from),
        ColumnData::F64(v) => v.map(Value::Float),
        ColumnData::Bit(v) => v.map(Value::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| Value::String(s.to_string())),
        ColumnData::Guid(v) => v.as_ref().map(|g| Value::String(g.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| Value::Binary(b.to_vec())),
        ColumnData::Numeric(v) => v.as_ref().map(numeric_to_decimal),
        ColumnData::Xml(v) => v.as_ref().map(|x| Value::String((**x).to_string())),
        ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_) => NaiveDateTime::from_sql(data)?.map(Value::DateTime),
        ColumnData::Date(_) => NaiveDate::from_sql(data)?.map(Value::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(data)?.map(Value::Time),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(data)?.map(Value::DateTimeTz)
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

fn row_values(row: &Row) -> Result<Vec<Value>> {
    row.cells()
        .map(|(col, data)| {
            cell_value(data).with_context(|| {
                format!(
                    "Failed to decode column '{}' of type {}",
                    col.name(),
                    format_column_type(col)
                )
            })
        })
        .collect()
}
