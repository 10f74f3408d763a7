//! PostgreSQL driver implementation using SQLx
//!
//! The engine is a lazily connecting `PgPool`; SQLx owns pooling and
//! reconnection from there on.

use crate::db::driver::{DatabaseBackend, DatabaseConnection, DatabaseEngine};
use crate::db::query::{ColumnInfo, QueryParams, QueryResult, Value};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{
    PgArguments, PgColumn, PgConnection, PgPool, PgPoolOptions, PgRow, PgTypeKind, Postgres,
};
use sqlx::query::Query;
use sqlx::types::Uuid;
use sqlx::{Column, Connection, Executor, Row, Statement, TypeInfo};
use std::time::Instant;

/// How `Value::Null` is bound: sqlx sends every parameter with a declared type
type NullParam = Option<String>;

/// PostgreSQL engine backed by a lazy connection pool
pub struct PostgresEngine {
    pool: PgPool,
}

impl PostgresEngine {
    /// Bind the URI to a pool without opening any connection
    pub fn connect_lazy(uri: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .connect_lazy(uri)
            .context("Invalid PostgreSQL connection string")?;
        Ok(Self { pool })
    }

    /// Helper to bind a Value to a Postgres query
    fn bind_param<'q>(
        query: Query<'q, Postgres, PgArguments>,
        value: &'q Value,
    ) -> Query<'q, Postgres, PgArguments> {
        match value {
            // typed as text; other column types need an explicit cast ($1::int)
            Value::Null => query.bind(NullParam::None),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Decimal(d) => query.bind(*d),
            Value::String(s) => query.bind(s.as_str()),
            Value::Date(d) => query.bind(*d),
            Value::Time(t) => query.bind(*t),
            Value::DateTime(dt) => query.bind(*dt),
            Value::DateTimeTz(dt) => query.bind(*dt),
            Value::Binary(b) => query.bind(b.as_slice()),
        }
    }

    fn column_info(columns: &[PgColumn]) -> Vec<ColumnInfo> {
        columns
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                type_name: col.type_info().name().to_string(),
            })
            .collect()
    }

    /// Column metadata for a query that returned no rows
    async fn describe_columns(&self, query: &str) -> Result<Vec<ColumnInfo>> {
        let statement = (&self.pool)
            .prepare(query)
            .await
            .context("Could not describe empty PostgreSQL result")?;
        Ok(Self::column_info(statement.columns()))
    }
}

/// How a column's values are read, by PostgreSQL type name
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CellKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,
    Uuid,
    Json,
    Bytea,
    Text,
    SmallIntArray,
    IntArray,
    BigIntArray,
    TextArray,
    Other,
}

fn cell_kind(type_name: &str) -> CellKind {
    match type_name {
        "BOOL" => CellKind::Bool,
        "INT2" => CellKind::Int2,
        "INT4" => CellKind::Int4,
        "INT8" => CellKind::Int8,
        "FLOAT4" => CellKind::Float4,
        "FLOAT8" => CellKind::Float8,
        "NUMERIC" => CellKind::Numeric,
        "DATE" => CellKind::Date,
        "TIME" => CellKind::Time,
        "TIMESTAMP" => CellKind::Timestamp,
        "TIMESTAMPTZ" => CellKind::TimestampTz,
        "INTERVAL" => CellKind::Interval,
        "UUID" => CellKind::Uuid,
        "JSON" | "JSONB" => CellKind::Json,
        "BYTEA" => CellKind::Bytea,
        "TEXT" | "VARCHAR" | "CHAR" | "NAME" | "CITEXT" | "XML" => CellKind::Text,
        "INT2[]" => CellKind::SmallIntArray,
        "INT4[]" => CellKind::IntArray,
        "INT8[]" => CellKind::BigIntArray,
        "TEXT[]" | "VARCHAR[]" | "CHAR[]" | "NAME[]" => CellKind::TextArray,
        _ => CellKind::Other,
    }
}

/// Render an interval the way `psql` prints it
fn format_interval(interval: &PgInterval) -> String {
    let mut parts = Vec::new();
    let (years, months) = (interval.months / 12, interval.months % 12);
    if years != 0 {
        parts.push(format!("{} year{}", years, if years.abs() == 1 { "" } else { "s" }));
    }
    if months != 0 {
        parts.push(format!("{} mon{}", months, if months.abs() == 1 { "" } else { "s" }));
    }
    if interval.days != 0 {
        let plural = if interval.days.abs() == 1 { "" } else { "s" };
        parts.push(format!("{} day{}", interval.days, plural));
    }

    let micros = interval.microseconds;
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let total = micros.unsigned_abs();
        let secs = total / 1_000_000;
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
        let fraction = total % 1_000_000;
        if fraction != 0 {
            time.push_str(format!(".{:06}", fraction).trim_end_matches('0'));
        }
        parts.push(time);
    }
    parts.join(" ")
}

/// Arrays come back as their JSON text, NULL elements as `null`
fn json_array<T: Into<serde_json::Value>>(items: Vec<Option<T>>) -> Value {
    Value::String(serde_json::Value::from(items).to_string())
}

/// Extracts a value from a PgRow at the given index
///
/// SQL NULL becomes `Value::Null`; a value that cannot be decoded is an error.
fn extract_value(row: &PgRow, idx: usize) -> Result<Value> {
    let column = &row.columns()[idx];
    let type_info = column.type_info();

    let raw = row.try_get_raw(idx)?;
    if sqlx::ValueRef::is_null(&raw) {
        return Ok(Value::Null);
    }

    let decoded = match cell_kind(type_info.name()) {
        CellKind::Bool => row.try_get::<bool, _>(idx).map(Value::Bool),
        CellKind::Int2 => row.try_get::<i16, _>(idx).map(Value::from),
        CellKind::Int4 => row.try_get::<i32, _>(idx).map(Value::from),
        CellKind::Int8 => row.try_get::<i64, _>(idx).map(Value::Int),
        CellKind::Float4 => row.try_get::<f32, _>(idx).map(Value::from),
        CellKind::Float8 => row.try_get::<f64, _>(idx).map(Value::Float),
        CellKind::Numeric => row.try_get::<Decimal, _>(idx).map(Value::Decimal),
        CellKind::Date => row.try_get::<NaiveDate, _>(idx).map(Value::Date),
        CellKind::Time => row.try_get::<NaiveTime, _>(idx).map(Value::Time),
        CellKind::Timestamp => row.try_get::<NaiveDateTime, _>(idx).map(Value::DateTime),
        CellKind::TimestampTz => row
            .try_get::<DateTime<Utc>, _>(idx)
            .map(|v| Value::DateTimeTz(v.fixed_offset())),
        CellKind::Interval => row
            .try_get::<PgInterval, _>(idx)
            .map(|v| Value::String(format_interval(&v))),
        CellKind::Uuid => row
            .try_get::<Uuid, _>(idx)
            .map(|v| Value::String(v.to_string())),
        CellKind::Json => row
            .try_get::<serde_json::Value, _>(idx)
            .map(|v| Value::String(v.to_string())),
        CellKind::Bytea => row.try_get::<Vec<u8>, _>(idx).map(Value::Binary),
        CellKind::Text => row.try_get_unchecked::<String, _>(idx).map(Value::String),
        CellKind::SmallIntArray => row.try_get::<Vec<Option<i16>>, _>(idx).map(json_array),
        CellKind::IntArray => row.try_get::<Vec<Option<i32>>, _>(idx).map(json_array),
        CellKind::BigIntArray => row.try_get::<Vec<Option<i64>>, _>(idx).map(json_array),
        CellKind::TextArray => row
            .try_get_unchecked::<Vec<Option<String>>, _>(idx)
            .map(json_array),
        CellKind::Other if matches!(type_info.kind(), PgTypeKind::Enum(_)) => {
            row.try_get_unchecked::<String, _>(idx).map(Value::String)
        }
        // no textual decoding known: keep the value's wire bytes
        CellKind::Other => row.try_get_unchecked::<Vec<u8>, _>(idx).map(Value::Binary),
    };

    decoded.with_context(|| {
        format!(
            "Failed to decode column '{}' of type {}",
            column.name(),
            type_info.name()
        )
    })
}

#[async_trait]
impl DatabaseEngine for PostgresEngine {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    /// One direct connection attempt, outside the pool's retry loop
    async fn connect(&self) -> Result<Box<dyn DatabaseConnection>> {
        let options = self.pool.connect_options();
        let conn = PgConnection::connect_with(&options)
            .await
            .context("Failed to connect to PostgreSQL")?;
        Ok(Box::new(PostgresConnection(conn)))
    }

    async fn execute_query(&self, query: &str, params: &QueryParams) -> Result<QueryResult> {
        let values: &[Value] = match params {
            QueryParams::None => &[],
            QueryParams::Positional(values) => values,
            QueryParams::Named(_) => {
                bail!("PostgreSQL does not support named parameters; use $1, $2, ... instead")
            }
        };

        let start = Instant::now();
        let mut prepared = sqlx::query(query);
        for value in values {
            prepared = Self::bind_param(prepared, value);
        }

        let pg_rows: Vec<PgRow> = prepared
            .fetch_all(&self.pool)
            .await
            .context("PostgreSQL query failed")?;

        let columns = match pg_rows.first() {
            Some(first) => Self::column_info(first.columns()),
            None => self.describe_columns(query).await?,
        };
        let rows = pg_rows
            .iter()
            .map(|row| (0..row.len()).map(|idx| extract_value(row, idx)).collect())
            .collect::<Result<Vec<Vec<Value>>>>()?;

        Ok(QueryResult::new(columns, rows, start.elapsed()))
    }

    async fn dispose(&self) {
        self.pool.close().await;
    }
}

/// A connection opened outside the pool, closed for real on `close`
struct PostgresConnection(PgConnection);

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn close(self: Box<Self>) -> Result<()> {
        let PostgresConnection(conn) = *self;
        conn.close()
            .await
            .context("Failed to close PostgreSQL connection")
    }
}
