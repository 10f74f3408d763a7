//! Shared query types used by all database drivers

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;

/// A cell value in a result set, or a bound query parameter
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeTz(DateTime<FixedOffset>),
    Binary(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", if *v { "true" } else { "false" }),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::Time(v) => write!(f, "{}", v.format("%H:%M:%S")),
            Value::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
            Value::DateTimeTz(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S %:z")),
            Value::Binary(v) => write!(f, "0x{}", hex::encode(v)),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    Decimal => Decimal,
    String => String,
    &str => String,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<FixedOffset> => DateTimeTz,
    Vec<u8> => Binary,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Parameters bound to a query.
///
/// They are handed to the driver as given; the placeholder syntax
/// (`$1` for PostgreSQL, `@P1` for SQL Server) belongs to the driver.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum QueryParams {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl QueryParams {
    pub fn is_empty(&self) -> bool {
        match self {
            QueryParams::None => true,
            QueryParams::Positional(v) => v.is_empty(),
            QueryParams::Named(v) => v.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QueryParams::None => 0,
            QueryParams::Positional(v) => v.len(),
            QueryParams::Named(v) => v.len(),
        }
    }
}

impl From<()> for QueryParams {
    fn from(_: ()) -> Self {
        QueryParams::None
    }
}

impl From<Vec<Value>> for QueryParams {
    fn from(values: Vec<Value>) -> Self {
        QueryParams::Positional(values)
    }
}

impl<const N: usize> From<[Value; N]> for QueryParams {
    fn from(values: [Value; N]) -> Self {
        QueryParams::Positional(values.into())
    }
}

impl From<Vec<(String, Value)>> for QueryParams {
    fn from(pairs: Vec<(String, Value)>) -> Self {
        QueryParams::Named(pairs)
    }
}

impl<const N: usize> From<[(&str, Value); N]> for QueryParams {
    fn from(pairs: [(&str, Value); N]) -> Self {
        QueryParams::Named(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

/// Column metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
}

/// A fully materialized query result
#[derive(Clone, Debug, Serialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    #[serde(skip)]
    pub execution_time: Duration,
}

impl QueryResult {
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Vec<Value>>, execution_time: Duration) -> Self {
        Self {
            row_count: rows.len(),
            columns,
            rows,
            execution_time,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Position of the first column with the given name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Cell at `row` in the named column
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// All values of the named column, top to bottom
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().filter_map(move |row| row.get(idx)))
    }

    /// Write the result as CSV, header first
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> anyhow::Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.columns.iter().map(|c| c.name.as_str()))?;
        for row in &self.rows {
            let record: Vec<String> = row
                .iter()
                .map(|c| if c.is_null() { String::new() } else { c.to_string() })
                .collect();
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// One JSON object per row, keyed by column name
    pub fn to_json_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(col, cell)| {
                        let value = serde_json::to_value(cell).unwrap_or(serde_json::Value::Null);
                        (col.name.clone(), value)
                    })
                    .collect()
            })
            .collect()
    }
}

// Helper for hex encoding binary data
mod hex {
    pub fn encode(data: &[u8]) -> String {
        data.iter().map(|b| format!("{:02X}", b)).collect()
    }
}
