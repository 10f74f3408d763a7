//! Run one query against the database described by a `.env` file
//!
//! Run with: cargo run --bin sample_query -- [ENV_FILE] [QUERY] [PARAM...]
//!
//! The result is printed as CSV on stdout. Parameters are bound positionally
//! as integers when they parse as one, as strings otherwise.

use anyhow::{Context, Result};
use sql_connector::{logging, Connector, QueryParams, Value};

fn parse_param(raw: String) -> Value {
    raw.parse::<i64>().map(Value::Int).unwrap_or(Value::String(raw))
}

fn main() -> Result<()> {
    logging::init_tracing();

    let mut args = std::env::args().skip(1);
    let env_file = args.next().unwrap_or_else(|| ".env".to_string());
    let query = args.next().unwrap_or_else(|| "SELECT 1".to_string());
    let params: Vec<Value> = args.map(parse_param).collect();

    let params = if params.is_empty() {
        QueryParams::None
    } else {
        QueryParams::Positional(params)
    };

    let conn = Connector::from_env_file(&env_file)
        .with_context(|| format!("Could not connect using {}", env_file))?;

    let result = conn.execute_query(&query, params)?;
    result.write_csv(std::io::stdout().lock())?;
    eprintln!(
        "{} row(s) in {:.1} ms",
        result.row_count,
        result.execution_time.as_secs_f64() * 1000.0
    );

    conn.close();
    Ok(())
}
