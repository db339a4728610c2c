//! DuckDB backend for [`SalesDb`](crate::SalesDb), for analytical stores
//! built with `CREATE TABLE ... AS SELECT * FROM read_csv_auto(...)`.

use drivewise_core::types::{SqlFailure, SqlRows};
use duckdb::types::Value;
use duckdb::{AccessMode, Config, Connection};
use std::path::Path;

use crate::sales_db::{DIMENSION_SAMPLE, column_entry, lists_values, quote_ident, table_section};

pub(crate) fn open(path: &Path) -> duckdb::Result<Connection> {
    let config = Config::default().access_mode(AccessMode::ReadOnly)?;
    Connection::open_with_flags(path, config)
}

pub(crate) fn list_tables(conn: &Connection) -> duckdb::Result<Vec<String>> {
    let mut stmt = conn.prepare("SHOW TABLES")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut tables = rows.collect::<duckdb::Result<Vec<_>>>()?;
    tables.sort();
    Ok(tables)
}

/// `(column_name, column_type)` pairs from `DESCRIBE`.
fn describe(conn: &Connection, target: &str) -> duckdb::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(&format!("DESCRIBE {target}"))?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    rows.collect()
}

fn distinct_values(conn: &Connection, table: &str, column: &str) -> duckdb::Result<Vec<String>> {
    let sql = format!(
        "SELECT DISTINCT CAST({col} AS VARCHAR) FROM {table} WHERE {col} IS NOT NULL LIMIT {DIMENSION_SAMPLE}",
        col = quote_ident(column),
        table = quote_ident(table),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect()
}

pub(crate) fn describe_schema(conn: &Connection) -> duckdb::Result<String> {
    let tables = list_tables(conn)?;
    let mut sections = Vec::with_capacity(tables.len());
    for table in tables {
        let mut described = Vec::new();
        for (name, ty) in describe(conn, &quote_ident(&table))? {
            let values = if lists_values(&table, &ty) {
                distinct_values(conn, &table, &name)?
            } else {
                Vec::new()
            };
            described.push(column_entry(&name, &ty, &values));
        }
        sections.push(table_section(&table, &described));
    }
    Ok(sections.join("\n\n"))
}

pub(crate) fn query(conn: &Connection, sql: &str, max_rows: usize) -> Result<SqlRows, SqlFailure> {
    // Result column names come from DESCRIBE, which also rejects non-queries
    let columns: Vec<String> = describe(conn, sql)
        .map_err(|e| classify(sql, e))?
        .into_iter()
        .map(|(name, _)| name)
        .collect();

    let mut stmt = conn.prepare(sql).map_err(|e| classify(sql, e))?;
    let mut rows = stmt.query([]).map_err(|e| classify(sql, e))?;
    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next().map_err(|e| classify(sql, e))? {
        if out.len() >= max_rows {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let value: Value = row.get(i).map_err(|e| classify(sql, e))?;
            values.push(to_json(value));
        }
        out.push(values);
    }

    if out.is_empty() {
        return Err(SqlFailure::EmptyResult { query: sql.to_string() });
    }

    Ok(SqlRows {
        query: sql.to_string(),
        columns,
        rows: out,
        truncated,
    })
}

fn to_json(value: Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::from(b),
        Value::TinyInt(i) => Json::from(i),
        Value::SmallInt(i) => Json::from(i),
        Value::Int(i) => Json::from(i),
        Value::BigInt(i) => Json::from(i),
        // SUM over integers is HUGEINT
        Value::HugeInt(i) => i64::try_from(i).map(Json::from).unwrap_or_else(|_| Json::from(i.to_string())),
        Value::UTinyInt(i) => Json::from(i),
        Value::USmallInt(i) => Json::from(i),
        Value::UInt(i) => Json::from(i),
        Value::UBigInt(i) => Json::from(i),
        Value::Float(f) => float(f64::from(f)),
        Value::Double(f) => float(f),
        Value::Decimal(d) => d.to_string().parse::<f64>().map(float).unwrap_or(Json::Null),
        Value::Text(s) => Json::from(s),
        other => Json::from(format!("{other:?}")),
    }
}

fn float(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn classify(sql: &str, err: duckdb::Error) -> SqlFailure {
    let reason = err.to_string();
    let lower = reason.to_lowercase();
    if lower.contains("interrupt") || lower.contains("io error") {
        SqlFailure::Connection { reason }
    } else {
        SqlFailure::InvalidQuery {
            query: sql.to_string(),
            reason,
        }
    }
}
