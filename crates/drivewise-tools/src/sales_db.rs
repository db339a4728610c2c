//! Read-only access to the tabular sales store.
//!
//! The store is a SQLite file, or a DuckDB file when built with the `duckdb`
//! feature. Every statement runs on a connection of its own, so cancelling
//! one request's query never touches another request's.

use drivewise_core::error::{DriveWiseError, Result};
use drivewise_core::types::{SqlFailure, SqlRows};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Dimension tables get sample values listed in the schema description.
pub(crate) const DIMENSION_PREFIX: &str = "dim_";
/// Distinct values listed per dimension column.
pub(crate) const DIMENSION_SAMPLE: usize = 50;

/// Storage engine of the sales database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Sqlite,
    DuckDb,
}

impl Engine {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "duckdb" => Ok(Self::DuckDb),
            other => Err(DriveWiseError::Config(format!(
                "unknown sql.engine '{other}' (expected 'sqlite' or 'duckdb')"
            ))),
        }
    }

    /// SQL dialect name used in the query-generation prompt.
    pub fn dialect(&self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::DuckDb => "DuckDB",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dialect())
    }
}

/// Handle to the sales database. Cheap to clone; holds no open connection.
#[derive(Debug, Clone)]
pub struct SalesDb {
    path: Arc<PathBuf>,
    engine: Engine,
}

impl SalesDb {
    /// Check that the database file exists and opens read-only.
    pub fn open(path: &Path, engine: Engine) -> Result<Self> {
        if !path.exists() {
            return Err(DriveWiseError::Database(format!(
                "sales database not found at {}",
                path.display()
            )));
        }
        let db = Self {
            path: Arc::new(path.to_path_buf()),
            engine,
        };
        db.connect().map_err(|e| DriveWiseError::Database(e.to_string()))?;
        tracing::info!("🗄️ Sales database opened ({}): {}", engine, path.display());
        Ok(db)
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh read-only connection.
    pub fn connect(&self) -> std::result::Result<SalesConnection, SqlFailure> {
        let inner = match self.engine {
            Engine::Sqlite => Connection::open_with_flags(
                self.path.as_path(),
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map(Inner::Sqlite)
            .map_err(|e| SqlFailure::Connection { reason: e.to_string() })?,
            #[cfg(feature = "duckdb")]
            Engine::DuckDb => crate::duckdb_store::open(&self.path)
                .map(Inner::DuckDb)
                .map_err(|e| SqlFailure::Connection { reason: e.to_string() })?,
            #[cfg(not(feature = "duckdb"))]
            Engine::DuckDb => {
                return Err(SqlFailure::Connection {
                    reason: "built without DuckDB support (enable the `duckdb` feature)".into(),
                });
            }
        };
        Ok(SalesConnection { inner })
    }

    /// Table names in the database, sorted.
    pub fn tables(&self) -> Result<Vec<String>> {
        self.connect()
            .map_err(|e| DriveWiseError::Database(e.to_string()))?
            .tables()
    }

    pub fn describe_schema(&self) -> Result<String> {
        self.connect()
            .map_err(|e| DriveWiseError::Database(e.to_string()))?
            .describe_schema()
    }

    pub fn query(&self, sql: &str, max_rows: usize) -> std::result::Result<SqlRows, SqlFailure> {
        self.connect()?.query(sql, max_rows)
    }
}

enum Inner {
    Sqlite(Connection),
    #[cfg(feature = "duckdb")]
    DuckDb(duckdb::Connection),
}

/// One read-only connection to the sales database.
pub struct SalesConnection {
    inner: Inner,
}

impl SalesConnection {
    /// Handle that aborts the statement running on this connection only.
    pub fn canceller(&self) -> QueryCancel {
        match &self.inner {
            Inner::Sqlite(conn) => QueryCancel::Sqlite(conn.get_interrupt_handle()),
            #[cfg(feature = "duckdb")]
            Inner::DuckDb(conn) => QueryCancel::DuckDb(conn.interrupt_handle()),
        }
    }

    pub fn tables(&self) -> Result<Vec<String>> {
        match &self.inner {
            Inner::Sqlite(conn) => list_tables(conn).map_err(|e| DriveWiseError::Database(e.to_string())),
            #[cfg(feature = "duckdb")]
            Inner::DuckDb(conn) => {
                crate::duckdb_store::list_tables(conn).map_err(|e| DriveWiseError::Database(e.to_string()))
            }
        }
    }

    /// Describe every table as `Table: name` + `Columns: col (TYPE), ...`.
    ///
    /// Text columns of dimension tables (`DIM_` prefix) also list up to 50
    /// distinct values so the model can match filter literals exactly.
    pub fn describe_schema(&self) -> Result<String> {
        match &self.inner {
            Inner::Sqlite(conn) => describe_sqlite(conn).map_err(|e| DriveWiseError::Database(e.to_string())),
            #[cfg(feature = "duckdb")]
            Inner::DuckDb(conn) => {
                crate::duckdb_store::describe_schema(conn).map_err(|e| DriveWiseError::Database(e.to_string()))
            }
        }
    }

    /// Execute a single read-only statement, keeping at most `max_rows` rows.
    pub fn query(&self, sql: &str, max_rows: usize) -> std::result::Result<SqlRows, SqlFailure> {
        match &self.inner {
            Inner::Sqlite(conn) => query_sqlite(conn, sql, max_rows),
            #[cfg(feature = "duckdb")]
            Inner::DuckDb(conn) => crate::duckdb_store::query(conn, sql, max_rows),
        }
    }
}

/// Cancels the statement running on one [`SalesConnection`].
pub enum QueryCancel {
    Sqlite(InterruptHandle),
    #[cfg(feature = "duckdb")]
    DuckDb(Arc<duckdb::InterruptHandle>),
}

impl QueryCancel {
    pub fn cancel(&self) {
        match self {
            Self::Sqlite(handle) => handle.interrupt(),
            #[cfg(feature = "duckdb")]
            Self::DuckDb(handle) => handle.interrupt(),
        }
    }
}

/// `Table: name\nColumns: ...` block for one table.
pub(crate) fn table_section(table: &str, columns: &[String]) -> String {
    format!("Table: {table}\nColumns: {}", columns.join(", "))
}

/// `name (TYPE)`, plus sampled values for text columns of dimension tables.
pub(crate) fn column_entry(name: &str, ty: &str, values: &[String]) -> String {
    let mut entry = format!("{name} ({ty})");
    if !values.is_empty() {
        entry.push_str(&format!(" (Values: {})", values.join(", ")));
    }
    entry
}

pub(crate) fn lists_values(table: &str, ty: &str) -> bool {
    table.to_lowercase().starts_with(DIMENSION_PREFIX) && is_text_type(ty)
}

fn describe_sqlite(conn: &Connection) -> rusqlite::Result<String> {
    let tables = list_tables(conn)?;
    let mut sections = Vec::with_capacity(tables.len());
    for table in tables {
        let mut described = Vec::new();
        for (name, ty) in table_columns(conn, &table)? {
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

fn query_sqlite(conn: &Connection, sql: &str, max_rows: usize) -> std::result::Result<SqlRows, SqlFailure> {
    let mut stmt = conn.prepare(sql).map_err(|e| classify(sql, e))?;
    if !stmt.readonly() {
        return Err(SqlFailure::InvalidQuery {
            query: sql.to_string(),
            reason: "statement would modify the database".into(),
        });
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let column_count = columns.len();

    let mut rows = stmt.query([]).map_err(|e| classify(sql, e))?;
    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next().map_err(|e| classify(sql, e))? {
        if out.len() >= max_rows {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let value = row.get_ref(i).map_err(|e| classify(sql, e))?;
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

fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect()
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| {
        let name: String = row.get(1)?;
        let ty: String = row.get(2)?;
        Ok((name, if ty.is_empty() { "ANY".to_string() } else { ty.to_uppercase() }))
    })?;
    rows.collect()
}

fn distinct_values(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<Vec<String>> {
    let sql = format!(
        "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL LIMIT {DIMENSION_SAMPLE}",
        col = quote_ident(column),
        table = quote_ident(table),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| Ok(render_value(row.get_ref(0)?)))?;
    rows.collect()
}

fn is_text_type(ty: &str) -> bool {
    ["CHAR", "TEXT", "CLOB", "STRING"].iter().any(|t| ty.contains(t))
}

/// Quote an identifier (same rules for SQLite and DuckDB).
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".into(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(format!("<blob {} bytes>", b.len())),
    }
}

/// Interrupted or I/O-level errors are connection failures; everything else
/// the engine rejects is the query's fault.
fn classify(sql: &str, err: rusqlite::Error) -> SqlFailure {
    use rusqlite::ErrorCode;
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                ErrorCode::OperationInterrupted
                    | ErrorCode::CannotOpen
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::NotADatabase
            ) =>
        {
            SqlFailure::Connection { reason: err.to_string() }
        }
        _ => SqlFailure::InvalidQuery {
            query: sql.to_string(),
            reason: err.to_string(),
        },
    }
}
