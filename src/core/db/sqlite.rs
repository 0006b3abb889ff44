/// Embedded SQLite Transport
///
/// A [`Connector`] backed by rusqlite. It accepts `sqlite::memory:` and
/// `sqlite:<path>` DSNs and buffers every result, so cursors built on it
/// are scrollable.

use crate::core::db::transport::{
    BufferedResult, ColumnMeta, ConnectRequest, Connector, QueryCanceller, ResultHandle, Session,
    StatementId, TransportError, TransportResult,
};
use crate::core::value::Value;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::collections::HashMap;
use tracing::debug;

/// MySQL field type codes reported for inferred SQLite columns
const TYPE_DOUBLE: u16 = 5;
const TYPE_NULL: u16 = 6;
const TYPE_LONGLONG: u16 = 8;
const TYPE_BLOB: u16 = 252;
const TYPE_VAR_STRING: u16 = 253;

/// Client error number used when the DSN cannot be served
const CR_UNKNOWN_HOST: i32 = 2005;

/// Connector for the embedded SQLite engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteConnector;

impl Connector for SqliteConnector {
    fn connect(&self, request: &ConnectRequest) -> TransportResult<Box<dyn Session>> {
        let target = request.dsn.strip_prefix("sqlite:").ok_or_else(|| {
            TransportError::new(
                CR_UNKNOWN_HOST,
                format!("SQLite transport cannot open DSN '{}'", request.dsn),
            )
        })?;

        let conn = if target == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(target)
        }
        .map_err(to_transport)?;

        let busy = request
            .options
            .statement_timeout
            .unwrap_or(request.options.connect_timeout);
        conn.busy_timeout(busy).map_err(to_transport)?;
        conn.set_prepared_statement_cache_capacity(64);

        // The adapter reads the server version through a SQL function.
        conn.create_scalar_function(
            "version",
            0,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |_ctx| Ok(rusqlite::version().to_string()),
        )
        .map_err(to_transport)?;

        match &request.options.init_command {
            Some(command) if is_charset_command(command) => {
                debug!("Skipping session charset command: {}", command);
            }
            Some(command) => conn.execute_batch(command).map_err(to_transport)?,
            None => {}
        }

        debug!("Opened SQLite session for {}", target);
        Ok(Box::new(SqliteSession {
            conn,
            statements: HashMap::new(),
            next_id: 1,
            affected_rows: 0,
            autocommit: true,
            last_error: None,
        }))
    }
}

/// Live SQLite session.
pub struct SqliteSession {
    conn: Connection,
    statements: HashMap<StatementId, String>,
    next_id: u64,
    affected_rows: u64,
    autocommit: bool,
    last_error: Option<TransportError>,
}

impl SqliteSession {
    fn run(&mut self, sql: &str, params: &[Value]) -> TransportResult<BufferedResult> {
        match collect(&self.conn, sql, params) {
            Ok(result) => {
                self.last_error = None;
                self.affected_rows = result.row_count();
                Ok(result)
            }
            Err(e) => {
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn batch(&mut self, sql: &str) -> TransportResult<()> {
        let outcome = self.conn.execute_batch(sql).map_err(to_transport);
        self.last_error = outcome.as_ref().err().cloned();
        outcome
    }
}

impl Session for SqliteSession {
    fn query(&mut self, sql: &str) -> TransportResult<Box<dyn ResultHandle>> {
        let result = self.run(sql, &[])?;
        Ok(Box::new(result))
    }

    fn prepare(&mut self, sql: &str) -> TransportResult<StatementId> {
        // Compile now so syntax errors surface at prepare time.
        if let Err(e) = self.conn.prepare_cached(sql).map_err(to_transport) {
            self.last_error = Some(e.clone());
            return Err(e);
        }
        self.last_error = None;
        let id = StatementId(self.next_id);
        self.next_id += 1;
        self.statements.insert(id, sql.to_string());
        Ok(id)
    }

    fn execute(&mut self, id: StatementId, params: &[Value]) -> TransportResult<Box<dyn ResultHandle>> {
        let sql = self
            .statements
            .get(&id)
            .cloned()
            .ok_or_else(|| TransportError::new(2030, format!("Statement {} not prepared", id.0)))?;
        let result = self.run(&sql, params)?;
        Ok(Box::new(result))
    }

    fn close_statement(&mut self, id: StatementId) {
        self.statements.remove(&id);
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn last_insert_id(&self) -> u64 {
        self.conn.last_insert_rowid().max(0) as u64
    }

    fn set_autocommit(&mut self, enabled: bool) -> TransportResult<()> {
        self.autocommit = enabled;
        Ok(())
    }

    fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    fn begin(&mut self) -> TransportResult<()> {
        self.batch("BEGIN")
    }

    fn commit(&mut self) -> TransportResult<()> {
        self.batch("COMMIT")
    }

    fn rollback(&mut self) -> TransportResult<()> {
        self.batch("ROLLBACK")
    }

    fn error_info(&self) -> Option<TransportError> {
        self.last_error.clone()
    }

    fn canceller(&self) -> Option<QueryCanceller> {
        let handle = self.conn.get_interrupt_handle();
        Some(QueryCanceller::new(move || handle.interrupt()))
    }
}

/// `SET NAMES`/`SET CHARACTER SET` pick the client charset on MySQL. SQLite
/// text is always UTF-8, so these have nothing to do.
fn is_charset_command(command: &str) -> bool {
    let upper = command.trim_start().to_ascii_uppercase();
    upper.starts_with("SET NAMES") || upper.starts_with("SET CHARACTER SET")
}

/// Runs one statement and buffers its output.
fn collect(conn: &Connection, sql: &str, params: &[Value]) -> TransportResult<BufferedResult> {
    let mut stmt = conn.prepare_cached(sql).map_err(to_transport)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let column_count = stmt.column_count();
    let bound = params_from_iter(params.iter().map(to_sql_value));

    if column_count == 0 {
        let changed = stmt.execute(bound).map_err(to_transport)?;
        return Ok(BufferedResult::affected(changed as u64));
    }

    let mut rows = stmt.query(bound).map_err(to_transport)?;
    let mut data = Vec::new();
    while let Some(row) = rows.next().map_err(to_transport)? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(from_value_ref(row.get_ref(i).map_err(to_transport)?));
        }
        data.push(values);
    }

    let columns = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| ColumnMeta::named(name, infer_type_code(&data, i)))
        .collect();
    Ok(BufferedResult::new(columns, data))
}

/// SQLite is dynamically typed, so the type code comes from the first
/// non-NULL value in the column.
fn infer_type_code(rows: &[Vec<Value>], index: usize) -> u16 {
    rows.iter()
        .filter_map(|r| r.get(index))
        .find(|v| !v.is_null())
        .map(|v| match v {
            Value::Int(_) | Value::Bool(_) => TYPE_LONGLONG,
            Value::Float(_) => TYPE_DOUBLE,
            Value::Text(_) => TYPE_VAR_STRING,
            Value::Blob(_) => TYPE_BLOB,
            Value::Null => TYPE_NULL,
        })
        .unwrap_or(TYPE_NULL)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

fn to_transport(e: rusqlite::Error) -> TransportError {
    match &e {
        rusqlite::Error::SqliteFailure(inner, _) => TransportError::new(inner.extended_code, e.to_string()),
        _ => TransportError::new(2000, e.to_string()),
    }
}
