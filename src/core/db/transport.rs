/// Transport Contract Module
///
/// The adapter never speaks wire bytes itself. It drives a lower-level
/// client through the traits in this module: a [`Connector`] opens a
/// [`Session`], a session compiles and runs statements, and every run
/// yields a [`ResultHandle`] the cursor layer reads from.

use crate::core::value::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the lower-level client.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct TransportError {
    /// Native server error number; 0 means "no error"
    pub code: i32,
    /// SQLSTATE when the client reports one
    pub sql_state: Option<String>,
    pub message: String,
}

impl TransportError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        TransportError {
            code,
            sql_state: None,
            message: message.into(),
        }
    }

    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Opaque handle to a statement compiled by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub u64);

/// Default row shape requested from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Associative,
    Numeric,
}

/// Session attributes applied at connect time.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    /// Client failures surface as errors rather than silent status codes
    pub raise_errors: bool,
    pub fetch_mode: FetchMode,
    pub connect_timeout: Duration,
    /// Upper bound for a single query / prepare / execute call, if any
    pub statement_timeout: Option<Duration>,
    /// Command run once right after the session opens
    pub init_command: Option<String>,
    pub persistent: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            raise_errors: true,
            fetch_mode: FetchMode::Associative,
            connect_timeout: Duration::from_secs(10),
            statement_timeout: None,
            init_command: None,
            persistent: false,
        }
    }
}

/// Everything a connector needs to open a session.
#[derive(Clone)]
pub struct ConnectRequest {
    pub dsn: String,
    pub username: String,
    pub password: String,
    pub options: ConnectOptions,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("dsn", &self.dsn)
            .field("username", &"****")
            .field("password", &"****")
            .field("options", &self.options)
            .finish()
    }
}

/// Raw column metadata as reported by the client.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnMeta {
    pub name: String,
    /// Server type code (MySQL field type numbering)
    pub type_code: u16,
    /// Longest value length seen in this result
    pub max_length: u64,
    /// Declared display length
    pub length: u64,
    /// Column flag bits; bit 2 marks a primary key
    pub flags: u32,
    pub default: Option<String>,
}

impl ColumnMeta {
    pub fn named(name: impl Into<String>, type_code: u16) -> Self {
        ColumnMeta {
            name: name.into(),
            type_code,
            ..ColumnMeta::default()
        }
    }
}

/// Server-side (or client-buffered) result set.
pub trait ResultHandle {
    fn columns(&self) -> &[ColumnMeta];

    /// Next row in result order, `None` once drained or closed.
    fn fetch(&mut self) -> Option<Vec<Value>>;

    /// Repositions the read pointer. Returns false when the handle cannot
    /// seek or `n` is out of range.
    fn seek(&mut self, n: usize) -> bool;

    fn is_scrollable(&self) -> bool;

    /// Rows in the result set, or rows affected for statements without one.
    fn row_count(&self) -> u64;

    fn close(&mut self);
}

/// Fully materialized, scrollable result.
#[derive(Debug, Clone, Default)]
pub struct BufferedResult {
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<Value>>,
    position: usize,
    affected_rows: u64,
    closed: bool,
}

impl BufferedResult {
    /// Builds a result set, filling each column's `max_length` from the data.
    pub fn new(mut columns: Vec<ColumnMeta>, rows: Vec<Vec<Value>>) -> Self {
        for (i, column) in columns.iter_mut().enumerate() {
            let longest = rows
                .iter()
                .filter_map(|r| r.get(i))
                .filter_map(Value::as_text)
                .map(|t| t.len() as u64)
                .max()
                .unwrap_or(0);
            column.max_length = column.max_length.max(longest);
        }
        BufferedResult {
            columns,
            rows,
            position: 0,
            affected_rows: 0,
            closed: false,
        }
    }

    /// Result of a statement that returned no rows.
    pub fn affected(affected_rows: u64) -> Self {
        BufferedResult {
            affected_rows,
            ..BufferedResult::default()
        }
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }
}

impl ResultHandle for BufferedResult {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn fetch(&mut self) -> Option<Vec<Value>> {
        if self.closed {
            return None;
        }
        let row = self.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        row
    }

    fn seek(&mut self, n: usize) -> bool {
        if self.closed || n > self.rows.len() {
            return false;
        }
        self.position = n;
        true
    }

    fn is_scrollable(&self) -> bool {
        true
    }

    fn row_count(&self) -> u64 {
        if self.columns.is_empty() {
            self.affected_rows
        } else {
            self.rows.len() as u64
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.rows.clear();
    }
}

/// Handle that aborts the call currently running on a session.
#[derive(Clone)]
pub struct QueryCanceller {
    cancel: Arc<dyn Fn() + Send + Sync>,
}

impl QueryCanceller {
    pub fn new(cancel: impl Fn() + Send + Sync + 'static) -> Self {
        QueryCanceller {
            cancel: Arc::new(cancel),
        }
    }

    /// Triggers cancellation of the running query
    pub fn cancel(&self) {
        (self.cancel)();
    }
}

impl fmt::Debug for QueryCanceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueryCanceller")
    }
}

/// A live session with the server.
pub trait Session {
    /// Runs a statement directly, without a separate compile step.
    fn query(&mut self, sql: &str) -> TransportResult<Box<dyn ResultHandle>>;

    fn prepare(&mut self, sql: &str) -> TransportResult<StatementId>;

    fn execute(&mut self, id: StatementId, params: &[Value]) -> TransportResult<Box<dyn ResultHandle>>;

    fn close_statement(&mut self, id: StatementId);

    /// Rows affected by the last direct query.
    fn affected_rows(&self) -> u64;

    fn last_insert_id(&self) -> u64;

    fn set_autocommit(&mut self, enabled: bool) -> TransportResult<()>;

    fn is_autocommit(&self) -> bool;

    fn begin(&mut self) -> TransportResult<()>;

    fn commit(&mut self) -> TransportResult<()>;

    fn rollback(&mut self) -> TransportResult<()>;

    /// Client-level error from the most recent call, if any.
    fn error_info(&self) -> Option<TransportError>;

    fn canceller(&self) -> Option<QueryCanceller> {
        None
    }
}

/// Factory for sessions; one per backend.
pub trait Connector: Send + Sync {
    fn connect(&self, request: &ConnectRequest) -> TransportResult<Box<dyn Session>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn two_rows() -> BufferedResult {
        BufferedResult::new(
            vec![ColumnMeta::named("id", 8), ColumnMeta::named("name", 253)],
            vec![
                vec![Value::Int(1), Value::from("ann")],
                vec![Value::Int(22), Value::from("bartholomew")],
            ],
        )
    }

    #[test]
    fn test_buffered_fetch_and_seek() {
        let mut result = two_rows();
        assert_eq!(result.fetch().unwrap()[0], Value::Int(1));
        assert_eq!(result.fetch().unwrap()[0], Value::Int(22));
        assert!(result.fetch().is_none());

        assert!(result.seek(1));
        assert_eq!(result.fetch().unwrap()[1], Value::from("bartholomew"));
        assert!(!result.seek(3));
    }

    #[test]
    fn test_buffered_max_length() {
        let result = two_rows();
        assert_eq!(result.columns()[0].max_length, 2);
        assert_eq!(result.columns()[1].max_length, 11);
    }

    #[test]
    fn test_closed_result_is_empty() {
        let mut result = two_rows();
        result.close();
        assert!(result.fetch().is_none());
        assert!(!result.seek(0));
    }

    #[test]
    fn test_affected_row_count() {
        let result = BufferedResult::affected(5);
        assert!(result.columns().is_empty());
        assert_eq!(result.row_count(), 5);
    }

    #[test]
    fn test_connect_request_debug_masks_credentials() {
        let request = ConnectRequest {
            dsn: "mysql:host=db;dbname=app".to_string(),
            username: "root".to_string(),
            password: "hunter2".to_string(),
            options: ConnectOptions::default(),
        };
        let rendered = format!("{:?}", request);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("root"));
    }

    #[test]
    fn test_canceller_invokes_callback() {
        let flag = Arc::new(AtomicBool::new(false));
        let seen = flag.clone();
        let canceller = QueryCanceller::new(move || seen.store(true, Ordering::SeqCst));
        canceller.cancel();
        assert!(flag.load(Ordering::SeqCst));
    }
}
