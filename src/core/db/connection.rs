/// Connection Management Module
///
/// This module owns the live session to the server: connect / reconnect /
/// close, direct query execution, transaction control, escaping and error
/// retrieval. Prepared statements and result cursors are created here.

use crate::config::DatabaseConfig;
use crate::core::db::escape::{self, EscapeLike};
use crate::core::db::result::{CursorKind, ResultCursor};
use crate::core::db::statement::{PrepareOptions, PreparedStatement};
use crate::core::db::transport::{
    ConnectOptions, ConnectRequest, Connector, FetchMode, QueryCanceller, Session, StatementId,
    TransportError, TransportResult,
};
use crate::core::value::Value;
use crate::core::{DbportError, Result};
use crate::events::{EventSink, Events, ExecutionRecord, TracingSink};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Placeholder substituted for credentials in error text
pub const CREDENTIAL_MASK: &str = "****";

/// A bare `DELETE FROM <table>` with nothing after the table name
static BARE_DELETE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*DELETE\s+FROM\s+([^\s;]+)\s*(;?)\s*$").expect("valid delete pattern"));

/// How raw query failures reach the caller. Chosen once per Connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// Failures are returned as `DbportError::Query`
    Raise,
    /// Failures are logged and reported as `Ok(None)`
    Sentinel,
}

/// Last error as exposed to callers. Code 0 means "no error".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub code: i32,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        ErrorInfo {
            code,
            message: message.into(),
        }
    }

    pub fn none() -> Self {
        ErrorInfo::default()
    }

    pub fn is_error(&self) -> bool {
        self.code != 0
    }
}

impl From<&TransportError> for ErrorInfo {
    fn from(e: &TransportError) -> Self {
        ErrorInfo::new(e.code, e.message.clone())
    }
}

/// Resolved addressing for a connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectDescriptor {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub socket: Option<String>,
    pub database: String,
    pub charset: String,
}

impl ConnectDescriptor {
    /// A hostname starting with `/` selects a local socket and clears
    /// host and port; otherwise a persistent connect prefixes `p:` to the host.
    pub fn resolve(config: &DatabaseConfig, persistent: bool) -> Self {
        let (host, port, socket) = if config.hostname.starts_with('/') {
            (None, None, Some(config.hostname.clone()))
        } else {
            let host = if persistent {
                format!("p:{}", config.hostname)
            } else {
                config.hostname.clone()
            };
            (Some(host), config.port, None)
        };
        ConnectDescriptor {
            host,
            port,
            socket,
            database: config.database.clone(),
            charset: config.charset.clone(),
        }
    }

    pub fn to_dsn(&self) -> String {
        let mut parts = Vec::with_capacity(4);
        if let Some(socket) = &self.socket {
            parts.push(format!("unix_socket={}", socket));
        }
        if let Some(host) = &self.host {
            parts.push(format!("host={}", host));
        }
        if let Some(port) = self.port {
            parts.push(format!("port={}", port));
        }
        parts.push(format!("dbname={}", self.database));
        if !self.charset.is_empty() {
            parts.push(format!("charset={}", self.charset));
        }
        format!("mysql:{}", parts.join(";"))
    }
}

/// Replaces every occurrence of the username and password with a mask.
/// The longer secret goes first so one that contains the other is never
/// partly left behind. Secrets the mask itself contains are skipped.
pub fn mask_credentials(message: &str, username: &str, password: &str) -> String {
    let mut secrets = [username, password];
    secrets.sort_by_key(|secret| std::cmp::Reverse(secret.len()));

    let mut masked = message.to_string();
    for secret in secrets {
        if !secret.is_empty() && !CREDENTIAL_MASK.contains(secret) {
            masked = masked.replace(secret, CREDENTIAL_MASK);
        }
    }
    masked
}

/// A single logical connection to the database server.
///
/// Methods take `&self`; session state lives behind `RefCell`/`Cell`, so a
/// Connection is confined to one thread and one in-flight call at a time.
pub struct Connection {
    config: DatabaseConfig,
    connector: Arc<dyn Connector>,
    error_mode: ErrorMode,
    session: RefCell<Option<Box<dyn Session>>>,
    /// Bumped on every successful connect; statements compiled under an
    /// older generation are recompiled before use
    generation: Cell<u64>,
    database: RefCell<String>,
    version: RefCell<Option<String>>,
    last_error: RefCell<Option<ErrorInfo>>,
    affected_rows: Cell<u64>,
    events: RefCell<Events>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("error_mode", &self.error_mode)
            .field("connected", &self.is_connected())
            .field("generation", &self.generation.get())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates an unconnected Connection. The session opens lazily on first
    /// use, or explicitly via [`Connection::connect`].
    pub fn new(config: DatabaseConfig, connector: Arc<dyn Connector>) -> Self {
        let error_mode = if config.debug {
            ErrorMode::Raise
        } else {
            ErrorMode::Sentinel
        };
        let mut events = Events::new();
        events.subscribe(Arc::new(TracingSink));

        Connection {
            database: RefCell::new(config.database.clone()),
            config,
            connector,
            error_mode,
            session: RefCell::new(None),
            generation: Cell::new(0),
            version: RefCell::new(None),
            last_error: RefCell::new(None),
            affected_rows: Cell::new(0),
            events: RefCell::new(events),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn error_mode(&self) -> ErrorMode {
        self.error_mode
    }

    /// Name of the currently selected database.
    pub fn database(&self) -> String {
        self.database.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.get()
    }

    fn connect_request(&self, persistent: bool) -> ConnectRequest {
        let descriptor = ConnectDescriptor {
            database: self.database(),
            ..ConnectDescriptor::resolve(&self.config, persistent)
        };
        let init_command = if self.config.charset.is_empty() {
            None
        } else {
            Some(format!("SET NAMES '{}'", escape::escape_string(&self.config.charset)))
        };

        ConnectRequest {
            dsn: self.config.dsn.clone().unwrap_or_else(|| descriptor.to_dsn()),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            options: ConnectOptions {
                raise_errors: true,
                fetch_mode: FetchMode::Associative,
                connect_timeout: self.config.connect_timeout(),
                statement_timeout: self.config.statement_timeout(),
                init_command,
                persistent,
            },
        }
    }

    /// Opens a session, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns `DbportError::Connection` with username and password masked
    /// out of the message and the client's original error code.
    pub fn connect(&self, persistent: bool) -> Result<()> {
        let request = self.connect_request(persistent);
        match self.connector.connect(&request) {
            Ok(session) => {
                *self.session.borrow_mut() = Some(session);
                self.generation.set(self.generation.get() + 1);
                debug!(
                    "Connected (generation {}) to {}",
                    self.generation.get(),
                    mask_credentials(&request.dsn, &self.config.username, &self.config.password)
                );
                Ok(())
            }
            Err(e) => {
                let message = mask_credentials(&e.message, &self.config.username, &self.config.password);
                *self.last_error.borrow_mut() = Some(ErrorInfo::new(e.code, message.clone()));
                error!("Unable to connect to the database: {}", message);
                Err(DbportError::Connection { message, code: e.code })
            }
        }
    }

    /// Connects using the configured persistence flag unless a session exists.
    pub fn initialize(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.connect(self.config.persistent)
    }

    /// Drops the session and opens a fresh one. The cached server version
    /// is discarded.
    pub fn reconnect(&self) -> Result<()> {
        self.close();
        *self.version.borrow_mut() = None;
        debug!("Reconnecting");
        self.initialize()
    }

    /// Releases the session. Safe to call repeatedly.
    pub fn close(&self) {
        if self.session.borrow_mut().take().is_some() {
            debug!("Closed database session");
        }
    }

    /// Runs `f` against the live session, connecting first if needed.
    pub(crate) fn session_call<T>(
        &self,
        f: impl FnOnce(&mut dyn Session) -> TransportResult<T>,
    ) -> Result<TransportResult<T>> {
        self.initialize()?;
        let mut guard = self.session.borrow_mut();
        let session = guard.as_mut().ok_or_else(|| DbportError::Connection {
            message: "no database session available".to_string(),
            code: 0,
        })?;
        Ok(f(session.as_mut()))
    }

    pub(crate) fn close_statement(&self, id: StatementId, generation: u64) {
        if generation != self.generation.get() {
            return;
        }
        if let Some(session) = self.session.borrow_mut().as_mut() {
            session.close_statement(id);
        }
    }

    pub(crate) fn record_error(&self, info: ErrorInfo) {
        *self.last_error.borrow_mut() = Some(info);
    }

    pub(crate) fn clear_error(&self) {
        *self.last_error.borrow_mut() = None;
    }

    /// Switches the default database with `USE`.
    pub fn set_database(&self, name: &str) -> bool {
        let name = if name.is_empty() {
            self.database()
        } else {
            name.to_string()
        };
        let sql = format!("USE {}", self.escape_identifiers(&name));
        match self.session_call(|s| s.query(&sql)) {
            Ok(Ok(_)) => {
                *self.database.borrow_mut() = name;
                true
            }
            Ok(Err(e)) => {
                self.record_error(ErrorInfo::from(&e));
                error!("Unable to select database {}: {}", name, e.message);
                false
            }
            Err(e) => {
                error!("Unable to select database {}: {}", name, e);
                false
            }
        }
    }

    /// Server version string, fetched once and cached until reconnect.
    pub fn get_version(&self) -> Result<String> {
        let cached = self.version.borrow().clone();
        if let Some(version) = cached {
            return Ok(version);
        }

        let version = self
            .query_one_value("SELECT VERSION()")?
            .and_then(|value| value.as_text())
            .ok_or_else(|| DbportError::Query {
                message: "server did not report a version".to_string(),
                code: 0,
            })?;
        *self.version.borrow_mut() = Some(version.clone());
        Ok(version)
    }

    /// First column of the first row, or `None` for an empty result.
    /// Raises on failure whatever the error mode.
    pub fn query_one_value(&self, sql: &str) -> Result<Option<Value>> {
        let mut cursor = self.query_strict(sql)?;
        Ok(cursor.fetch_assoc().and_then(|row| row.into_values().into_iter().next()))
    }

    /// Rewrites a bare `DELETE FROM <table>` into `... WHERE 1=1` when the
    /// delete hack is enabled, so the client reports the affected row count.
    pub fn prep_query(&self, sql: &str) -> String {
        if !self.config.delete_hack {
            return sql.to_string();
        }
        let trimmed = sql.trim();
        match BARE_DELETE.captures(trimmed) {
            Some(caps) => {
                let body = trimmed.trim_end_matches(';').trim_end();
                format!("{} WHERE 1=1{}", body, &caps[2])
            }
            None => sql.to_string(),
        }
    }

    fn run_query(&self, sql: &str) -> Result<TransportResult<ResultCursor>> {
        let outcome = self.session_call(|s| {
            let handle = s.query(sql)?;
            Ok((handle, s.affected_rows()))
        })?;
        Ok(match outcome {
            Ok((handle, affected)) => {
                self.affected_rows.set(affected);
                self.clear_error();
                Ok(ResultCursor::new(handle))
            }
            Err(e) => {
                self.affected_rows.set(0);
                self.record_error(ErrorInfo::from(&e));
                Err(e)
            }
        })
    }

    /// Runs a statement directly (no separate prepare step).
    ///
    /// # Returns
    ///
    /// `Ok(Some(cursor))` on success. On a server error the result depends
    /// on the [`ErrorMode`]: `Err(DbportError::Query)` in `Raise` mode,
    /// `Ok(None)` in `Sentinel` mode. Both log the failure.
    pub fn execute(&self, sql: &str) -> Result<Option<ResultCursor>> {
        let sql = self.prep_query(sql);
        match self.run_query(&sql)? {
            Ok(cursor) => Ok(Some(cursor)),
            Err(e) => {
                error!("Query failed ({}): {}", e.code, e.message);
                match self.error_mode {
                    ErrorMode::Raise => Err(DbportError::Query {
                        message: e.message,
                        code: e.code,
                    }),
                    ErrorMode::Sentinel => Ok(None),
                }
            }
        }
    }

    /// Like [`Connection::execute`] but always raises, whatever the error mode.
    pub(crate) fn query_strict(&self, sql: &str) -> Result<ResultCursor> {
        let sql = self.prep_query(sql);
        self.run_query(&sql)?.map_err(|e| DbportError::Query {
            message: e.message,
            code: e.code,
        })
    }

    /// Rows affected by the last direct execute; 0 when unknown.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows.get()
    }

    /// Escapes the body of a string literal.
    pub fn escape_string(&self, value: &str) -> String {
        escape::escape_string(value)
    }

    /// Renders a value as a SQL literal.
    pub fn escape(&self, value: &Value) -> String {
        escape::literal(value)
    }

    /// LIKE-safe escaping for contexts that cannot take an `ESCAPE` clause.
    /// Works on strings and (nested) vectors or slices of strings.
    pub fn escape_like_string_direct<T: EscapeLike + ?Sized>(&self, value: &T) -> T::Output {
        value.escape_like(self.config.like_escape_char)
    }

    pub fn escape_identifiers(&self, item: &str) -> String {
        escape::escape_identifiers(item, self.config.escape_char)
    }

    /// Prefixes and quotes a table reference.
    pub fn protect_table(&self, table: &str) -> String {
        escape::protect_table(table, &self.config.prefix, self.config.escape_char)
    }

    /// Last error: the client-level error when it has one, otherwise the
    /// error this Connection captured itself.
    pub fn error(&self) -> ErrorInfo {
        let client = self
            .session
            .borrow()
            .as_ref()
            .and_then(|s| s.error_info())
            .map(|e| ErrorInfo::from(&e))
            .filter(ErrorInfo::is_error);
        client
            .or_else(|| self.last_error.borrow().clone())
            .unwrap_or_else(ErrorInfo::none)
    }

    /// Identifier generated by the most recent insert; 0 without a session.
    pub fn insert_id(&self) -> u64 {
        self.session
            .borrow()
            .as_ref()
            .map(|s| s.last_insert_id())
            .unwrap_or(0)
    }

    /// True when statements commit on their own; true without a session.
    pub fn autocommit(&self) -> bool {
        self.session
            .borrow()
            .as_ref()
            .map(|s| s.is_autocommit())
            .unwrap_or(true)
    }

    /// True between a successful `trans_begin` and a successful commit or
    /// rollback.
    pub fn in_transaction(&self) -> bool {
        !self.autocommit()
    }

    fn settle(&self, action: &str, outcome: Result<TransportResult<()>>) -> bool {
        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("Transaction {} failed ({}): {}", action, e.code, e.message);
                self.record_error(ErrorInfo::from(&e));
                false
            }
            Err(e) => {
                error!("Transaction {} failed: {}", action, e);
                false
            }
        }
    }

    /// Disables autocommit and opens a transaction.
    pub fn trans_begin(&self) -> bool {
        let outcome = self.session_call(|s| {
            s.set_autocommit(false)?;
            s.begin()
        });
        self.settle("begin", outcome)
    }

    /// Commits; autocommit is restored only when the commit succeeds, so a
    /// `false` return leaves the transaction open.
    pub fn trans_commit(&self) -> bool {
        let outcome = self.session_call(|s| {
            s.commit()?;
            s.set_autocommit(true)
        });
        self.settle("commit", outcome)
    }

    /// Rolls back; autocommit is restored only when the rollback succeeds.
    pub fn trans_rollback(&self) -> bool {
        let outcome = self.session_call(|s| {
            s.rollback()?;
            s.set_autocommit(true)
        });
        self.settle("rollback", outcome)
    }

    /// Runs `f` inside a transaction: commit on `Ok`, rollback on `Err`.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        if !self.trans_begin() {
            let info = self.error();
            return Err(DbportError::Query {
                message: format!("could not begin transaction: {}", info.message),
                code: info.code,
            });
        }
        match f(self) {
            Ok(value) => {
                if self.trans_commit() {
                    Ok(value)
                } else {
                    let info = self.error();
                    self.trans_rollback();
                    Err(DbportError::Query {
                        message: format!("could not commit transaction: {}", info.message),
                        code: info.code,
                    })
                }
            }
            Err(e) => {
                self.trans_rollback();
                Err(e)
            }
        }
    }

    /// Compiles `sql` into a statement bound to this Connection.
    pub fn prepare(&self, sql: &str) -> Result<PreparedStatement<'_>> {
        self.prepare_with(sql, PrepareOptions::default())
    }

    pub fn prepare_with(&self, sql: &str, options: PrepareOptions) -> Result<PreparedStatement<'_>> {
        let mut statement = PreparedStatement::new(self, options);
        statement.prepare(sql)?;
        Ok(statement)
    }

    /// Cursor kind used when a statement does not ask for one.
    pub fn default_cursor_kind(&self) -> CursorKind {
        CursorKind::Scrollable
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.events.borrow_mut().subscribe(sink);
    }

    pub(crate) fn publish(&self, record: &ExecutionRecord) {
        let events = self.events.borrow().clone();
        events.trigger(record);
    }

    /// Handle that can abort the session's in-flight call from another thread.
    pub fn canceller(&self) -> Option<QueryCanceller> {
        self.session.borrow().as_ref().and_then(|s| s.canceller())
    }
}
