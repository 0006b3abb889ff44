/// Prepared Statement Module
///
/// A statement is compiled once and executed any number of times with
/// positional binds. Every execution, successful or not, publishes an
/// [`ExecutionRecord`] through the owning Connection.

use crate::core::db::connection::{Connection, ErrorInfo};
use crate::core::db::result::{CursorFactory, CursorKind, ResultCursor};
use crate::core::db::transport::StatementId;
use crate::core::value::Value;
use crate::core::{DbportError, Result};
use crate::events::ExecutionRecord;
use chrono::Utc;
use regex::{Captures, Regex};
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, warn};

/// SQL text of a statement: the original as written, and the normalized
/// form that is actually compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    original: String,
    normalized: String,
}

impl QueryTemplate {
    /// Swaps the `swap_pre` table prefix placeholder for `prefix` (only when
    /// both are non-empty) and drops trailing statement terminators.
    pub fn new(sql: &str, prefix: &str, swap_pre: &str) -> Self {
        let swapped = if !prefix.is_empty() && !swap_pre.is_empty() && prefix != swap_pre {
            swap_prefix(sql, prefix, swap_pre)
        } else {
            sql.to_string()
        };
        let normalized = swapped
            .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
            .to_string();

        QueryTemplate {
            original: sql.to_string(),
            normalized,
        }
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }
}

/// Replaces `swap_pre` with `prefix` where it starts a name, i.e. follows a
/// non-word character.
fn swap_prefix(sql: &str, prefix: &str, swap_pre: &str) -> String {
    match Regex::new(&format!(r"(\W){}(\S+?)", regex::escape(swap_pre))) {
        Ok(re) => re
            .replace_all(sql, |caps: &Captures| format!("{}{}{}", &caps[1], prefix, &caps[2]))
            .into_owned(),
        Err(e) => {
            warn!("Prefix placeholder '{}' left unswapped: {}", swap_pre, e);
            sql.to_string()
        }
    }
}

/// Options accepted at prepare time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrepareOptions {
    /// Cursor kind for results of this statement; the Connection's default
    /// when unset
    pub cursor: Option<CursorKind>,
}

/// A compiled statement bound to the Connection that produced it.
///
/// Lifecycle: unprepared -> prepared -> (executed)* -> closed. Closing is
/// idempotent and also happens on drop. If the Connection reconnects, the
/// next execute recompiles the statement on the new session first.
pub struct PreparedStatement<'c> {
    conn: &'c Connection,
    template: Option<QueryTemplate>,
    handle: Option<StatementId>,
    generation: u64,
    cursor_factory: CursorFactory,
    last_error: Option<ErrorInfo>,
}

impl fmt::Debug for PreparedStatement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("template", &self.template)
            .field("handle", &self.handle)
            .field("generation", &self.generation)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl<'c> PreparedStatement<'c> {
    /// An unprepared statement. The cursor constructor is fixed here, from
    /// the options or the Connection's default kind.
    pub fn new(conn: &'c Connection, options: PrepareOptions) -> Self {
        let kind = options.cursor.unwrap_or_else(|| conn.default_cursor_kind());
        PreparedStatement {
            conn,
            template: None,
            handle: None,
            generation: 0,
            cursor_factory: kind.factory(),
            last_error: None,
        }
    }

    /// Normalizes and compiles `sql`. A previously prepared handle on this
    /// statement is released first.
    ///
    /// # Errors
    ///
    /// Returns `DbportError::Prepare` carrying the server's code and message
    /// when compilation fails; the statement stays unprepared.
    pub fn prepare(&mut self, sql: &str) -> Result<&mut Self> {
        self.close();
        self.template = None;

        let conn = self.conn;
        let template = QueryTemplate::new(sql, &conn.config().prefix, &conn.config().swap_pre);
        let id = self.compile(template.normalized())?;

        debug!("Prepared statement {:?}: {}", id, template.normalized());
        self.template = Some(template);
        Ok(self)
    }

    fn compile(&mut self, sql: &str) -> Result<StatementId> {
        match self.conn.session_call(|s| s.prepare(sql))? {
            Ok(id) => {
                self.handle = Some(id);
                self.generation = self.conn.generation();
                self.last_error = None;
                Ok(id)
            }
            Err(e) => {
                let info = ErrorInfo::from(&e);
                error!("Prepare failed ({}): {}", e.code, e.message);
                self.conn.record_error(info.clone());
                self.last_error = Some(info);
                Err(DbportError::Prepare {
                    message: e.message,
                    code: e.code,
                })
            }
        }
    }

    /// Runs the statement with positional binds.
    ///
    /// # Errors
    ///
    /// - `DbportError::CallSequence` before a successful prepare or after close
    /// - `DbportError::Query` when the server rejects the execution
    pub fn execute(&mut self, binds: &[Value]) -> Result<ResultCursor> {
        let sql = match &self.template {
            Some(template) => template.normalized().to_string(),
            None => {
                return Err(DbportError::CallSequence(
                    "You must call prepare before trying to execute a prepared statement.".to_string(),
                ))
            }
        };
        let mut id = self.handle.ok_or_else(|| {
            DbportError::CallSequence("Cannot execute a closed prepared statement.".to_string())
        })?;

        if self.generation != self.conn.generation() {
            debug!("Session changed since prepare; recompiling statement");
            id = self.compile(&sql)?;
        }

        let started_at = Utc::now();
        let timer = Instant::now();
        let outcome = self.conn.session_call(|s| s.execute(id, binds))?;
        let duration = timer.elapsed();

        let error = outcome.as_ref().err().map(ErrorInfo::from);
        match &error {
            Some(info) => {
                error!("Execute failed ({}): {}", info.code, info.message);
                self.conn.record_error(info.clone());
            }
            None => self.conn.clear_error(),
        }
        self.last_error = error.clone();

        if let Some(template) = &self.template {
            let record = ExecutionRecord::from_template(template, binds, started_at, duration, error);
            self.conn.publish(&record);
        }

        match outcome {
            Ok(handle) => Ok((self.cursor_factory)(handle)),
            Err(e) => Err(DbportError::Query {
                message: e.message,
                code: e.code,
            }),
        }
    }

    /// Releases the compiled handle. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(id) = self.handle.take() {
            self.conn.close_statement(id, self.generation);
            debug!("Closed statement {:?}", id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// The normalized SQL that was compiled.
    pub fn get_query_string(&self) -> Result<&str> {
        self.template
            .as_ref()
            .map(QueryTemplate::normalized)
            .ok_or_else(|| DbportError::CallSequence("Cannot call getQueryString on a prepared query until after the query has been prepared.".to_string()))
    }

    pub fn template(&self) -> Option<&QueryTemplate> {
        self.template.as_ref()
    }

    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }

    /// Code of the last prepare or execute failure; 0 when there was none.
    pub fn error_code(&self) -> i32 {
        self.last_error.as_ref().map(|e| e.code).unwrap_or(0)
    }

    pub fn error_message(&self) -> &str {
        self.last_error.as_ref().map(|e| e.message.as_str()).unwrap_or("")
    }
}

impl Drop for PreparedStatement<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
