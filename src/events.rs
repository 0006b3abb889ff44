//! Execution events: an audit record is published after every prepared
//! statement execution, successful or not.

use crate::core::db::escape::literal;
use crate::core::db::statement::QueryTemplate;
use crate::core::db::ErrorInfo;
use crate::core::value::Value;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Audit record for one execution. Never mutated after publication.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    /// Normalized SQL text as compiled
    pub sql: String,
    pub binds: Vec<Value>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<ErrorInfo>,
}

impl ExecutionRecord {
    /// Builds a record from a copy of the statement's template.
    pub fn from_template(
        template: &QueryTemplate,
        binds: &[Value],
        started_at: DateTime<Utc>,
        duration: Duration,
        error: Option<ErrorInfo>,
    ) -> Self {
        ExecutionRecord {
            id: Uuid::new_v4(),
            sql: template.normalized().to_string(),
            binds: binds.to_vec(),
            started_at,
            duration,
            success: error.is_none(),
            error,
        }
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    /// The SQL with each `?` placeholder replaced by its bind rendered as a
    /// literal. Placeholders inside quoted strings or identifiers are kept,
    /// as are placeholders with no matching bind.
    pub fn interpolated(&self) -> String {
        let mut out = String::with_capacity(self.sql.len() + self.binds.len() * 8);
        let mut binds = self.binds.iter();
        let mut quote: Option<char> = None;
        let mut escaped = false;

        for c in self.sql.chars() {
            match quote {
                Some(q) => {
                    out.push(c);
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == q {
                        quote = None;
                    }
                }
                None => match c {
                    '\'' | '"' | '`' => {
                        quote = Some(c);
                        out.push(c);
                    }
                    '?' => match binds.next() {
                        Some(value) => out.push_str(&literal(value)),
                        None => out.push('?'),
                    },
                    other => out.push(other),
                },
            }
        }
        out
    }
}

/// Receiver of execution records. Implementations must return quickly and
/// must not fail; a panicking sink is logged and skipped.
pub trait EventSink: Send + Sync {
    fn on_query(&self, record: &ExecutionRecord);
}

/// Registry of subscribed sinks.
#[derive(Clone, Default)]
pub struct Events {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Events {
    pub fn new() -> Self {
        Events::default()
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Delivers the record to every sink.
    pub fn trigger(&self, record: &ExecutionRecord) {
        for sink in &self.sinks {
            if catch_unwind(AssertUnwindSafe(|| sink.on_query(record))).is_err() {
                warn!("Event sink panicked while handling query {}", record.id);
            }
        }
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Events").field("sinks", &self.sinks.len()).finish()
    }
}

/// Logs each record at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_query(&self, record: &ExecutionRecord) {
        let binds = serde_json::to_string(&record.binds).unwrap_or_else(|_| "[]".to_string());
        debug!(
            target: "dbport::query",
            id = %record.id,
            sql = %record.sql,
            binds = %binds,
            duration_ms = record.duration_ms(),
            success = record.success,
            "query executed"
        );
    }
}

/// Keeps every record in memory; handy for auditing and tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<ExecutionRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

impl EventSink for MemorySink {
    fn on_query(&self, record: &ExecutionRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}
