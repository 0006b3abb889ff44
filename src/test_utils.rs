/// # Test Utilities Module
///
/// A scripted transport for unit tests. It records every call the driver
/// makes and answers queries from rules registered by the test, so MySQL
/// introspection and failure paths can be exercised without a server.

use crate::core::db::transport::{
    BufferedResult, ColumnMeta, ConnectRequest, Connector, ResultHandle, Session, StatementId,
    TransportError, TransportResult,
};
use crate::core::value::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Builds a text-typed result set.
pub fn rows(columns: &[&str], data: Vec<Vec<Value>>) -> BufferedResult {
    let columns = columns.iter().map(|name| ColumnMeta::named(*name, 253)).collect();
    BufferedResult::new(columns, data)
}

/// A canned answer for SQL containing `pattern`.
#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    response: TransportResult<BufferedResult>,
}

/// Everything the scripted transport has seen, plus its failure switches.
#[derive(Debug, Default)]
pub struct ScriptState {
    pub requests: Vec<ConnectRequest>,
    pub connects: usize,
    pub queries: Vec<String>,
    pub prepared: Vec<String>,
    pub executions: Vec<(String, Vec<Value>)>,
    pub closed_statements: Vec<StatementId>,
    pub commits: usize,
    pub rollbacks: usize,
    pub autocommit: bool,
    pub insert_id: u64,
    connect_error: Option<TransportError>,
    prepare_error: Option<TransportError>,
    commit_error: Option<TransportError>,
    rollback_error: Option<TransportError>,
    client_error: Option<TransportError>,
    query_rules: Vec<Rule>,
    execute_rules: Vec<Rule>,
}

impl ScriptState {
    pub fn count_queries(&self, pattern: &str) -> usize {
        self.queries.iter().filter(|q| q.contains(pattern)).count()
    }

    fn answer(rules: &[Rule], sql: &str) -> TransportResult<BufferedResult> {
        rules
            .iter()
            .find(|rule| sql.contains(&rule.pattern))
            .map(|rule| rule.response.clone())
            .unwrap_or_else(|| Ok(BufferedResult::affected(0)))
    }
}

/// Connector whose sessions share one [`ScriptState`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        ScriptedConnector::default()
    }

    pub fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap()
    }

    pub fn on_query(&self, pattern: &str, response: TransportResult<BufferedResult>) {
        self.state().query_rules.push(Rule {
            pattern: pattern.to_string(),
            response,
        });
    }

    pub fn on_execute(&self, pattern: &str, response: TransportResult<BufferedResult>) {
        self.state().execute_rules.push(Rule {
            pattern: pattern.to_string(),
            response,
        });
    }

    pub fn clear_rules(&self) {
        let mut state = self.state();
        state.query_rules.clear();
        state.execute_rules.clear();
    }

    pub fn fail_connect(&self, error: TransportError) {
        self.state().connect_error = Some(error);
    }

    pub fn fail_prepare(&self, error: Option<TransportError>) {
        self.state().prepare_error = error;
    }

    pub fn fail_commit(&self, error: Option<TransportError>) {
        self.state().commit_error = error;
    }

    pub fn fail_rollback(&self, error: Option<TransportError>) {
        self.state().rollback_error = error;
    }

    pub fn set_client_error(&self, error: Option<TransportError>) {
        self.state().client_error = error;
    }

    pub fn set_insert_id(&self, id: u64) {
        self.state().insert_id = id;
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, request: &ConnectRequest) -> TransportResult<Box<dyn Session>> {
        let mut state = self.state();
        state.requests.push(request.clone());
        if let Some(error) = state.connect_error.clone() {
            return Err(error);
        }
        state.connects += 1;
        state.autocommit = true;
        Ok(Box::new(ScriptedSession {
            state: self.state.clone(),
            statements: HashMap::new(),
            next_id: 1,
            affected_rows: 0,
        }))
    }
}

struct ScriptedSession {
    state: Arc<Mutex<ScriptState>>,
    statements: HashMap<StatementId, String>,
    next_id: u64,
    affected_rows: u64,
}

impl ScriptedSession {
    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap()
    }
}

impl Session for ScriptedSession {
    fn query(&mut self, sql: &str) -> TransportResult<Box<dyn ResultHandle>> {
        let response = {
            let mut state = self.state();
            state.queries.push(sql.to_string());
            ScriptState::answer(&state.query_rules, sql)
        };
        let result = response?;
        self.affected_rows = result.row_count();
        Ok(Box::new(result))
    }

    fn prepare(&mut self, sql: &str) -> TransportResult<StatementId> {
        let mut state = self.state();
        if let Some(error) = state.prepare_error.clone() {
            return Err(error);
        }
        state.prepared.push(sql.to_string());
        drop(state);

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
            .ok_or_else(|| TransportError::new(2030, "unknown statement"))?;
        let mut state = self.state();
        state.executions.push((sql.clone(), params.to_vec()));
        let result = ScriptState::answer(&state.execute_rules, &sql)?;
        Ok(Box::new(result))
    }

    fn close_statement(&mut self, id: StatementId) {
        if self.statements.remove(&id).is_some() {
            self.state().closed_statements.push(id);
        }
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn last_insert_id(&self) -> u64 {
        self.state().insert_id
    }

    fn set_autocommit(&mut self, enabled: bool) -> TransportResult<()> {
        self.state().autocommit = enabled;
        Ok(())
    }

    fn is_autocommit(&self) -> bool {
        self.state().autocommit
    }

    fn begin(&mut self) -> TransportResult<()> {
        Ok(())
    }

    fn commit(&mut self) -> TransportResult<()> {
        let mut state = self.state();
        if let Some(error) = state.commit_error.take() {
            return Err(error);
        }
        state.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> TransportResult<()> {
        let mut state = self.state();
        if let Some(error) = state.rollback_error.take() {
            return Err(error);
        }
        state.rollbacks += 1;
        Ok(())
    }

    fn error_info(&self) -> Option<TransportError> {
        self.state().client_error.clone()
    }
}
