/// Driver Utilities
///
/// Administrative helpers: database listing, table optimization and result
/// export. Backup is not available on this platform.

use crate::core::db::connection::Connection;
use crate::core::db::result::ResultCursor;
use crate::core::value::Value;
use crate::core::{DbportError, Result};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

pub const UNSUPPORTED_BACKUP: &str = "Unsupported feature of the database platform you are using.";

/// Settings a backup run would take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPreferences {
    pub tables: Vec<String>,
    pub ignore: Vec<String>,
    pub add_drop: bool,
    pub add_insert: bool,
    pub newline: String,
}

impl Default for BackupPreferences {
    fn default() -> Self {
        BackupPreferences {
            tables: Vec::new(),
            ignore: Vec::new(),
            add_drop: true,
            add_insert: true,
            newline: "\n".to_string(),
        }
    }
}

/// CSV layout used by [`Utils::csv_from_result`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvFormat {
    pub delimiter: String,
    pub newline: String,
    pub enclosure: String,
}

impl Default for CsvFormat {
    fn default() -> Self {
        CsvFormat {
            delimiter: ",".to_string(),
            newline: "\n".to_string(),
            enclosure: "\"".to_string(),
        }
    }
}

pub struct Utils<'c> {
    conn: &'c Connection,
}

impl<'c> Utils<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Utils { conn }
    }

    pub fn list_databases_statement(&self) -> &'static str {
        "SHOW DATABASES"
    }

    pub fn optimize_table_statement(&self, table: &str) -> String {
        format!("OPTIMIZE TABLE {}", self.conn.escape_identifiers(table))
    }

    /// Names of the databases visible to the session.
    pub fn list_databases(&self) -> Result<Vec<String>> {
        let mut cursor = self.conn.query_strict(self.list_databases_statement())?;
        let names = cursor
            .result_array()
            .into_iter()
            .filter_map(|row| row.get_index(0).and_then(Value::as_text))
            .collect::<Vec<_>>();
        debug!("Found {} databases", names.len());
        Ok(names)
    }

    pub fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.list_databases()?.iter().any(|db| db == name))
    }

    /// Runs `OPTIMIZE TABLE`; false when the server rejects it and the
    /// Connection swallows raw query errors.
    pub fn optimize_table(&self, table: &str) -> Result<bool> {
        let sql = self.optimize_table_statement(table);
        Ok(self.conn.execute(&sql)?.is_some())
    }

    /// # Errors
    ///
    /// Always `DbportError::UnsupportedFeature`.
    pub fn backup(&self, prefs: &BackupPreferences) -> Result<String> {
        warn!("Backup requested for {} tables", prefs.tables.len());
        Err(DbportError::UnsupportedFeature(UNSUPPORTED_BACKUP.to_string()))
    }

    /// Renders every row of `cursor` as CSV with a header line. Each cell is
    /// wrapped in the enclosure, with embedded enclosures doubled.
    pub fn csv_from_result(&self, cursor: &mut ResultCursor, format: &CsvFormat) -> String {
        let enclose = |text: &str| {
            let doubled = text.replace(&format.enclosure, &format.enclosure.repeat(2));
            format!("{0}{1}{0}", format.enclosure, doubled)
        };

        let mut output = String::new();
        let header: Vec<String> = cursor.field_names().iter().map(|n| enclose(n)).collect();
        output.push_str(&header.join(&format.delimiter));
        output.push_str(&format.newline);

        for row in cursor.result_array() {
            let cells: Vec<String> = row
                .values()
                .iter()
                .map(|v| enclose(&v.as_text().unwrap_or_default()))
                .collect();
            output.push_str(&cells.join(&format.delimiter));
            output.push_str(&format.newline);
        }
        output
    }

    /// Renders every row of `cursor` as a JSON array of objects.
    pub fn json_from_result(&self, cursor: &mut ResultCursor) -> Result<String> {
        let rows: Vec<JsonValue> = cursor
            .result_array()
            .into_iter()
            .map(|row| -> Result<JsonValue> {
                let object: Map<String, JsonValue> = row
                    .iter()
                    .map(|(name, value)| serde_json::to_value(value).map(|v| (name.to_string(), v)))
                    .collect::<std::result::Result<_, serde_json::Error>>()?;
                Ok(JsonValue::Object(object))
            })
            .collect::<Result<_>>()?;
        Ok(serde_json::to_string(&rows)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::core::db::transport::{BufferedResult, TransportError};
    use crate::test_utils::{rows, ScriptedConnector};
    use std::sync::Arc;

    fn connection(script: &ScriptedConnector, debug: bool) -> Connection {
        let config = DatabaseConfig {
            database: "shop".to_string(),
            debug,
            ..DatabaseConfig::default()
        };
        Connection::new(config, Arc::new(script.clone()))
    }

    #[test]
    fn test_statements() {
        let script = ScriptedConnector::new();
        let conn = connection(&script, true);
        let utils = Utils::new(&conn);
        assert_eq!(utils.list_databases_statement(), "SHOW DATABASES");
        assert_eq!(utils.optimize_table_statement("orders"), "OPTIMIZE TABLE `orders`");
    }

    #[test]
    fn test_backup_unsupported() {
        let script = ScriptedConnector::new();
        let conn = connection(&script, true);
        match Utils::new(&conn).backup(&BackupPreferences::default()) {
            Err(DbportError::UnsupportedFeature(message)) => assert_eq!(message, UNSUPPORTED_BACKUP),
            other => panic!("Expected UnsupportedFeature, got {:?}", other),
        }
        assert!(script.state().queries.is_empty());
    }

    #[test]
    fn test_list_databases() {
        let script = ScriptedConnector::new();
        script.on_query(
            "SHOW DATABASES",
            Ok(rows(
                &["Database"],
                vec![vec![Value::from("information_schema")], vec![Value::from("shop")]],
            )),
        );
        let conn = connection(&script, true);
        let utils = Utils::new(&conn);
        assert_eq!(utils.list_databases().unwrap(), vec!["information_schema", "shop"]);
        assert!(utils.database_exists("shop").unwrap());
        assert!(!utils.database_exists("archive").unwrap());
    }

    #[test]
    fn test_optimize_table() {
        let script = ScriptedConnector::new();
        script.on_query("OPTIMIZE TABLE `orders`", Ok(BufferedResult::affected(0)));
        script.on_query("OPTIMIZE TABLE `ghost`", Err(TransportError::new(1146, "no such table")));

        let lenient = connection(&script, false);
        let utils = Utils::new(&lenient);
        assert!(utils.optimize_table("orders").unwrap());
        assert!(!utils.optimize_table("ghost").unwrap());

        let strict = connection(&script, true);
        assert!(Utils::new(&strict).optimize_table("ghost").is_err());
    }

    #[test]
    fn test_csv_from_result() {
        let script = ScriptedConnector::new();
        let conn = connection(&script, true);
        let mut cursor = ResultCursor::new(Box::new(rows(
            &["id", "quote"],
            vec![
                vec![Value::Int(1), Value::from("say \"hi\"")],
                vec![Value::Int(2), Value::Null],
            ],
        )));

        let csv = Utils::new(&conn).csv_from_result(&mut cursor, &CsvFormat::default());
        assert_eq!(csv, "\"id\",\"quote\"\n\"1\",\"say \"\"hi\"\"\"\n\"2\",\"\"\n");
    }

    #[test]
    fn test_json_from_result() {
        let script = ScriptedConnector::new();
        let conn = connection(&script, true);
        let mut cursor = ResultCursor::new(Box::new(rows(
            &["id", "name"],
            vec![vec![Value::Int(1), Value::from("ann")]],
        )));

        let json = Utils::new(&conn).json_from_result(&mut cursor).unwrap();
        assert_eq!(json, r#"[{"id":1,"name":"ann"}]"#);
    }
}
