/// Schema Introspection Module
///
/// Builds the introspection SQL for tables, columns, indexes and foreign
/// keys, and turns the rows it returns into descriptor lists.

use crate::core::db::connection::Connection;
use crate::core::db::result::ResultCursor;
use crate::core::value::{Row, Value};
use crate::core::{DbportError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// `name` or `name(length)` at the start of a reported column type
static COLUMN_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z]+)(?:\((\d+))?").expect("valid column type pattern"));

/// One column of a table as reported by `SHOW COLUMNS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    /// Base type name without the length, e.g. `varchar`
    pub type_name: String,
    pub max_length: Option<u32>,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexKind {
    Primary,
    Unique,
    Index,
    Fulltext,
    Spatial,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexKind::Primary => "PRIMARY",
            IndexKind::Unique => "UNIQUE",
            IndexKind::Index => "INDEX",
            IndexKind::Fulltext => "FULLTEXT",
            IndexKind::Spatial => "SPATIAL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub kind: IndexKind,
    /// Participating columns in first-seen order
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyDescriptor {
    pub constraint_name: String,
    pub table_name: String,
    pub column_name: String,
    pub foreign_table_name: String,
    pub foreign_column_name: String,
}

/// One row of `SHOW INDEX` output, reduced to what classification needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub key_name: String,
    pub column_name: String,
    pub non_unique: bool,
    pub index_type: String,
}

/// Splits a reported column type such as `int(11) unsigned` into its base
/// name and length.
pub fn parse_column_type(reported: &str) -> (String, Option<u32>) {
    match COLUMN_TYPE.captures(reported) {
        Some(caps) => (
            caps[1].to_string(),
            caps.get(2).and_then(|m| m.as_str().parse().ok()),
        ),
        None => (reported.to_string(), None),
    }
}

/// Classifies an index. The order of the checks matters: PRIMARY by name,
/// then FULLTEXT by index type, then SPATIAL or INDEX when non-unique, and
/// UNIQUE otherwise.
pub fn classify_index(key_name: &str, non_unique: bool, index_type: &str) -> IndexKind {
    if key_name == "PRIMARY" {
        IndexKind::Primary
    } else if index_type == "FULLTEXT" {
        IndexKind::Fulltext
    } else if non_unique {
        if index_type == "SPATIAL" {
            IndexKind::Spatial
        } else {
            IndexKind::Index
        }
    } else {
        IndexKind::Unique
    }
}

/// Groups index rows by key name, keeping the order in which each index and
/// each of its columns first appears. The kind comes from an index's first row.
pub fn group_indexes<I>(rows: I) -> Vec<IndexDescriptor>
where
    I: IntoIterator<Item = IndexRow>,
{
    let mut indexes: Vec<IndexDescriptor> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let next = indexes.len();
        let i = *positions.entry(row.key_name.clone()).or_insert(next);
        if i == next {
            indexes.push(IndexDescriptor {
                name: row.key_name.clone(),
                kind: classify_index(&row.key_name, row.non_unique, &row.index_type),
                fields: Vec::new(),
            });
        }
        let index = &mut indexes[i];
        if !index.fields.contains(&row.column_name) {
            index.fields.push(row.column_name);
        }
    }
    indexes
}

fn text(row: &Row, column: &str) -> Result<String> {
    row.get_as::<String>(column)
        .map_err(|e| DbportError::Schema(format!("unexpected introspection row: {}", e)))
}

fn optional_text(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_text)
}

impl Connection {
    /// SQL listing the tables of the current database, optionally limited to
    /// names starting with the table prefix.
    pub fn list_tables_sql(&self, prefix_limit: bool) -> String {
        let mut sql = format!("SHOW TABLES FROM {}", self.escape_identifiers(&self.database()));
        let prefix = &self.config().prefix;
        if prefix_limit && !prefix.is_empty() {
            sql.push_str(&format!(" LIKE '{}%'", self.escape_like_string_direct(prefix.as_str())));
        }
        sql
    }

    pub fn list_columns_sql(&self, table: &str) -> String {
        format!("SHOW COLUMNS FROM {}", self.protect_table(table))
    }

    pub fn list_indexes_sql(&self, table: &str) -> String {
        format!("SHOW INDEX FROM {}", self.protect_table(table))
    }

    /// Foreign key introspection over `information_schema`. `table` is used
    /// verbatim, so it must already carry the table prefix.
    pub fn foreign_keys_sql(&self, table: &str) -> String {
        [
            "SELECT tc.CONSTRAINT_NAME, tc.TABLE_NAME, kcu.COLUMN_NAME, rc.REFERENCED_TABLE_NAME, kcu.REFERENCED_COLUMN_NAME".to_string(),
            "FROM information_schema.TABLE_CONSTRAINTS AS tc".to_string(),
            "INNER JOIN information_schema.REFERENTIAL_CONSTRAINTS AS rc ON tc.CONSTRAINT_NAME = rc.CONSTRAINT_NAME".to_string(),
            "INNER JOIN information_schema.KEY_COLUMN_USAGE AS kcu ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME".to_string(),
            format!(
                "WHERE tc.CONSTRAINT_TYPE = {} AND tc.TABLE_SCHEMA = {} AND tc.TABLE_NAME = {}",
                self.escape(&Value::from("FOREIGN KEY")),
                self.escape(&Value::from(self.database())),
                self.escape(&Value::from(table)),
            ),
        ]
        .join("\n")
    }

    /// SQL turning foreign key enforcement off for the session.
    pub fn disable_foreign_key_checks(&self) -> &'static str {
        "SET FOREIGN_KEY_CHECKS=0"
    }

    pub fn enable_foreign_key_checks(&self) -> &'static str {
        "SET FOREIGN_KEY_CHECKS=1"
    }

    fn introspect(&self, sql: &str, what: &str, table: &str) -> Result<ResultCursor> {
        debug!("Reading {} for {}", what, table);
        self.query_strict(sql).map_err(|e| match e {
            DbportError::Connection { .. } => e,
            other => DbportError::Schema(format!("Unable to get {} for {}: {}", what, table, other)),
        })
    }

    /// Names of the tables in the current database.
    pub fn table_names(&self, prefix_limit: bool) -> Result<Vec<String>> {
        let sql = self.list_tables_sql(prefix_limit);
        let database = self.database();
        let mut cursor = self.introspect(&sql, "table list", &database)?;
        Ok(cursor
            .result_array()
            .into_iter()
            .filter_map(|row| row.get_index(0).and_then(Value::as_text))
            .collect())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let prefixed = format!("{}{}", self.config().prefix, table);
        Ok(self
            .table_names(false)?
            .iter()
            .any(|name| name == table || *name == prefixed))
    }

    /// Column metadata for `table`.
    ///
    /// # Errors
    ///
    /// Returns `DbportError::Schema` when the introspection query fails.
    pub fn field_data(&self, table: &str) -> Result<Vec<FieldDescriptor>> {
        let sql = self.list_columns_sql(table);
        let mut cursor = self.introspect(&sql, "field data", table)?;

        cursor
            .result_array()
            .iter()
            .map(|row| -> Result<FieldDescriptor> {
                let (type_name, max_length) = parse_column_type(&text(row, "Type")?);
                Ok(FieldDescriptor {
                    name: text(row, "Field")?,
                    type_name,
                    max_length,
                    nullable: optional_text(row, "Null").as_deref() == Some("YES"),
                    default: optional_text(row, "Default"),
                    primary_key: optional_text(row, "Key").as_deref() == Some("PRI"),
                })
            })
            .collect()
    }

    /// Column names of `table` in declaration order.
    pub fn field_names(&self, table: &str) -> Result<Vec<String>> {
        Ok(self.field_data(table)?.into_iter().map(|f| f.name).collect())
    }

    /// Indexes of `table`, one descriptor per index name.
    pub fn index_data(&self, table: &str) -> Result<Vec<IndexDescriptor>> {
        let sql = self.list_indexes_sql(table);
        let mut cursor = self.introspect(&sql, "index data", table)?;

        let rows = cursor
            .result_array()
            .iter()
            .map(|row| -> Result<IndexRow> {
                Ok(IndexRow {
                    key_name: text(row, "Key_name")?,
                    column_name: text(row, "Column_name")?,
                    non_unique: row
                        .get_as::<bool>("Non_unique")
                        .map_err(|e| DbportError::Schema(e.to_string()))?,
                    index_type: optional_text(row, "Index_type").unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(group_indexes(rows))
    }

    /// Foreign keys declared on `table` (the table prefix is applied).
    pub fn foreign_key_data(&self, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        let prefix = &self.config().prefix;
        let table = if table.starts_with(prefix.as_str()) {
            table.to_string()
        } else {
            format!("{}{}", prefix, table)
        };
        let sql = self.foreign_keys_sql(&table);
        let mut cursor = self.introspect(&sql, "foreign key data", &table)?;

        cursor
            .result_array()
            .iter()
            .map(|row| -> Result<ForeignKeyDescriptor> {
                Ok(ForeignKeyDescriptor {
                    constraint_name: text(row, "CONSTRAINT_NAME")?,
                    table_name: text(row, "TABLE_NAME")?,
                    column_name: text(row, "COLUMN_NAME")?,
                    foreign_table_name: text(row, "REFERENCED_TABLE_NAME")?,
                    foreign_column_name: text(row, "REFERENCED_COLUMN_NAME")?,
                })
            })
            .collect()
    }
}
