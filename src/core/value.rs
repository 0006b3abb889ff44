/// Values and Rows
///
/// Bound parameters and fetched cells share one representation so that a
/// row fetched from one statement can be fed straight back into another.

use crate::core::{DbportError, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A single SQL value, either bound as a parameter or read from a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the textual form the server would report for this value,
    /// or `None` for NULL.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { "1".to_string() } else { "0".to_string() }),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Blob(b) => write!(f, "<BLOB: {} bytes>", b.len()),
            other => write!(f, "{}", other.as_text().unwrap_or_default()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Conversion from a fetched cell into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| DbportError::Conversion(format!("'{}' is not an integer", s))),
            other => Err(DbportError::Conversion(format!("cannot read {:?} as integer", other))),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| DbportError::Conversion(format!("'{}' is not a number", s))),
            other => Err(DbportError::Conversion(format!("cannot read {:?} as float", other))),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Text(s) => Ok(!matches!(s.as_str(), "" | "0")),
            other => Err(DbportError::Conversion(format!("cannot read {:?} as bool", other))),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_text()
            .ok_or_else(|| DbportError::Conversion("cannot read NULL as text".to_string()))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// An associative row: column names in result order paired with values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Row { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Looks a value up by column name. When a name repeats, the last
    /// occurrence wins, matching associative fetch semantics.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .rposition(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Typed lookup by column name.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .get(name)
            .ok_or_else(|| DbportError::Conversion(format!("no column named '{}'", name)))?;
        T::from_value(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// A domain type that can be populated from an associative row.
///
/// `Row` itself is an entity, so plain object fetches and domain fetches
/// share one code path.
pub trait Entity: Default {
    fn set_attributes(&mut self, row: Row) -> Result<()>;
}

impl Entity for Row {
    fn set_attributes(&mut self, row: Row) -> Result<()> {
        *self = row;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        Row::new(
            Arc::from(vec!["id".to_string(), "name".to_string(), "score".to_string()]),
            vec![Value::Int(7), Value::Text("alice".to_string()), Value::Null],
        )
    }

    #[test]
    fn test_row_lookup() {
        let row = sample_row();
        assert_eq!(row.get("id"), Some(&Value::Int(7)));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.get_as::<String>("name").unwrap(), "alice");
        assert_eq!(row.get_as::<Option<i64>>("score").unwrap(), None);
        assert!(row.get_as::<i64>("score").is_err());
    }

    #[test]
    fn test_duplicate_column_last_wins() {
        let row = Row::new(
            Arc::from(vec!["id".to_string(), "id".to_string()]),
            vec![Value::Int(1), Value::Int(2)],
        );
        assert_eq!(row.get("id"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(Some(3)), Value::Int(3));
        assert_eq!(Value::from(None::<&str>), Value::Null);
        assert_eq!(i64::from_value(&Value::Text(" 42 ".to_string())).unwrap(), 42);
        assert!(bool::from_value(&Value::Int(1)).unwrap());
        assert_eq!(Value::Blob(vec![1, 2, 3]).to_string(), "<BLOB: 3 bytes>");
    }

    #[test]
    fn test_value_serializes_untagged() {
        let json = serde_json::to_string(&vec![Value::Int(1), Value::Null, Value::from("x")]).unwrap();
        assert_eq!(json, r#"[1,null,"x"]"#);
    }
}
