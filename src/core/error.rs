/// Dbport Error Module
///
/// This module defines the error taxonomy shared by every driver component.
/// Lower-level client failures arrive as [`TransportError`](crate::core::db::TransportError)
/// and are classified here at the Connection / PreparedStatement boundary.
use thiserror::Error;

/// Comprehensive error type for the driver adapter.
///
/// This enum covers all failure classes a caller can observe:
/// - Session establishment (credentials always masked)
/// - Statement compilation and execution
/// - Operations invoked out of order
/// - Schema introspection
/// - Features the backend does not provide
#[derive(Error, Debug)]
pub enum DbportError {
    /// Connecting to the server failed; the message never contains credentials
    #[error("Connection error ({code}): {message}")]
    Connection { message: String, code: i32 },

    /// The server refused to compile a statement
    #[error("Prepare error ({code}): {message}")]
    Prepare { message: String, code: i32 },

    /// An operation was invoked before its prerequisite (e.g. execute before prepare)
    #[error("Call sequence error: {0}")]
    CallSequence(String),

    /// An introspection query failed
    #[error("Schema error: {0}")]
    Schema(String),

    /// The backend does not implement the requested operation
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// A raw or prepared query failed on the server
    #[error("Query error ({code}): {message}")]
    Query { message: String, code: i32 },

    /// A cell value could not be converted to the requested Rust type
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbportError {
    /// Server error code carried by the error, or 0 when the class has none.
    pub fn code(&self) -> i32 {
        match self {
            DbportError::Connection { code, .. }
            | DbportError::Prepare { code, .. }
            | DbportError::Query { code, .. } => *code,
            _ => 0,
        }
    }
}

/// Type alias for Result to use DbportError as the error type.
pub type Result<T> = std::result::Result<T, DbportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let conn_err = DbportError::Connection {
            message: "Access denied for user '****'".to_string(),
            code: 1045,
        };
        assert!(conn_err.to_string().contains("Connection error (1045)"));

        let seq_err = DbportError::CallSequence("execute before prepare".to_string());
        assert!(seq_err.to_string().contains("Call sequence error"));

        let unsupported = DbportError::UnsupportedFeature("backup".to_string());
        assert!(unsupported.to_string().contains("Unsupported feature"));
    }

    #[test]
    fn test_error_code() {
        let err = DbportError::Query {
            message: "Table 'app.missing' doesn't exist".to_string(),
            code: 1146,
        };
        assert_eq!(err.code(), 1146);
        assert_eq!(DbportError::Schema("boom".to_string()).code(), 0);
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DbportError = io_err.into();
        match err {
            DbportError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }

        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: DbportError = toml_err.into();
        match err {
            DbportError::Toml(_) => {}
            _ => panic!("Expected TOML error"),
        }
    }
}
