/// Core Module for dbport
///
/// The driver adapter proper: connection, prepared statements, result
/// cursors and schema introspection, plus the shared error and value types.

pub mod db;
pub mod error;
pub mod value;

// Re-export commonly used types for convenience
pub use error::{DbportError, Result};
pub use value::{Entity, FromValue, Row, Value};
