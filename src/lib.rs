// Core infrastructure modules
pub mod config;
pub mod core;
pub mod events;

#[cfg(test)]
mod test_utils;

pub use crate::config::DatabaseConfig;
pub use crate::core::db::{Connection, PreparedStatement, ResultCursor};
pub use crate::core::{DbportError, Result, Value};
