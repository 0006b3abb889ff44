use crate::core::{DbportError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Connection settings for one logical database connection.
///
/// Every field has a default so a config file only needs to name what
/// differs. A `hostname` starting with `/` is treated as a local socket path.
#[derive(Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub hostname: String,
    pub port: Option<u16>,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    /// Pre-built DSN; when set, host/port/database/charset are not used to build one
    pub dsn: Option<String>,
    pub charset: String,
    /// Table prefix (DBPrefix)
    pub prefix: String,
    /// Placeholder prefix in SQL text that is swapped for `prefix`
    pub swap_pre: String,
    pub persistent: bool,
    /// Raw query failures are raised when true, logged and swallowed when false
    pub debug: bool,
    /// Rewrite bare `DELETE FROM t` so the affected row count is reported
    pub delete_hack: bool,
    pub escape_char: char,
    pub like_escape_char: char,
    pub connect_timeout_secs: u64,
    pub statement_timeout_ms: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            hostname: "localhost".to_string(),
            port: None,
            username: String::new(),
            password: String::new(),
            database: String::new(),
            dsn: None,
            charset: "utf8mb4".to_string(),
            prefix: String::new(),
            swap_pre: String::new(),
            persistent: false,
            debug: true,
            delete_hack: true,
            escape_char: '`',
            like_escape_char: '!',
            connect_timeout_secs: 10,
            statement_timeout_ms: None,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"****")
            .field("database", &self.database)
            .field("dsn", &self.dsn)
            .field("charset", &self.charset)
            .field("prefix", &self.prefix)
            .field("persistent", &self.persistent)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    database: DatabaseConfig,
}

impl DatabaseConfig {
    /// Parses a TOML document containing a `[database]` table.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        file.database.validate()?;
        Ok(file.database)
    }

    /// Rejects settings the driver cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.dsn.is_none() && self.hostname.trim().is_empty() {
            return Err(DbportError::Config(
                "either `hostname` or `dsn` must be set".to_string(),
            ));
        }
        if self.escape_char.is_alphanumeric() || self.like_escape_char.is_alphanumeric() {
            return Err(DbportError::Config(
                "escape characters must not be alphanumeric".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(DbportError::Config(
                "`connect_timeout_secs` must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_ms.map(Duration::from_millis)
    }
}

/// Loads connection settings from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = dbport::config::load_config("database.toml")?;
/// println!("{:?}", config);
/// # Ok::<(), dbport::core::DbportError>(())
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DatabaseConfig> {
    let content = fs::read_to_string(path)?;
    DatabaseConfig::from_toml_str(&content)
}
