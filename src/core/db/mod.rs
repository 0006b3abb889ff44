/// Database Module
///
/// ## Architecture
///
/// The adapter is layered bottom-up:
/// - **Transport** (`transport.rs`): the contract a lower-level client fulfils; `sqlite.rs` is the embedded implementation
/// - **Result Cursors** (`result.rs`): row fetch, positioning and column metadata over a result handle
/// - **Prepared Statements** (`statement.rs`): compile once, execute with positional binds
/// - **Connection** (`connection.rs`): session lifecycle, direct queries, transactions, escaping, errors
/// - **Schema Introspection** (`schema.rs`): table, column, index and foreign key metadata
/// - **Utilities** (`utils.rs`): administrative SQL and result export
///
/// ## Error Handling
///
/// All operations return `DbportError`. Transport failures are classified at
/// the Connection and PreparedStatement boundary.
pub mod connection;
pub mod escape;
pub mod result;
pub mod schema;
pub mod sqlite;
pub mod statement;
pub mod transport;
pub mod utils;

pub use connection::{mask_credentials, ConnectDescriptor, Connection, ErrorInfo, ErrorMode};
pub use escape::EscapeLike;
pub use result::{type_name, ColumnDescriptor, CursorFactory, CursorKind, ResultCursor};
pub use schema::{FieldDescriptor, ForeignKeyDescriptor, IndexDescriptor, IndexKind};
pub use sqlite::SqliteConnector;
pub use statement::{PrepareOptions, PreparedStatement, QueryTemplate};
pub use transport::{
    BufferedResult, ColumnMeta, ConnectOptions, ConnectRequest, Connector, QueryCanceller,
    ResultHandle, Session, StatementId, TransportError,
};
pub use utils::{BackupPreferences, CsvFormat, Utils};
