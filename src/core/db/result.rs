/// Result Cursor Module
///
/// Reads rows from a [`ResultHandle`] as associative rows or entities,
/// with positioning, memoized row counts and column metadata.

use crate::core::db::transport::ResultHandle;
use crate::core::value::{Entity, Row};
use crate::core::Result;
use once_cell::unsync::OnceCell;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Column flag bit marking a primary key
const PRIMARY_KEY_FLAG: u32 = 2;

/// Maps a server type code to its type name. Codes 1 and 247 both read as
/// `char`; codes without a name return `None`.
pub fn type_name(code: u16) -> Option<&'static str> {
    let name = match code {
        0 => "decimal",
        1 | 247 => "char",
        2 => "short",
        3 => "long",
        4 => "float",
        5 => "double",
        7 => "timestamp",
        8 => "longlong",
        9 => "int24",
        10 => "date",
        11 => "time",
        12 => "datetime",
        13 => "year",
        14 => "newdate",
        16 => "bit",
        246 => "newdecimal",
        248 => "set",
        249 => "tiny_blob",
        250 => "medium_blob",
        251 => "long_blob",
        252 => "blob",
        253 => "var_string",
        254 => "string",
        255 => "geometry",
        _ => return None,
    };
    Some(name)
}

/// Column metadata as exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_code: u16,
    pub type_name: Option<&'static str>,
    pub max_length: u64,
    pub primary_key: bool,
    pub length: u64,
    pub default: Option<String>,
}

/// Constructor used to wrap a raw handle in a cursor.
pub type CursorFactory = fn(Box<dyn ResultHandle>) -> ResultCursor;

/// Positioning capability of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorKind {
    /// Seeks anywhere, as long as the handle can
    #[default]
    Scrollable,
    /// Reads in order; a seek only succeeds when it targets the current row
    ForwardOnly,
}

impl CursorKind {
    pub fn factory(self) -> CursorFactory {
        match self {
            CursorKind::Scrollable => ResultCursor::new,
            CursorKind::ForwardOnly => ResultCursor::forward_only,
        }
    }
}

/// Cursor over one result set.
///
/// Row count and column metadata are computed on first request and cached
/// for the life of the cursor. Freeing is idempotent and happens on drop.
pub struct ResultCursor {
    handle: Option<Box<dyn ResultHandle>>,
    kind: CursorKind,
    columns: Arc<[String]>,
    position: usize,
    row_count: OnceCell<u64>,
    field_data: OnceCell<Vec<ColumnDescriptor>>,
}

impl fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCursor")
            .field("kind", &self.kind)
            .field("columns", &self.columns)
            .field("position", &self.position)
            .field("freed", &self.handle.is_none())
            .finish()
    }
}

impl ResultCursor {
    pub fn new(handle: Box<dyn ResultHandle>) -> Self {
        Self::with_kind(handle, CursorKind::Scrollable)
    }

    pub fn forward_only(handle: Box<dyn ResultHandle>) -> Self {
        Self::with_kind(handle, CursorKind::ForwardOnly)
    }

    fn with_kind(handle: Box<dyn ResultHandle>, kind: CursorKind) -> Self {
        let columns: Arc<[String]> = handle.columns().iter().map(|c| c.name.clone()).collect();
        ResultCursor {
            handle: Some(handle),
            kind,
            columns,
            position: 0,
            row_count: OnceCell::new(),
            field_data: OnceCell::new(),
        }
    }

    pub fn kind(&self) -> CursorKind {
        self.kind
    }

    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.columns.to_vec()
    }

    /// Column metadata with type names resolved.
    pub fn field_data(&self) -> &[ColumnDescriptor] {
        self.field_data.get_or_init(|| {
            self.handle
                .as_ref()
                .map(|h| {
                    h.columns()
                        .iter()
                        .map(|c| ColumnDescriptor {
                            name: c.name.clone(),
                            type_code: c.type_code,
                            type_name: type_name(c.type_code),
                            max_length: c.max_length,
                            primary_key: c.flags & PRIMARY_KEY_FLAG != 0,
                            length: c.length,
                            default: c.default.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    /// Releases the underlying handle. Later fetches return `None`.
    pub fn free_result(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
            debug!("Freed result set");
        }
    }

    pub fn is_freed(&self) -> bool {
        self.handle.is_none()
    }

    /// Moves the read pointer to row `n` (0-based).
    pub fn data_seek(&mut self, n: usize) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        if self.kind == CursorKind::ForwardOnly || !handle.is_scrollable() {
            return n == self.position;
        }
        if handle.seek(n) {
            self.position = n;
            true
        } else {
            false
        }
    }

    /// Next row as an associative row, or `None` when exhausted.
    pub fn fetch_assoc(&mut self) -> Option<Row> {
        let values = self.handle.as_mut()?.fetch()?;
        self.position += 1;
        Some(Row::new(self.columns.clone(), values))
    }

    /// Next row hydrated into `E`. Passing `Row` yields a plain object.
    pub fn fetch_object<E: Entity>(&mut self) -> Result<Option<E>> {
        match self.fetch_assoc() {
            Some(row) => {
                let mut entity = E::default();
                entity.set_attributes(row)?;
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    /// Number of rows in the result (rows affected for statements that
    /// return none). Asked of the handle at most once.
    pub fn row_count(&self) -> u64 {
        *self
            .row_count
            .get_or_init(|| self.handle.as_ref().map(|h| h.row_count()).unwrap_or(0))
    }

    /// All rows from the start. A forward-only cursor yields the rows it has
    /// not read yet.
    pub fn result_array(&mut self) -> Vec<Row> {
        self.data_seek(0);
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_assoc() {
            rows.push(row);
        }
        rows
    }

    /// All rows from the start, hydrated into `E`.
    pub fn result_objects<E: Entity>(&mut self) -> Result<Vec<E>> {
        self.data_seek(0);
        let mut objects = Vec::new();
        while let Some(object) = self.fetch_object::<E>()? {
            objects.push(object);
        }
        Ok(objects)
    }

    /// Row `n` (0-based), if the cursor can reach it.
    pub fn row(&mut self, n: usize) -> Option<Row> {
        if !self.data_seek(n) {
            return None;
        }
        self.fetch_assoc()
    }

    pub fn first_row(&mut self) -> Option<Row> {
        self.row(0)
    }

    pub fn last_row(&mut self) -> Option<Row> {
        let count = self.row_count() as usize;
        if count == 0 {
            return None;
        }
        self.row(count - 1)
    }
}

impl Drop for ResultCursor {
    fn drop(&mut self) {
        self.free_result();
    }
}
