//! Cached schema catalog backed by its own connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};

use rusqlite::Connection;
use sqlrest_core::{Catalog, Error, ForeignKeyEdge, Result, SchemaSnapshot, TableMetadata};

use crate::introspect;
use crate::pool::ConnectionOptions;

/// Reads and caches the catalog.
///
/// The cache is keyed on `PRAGMA schema_version`: every [`snapshot`] compares
/// the live version with the cached one, so DDL run on any connection is
/// picked up on the next read.
///
/// [`snapshot`]: CatalogReader::snapshot
pub struct CatalogReader {
    conn: Mutex<Connection>,
    cache: RwLock<Option<Arc<SchemaSnapshot>>>,
    stale: AtomicBool,
}

impl CatalogReader {
    /// Opens a dedicated connection. It carries the identity functions so
    /// views that call them can be introspected.
    pub fn open(options: &ConnectionOptions) -> Result<Self> {
        let (conn, _settings) = options.connect()?;
        Ok(Self::new(conn))
    }

    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            cache: RwLock::new(None),
            stale: AtomicBool::new(false),
        }
    }

    /// Current snapshot, reloaded when the schema changed or after
    /// [`invalidate`](Self::invalidate).
    ///
    /// While another caller holds the catalog connection (checking the
    /// version or reloading), the cached snapshot is returned as is. Only the
    /// very first load waits.
    pub fn snapshot(&self) -> Result<Arc<SchemaSnapshot>> {
        let conn = match self.conn.try_lock() {
            Ok(conn) => conn,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => match self.cached() {
                Some(snapshot) => return Ok(snapshot),
                None => self.conn.lock().unwrap_or_else(PoisonError::into_inner),
            },
        };
        let version = introspect::schema_version(&conn)?;
        let forced = self.stale.swap(false, Ordering::AcqRel);

        if !forced {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(snapshot) = cache.as_ref().filter(|s| s.version() == version) {
                return Ok(Arc::clone(snapshot));
            }
        }

        let snapshot = Arc::new(introspect::load_snapshot(&conn)?);
        sqlrest_core::sqlrest_trace_catalog!(
            snapshot.version(),
            snapshot.table_count(),
            snapshot.edges().len()
        );

        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn cached(&self) -> Option<Arc<SchemaSnapshot>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
    }

    /// Forces the next read to reload.
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub fn get_table(&self, name: &str) -> Result<Arc<TableMetadata>> {
        self.snapshot()?
            .table_arc(name)
            .ok_or_else(|| Error::TableNotFound {
                table: name.to_string(),
            })
    }

    /// Edges between `a` and `b` in either direction, ordered by constraint name.
    pub fn get_foreign_keys(&self, a: &str, b: &str) -> Result<Vec<ForeignKeyEdge>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.foreign_keys(a, b).into_iter().cloned().collect())
    }
}

impl std::fmt::Debug for CatalogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self
            .cache
            .read()
            .ok()
            .and_then(|c| c.as_ref().map(|s| s.version()));
        f.debug_struct("CatalogReader")
            .field("cached_version", &version)
            .finish()
    }
}
