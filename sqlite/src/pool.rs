//! Fixed-size connection pool with first-come, first-served acquisition.
//!
//! Each slot is one connection plus its identity settings. A slot is owned by
//! exactly one [`PooledConnection`] at a time and goes back to the free list
//! when that guard drops.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use sqlrest_core::{Error, Result};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::identity::{self, SessionSettings, SharedSettings};

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Private in-memory database shared by every connection of one instance
    Memory { name: String },
    File(PathBuf),
}

impl DatabaseLocation {
    /// A fresh, uniquely named in-memory database.
    pub fn in_memory() -> Self {
        Self::Memory {
            name: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// `":memory:"` maps to [`in_memory`](Self::in_memory), anything else is a path.
    pub fn parse(path: &str) -> Self {
        if path == ":memory:" {
            Self::in_memory()
        } else {
            Self::File(PathBuf::from(path))
        }
    }

    fn uri(&self) -> String {
        match self {
            // memdb databases whose name starts with '/' are shared between
            // connections of the same process
            Self::Memory { name } => format!("file:/{name}?vfs=memdb"),
            Self::File(path) => path.to_string_lossy().into_owned(),
        }
    }

    /// Opens a plain connection, without identity functions.
    pub fn open(&self) -> rusqlite::Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(self.uri(), flags)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }
}

/// How every connection of the pool is opened and reset.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub location: DatabaseLocation,
    pub busy_timeout: Duration,
    /// Identity every idle connection carries
    pub default_role: String,
    /// Roles a request may switch to
    pub roles: Vec<String>,
}

impl ConnectionOptions {
    pub fn new(location: DatabaseLocation) -> Self {
        Self {
            location,
            busy_timeout: Duration::from_secs(5),
            default_role: "anon".to_string(),
            roles: vec![
                "anon".to_string(),
                "authenticated".to_string(),
                "service_role".to_string(),
            ],
        }
    }

    /// Opens a connection with identity functions registered and the default
    /// identity applied.
    pub fn connect(&self) -> Result<(Connection, SharedSettings)> {
        let conn = self.location.open()?;
        conn.busy_timeout(self.busy_timeout)?;
        let settings: SharedSettings = Arc::new(Mutex::new(SessionSettings::default()));
        identity::register_functions(&conn, &settings, &self.roles)?;
        identity::restore(&conn, &self.default_role)?;
        Ok((conn, settings))
    }
}

/// One pooled connection and its identity settings.
#[derive(Debug)]
pub struct Slot {
    id: usize,
    conn: Connection,
    settings: SharedSettings,
}

impl Slot {
    fn open(id: usize, options: &ConnectionOptions) -> Result<Self> {
        let (conn, settings) = options.connect()?;
        Ok(Self { id, conn, settings })
    }
}

struct PoolInner {
    options: ConnectionOptions,
    size: usize,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<Slot>>,
    /// Slots whose connection could not be reopened
    retired: AtomicUsize,
    /// Woken whenever a slot is retired
    shrunk: Notify,
}

impl PoolInner {
    fn release(&self, slot: Slot) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(slot);
    }
}

#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Opens `size` connections up front.
    pub fn open(options: ConnectionOptions, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidRequest("pool size must be at least 1".into()));
        }
        let slots = (0..size)
            .map(|id| Slot::open(id, &options))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                options,
                size,
                semaphore: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(slots),
                retired: AtomicUsize::new(0),
                shrunk: Notify::new(),
            }),
        })
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn idle_count(&self) -> usize {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Waits for a free slot. Waiters are served in arrival order; `timeout`
    /// bounds the wait.
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<PooledConnection> {
        let semaphore = Arc::clone(&self.inner.semaphore);
        let permit = match timeout {
            Some(limit) => tokio::time::timeout(limit, semaphore.acquire_owned())
                .await
                .map_err(|_| Error::Timeout {
                    elapsed_ms: limit.as_millis() as u64,
                })?,
            None => semaphore.acquire_owned().await,
        }
        .map_err(|_| Error::ExecutionFailed("connection pool is closed".into()))?;

        let slot = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or_else(|| Error::ExecutionFailed("no idle connection behind permit".into()))?;

        Ok(PooledConnection {
            slot: Some(slot),
            permit: Some(permit),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Waits until every slot is idle, then refuses new acquisitions and closes
    /// all connections.
    pub async fn close(&self) {
        let permits = loop {
            // Registered before reading `retired` so a retirement in between
            // still wakes us
            let shrunk = self.inner.shrunk.notified();
            let live = self.inner.size - self.inner.retired.load(Ordering::Acquire);
            let size = u32::try_from(live).unwrap_or(u32::MAX);
            tokio::select! {
                permits = self.inner.semaphore.acquire_many(size) => break permits,
                () = shrunk => continue,
            }
        };
        if let Ok(permits) = permits {
            self.inner.semaphore.close();
            let slots = std::mem::take(
                &mut *self
                    .inner
                    .idle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            drop(slots);
            drop(permits);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.semaphore.is_closed()
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("size", &self.inner.size)
            .field("idle", &self.idle_count())
            .finish()
    }
}

/// Exclusive use of one slot. Dropping it returns the slot to the pool.
pub struct PooledConnection {
    slot: Option<Slot>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    fn slot(&self) -> &Slot {
        // Only emptied by `discard` (which consumes the guard) and by `drop`
        self.slot
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled connection used after discard"))
    }

    pub fn connection(&self) -> &Connection {
        &self.slot().conn
    }

    pub fn slot_id(&self) -> usize {
        self.slot().id
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.slot().settings
    }

    pub fn default_role(&self) -> &str {
        &self.pool.options.default_role
    }

    /// Throws the connection away and opens a replacement in the same slot.
    /// When reopening fails the slot is retired and the pool shrinks by one.
    pub fn discard(mut self) -> Result<Self> {
        if let Some(old) = self.slot.take() {
            let id = old.id;
            drop(old);
            match Slot::open(id, &self.pool.options) {
                Ok(fresh) => self.slot = Some(fresh),
                Err(err) => {
                    if let Some(permit) = self.permit.take() {
                        permit.forget();
                        self.pool.retired.fetch_add(1, Ordering::AcqRel);
                        self.pool.shrunk.notify_waiters();
                    }
                    return Err(err);
                }
            }
        }
        Ok(self)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot);
        }
        // The permit drops after the slot is back on the free list
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("slot", &self.slot.as_ref().map(|s| s.id))
            .finish()
    }
}
