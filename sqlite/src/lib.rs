//! SQLite backend for sqlrest
//!
//! Catalog introspection, a fixed-size connection pool whose connections
//! carry per-request identity settings, and the session manager that runs
//! compiled statements under a request identity.

pub mod catalog;
pub mod identity;
pub mod introspect;
pub mod pool;
pub mod rows;
pub mod session;

pub use catalog::CatalogReader;
pub use identity::{Identity, IdentityError, SessionSettings, SharedSettings};
pub use pool::{ConnectionOptions, ConnectionPool, DatabaseLocation, PooledConnection};
pub use rows::query_rowset;
pub use session::SessionManager;
