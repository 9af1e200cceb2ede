//! # sqlrest
//!
//! PostgREST-style resource queries against an embedded SQLite database.
//! A request names a table, the columns to return and, by nesting, related
//! tables to embed. It is compiled into one SQL statement, run under the
//! request's identity and shaped back into nested JSON.
//!
//! ```rust,no_run
//! use sqlrest::{Config, SessionContext, Sqlrest};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Sqlrest::open(Config::load()?)?;
//! let rows = db
//!     .execute_query(
//!         "instruments",
//!         [("select", "name,section:orchestral_sections(name)"), ("name", "eq.flute")],
//!         SessionContext::new("anon"),
//!     )
//!     .await?;
//! // [{"name": "flute", "section": {"name": "woodwinds"}}]
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! | Crate            | Contents                                                    |
//! |------------------|-------------------------------------------------------------|
//! | `sqlrest-core`   | selection model and grammar, resolver, compiler, shaper     |
//! | `sqlrest-sqlite` | catalog introspection, connection pool, identity sessions   |

mod config;
mod sqlrest;

pub use config::{CONFIG_FILE, Config, ConfigError, DatabaseConfig, QueryConfig, SessionConfig};
pub use sqlrest::{OpenError, Sqlrest};

pub use sqlrest_core::{
    Cardinality, Catalog, ColumnMetadata, ColumnRef, CompileOptions, CompiledQuery,
    EmbedFilterMode, EmbedJoin, EmbedNode, Error, ErrorKind, FilterClause, FilterOp,
    ForeignKeyEdge, NullsOrder, OrderTerm, Result, RowSet, SchemaSnapshot, SelectItem, Selection,
    SelectionNode, SessionContext, SqlValue, TableMetadata, parse_filter, parse_order,
    parse_request, parse_select,
};

/// SQLite backend: catalog reader, pool and session manager.
pub use sqlrest_sqlite as sqlite;

pub use sqlrest_core::{ShapeDescriptor, shape};
