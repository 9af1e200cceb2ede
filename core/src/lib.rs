//! Engine-agnostic core of sqlrest: the selection model and its surface
//! syntax, foreign-key resolution, query compilation and result shaping.

mod tracing;

pub mod error;
pub mod parser;
pub mod query;
pub mod relation;
pub mod schema;
pub mod selection;
pub mod session;
pub mod shape;
pub mod value;

pub use error::{Error, ErrorKind, Result};
pub use parser::{MAX_SELECT_DEPTH, parse_filter, parse_order, parse_request, parse_select};
pub use query::{CompileOptions, CompiledQuery, Compiler, EmbedFilterMode};
pub use relation::{Cardinality, Direction, Relationship, resolve};
pub use schema::{
    Affinity, Catalog, ColumnMetadata, ForeignKeyEdge, KeyColumns, SchemaSnapshot, TableMetadata,
};
pub use selection::{
    ColumnRef, EmbedJoin, EmbedNode, FilterClause, FilterOp, NullsOrder, OrderTerm, SelectItem,
    Selection, SelectionNode,
};
pub use session::SessionContext;
pub use shape::{ShapeDescriptor, ShapeField, ShapeNode, shape};
pub use value::{RowSet, SqlValue};
