//! Embedded-resource query compiler.
//!
//! The pipeline: a [`SelectionNode`] is planned against a [`Catalog`] (every
//! embed resolved, every column checked), then lowered into one SQL statement
//! plus a [`ShapeDescriptor`] telling [`shape`](crate::shape::shape) how to
//! re-nest the flat rows.

mod plan;
mod sql;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::schema::Catalog;
use crate::selection::SelectionNode;
use crate::session::SessionContext;
use crate::shape::ShapeDescriptor;
use crate::value::SqlValue;

use plan::Planner;
use sql::Lowering;

/// What a filter on an embedded resource does to the parent rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedFilterMode {
    /// Only narrows which related rows attach; parents are always kept
    #[default]
    Narrow,
    /// Parents without a matching related row are removed
    Require,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub embed_filter: EmbedFilterMode,
    /// Deepest allowed embed nesting (the root is depth 0)
    pub max_embed_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            embed_filter: EmbedFilterMode::Narrow,
            max_embed_depth: 8,
        }
    }
}

/// A single statement ready to run, plus the recipe to shape its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    /// Values for the `?N` placeholders, `params[0]` binds `?1`
    pub params: Vec<SqlValue>,
    pub shape: ShapeDescriptor,
}

pub struct Compiler<'c, C: Catalog> {
    catalog: &'c C,
    options: &'c CompileOptions,
}

impl<'c, C: Catalog> Compiler<'c, C> {
    pub fn new(catalog: &'c C, options: &'c CompileOptions) -> Self {
        Self { catalog, options }
    }

    /// Compiles `node` into SQL. Never touches the engine; every catalog or
    /// resolution error surfaces here, before anything runs.
    pub fn compile(&self, node: &SelectionNode, ctx: &SessionContext) -> Result<CompiledQuery> {
        if ctx.is_expired() {
            return Err(Error::Timeout { elapsed_ms: 0 });
        }

        let plan = Planner::new(self.catalog, self.options).plan_root(&node.table, &node.body)?;
        let (sql, params, shape) = Lowering::lower(&plan);

        crate::sqlrest_trace_query!(ctx.request_id(), &sql, params.len());

        Ok(CompiledQuery { sql, params, shape })
    }
}
