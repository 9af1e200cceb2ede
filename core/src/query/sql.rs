//! SQL generation for embedded-resource queries.
//!
//! Renders a validated [`PlanNode`] tree into one SQLite statement. To-one
//! embeds reachable through joins only become `LEFT JOIN`s; everything else
//! becomes a correlated JSON sub-select (`json_object` / `json_group_array`).

use core::fmt::Write;

use crate::relation::Cardinality;
use crate::schema::{Affinity, ColumnMetadata};
use crate::selection::{FilterOp, NullsOrder};
use crate::shape::{ShapeDescriptor, ShapeField, ShapeNode};
use crate::value::SqlValue;

use super::plan::{PlanEmbed, PlanFilter, PlanItem, PlanNode, PlanOrder};

/// Accumulates bind parameters and hands out table aliases and output columns.
#[derive(Default)]
pub(crate) struct Lowering {
    params: Vec<SqlValue>,
    next_alias: usize,
    width: usize,
}

impl Lowering {
    /// Renders the root query, returning SQL, params and the result shape.
    pub fn lower(root: &PlanNode<'_>) -> (String, Vec<SqlValue>, ShapeDescriptor) {
        let mut lw = Self::default();
        let alias = lw.alias();

        let mut select = String::with_capacity(128);
        let mut joins = String::new();
        let shape = lw.write_joined(root, &alias, &mut select, &mut joins);

        let mut sql = String::with_capacity(select.len() + joins.len() + 64);
        sql.push_str("SELECT ");
        sql.push_str(&select);
        sql.push_str(" FROM ");
        write_ident(&root.table.name, &mut sql);
        sql.push_str(" AS ");
        write_ident(&alias, &mut sql);
        sql.push_str(&joins);

        // Root filters plus required embeds directly under the root
        let mut where_sql = String::new();
        lw.write_scope_predicates(root, &alias, &mut where_sql);
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        write_order_by(&alias, &root.order, &mut sql);
        write_limit_offset(root.limit, root.offset, &mut sql);

        let descriptor = ShapeDescriptor {
            root: shape,
            width: lw.width,
        };
        (sql, lw.params, descriptor)
    }

    fn alias(&mut self) -> String {
        let alias = format!("t{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    fn bind(&mut self, value: SqlValue, sql: &mut String) {
        self.params.push(value);
        let _ = write!(sql, "?{}", self.params.len());
    }

    /// Appends `expr AS "cN"` to the select list and returns `N`.
    fn select_expr(&mut self, expr: &str, select: &mut String) -> usize {
        let index = self.width;
        self.width += 1;
        if index > 0 {
            select.push_str(", ");
        }
        select.push_str(expr);
        let _ = write!(select, " AS \"c{index}\"");
        index
    }

    /// Writes the columns of `node` (and of to-one embeds joined beneath it)
    /// into the flat select list.
    fn write_joined(
        &mut self,
        node: &PlanNode<'_>,
        alias: &str,
        select: &mut String,
        joins: &mut String,
    ) -> ShapeNode {
        let mut fields = Vec::with_capacity(node.items.len());

        for item in &node.items {
            match item {
                PlanItem::Column { key, column } => {
                    let mut expr = String::new();
                    write_qualified_column(alias, &column.name, &mut expr);
                    let index = self.select_expr(&expr, select);
                    fields.push(ShapeField::Column {
                        key: key.clone(),
                        index,
                    });
                }
                PlanItem::Embed(embed) if embed.cardinality() == Cardinality::One => {
                    let child = self.alias();
                    joins.push_str(" LEFT JOIN ");
                    write_ident(&embed.node.table.name, joins);
                    joins.push_str(" AS ");
                    write_ident(&child, joins);
                    joins.push_str(" ON ");
                    self.write_condition(embed, &child, alias, joins);

                    // The embed-side join column is NULL exactly when nothing matched
                    let mut expr = String::new();
                    match embed.relationship.join_pairs().next() {
                        Some((embed_col, _)) => write_qualified_column(&child, embed_col, &mut expr),
                        None => expr.push_str("NULL"),
                    }
                    let marker = self.select_expr(&expr, select);

                    let nested = self.write_joined(&embed.node, &child, select, joins);
                    fields.push(ShapeField::Joined {
                        key: embed.key.clone(),
                        marker,
                        node: nested,
                    });
                }
                PlanItem::Embed(embed) => {
                    let mut expr = String::new();
                    self.write_subquery(embed, alias, &mut expr);
                    let index = self.select_expr(&expr, select);
                    fields.push(ShapeField::Aggregate {
                        key: embed.key.clone(),
                        index,
                        cardinality: embed.cardinality(),
                    });
                }
            }
        }

        ShapeNode { fields }
    }

    /// Join condition of `embed`: FK pairs, embed filters and the EXISTS
    /// checks of its required children.
    fn write_condition(
        &mut self,
        embed: &PlanEmbed<'_>,
        alias: &str,
        parent_alias: &str,
        sql: &mut String,
    ) {
        for (i, (embed_col, parent_col)) in embed.relationship.join_pairs().enumerate() {
            if i > 0 {
                sql.push_str(" AND ");
            }
            write_qualified_column(alias, embed_col, sql);
            sql.push_str(" = ");
            write_qualified_column(parent_alias, parent_col, sql);
        }

        let mut rest = String::new();
        self.write_scope_predicates(&embed.node, alias, &mut rest);
        if !rest.is_empty() {
            sql.push_str(" AND ");
            sql.push_str(&rest);
        }
    }

    /// Filters of `node` and EXISTS checks for its required embeds, joined by AND.
    fn write_scope_predicates(&mut self, node: &PlanNode<'_>, alias: &str, sql: &mut String) {
        let mut first = true;
        for filter in &node.filters {
            if !first {
                sql.push_str(" AND ");
            }
            first = false;
            self.write_filter(alias, filter, sql);
        }
        for embed in node.embeds().filter(|e| e.required) {
            if !first {
                sql.push_str(" AND ");
            }
            first = false;
            self.write_exists(embed, alias, sql);
        }
    }

    fn write_exists(&mut self, embed: &PlanEmbed<'_>, parent_alias: &str, sql: &mut String) {
        let alias = self.alias();
        sql.push_str("EXISTS (SELECT 1 FROM ");
        write_ident(&embed.node.table.name, sql);
        sql.push_str(" AS ");
        write_ident(&alias, sql);
        sql.push_str(" WHERE ");
        self.write_condition(embed, &alias, parent_alias, sql);
        sql.push(')');
    }

    /// Writes a correlated sub-select producing the embed as JSON text.
    fn write_subquery(&mut self, embed: &PlanEmbed<'_>, parent_alias: &str, sql: &mut String) {
        let alias = self.alias();
        let node = &embed.node;
        let many = embed.cardinality() == Cardinality::Many;

        // LIMIT / OFFSET / ORDER BY must apply before aggregation, so a to-many
        // embed using them reads from an inner derived table.
        let needs_inner_subquery =
            many && (!node.order.is_empty() || node.limit.is_some() || node.offset.is_some());

        sql.push_str("(SELECT ");
        if many {
            sql.push_str("json_group_array(");
        }
        self.write_json_object(node, &alias, sql);
        if many {
            sql.push(')');
        }

        sql.push_str(" FROM ");
        if needs_inner_subquery {
            sql.push_str("(SELECT ");
            write_ident(&alias, sql);
            sql.push_str(".* FROM ");
        }
        write_ident(&node.table.name, sql);
        sql.push_str(" AS ");
        write_ident(&alias, sql);
        sql.push_str(" WHERE ");
        self.write_condition(embed, &alias, parent_alias, sql);

        if many {
            if needs_inner_subquery {
                write_order_by(&alias, &node.order, sql);
                write_limit_offset(node.limit, node.offset, sql);
                sql.push_str(") AS ");
                write_ident(&alias, sql);
            }
        } else {
            write_order_by(&alias, &node.order, sql);
            sql.push_str(" LIMIT 1");
        }

        sql.push(')');
    }

    /// `json_object('key', value, ...)` for one row of `node`.
    fn write_json_object(&mut self, node: &PlanNode<'_>, alias: &str, sql: &mut String) {
        sql.push_str("json_object(");
        for (i, item) in node.items.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            match item {
                PlanItem::Column { key, column } => {
                    write_string_literal(key, sql);
                    sql.push_str(", ");
                    write_json_column(alias, column, sql);
                }
                PlanItem::Embed(embed) => {
                    write_string_literal(&embed.key, sql);
                    // Sub-select results lose their JSON subtype; json() restores it
                    sql.push_str(", json(");
                    self.write_subquery(embed, alias, sql);
                    sql.push(')');
                }
            }
        }
        sql.push(')');
    }

    fn write_filter(&mut self, alias: &str, filter: &PlanFilter<'_>, sql: &mut String) {
        if filter.negated {
            sql.push_str("NOT (");
        }

        let op = match filter.op {
            FilterOp::Eq => Some(" = "),
            FilterOp::Neq => Some(" <> "),
            FilterOp::Gt => Some(" > "),
            FilterOp::Gte => Some(" >= "),
            FilterOp::Lt => Some(" < "),
            FilterOp::Lte => Some(" <= "),
            _ => None,
        };

        match (filter.op, op) {
            (_, Some(op)) => {
                write_qualified_column(alias, &filter.column.name, sql);
                sql.push_str(op);
                self.bind(first_value(filter), sql);
            }
            (FilterOp::Like, _) => {
                write_qualified_column(alias, &filter.column.name, sql);
                sql.push_str(" GLOB ");
                let pattern = filter.values.first().and_then(SqlValue::as_text).unwrap_or("");
                self.bind(SqlValue::Text(glob_pattern(pattern)), sql);
            }
            (FilterOp::ILike, _) => {
                write_qualified_column(alias, &filter.column.name, sql);
                sql.push_str(" LIKE ");
                let pattern = filter.values.first().and_then(SqlValue::as_text).unwrap_or("");
                self.bind(SqlValue::Text(like_pattern(pattern)), sql);
            }
            (FilterOp::In, _) if filter.values.is_empty() => sql.push('0'),
            (FilterOp::In, _) => {
                write_qualified_column(alias, &filter.column.name, sql);
                sql.push_str(" IN (");
                for (i, value) in filter.values.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    self.bind(value.clone(), sql);
                }
                sql.push(')');
            }
            (FilterOp::IsNull, _) => {
                write_qualified_column(alias, &filter.column.name, sql);
                sql.push_str(" IS NULL");
            }
            (FilterOp::IsTrue, _) => {
                write_qualified_column(alias, &filter.column.name, sql);
                sql.push_str(" IS TRUE");
            }
            (FilterOp::IsFalse, _) => {
                write_qualified_column(alias, &filter.column.name, sql);
                sql.push_str(" IS FALSE");
            }
            // Comparison operators are handled by the first arm
            (_, None) => sql.push('1'),
        }

        if filter.negated {
            sql.push(')');
        }
    }
}

fn first_value(filter: &PlanFilter<'_>) -> SqlValue {
    filter.values.first().cloned().unwrap_or_default()
}

// =============================================================================
// Helpers
// =============================================================================

/// Writes `"name"`, doubling embedded quotes.
fn write_ident(name: &str, sql: &mut String) {
    sql.push('"');
    for c in name.chars() {
        if c == '"' {
            sql.push('"');
        }
        sql.push(c);
    }
    sql.push('"');
}

/// Writes `"alias"."column"` into the buffer.
fn write_qualified_column(alias: &str, column: &str, sql: &mut String) {
    write_ident(alias, sql);
    sql.push('.');
    write_ident(column, sql);
}

fn write_string_literal(s: &str, sql: &mut String) {
    sql.push('\'');
    sql.push_str(&s.replace('\'', "''"));
    sql.push('\'');
}

/// Column value inside `json_object`. JSON cannot carry blobs, so values stored
/// as blobs are rendered as `\x` hex text.
fn write_json_column(alias: &str, column: &ColumnMetadata, sql: &mut String) {
    if column.affinity() != Affinity::Blob {
        write_qualified_column(alias, &column.name, sql);
        return;
    }
    sql.push_str("CASE WHEN typeof(");
    write_qualified_column(alias, &column.name, sql);
    sql.push_str(") = 'blob' THEN '\\x' || lower(hex(");
    write_qualified_column(alias, &column.name, sql);
    sql.push_str(")) ELSE ");
    write_qualified_column(alias, &column.name, sql);
    sql.push_str(" END");
}

fn write_order_by(alias: &str, order: &[PlanOrder<'_>], sql: &mut String) {
    for (i, term) in order.iter().enumerate() {
        sql.push_str(if i == 0 { " ORDER BY " } else { ", " });
        write_qualified_column(alias, &term.column.name, sql);
        if term.descending {
            sql.push_str(" DESC");
        }
        match term.nulls {
            Some(NullsOrder::First) => sql.push_str(" NULLS FIRST"),
            Some(NullsOrder::Last) => sql.push_str(" NULLS LAST"),
            None => {}
        }
    }
}

fn write_limit_offset(limit: Option<u64>, offset: Option<u64>, sql: &mut String) {
    let clamp = |n: u64| n.min(i64::MAX as u64);
    match (limit, offset) {
        (Some(l), _) => {
            let _ = write!(sql, " LIMIT {}", clamp(l));
        }
        // SQLite only accepts OFFSET after a LIMIT
        (None, Some(_)) => sql.push_str(" LIMIT -1"),
        (None, None) => {}
    }
    if let Some(o) = offset {
        let _ = write!(sql, " OFFSET {}", clamp(o));
    }
}

/// PostgREST `like` pattern (`*` or `%` any run, `_` one char) as a GLOB.
fn glob_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '*' | '%' => out.push('*'),
            '_' => out.push('?'),
            '?' => out.push_str("[?]"),
            '[' => out.push_str("[[]"),
            c => out.push(c),
        }
    }
    out
}

/// PostgREST `ilike` pattern as a case-insensitive LIKE.
fn like_pattern(pattern: &str) -> String {
    pattern.replace('*', "%")
}
