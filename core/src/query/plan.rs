//! Validated query tree.
//!
//! Planning resolves every embed, expands `*`, checks every column, filter and
//! order term against the catalog and coerces filter values. Nothing is
//! written until the whole tree has been validated.

use crate::error::{Error, Result};
use crate::relation::{self, Cardinality, Relationship};
use crate::schema::{Affinity, Catalog, ColumnMetadata, TableMetadata};
use crate::selection::{
    EmbedJoin, EmbedNode, FilterClause, FilterOp, NullsOrder, SelectItem, Selection,
};
use crate::value::SqlValue;

use super::{CompileOptions, EmbedFilterMode};

#[derive(Debug)]
pub(crate) struct PlanNode<'c> {
    pub table: &'c TableMetadata,
    pub items: Vec<PlanItem<'c>>,
    pub filters: Vec<PlanFilter<'c>>,
    pub order: Vec<PlanOrder<'c>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug)]
pub(crate) enum PlanItem<'c> {
    Column {
        key: String,
        column: &'c ColumnMetadata,
    },
    Embed(Box<PlanEmbed<'c>>),
}

#[derive(Debug)]
pub(crate) struct PlanEmbed<'c> {
    pub key: String,
    pub relationship: Relationship,
    /// Parent rows without a matching related row are removed
    pub required: bool,
    pub node: PlanNode<'c>,
}

impl PlanEmbed<'_> {
    pub fn cardinality(&self) -> Cardinality {
        self.relationship.cardinality
    }
}

#[derive(Debug)]
pub(crate) struct PlanFilter<'c> {
    pub column: &'c ColumnMetadata,
    pub op: FilterOp,
    pub negated: bool,
    pub values: Vec<SqlValue>,
}

#[derive(Debug)]
pub(crate) struct PlanOrder<'c> {
    pub column: &'c ColumnMetadata,
    pub descending: bool,
    pub nulls: Option<NullsOrder>,
}

impl<'c> PlanNode<'c> {
    pub fn embeds(&self) -> impl Iterator<Item = &PlanEmbed<'c>> {
        self.items.iter().filter_map(|item| match item {
            PlanItem::Embed(e) => Some(e.as_ref()),
            PlanItem::Column { .. } => None,
        })
    }
}

pub(crate) struct Planner<'c, C: Catalog> {
    catalog: &'c C,
    options: &'c CompileOptions,
}

impl<'c, C: Catalog> Planner<'c, C> {
    pub fn new(catalog: &'c C, options: &'c CompileOptions) -> Self {
        Self { catalog, options }
    }

    pub fn plan_root(&self, table: &str, body: &Selection) -> Result<PlanNode<'c>> {
        let table = self.catalog.require_table(table)?;
        self.plan_node(table, body, 0)
    }

    fn plan_node(
        &self,
        table: &'c TableMetadata,
        body: &Selection,
        depth: usize,
    ) -> Result<PlanNode<'c>> {
        let mut items: Vec<PlanItem<'c>> = Vec::new();

        let star;
        let selected: &[SelectItem] = if body.items.is_empty() {
            star = [SelectItem::Star];
            &star
        } else {
            &body.items
        };

        for item in selected {
            match item {
                SelectItem::Star => {
                    for column in &table.columns {
                        push_column(&mut items, column.name.to_string(), column)?;
                    }
                }
                SelectItem::Column(col) => {
                    let column = table.require_column(&col.name)?;
                    push_column(&mut items, col.output_key().to_string(), column)?;
                }
                SelectItem::Embed(embed) => {
                    let planned = self.plan_embed(table, embed, depth + 1)?;
                    if has_key(&items, &planned.key) {
                        return Err(Error::InvalidRequest(format!(
                            "duplicate output key \"{}\" on \"{}\"",
                            planned.key, table.name
                        )));
                    }
                    items.push(PlanItem::Embed(Box::new(planned)));
                }
            }
        }

        let filters = body
            .filters
            .iter()
            .map(|f| plan_filter(table, f))
            .collect::<Result<Vec<_>>>()?;

        let order = body
            .order
            .iter()
            .map(|term| {
                Ok(PlanOrder {
                    column: table.require_column(&term.column)?,
                    descending: term.descending,
                    nulls: term.nulls,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PlanNode {
            table,
            items,
            filters,
            order,
            limit: body.limit,
            offset: body.offset,
        })
    }

    fn plan_embed(
        &self,
        parent: &'c TableMetadata,
        embed: &EmbedNode,
        depth: usize,
    ) -> Result<PlanEmbed<'c>> {
        if depth > self.options.max_embed_depth {
            return Err(Error::InvalidRequest(format!(
                "embedding \"{}\" exceeds the maximum depth of {}",
                embed.name, self.options.max_embed_depth
            )));
        }

        let relationship =
            relation::resolve(self.catalog, &parent.name, &embed.name, embed.hint.as_deref())?;
        let target = self.catalog.require_table(relationship.target_table())?;
        let node = self.plan_node(target, &embed.body, depth)?;

        let required = match embed.join {
            EmbedJoin::Inner => true,
            EmbedJoin::Left => false,
            EmbedJoin::Default => self.options.embed_filter == EmbedFilterMode::Require,
        };

        Ok(PlanEmbed {
            key: embed.output_key().to_string(),
            relationship,
            required,
            node,
        })
    }
}

fn has_key(items: &[PlanItem<'_>], key: &str) -> bool {
    items.iter().any(|item| match item {
        PlanItem::Column { key: k, .. } => k == key,
        PlanItem::Embed(e) => e.key == key,
    })
}

/// Adds a column, skipping exact repeats (`*,name`) and rejecting clashes.
fn push_column<'c>(
    items: &mut Vec<PlanItem<'c>>,
    key: String,
    column: &'c ColumnMetadata,
) -> Result<()> {
    for item in items.iter() {
        match item {
            PlanItem::Column { key: k, column: c } if *k == key => {
                if c.name == column.name {
                    return Ok(());
                }
                return Err(Error::InvalidRequest(format!("duplicate output key \"{key}\"")));
            }
            PlanItem::Embed(e) if e.key == key => {
                return Err(Error::InvalidRequest(format!("duplicate output key \"{key}\"")));
            }
            _ => {}
        }
    }
    items.push(PlanItem::Column { key, column });
    Ok(())
}

fn plan_filter<'c>(table: &'c TableMetadata, filter: &FilterClause) -> Result<PlanFilter<'c>> {
    let column = table.require_column(&filter.column)?;

    match filter.op.arity() {
        Some(n) if filter.values.len() != n => {
            return Err(Error::invalid_filter(
                &filter.column,
                format!(
                    "operator {} takes {n} value(s), got {}",
                    filter.op.as_str(),
                    filter.values.len()
                ),
            ));
        }
        _ => {}
    }

    let values = match filter.op {
        FilterOp::Like | FilterOp::ILike => {
            for value in &filter.values {
                if value.as_text().is_none() {
                    return Err(Error::invalid_filter(
                        &filter.column,
                        format!("{} requires a text pattern, got {value}", filter.op.as_str()),
                    ));
                }
            }
            filter.values.clone()
        }
        _ => filter
            .values
            .iter()
            .map(|v| coerce(column, v))
            .collect::<Result<Vec<_>>>()?,
    };

    Ok(PlanFilter {
        column,
        op: filter.op,
        negated: filter.negated,
        values,
    })
}

/// Converts a filter value to the column's affinity.
fn coerce(column: &ColumnMetadata, value: &SqlValue) -> Result<SqlValue> {
    let affinity = column.affinity();
    match value {
        SqlValue::Text(text) if affinity.is_numeric() => {
            let trimmed = text.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Ok(SqlValue::Integer(i))
            } else if let Some(r) = trimmed.parse::<f64>().ok().filter(|r| r.is_finite()) {
                Ok(SqlValue::Real(r))
            } else {
                Err(Error::invalid_filter(
                    &column.name,
                    format!(
                        "invalid input syntax for type {}: \"{text}\"",
                        column.declared_type.to_ascii_lowercase()
                    ),
                ))
            }
        }
        SqlValue::Text(text) if affinity == Affinity::Blob => {
            Ok(text
                .strip_prefix("\\x")
                .and_then(decode_hex)
                .map_or_else(|| value.clone(), SqlValue::Blob))
        }
        SqlValue::Blob(_) if affinity.is_numeric() => Err(Error::invalid_filter(
            &column.name,
            "binary value compared with a numeric column",
        )),
        other => Ok(other.clone()),
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}
