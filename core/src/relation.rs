//! Foreign-key resolution for embedded resources.
//!
//! An embed is backed by exactly one [`ForeignKeyEdge`] walked in one
//! [`Direction`]. When several edges qualify the caller has to name one with a
//! hint; the resolver never picks on its own.

use compact_str::CompactString;

use crate::error::{Error, Result};
use crate::schema::{Catalog, ForeignKeyEdge};

/// Which side of the edge the parent sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Parent holds the foreign key (many-to-one)
    Forward,
    /// Embedded table holds the foreign key (one-to-many, or one-to-one when
    /// the key columns are unique)
    Reverse,
}

/// Number of embedded rows per parent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Object or `null`
    One,
    /// Array, possibly empty
    Many,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub edge: ForeignKeyEdge,
    pub direction: Direction,
    pub cardinality: Cardinality,
}

impl Relationship {
    fn new<C: Catalog>(catalog: &C, edge: &ForeignKeyEdge, direction: Direction) -> Self {
        let cardinality = match direction {
            Direction::Forward => Cardinality::One,
            Direction::Reverse => {
                let unique = catalog
                    .table(&edge.source_table)
                    .is_some_and(|t| t.is_unique_key(&edge.source_columns));
                if unique {
                    Cardinality::One
                } else {
                    Cardinality::Many
                }
            }
        };
        Self {
            edge: edge.clone(),
            direction,
            cardinality,
        }
    }

    /// Table the embed reads from.
    pub fn target_table(&self) -> &str {
        match self.direction {
            Direction::Forward => &self.edge.target_table,
            Direction::Reverse => &self.edge.source_table,
        }
    }

    /// Column pairs `(embed column, parent column)` for the join condition.
    pub fn join_pairs(&self) -> impl Iterator<Item = (&CompactString, &CompactString)> {
        let (embed_cols, parent_cols) = match self.direction {
            Direction::Forward => (&self.edge.target_columns, &self.edge.source_columns),
            Direction::Reverse => (&self.edge.source_columns, &self.edge.target_columns),
        };
        embed_cols.iter().zip(parent_cols.iter())
    }

    pub fn constraint_name(&self) -> &str {
        &self.edge.constraint_name
    }

    fn matches_hint(&self, hint: &str) -> bool {
        self.edge.constraint_name == hint
            || (self.edge.source_columns.len() == 1 && self.edge.source_columns[0] == hint)
    }
}

/// Every relationship between `parent` and the table `embed`, both directions.
fn table_candidates<C: Catalog>(catalog: &C, parent: &str, embed: &str) -> Vec<Relationship> {
    let mut out = Vec::new();
    for edge in catalog.foreign_keys(parent, embed) {
        if edge.source_table == parent && edge.target_table == embed {
            out.push(Relationship::new(catalog, edge, Direction::Forward));
        }
        if edge.target_table == parent && edge.source_table == embed {
            out.push(Relationship::new(catalog, edge, Direction::Reverse));
        }
    }
    out
}

/// Relationships of `parent` addressed by a constraint or FK column name.
fn alias_candidates<C: Catalog>(catalog: &C, parent: &str, name: &str) -> Vec<Relationship> {
    let mut out = Vec::new();
    for edge in catalog.edges_of(parent) {
        let by_column = edge.source_columns.len() == 1 && edge.source_columns[0] == name;
        let by_constraint = edge.constraint_name == name;
        if edge.source_table == parent && (by_column || by_constraint) {
            out.push(Relationship::new(catalog, edge, Direction::Forward));
        } else if edge.target_table == parent && by_constraint {
            out.push(Relationship::new(catalog, edge, Direction::Reverse));
        }
    }
    out
}

/// Every relationship of `parent` in both directions.
fn all_candidates<C: Catalog>(catalog: &C, parent: &str) -> Vec<Relationship> {
    let mut out = Vec::new();
    for edge in catalog.edges_of(parent) {
        if edge.source_table == parent {
            out.push(Relationship::new(catalog, edge, Direction::Forward));
        }
        if edge.target_table == parent {
            out.push(Relationship::new(catalog, edge, Direction::Reverse));
        }
    }
    out
}

/// Resolves the relationship backing the embed `embed_name` under `parent`.
pub fn resolve<C: Catalog>(
    catalog: &C,
    parent: &str,
    embed_name: &str,
    hint: Option<&str>,
) -> Result<Relationship> {
    catalog.require_table(parent)?;

    let by_table = catalog.table(embed_name).is_some();
    let mut candidates = if by_table {
        table_candidates(catalog, parent, embed_name)
    } else {
        let found = alias_candidates(catalog, parent, embed_name);
        if found.is_empty() && hint.is_some() {
            all_candidates(catalog, parent)
        } else {
            found
        }
    };

    if let Some(hint) = hint {
        candidates.retain(|r| r.matches_hint(hint));

        // One self-referencing edge seen from both sides: the table-name form
        // means the children, the column form reaches the parent row.
        if by_table
            && candidates.len() == 2
            && candidates[0].edge == candidates[1].edge
            && candidates[0].edge.is_self_referencing()
        {
            candidates.retain(|r| r.direction == Direction::Reverse);
        }
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(Error::NoRelationshipFound {
            parent: parent.to_string(),
            embed: embed_name.to_string(),
            hint: hint.map(str::to_string),
        }),
        _ => {
            let mut names: Vec<String> = Vec::with_capacity(candidates.len());
            for r in &candidates {
                let name = r.constraint_name().to_string();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            Err(Error::AmbiguousRelationship {
                parent: parent.to_string(),
                embed: embed_name.to_string(),
                candidates: names,
            })
        }
    }
}
