//! Result shaping.
//!
//! Turns the flat rows of a compiled query back into the nesting the
//! selection asked for. Pure: the same rows and descriptor always give the
//! same values.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::relation::Cardinality;
use crate::value::{RowSet, SqlValue};

/// How to rebuild one object from a flat row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShapeNode {
    pub fields: Vec<ShapeField>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeField {
    /// Scalar column at `index`
    Column { key: String, index: usize },
    /// To-one embed joined into the row; `null` when `marker` is NULL
    Joined {
        key: String,
        marker: usize,
        node: ShapeNode,
    },
    /// Embed aggregated to JSON text at `index`
    Aggregate {
        key: String,
        index: usize,
        cardinality: Cardinality,
    },
}

impl ShapeField {
    pub fn key(&self) -> &str {
        match self {
            Self::Column { key, .. } | Self::Joined { key, .. } | Self::Aggregate { key, .. } => {
                key
            }
        }
    }
}

/// Shape of a whole compiled query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShapeDescriptor {
    pub root: ShapeNode,
    /// Number of columns the statement returns
    pub width: usize,
}

/// Rebuilds nested JSON objects from `rows`.
pub fn shape(rows: &RowSet, descriptor: &ShapeDescriptor) -> Result<Vec<Value>> {
    rows.rows
        .iter()
        .map(|row| {
            if row.len() < descriptor.width {
                return Err(Error::Decode {
                    key: String::new(),
                    message: format!(
                        "row has {} columns, expected {}",
                        row.len(),
                        descriptor.width
                    ),
                });
            }
            shape_node(row, &descriptor.root).map(Value::Object)
        })
        .collect()
}

fn shape_node(row: &[SqlValue], node: &ShapeNode) -> Result<Map<String, Value>> {
    let mut object = Map::with_capacity(node.fields.len());
    for field in &node.fields {
        let value = match field {
            ShapeField::Column { index, .. } => row[*index].to_json(),
            ShapeField::Joined { marker, node, .. } => {
                if row[*marker].is_null() {
                    Value::Null
                } else {
                    Value::Object(shape_node(row, node)?)
                }
            }
            ShapeField::Aggregate {
                key,
                index,
                cardinality,
            } => decode_aggregate(key, &row[*index], *cardinality)?,
        };
        object.insert(field.key().to_string(), value);
    }
    Ok(object)
}

fn decode_aggregate(key: &str, value: &SqlValue, cardinality: Cardinality) -> Result<Value> {
    match value {
        SqlValue::Null => Ok(match cardinality {
            Cardinality::Many => Value::Array(Vec::new()),
            Cardinality::One => Value::Null,
        }),
        SqlValue::Text(text) => serde_json::from_str(text).map_err(|e| Error::Decode {
            key: key.to_string(),
            message: e.to_string(),
        }),
        other => Err(Error::Decode {
            key: key.to_string(),
            message: format!("expected JSON text, got {other}"),
        }),
    }
}
