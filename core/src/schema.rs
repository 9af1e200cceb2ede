//! Catalog data model: tables, columns and foreign-key edges.

use std::sync::Arc;

use compact_str::CompactString;
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Column list of a key; almost always a single column.
pub type KeyColumns = SmallVec<[CompactString; 2]>;

/// SQLite type affinity, derived from the declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

impl Affinity {
    /// Applies SQLite's affinity rules (section 3.1 of the datatype docs).
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Self::Text
        } else if upper.contains("BLOB") || upper.trim().is_empty() {
            Self::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Self::Real
        } else {
            Self::Numeric
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Real | Self::Numeric)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    pub name: CompactString,
    pub declared_type: CompactString,
    pub nullable: bool,
    pub primary_key: bool,
    pub ordinal: usize,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<CompactString>, declared_type: impl Into<CompactString>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            nullable: true,
            primary_key: false,
            ordinal: 0,
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn affinity(&self) -> Affinity {
        Affinity::from_declared(&self.declared_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    pub name: CompactString,
    pub is_view: bool,
    pub columns: Vec<ColumnMetadata>,
    /// Primary key first (when present), then unique indexes.
    pub unique_keys: Vec<KeyColumns>,
}

impl TableMetadata {
    /// Builds a table, deriving the primary key from the column flags.
    pub fn new(name: impl Into<CompactString>, columns: Vec<ColumnMetadata>) -> Self {
        let mut columns = columns;
        for (i, c) in columns.iter_mut().enumerate() {
            c.ordinal = i;
        }
        let pk: KeyColumns = columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        let unique_keys = if pk.is_empty() { Vec::new() } else { vec![pk] };
        Self {
            name: name.into(),
            is_view: false,
            columns,
            unique_keys,
        }
    }

    pub fn with_unique<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>,
    {
        self.unique_keys.push(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column lookup that reports [`Error::ColumnNotFound`].
    pub fn require_column(&self, name: &str) -> Result<&ColumnMetadata> {
        self.column(name).ok_or_else(|| Error::ColumnNotFound {
            table: self.name.to_string(),
            column: name.to_string(),
        })
    }

    pub fn primary_key(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    /// Whether `columns` (in any order) are exactly one of the unique keys.
    pub fn is_unique_key(&self, columns: &[CompactString]) -> bool {
        self.unique_keys.iter().any(|key| {
            key.len() == columns.len() && key.iter().all(|k| columns.contains(k))
        })
    }
}

/// A directed foreign key: `source_table(source_columns)` references
/// `target_table(target_columns)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKeyEdge {
    pub constraint_name: CompactString,
    pub source_table: CompactString,
    pub source_columns: KeyColumns,
    pub target_table: CompactString,
    pub target_columns: KeyColumns,
}

impl ForeignKeyEdge {
    pub fn new<S, T>(
        constraint_name: &str,
        source_table: &str,
        source_columns: S,
        target_table: &str,
        target_columns: T,
    ) -> Self
    where
        S: IntoIterator,
        S::Item: Into<CompactString>,
        T: IntoIterator,
        T::Item: Into<CompactString>,
    {
        Self {
            constraint_name: constraint_name.into(),
            source_table: source_table.into(),
            source_columns: source_columns.into_iter().map(Into::into).collect(),
            target_table: target_table.into(),
            target_columns: target_columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_self_referencing(&self) -> bool {
        self.source_table == self.target_table
    }

    pub fn touches(&self, table: &str) -> bool {
        self.source_table == table || self.target_table == table
    }

    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.source_table == a && self.target_table == b)
            || (self.source_table == b && self.target_table == a)
    }
}

/// Read access to table and relationship metadata.
pub trait Catalog {
    fn table(&self, name: &str) -> Option<&TableMetadata>;

    /// Every edge between `a` and `b`, in either direction, ordered by
    /// constraint name.
    fn foreign_keys(&self, a: &str, b: &str) -> Vec<&ForeignKeyEdge>;

    /// Every edge with `table` on either side, ordered by constraint name.
    fn edges_of(&self, table: &str) -> Vec<&ForeignKeyEdge>;

    fn require_table(&self, name: &str) -> Result<&TableMetadata> {
        self.table(name).ok_or_else(|| Error::TableNotFound {
            table: name.to_string(),
        })
    }
}

/// Immutable view of the whole catalog at one schema version.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    version: i64,
    tables: HashMap<CompactString, Arc<TableMetadata>>,
    edges: Vec<ForeignKeyEdge>,
}

impl SchemaSnapshot {
    pub fn new(version: i64) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn with_table(mut self, table: TableMetadata) -> Self {
        self.add_table(table);
        self
    }

    pub fn with_edge(mut self, edge: ForeignKeyEdge) -> Self {
        self.add_edge(edge);
        self
    }

    pub fn add_table(&mut self, table: TableMetadata) {
        self.tables.insert(table.name.clone(), Arc::new(table));
    }

    pub fn add_edge(&mut self, edge: ForeignKeyEdge) {
        let pos = self
            .edges
            .partition_point(|e| e.constraint_name <= edge.constraint_name);
        self.edges.insert(pos, edge);
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn table_arc(&self, name: &str) -> Option<Arc<TableMetadata>> {
        self.tables.get(name).cloned()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableMetadata> {
        self.tables.values().map(|t| t.as_ref())
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn edges(&self) -> &[ForeignKeyEdge] {
        &self.edges
    }
}

impl Catalog for SchemaSnapshot {
    fn table(&self, name: &str) -> Option<&TableMetadata> {
        self.tables.get(name).map(|t| t.as_ref())
    }

    fn foreign_keys(&self, a: &str, b: &str) -> Vec<&ForeignKeyEdge> {
        self.edges.iter().filter(|e| e.connects(a, b)).collect()
    }

    fn edges_of(&self, table: &str) -> Vec<&ForeignKeyEdge> {
        self.edges.iter().filter(|e| e.touches(table)).collect()
    }
}

impl<C: Catalog + ?Sized> Catalog for &C {
    fn table(&self, name: &str) -> Option<&TableMetadata> {
        (**self).table(name)
    }

    fn foreign_keys(&self, a: &str, b: &str) -> Vec<&ForeignKeyEdge> {
        (**self).foreign_keys(a, b)
    }

    fn edges_of(&self, table: &str) -> Vec<&ForeignKeyEdge> {
        (**self).edges_of(table)
    }
}

impl<C: Catalog + ?Sized> Catalog for Arc<C> {
    fn table(&self, name: &str) -> Option<&TableMetadata> {
        (**self).table(name)
    }

    fn foreign_keys(&self, a: &str, b: &str) -> Vec<&ForeignKeyEdge> {
        (**self).foreign_keys(a, b)
    }

    fn edges_of(&self, table: &str) -> Vec<&ForeignKeyEdge> {
        (**self).edges_of(table)
    }
}
