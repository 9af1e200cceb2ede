//! Request tree: what to select, from where, filtered how.
//!
//! A [`SelectionNode`] names the root table and carries a [`Selection`] body.
//! Embedded resources are [`EmbedNode`]s inside the body, each with its own
//! body, so filters, ordering and pagination can be attached at any depth.

use crate::value::SqlValue;

/// Root of a resource request.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionNode {
    pub table: String,
    pub body: Selection,
}

/// Items, filters and modifiers scoped to one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub items: Vec<SelectItem>,
    pub filters: Vec<FilterClause>,
    pub order: Vec<OrderTerm>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`: every column of the table, in catalog order
    Star,
    Column(ColumnRef),
    Embed(EmbedNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub name: String,
    pub alias: Option<String>,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    /// Key used in the shaped output.
    pub fn output_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Whether an embed may remove parent rows that have no matching related rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmbedJoin {
    /// Follow the compiler's configured [`EmbedFilterMode`](crate::query::EmbedFilterMode)
    #[default]
    Default,
    /// Parents without a matching related row are dropped (`!inner`)
    Inner,
    /// Parents are always kept (`!left`)
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbedNode {
    /// Table name, FK column name or constraint name
    pub name: String,
    pub alias: Option<String>,
    /// Constraint name (or FK column) selecting one of several relationships
    pub hint: Option<String>,
    pub join: EmbedJoin,
    pub body: Selection,
}

impl EmbedNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            hint: None,
            join: EmbedJoin::Default,
            body: Selection::default(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn inner(mut self) -> Self {
        self.join = EmbedJoin::Inner;
        self
    }

    pub fn left(mut self) -> Self {
        self.join = EmbedJoin::Left;
        self
    }

    pub fn output_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

impl SelectionNode {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            body: Selection::default(),
        }
    }
}

/// Builder methods shared by [`SelectionNode`] and [`EmbedNode`].
macro_rules! selection_builder {
    ($ty:ty) => {
        impl $ty {
            pub fn star(mut self) -> Self {
                self.body.items.push(SelectItem::Star);
                self
            }

            pub fn column(mut self, name: impl Into<String>) -> Self {
                self.body.items.push(SelectItem::Column(ColumnRef::new(name)));
                self
            }

            pub fn column_as(mut self, name: impl Into<String>, alias: impl Into<String>) -> Self {
                self.body
                    .items
                    .push(SelectItem::Column(ColumnRef::aliased(name, alias)));
                self
            }

            pub fn columns<I, S>(mut self, names: I) -> Self
            where
                I: IntoIterator<Item = S>,
                S: Into<String>,
            {
                self.body
                    .items
                    .extend(names.into_iter().map(|n| SelectItem::Column(ColumnRef::new(n))));
                self
            }

            pub fn embed(mut self, embed: EmbedNode) -> Self {
                self.body.items.push(SelectItem::Embed(embed));
                self
            }

            pub fn filter(mut self, filter: FilterClause) -> Self {
                self.body.filters.push(filter);
                self
            }

            pub fn order(mut self, term: OrderTerm) -> Self {
                self.body.order.push(term);
                self
            }

            pub fn limit(mut self, limit: u64) -> Self {
                self.body.limit = Some(limit);
                self
            }

            pub fn offset(mut self, offset: u64) -> Self {
                self.body.offset = Some(offset);
                self
            }
        }
    };
}

selection_builder!(SelectionNode);
selection_builder!(EmbedNode);

impl Selection {
    /// Finds a direct embed by its output key.
    pub fn embed_mut(&mut self, key: &str) -> Option<&mut EmbedNode> {
        self.items.iter_mut().find_map(|item| match item {
            SelectItem::Embed(e) if e.output_key() == key => Some(e),
            _ => None,
        })
    }

    pub fn embeds(&self) -> impl Iterator<Item = &EmbedNode> {
        self.items.iter().filter_map(|item| match item {
            SelectItem::Embed(e) => Some(e),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Case-sensitive pattern match
    Like,
    /// Case-insensitive pattern match
    ILike,
    In,
    IsNull,
    IsTrue,
    IsFalse,
}

impl FilterOp {
    /// Surface-syntax operator name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::ILike => "ilike",
            Self::In => "in",
            Self::IsNull => "is.null",
            Self::IsTrue => "is.true",
            Self::IsFalse => "is.false",
        }
    }

    /// Number of values the operator takes; `None` means a list.
    pub const fn arity(self) -> Option<usize> {
        match self {
            Self::In => None,
            Self::IsNull | Self::IsTrue | Self::IsFalse => Some(0),
            _ => Some(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub column: String,
    pub op: FilterOp,
    pub negated: bool,
    pub values: Vec<SqlValue>,
}

impl FilterClause {
    pub fn new(column: impl Into<String>, op: FilterOp, values: Vec<SqlValue>) -> Self {
        Self {
            column: column.into(),
            op,
            negated: false,
            values,
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, FilterOp::Eq, vec![value.into()])
    }

    pub fn neq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, FilterOp::Neq, vec![value.into()])
    }

    pub fn gt(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, FilterOp::Gt, vec![value.into()])
    }

    pub fn gte(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, FilterOp::Gte, vec![value.into()])
    }

    pub fn lt(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, FilterOp::Lt, vec![value.into()])
    }

    pub fn lte(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, FilterOp::Lte, vec![value.into()])
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(column, FilterOp::Like, vec![SqlValue::Text(pattern.into())])
    }

    pub fn ilike(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(column, FilterOp::ILike, vec![SqlValue::Text(pattern.into())])
    }

    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        Self::new(column, FilterOp::In, values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::new(column, FilterOp::IsNull, Vec::new())
    }

    pub fn not(mut self) -> Self {
        self.negated = !self.negated;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub column: String,
    pub descending: bool,
    pub nulls: Option<NullsOrder>,
}

impl OrderTerm {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
            nulls: None,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
            nulls: None,
        }
    }

    pub fn nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = Some(nulls);
        self
    }
}
