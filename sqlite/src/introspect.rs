//! SQLite catalog introspection
//!
//! Reads tables, views, columns, unique indexes and foreign keys through
//! read-only catalog queries and turns them into a [`SchemaSnapshot`].
//! SQLite does not keep foreign-key constraint names, so they are recovered
//! from `CONSTRAINT <name>` clauses in the stored DDL when present.

use hashbrown::HashMap;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take, take_until, take_while1},
    character::complete::{char, multispace1, not_line_ending},
    combinator::{map, value},
    multi::many0,
    sequence::{delimited, preceded},
};
use rusqlite::Connection;
use sqlrest_core::{ColumnMetadata, ForeignKeyEdge, KeyColumns, Result, SchemaSnapshot, TableMetadata};

/// Raw object from `sqlite_master`
#[derive(Debug, Clone)]
pub struct RawObject {
    pub name: String,
    pub is_view: bool,
    pub sql: Option<String>,
}

/// Raw column info from `pragma_table_info`
#[derive(Debug, Clone)]
pub struct RawColumnInfo {
    pub cid: i64,
    pub name: String,
    pub column_type: String,
    pub not_null: bool,
    /// 1-based position in the primary key, 0 when not part of it
    pub pk: i64,
}

/// Raw index info from `pragma_index_list` + `pragma_index_info`
#[derive(Debug, Clone)]
pub struct RawIndexInfo {
    pub name: String,
    pub unique: bool,
    /// `c` for CREATE INDEX, `u` for UNIQUE, `pk` for PRIMARY KEY
    pub origin: String,
    pub partial: bool,
    /// `None` for expression columns
    pub columns: Vec<Option<String>>,
}

/// Raw foreign key info from `pragma_foreign_key_list`
#[derive(Debug, Clone)]
pub struct RawForeignKey {
    pub table: String,
    pub id: i64,
    pub seq: i64,
    pub to_table: String,
    pub from_column: String,
    /// `None` when the DDL references the parent's primary key implicitly
    pub to_column: Option<String>,
}

/// SQL queries for SQLite introspection
pub mod queries {
    /// Tables and views, internal objects excluded
    pub const OBJECTS_QUERY: &str = r#"
        SELECT name, type = 'view', sql
        FROM sqlite_master
        WHERE type IN ('table', 'view')
          AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
        ORDER BY name
    "#;

    pub const COLUMNS_QUERY: &str = r#"
        SELECT cid, name, type, "notnull", pk
        FROM pragma_table_info(?1)
        ORDER BY cid
    "#;

    pub const INDEXES_QUERY: &str = r#"
        SELECT name, "unique", origin, partial
        FROM pragma_index_list(?1)
        ORDER BY name
    "#;

    pub const INDEX_COLUMNS_QUERY: &str = r#"
        SELECT name
        FROM pragma_index_info(?1)
        ORDER BY seqno
    "#;

    pub const FOREIGN_KEYS_QUERY: &str = r#"
        SELECT id, seq, "table", "from", "to"
        FROM pragma_foreign_key_list(?1)
        ORDER BY id, seq
    "#;

    pub const SCHEMA_VERSION_QUERY: &str = "PRAGMA schema_version";
}

/// Current schema cookie; bumped by every DDL statement on any connection.
pub fn schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(queries::SCHEMA_VERSION_QUERY, [], |row| row.get(0))?)
}

/// Reads the whole catalog into a snapshot.
pub fn load_snapshot(conn: &Connection) -> Result<SchemaSnapshot> {
    let version = schema_version(conn)?;

    let objects = {
        let mut stmt = conn.prepare_cached(queries::OBJECTS_QUERY)?;
        let rows = stmt.query_map([], |row| {
            Ok(RawObject {
                name: row.get(0)?,
                is_view: row.get(1)?,
                sql: row.get(2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut tables: HashMap<String, TableMetadata> = HashMap::with_capacity(objects.len());
    let mut raw_fks = Vec::new();
    let mut ddl = HashMap::new();

    for object in &objects {
        let columns = read_columns(conn, &object.name)?;
        let mut table = TableMetadata::new(object.name.as_str(), process_columns(&columns));
        table.is_view = object.is_view;

        if !object.is_view {
            for key in process_unique_indexes(&read_indexes(conn, &object.name)?) {
                table.unique_keys.push(key);
            }
            raw_fks.extend(read_foreign_keys(conn, &object.name)?);
            if let Some(sql) = &object.sql {
                ddl.insert(object.name.clone(), sql.clone());
            }
        }
        tables.insert(object.name.clone(), table);
    }

    let edges = process_foreign_keys(&raw_fks, &tables, &ddl);

    let mut snapshot = SchemaSnapshot::new(version);
    for (_, table) in tables {
        snapshot.add_table(table);
    }
    for edge in edges {
        snapshot.add_edge(edge);
    }
    Ok(snapshot)
}

fn read_columns(conn: &Connection, table: &str) -> Result<Vec<RawColumnInfo>> {
    let mut stmt = conn.prepare_cached(queries::COLUMNS_QUERY)?;
    let rows = stmt.query_map([table], |row| {
        Ok(RawColumnInfo {
            cid: row.get(0)?,
            name: row.get(1)?,
            column_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            not_null: row.get(3)?,
            pk: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn read_indexes(conn: &Connection, table: &str) -> Result<Vec<RawIndexInfo>> {
    let mut list = conn.prepare_cached(queries::INDEXES_QUERY)?;
    let indexes = list
        .query_map([table], |row| {
            Ok(RawIndexInfo {
                name: row.get(0)?,
                unique: row.get(1)?,
                origin: row.get(2)?,
                partial: row.get(3)?,
                columns: Vec::new(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut info = conn.prepare_cached(queries::INDEX_COLUMNS_QUERY)?;
    let mut out = Vec::with_capacity(indexes.len());
    for mut index in indexes {
        index.columns = info
            .query_map([&index.name], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.push(index);
    }
    Ok(out)
}

fn read_foreign_keys(conn: &Connection, table: &str) -> Result<Vec<RawForeignKey>> {
    let mut stmt = conn.prepare_cached(queries::FOREIGN_KEYS_QUERY)?;
    let rows = stmt.query_map([table], |row| {
        Ok(RawForeignKey {
            table: table.to_string(),
            id: row.get(0)?,
            seq: row.get(1)?,
            to_table: row.get(2)?,
            from_column: row.get(3)?,
            to_column: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Process raw column info into column metadata
pub fn process_columns(raw: &[RawColumnInfo]) -> Vec<ColumnMetadata> {
    let mut sorted: Vec<&RawColumnInfo> = raw.iter().collect();
    sorted.sort_by_key(|c| c.cid);
    sorted
        .into_iter()
        .map(|c| {
            let mut column = ColumnMetadata::new(c.name.as_str(), c.column_type.as_str());
            if c.pk > 0 {
                column = column.primary();
            } else if c.not_null {
                column = column.not_null();
            }
            column
        })
        .collect()
}

/// Unique keys backed by full (non-partial, non-expression) unique indexes.
/// The primary key index is skipped; the table already carries it.
pub fn process_unique_indexes(raw: &[RawIndexInfo]) -> Vec<KeyColumns> {
    raw.iter()
        .filter(|idx| idx.unique && !idx.partial && idx.origin != "pk")
        .filter_map(|idx| {
            idx.columns
                .iter()
                .map(|c| c.as_deref().map(Into::into))
                .collect::<Option<KeyColumns>>()
        })
        .filter(|key| !key.is_empty())
        .collect()
}

/// Groups raw foreign-key rows into named edges.
///
/// Rows are grouped by `(table, id)` and ordered by `seq`. Implicit target
/// columns resolve to the referenced table's primary key; edges whose target
/// table does not exist are dropped.
pub fn process_foreign_keys(
    raw_fks: &[RawForeignKey],
    tables: &HashMap<String, TableMetadata>,
    ddl: &HashMap<String, String>,
) -> Vec<ForeignKeyEdge> {
    let mut grouped: HashMap<(&str, i64), Vec<&RawForeignKey>> = HashMap::new();
    for fk in raw_fks {
        grouped.entry((fk.table.as_str(), fk.id)).or_default().push(fk);
    }

    let mut named: HashMap<&str, Vec<NamedForeignKey>> = HashMap::new();
    let mut edges = Vec::with_capacity(grouped.len());

    for ((table, _id), mut fks) in grouped {
        fks.sort_by_key(|f| f.seq);
        let Some(first) = fks.first() else {
            continue;
        };
        let Some(target) = tables.get(&first.to_table) else {
            continue;
        };

        let from: Vec<&str> = fks.iter().map(|f| f.from_column.as_str()).collect();
        let to: Vec<String> = if fks.iter().all(|f| f.to_column.is_some()) {
            fks.iter()
                .filter_map(|f| f.to_column.clone())
                .collect()
        } else {
            target.primary_key().map(|c| c.name.to_string()).collect()
        };
        if to.len() != from.len() {
            continue;
        }

        let parsed = named
            .entry(table)
            .or_insert_with(|| ddl.get(table).map(|sql| parse_fk_constraint_names(sql)).unwrap_or_default());
        let name = parsed
            .iter()
            .find(|n| same_columns(&n.columns, &from))
            .map(|n| n.name.clone())
            .unwrap_or_else(|| default_fk_name(table, &from));

        edges.push(ForeignKeyEdge::new(
            &name,
            table,
            from.iter().copied(),
            target.name.as_str(),
            to,
        ));
    }

    edges
}

fn same_columns(a: &[String], b: &[&str]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

/// PostgreSQL's naming convention: `<table>_<col>[_<col>]_fkey`
pub fn default_fk_name(table: &str, columns: &[&str]) -> String {
    format!("{table}_{}_fkey", columns.join("_"))
}

// =============================================================================
// DDL constraint names
// =============================================================================

/// A foreign key named by a `CONSTRAINT` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedForeignKey {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(&'a str),
    Open,
    Close,
    Comma,
    Other,
}

impl<'a> Token<'a> {
    fn ident(self) -> Option<&'a str> {
        match self {
            Token::Word(w) | Token::Quoted(w) => Some(w),
            _ => None,
        }
    }

    fn is_keyword(self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

/// Whitespace and comments
fn trivia(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), preceded(tag("--"), not_line_ending)),
            value((), delimited(tag("/*"), take_until("*/"), tag("*/"))),
        ))),
    )
    .parse(input)
}

fn token(input: &str) -> IResult<&str, Token<'_>> {
    preceded(
        trivia,
        alt((
            map(delimited(char('"'), take_until("\""), char('"')), Token::Quoted),
            map(delimited(char('`'), take_until("`"), char('`')), Token::Quoted),
            map(delimited(char('['), take_until("]"), char(']')), Token::Quoted),
            value(Token::Other, delimited(char('\''), take_until("'"), char('\''))),
            value(Token::Open, char('(')),
            value(Token::Close, char(')')),
            value(Token::Comma, char(',')),
            map(
                take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '$'),
                Token::Word,
            ),
            value(Token::Other, take(1usize)),
        )),
    )
    .parse(input)
}

fn tokenize(sql: &str) -> Vec<Token<'_>> {
    match many0(token).parse(sql) {
        Ok((_, tokens)) => tokens,
        Err(_) => Vec::new(),
    }
}

/// Splits the body of `CREATE TABLE name (...)` into its top-level definitions.
fn table_definitions<'t, 'a>(tokens: &'t [Token<'a>]) -> Vec<&'t [Token<'a>]> {
    let Some(open) = tokens.iter().position(|t| *t == Token::Open) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = open + 1;
    for (i, tok) in tokens.iter().enumerate().skip(open + 1) {
        match tok {
            Token::Open => depth += 1,
            Token::Close if depth == 0 => {
                out.push(&tokens[start..i]);
                break;
            }
            Token::Close => depth -= 1,
            Token::Comma if depth == 0 => {
                out.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out
}

/// Extracts named foreign keys from a `CREATE TABLE` statement, both the
/// table form (`CONSTRAINT n FOREIGN KEY (a, b) REFERENCES ...`) and the column
/// form (`a INTEGER CONSTRAINT n REFERENCES ...`).
pub fn parse_fk_constraint_names(sql: &str) -> Vec<NamedForeignKey> {
    let tokens = tokenize(sql);
    let mut out = Vec::new();

    for def in table_definitions(&tokens) {
        let Some(first) = def.first() else {
            continue;
        };

        if first.is_keyword("CONSTRAINT") {
            let name = def.get(1).and_then(|t| t.ident());
            let is_fk = def.get(2).is_some_and(|t| t.is_keyword("FOREIGN"))
                && def.get(3).is_some_and(|t| t.is_keyword("KEY"))
                && def.get(4) == Some(&Token::Open);
            if let (Some(name), true) = (name, is_fk) {
                let columns = def[5..]
                    .iter()
                    .take_while(|t| **t != Token::Close)
                    .filter_map(|t| t.ident())
                    .map(str::to_string)
                    .collect();
                out.push(NamedForeignKey {
                    name: name.to_string(),
                    columns,
                });
            }
            continue;
        }

        let table_constraint = ["PRIMARY", "UNIQUE", "CHECK", "FOREIGN"]
            .iter()
            .any(|k| first.is_keyword(k));
        if table_constraint {
            continue;
        }

        let Some(column) = first.ident() else {
            continue;
        };
        for window in def.windows(3) {
            if window[0].is_keyword("CONSTRAINT") && window[2].is_keyword("REFERENCES") {
                if let Some(name) = window[1].ident() {
                    out.push(NamedForeignKey {
                        name: name.to_string(),
                        columns: vec![column.to_string()],
                    });
                }
            }
        }
    }

    out
}
