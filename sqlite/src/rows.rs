use rusqlite::{Connection, params_from_iter};
use sqlrest_core::{Result, RowSet, SqlValue};

/// Runs one statement and collects every row it returns.
pub fn query_rowset(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<RowSet> {
    let mut stmt = conn.prepare_cached(sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let width = columns.len();
    let readonly = stmt.readonly();

    let mut out = Vec::new();
    let mut rows = stmt.query(params_from_iter(params))?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get::<_, SqlValue>(i)?);
        }
        out.push(values);
    }
    drop(rows);

    let changes = if readonly { 0 } else { conn.changes() };
    Ok(RowSet {
        columns,
        rows: out,
        changes,
    })
}
