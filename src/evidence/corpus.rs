use rusqlite::Connection;
use rusqlite::types::ValueRef;
use tracing::info;

use crate::model::{CellValue, IndexedRow, RowField, TableRowCount};

use super::IndexError;

#[derive(Debug, Clone, Default)]
pub struct CorpusRows {
    pub rows: Vec<IndexedRow>,
    pub tables: Vec<TableRowCount>,
}

pub fn list_user_tables(connection: &Connection) -> Result<Vec<String>, IndexError> {
    let mut statement = connection.prepare(
        "
        SELECT name
        FROM sqlite_master
        WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
        ORDER BY name ASC
        ",
    )?;
    let names = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

pub fn load_corpus_rows(
    connection: &Connection,
    table_filter: &[String],
) -> Result<CorpusRows, IndexError> {
    let tables = list_user_tables(connection)?
        .into_iter()
        .filter(|table| table_filter.is_empty() || table_filter.iter().any(|name| name == table))
        .collect::<Vec<String>>();

    let mut out = CorpusRows::default();
    for table in tables {
        let rows = load_table_rows(connection, &table)?;
        info!(table = %table, rows = rows.len(), "corpus table read");
        out.tables.push(TableRowCount {
            table: table.clone(),
            rows_read: rows.len(),
            rows_embedded: 0,
        });
        out.rows.extend(rows);
    }
    Ok(out)
}

fn load_table_rows(connection: &Connection, table: &str) -> Result<Vec<IndexedRow>, IndexError> {
    let sql = format!("SELECT * FROM {}", quote_identifier(table));
    let mut statement = connection.prepare(&sql)?;
    let column_names = statement
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<String>>();

    let mut rows = statement.query([])?;
    let mut out = Vec::<IndexedRow>::new();
    while let Some(row) = rows.next()? {
        let mut field_values = Vec::<RowField>::with_capacity(column_names.len());
        for (index, name) in column_names.iter().enumerate() {
            let value = row.get_ref(index)?;
            if matches!(value, ValueRef::Blob(_)) {
                continue;
            }
            field_values.push(RowField {
                name: name.clone(),
                value: CellValue::from(value),
            });
        }
        out.push(IndexedRow {
            source_table: table.to_string(),
            field_values,
        });
    }
    Ok(out)
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
