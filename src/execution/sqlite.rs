use std::time::Instant;

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::model::{CellValue, ColumnMeta, ExecutionResult, StorageClass};

use super::{QueryExecutor, ReadPool};

pub const DEFAULT_PREVIEW_LIMIT: usize = 10_000;

pub struct SqliteExecutor {
    pool: ReadPool,
    preview_limit: usize,
}

impl SqliteExecutor {
    pub fn new(pool: ReadPool, preview_limit: usize) -> Self {
        Self {
            pool,
            preview_limit: preview_limit.max(1),
        }
    }
}

impl QueryExecutor for SqliteExecutor {
    fn execute(&self, sql: &str) -> ExecutionResult {
        let started = Instant::now();
        let outcome = self
            .pool
            .with_conn(|connection| run_query(connection, sql, self.preview_limit));
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(Ok((columns, rows, row_count))) => {
                debug!(row_count, duration_ms, "query executed");
                ExecutionResult::succeeded(columns, rows, row_count, duration_ms)
            }
            Ok(Err(err)) => {
                debug!(error = %err, duration_ms, "query failed");
                ExecutionResult::failed(err.to_string(), duration_ms)
            }
            Err(err) => {
                warn!(error = %err, "read pool unavailable");
                ExecutionResult::failed(err.to_string(), duration_ms)
            }
        }
    }
}

type QueryRows = (Vec<ColumnMeta>, Vec<Vec<CellValue>>, usize);

fn run_query(
    connection: &Connection,
    sql: &str,
    preview_limit: usize,
) -> Result<QueryRows, rusqlite::Error> {
    let mut statement = connection.prepare(sql)?;
    let declared = statement
        .columns()
        .iter()
        .map(|column| {
            (
                column.name().to_string(),
                column.decl_type().map(str::to_string),
            )
        })
        .collect::<Vec<(String, Option<String>)>>();

    let mut storage = vec![StorageClass::Empty; declared.len()];
    let mut out = Vec::<Vec<CellValue>>::new();
    let mut row_count = 0usize;

    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::<CellValue>::with_capacity(declared.len());
        for (index, class) in storage.iter_mut().enumerate() {
            let value = CellValue::from(row.get_ref(index)?);
            *class = class.observe(&value);
            values.push(value);
        }
        row_count += 1;
        if out.len() < preview_limit {
            out.push(values);
        }
    }

    let columns = declared
        .into_iter()
        .zip(storage)
        .map(|((name, declared_type), class)| ColumnMeta::new(name, declared_type.as_deref(), class))
        .collect::<Vec<ColumnMeta>>();
    Ok((columns, out, row_count))
}
