use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn describe_schema(connection: &Connection, schema_path: Option<&Path>) -> Result<String> {
    if let Some(path) = schema_path {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read schema file {}", path.display()))?;
        return Ok(text.trim().to_string());
    }

    let mut statement = connection
        .prepare(
            "
            SELECT sql
            FROM sqlite_master
            WHERE type IN ('table', 'view')
              AND name NOT LIKE 'sqlite_%'
              AND sql IS NOT NULL
            ORDER BY type ASC, name ASC
            ",
        )
        .context("failed to prepare schema query")?;
    let statements = statement
        .query_map([], |row| row.get::<_, String>(0))
        .context("failed to query sqlite_master")?
        .collect::<std::result::Result<Vec<String>, _>>()
        .context("failed to read schema rows")?;

    let mut out = Vec::<String>::with_capacity(statements.len());
    for sql in statements {
        let trimmed = sql.trim().trim_end_matches(';').trim();
        out.push(format!("{trimmed};"));
    }
    Ok(out.join("\n\n"))
}
