mod pool;
mod sqlite;

use std::path::PathBuf;

use crate::model::ExecutionResult;

pub use pool::{DEFAULT_POOL_SIZE, ReadPool};
pub use sqlite::{DEFAULT_PREVIEW_LIMIT, SqliteExecutor};

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to open database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to configure read connection: {0}")]
    Pragma(#[source] rusqlite::Error),

    #[error("read pool lock poisoned: {0}")]
    Poisoned(String),
}

/// Runs a generated query. Failures are reported inside the result, never as `Err`.
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, sql: &str) -> ExecutionResult;
}
