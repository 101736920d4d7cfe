use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use rusqlite::{Connection, OpenFlags};

use super::ExecutionError;

pub const DEFAULT_POOL_SIZE: usize = 4;
pub const MAX_POOL_SIZE: usize = 8;

pub struct ReadPool {
    path: PathBuf,
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    pub fn open(path: &Path, pool_size: usize) -> Result<Self, ExecutionError> {
        let size = pool_size.clamp(1, MAX_POOL_SIZE);
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let connection = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|source| ExecutionError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            apply_read_pragmas(&connection)?;
            connections.push(Mutex::new(connection));
        }

        Ok(Self {
            path: path.to_path_buf(),
            connections,
            next: AtomicUsize::new(0),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ExecutionError>
    where
        F: FnOnce(&Connection) -> T,
    {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        let guard = self.connections[index]
            .lock()
            .map_err(|err| ExecutionError::Poisoned(err.to_string()))?;
        Ok(f(&guard))
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn apply_read_pragmas(connection: &Connection) -> Result<(), ExecutionError> {
    connection
        .execute_batch(
            "
            PRAGMA busy_timeout = 5000;
            PRAGMA query_only = ON;
            ",
        )
        .map_err(ExecutionError::Pragma)
}
