//! Database layout for [`SqliteStore`](crate::sqlite::SqliteStore).
//!
//! One table, `local_storage`, holds string values by string key, the same
//! contract as the browser's local storage. The schema version lives in
//! SQLite's `user_version` and is advanced by `rusqlite_migration`.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::StoreError;

/// How long a write waits for another process holding the file.
const BUSY_TIMEOUT: Duration = Duration::from_millis(500);

/// Where the local store lives.
#[derive(Debug, Clone, Copy)]
pub enum Location<'a> {
    File(&'a Path),
    /// Dropped with the connection.
    Memory,
}

fn local_storage_migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!("migrations/001_local_storage.sql"))])
}

/// Opens the store at `location` and brings `local_storage` up to date.
pub fn open(location: Location<'_>) -> Result<Connection, StoreError> {
    let mut conn = match location {
        Location::File(path) => {
            let conn = Connection::open(path)?;
            // The CLI and a dashboard on the same host may share the file.
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn
        }
        Location::Memory => Connection::open_in_memory()?,
    };
    local_storage_migrations()
        .to_latest(&mut conn)
        .map_err(|e| StoreError::Migration(e.to_string()))?;
    Ok(conn)
}
