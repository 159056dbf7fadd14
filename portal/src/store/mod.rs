//! Storage layer: free functions over a rusqlite connection, grouped by
//! entity. Handlers run these through `db::execute_async`.

pub mod clusters;
pub mod nodes;
pub mod provisions;

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[cfg(test)]
pub(crate) mod testing {
    use rusqlite::Connection;

    /// Fresh in-memory database with migrations applied.
    pub fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        crate::db::run_migrations(&conn).expect("run migrations");
        conn
    }
}
