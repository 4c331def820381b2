use std::path::Path;

use anyhow::{bail, Context};
use rusqlite::Connection;
use tracing::info;

/// Bumped whenever a subsystem's `init_db` changes shape.
pub const SCHEMA_VERSION: i64 = 1;

/// Open a connection tuned for many writers sharing one file.
pub fn open_connection(path: impl AsRef<Path>, busy_timeout_ms: u64) -> anyhow::Result<Connection> {
    let path = path.as_ref();
    let conn = Connection::open(path)
        .with_context(|| format!("opening database at {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))?;
    Ok(conn)
}

/// Run every subsystem's schema setup (idempotent) and stamp the version.
pub fn prepare_schema(conn: &Connection) -> anyhow::Result<()> {
    let found: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if found > SCHEMA_VERSION {
        bail!("database schema v{found} is newer than this binary (v{SCHEMA_VERSION})");
    }

    rollcall_calendar::db::init_db(conn)?;
    rollcall_timetable::db::init_db(conn)?;
    rollcall_timetable::db::init_directory(conn)?;
    // Sessions tables come first inside the scheduler's init.
    rollcall_scheduler::db::init_db(conn)?;

    if found < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        info!(from = found, to = SCHEMA_VERSION, "schema version stamped");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_connection(dir.path().join("rollcall.db"), 1_000).unwrap();
        prepare_schema(&conn).unwrap();
        prepare_schema(&conn).unwrap();

        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('day_order_config', 'period_slots', 'attendance_sessions', 'materializations')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1).unwrap();
        assert!(prepare_schema(&conn).is_err());
    }
}
