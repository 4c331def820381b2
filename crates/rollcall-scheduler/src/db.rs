use rusqlite::Connection;

use crate::error::Result;

/// Initialise the materialization ledger in `conn`.
///
/// Sessions are written in the same transaction as their ledger row, so the
/// attendance tables are created here too.
pub fn init_db(conn: &Connection) -> Result<()> {
    rollcall_sessions::db::init_db(conn)?;
    conn.execute_batch(
        "
        -- One row per (slot, date): the idempotence guard.
        CREATE TABLE IF NOT EXISTS materializations (
            slot_id     INTEGER NOT NULL,
            date        TEXT    NOT NULL,   -- YYYY-MM-DD
            session_id  TEXT    NOT NULL REFERENCES attendance_sessions(id),
            unit_id     TEXT    NOT NULL,
            created_at  TEXT    NOT NULL,
            UNIQUE (slot_id, date)
        );
        CREATE INDEX IF NOT EXISTS idx_materializations_unit
            ON materializations (unit_id, date);
        ",
    )?;
    Ok(())
}
