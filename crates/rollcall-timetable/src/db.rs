use rusqlite::Connection;

use crate::error::Result;

/// Create the timetable tables. Idempotent.
///
/// `period_slots.id` is the identity the materialization ledger keys on, so
/// rewrites of a day update rows in place instead of re-inserting them.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS period_slots (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            unit_id            TEXT    NOT NULL,
            sub_unit           TEXT    NOT NULL DEFAULT '',
            day_order          INTEGER NOT NULL,
            period_number      INTEGER NOT NULL,
            start_time         TEXT    NOT NULL,   -- HH:MM:SS, institution local
            end_time           TEXT    NOT NULL,
            is_break           INTEGER NOT NULL DEFAULT 0,
            subject            TEXT,
            responsible_party  TEXT,
            updated_at         TEXT    NOT NULL,
            UNIQUE (unit_id, sub_unit, day_order, period_number)
        );
        CREATE INDEX IF NOT EXISTS idx_period_slots_day
            ON period_slots(unit_id, day_order);

        CREATE TABLE IF NOT EXISTS period_definitions (
            unit_id        TEXT    NOT NULL,
            period_number  INTEGER NOT NULL,
            name           TEXT    NOT NULL,
            start_time     TEXT    NOT NULL,
            end_time       TEXT    NOT NULL,
            is_break       INTEGER NOT NULL DEFAULT 0,
            UNIQUE (unit_id, period_number)
        );
        ",
    )?;
    Ok(())
}

/// Collaborator-owned tables. The engine only reads them; creating them here
/// lets a fresh database answer with empty results.
pub fn init_directory(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS roster_members (
            unit_id         TEXT NOT NULL,
            participant_id  TEXT NOT NULL,
            UNIQUE (unit_id, participant_id)
        );

        CREATE TABLE IF NOT EXISTS subject_assignments (
            unit_id            TEXT NOT NULL,
            subject            TEXT NOT NULL,
            responsible_party  TEXT NOT NULL,
            UNIQUE (unit_id, subject, responsible_party)
        );
        ",
    )?;
    Ok(())
}
