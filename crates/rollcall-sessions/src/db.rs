use rusqlite::Connection;

use crate::error::Result;

/// Initialise the attendance tables and their indexes.
///
/// Safe to call on every startup: uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS attendance_sessions (
            id                 TEXT PRIMARY KEY,
            code               TEXT NOT NULL UNIQUE,
            unit_id            TEXT NOT NULL,
            sub_unit           TEXT,
            subject            TEXT NOT NULL,
            responsible_party  TEXT NOT NULL,
            slot_id            INTEGER,
            scheduled_date     TEXT NOT NULL,
            start_time         TEXT,
            expires_at         TEXT NOT NULL,
            status             TEXT NOT NULL DEFAULT 'active'
                               CHECK (status IN ('active', 'completed', 'expired')),
            origin             TEXT NOT NULL CHECK (origin IN ('materialized', 'manual')),
            created_at         TEXT NOT NULL,
            completed_at       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_attendance_sessions_unit
            ON attendance_sessions(unit_id, scheduled_date);
        CREATE INDEX IF NOT EXISTS idx_attendance_sessions_active
            ON attendance_sessions(status) WHERE status = 'active';

        CREATE TABLE IF NOT EXISTS attendance_records (
            session_id      TEXT NOT NULL REFERENCES attendance_sessions(id),
            participant_id  TEXT NOT NULL,
            status          TEXT NOT NULL CHECK (status IN ('present', 'absent', 'on_duty')),
            marked_at       TEXT NOT NULL,
            code_verified   INTEGER NOT NULL DEFAULT 0,
            UNIQUE (session_id, participant_id)
        );",
    )?;
    Ok(())
}
