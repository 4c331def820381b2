use rusqlite::Connection;

use crate::error::Result;

/// Initialise the calendar schema in `conn`. Idempotent.
///
/// `day_order_config` holds the current rule per unit; every change is also
/// appended to `day_order_config_epochs` so dates before the change keep
/// resolving under the rule that was in force at the time.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS day_order_config (
            unit_id           TEXT    NOT NULL PRIMARY KEY,
            cycle_length      INTEGER NOT NULL CHECK (cycle_length BETWEEN 1 AND 10),
            anchor_day_order  INTEGER NOT NULL,
            anchor_date       TEXT    NOT NULL,   -- YYYY-MM-DD
            updated_at        TEXT    NOT NULL,
            CHECK (anchor_day_order BETWEEN 1 AND cycle_length)
        );

        CREATE TABLE IF NOT EXISTS day_order_config_epochs (
            unit_id           TEXT    NOT NULL,
            effective_from    TEXT    NOT NULL,   -- also the anchor date
            cycle_length      INTEGER NOT NULL,
            anchor_day_order  INTEGER NOT NULL,
            is_explicit       INTEGER NOT NULL DEFAULT 0,   -- 1 when written by update_config
            created_at        TEXT    NOT NULL,
            UNIQUE (unit_id, effective_from)
        );

        -- One override per (unit, date); either a day order or a named holiday.
        CREATE TABLE IF NOT EXISTS day_order_overrides (
            unit_id       TEXT    NOT NULL,
            date          TEXT    NOT NULL,
            day_order     INTEGER,
            is_holiday    INTEGER NOT NULL DEFAULT 0,
            holiday_name  TEXT,
            reason        TEXT,
            actor         TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL,
            UNIQUE (unit_id, date),
            CHECK ((is_holiday = 1 AND holiday_name IS NOT NULL AND day_order IS NULL)
                OR (is_holiday = 0 AND day_order IS NOT NULL))
        );
        ",
    )?;
    Ok(())
}
