use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{Duration, NaiveDate};
use rollcall_core::config::{CalendarConfig, MAX_CYCLE_LENGTH};
use rollcall_core::time::{local_date, Clock};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, instrument};

use crate::db::init_db;
use crate::error::{CalendarError, Result};
use crate::resolver::{self, RestDay};
use crate::types::{ConfigEpoch, DayOrderConfig, OverrideEntry, OverrideKind, Resolution};

/// Configuration store, override ledger and resolver for every unit.
///
/// Wraps its own SQLite connection in a `Mutex`; other subsystems open their
/// own connections to the same file.
pub struct CalendarManager {
    db: Mutex<Connection>,
    rules: CalendarConfig,
    clock: Arc<dyn Clock>,
}

impl CalendarManager {
    pub fn new(conn: Connection, rules: CalendarConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            rules,
            clock,
        })
    }

    /// Today's date in the institution's offset.
    pub fn today(&self) -> NaiveDate {
        local_date(self.clock.now(), self.rules.offset())
    }

    /// Return the unit's config, creating the default one on first access.
    #[instrument(skip(self))]
    pub fn get_config(&self, unit_id: &str) -> Result<DayOrderConfig> {
        let mut db = self.conn();
        self.ensure_config(&mut db, unit_id)
    }

    /// Change the rotation rule, re-anchoring it at today.
    ///
    /// `anchor_day_order` is the day order today should have. Dates before
    /// today keep resolving under the previous rule.
    #[instrument(skip(self))]
    pub fn update_config(
        &self,
        unit_id: &str,
        cycle_length: u8,
        anchor_day_order: u8,
    ) -> Result<DayOrderConfig> {
        if cycle_length == 0 || cycle_length > MAX_CYCLE_LENGTH {
            return Err(CalendarError::InvalidCycleLength {
                value: cycle_length,
                max: MAX_CYCLE_LENGTH,
            });
        }
        if anchor_day_order == 0 || anchor_day_order > cycle_length {
            return Err(CalendarError::InvalidDayOrder {
                value: anchor_day_order,
                cycle_length,
            });
        }

        let now = self.clock.now();
        let today = local_date(now, self.rules.offset());
        let mut db = self.conn();
        let previous = self.ensure_config(&mut db, unit_id)?;

        let tx = db.transaction()?;
        tx.execute(
            "UPDATE day_order_config
             SET cycle_length = ?2, anchor_day_order = ?3, anchor_date = ?4, updated_at = ?5
             WHERE unit_id = ?1",
            rusqlite::params![unit_id, cycle_length, anchor_day_order, today, now],
        )?;
        tx.execute(
            "INSERT INTO day_order_config_epochs
             (unit_id, effective_from, cycle_length, anchor_day_order, is_explicit, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT (unit_id, effective_from) DO UPDATE SET
                cycle_length = excluded.cycle_length,
                anchor_day_order = excluded.anchor_day_order,
                is_explicit = 1,
                created_at = excluded.created_at",
            rusqlite::params![unit_id, today, cycle_length, anchor_day_order, now],
        )?;
        tx.commit()?;

        info!(
            unit_id,
            old_cycle = previous.cycle_length,
            new_cycle = cycle_length,
            old_anchor = previous.anchor_day_order,
            new_anchor = anchor_day_order,
            anchor_date = %today,
            "day-order config updated"
        );

        Ok(DayOrderConfig {
            unit_id: unit_id.to_string(),
            cycle_length,
            anchor_day_order,
            anchor_date: today,
            updated_at: now,
        })
    }

    /// Resolve the day order for `date`.
    #[instrument(skip(self))]
    pub fn resolve(&self, unit_id: &str, date: NaiveDate) -> Result<Resolution> {
        let mut db = self.conn();
        let config = self.ensure_config(&mut db, unit_id)?;
        let epochs = load_epochs(&db, &config)?;
        self.resolve_with(&db, unit_id, date, &epochs)
    }

    /// Resolve today's day order.
    pub fn resolve_today(&self, unit_id: &str) -> Result<Resolution> {
        self.resolve(unit_id, self.today())
    }

    /// Forecast `days` consecutive dates starting at `from`.
    #[instrument(skip(self))]
    pub fn upcoming(&self, unit_id: &str, from: NaiveDate, days: u32) -> Result<Vec<Resolution>> {
        let days = days.min(self.rules.max_upcoming_days);
        let mut db = self.conn();
        let config = self.ensure_config(&mut db, unit_id)?;
        let epochs = load_epochs(&db, &config)?;

        // Stops early rather than walking past the last representable date.
        (0..i64::from(days))
            .map_while(|offset| from.checked_add_signed(Duration::days(offset)))
            .map(|date| self.resolve_with(&db, unit_id, date, &epochs))
            .collect()
    }

    /// Pin `date` to a day order or a holiday. Replaces any existing override
    /// (last writer wins); the replaced value is logged for audit.
    #[instrument(skip(self, kind, reason))]
    pub fn set_override(
        &self,
        unit_id: &str,
        date: NaiveDate,
        kind: OverrideKind,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<OverrideEntry> {
        let mut db = self.conn();
        let config = self.ensure_config(&mut db, unit_id)?;

        let (day_order, is_holiday, holiday_name) = match &kind {
            OverrideKind::DayOrder { day_order } => {
                let epochs = load_epochs(&db, &config)?;
                let cycle_length = resolver::epoch_for(&epochs, date)
                    .map(|e| e.cycle_length)
                    .unwrap_or(config.cycle_length);
                if *day_order == 0 || *day_order > cycle_length {
                    return Err(CalendarError::InvalidDayOrder {
                        value: *day_order,
                        cycle_length,
                    });
                }
                (Some(*day_order), false, None)
            }
            OverrideKind::Holiday { name } => {
                if name.trim().is_empty() {
                    return Err(CalendarError::EmptyHolidayName);
                }
                (None, true, Some(name.trim().to_string()))
            }
        };

        let previous = find_override(&db, unit_id, date)?;
        let now = self.clock.now();
        db.execute(
            "INSERT INTO day_order_overrides
             (unit_id, date, day_order, is_holiday, holiday_name, reason, actor, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (unit_id, date) DO UPDATE SET
                day_order = excluded.day_order,
                is_holiday = excluded.is_holiday,
                holiday_name = excluded.holiday_name,
                reason = excluded.reason,
                actor = excluded.actor,
                updated_at = excluded.updated_at",
            rusqlite::params![unit_id, date, day_order, is_holiday, holiday_name, reason, actor, now],
        )?;

        let entry = OverrideEntry {
            unit_id: unit_id.to_string(),
            date,
            kind: match holiday_name {
                Some(name) => OverrideKind::Holiday { name },
                None => kind,
            },
            reason: reason.map(str::to_string),
            actor: actor.to_string(),
            updated_at: now,
        };

        match previous {
            Some(old) => info!(
                unit_id,
                %date,
                actor,
                old = ?old.kind,
                new = ?entry.kind,
                old_actor = %old.actor,
                "override replaced"
            ),
            None => info!(unit_id, %date, actor, new = ?entry.kind, "override set"),
        }
        Ok(entry)
    }

    /// Remove the override for `date`, returning what was removed.
    #[instrument(skip(self))]
    pub fn delete_override(&self, unit_id: &str, date: NaiveDate) -> Result<OverrideEntry> {
        let db = self.conn();
        let existing =
            find_override(&db, unit_id, date)?.ok_or_else(|| CalendarError::OverrideNotFound {
                unit: unit_id.to_string(),
                date,
            })?;
        db.execute(
            "DELETE FROM day_order_overrides WHERE unit_id = ?1 AND date = ?2",
            rusqlite::params![unit_id, date],
        )?;
        info!(unit_id, %date, removed = ?existing.kind, "override deleted");
        Ok(existing)
    }

    /// Overrides in `[from, to]`, oldest first.
    pub fn list_overrides(
        &self,
        unit_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OverrideEntry>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT unit_id, date, day_order, is_holiday, holiday_name, reason, actor, updated_at
             FROM day_order_overrides
             WHERE unit_id = ?1 AND date BETWEEN ?2 AND ?3
             ORDER BY date",
        )?;
        let rows = stmt.query_map(rusqlite::params![unit_id, from, to], row_to_override)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // --- private helpers ---------------------------------------------------

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rest_day(&self) -> RestDay<'_> {
        RestDay {
            weekday: self.rules.weekly_rest_day,
            name: &self.rules.rest_day_name,
        }
    }

    fn resolve_with(
        &self,
        db: &Connection,
        unit_id: &str,
        date: NaiveDate,
        epochs: &[ConfigEpoch],
    ) -> Result<Resolution> {
        let exact = find_override(db, unit_id, date)?;
        let Some(epoch) = resolver::epoch_for(epochs, date) else {
            // load_epochs always yields at least one epoch.
            return Ok(Resolution::working(date, 1, false));
        };
        let prior = prior_anchor(db, unit_id, date)?;
        let resolution = resolver::resolve(
            date,
            exact.as_ref().map(|e| &e.kind),
            epoch,
            prior,
            self.rest_day(),
        );
        debug!(unit_id, %date, day_order = ?resolution.day_order, holiday = resolution.is_holiday, "resolved");
        Ok(resolution)
    }

    /// Lazily create the default config (and its first epoch).
    ///
    /// `INSERT OR IGNORE` then read back, so two first-time callers racing
    /// on the same unit both end up with the single stored row.
    fn ensure_config(&self, db: &mut Connection, unit_id: &str) -> Result<DayOrderConfig> {
        if let Some(config) = find_config(db, unit_id)? {
            return Ok(config);
        }

        let now = self.clock.now();
        let today = local_date(now, self.rules.offset());
        let cycle_length = self.rules.default_cycle_length;

        let tx = db.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO day_order_config
             (unit_id, cycle_length, anchor_day_order, anchor_date, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4)",
            rusqlite::params![unit_id, cycle_length, today, now],
        )?;
        if inserted > 0 {
            tx.execute(
                "INSERT OR IGNORE INTO day_order_config_epochs
                 (unit_id, effective_from, cycle_length, anchor_day_order, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                rusqlite::params![unit_id, today, cycle_length, now],
            )?;
        }
        tx.commit()?;

        if inserted > 0 {
            info!(unit_id, cycle_length, anchor_date = %today, "default day-order config created");
        }

        find_config(db, unit_id)?.ok_or(CalendarError::Database(
            rusqlite::Error::QueryReturnedNoRows,
        ))
    }
}

fn find_config(db: &Connection, unit_id: &str) -> Result<Option<DayOrderConfig>> {
    Ok(db
        .query_row(
            "SELECT unit_id, cycle_length, anchor_day_order, anchor_date, updated_at
             FROM day_order_config WHERE unit_id = ?1",
            [unit_id],
            |row| {
                Ok(DayOrderConfig {
                    unit_id: row.get(0)?,
                    cycle_length: row.get(1)?,
                    anchor_day_order: row.get(2)?,
                    anchor_date: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        )
        .optional()?)
}

/// All epochs for the unit, oldest first. Falls back to the current config
/// when the history table has no rows (databases created before epochs).
fn load_epochs(db: &Connection, config: &DayOrderConfig) -> Result<Vec<ConfigEpoch>> {
    let mut stmt = db.prepare_cached(
        "SELECT effective_from, cycle_length, anchor_day_order, is_explicit
         FROM day_order_config_epochs
         WHERE unit_id = ?1
         ORDER BY effective_from",
    )?;
    let epochs = stmt
        .query_map([&config.unit_id], |row| {
            Ok(ConfigEpoch {
                effective_from: row.get(0)?,
                cycle_length: row.get(1)?,
                anchor_day_order: row.get(2)?,
                explicit: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    if epochs.is_empty() {
        return Ok(vec![ConfigEpoch {
            effective_from: config.anchor_date,
            cycle_length: config.cycle_length,
            anchor_day_order: config.anchor_day_order,
            explicit: false,
        }]);
    }
    Ok(epochs)
}

fn find_override(db: &Connection, unit_id: &str, date: NaiveDate) -> Result<Option<OverrideEntry>> {
    Ok(db
        .query_row(
            "SELECT unit_id, date, day_order, is_holiday, holiday_name, reason, actor, updated_at
             FROM day_order_overrides WHERE unit_id = ?1 AND date = ?2",
            rusqlite::params![unit_id, date],
            row_to_override,
        )
        .optional()?)
}

/// Most recent non-holiday override strictly before `date`.
fn prior_anchor(db: &Connection, unit_id: &str, date: NaiveDate) -> Result<Option<(NaiveDate, u8)>> {
    let mut stmt = db.prepare_cached(
        "SELECT date, day_order FROM day_order_overrides
         WHERE unit_id = ?1 AND date < ?2 AND is_holiday = 0
         ORDER BY date DESC
         LIMIT 1",
    )?;
    Ok(stmt
        .query_row(rusqlite::params![unit_id, date], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()?)
}

fn row_to_override(row: &rusqlite::Row<'_>) -> rusqlite::Result<OverrideEntry> {
    let is_holiday: bool = row.get(3)?;
    let kind = if is_holiday {
        OverrideKind::Holiday {
            name: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        }
    } else {
        OverrideKind::DayOrder {
            day_order: row.get(2)?,
        }
    };
    Ok(OverrideEntry {
        unit_id: row.get(0)?,
        date: row.get(1)?,
        kind,
        reason: row.get(5)?,
        actor: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Utc, Weekday};
    use rollcall_core::time::FixedClock;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn manager_at(y: i32, m: u32, day: u32) -> (CalendarManager, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(y, m, day, 8, 0, 0).unwrap()));
        let conn = Connection::open_in_memory().unwrap();
        let manager = CalendarManager::new(conn, CalendarConfig::default(), clock.clone()).unwrap();
        (manager, clock)
    }

    #[test]
    fn first_query_creates_default_config() {
        let (cal, _) = manager_at(2024, 1, 1);
        let config = cal.get_config("cse").unwrap();
        assert_eq!(config.cycle_length, 6);
        assert_eq!(config.anchor_day_order, 1);
        assert_eq!(config.anchor_date, d(2024, 1, 1));

        let r = cal.resolve("cse", d(2024, 1, 1)).unwrap();
        assert_eq!(r.day_order, Some(1));
        assert!(!r.is_explicit);
    }

    #[test]
    fn scenario_a_weekly_rest_day_wins_over_rotation() {
        let (cal, _) = manager_at(2024, 1, 1);
        let r = cal.resolve("cse", d(2024, 1, 7)).unwrap();
        assert!(r.is_holiday);
        // The following Monday continues the rotation through the rest day.
        let r = cal.resolve("cse", d(2024, 1, 8)).unwrap();
        assert_eq!(r.day_order, Some(2));
    }

    #[test]
    fn scenario_b_override_reanchors_following_days() {
        let (cal, _) = manager_at(2024, 1, 1);
        cal.set_override("cse", d(2024, 1, 10), OverrideKind::DayOrder { day_order: 3 }, None, "admin")
            .unwrap();

        let r = cal.resolve("cse", d(2024, 1, 10)).unwrap();
        assert_eq!(r.day_order, Some(3));
        assert!(r.is_explicit);

        let r = cal.resolve("cse", d(2024, 1, 12)).unwrap();
        assert_eq!(r.day_order, Some(5));
        assert!(!r.is_explicit);
    }

    #[test]
    fn backdated_override_anchors_before_default_config() {
        let (cal, _) = manager_at(2026, 10, 19);
        cal.set_override("cse", d(2024, 1, 10), OverrideKind::DayOrder { day_order: 3 }, None, "admin")
            .unwrap();

        let orders: Vec<_> = (11..=13)
            .map(|day| cal.resolve("cse", d(2024, 1, day)).unwrap().day_order)
            .collect();
        assert_eq!(orders, vec![Some(4), Some(5), Some(6)]);
    }

    #[test]
    fn config_change_shadows_earlier_override() {
        let (cal, clock) = manager_at(2024, 1, 1);
        cal.set_override("cse", d(2024, 1, 10), OverrideKind::DayOrder { day_order: 3 }, None, "admin")
            .unwrap();
        clock.set(Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap());
        cal.update_config("cse", 6, 1).unwrap();

        // Before the change the override still anchors; from the change on the new rule does.
        assert_eq!(cal.resolve("cse", d(2024, 1, 12)).unwrap().day_order, Some(5));
        assert_eq!(cal.resolve("cse", d(2024, 1, 15)).unwrap().day_order, Some(1));
        assert_eq!(cal.resolve("cse", d(2024, 1, 16)).unwrap().day_order, Some(2));
    }

    #[test]
    fn holiday_override_does_not_become_an_anchor() {
        let (cal, _) = manager_at(2024, 1, 1);
        cal.set_override(
            "cse",
            d(2024, 1, 3),
            OverrideKind::Holiday {
                name: "Storm".into(),
            },
            Some("campus closed"),
            "admin",
        )
        .unwrap();

        let r = cal.resolve("cse", d(2024, 1, 3)).unwrap();
        assert_eq!(r.holiday_name.as_deref(), Some("Storm"));
        let r = cal.resolve("cse", d(2024, 1, 4)).unwrap();
        assert_eq!(r.day_order, Some(4));
    }

    #[test]
    fn day_order_override_on_rest_day_is_honored() {
        let (cal, _) = manager_at(2024, 1, 1);
        cal.set_override("cse", d(2024, 1, 7), OverrideKind::DayOrder { day_order: 6 }, None, "admin")
            .unwrap();
        let r = cal.resolve("cse", d(2024, 1, 7)).unwrap();
        assert_eq!(r.day_order, Some(6));
        assert!(!r.is_holiday);
    }

    #[test]
    fn setting_override_twice_replaces_it() {
        let (cal, _) = manager_at(2024, 1, 1);
        cal.set_override("cse", d(2024, 1, 10), OverrideKind::DayOrder { day_order: 3 }, None, "a")
            .unwrap();
        cal.set_override("cse", d(2024, 1, 10), OverrideKind::DayOrder { day_order: 4 }, None, "b")
            .unwrap();
        let listed = cal.list_overrides("cse", d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, OverrideKind::DayOrder { day_order: 4 });
        assert_eq!(listed[0].actor, "b");
    }

    #[test]
    fn delete_override_falls_back_to_computed() {
        let (cal, _) = manager_at(2024, 1, 1);
        cal.set_override("cse", d(2024, 1, 2), OverrideKind::DayOrder { day_order: 5 }, None, "a")
            .unwrap();
        cal.delete_override("cse", d(2024, 1, 2)).unwrap();
        assert_eq!(cal.resolve("cse", d(2024, 1, 2)).unwrap().day_order, Some(2));

        let err = cal.delete_override("cse", d(2024, 1, 2)).unwrap_err();
        assert!(matches!(err, CalendarError::OverrideNotFound { .. }));
    }

    #[test]
    fn override_outside_cycle_is_rejected() {
        let (cal, _) = manager_at(2024, 1, 1);
        let err = cal
            .set_override("cse", d(2024, 1, 2), OverrideKind::DayOrder { day_order: 7 }, None, "a")
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_DAY_ORDER");
    }

    #[test]
    fn invalid_cycle_length_leaves_config_untouched() {
        let (cal, _) = manager_at(2024, 1, 1);
        let err = cal.update_config("cse", 11, 1).unwrap_err();
        assert!(matches!(err, CalendarError::InvalidCycleLength { value: 11, .. }));
        assert!(cal.update_config("cse", 0, 1).is_err());
        assert_eq!(cal.get_config("cse").unwrap().cycle_length, 6);
    }

    #[test]
    fn config_change_does_not_rewrite_history() {
        let (cal, clock) = manager_at(2024, 1, 1);
        // Jan 1..=6 under the six-day rule.
        let before: Vec<_> = (1..=6)
            .map(|day| cal.resolve("cse", d(2024, 1, day)).unwrap().day_order)
            .collect();

        clock.set(Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap());
        let config = cal.update_config("cse", 4, 2).unwrap();
        assert_eq!(config.anchor_date, d(2024, 1, 15));

        let after: Vec<_> = (1..=6)
            .map(|day| cal.resolve("cse", d(2024, 1, day)).unwrap().day_order)
            .collect();
        assert_eq!(before, after);

        assert_eq!(cal.resolve("cse", d(2024, 1, 15)).unwrap().day_order, Some(2));
        assert_eq!(cal.resolve("cse", d(2024, 1, 16)).unwrap().day_order, Some(3));
        assert_eq!(cal.resolve("cse", d(2024, 1, 18)).unwrap().day_order, Some(1));
    }

    #[test]
    fn upcoming_lists_consecutive_days() {
        let (cal, _) = manager_at(2024, 1, 1);
        let days = cal.upcoming("cse", d(2024, 1, 1), 7).unwrap();
        assert_eq!(days.len(), 7);
        assert_eq!(days[0].day_order, Some(1));
        assert_eq!(days[5].day_order, Some(6));
        assert_eq!(days[6].date.weekday(), Weekday::Sun);
        assert!(days[6].is_holiday);
    }

    #[test]
    fn upcoming_is_capped() {
        let (cal, _) = manager_at(2024, 1, 1);
        let days = cal.upcoming("cse", d(2024, 1, 1), 10_000).unwrap();
        assert_eq!(days.len(), 60);
    }

    #[test]
    fn upcoming_stops_at_the_last_representable_date() {
        let (cal, _) = manager_at(2024, 1, 1);
        let days = cal.upcoming("cse", NaiveDate::MAX, 7).unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date, NaiveDate::MAX);
    }

    #[test]
    fn two_managers_share_one_config_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.db");
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()));
        let a = CalendarManager::new(Connection::open(&path).unwrap(), CalendarConfig::default(), clock.clone())
            .unwrap();
        let b = CalendarManager::new(Connection::open(&path).unwrap(), CalendarConfig::default(), clock)
            .unwrap();

        a.get_config("cse").unwrap();
        b.get_config("cse").unwrap();
        let n: i64 = Connection::open(&path)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM day_order_config_epochs WHERE unit_id = 'cse'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(n, 1);
    }
}
