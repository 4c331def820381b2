use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rollcall_core::collab::AssignmentSource;
use rollcall_core::config::MAX_CYCLE_LENGTH;
use rollcall_core::time::Clock;
use rollcall_core::UnitId;
use rusqlite::Connection;
use tracing::{info, instrument};

use crate::db::init_db;
use crate::error::{Result, TimetableError};
use crate::types::{DayEntry, PeriodDefinition, PeriodSlot, SlotInput};

const SLOT_COLUMNS: &str = "id, unit_id, sub_unit, day_order, period_number, start_time, end_time,
                            is_break, subject, responsible_party";

/// Period slots and the period template, one SQLite connection.
pub struct TimetableStore {
    db: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl TimetableStore {
    pub fn new(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            clock,
        })
    }

    /// Replace a whole day in one transaction.
    ///
    /// Periods present in `slots` are written in place (their ids survive, so
    /// existing materializations stay linked); periods missing from `slots`
    /// are deleted. With `assignments`, every teaching slot must match a
    /// known (subject, responsible party) pair.
    #[instrument(skip(self, slots, assignments), fields(count = slots.len()))]
    pub fn replace_day(
        &self,
        unit_id: &str,
        sub_unit: Option<&str>,
        day_order: u8,
        slots: &[SlotInput],
        assignments: Option<&dyn AssignmentSource>,
    ) -> Result<Vec<PeriodSlot>> {
        check_day_order(day_order)?;
        let mut seen = HashSet::new();
        for slot in slots {
            validate_slot(slot)?;
            if !seen.insert(slot.period_number) {
                return Err(TimetableError::DuplicatePeriod {
                    period_number: slot.period_number,
                });
            }
        }
        if let Some(source) = assignments {
            check_assignments(unit_id, slots, source)?;
        }

        let sub_unit = sub_unit.unwrap_or_default();
        let keep = serde_json::to_string(&seen.iter().collect::<Vec<_>>())
            .map_err(rollcall_core::RollcallError::from)?;
        let now = self.clock.now();

        let mut db = self.conn();
        let tx = db.transaction()?;
        let removed = tx.execute(
            "DELETE FROM period_slots
             WHERE unit_id = ?1 AND sub_unit = ?2 AND day_order = ?3
               AND period_number NOT IN (SELECT value FROM json_each(?4))",
            rusqlite::params![unit_id, sub_unit, day_order, keep],
        )?;
        for slot in slots {
            write_slot(&tx, unit_id, sub_unit, day_order, slot, now)?;
        }
        tx.commit()?;

        info!(unit_id, sub_unit, day_order, written = slots.len(), removed, "timetable day replaced");
        list_day_on(&db, unit_id, sub_unit, day_order)
    }

    /// Insert or update a single period.
    #[instrument(skip(self, slot, assignments), fields(period = slot.period_number))]
    pub fn upsert_slot(
        &self,
        unit_id: &str,
        sub_unit: Option<&str>,
        day_order: u8,
        slot: &SlotInput,
        assignments: Option<&dyn AssignmentSource>,
    ) -> Result<PeriodSlot> {
        check_day_order(day_order)?;
        validate_slot(slot)?;
        if let Some(source) = assignments {
            check_assignments(unit_id, std::slice::from_ref(slot), source)?;
        }

        let sub_unit = sub_unit.unwrap_or_default();
        let db = self.conn();
        write_slot(&db, unit_id, sub_unit, day_order, slot, self.clock.now())?;
        let stored = db.query_row(
            &format!(
                "SELECT {SLOT_COLUMNS} FROM period_slots
                 WHERE unit_id = ?1 AND sub_unit = ?2 AND day_order = ?3 AND period_number = ?4"
            ),
            rusqlite::params![unit_id, sub_unit, day_order, slot.period_number],
            row_to_slot,
        )?;
        info!(unit_id, sub_unit, day_order, slot_id = stored.id, "slot upserted");
        Ok(stored)
    }

    /// Stored slots of one (unit, sub-unit, day order), by period number.
    pub fn list_day(&self, unit_id: &str, sub_unit: Option<&str>, day_order: u8) -> Result<Vec<PeriodSlot>> {
        let db = self.conn();
        list_day_on(&db, unit_id, sub_unit.unwrap_or_default(), day_order)
    }

    /// Slots that produce sessions on `day_order`.
    ///
    /// `sub_unit = None` spans every sub-unit of the unit.
    pub fn teaching_slots(
        &self,
        unit_id: &str,
        day_order: u8,
        sub_unit: Option<&str>,
    ) -> Result<Vec<PeriodSlot>> {
        let db = self.conn();
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {SLOT_COLUMNS} FROM period_slots
             WHERE unit_id = ?1 AND day_order = ?2 AND is_break = 0
               AND (?3 IS NULL OR sub_unit = ?3)
             ORDER BY sub_unit, period_number"
        ))?;
        let slots = stmt
            .query_map(rusqlite::params![unit_id, day_order, sub_unit], row_to_slot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(slots.into_iter().filter(PeriodSlot::is_teaching).collect())
    }

    /// Create or replace the template entry for one period number.
    #[instrument(skip(self, def), fields(unit_id = %def.unit_id, period = def.period_number))]
    pub fn set_definition(&self, def: &PeriodDefinition) -> Result<()> {
        if def.period_number == 0 || def.end_time <= def.start_time {
            return Err(TimetableError::InvalidSlot {
                period_number: def.period_number,
                reason: "period must be numbered from 1 and end after it starts".to_string(),
            });
        }
        let db = self.conn();
        db.execute(
            "INSERT INTO period_definitions
             (unit_id, period_number, name, start_time, end_time, is_break)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (unit_id, period_number) DO UPDATE SET
                name = excluded.name,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                is_break = excluded.is_break",
            rusqlite::params![
                def.unit_id,
                def.period_number,
                def.name,
                def.start_time,
                def.end_time,
                def.is_break
            ],
        )?;
        Ok(())
    }

    pub fn list_definitions(&self, unit_id: &str) -> Result<Vec<PeriodDefinition>> {
        let db = self.conn();
        let mut stmt = db.prepare_cached(
            "SELECT unit_id, period_number, name, start_time, end_time, is_break
             FROM period_definitions WHERE unit_id = ?1 ORDER BY period_number",
        )?;
        let defs = stmt
            .query_map([unit_id], |row| {
                Ok(PeriodDefinition {
                    unit_id: row.get(0)?,
                    period_number: row.get(1)?,
                    name: row.get(2)?,
                    start_time: row.get(3)?,
                    end_time: row.get(4)?,
                    is_break: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(defs)
    }

    /// A day's schedule with template periods filling the gaps.
    pub fn day_with_template(
        &self,
        unit_id: &str,
        sub_unit: Option<&str>,
        day_order: u8,
    ) -> Result<Vec<DayEntry>> {
        check_day_order(day_order)?;
        let definitions = self.list_definitions(unit_id)?;
        let slots = self.list_day(unit_id, sub_unit, day_order)?;

        let mut day: BTreeMap<u8, DayEntry> = definitions
            .into_iter()
            .map(|def| {
                (
                    def.period_number,
                    DayEntry {
                        period_number: def.period_number,
                        name: Some(def.name),
                        start_time: def.start_time,
                        end_time: def.end_time,
                        is_break: def.is_break,
                        subject: None,
                        responsible_party: None,
                        slot_id: None,
                    },
                )
            })
            .collect();

        for slot in slots {
            let name = day.remove(&slot.period_number).and_then(|t| t.name);
            day.insert(
                slot.period_number,
                DayEntry {
                    period_number: slot.period_number,
                    name,
                    start_time: slot.start_time,
                    end_time: slot.end_time,
                    is_break: slot.is_break,
                    subject: slot.subject,
                    responsible_party: slot.responsible_party,
                    slot_id: Some(slot.id),
                },
            );
        }
        Ok(day.into_values().collect())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_day_order(day_order: u8) -> Result<()> {
    if day_order == 0 || day_order > MAX_CYCLE_LENGTH {
        return Err(TimetableError::InvalidDayOrder {
            value: day_order,
            max: MAX_CYCLE_LENGTH,
        });
    }
    Ok(())
}

fn validate_slot(slot: &SlotInput) -> Result<()> {
    let invalid = |reason: &str| TimetableError::InvalidSlot {
        period_number: slot.period_number,
        reason: reason.to_string(),
    };
    if slot.period_number == 0 {
        return Err(invalid("period numbers start at 1"));
    }
    if slot.end_time <= slot.start_time {
        return Err(invalid("end time must be after start time"));
    }
    if !slot.is_break {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        if !filled(&slot.subject) || !filled(&slot.responsible_party) {
            return Err(invalid("teaching slots need a subject and a responsible party"));
        }
    }
    Ok(())
}

fn check_assignments(unit_id: &str, slots: &[SlotInput], source: &dyn AssignmentSource) -> Result<()> {
    let known: HashSet<(String, String)> = source
        .list_assignments(&UnitId::from(unit_id))?
        .into_iter()
        .map(|a| (a.subject, a.responsible_party))
        .collect();

    for slot in slots.iter().filter(|s| !s.is_break) {
        let subject = slot.subject.clone().unwrap_or_default();
        let responsible_party = slot.responsible_party.clone().unwrap_or_default();
        if !known.contains(&(subject.clone(), responsible_party.clone())) {
            return Err(TimetableError::UnknownAssignment {
                subject,
                responsible_party,
            });
        }
    }
    Ok(())
}

fn write_slot(
    db: &Connection,
    unit_id: &str,
    sub_unit: &str,
    day_order: u8,
    slot: &SlotInput,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    let (subject, responsible_party) = if slot.is_break {
        (None, None)
    } else {
        (slot.subject.as_deref(), slot.responsible_party.as_deref())
    };
    db.execute(
        "INSERT INTO period_slots
         (unit_id, sub_unit, day_order, period_number, start_time, end_time,
          is_break, subject, responsible_party, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT (unit_id, sub_unit, day_order, period_number) DO UPDATE SET
            start_time = excluded.start_time,
            end_time = excluded.end_time,
            is_break = excluded.is_break,
            subject = excluded.subject,
            responsible_party = excluded.responsible_party,
            updated_at = excluded.updated_at",
        rusqlite::params![
            unit_id,
            sub_unit,
            day_order,
            slot.period_number,
            slot.start_time,
            slot.end_time,
            slot.is_break,
            subject,
            responsible_party,
            now
        ],
    )?;
    Ok(())
}

fn list_day_on(db: &Connection, unit_id: &str, sub_unit: &str, day_order: u8) -> Result<Vec<PeriodSlot>> {
    let mut stmt = db.prepare_cached(&format!(
        "SELECT {SLOT_COLUMNS} FROM period_slots
         WHERE unit_id = ?1 AND sub_unit = ?2 AND day_order = ?3
         ORDER BY period_number"
    ))?;
    let slots = stmt
        .query_map(rusqlite::params![unit_id, sub_unit, day_order], row_to_slot)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(slots)
}

pub(crate) fn row_to_slot(row: &rusqlite::Row<'_>) -> rusqlite::Result<PeriodSlot> {
    Ok(PeriodSlot {
        id: row.get(0)?,
        unit_id: row.get(1)?,
        sub_unit: row.get(2)?,
        day_order: row.get(3)?,
        period_number: row.get(4)?,
        start_time: row.get(5)?,
        end_time: row.get(6)?,
        is_break: row.get(7)?,
        subject: row.get(8)?,
        responsible_party: row.get(9)?,
    })
}
