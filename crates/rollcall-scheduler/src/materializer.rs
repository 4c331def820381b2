use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rollcall_calendar::{CalendarManager, Resolution};
use rollcall_core::config::RollcallConfig;
use rollcall_core::events::SessionCreated;
use rollcall_core::time::{local_instant, Clock};
use rollcall_sessions::{insert_session, AttendanceSession, NewSession, SessionOrigin};
use rollcall_timetable::{PeriodSlot, TimetableStore};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::db::init_db;
use crate::error::Result;
use crate::types::{MaterializationOutcome, PendingPreview, Skip, SkipReason};

/// Opens attendance sessions for the teaching slots of a resolved day.
///
/// Holds its own connection for the session + ledger writes; the calendar and
/// timetable keep theirs.
pub struct Materializer {
    db: Mutex<Connection>,
    calendar: Arc<CalendarManager>,
    timetable: Arc<TimetableStore>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    code_length: usize,
    /// If set, every created session is announced here.
    events: Option<mpsc::Sender<SessionCreated>>,
}

enum SlotState {
    Due,
    Skipped(SkipReason),
}

impl Materializer {
    pub fn new(
        conn: Connection,
        calendar: Arc<CalendarManager>,
        timetable: Arc<TimetableStore>,
        clock: Arc<dyn Clock>,
        config: &RollcallConfig,
    ) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            calendar,
            timetable,
            clock,
            offset: config.calendar.offset(),
            code_length: config.sessions.session_code_length,
            events: None,
        })
    }

    /// Pass a sender to receive a [`SessionCreated`] per new session.
    /// Sending is non-blocking (`try_send`); a full channel drops the event.
    pub fn with_events(mut self, tx: mpsc::Sender<SessionCreated>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Materialize today's sessions for `unit_id`.
    pub fn materialize_today(&self, unit_id: &str, sub_unit: Option<&str>) -> Result<MaterializationOutcome> {
        let now = self.clock.now();
        self.materialize_on(unit_id, self.calendar.today(), now, sub_unit)
    }

    /// Materialize `date` as seen at `now`.
    #[instrument(skip(self))]
    pub fn materialize_on(
        &self,
        unit_id: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
        sub_unit: Option<&str>,
    ) -> Result<MaterializationOutcome> {
        let resolution = self.calendar.resolve(unit_id, date)?;
        let mut outcome = MaterializationOutcome {
            unit_id: unit_id.to_string(),
            date,
            day_order: resolution.day_order,
            holiday: resolution.holiday_name.clone().filter(|_| resolution.is_holiday),
            created: Vec::new(),
            skipped: Vec::new(),
        };
        let Some(slots) = self.slots_for(unit_id, &resolution, sub_unit)? else {
            info!(unit_id, %date, holiday = ?outcome.holiday, "holiday, nothing to materialize");
            return Ok(outcome);
        };

        let mut db = self.conn();
        for slot in slots {
            let expires_at = local_instant(date, slot.end_time, self.offset);
            match classify(&db, &slot, date, expires_at, now)? {
                SlotState::Skipped(reason) => outcome.skipped.push(Skip::new(&slot, reason)),
                SlotState::Due => {
                    let new = NewSession {
                        unit_id: unit_id.to_string(),
                        sub_unit: Some(slot.sub_unit.clone()).filter(|s| !s.is_empty()),
                        subject: slot.subject.clone().unwrap_or_default(),
                        responsible_party: slot.responsible_party.clone().unwrap_or_default(),
                        slot_id: Some(slot.id),
                        scheduled_date: date,
                        start_time: Some(slot.start_time),
                        expires_at,
                    };
                    match record_slot(&mut db, &new, date, self.code_length, now)? {
                        Some(session) => {
                            self.announce(&session);
                            outcome.created.push(session);
                        }
                        None => outcome
                            .skipped
                            .push(Skip::new(&slot, SkipReason::DuplicateMaterialization)),
                    }
                }
            }
        }

        info!(
            unit_id,
            %date,
            day_order = ?outcome.day_order,
            created = outcome.created.len(),
            skipped = outcome.skipped.len(),
            "materialization finished"
        );
        Ok(outcome)
    }

    /// What `materialize_today` would do now. Writes nothing except the
    /// unit's default calendar config when it does not exist yet.
    pub fn pending(&self, unit_id: &str, sub_unit: Option<&str>) -> Result<PendingPreview> {
        let now = self.clock.now();
        let date = self.calendar.today();
        let resolution = self.calendar.resolve(unit_id, date)?;
        let mut preview = PendingPreview {
            unit_id: unit_id.to_string(),
            date,
            day_order: resolution.day_order,
            holiday: resolution.holiday_name.clone().filter(|_| resolution.is_holiday),
            to_create: Vec::new(),
            skipped: Vec::new(),
        };
        let Some(slots) = self.slots_for(unit_id, &resolution, sub_unit)? else {
            return Ok(preview);
        };

        let db = self.conn();
        for slot in slots {
            let expires_at = local_instant(date, slot.end_time, self.offset);
            match classify(&db, &slot, date, expires_at, now)? {
                SlotState::Due => preview.to_create.push(slot),
                SlotState::Skipped(reason) => preview.skipped.push(Skip::new(&slot, reason)),
            }
        }
        Ok(preview)
    }

    /// Teaching slots of the resolved day, or `None` on a holiday.
    fn slots_for(
        &self,
        unit_id: &str,
        resolution: &Resolution,
        sub_unit: Option<&str>,
    ) -> Result<Option<Vec<PeriodSlot>>> {
        match resolution.day_order {
            Some(day_order) if !resolution.is_holiday => {
                Ok(Some(self.timetable.teaching_slots(unit_id, day_order, sub_unit)?))
            }
            _ => Ok(None),
        }
    }

    fn announce(&self, session: &AttendanceSession) {
        if let Some(tx) = &self.events {
            if tx.try_send(session.created_event()).is_err() {
                warn!(session_id = %session.id, "event channel full or closed, notification dropped");
            }
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn classify(
    db: &Connection,
    slot: &PeriodSlot,
    date: NaiveDate,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<SlotState> {
    let exists = db
        .query_row(
            "SELECT 1 FROM materializations WHERE slot_id = ?1 AND date = ?2",
            rusqlite::params![slot.id, date],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if exists {
        return Ok(SlotState::Skipped(SkipReason::AlreadyExists));
    }
    if now >= expires_at {
        return Ok(SlotState::Skipped(SkipReason::SlotAlreadyPast));
    }
    Ok(SlotState::Due)
}

/// Insert the session and its ledger row in one `BEGIN IMMEDIATE`
/// transaction. `None` means another writer already owns (slot, date); the
/// session insert is rolled back with the transaction.
fn record_slot(
    db: &mut Connection,
    new: &NewSession,
    date: NaiveDate,
    code_length: usize,
    now: DateTime<Utc>,
) -> Result<Option<AttendanceSession>> {
    let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let session = insert_session(&tx, new, SessionOrigin::Materialized, code_length, now)?;
    let ledger = tx.execute(
        "INSERT INTO materializations (slot_id, date, session_id, unit_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![new.slot_id, date, session.id.as_str(), new.unit_id, now],
    );
    match ledger {
        Ok(_) => {
            tx.commit()?;
            debug!(session_id = %session.id, slot_id = ?new.slot_id, "session materialized");
            Ok(Some(session))
        }
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
            // Dropping `tx` rolls the session insert back.
            debug!(slot_id = ?new.slot_id, %date, "lost materialization race");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime, TimeZone};
    use rollcall_calendar::OverrideKind;
    use rollcall_core::time::FixedClock;
    use rollcall_timetable::SlotInput;
    use std::path::Path;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn open(path: &Path) -> Connection {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .unwrap();
        conn
    }

    struct World {
        _dir: tempfile::TempDir,
        path: std::path::PathBuf,
        clock: Arc<FixedClock>,
        calendar: Arc<CalendarManager>,
        timetable: Arc<TimetableStore>,
        config: RollcallConfig,
    }

    impl World {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("rollcall.db");
            let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()));
            let config = RollcallConfig::default();
            let calendar = Arc::new(
                CalendarManager::new(open(&path), config.calendar.clone(), clock.clone()).unwrap(),
            );
            let timetable = Arc::new(TimetableStore::new(open(&path), clock.clone()).unwrap());

            let teaching = |n, start, end, subject: &str| SlotInput {
                period_number: n,
                start_time: start,
                end_time: end,
                is_break: false,
                subject: Some(subject.into()),
                responsible_party: Some("T1".into()),
            };
            timetable
                .replace_day(
                    "cse",
                    None,
                    1,
                    &[
                        teaching(1, t(9, 0), t(10, 0), "Maths"),
                        teaching(2, t(10, 0), t(11, 0), "Physics"),
                        SlotInput {
                            period_number: 3,
                            start_time: t(11, 0),
                            end_time: t(11, 15),
                            is_break: true,
                            subject: None,
                            responsible_party: None,
                        },
                    ],
                    None,
                )
                .unwrap();

            Self {
                _dir: dir,
                path,
                clock,
                calendar,
                timetable,
                config,
            }
        }

        fn materializer(&self) -> Materializer {
            Materializer::new(
                open(&self.path),
                self.calendar.clone(),
                self.timetable.clone(),
                self.clock.clone(),
                &self.config,
            )
            .unwrap()
        }

        fn session_rows(&self) -> i64 {
            open(&self.path)
                .query_row("SELECT COUNT(*) FROM attendance_sessions", [], |r| r.get(0))
                .unwrap()
        }
    }

    #[test]
    fn rerun_is_idempotent() {
        let world = World::new();
        let m = world.materializer();

        let first = m.materialize_today("cse", None).unwrap();
        assert_eq!(first.day_order, Some(1));
        assert_eq!(first.created.len(), 2);
        assert_eq!(
            first.created[0].expires_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(first.created[0].origin, SessionOrigin::Materialized);

        let second = m.materialize_today("cse", None).unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.skipped.len(), 2);
        assert!(second
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::AlreadyExists));
        assert_eq!(world.session_rows(), 2);
    }

    #[test]
    fn holiday_creates_nothing() {
        let world = World::new();
        world
            .calendar
            .set_override(
                "cse",
                monday(),
                OverrideKind::Holiday {
                    name: "Founders Day".into(),
                },
                None,
                "admin",
            )
            .unwrap();

        let outcome = world.materializer().materialize_today("cse", None).unwrap();
        assert_eq!(outcome.holiday.as_deref(), Some("Founders Day"));
        assert!(outcome.created.is_empty() && outcome.skipped.is_empty());
        assert_eq!(world.session_rows(), 0);
    }

    #[test]
    fn finished_slots_are_skipped() {
        let world = World::new();
        world
            .clock
            .set(Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap());

        let outcome = world.materializer().materialize_today("cse", None).unwrap();
        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.created[0].subject, "Physics");
        assert_eq!(outcome.skipped[0].reason, SkipReason::SlotAlreadyPast);
        assert_eq!(outcome.skipped[0].period_number, 1);
    }

    #[test]
    fn slot_end_is_read_in_institution_time() {
        let mut world = World::new();
        world.config.calendar.utc_offset_minutes = 330;
        // 03:00 UTC is 08:30 IST, before both periods end.
        world
            .clock
            .set(Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap());

        let outcome = world
            .materializer()
            .materialize_on("cse", monday(), world.clock.now(), None)
            .unwrap();
        assert_eq!(outcome.created.len(), 2);
        assert_eq!(
            outcome.created[0].expires_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 4, 30, 0).unwrap()
        );
    }

    #[test]
    fn pending_previews_without_writing() {
        let world = World::new();
        world
            .clock
            .set(Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap());
        let m = world.materializer();

        let preview = m.pending("cse", None).unwrap();
        assert_eq!(preview.to_create.len(), 1);
        assert_eq!(preview.skipped.len(), 1);
        assert_eq!(world.session_rows(), 0);
    }

    #[test]
    fn events_are_published_per_session() {
        let world = World::new();
        let (tx, mut rx) = mpsc::channel(8);
        let m = world.materializer().with_events(tx);

        m.materialize_today("cse", None).unwrap();
        let first = rx.try_recv().unwrap();
        assert_eq!(first.origin, "materialized");
        assert_eq!(first.subject, "Maths");
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ledger_conflict_rolls_back_session() {
        let world = World::new();
        let m = world.materializer();
        let new = NewSession {
            unit_id: "cse".into(),
            sub_unit: None,
            subject: "Maths".into(),
            responsible_party: "T1".into(),
            slot_id: Some(1),
            scheduled_date: monday(),
            start_time: Some(t(9, 0)),
            expires_at: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
        };
        let now = world.clock.now();

        let mut db = m.conn();
        assert!(record_slot(&mut db, &new, monday(), 6, now).unwrap().is_some());
        assert!(record_slot(&mut db, &new, monday(), 6, now).unwrap().is_none());
        drop(db);
        assert_eq!(world.session_rows(), 1);
    }

    #[test]
    fn concurrent_runs_create_each_session_once() {
        let world = World::new();
        let a = Arc::new(world.materializer());
        let b = Arc::new(world.materializer());

        let handles: Vec<_> = [a, b]
            .into_iter()
            .map(|m| std::thread::spawn(move || m.materialize_today("cse", None).unwrap()))
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let created: usize = outcomes.iter().map(|o| o.created.len()).sum();
        assert_eq!(created, 2);
        for skip in outcomes.iter().flat_map(|o| &o.skipped) {
            assert!(matches!(
                skip.reason,
                SkipReason::AlreadyExists | SkipReason::DuplicateMaterialization
            ));
        }
        assert_eq!(world.session_rows(), 2);
    }

    #[test]
    fn later_day_order_uses_its_own_slots() {
        let world = World::new();
        let m = world.materializer();
        // Tuesday resolves to day order 2, which has no slots.
        let tuesday = monday() + Duration::days(1);
        let outcome = m
            .materialize_on("cse", tuesday, world.clock.now(), None)
            .unwrap();
        assert_eq!(outcome.day_order, Some(2));
        assert!(outcome.created.is_empty());
    }
}
