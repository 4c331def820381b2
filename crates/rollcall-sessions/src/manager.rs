use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use rollcall_core::collab::RosterSource;
use rollcall_core::config::SessionsConfig;
use rollcall_core::events::SessionCreated;
use rollcall_core::time::Clock;
use rollcall_core::{ParticipantId, SessionId, UnitId};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::code_gate::AdmissionToken;
use crate::db::init_db;
use crate::error::{Result, SessionError};
use crate::types::{
    AttendanceRecord, AttendanceSession, AttendanceSummary, MarkOutcome, NewSession,
    RecordStatus, SessionOrigin, SessionRef, SessionStatus, Verification,
};

/// Characters used in session codes; no 0/O or 1/I look-alikes.
const SESSION_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const MAX_CODE_ATTEMPTS: usize = 8;

const SESSION_COLUMNS: &str = "id, code, unit_id, sub_unit, subject, responsible_party, slot_id,
                               scheduled_date, start_time, expires_at, status, origin,
                               created_at, completed_at";

/// Attendance sessions and their records.
///
/// Wraps a single SQLite connection in a `Mutex`. Several managers (or
/// processes) may share one database file: every state change re-reads the
/// row inside a `BEGIN IMMEDIATE` transaction, and attendance rows are
/// guarded by the `(session_id, participant_id)` unique constraint.
pub struct SessionManager {
    db: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    code_length: usize,
    events: Option<mpsc::Sender<SessionCreated>>,
}

impl SessionManager {
    pub fn new(conn: Connection, clock: Arc<dyn Clock>, config: &SessionsConfig) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            clock,
            code_length: config.session_code_length,
            events: None,
        })
    }

    /// Publish `SessionCreated` for manually created sessions on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<SessionCreated>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Ad-hoc session opened by an operator outside the timetable.
    #[instrument(skip(self, new), fields(unit_id = %new.unit_id, subject = %new.subject))]
    pub fn create_manual(&self, new: NewSession) -> Result<AttendanceSession> {
        if new.subject.trim().is_empty() || new.responsible_party.trim().is_empty() {
            return Err(SessionError::InvalidInput(
                "subject and responsible party are required".to_string(),
            ));
        }
        let now = self.clock.now();
        if new.expires_at <= now {
            return Err(SessionError::InvalidInput(format!(
                "expires_at {} is not in the future",
                new.expires_at
            )));
        }

        let session = {
            let db = self.conn();
            insert_session(&db, &new, SessionOrigin::Manual, self.code_length, now)?
        };
        info!(session_id = %session.id, code = %session.code, "manual session created");

        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(session.created_event()) {
                warn!(session_id = %session.id, error = %e, "session event dropped");
            }
        }
        Ok(session)
    }

    /// Fetch a session with its effective status.
    pub fn get(&self, id: &SessionId) -> Result<AttendanceSession> {
        let db = self.conn();
        load_by_id(&db, id)?
            .map(|s| s.at(self.clock.now()))
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    pub fn get_by_code(&self, code: &str) -> Result<AttendanceSession> {
        let db = self.conn();
        let code = code.trim().to_ascii_uppercase();
        let found = db
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM attendance_sessions WHERE code = ?1"),
                [code.as_str()],
                row_to_session,
            )
            .optional()?;
        found
            .map(|s| s.at(self.clock.now()))
            .ok_or(SessionError::NotFound { id: code })
    }

    /// Sessions for a unit, optionally restricted to one date.
    pub fn list_for_unit(&self, unit_id: &str, date: Option<NaiveDate>) -> Result<Vec<AttendanceSession>> {
        let now = self.clock.now();
        let db = self.conn();
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {SESSION_COLUMNS} FROM attendance_sessions
             WHERE unit_id = ?1 AND (?2 IS NULL OR scheduled_date = ?2)
             ORDER BY scheduled_date, start_time, created_at"
        ))?;
        let sessions = stmt
            .query_map(rusqlite::params![unit_id, date], row_to_session)?
            .map(|r| r.map(|s| s.at(now)))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// Check that attendance may be recorded right now. Read-only.
    #[instrument(skip(self))]
    pub fn verify(&self, by: &SessionRef) -> Result<Verification> {
        let session = match by {
            SessionRef::Id(id) => self.get(id)?,
            SessionRef::Code(code) => self.get_by_code(code)?,
        };
        require_active(&session)?;

        let remaining = (session.expires_at - self.clock.now()).num_seconds().max(0);
        debug!(session_id = %session.id, remaining, "session verified");
        Ok(Verification {
            session_id: session.id,
            code: session.code,
            unit_id: session.unit_id,
            sub_unit: session.sub_unit,
            subject: session.subject,
            responsible_party: session.responsible_party,
            expires_at: session.expires_at,
            remaining_seconds: remaining,
        })
    }

    /// Push the expiry of an active session later.
    #[instrument(skip(self))]
    pub fn extend(&self, id: &SessionId, new_expires_at: DateTime<Utc>) -> Result<AttendanceSession> {
        let now = self.clock.now();
        let mut db = self.conn();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let session = require_loaded(&tx, id, now)?;
        require_active(&session)?;
        if new_expires_at <= session.expires_at {
            return Err(SessionError::InvalidExtension {
                current: session.expires_at,
                requested: new_expires_at,
            });
        }
        tx.execute(
            "UPDATE attendance_sessions SET expires_at = ?2 WHERE id = ?1",
            rusqlite::params![id.as_str(), new_expires_at],
        )?;
        tx.commit()?;

        info!(session_id = %id, old = %session.expires_at, new = %new_expires_at, "session extended");
        Ok(AttendanceSession {
            expires_at: new_expires_at,
            ..session
        })
    }

    /// Close an active session early.
    #[instrument(skip(self))]
    pub fn complete(&self, id: &SessionId) -> Result<AttendanceSession> {
        let now = self.clock.now();
        let mut db = self.conn();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let session = require_loaded(&tx, id, now)?;
        require_active(&session)?;
        tx.execute(
            "UPDATE attendance_sessions SET status = ?2, completed_at = ?3 WHERE id = ?1",
            rusqlite::params![id.as_str(), SessionStatus::Completed, now],
        )?;
        tx.commit()?;

        info!(session_id = %id, "session completed");
        Ok(AttendanceSession {
            status: SessionStatus::Completed,
            completed_at: Some(now),
            ..session
        })
    }

    /// Record a participant as present. Requires a token from the code gate.
    ///
    /// A second mark for the same participant is `AlreadyMarked`, carrying
    /// the row that won.
    #[instrument(skip(self, token), fields(session_id = %token.session_id(), participant = %token.participant_id()))]
    pub fn mark_attendance(&self, token: AdmissionToken) -> Result<MarkOutcome> {
        let now = self.clock.now();
        let mut db = self.conn();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let session = require_loaded(&tx, token.session_id(), now)?;
        require_active(&session)?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO attendance_records
             (session_id, participant_id, status, marked_at, code_verified)
             VALUES (?1, ?2, ?3, ?4, 1)",
            rusqlite::params![
                token.session_id().as_str(),
                token.participant_id().as_str(),
                RecordStatus::Present,
                now
            ],
        )?;
        let record = load_record(&tx, token.session_id(), token.participant_id())?;
        tx.commit()?;

        if inserted > 0 {
            info!("attendance marked");
            Ok(MarkOutcome::Marked(record))
        } else {
            debug!(existing = ?record.status, "attendance already recorded");
            Ok(MarkOutcome::AlreadyMarked(record))
        }
    }

    /// Record an approved on-duty absence. Works on closed sessions too, so
    /// approvals that arrive late still land.
    #[instrument(skip(self))]
    pub fn grant_on_duty(&self, id: &SessionId, participant: &ParticipantId) -> Result<AttendanceRecord> {
        let now = self.clock.now();
        let mut db = self.conn();
        let tx = db.transaction()?;
        require_loaded(&tx, id, now)?;
        tx.execute(
            "INSERT INTO attendance_records
             (session_id, participant_id, status, marked_at, code_verified)
             VALUES (?1, ?2, ?3, ?4, 0)
             ON CONFLICT (session_id, participant_id) DO UPDATE SET
                status = excluded.status,
                marked_at = excluded.marked_at",
            rusqlite::params![id.as_str(), participant.as_str(), RecordStatus::OnDuty, now],
        )?;
        let record = load_record(&tx, id, participant)?;
        tx.commit()?;
        info!("on-duty granted");
        Ok(record)
    }

    /// The participant's row for this session, if one was written.
    pub fn record(&self, id: &SessionId, participant: &ParticipantId) -> Result<Option<AttendanceRecord>> {
        let db = self.conn();
        Ok(db
            .query_row(
                "SELECT session_id, participant_id, status, marked_at, code_verified
                 FROM attendance_records WHERE session_id = ?1 AND participant_id = ?2",
                [id.as_str(), participant.as_str()],
                row_to_record,
            )
            .optional()?)
    }

    pub fn records(&self, id: &SessionId) -> Result<Vec<AttendanceRecord>> {
        let db = self.conn();
        if load_by_id(&db, id)?.is_none() {
            return Err(SessionError::NotFound { id: id.to_string() });
        }
        let mut stmt = db.prepare_cached(
            "SELECT session_id, participant_id, status, marked_at, code_verified
             FROM attendance_records WHERE session_id = ?1 ORDER BY marked_at, participant_id",
        )?;
        let records = stmt
            .query_map([id.as_str()], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Head counts against the unit roster; roster members without a row
    /// count as absent.
    pub fn summary(&self, id: &SessionId, roster: &dyn RosterSource) -> Result<AttendanceSummary> {
        let session = self.get(id)?;
        let records = self.records(id)?;
        let participants = roster.list_participants(&UnitId::from(session.unit_id.as_str()))?;

        let by_participant: HashMap<&ParticipantId, RecordStatus> =
            records.iter().map(|r| (&r.participant_id, r.status)).collect();
        let count = |status: RecordStatus| records.iter().filter(|r| r.status == status).count();

        let absentees: Vec<ParticipantId> = participants
            .into_iter()
            .filter(|p| {
                !matches!(
                    by_participant.get(p),
                    Some(RecordStatus::Present | RecordStatus::OnDuty)
                )
            })
            .collect();

        Ok(AttendanceSummary {
            session_id: session.id,
            present: count(RecordStatus::Present),
            on_duty: count(RecordStatus::OnDuty),
            absent: absentees.len(),
            absentees,
        })
    }

    /// Persist time-derived expiry so reports see a stored `expired` status.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut db = self.conn();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let due: Vec<String> = {
            let mut stmt = tx.prepare_cached(
                "SELECT id, expires_at FROM attendance_sessions WHERE status = 'active'",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, DateTime<Utc>>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .filter(|(_, expires_at)| now > *expires_at)
                .map(|(id, _)| id)
                .collect()
        };
        for id in &due {
            tx.execute(
                "UPDATE attendance_sessions SET status = 'expired' WHERE id = ?1 AND status = 'active'",
                [id],
            )?;
        }
        tx.commit()?;

        if !due.is_empty() {
            info!(count = due.len(), "expired sessions swept");
        }
        Ok(due.len())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A fresh session code of `len` characters.
pub fn generate_session_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| SESSION_CODE_ALPHABET[rng.gen_range(0..SESSION_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Insert a session row on `conn`, which may be an open transaction owned by
/// the caller. Retries with a new code when the random one is taken.
pub fn insert_session(
    conn: &Connection,
    new: &NewSession,
    origin: SessionOrigin,
    code_length: usize,
    now: DateTime<Utc>,
) -> Result<AttendanceSession> {
    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let id = SessionId::new();
        let code = generate_session_code(code_length);
        let result = conn.execute(
            "INSERT INTO attendance_sessions
             (id, code, unit_id, sub_unit, subject, responsible_party, slot_id,
              scheduled_date, start_time, expires_at, status, origin, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'active', ?11, ?12)",
            rusqlite::params![
                id.as_str(),
                code,
                new.unit_id,
                new.sub_unit,
                new.subject,
                new.responsible_party,
                new.slot_id,
                new.scheduled_date,
                new.start_time,
                new.expires_at,
                origin,
                now
            ],
        );
        match result {
            Ok(_) => {
                return Ok(AttendanceSession {
                    id,
                    code,
                    unit_id: new.unit_id.clone(),
                    sub_unit: new.sub_unit.clone(),
                    subject: new.subject.clone(),
                    responsible_party: new.responsible_party.clone(),
                    slot_id: new.slot_id,
                    scheduled_date: new.scheduled_date,
                    start_time: new.start_time,
                    expires_at: new.expires_at,
                    status: SessionStatus::Active,
                    origin,
                    created_at: now,
                    completed_at: None,
                });
            }
            Err(e) if is_code_collision(&e) => {
                debug!(attempt, "session code collision, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(SessionError::CodeSpaceExhausted {
        attempts: MAX_CODE_ATTEMPTS,
    })
}

fn is_code_collision(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, Some(msg))
            if err.code == ErrorCode::ConstraintViolation
                && msg.contains("attendance_sessions.code")
    )
}

fn require_active(session: &AttendanceSession) -> Result<()> {
    if session.status != SessionStatus::Active {
        return Err(SessionError::SessionNotActive {
            id: session.id.to_string(),
            status: session.status,
        });
    }
    Ok(())
}

fn require_loaded(db: &Connection, id: &SessionId, now: DateTime<Utc>) -> Result<AttendanceSession> {
    load_by_id(db, id)?
        .map(|s| s.at(now))
        .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
}

fn load_by_id(db: &Connection, id: &SessionId) -> Result<Option<AttendanceSession>> {
    Ok(db
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM attendance_sessions WHERE id = ?1"),
            [id.as_str()],
            row_to_session,
        )
        .optional()?)
}

fn load_record(db: &Connection, id: &SessionId, participant: &ParticipantId) -> Result<AttendanceRecord> {
    Ok(db.query_row(
        "SELECT session_id, participant_id, status, marked_at, code_verified
         FROM attendance_records WHERE session_id = ?1 AND participant_id = ?2",
        [id.as_str(), participant.as_str()],
        row_to_record,
    )?)
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceSession> {
    Ok(AttendanceSession {
        id: SessionId(row.get(0)?),
        code: row.get(1)?,
        unit_id: row.get(2)?,
        sub_unit: row.get(3)?,
        subject: row.get(4)?,
        responsible_party: row.get(5)?,
        slot_id: row.get(6)?,
        scheduled_date: row.get(7)?,
        start_time: row.get(8)?,
        expires_at: row.get(9)?,
        status: row.get(10)?,
        origin: row.get(11)?,
        created_at: row.get(12)?,
        completed_at: row.get(13)?,
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        session_id: SessionId(row.get(0)?),
        participant_id: ParticipantId(row.get(1)?),
        status: row.get(2)?,
        marked_at: row.get(3)?,
        code_verified: row.get(4)?,
    })
}
