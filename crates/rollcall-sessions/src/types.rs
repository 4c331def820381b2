use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rollcall_core::events::SessionCreated;
use rollcall_core::{ParticipantId, SessionId};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Stored lifecycle state. `Completed` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Expired,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a session came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    Materialized,
    Manual,
}

impl SessionOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionOrigin::Materialized => "materialized",
            SessionOrigin::Manual => "manual",
        }
    }
}

/// Per-participant attendance outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Present,
    Absent,
    OnDuty,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Present => "present",
            RecordStatus::Absent => "absent",
            RecordStatus::OnDuty => "on_duty",
        }
    }
}

macro_rules! text_enum_sql {
    ($ty:ty { $($text:literal => $variant:expr),+ $(,)? }) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                match value.as_str()? {
                    $($text => Ok($variant),)+
                    other => Err(FromSqlError::Other(
                        format!("unknown {} {other:?}", stringify!($ty)).into(),
                    )),
                }
            }
        }
    };
}

text_enum_sql!(SessionStatus {
    "active" => SessionStatus::Active,
    "completed" => SessionStatus::Completed,
    "expired" => SessionStatus::Expired,
});

text_enum_sql!(SessionOrigin {
    "materialized" => SessionOrigin::Materialized,
    "manual" => SessionOrigin::Manual,
});

text_enum_sql!(RecordStatus {
    "present" => RecordStatus::Present,
    "absent" => RecordStatus::Absent,
    "on_duty" => RecordStatus::OnDuty,
});

/// A bounded window during which participants may record attendance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceSession {
    pub id: SessionId,
    /// Short code shown to participants; unique across all sessions.
    pub code: String,
    pub unit_id: String,
    pub sub_unit: Option<String>,
    pub subject: String,
    pub responsible_party: String,
    /// Timetable slot this session was materialized from.
    pub slot_id: Option<i64>,
    pub scheduled_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub expires_at: DateTime<Utc>,
    /// Effective status as of the read that produced this value.
    pub status: SessionStatus,
    pub origin: SessionOrigin,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AttendanceSession {
    /// Stored status with time-derived expiry applied.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SessionStatus {
        match self.status {
            SessionStatus::Active if now > self.expires_at => SessionStatus::Expired,
            status => status,
        }
    }

    /// Replace the stored status with the effective one.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.status = self.effective_status(now);
        self
    }

    /// Event announcing this session to the notification collaborator.
    pub fn created_event(&self) -> SessionCreated {
        SessionCreated {
            session_id: self.id.to_string(),
            code: self.code.clone(),
            unit_id: self.unit_id.clone(),
            sub_unit: self.sub_unit.clone(),
            subject: self.subject.clone(),
            responsible_party: self.responsible_party.clone(),
            scheduled_date: self.scheduled_date,
            expires_at: self.expires_at,
            origin: self.origin.as_str().to_string(),
        }
    }
}

/// Everything needed to insert a session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub unit_id: String,
    #[serde(default)]
    pub sub_unit: Option<String>,
    pub subject: String,
    pub responsible_party: String,
    #[serde(default)]
    pub slot_id: Option<i64>,
    pub scheduled_date: NaiveDate,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    pub expires_at: DateTime<Utc>,
}

/// How a caller names the session to verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRef {
    Id(SessionId),
    Code(String),
}

/// Read-only answer to "may attendance be recorded right now?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub session_id: SessionId,
    pub code: String,
    pub unit_id: String,
    pub sub_unit: Option<String>,
    pub subject: String,
    pub responsible_party: String,
    pub expires_at: DateTime<Utc>,
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub status: RecordStatus,
    pub marked_at: DateTime<Utc>,
    /// True when the row was written after a one-time code check.
    pub code_verified: bool,
}

/// Result of `mark_attendance`. A repeat is a success, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum MarkOutcome {
    Marked(AttendanceRecord),
    AlreadyMarked(AttendanceRecord),
}

impl MarkOutcome {
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            MarkOutcome::Marked(r) | MarkOutcome::AlreadyMarked(r) => r,
        }
    }
}

/// Head counts for one session against the unit roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceSummary {
    pub session_id: SessionId,
    pub present: usize,
    pub on_duty: usize,
    pub absent: usize,
    /// Roster members with no present / on-duty record.
    pub absentees: Vec<ParticipantId>,
}

/// A one-time code handed to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCode {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn session(expires_at: DateTime<Utc>, status: SessionStatus) -> AttendanceSession {
        let created = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap();
        AttendanceSession {
            id: SessionId::new(),
            code: "ABC234".into(),
            unit_id: "cse".into(),
            sub_unit: None,
            subject: "Maths".into(),
            responsible_party: "T1".into(),
            slot_id: None,
            scheduled_date: created.date_naive(),
            start_time: None,
            expires_at,
            status,
            origin: SessionOrigin::Manual,
            created_at: created,
            completed_at: None,
        }
    }

    #[test]
    fn expiry_is_derived_from_the_clock() {
        let expires = Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap();
        let s = session(expires, SessionStatus::Active);
        assert_eq!(s.effective_status(expires), SessionStatus::Active);
        assert_eq!(s.effective_status(expires + Duration::seconds(1)), SessionStatus::Expired);
    }

    #[test]
    fn completed_stays_completed_after_expiry() {
        let expires = Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap();
        let s = session(expires, SessionStatus::Completed);
        assert_eq!(s.effective_status(expires + Duration::hours(1)), SessionStatus::Completed);
    }

    #[test]
    fn record_status_uses_snake_case() {
        assert_eq!(serde_json::to_string(&RecordStatus::OnDuty).unwrap(), "\"on_duty\"");
        let r: SessionRef = serde_json::from_str(r#"{"code":"ABC234"}"#).unwrap();
        assert_eq!(r, SessionRef::Code("ABC234".into()));
    }
}
