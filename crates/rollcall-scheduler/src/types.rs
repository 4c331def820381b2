use chrono::NaiveDate;
use rollcall_sessions::AttendanceSession;
use rollcall_timetable::PeriodSlot;
use serde::{Deserialize, Serialize};

/// Why a slot produced no session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyExists,
    SlotAlreadyPast,
    DuplicateMaterialization,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skip {
    pub slot_id: i64,
    pub sub_unit: String,
    pub period_number: u8,
    pub subject: Option<String>,
    pub reason: SkipReason,
}

impl Skip {
    pub(crate) fn new(slot: &PeriodSlot, reason: SkipReason) -> Self {
        Self {
            slot_id: slot.id,
            sub_unit: slot.sub_unit.clone(),
            period_number: slot.period_number,
            subject: slot.subject.clone(),
            reason,
        }
    }
}

/// Result of one materialization run for a (unit, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializationOutcome {
    pub unit_id: String,
    pub date: NaiveDate,
    /// `None` on holidays.
    pub day_order: Option<u8>,
    /// Holiday name when the date is a holiday; nothing is created then.
    pub holiday: Option<String>,
    pub created: Vec<AttendanceSession>,
    pub skipped: Vec<Skip>,
}

/// What a run would do right now, without writing anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPreview {
    pub unit_id: String,
    pub date: NaiveDate,
    pub day_order: Option<u8>,
    pub holiday: Option<String>,
    pub to_create: Vec<PeriodSlot>,
    pub skipped: Vec<Skip>,
}
