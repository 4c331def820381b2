use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// One period of one day order, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSlot {
    pub id: i64,
    pub unit_id: String,
    /// Section / class group; empty when the unit has a single timetable.
    pub sub_unit: String,
    pub day_order: u8,
    pub period_number: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_break: bool,
    pub subject: Option<String>,
    pub responsible_party: Option<String>,
}

impl PeriodSlot {
    /// Breaks never produce attendance sessions.
    pub fn is_teaching(&self) -> bool {
        !self.is_break && self.subject.is_some() && self.responsible_party.is_some()
    }
}

/// A slot as submitted by the timetable editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInput {
    pub period_number: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub is_break: bool,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub responsible_party: Option<String>,
}

/// Canonical name and time window for a period number, shared by every day
/// order of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodDefinition {
    pub unit_id: String,
    pub period_number: u8,
    pub name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub is_break: bool,
}

/// A period of a day as shown to readers: the stored slot when there is one,
/// otherwise the template entry with no subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayEntry {
    pub period_number: u8,
    pub name: Option<String>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_break: bool,
    pub subject: Option<String>,
    pub responsible_party: Option<String>,
    /// `None` for entries filled in from the template.
    pub slot_id: Option<i64>,
}
