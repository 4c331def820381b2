use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The rotation rule currently in force for a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayOrderConfig {
    pub unit_id: String,
    /// Number of distinct day orders in the rotation (1..=10).
    pub cycle_length: u8,
    /// Day order that was true on `anchor_date`.
    pub anchor_day_order: u8,
    pub anchor_date: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

/// What an override pins a date to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverrideKind {
    DayOrder { day_order: u8 },
    Holiday { name: String },
}

/// An administrator-entered exception for one (unit, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub unit_id: String,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub kind: OverrideKind,
    pub reason: Option<String>,
    pub actor: String,
    pub updated_at: DateTime<Utc>,
}

/// The answer to "which day order applies on this date?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub date: NaiveDate,
    /// `None` on holidays.
    pub day_order: Option<u8>,
    pub is_holiday: bool,
    pub holiday_name: Option<String>,
    /// True when the answer came from an override for this exact date.
    pub is_explicit: bool,
}

impl Resolution {
    pub fn working(date: NaiveDate, day_order: u8, is_explicit: bool) -> Self {
        Self {
            date,
            day_order: Some(day_order),
            is_holiday: false,
            holiday_name: None,
            is_explicit,
        }
    }

    pub fn holiday(date: NaiveDate, name: impl Into<String>, is_explicit: bool) -> Self {
        Self {
            date,
            day_order: None,
            is_holiday: true,
            holiday_name: Some(name.into()),
            is_explicit,
        }
    }
}

/// A historical rotation rule: from `effective_from` onwards the unit rotates
/// with `cycle_length`, and `effective_from` itself was `anchor_day_order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigEpoch {
    pub effective_from: NaiveDate,
    pub cycle_length: u8,
    pub anchor_day_order: u8,
    /// Set by an administrator's config change. Only explicit epochs shadow
    /// overrides recorded before them; the default epoch created on first
    /// use does not.
    pub explicit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_kind_flattens_into_entry_json() {
        let entry = OverrideEntry {
            unit_id: "cse".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            kind: OverrideKind::DayOrder { day_order: 3 },
            reason: None,
            actor: "admin".into(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "day_order");
        assert_eq!(json["day_order"], 3);
    }

    #[test]
    fn holiday_override_parses() {
        let kind: OverrideKind =
            serde_json::from_str(r#"{"kind":"holiday","name":"Pongal"}"#).unwrap();
        assert_eq!(
            kind,
            OverrideKind::Holiday {
                name: "Pongal".into()
            }
        );
    }
}
