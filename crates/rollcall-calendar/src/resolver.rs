use chrono::{Datelike, NaiveDate, Weekday};

use crate::types::{ConfigEpoch, OverrideKind, Resolution};

/// The automatic weekly holiday.
#[derive(Debug, Clone, Copy)]
pub struct RestDay<'a> {
    pub weekday: Weekday,
    pub name: &'a str,
}

/// Advance (or rewind) a rotation from a known anchor.
///
/// `date` may precede `anchor_date`; the euclidean remainder keeps the result
/// in `1..=cycle_length` either way.
pub fn rotate(anchor_day_order: u8, anchor_date: NaiveDate, date: NaiveDate, cycle_length: u8) -> u8 {
    let cycle = i64::from(cycle_length.max(1));
    let elapsed = (date - anchor_date).num_days();
    let index = (i64::from(anchor_day_order) - 1 + elapsed).rem_euclid(cycle);
    (index + 1) as u8
}

/// Pick the epoch that governs `date` from epochs sorted by `effective_from`.
///
/// Dates before the first epoch walk backwards from the first one.
pub fn epoch_for(epochs: &[ConfigEpoch], date: NaiveDate) -> Option<&ConfigEpoch> {
    epochs
        .iter()
        .rev()
        .find(|e| e.effective_from <= date)
        .or_else(|| epochs.first())
}

/// Resolve a single date.
///
/// * `exact`: override recorded for `date` itself, if any.
/// * `epoch`: rotation rule governing `date`.
/// * `prior`: most recent non-holiday override strictly before `date`.
pub fn resolve(
    date: NaiveDate,
    exact: Option<&OverrideKind>,
    epoch: &ConfigEpoch,
    prior: Option<(NaiveDate, u8)>,
    rest_day: RestDay<'_>,
) -> Resolution {
    if let Some(kind) = exact {
        return match kind {
            OverrideKind::DayOrder { day_order } => Resolution::working(date, *day_order, true),
            OverrideKind::Holiday { name } => Resolution::holiday(date, name.clone(), true),
        };
    }

    if date.weekday() == rest_day.weekday {
        return Resolution::holiday(date, rest_day.name, false);
    }

    // An explicit config change shadows overrides recorded before it. The
    // default epoch does not, and neither does any epoch for dates that
    // precede it.
    let (anchor_date, anchor_day_order) = match prior {
        Some((d, day_order))
            if !epoch.explicit || d >= epoch.effective_from || date < epoch.effective_from =>
        {
            (d, day_order)
        }
        _ => (epoch.effective_from, epoch.anchor_day_order),
    };

    let day_order = rotate(anchor_day_order, anchor_date, date, epoch.cycle_length);
    Resolution::working(date, day_order, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn epoch(from: NaiveDate, cycle: u8, anchor: u8) -> ConfigEpoch {
        ConfigEpoch {
            effective_from: from,
            cycle_length: cycle,
            anchor_day_order: anchor,
            explicit: false,
        }
    }

    fn explicit_epoch(from: NaiveDate, cycle: u8, anchor: u8) -> ConfigEpoch {
        ConfigEpoch {
            explicit: true,
            ..epoch(from, cycle, anchor)
        }
    }

    const SUNDAY: RestDay<'static> = RestDay {
        weekday: Weekday::Sun,
        name: "Sunday",
    };

    #[test]
    fn anchor_date_resolves_to_anchor_day_order() {
        let e = epoch(d(2024, 1, 1), 6, 4);
        let r = resolve(d(2024, 1, 1), None, &e, None, SUNDAY);
        assert_eq!(r.day_order, Some(4));
        assert!(!r.is_holiday);
        assert!(!r.is_explicit);
    }

    #[test]
    fn six_days_later_wraps_to_day_one_unless_rest_day() {
        // 2024-01-07 is a Sunday.
        let e = epoch(d(2024, 1, 1), 6, 1);
        let r = resolve(d(2024, 1, 7), None, &e, None, SUNDAY);
        assert!(r.is_holiday);
        assert_eq!(r.holiday_name.as_deref(), Some("Sunday"));

        let saturday_rest = RestDay {
            weekday: Weekday::Sat,
            name: "Saturday",
        };
        let r = resolve(d(2024, 1, 7), None, &e, None, saturday_rest);
        assert_eq!(r.day_order, Some(1));
    }

    #[test]
    fn prior_override_becomes_anchor() {
        let e = epoch(d(2024, 1, 1), 6, 1);
        let r = resolve(d(2024, 1, 12), None, &e, Some((d(2024, 1, 10), 3)), SUNDAY);
        assert_eq!(r.day_order, Some(5));
    }

    #[test]
    fn override_older_than_config_change_is_ignored() {
        let e = explicit_epoch(d(2024, 2, 1), 5, 2);
        let r = resolve(d(2024, 2, 2), None, &e, Some((d(2024, 1, 10), 3)), SUNDAY);
        assert_eq!(r.day_order, Some(3));
    }

    #[test]
    fn default_epoch_does_not_shadow_older_override() {
        // The default rule was created long after the override was recorded.
        let e = epoch(d(2026, 10, 19), 6, 1);
        let r = resolve(d(2024, 1, 12), None, &e, Some((d(2024, 1, 10), 3)), SUNDAY);
        assert_eq!(r.day_order, Some(5));
        let r = resolve(d(2026, 10, 20), None, &e, Some((d(2024, 1, 10), 3)), SUNDAY);
        assert_eq!(r.day_order, Some(rotate(3, d(2024, 1, 10), d(2026, 10, 20), 6)));
    }

    #[test]
    fn override_anchors_dates_before_first_config_change() {
        let e = explicit_epoch(d(2024, 2, 1), 6, 1);
        let r = resolve(d(2024, 1, 11), None, &e, Some((d(2024, 1, 10), 3)), SUNDAY);
        assert_eq!(r.day_order, Some(4));
    }

    #[test]
    fn exact_override_beats_rest_day() {
        let e = epoch(d(2024, 1, 1), 6, 1);
        let kind = OverrideKind::DayOrder { day_order: 2 };
        let r = resolve(d(2024, 1, 7), Some(&kind), &e, None, SUNDAY);
        assert_eq!(r.day_order, Some(2));
        assert!(r.is_explicit);
    }

    #[test]
    fn explicit_holiday_is_reported_with_name() {
        let e = epoch(d(2024, 1, 1), 6, 1);
        let kind = OverrideKind::Holiday {
            name: "Pongal".into(),
        };
        let r = resolve(d(2024, 1, 15), Some(&kind), &e, None, SUNDAY);
        assert!(r.is_holiday && r.is_explicit);
        assert_eq!(r.day_order, None);
    }

    #[test]
    fn dates_before_anchor_walk_backwards() {
        assert_eq!(rotate(1, d(2024, 1, 10), d(2024, 1, 8), 6), 5);
        assert_eq!(rotate(1, d(2024, 1, 10), d(2024, 1, 9), 6), 6);
        assert_eq!(rotate(3, d(2024, 1, 10), d(2023, 12, 1), 6), 5);
    }

    #[test]
    fn rotation_is_consistent_between_any_two_dates() {
        let anchor = d(2024, 3, 4);
        for cycle in 1..=10u8 {
            for offset in -40i64..40 {
                let d1 = anchor + chrono::Duration::days(offset);
                for gap in 0i64..15 {
                    let d2 = d1 + chrono::Duration::days(gap);
                    let o1 = rotate(1, anchor, d1, cycle);
                    let o2 = rotate(1, anchor, d2, cycle);
                    let expected = ((i64::from(o1) - 1 + gap).rem_euclid(i64::from(cycle)) + 1) as u8;
                    assert_eq!(o2, expected, "cycle={cycle} d1={d1} gap={gap}");
                }
            }
        }
    }

    #[test]
    fn epoch_selection_uses_rule_in_force() {
        let epochs = [epoch(d(2024, 1, 1), 6, 1), epoch(d(2024, 3, 1), 4, 2)];
        assert_eq!(epoch_for(&epochs, d(2024, 2, 15)).unwrap().cycle_length, 6);
        assert_eq!(epoch_for(&epochs, d(2024, 3, 1)).unwrap().cycle_length, 4);
        assert_eq!(epoch_for(&epochs, d(2023, 12, 1)).unwrap().cycle_length, 6);
        assert!(epoch_for(&[], d(2024, 1, 1)).is_none());
    }
}
