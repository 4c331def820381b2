//! `rollcall-calendar`: resolves which day order applies to a date.
//!
//! # Resolution order
//!
//! | Priority | Source                          | `is_explicit` |
//! |----------|---------------------------------|---------------|
//! | 1        | Override for the exact date     | `true`        |
//! | 2        | Weekly rest day                 | `false`       |
//! | 3        | Rotation from the nearest anchor | `false`      |
//!
//! The anchor is the later of the unit's configuration epoch in effect on
//! the date and the most recent non-holiday override strictly before it.

pub mod db;
pub mod error;
pub mod manager;
pub mod resolver;
pub mod types;

pub use error::{CalendarError, Result};
pub use manager::CalendarManager;
pub use types::{DayOrderConfig, OverrideEntry, OverrideKind, Resolution};
