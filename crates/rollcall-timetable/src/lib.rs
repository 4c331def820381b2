//! `rollcall-timetable`: period slots per (unit, sub-unit, day order),
//! the per-unit period template, and read-only views of the
//! collaborator-owned roster and subject-assignment tables.

pub mod db;
pub mod directory;
pub mod error;
pub mod store;
pub mod types;

pub use directory::SqliteDirectory;
pub use error::{Result, TimetableError};
pub use store::TimetableStore;
pub use types::{DayEntry, PeriodDefinition, PeriodSlot, SlotInput};
