pub mod calendar;
pub mod error;
pub mod events;
pub mod health;
pub mod materialize;
pub mod sessions;
pub mod timetable;
