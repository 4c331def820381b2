//! `rollcall-scheduler`: turns the timetable into attendance sessions.
//!
//! # Overview
//!
//! The [`materializer::Materializer`] resolves a unit's day order for a date,
//! walks the teaching slots of that day order and opens one attendance
//! session per slot. Each (slot, date) pair is written to the
//! `materializations` ledger in the same transaction as its session; the
//! ledger's unique key makes repeated or concurrent runs safe.
//!
//! | Slot state                         | Result                      |
//! |------------------------------------|-----------------------------|
//! | Ledger row exists                  | skipped, `already_exists`   |
//! | End time already passed today      | skipped, `slot_already_past`|
//! | Lost a race on the ledger key      | skipped, `duplicate_materialization` |
//! | Otherwise                          | session created             |
//!
//! The [`engine::MaterializerEngine`] runs this for configured units on an
//! interval and also sweeps expired sessions and stale one-time codes.

pub mod db;
pub mod engine;
pub mod error;
pub mod materializer;
pub mod types;

pub use engine::{MaterializerEngine, TickReport};
pub use error::{Result, SchedulerError};
pub use materializer::Materializer;
pub use types::{MaterializationOutcome, PendingPreview, Skip, SkipReason};
