//! `rollcall-sessions`: attendance session lifecycle, attendance records
//! and the one-time-code admission gate.
//!
//! A session is `active` until it is completed by hand or its expiry passes.
//! Expiry is derived on every read; `sweep_expired` only persists it.

pub mod code_gate;
pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use code_gate::{AdmissionToken, OneTimeCodeGate};
pub use error::{Result, SessionError};
pub use manager::{insert_session, SessionManager};
pub use types::{
    AttendanceRecord, AttendanceSession, AttendanceSummary, IssuedCode, MarkOutcome, NewSession,
    RecordStatus, SessionOrigin, SessionRef, SessionStatus, Verification,
};
