//! `rollcall-core`: configuration, shared identifiers, collaborator
//! contracts and event types used by every other rollcall crate.

pub mod collab;
pub mod config;
pub mod error;
pub mod events;
pub mod time;
pub mod types;

pub use error::{Result, RollcallError};
pub use types::{ParticipantId, SessionId, UnitId};
