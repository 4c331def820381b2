//! Contracts for the collaborators that live outside the engine.
//!
//! Roster and assignment data is owned by the surrounding product; the engine
//! only reads it. Notifications are fire-and-forget.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::SessionCreated;
use crate::types::{ParticipantId, UnitId};

/// A (subject, responsible party) pairing the timetable editor may place in a
/// period slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub subject: String,
    pub responsible_party: String,
}

/// Roster lookup: who is expected in a unit's sessions.
pub trait RosterSource: Send + Sync {
    fn list_participants(&self, unit: &UnitId) -> Result<Vec<ParticipantId>>;
}

/// Subject / responsible-party assignment lookup.
pub trait AssignmentSource: Send + Sync {
    fn list_assignments(&self, unit: &UnitId) -> Result<Vec<Assignment>>;
}

/// Notification dispatch for newly created sessions.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: &SessionCreated, recipients: &[ParticipantId]) -> Result<()>;
}

/// Fixed in-memory roster, handy for tests and single-unit deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    pub members: std::collections::HashMap<String, Vec<String>>,
}

impl RosterSource for StaticRoster {
    fn list_participants(&self, unit: &UnitId) -> Result<Vec<ParticipantId>> {
        Ok(self
            .members
            .get(unit.as_str())
            .map(|m| m.iter().map(|p| ParticipantId::from(p.as_str())).collect())
            .unwrap_or_default())
    }
}
