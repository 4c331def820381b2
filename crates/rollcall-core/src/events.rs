//! Session events: shared between the materializer, the session manager and
//! the notification collaborator.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Emitted once per newly created attendance session.
///
/// Delivery, formatting and retry are the notifier's concern; producers use
/// `try_send` so a slow notifier never stalls materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: String,
    pub code: String,
    pub unit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_unit: Option<String>,
    pub subject: String,
    pub responsible_party: String,
    pub scheduled_date: NaiveDate,
    pub expires_at: DateTime<Utc>,
    /// `"materialized"` or `"manual"`.
    pub origin: String,
}

impl SessionCreated {
    /// Event name used on the in-process broadcast channel.
    pub const EVENT: &'static str = "session.created";
}
