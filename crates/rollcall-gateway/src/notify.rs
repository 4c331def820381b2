use std::sync::Arc;

use async_trait::async_trait;
use rollcall_core::collab::{Notifier, RosterSource};
use rollcall_core::events::SessionCreated;
use rollcall_core::{ParticipantId, UnitId};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::broadcast::EventBroadcaster;

/// Built-in notifier: logs each new session and republishes it on `/events`.
/// Push channels (mail, chat, mobile) subscribe to that stream.
pub struct LogNotifier {
    broadcaster: EventBroadcaster,
}

impl LogNotifier {
    pub fn new(broadcaster: EventBroadcaster) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(
        &self,
        event: &SessionCreated,
        recipients: &[ParticipantId],
    ) -> rollcall_core::Result<()> {
        info!(
            session_id = %event.session_id,
            code = %event.code,
            unit_id = %event.unit_id,
            subject = %event.subject,
            recipients = recipients.len(),
            "session created"
        );
        self.broadcaster
            .publish(SessionCreated::EVENT, event, recipients.len());
        Ok(())
    }
}

/// Drain created-session events into `notifier` until every sender is gone.
///
/// Recipients are the unit's roster. A failed roster lookup still notifies,
/// with no recipients; notifier errors are logged and dropped.
pub async fn deliver(
    mut rx: mpsc::Receiver<SessionCreated>,
    notifier: Arc<dyn Notifier>,
    roster: Arc<dyn RosterSource>,
) {
    while let Some(event) = rx.recv().await {
        let unit = UnitId::from(event.unit_id.as_str());
        let recipients = roster.list_participants(&unit).unwrap_or_else(|e| {
            warn!(unit_id = %unit, "roster lookup failed: {e}");
            Vec::new()
        });
        if let Err(e) = notifier.notify(&event, &recipients).await {
            warn!(notifier = notifier.name(), session_id = %event.session_id, "notification failed: {e}");
        }
    }
    info!("notification channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rollcall_core::collab::StaticRoster;

    fn event(unit: &str) -> SessionCreated {
        SessionCreated {
            session_id: "s-1".into(),
            code: "ABC234".into(),
            unit_id: unit.into(),
            sub_unit: None,
            subject: "Maths".into(),
            responsible_party: "T1".into(),
            scheduled_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            expires_at: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            origin: "materialized".into(),
        }
    }

    #[tokio::test]
    async fn deliver_fans_out_to_roster() {
        let broadcaster = EventBroadcaster::new();
        let mut sub = broadcaster.subscribe();
        let mut roster = StaticRoster::default();
        roster
            .members
            .insert("cse".into(), vec!["s1".into(), "s2".into()]);

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(deliver(
            rx,
            Arc::new(LogNotifier::new(broadcaster.clone())),
            Arc::new(roster),
        ));
        tx.send(event("cse")).await.unwrap();
        tx.send(event("ece")).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let first: serde_json::Value = serde_json::from_str(&sub.recv().await.unwrap()).unwrap();
        assert_eq!(first["event"], "session.created");
        assert_eq!(first["recipients"], 2);
        assert_eq!(first["payload"]["code"], "ABC234");
        let second: serde_json::Value = serde_json::from_str(&sub.recv().await.unwrap()).unwrap();
        assert_eq!(second["recipients"], 0);
    }
}
