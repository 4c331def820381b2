use std::sync::Arc;
use std::time::Duration;

use rollcall_core::config::MaterializerConfig;
use rollcall_core::time::Clock;
use rollcall_sessions::{OneTimeCodeGate, SessionManager};
use tokio::sync::watch;
use tracing::{error, info};

use crate::materializer::Materializer;

/// What one engine tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub created: usize,
    pub skipped: usize,
    pub failed_units: usize,
    pub expired: usize,
    pub purged_codes: usize,
}

/// Background loop: materializes the configured units, persists derived
/// session expiry and drops stale one-time codes.
pub struct MaterializerEngine {
    materializer: Arc<Materializer>,
    sessions: Arc<SessionManager>,
    gate: Arc<OneTimeCodeGate>,
    clock: Arc<dyn Clock>,
    units: Vec<String>,
    interval: Duration,
}

impl MaterializerEngine {
    pub fn new(
        materializer: Arc<Materializer>,
        sessions: Arc<SessionManager>,
        gate: Arc<OneTimeCodeGate>,
        clock: Arc<dyn Clock>,
        config: &MaterializerConfig,
    ) -> Self {
        Self {
            materializer,
            sessions,
            gate,
            clock,
            units: config.units.clone(),
            interval: Duration::from_secs(config.interval_secs.max(1)),
        }
    }

    /// Main event loop. Ticks on the configured interval until `shutdown`
    /// broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(units = ?self.units, interval_secs = self.interval.as_secs(), "materializer engine started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick();
                    if report.created > 0 || report.expired > 0 || report.failed_units > 0 {
                        info!(?report, "materializer tick");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("materializer engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over every configured unit. Failures are logged per unit and
    /// never stop the other units.
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        for unit in &self.units {
            match self.materializer.materialize_today(unit, None) {
                Ok(outcome) => {
                    report.created += outcome.created.len();
                    report.skipped += outcome.skipped.len();
                }
                Err(e) => {
                    report.failed_units += 1;
                    error!(unit_id = %unit, code = e.code(), "materialization failed: {e}");
                }
            }
        }

        match self.sessions.sweep_expired(self.clock.now()) {
            Ok(n) => report.expired = n,
            Err(e) => error!("expiry sweep failed: {e}"),
        }
        report.purged_codes = self.gate.purge_expired();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone, Utc};
    use rollcall_calendar::CalendarManager;
    use rollcall_core::config::RollcallConfig;
    use rollcall_core::time::FixedClock;
    use rollcall_timetable::{SlotInput, TimetableStore};
    use rusqlite::Connection;

    fn engine_for(path: &std::path::Path, clock: Arc<FixedClock>) -> (MaterializerEngine, Arc<SessionManager>) {
        let open = || {
            let conn = Connection::open(path).unwrap();
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
                .unwrap();
            conn
        };
        let mut config = RollcallConfig::default();
        config.materializer.units = vec!["cse".into()];

        let calendar =
            Arc::new(CalendarManager::new(open(), config.calendar.clone(), clock.clone()).unwrap());
        let timetable = Arc::new(TimetableStore::new(open(), clock.clone()).unwrap());
        timetable
            .upsert_slot(
                "cse",
                None,
                1,
                &SlotInput {
                    period_number: 1,
                    start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                    is_break: false,
                    subject: Some("Maths".into()),
                    responsible_party: Some("T1".into()),
                },
                None,
            )
            .unwrap();

        let materializer = Arc::new(
            Materializer::new(open(), calendar, timetable, clock.clone(), &config).unwrap(),
        );
        let sessions =
            Arc::new(SessionManager::new(open(), clock.clone(), &config.sessions).unwrap());
        let gate = Arc::new(OneTimeCodeGate::new(&config.sessions, clock.clone()));
        let engine = MaterializerEngine::new(
            materializer,
            sessions.clone(),
            gate,
            clock,
            &config.materializer,
        );
        (engine, sessions)
    }

    #[test]
    fn tick_materializes_then_sweeps() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()));
        let (engine, sessions) = engine_for(&dir.path().join("rollcall.db"), clock.clone());

        let first = engine.tick();
        assert_eq!(first.created, 1);
        assert_eq!(engine.tick().created, 0);

        clock.set(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        assert_eq!(engine.tick().expired, 1);
        let listed = sessions.list_for_unit("cse", None).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()));
        let (engine, sessions) = engine_for(&dir.path().join("rollcall.db"), clock);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        // The first interval tick fires immediately.
        assert_eq!(sessions.list_for_unit("cse", None).unwrap().len(), 1);
    }
}
