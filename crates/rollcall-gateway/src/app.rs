use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use rollcall_calendar::CalendarManager;
use rollcall_core::config::RollcallConfig;
use rollcall_core::events::SessionCreated;
use rollcall_core::time::Clock;
use rollcall_scheduler::{Materializer, MaterializerEngine};
use rollcall_sessions::{OneTimeCodeGate, SessionManager};
use rollcall_timetable::{SqliteDirectory, TimetableStore};
use tokio::sync::mpsc;
use tracing::info;

use crate::broadcast::EventBroadcaster;
use crate::http;
use crate::migrations;

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: RollcallConfig,
    pub clock: Arc<dyn Clock>,
    pub calendar: Arc<CalendarManager>,
    pub timetable: Arc<TimetableStore>,
    /// Roster and assignment lookups.
    pub directory: Arc<SqliteDirectory>,
    pub sessions: Arc<SessionManager>,
    pub gate: Arc<OneTimeCodeGate>,
    pub materializer: Arc<Materializer>,
    pub broadcaster: EventBroadcaster,
}

impl AppState {
    /// Open the database, run migrations and build every subsystem.
    /// Each subsystem gets its own connection to the same file.
    pub fn open(
        config: RollcallConfig,
        clock: Arc<dyn Clock>,
        events: mpsc::Sender<SessionCreated>,
    ) -> anyhow::Result<Self> {
        let path = config.database.path.clone();
        let busy = config.database.busy_timeout_ms;
        let open = || migrations::open_connection(&path, busy);

        migrations::prepare_schema(&open()?)?;
        info!("database migrations complete");

        let calendar = Arc::new(CalendarManager::new(
            open()?,
            config.calendar.clone(),
            clock.clone(),
        )?);
        let timetable = Arc::new(TimetableStore::new(open()?, clock.clone())?);
        let directory = Arc::new(SqliteDirectory::new(open()?)?);
        let sessions = Arc::new(
            SessionManager::new(open()?, clock.clone(), &config.sessions)?
                .with_events(events.clone()),
        );
        let gate = Arc::new(OneTimeCodeGate::new(&config.sessions, clock.clone()));
        let materializer = Arc::new(
            Materializer::new(
                open()?,
                calendar.clone(),
                timetable.clone(),
                clock.clone(),
                &config,
            )?
            .with_events(events),
        );

        Ok(Self {
            config,
            clock,
            calendar,
            timetable,
            directory,
            sessions,
            gate,
            materializer,
            broadcaster: EventBroadcaster::new(),
        })
    }

    /// Background loop over the configured units, sharing this state's
    /// subsystems.
    pub fn engine(&self) -> MaterializerEngine {
        MaterializerEngine::new(
            self.materializer.clone(),
            self.sessions.clone(),
            self.gate.clone(),
            self.clock.clone(),
            &self.config.materializer,
        )
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health::health_handler))
        .route("/events", get(http::events::events_handler))
        // calendar
        .route("/units/{unit}/day-order", get(http::calendar::resolve))
        .route("/units/{unit}/upcoming", get(http::calendar::upcoming))
        .route(
            "/units/{unit}/config",
            get(http::calendar::get_config).post(http::calendar::update_config),
        )
        .route(
            "/units/{unit}/overrides",
            get(http::calendar::list_overrides).post(http::calendar::set_override),
        )
        .route(
            "/units/{unit}/overrides/{date}",
            axum::routing::delete(http::calendar::delete_override),
        )
        // timetable
        .route(
            "/units/{unit}/timetable/{day_order}",
            get(http::timetable::get_day).put(http::timetable::replace_day),
        )
        .route("/units/{unit}/periods", get(http::timetable::list_periods))
        .route(
            "/units/{unit}/periods/{period}",
            put(http::timetable::set_period),
        )
        .route(
            "/units/{unit}/assignments",
            get(http::timetable::list_assignments),
        )
        // materialization
        .route(
            "/units/{unit}/materialize",
            post(http::materialize::materialize),
        )
        .route(
            "/units/{unit}/materialize/pending",
            get(http::materialize::pending),
        )
        // sessions
        .route("/units/{unit}/sessions", get(http::sessions::list_for_unit))
        .route("/sessions", post(http::sessions::create))
        .route("/sessions/verify", post(http::sessions::verify))
        .route("/sessions/{id}", get(http::sessions::get_session))
        .route("/sessions/{id}/records", get(http::sessions::records))
        .route("/sessions/{id}/codes", post(http::sessions::issue_code))
        .route("/sessions/{id}/attendance", post(http::sessions::mark))
        .route("/sessions/{id}/on-duty", post(http::sessions::on_duty))
        .route("/sessions/{id}/complete", post(http::sessions::complete))
        .route("/sessions/{id}/extend", post(http::sessions::extend))
        .route("/sessions/{id}/summary", get(http::sessions::summary))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
