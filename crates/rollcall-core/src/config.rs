use chrono::{FixedOffset, Offset, Utc, Weekday};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Upper bound on a unit's rotation length.
pub const MAX_CYCLE_LENGTH: u8 = 10;
pub const DEFAULT_CYCLE_LENGTH: u8 = 6;
/// One-time codes live for two minutes unless configured otherwise.
pub const DEFAULT_CODE_TTL_SECS: u64 = 120;
pub const MAX_CODE_TTL_SECS: u64 = 86_400;
pub const DEFAULT_SESSION_CODE_LENGTH: usize = 6;
pub const DEFAULT_UPCOMING_DAYS: u32 = 7;

/// Top-level config (rollcall.toml + ROLLCALL_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollcallConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub materializer: MaterializerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// How long a writer waits on a locked database before giving up.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Rules the calendar resolver applies to every unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// The automatic weekly holiday. Overrides still win over it.
    #[serde(default = "default_rest_day")]
    pub weekly_rest_day: Weekday,
    /// Holiday name reported for the weekly rest day.
    #[serde(default = "default_rest_day_name")]
    pub rest_day_name: String,
    /// Offset of the institution's wall clock from UTC, in minutes.
    /// "Today" and slot end times are interpreted in this offset.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Cycle length given to lazily created unit configs.
    #[serde(default = "default_cycle_length")]
    pub default_cycle_length: u8,
    /// Hard cap on the `upcoming` forecast window.
    #[serde(default = "default_max_upcoming_days")]
    pub max_upcoming_days: u32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            weekly_rest_day: default_rest_day(),
            rest_day_name: default_rest_day_name(),
            utc_offset_minutes: 0,
            default_cycle_length: DEFAULT_CYCLE_LENGTH,
            max_upcoming_days: default_max_upcoming_days(),
        }
    }
}

impl CalendarConfig {
    /// The institution's fixed offset. Out-of-range values fall back to UTC.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Lifetime of a participant's one-time code.
    #[serde(default = "default_code_ttl_secs")]
    pub code_ttl_secs: u64,
    /// Length of the short code printed on an attendance session.
    #[serde(default = "default_session_code_length")]
    pub session_code_length: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            code_ttl_secs: DEFAULT_CODE_TTL_SECS,
            session_code_length: DEFAULT_SESSION_CODE_LENGTH,
        }
    }
}

/// Background materialization loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Units the engine materializes on every tick.
    #[serde(default)]
    pub units: Vec<String>,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            units: Vec::new(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_rest_day() -> Weekday {
    Weekday::Sun
}
fn default_rest_day_name() -> String {
    "Sunday".to_string()
}
fn default_cycle_length() -> u8 {
    DEFAULT_CYCLE_LENGTH
}
fn default_max_upcoming_days() -> u32 {
    60
}
fn default_code_ttl_secs() -> u64 {
    DEFAULT_CODE_TTL_SECS
}
fn default_session_code_length() -> usize {
    DEFAULT_SESSION_CODE_LENGTH
}
fn default_interval_secs() -> u64 {
    300
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rollcall/rollcall.db", home)
}

impl RollcallConfig {
    /// Load config from a TOML file with ROLLCALL_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `ROLLCALL_SESSIONS__CODE_TTL_SECS=90`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RollcallConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ROLLCALL_").split("__"))
            .extract()
            .map_err(|e| crate::error::RollcallError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let cycle = self.calendar.default_cycle_length;
        if cycle == 0 || cycle > MAX_CYCLE_LENGTH {
            return Err(crate::error::RollcallError::Config(format!(
                "calendar.default_cycle_length must be 1..={MAX_CYCLE_LENGTH}, got {cycle}"
            )));
        }
        if self.sessions.code_ttl_secs == 0 || self.sessions.code_ttl_secs > MAX_CODE_TTL_SECS {
            return Err(crate::error::RollcallError::Config(format!(
                "sessions.code_ttl_secs must be 1..={MAX_CODE_TTL_SECS}, got {}",
                self.sessions.code_ttl_secs
            )));
        }
        if !(4..=16).contains(&self.sessions.session_code_length) {
            return Err(crate::error::RollcallError::Config(format!(
                "sessions.session_code_length must be 4..=16, got {}",
                self.sessions.session_code_length
            )));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rollcall/rollcall.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = RollcallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.calendar.weekly_rest_day, Weekday::Sun);
        assert_eq!(config.sessions.code_ttl_secs, 120);
    }

    #[test]
    fn load_reads_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[calendar]\nweekly_rest_day = \"Sat\"\nutc_offset_minutes = 330\n\n[sessions]\ncode_ttl_secs = 90"
        )
        .unwrap();

        let config = RollcallConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.calendar.weekly_rest_day, Weekday::Sat);
        assert_eq!(config.calendar.offset().local_minus_utc(), 330 * 60);
        assert_eq!(config.sessions.code_ttl_secs, 90);
        assert_eq!(config.gateway.port, DEFAULT_PORT);
    }

    #[test]
    fn zero_cycle_length_is_rejected() {
        let mut config = RollcallConfig::default();
        config.calendar.default_cycle_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn absurd_offset_falls_back_to_utc() {
        let calendar = CalendarConfig {
            utc_offset_minutes: 100_000,
            ..CalendarConfig::default()
        };
        assert_eq!(calendar.offset().local_minus_utc(), 0);
    }
}
