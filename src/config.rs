//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::engine::flow::FlowPolicy;
use crate::error::ConfigError;

/// Default model for the vision oracles.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Which guidance oracle backs popup text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuidanceMode {
    /// Show the step description verbatim.
    Passthrough,
    /// Ask the vision model for a screenshot-aware popup.
    Vision,
}

impl FromStr for GuidanceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passthrough" => Ok(Self::Passthrough),
            "vision" => Ok(Self::Vision),
            other => Err(ConfigError::InvalidValue {
                key: "LESSON_GUIDE_GUIDANCE".into(),
                message: format!("expected 'passthrough' or 'vision', got '{other}'"),
            }),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP/WebSocket listen port.
    pub port: u16,
    /// SQLite lesson database.
    pub db_path: PathBuf,
    /// Optional JSON course file consulted when the database has no steps.
    pub course_path: Option<PathBuf>,
    /// Upper bound on any single oracle call.
    pub oracle_timeout: Duration,
    /// Upper bound on one popup delivery, webhook included.
    pub delivery_timeout: Duration,
    /// Delay between completion checks in the polling flow.
    pub poll_interval: Duration,
    /// Completion checks per step before the polling flow gives up.
    pub max_checks_per_step: u32,
    pub guidance: GuidanceMode,
    /// Optional URL that popups are also POSTed to.
    pub popup_webhook: Option<String>,
    pub api_key: Option<SecretString>,
    pub model: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            db_path: PathBuf::from("./data/lessons.db"),
            course_path: None,
            oracle_timeout: Duration::from_secs(30),
            delivery_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(10),
            max_checks_per_step: 60,
            guidance: GuidanceMode::Passthrough,
            popup_webhook: None,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `LESSON_GUIDE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = parse_var("LESSON_GUIDE_PORT")?.unwrap_or(defaults.port);

        let db_path = std::env::var("LESSON_GUIDE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let course_path = std::env::var("LESSON_GUIDE_COURSE_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let oracle_timeout = parse_var("LESSON_GUIDE_ORACLE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.oracle_timeout);

        let delivery_timeout = parse_var("LESSON_GUIDE_DELIVERY_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.delivery_timeout);

        let poll_interval = parse_var("LESSON_GUIDE_POLL_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let max_checks_per_step =
            parse_var("LESSON_GUIDE_MAX_CHECKS_PER_STEP")?.unwrap_or(defaults.max_checks_per_step);

        let guidance = match std::env::var("LESSON_GUIDE_GUIDANCE") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.guidance,
        };

        let popup_webhook = std::env::var("LESSON_GUIDE_POPUP_WEBHOOK")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        let model = std::env::var("LESSON_GUIDE_MODEL").unwrap_or(defaults.model);

        Ok(Self {
            port,
            db_path,
            course_path,
            oracle_timeout,
            delivery_timeout,
            poll_interval,
            max_checks_per_step,
            guidance,
            popup_webhook,
            api_key,
            model,
        })
    }

    /// Polling policy derived from this configuration.
    pub fn flow_policy(&self) -> FlowPolicy {
        FlowPolicy {
            poll_interval: self.poll_interval,
            max_checks_per_step: self.max_checks_per_step,
        }
    }
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
