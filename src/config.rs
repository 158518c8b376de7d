// src/config.rs

use std::env;
use std::time::Duration;

use dotenvy::dotenv;

/// Passing threshold used when a quiz has no passing score configured.
pub const DEFAULT_PASSING_PERCENTAGE: i64 = 60;

/// Duration applied when a quiz has no usable duration configured.
pub const FALLBACK_DURATION_MINUTES: i64 = 30;

/// Integrity violations allowed before the attempt is force-submitted.
pub const DEFAULT_VIOLATION_THRESHOLD: u32 = 3;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. `None` runs the service on in-memory stores.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub rust_log: String,
    pub bind_addr: String,
    pub session: SessionSettings,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        Self {
            database_url,
            jwt_secret,
            rust_log,
            bind_addr,
            session: SessionSettings::from_env(),
        }
    }
}

/// Tunables of the exam session core.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub fallback_duration_minutes: i64,
    pub tick_interval: Duration,
    /// Quiet period after the last change before a background write.
    pub sync_debounce: Duration,
    /// Ceiling on write latency under continuous input, and the minimum
    /// gap between two background writes.
    pub sync_throttle: Duration,
    pub violation_threshold: u32,
    /// Overall bound on one submission sequence before it is reset for retry.
    pub submit_guard: Duration,
    /// Bound on the attempt record write itself.
    pub write_timeout: Duration,
    /// Delay the client should show the confirmation before navigating away.
    pub redirect_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            fallback_duration_minutes: FALLBACK_DURATION_MINUTES,
            tick_interval: Duration::from_secs(1),
            sync_debounce: Duration::from_secs(5),
            sync_throttle: Duration::from_secs(2),
            violation_threshold: DEFAULT_VIOLATION_THRESHOLD,
            submit_guard: Duration::from_secs(15),
            write_timeout: Duration::from_secs(10),
            redirect_delay: Duration::from_secs(2),
        }
    }
}

impl SessionSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            fallback_duration_minutes: env_number(
                "EXAM_FALLBACK_DURATION_MINUTES",
                defaults.fallback_duration_minutes,
            ),
            tick_interval: env_millis("EXAM_TICK_INTERVAL_MS", defaults.tick_interval),
            sync_debounce: env_millis("EXAM_SYNC_DEBOUNCE_MS", defaults.sync_debounce),
            sync_throttle: env_millis("EXAM_SYNC_THROTTLE_MS", defaults.sync_throttle),
            violation_threshold: env_number(
                "EXAM_VIOLATION_THRESHOLD",
                defaults.violation_threshold,
            ),
            submit_guard: env_millis("EXAM_SUBMIT_GUARD_MS", defaults.submit_guard),
            write_timeout: env_millis("EXAM_WRITE_TIMEOUT_MS", defaults.write_timeout),
            redirect_delay: env_millis("EXAM_REDIRECT_DELAY_MS", defaults.redirect_delay),
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{} must be a number", key)),
        Err(_) => default,
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_number(key, default.as_millis() as u64))
}
