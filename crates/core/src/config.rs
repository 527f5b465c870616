use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Like [`profiled_env_u32`] for periods: anything below 1 is clamped to 1.
fn profiled_env_period(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|v| v.max(1) as u64)
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub telegram: TelegramConfig,
    pub scheduler: SchedulerConfig,
    pub messages: MessageConfig,
    pub catalog: CatalogConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `PULSE_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("PULSE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            telegram: TelegramConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
            messages: MessageConfig::from_env_profiled(p),
            catalog: CatalogConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  telegram:    configured={}, api={}",
            self.telegram.is_configured(),
            self.telegram.api_base
        );
        tracing::info!(
            "  scheduler:   delivery every {}m, reminders every {}h, grace {}h",
            self.scheduler.question_check_minutes,
            self.scheduler.reminder_check_hours,
            self.scheduler.reminder_grace_hours
        );
        tracing::info!(
            "  catalog:     {}",
            self.catalog
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(built-in)".to_string())
        );
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_opt(p, "DATABASE_URL"),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "pulse"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    /// `DATABASE_URL` when set, otherwise assembled from the `PG_*` keys.
    pub fn connection_string(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.username.is_some()
    }
}

// ── Telegram ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Literal token or `${ENV_VAR}` reference.
    #[serde(skip_serializing)]
    pub bot_token: Option<String>,
    pub api_base: String,
    pub poll_timeout_secs: u64,
}

impl TelegramConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            bot_token: profiled_env_opt(p, "BOT_TOKEN"),
            api_base: profiled_env_or(p, "TELEGRAM_API_BASE", "https://api.telegram.org"),
            poll_timeout_secs: profiled_env_u32(p, "TELEGRAM_POLL_TIMEOUT_SECS", 30) as u64,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some()
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Delivery Scanner period in minutes.
    pub question_check_minutes: u64,
    /// Reminder Scanner period in hours.
    pub reminder_check_hours: u64,
    /// Minimum age of an unanswered delivery before it is reminded.
    pub reminder_grace_hours: u64,
    pub delivery_timeout_secs: u64,
    pub delivery_batch_limit: u32,
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            question_check_minutes: profiled_env_period(p, "QUESTION_CHECK_INTERVAL", 5),
            reminder_check_hours: profiled_env_period(p, "REMINDER_CHECK_INTERVAL", 24),
            reminder_grace_hours: profiled_env_period(p, "REMINDER_GRACE_HOURS", 24),
            delivery_timeout_secs: profiled_env_period(p, "DELIVERY_TIMEOUT_SECS", 15),
            delivery_batch_limit: profiled_env_u32(p, "DELIVERY_BATCH_LIMIT", 500).max(1),
        }
    }

    pub fn delivery_interval(&self) -> Duration {
        Duration::from_secs(self.question_check_minutes * 60)
    }

    pub fn reminder_interval(&self) -> Duration {
        Duration::from_secs(self.reminder_check_hours * 3_600)
    }

    pub fn reminder_grace(&self) -> chrono::Duration {
        chrono::Duration::hours(self.reminder_grace_hours as i64)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            question_check_minutes: 5,
            reminder_check_hours: 24,
            reminder_grace_hours: 24,
            delivery_timeout_secs: 15,
            delivery_batch_limit: 500,
        }
    }
}

// ── Message rendering ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    /// minijinja template for a first delivery; `text` is the question.
    pub question_template: String,
    /// minijinja template for a reminder.
    pub reminder_template: String,
}

impl MessageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            question_template: profiled_env_or(p, "QUESTION_TEMPLATE", "{{ text }}"),
            reminder_template: profiled_env_or(p, "REMINDER_TEMPLATE", "REMINDER: {{ text }}"),
        }
    }
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            question_template: "{{ text }}".to_string(),
            reminder_template: "REMINDER: {{ text }}".to_string(),
        }
    }
}

// ── Catalog ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub path: Option<PathBuf>,
}

impl CatalogConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            path: profiled_env_opt(p, "CATALOG_PATH").map(PathBuf::from),
        }
    }
}
