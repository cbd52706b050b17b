use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::{SequencePolicy, TimeOfDay, MAX_SHORT_TERM_PUSH, SHORT_TERM_PUSH_INTERVAL};

/// Default PushPlus send endpoint.
pub const DEFAULT_PUSHPLUS_ENDPOINT: &str = "https://www.pushplus.plus/send";

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

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub schedule: ScheduleConfig,
    pub sequence: SequencePolicy,
    pub push: PushConfig,
    pub page: PageConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `LOGINPUSH_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("LOGINPUSH_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            schedule: ScheduleConfig::from_env_profiled(p),
            sequence: sequence_policy_from_env_profiled(p),
            push: PushConfig::from_env_profiled(p),
            page: PageConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  schedule:    push_enabled={}, daily={}, at={}, token={}",
            self.schedule.push_enabled,
            self.schedule.daily_push_enabled,
            self.schedule.auto_push_time,
            if self.schedule.push_token.is_some() { "set" } else { "(none)" }
        );
        tracing::info!(
            "  sequence:    max={}, interval={}s",
            self.sequence.max_short_term_push,
            self.sequence.short_term_interval.as_secs()
        );
        tracing::info!(
            "  push:        endpoint={}, webhook={}",
            self.push.pushplus_endpoint,
            self.push.webhook_url.as_deref().unwrap_or("(none)")
        );
        tracing::info!("  page:        url={}, marker={}", self.page.login_url, self.page.marker);
        tracing::info!("  storage:     state_dir={}", self.storage.state_dir.display());
    }

    /// Return a redacted view safe for status output (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "schedule": {
                "push_enabled": self.schedule.push_enabled,
                "daily_push_enabled": self.schedule.daily_push_enabled,
                "auto_push_time": self.schedule.auto_push_time.to_string(),
                "token_configured": self.schedule.push_token.is_some(),
            },
            "sequence": {
                "max_short_term_push": self.sequence.max_short_term_push,
                "short_term_interval_secs": self.sequence.short_term_interval.as_secs(),
            },
            "push": {
                "pushplus_endpoint": self.push.pushplus_endpoint,
                "webhook_configured": self.push.webhook_url.is_some(),
            },
            "page": { "login_url": self.page.login_url, "marker": self.page.marker },
            "storage": { "state_dir": self.storage.state_dir },
        })
    }
}

// ── Schedule ──────────────────────────────────────────────────

/// User-facing push settings. Read-only to the scheduling core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub daily_push_enabled: bool,
    pub auto_push_time: TimeOfDay,
    pub push_enabled: bool,
    pub push_token: Option<String>,
}

impl ScheduleConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            daily_push_enabled: profiled_env_bool(p, "DAILY_PUSH_ENABLED", false),
            auto_push_time: TimeOfDay::parse_or_default(
                profiled_env_opt(p, "AUTO_PUSH_TIME").as_deref(),
            ),
            push_enabled: profiled_env_bool(p, "PUSH_ENABLED", false),
            push_token: profiled_env_opt(p, "PUSHPLUS_TOKEN"),
        }
    }

    /// Pushing requires the switch to be on and a non-blank token.
    pub fn can_push(&self) -> bool {
        self.push_enabled && self.token().is_some()
    }

    /// Daily scheduling needs its own switch plus a token to deliver with.
    pub fn daily_schedule_active(&self) -> bool {
        self.daily_push_enabled && self.token().is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.push_token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_push_enabled: false,
            auto_push_time: TimeOfDay::FALLBACK,
            push_enabled: false,
            push_token: None,
        }
    }
}

fn sequence_policy_from_env_profiled(p: &str) -> SequencePolicy {
    SequencePolicy {
        max_short_term_push: profiled_env_u32(p, "SHORT_TERM_MAX_PUSH", MAX_SHORT_TERM_PUSH).max(1),
        short_term_interval: Duration::from_secs(
            profiled_env_u64(p, "SHORT_TERM_INTERVAL_SECS", SHORT_TERM_PUSH_INTERVAL.as_secs())
                .max(1),
        ),
    }
}

// ── Push delivery ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub pushplus_endpoint: String,
    /// Optional JSON webhook tried when PushPlus delivery fails.
    pub webhook_url: Option<String>,
    /// File holding the current login link (the QR payload).
    pub artifact_path: PathBuf,
}

impl PushConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            pushplus_endpoint: profiled_env_or(p, "PUSHPLUS_ENDPOINT", DEFAULT_PUSHPLUS_ENDPOINT),
            webhook_url: profiled_env_opt(p, "PUSH_WEBHOOK_URL"),
            artifact_path: PathBuf::from(profiled_env_or(p, "QR_ARTIFACT_PATH", "qrcode.txt")),
        }
    }
}

// ── Monitored page ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConfig {
    pub login_url: String,
    /// Substring identifying the monitored view in a URL.
    pub marker: String,
    /// Cookie jar checked by the login oracle.
    pub cookie_path: PathBuf,
}

impl PageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            login_url: profiled_env_or(p, "LOGIN_PAGE_URL", "https://pc.xuexi.cn/points/login.html"),
            marker: profiled_env_or(p, "LOGIN_PAGE_MARKER", "login"),
            cookie_path: PathBuf::from(profiled_env_or(p, "LOGIN_COOKIE_PATH", "cookies.txt")),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        let state_dir = profiled_env_opt(p, "LOGINPUSH_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);
        Self { state_dir }
    }
}
