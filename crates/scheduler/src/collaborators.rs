//! Interfaces the controller consumes, with the implementations the worker
//! ships.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use loginpush_core::ScheduleConfig;
use loginpush_notify::{PushDispatcher, TokenSource};

use crate::clock::WallClock;

// ── Login oracle ────────────────────────────────────────────────────

/// Answers "is the user logged in right now". Must be cheap and free of
/// side effects; it is asked at every tick.
pub trait LoginOracle: Send + Sync {
    fn is_logged_in(&self) -> bool;
}

/// Logged in once the host's cookie jar carries a session token.
#[derive(Debug, Clone)]
pub struct CookieFileOracle {
    path: PathBuf,
}

impl CookieFileOracle {
    const TOKEN_MARKER: &'static str = "token=";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LoginOracle for CookieFileOracle {
    fn is_logged_in(&self) -> bool {
        std::fs::read_to_string(&self.path)
            .map(|jar| jar.contains(Self::TOKEN_MARKER))
            .unwrap_or(false)
    }
}

// ── Reload requester ────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("page host is no longer listening")]
    HostGone,

    #[error("reload refused: {0}")]
    Refused(String),
}

/// Tears down and recreates the execution context. The caller must have
/// persisted everything it needs before calling.
pub trait ReloadRequester: Send + Sync {
    fn request_reload(&self) -> Result<(), ReloadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSignal;

/// Signals the page host over a channel.
#[derive(Debug, Clone)]
pub struct ChannelReloadRequester {
    tx: mpsc::UnboundedSender<ReloadSignal>,
}

impl ChannelReloadRequester {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReloadSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReloadRequester for ChannelReloadRequester {
    fn request_reload(&self) -> Result<(), ReloadError> {
        self.tx.send(ReloadSignal).map_err(|_| ReloadError::HostGone)
    }
}

// ── Status reporter ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// Fire-and-forget status line for the host UI.
pub trait StatusReporter: Send + Sync {
    fn report(&self, message: &str, severity: Severity);
}

/// Writes status lines to the log. Errors are logged at `warn` since none
/// of them stop the worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn report(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => tracing::info!(status = message, "status"),
            Severity::Success => tracing::info!(status = message, success = true, "status"),
            Severity::Error => tracing::warn!(status = message, "status"),
        }
    }
}

// ── Config source ───────────────────────────────────────────────────

pub trait ConfigSource: Send + Sync {
    fn schedule_config(&self) -> ScheduleConfig;
}

/// Shared, replaceable settings snapshot.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<ScheduleConfig>>,
}

impl SharedConfig {
    pub fn new(config: ScheduleConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn replace(&self, config: ScheduleConfig) {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        *guard = config;
    }
}

impl ConfigSource for SharedConfig {
    fn schedule_config(&self) -> ScheduleConfig {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

/// Pushes pick up a token saved in the settings without a restart.
impl TokenSource for SharedConfig {
    fn token(&self) -> Option<String> {
        self.schedule_config().token().map(str::to_string)
    }
}

// ── Bundle ──────────────────────────────────────────────────────────

/// Everything the controller talks to, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub oracle: Arc<dyn LoginOracle>,
    pub dispatcher: Arc<dyn PushDispatcher>,
    pub reload: Arc<dyn ReloadRequester>,
    pub reporter: Arc<dyn StatusReporter>,
    pub config: Arc<dyn ConfigSource>,
    pub wall_clock: Arc<dyn WallClock>,
}
