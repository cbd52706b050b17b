//! Channel and dispatcher traits plus the shared error type.

use std::collections::HashMap;

/// Errors that can occur while producing or delivering a push.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Artifact capture failed: {0}")]
    Capture(String),

    #[error("Push service rejected message: code {code}: {message}")]
    Rejected { code: i64, message: String },
}

/// A rendered notification ready for delivery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Notification {
    /// The rendered title.
    pub title: String,
    /// The rendered HTML body.
    pub content: String,
    /// Additional metadata (e.g., attempt number, reason).
    pub metadata: HashMap<String, String>,
}

/// Trait for push channel implementations.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification through this channel.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Test connectivity with a sample notification.
    async fn test(&self) -> Result<(), NotifyError> {
        let test_notification = Notification {
            title: "[TEST] Login push".to_string(),
            content: "This is a test message from the login push service.".to_string(),
            metadata: HashMap::from([("reason".to_string(), "test".to_string())]),
        };
        self.send(&test_notification).await
    }

    /// Human-readable name for this channel (e.g., "pushplus", "webhook").
    fn channel_name(&self) -> &str;
}

/// Result of delivering a notification through a single channel.
#[derive(Debug)]
pub struct DeliveryResult {
    pub channel: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

// ── Dispatcher boundary ─────────────────────────────────────────────

/// Why a push is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushReason {
    /// One attempt of the short-term retry sequence.
    ShortTerm,
    /// Immediate push requested by the user.
    Manual,
}

impl PushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::Manual => "manual",
        }
    }
}

/// What the scheduler asks the dispatcher to push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRequest {
    pub reason: PushReason,
    /// 1-based attempt number inside the sequence; 0 outside one.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl ArtifactRequest {
    pub fn short_term(attempt: u32, max_attempts: u32) -> Self {
        Self {
            reason: PushReason::ShortTerm,
            attempt,
            max_attempts,
        }
    }

    pub fn manual() -> Self {
        Self {
            reason: PushReason::Manual,
            attempt: 0,
            max_attempts: 0,
        }
    }

    /// `" (attempt n/max)"` inside a sequence, empty otherwise.
    pub fn progress_suffix(&self) -> String {
        if self.attempt > 0 {
            format!(" (attempt {}/{})", self.attempt, self.max_attempts)
        } else {
            String::new()
        }
    }
}

/// Outcome of one dispatch, as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub success: bool,
    pub message: String,
}

impl DispatchOutcome {
    pub fn delivered(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Captures the login artifact and delivers it. The scheduler treats one call
/// as one attempt, whatever retries happen inside.
#[async_trait::async_trait]
pub trait PushDispatcher: Send + Sync {
    async fn dispatch(&self, request: ArtifactRequest) -> DispatchOutcome;
}
