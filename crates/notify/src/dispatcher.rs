//! Routes login pushes to the configured channels.
//!
//! [`Dispatcher`] tries its channels in order and stops at the first one
//! that accepts the message. [`QrPushDispatcher`] sits on top: it captures
//! the artifact, renders the message and reports a single outcome to the
//! scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use crate::artifact::ArtifactSource;
use crate::templating::{
    LoginContext, TemplateContext, TemplateRenderer, DEFAULT_APP_SCHEME, FALLBACK_TEMPLATE,
    LOGIN_REMINDER_TEMPLATE, LOGIN_REMINDER_TITLE,
};
use crate::traits::{
    ArtifactRequest, DeliveryResult, DispatchOutcome, Notification, Notifier, NotifyError,
    PushDispatcher,
};

/// Delivers a notification through an ordered list of fallback channels.
pub struct Dispatcher {
    channels: Vec<Box<dyn Notifier>>,
}

impl Dispatcher {
    /// Create a dispatcher trying `channels` in order.
    pub fn new(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { channels }
    }

    /// Create an empty dispatcher.
    pub fn empty() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    /// Append a lower-priority fallback channel.
    pub fn push_channel(&mut self, channel: Box<dyn Notifier>) {
        self.channels.push(channel);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Deliver through the first channel that succeeds.
    ///
    /// Returns one result per channel tried; the last entry is the
    /// successful one unless every channel failed.
    pub async fn deliver(&self, notification: &Notification) -> Vec<DeliveryResult> {
        if self.channels.is_empty() {
            tracing::debug!("No push channels configured");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(self.channels.len());

        for channel in &self.channels {
            let start = std::time::Instant::now();
            let result = channel.send(notification).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    tracing::info!(
                        channel = channel.channel_name(),
                        duration_ms,
                        "Push delivered"
                    );
                    results.push(DeliveryResult {
                        channel: channel.channel_name().to_string(),
                        success: true,
                        error: None,
                        duration_ms,
                    });
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        channel = channel.channel_name(),
                        error = %e,
                        duration_ms,
                        "Push delivery failed, trying next channel"
                    );
                    results.push(DeliveryResult {
                        channel: channel.channel_name().to_string(),
                        success: false,
                        error: Some(e.to_string()),
                        duration_ms,
                    });
                }
            }
        }

        results
    }

    /// Send a test notification through a single channel by index.
    pub async fn test_channel(&self, channel_index: usize) -> Result<(), NotifyError> {
        let channel = self.channels.get(channel_index).ok_or_else(|| {
            NotifyError::Config(format!("Channel index {channel_index} out of range"))
        })?;
        channel.test().await
    }
}

// ── QR push dispatcher ──────────────────────────────────────────────

/// Captures the login artifact and pushes it through a [`Dispatcher`].
///
/// A capture failure still produces a push, using the fallback body, so the
/// user is prompted to log in by hand.
pub struct QrPushDispatcher {
    source: Arc<dyn ArtifactSource>,
    renderer: TemplateRenderer,
    dispatcher: Dispatcher,
    app_scheme: String,
}

impl QrPushDispatcher {
    pub fn new(source: Arc<dyn ArtifactSource>, dispatcher: Dispatcher) -> Self {
        Self {
            source,
            renderer: TemplateRenderer::new(),
            dispatcher,
            app_scheme: DEFAULT_APP_SCHEME.to_string(),
        }
    }

    /// Override the companion app deep link.
    pub fn with_app_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.app_scheme = scheme.into();
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Capture the artifact and render the message for `request`.
    ///
    /// Returns the notification plus the capture error, if the fallback
    /// body had to be used.
    pub async fn compose(
        &self,
        request: &ArtifactRequest,
    ) -> Result<(Notification, Option<NotifyError>), NotifyError> {
        let (login, capture_error) = match self.source.capture().await {
            Ok(artifact) => (
                Some(LoginContext {
                    url: artifact.login_url,
                }),
                None,
            ),
            Err(e) => {
                tracing::warn!(error = %e, "artifact capture failed, sending fallback push");
                (None, Some(e))
            }
        };

        let template = if login.is_some() {
            LOGIN_REMINDER_TEMPLATE
        } else {
            FALLBACK_TEMPLATE
        };
        let ctx = TemplateContext {
            login,
            progress: request.progress_suffix(),
            app_scheme: self.app_scheme.clone(),
            now: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        let content = self.renderer.render(template, &ctx)?;

        let notification = Notification {
            title: LOGIN_REMINDER_TITLE.to_string(),
            content,
            metadata: HashMap::from([
                ("reason".to_string(), request.reason.as_str().to_string()),
                ("attempt".to_string(), request.attempt.to_string()),
            ]),
        };
        Ok((notification, capture_error))
    }
}

#[async_trait::async_trait]
impl PushDispatcher for QrPushDispatcher {
    async fn dispatch(&self, request: ArtifactRequest) -> DispatchOutcome {
        let suffix = request.progress_suffix();

        let (notification, capture_error) = match self.compose(&request).await {
            Ok(composed) => composed,
            Err(e) => return DispatchOutcome::failed(format!("Could not build push: {e}{suffix}")),
        };

        let results = self.dispatcher.deliver(&notification).await;
        let delivered = results.iter().any(|r| r.success);

        match (delivered, capture_error) {
            (true, None) => DispatchOutcome::delivered(format!("QR code pushed to your device{suffix}")),
            (true, Some(e)) => DispatchOutcome::failed(format!(
                "QR code unavailable ({e}), sent a plain login reminder{suffix}"
            )),
            (false, _) => {
                let reason = results
                    .last()
                    .and_then(|r| r.error.clone())
                    .unwrap_or_else(|| "no push channel configured".to_string());
                DispatchOutcome::failed(format!("Push failed: {reason}{suffix}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::QrArtifact;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockNotifier {
        name: String,
        send_count: Arc<AtomicUsize>,
        should_fail: bool,
        last_content: Arc<Mutex<Option<String>>>,
    }

    impl MockNotifier {
        fn new(name: &str, should_fail: bool) -> (Self, Arc<AtomicUsize>) {
            let count = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name: name.to_string(),
                    send_count: count.clone(),
                    should_fail,
                    last_content: Arc::new(Mutex::new(None)),
                },
                count,
            )
        }
    }

    #[async_trait::async_trait]
    impl Notifier for MockNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.send_count.fetch_add(1, Ordering::SeqCst);
            *self.last_content.lock().unwrap() = Some(notification.content.clone());
            if self.should_fail {
                Err(NotifyError::Config("mock failure".to_string()))
            } else {
                Ok(())
            }
        }
        fn channel_name(&self) -> &str {
            &self.name
        }
    }

    struct StaticSource(Option<String>);

    #[async_trait::async_trait]
    impl ArtifactSource for StaticSource {
        async fn capture(&self) -> Result<QrArtifact, NotifyError> {
            match &self.0 {
                Some(url) => Ok(QrArtifact {
                    login_url: url.clone(),
                    captured_at: chrono::Utc::now(),
                }),
                None => Err(NotifyError::Capture("no qr on screen".to_string())),
            }
        }
    }

    fn notification() -> Notification {
        Notification {
            title: "test".to_string(),
            content: "test body".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn first_success_stops_fallback() {
        let (a, count_a) = MockNotifier::new("a", false);
        let (b, count_b) = MockNotifier::new("b", false);
        let dispatcher = Dispatcher::new(vec![Box::new(a), Box::new(b)]);

        let results = dispatcher.deliver(&notification()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_falls_through_to_next_channel() {
        let (fail, _) = MockNotifier::new("fail", true);
        let (ok, count) = MockNotifier::new("ok", false);
        let dispatcher = Dispatcher::new(vec![Box::new(fail), Box::new(ok)]);

        let results = dispatcher.deliver(&notification()).await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[1].success);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_dispatcher_delivers_nothing() {
        let results = Dispatcher::empty().deliver(&notification()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_channel_out_of_range() {
        let result = Dispatcher::empty().test_channel(3).await;
        assert!(matches!(result, Err(NotifyError::Config(_))));
    }

    #[tokio::test]
    async fn qr_dispatch_reports_success_with_progress() {
        let (ok, count) = MockNotifier::new("ok", false);
        let content = ok.last_content.clone();
        let qr = QrPushDispatcher::new(
            Arc::new(StaticSource(Some("https://login.example/qr".into()))),
            Dispatcher::new(vec![Box::new(ok)]),
        );

        let outcome = qr.dispatch(ArtifactRequest::short_term(2, 5)).await;
        assert!(outcome.success);
        assert!(outcome.message.contains("(attempt 2/5)"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let body = content.lock().unwrap().clone().unwrap();
        assert!(body.contains("create-qr-code?data=https%3A%2F%2Flogin.example%2Fqr"));
    }

    #[tokio::test]
    async fn capture_failure_sends_fallback_and_reports_failure() {
        let (ok, count) = MockNotifier::new("ok", false);
        let content = ok.last_content.clone();
        let qr = QrPushDispatcher::new(
            Arc::new(StaticSource(None)),
            Dispatcher::new(vec![Box::new(ok)]),
        );

        let outcome = qr.dispatch(ArtifactRequest::manual()).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("plain login reminder"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let body = content.lock().unwrap().clone().unwrap();
        assert!(body.contains("could not be captured"));
    }

    #[tokio::test]
    async fn all_channels_failing_reports_last_error() {
        let (fail, _) = MockNotifier::new("fail", true);
        let qr = QrPushDispatcher::new(
            Arc::new(StaticSource(Some("https://login.example/qr".into()))),
            Dispatcher::new(vec![Box::new(fail)]),
        );
        let outcome = qr.dispatch(ArtifactRequest::short_term(1, 5)).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("mock failure"));
    }
}
