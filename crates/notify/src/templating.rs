//! Minijinja template rendering for login push messages.
//!
//! Two built-in bodies exist: the login reminder carrying the QR link, and
//! a fallback sent when the artifact could not be captured. Templates are
//! plain strings, so a fresh [`minijinja::Environment`] is created per
//! render call.

use crate::traits::NotifyError;

/// Title used for every login push.
pub const LOGIN_REMINDER_TITLE: &str = "Login reminder";

/// Body carrying the app deep link and a scannable QR image.
pub const LOGIN_REMINDER_TEMPLATE: &str = r#"<div style="padding: 15px;">
<p>Scan or tap to log in{{ progress }}.</p>
<a href="{{ app_scheme }}?url={{ login.url | urlencode }}" style="display: block; text-align: center; padding: 12px; background-color: #287ae4; color: white; text-decoration: none; border-radius: 5px;">Open the app to log in</a>
<p style="text-align: center;"><img src="https://api.qrserver.com/v1/create-qr-code?data={{ login.url | urlencode }}" style="width: 200px; height: 200px;"></p>
<p style="text-align: center; color: #888; font-size: 12px;">Sent automatically at {{ now }}</p>
</div>"#;

/// Body used when no artifact is available.
pub const FALLBACK_TEMPLATE: &str = r#"<div style="padding: 15px;">
<a href="{{ app_scheme }}" style="display: block; text-align: center; padding: 12px; background-color: #287ae4; color: white; text-decoration: none; border-radius: 5px;">Open the app to log in</a>
<p style="text-align: center; color: #f44336;">The login code could not be captured{{ progress }}. Please open the app and log in manually.</p>
<p style="text-align: center; color: #888; font-size: 12px;">Sent automatically at {{ now }}</p>
</div>"#;

/// Deep link opening the companion app on its study feed.
pub const DEFAULT_APP_SCHEME: &str = "dtxuexi://appclient/page/study_feeds";

/// Context data available to push templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TemplateContext {
    /// Captured artifact, absent for the fallback body.
    pub login: Option<LoginContext>,
    /// `" (attempt n/max)"` inside a sequence, empty otherwise.
    pub progress: String,
    /// Deep link into the companion app.
    pub app_scheme: String,
    /// Local timestamp of the render.
    pub now: String,
}

/// Artifact data exposed to templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LoginContext {
    pub url: String,
}

/// Renders push templates using minijinja.
#[derive(Debug)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    /// Create a new template renderer.
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("urlencode", urlencode_filter);
        env
    }

    /// Render a template string with the given context.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if the template is invalid or
    /// rendering fails.
    pub fn render(&self, template_str: &str, ctx: &TemplateContext) -> Result<String, NotifyError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Custom filter: percent-encode a value for use inside a query string.
fn urlencode_filter(value: String) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
