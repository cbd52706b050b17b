//! Push delivery for login reminders.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable push channels
//! - PushPlus and generic webhook channel implementations
//! - Minijinja templates for the login reminder and its fallback
//! - `QrPushDispatcher`, which captures the login artifact and delivers it
//!   through an ordered list of fallback channels

pub mod artifact;
pub mod dispatcher;
pub mod pushplus;
pub mod templating;
pub mod traits;
pub mod webhook;

pub use artifact::{ArtifactSource, FileArtifactSource, QrArtifact};
pub use dispatcher::{Dispatcher, QrPushDispatcher};
pub use pushplus::{PushPlusNotifier, TokenSource};
pub use traits::{
    ArtifactRequest, DispatchOutcome, Notification, Notifier, NotifyError, PushDispatcher,
    PushReason,
};
pub use webhook::WebhookNotifier;
