//! Page host: the loop that owns a [`Controller`] and rebuilds it whenever
//! the page reloads.
//!
//! A reload drops the controller together with its timers. Only the flag
//! store, shared by every controller the host builds, carries state across.

use tokio::sync::mpsc;
use tracing::{debug, info};

use loginpush_core::{ScheduleConfig, SequencePolicy};

use crate::clock::TimerEvents;
use crate::collaborators::{Collaborators, ReloadSignal, SharedConfig};
use crate::controller::Controller;
use crate::flag_store::SequenceStore;
use crate::lifecycle::PageEvent;

/// Input from the host process.
#[derive(Debug, Clone)]
pub enum HostEvent {
    Page(PageEvent),
    SaveSettings(ScheduleConfig),
    LoginDetected,
    ManualPush,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The page must be torn down and loaded again.
    Reload,
    Shutdown,
}

/// Drive one page instance until it reloads or the host shuts down.
pub async fn run_page(
    controller: &mut Controller,
    timers: &mut TimerEvents,
    events: &mut mpsc::UnboundedReceiver<HostEvent>,
    reloads: &mut mpsc::UnboundedReceiver<ReloadSignal>,
    config: &SharedConfig,
) -> RunExit {
    loop {
        tokio::select! {
            biased;

            Some(ReloadSignal) = reloads.recv() => {
                controller.on_page_event(PageEvent::Unload).await;
                return RunExit::Reload;
            }

            Some(fired) = timers.recv() => {
                controller.on_timer(fired).await;
            }

            event = events.recv() => match event {
                Some(HostEvent::Page(page)) => controller.on_page_event(page).await,
                Some(HostEvent::SaveSettings(new_config)) => {
                    config.replace(new_config.clone());
                    controller.on_save(new_config).await;
                }
                Some(HostEvent::LoginDetected) => controller.on_login_detected_externally(),
                Some(HostEvent::ManualPush) => {
                    controller.on_manual_push().await;
                }
                Some(HostEvent::Shutdown) | None => {
                    controller.on_deactivated();
                    return RunExit::Shutdown;
                }
            },
        }

        if let Some(progress) = controller.progress_label() {
            debug!(%progress, state = ?controller.state(), "page loop idle");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostSummary {
    pub reloads: u32,
}

/// Builds a fresh controller per page load and keeps the event channels
/// alive across reloads.
pub struct PageHost {
    collab: Collaborators,
    store: SequenceStore,
    config: SharedConfig,
    policy: SequencePolicy,
    login_url: String,
    marker: String,
    events: mpsc::UnboundedReceiver<HostEvent>,
    reloads: mpsc::UnboundedReceiver<ReloadSignal>,
}

impl PageHost {
    /// `reloads` must be the receiving side of the requester in `collab`.
    /// Returns the host and the sender for [`HostEvent`]s.
    pub fn new(
        mut collab: Collaborators,
        store: SequenceStore,
        config: SharedConfig,
        reloads: mpsc::UnboundedReceiver<ReloadSignal>,
    ) -> (Self, mpsc::UnboundedSender<HostEvent>) {
        collab.config = std::sync::Arc::new(config.clone());
        let (tx, events) = mpsc::unbounded_channel();
        let host = Self {
            collab,
            store,
            config,
            policy: SequencePolicy::default(),
            login_url: "login".to_string(),
            marker: "login".to_string(),
            events,
            reloads,
        };
        (host, tx)
    }

    pub fn with_policy(mut self, policy: SequencePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Page the host loads, and the marker identifying it as the
    /// monitored view.
    pub fn with_page(mut self, login_url: impl Into<String>, marker: impl Into<String>) -> Self {
        self.login_url = login_url.into();
        self.marker = marker.into();
        self
    }

    fn load_page(&self) -> (Controller, TimerEvents) {
        Controller::new(
            self.collab.clone(),
            self.store.clone(),
            self.policy,
            self.marker.clone(),
        )
    }

    pub async fn run(mut self) -> HostSummary {
        let mut summary = HostSummary::default();
        info!(url = %self.login_url, "page host started");

        loop {
            let (mut controller, mut timers) = self.load_page();
            controller
                .on_page_event(PageEvent::Loaded {
                    url: self.login_url.clone(),
                })
                .await;

            let exit = run_page(
                &mut controller,
                &mut timers,
                &mut self.events,
                &mut self.reloads,
                &self.config,
            )
            .await;

            match exit {
                RunExit::Reload => {
                    summary.reloads += 1;
                    info!(reloads = summary.reloads, "reloading page for a fresh artifact");
                }
                RunExit::Shutdown => break,
            }
        }

        info!(reloads = summary.reloads, "page host stopped");
        summary
    }
}
