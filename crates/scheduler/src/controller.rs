//! The notification scheduling state machine.
//!
//! [`Controller`] decides when a push is owed, drives the bounded short-term
//! retry sequence and survives the reloads that sequence triggers by keeping
//! everything that must cross one in the [`SequenceStore`].
//!
//! Handlers take `&mut self`, so one handler always runs to completion
//! before the next event is looked at. Timer fires that were queued for a
//! timer cancelled in the meantime are dropped by the clock.

use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tracing::{debug, info, warn};

use loginpush_core::{PushRecord, ScheduleConfig, SequencePolicy, SequenceState};
use loginpush_notify::{ArtifactRequest, DispatchOutcome};

use crate::clock::{SchedulingClock, TimerEvents, TimerFired, TimerKind};
use crate::collaborators::{Collaborators, Severity};
use crate::flag_store::SequenceStore;
use crate::lifecycle::{LifecycleSignal, PageEvent, PageLifecycleTracker};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NssmState {
    Idle,
    DailyArmed,
    ShortTermActive,
    AwaitingReload,
    Stopped { logged_in: bool },
}

/// Read-only view for status displays and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerSnapshot {
    pub state: NssmState,
    pub sequence: SequenceState,
    pub page_active: bool,
    pub daily_armed: bool,
    pub short_term_armed: bool,
    pub next_daily: Option<DateTime<FixedOffset>>,
}

/// Whether a daily push is owed right now.
///
/// Never owed while a sequence runs (the sequence owns pushing) and never
/// on first launch. Otherwise owed when daily pushing is on, nothing was
/// pushed today and today's push time has been reached.
pub fn push_owed(
    sequence: &SequenceState,
    record: &PushRecord,
    config: &ScheduleConfig,
    now: &DateTime<FixedOffset>,
) -> bool {
    if sequence.in_short_term_sequence {
        return false;
    }
    if record.is_first_launch() {
        return false;
    }
    config.daily_push_enabled
        && !record.pushed_on(now.date_naive())
        && *now >= config.auto_push_time.on_same_day(now)
}

pub struct Controller {
    collab: Collaborators,
    store: SequenceStore,
    policy: SequencePolicy,
    tracker: PageLifecycleTracker,
    clock: SchedulingClock,
    state: NssmState,
    sequence: SequenceState,
}

impl Controller {
    /// Build a controller for a freshly loaded page.
    ///
    /// The returned receiver yields this controller's timer fires; feed them
    /// back through [`Controller::on_timer`].
    pub fn new(
        collab: Collaborators,
        store: SequenceStore,
        policy: SequencePolicy,
        marker: impl Into<String>,
    ) -> (Self, TimerEvents) {
        let (clock, timers) = SchedulingClock::new();
        let sequence = store.load_sequence();
        let state = if sequence.pending_reload && sequence.in_short_term_sequence {
            NssmState::AwaitingReload
        } else {
            NssmState::Idle
        };
        let controller = Self {
            collab,
            store,
            policy,
            tracker: PageLifecycleTracker::new(marker),
            clock,
            state,
            sequence,
        };
        (controller, timers)
    }

    pub fn state(&self) -> NssmState {
        self.state
    }

    pub fn sequence(&self) -> SequenceState {
        self.sequence
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            state: self.state,
            sequence: self.sequence,
            page_active: self.tracker.is_active(),
            daily_armed: self.clock.is_armed(TimerKind::Daily),
            short_term_armed: self.clock.is_armed(TimerKind::ShortTerm),
            next_daily: self.clock.daily_target(),
        }
    }

    /// `"push progress n/max"` while a sequence is part-way through.
    pub fn progress_label(&self) -> Option<String> {
        let count = self.sequence.short_term_push_count;
        let max = self.policy.max_short_term_push;
        (self.sequence.in_short_term_sequence && count > 0 && count < max)
            .then(|| format!("push progress {count}/{max}"))
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Route a raw navigation event through the lifecycle tracker.
    pub async fn on_page_event(&mut self, event: PageEvent) {
        let signal = self.tracker.observe(&event, &self.store, &self.sequence);
        match signal {
            Some(LifecycleSignal::Activated) => self.activate().await,
            Some(LifecycleSignal::Deactivated { .. }) => self.deactivate(),
            None => {}
        }
    }

    /// The monitored page became active. Ignored if it already was.
    pub async fn on_activated(&mut self) {
        if self.tracker.mark_active() {
            self.activate().await;
        }
    }

    /// The monitored page was left. Ignored if it was not active.
    pub fn on_deactivated(&mut self) {
        if self.tracker.mark_inactive() {
            self.deactivate();
        }
    }

    async fn activate(&mut self) {
        let config = self.collab.config.schedule_config();
        self.sequence = self.store.load_sequence();

        if self.sequence.pending_reload && self.sequence.in_short_term_sequence {
            self.resume_after_reload().await;
            return;
        }
        if self.sequence != SequenceState::default() {
            debug!(sequence = ?self.sequence, "discarding sequence left behind by a departure");
            self.clear_sequence();
        }

        let now = self.collab.wall_clock.now();
        let record = self.store.load_push_record();
        if push_owed(&self.sequence, &record, &config, &now) && config.can_push() {
            info!(at = %config.auto_push_time, "daily push overdue, starting sequence");
            self.start_sequence().await;
        } else if config.daily_schedule_active() {
            if record.is_first_launch() {
                debug!("first launch, deferring to the next scheduled time");
            }
            self.schedule_next(&config);
        }
    }

    fn deactivate(&mut self) {
        self.clock.cancel_all();
        if self.store.pending_reload() {
            debug!("page left for a reload, keeping sequence state");
            return;
        }
        if self.sequence.in_short_term_sequence {
            info!(
                count = self.sequence.short_term_push_count,
                "left the login page, abandoning short-term sequence"
            );
        }
        self.clear_sequence();
        self.state = NssmState::Idle;
    }

    // ── Settings and external events ────────────────────────────────

    /// Re-evaluate scheduling after the user saved new settings.
    ///
    /// Any running sequence is dropped and a previous stop is lifted.
    pub async fn on_save(&mut self, config: ScheduleConfig) {
        self.clock.cancel_all();
        self.clear_sequence();
        self.state = NssmState::Idle;

        if config.can_push() && config.daily_push_enabled && self.tracker.is_active() {
            self.schedule_next(&config);
        }
        self.report("Settings saved", Severity::Success);
    }

    /// The host saw a login on its own. Stops everything.
    pub fn on_login_detected_externally(&mut self) {
        self.stop_logged_in();
    }

    /// Capture and push the artifact once, right now, outside any sequence.
    pub async fn on_manual_push(&mut self) -> DispatchOutcome {
        let config = self.collab.config.schedule_config();
        if !config.can_push() {
            let outcome = DispatchOutcome::failed("Push is disabled or no token is configured");
            self.report(&outcome.message, Severity::Error);
            return outcome;
        }
        self.dispatch(ArtifactRequest::manual()).await
    }

    // ── Timers ──────────────────────────────────────────────────────

    pub async fn on_timer(&mut self, fired: TimerFired) {
        if !self.clock.accept(&fired) {
            debug!(timer = fired.kind.as_str(), generation = fired.generation, "ignoring stale timer");
            return;
        }
        if !self.tracker.is_active() {
            debug!(timer = fired.kind.as_str(), "page inactive, ignoring timer");
            return;
        }
        match fired.kind {
            TimerKind::Daily => self.daily_tick().await,
            TimerKind::ShortTerm => self.short_term_tick().await,
        }
    }

    async fn daily_tick(&mut self) {
        if self.collab.oracle.is_logged_in() {
            self.stop_logged_in();
            return;
        }
        let config = self.collab.config.schedule_config();
        if !config.can_push() {
            info!("daily push time reached but pushing is disabled");
            self.state = NssmState::Idle;
            return;
        }
        self.start_sequence().await;
    }

    /// Schedule the daily push, unless the user is already logged in.
    fn schedule_next(&mut self, config: &ScheduleConfig) {
        if self.collab.oracle.is_logged_in() {
            self.stop_logged_in();
            return;
        }
        let now = self.collab.wall_clock.now();
        let record = self.store.load_push_record();
        let target = config.auto_push_time.next_unpushed(&now, &record);
        let delay = (target - now).to_std().unwrap_or(Duration::ZERO);
        self.clock.arm_daily(delay, target);
        self.state = NssmState::DailyArmed;
        info!(fires_at = %target, "daily push scheduled");
    }

    // ── Short-term sequence ─────────────────────────────────────────

    async fn start_sequence(&mut self) {
        self.clock.cancel(TimerKind::Daily);
        self.sequence = SequenceState::started();
        self.persist();
        self.state = NssmState::ShortTermActive;
        info!(max = self.policy.max_short_term_push, "short-term push sequence started");
        self.short_term_tick().await;
    }

    async fn short_term_tick(&mut self) {
        if self.collab.oracle.is_logged_in() {
            self.stop_logged_in();
            return;
        }
        let max = self.policy.max_short_term_push;
        if !self.sequence.has_attempts_left(max) {
            self.finish_sequence();
            return;
        }

        self.sequence.short_term_push_count += 1;
        self.persist();
        let attempt = self.sequence.short_term_push_count;
        info!(attempt, max, "short-term push attempt");

        if attempt == 1 {
            self.dispatch(ArtifactRequest::short_term(attempt, max)).await;
            self.after_attempt();
            return;
        }

        // Later attempts reload the page first for a fresh artifact.
        self.sequence.pending_reload = true;
        self.persist();
        self.state = NssmState::AwaitingReload;
        if let Err(e) = self.collab.reload.request_reload() {
            warn!(error = %e, attempt, "reload failed, pushing without a fresh artifact");
            self.report(&format!("Page reload failed: {e}"), Severity::Error);
            self.sequence.pending_reload = false;
            self.persist();
            self.state = NssmState::ShortTermActive;
            self.dispatch(ArtifactRequest::short_term(attempt, max)).await;
            self.after_attempt();
        }
    }

    async fn resume_after_reload(&mut self) {
        self.sequence.pending_reload = false;
        self.persist();
        let attempt = self.sequence.short_term_push_count;
        let max = self.policy.max_short_term_push;
        info!(attempt, max, "resuming short-term sequence after reload");

        if self.collab.oracle.is_logged_in() {
            self.stop_logged_in();
            return;
        }
        self.state = NssmState::ShortTermActive;
        self.dispatch(ArtifactRequest::short_term(attempt, max)).await;
        self.after_attempt();
    }

    fn after_attempt(&mut self) {
        if self.collab.oracle.is_logged_in() {
            self.stop_logged_in();
            return;
        }
        if !self.sequence.has_attempts_left(self.policy.max_short_term_push) {
            self.finish_sequence();
            return;
        }
        if self.tracker.is_active() {
            self.clock.arm_short_term(self.policy.short_term_interval);
            self.state = NssmState::ShortTermActive;
        }
    }

    /// The cap was reached without a login.
    fn finish_sequence(&mut self) {
        self.clock.cancel(TimerKind::ShortTerm);
        self.clear_sequence();
        self.state = NssmState::Idle;
        self.report(
            "Short-term push sequence finished without a login",
            Severity::Info,
        );

        let config = self.collab.config.schedule_config();
        if config.daily_schedule_active() && self.tracker.is_active() {
            self.schedule_next(&config);
        }
    }

    fn stop_logged_in(&mut self) {
        self.clock.cancel_all();
        self.clear_sequence();
        self.state = NssmState::Stopped { logged_in: true };
        self.report("Login detected, pushing stopped", Severity::Success);
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// One attempt. Failures are reported and otherwise ignored; the
    /// push record is updated either way.
    async fn dispatch(&mut self, request: ArtifactRequest) -> DispatchOutcome {
        let reason = request.reason.as_str();
        let outcome = self.collab.dispatcher.dispatch(request).await;

        let now = self.collab.wall_clock.now();
        self.store.save_push_record(&PushRecord::at(&now));

        if outcome.success {
            self.report(&outcome.message, Severity::Success);
        } else {
            warn!(reason, message = %outcome.message, "push attempt failed");
            self.report(&outcome.message, Severity::Error);
        }
        outcome
    }

    fn persist(&self) {
        self.store.save_sequence(&self.sequence);
    }

    fn clear_sequence(&mut self) {
        self.sequence = SequenceState::default();
        self.store.clear_sequence();
    }

    fn report(&self, message: &str, severity: Severity) {
        self.collab.reporter.report(message, severity);
    }
}
