//! Recording collaborators and a page harness shared by the scenario tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone};

use loginpush_core::{PushRecord, ScheduleConfig, SequencePolicy, TimeOfDay};
use loginpush_notify::{ArtifactRequest, DispatchOutcome, PushDispatcher};
use loginpush_scheduler::{
    Collaborators, Controller, LoginOracle, ManualClock, MemoryFlagStore, PageEvent, ReloadError,
    ReloadRequester, SequenceStore, Severity, SharedConfig, StatusReporter, TimerEvents,
};

pub const LOGIN_URL: &str = "https://pc.example.cn/points/login.html";
pub const HOME_URL: &str = "https://pc.example.cn/index.html";

/// 2026-03-`day` `h`:`m` in UTC+8.
pub fn at(day: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(8 * 3600)
        .unwrap()
        .with_ymd_and_hms(2026, 3, day, h, m, 0)
        .unwrap()
}

pub fn daily_config() -> ScheduleConfig {
    ScheduleConfig {
        daily_push_enabled: true,
        auto_push_time: TimeOfDay { hour: 8, minute: 0 },
        push_enabled: true,
        push_token: Some("test-token".to_string()),
    }
}

// ── Mocks ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ToggleOracle(AtomicBool);

impl ToggleOracle {
    pub fn set(&self, logged_in: bool) {
        self.0.store(logged_in, Ordering::SeqCst);
    }
}

impl LoginOracle for ToggleOracle {
    fn is_logged_in(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records every request. Can be told to fail, or to "log the user in"
/// once a given number of pushes went out.
pub struct RecordingDispatcher {
    requests: Mutex<Vec<ArtifactRequest>>,
    fail: AtomicBool,
    login_after: Mutex<Option<(usize, Arc<ToggleOracle>)>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            login_after: Mutex::new(None),
        }
    }

    pub fn fail_all(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn login_after(&self, pushes: usize, oracle: Arc<ToggleOracle>) {
        *self.login_after.lock().unwrap() = Some((pushes, oracle));
    }

    pub fn requests(&self) -> Vec<ArtifactRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn attempts(&self) -> Vec<u32> {
        self.requests().iter().map(|r| r.attempt).collect()
    }
}

#[async_trait::async_trait]
impl PushDispatcher for RecordingDispatcher {
    async fn dispatch(&self, request: ArtifactRequest) -> DispatchOutcome {
        let suffix = request.progress_suffix();
        let sent = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        if let Some((n, oracle)) = self.login_after.lock().unwrap().as_ref() {
            if sent >= *n {
                oracle.set(true);
            }
        }
        if self.fail.load(Ordering::SeqCst) {
            DispatchOutcome::failed(format!("Push failed: mock{suffix}"))
        } else {
            DispatchOutcome::delivered(format!("QR code pushed{suffix}"))
        }
    }
}

#[derive(Default)]
pub struct RecordingReload {
    requested: AtomicUsize,
    pending: AtomicBool,
    refuse: AtomicBool,
}

impl RecordingReload {
    pub fn refuse(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn requested(&self) -> usize {
        self.requested.load(Ordering::SeqCst)
    }

    /// Whether a reload was asked for since the last call.
    pub fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }
}

impl ReloadRequester for RecordingReload {
    fn request_reload(&self) -> Result<(), ReloadError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ReloadError::Refused("navigation blocked".to_string()));
        }
        self.requested.fetch_add(1, Ordering::SeqCst);
        self.pending.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingReporter(Mutex<Vec<(String, Severity)>>);

impl RecordingReporter {
    pub fn lines(&self) -> Vec<(String, Severity)> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(line, _)| line.contains(needle))
    }
}

impl StatusReporter for RecordingReporter {
    fn report(&self, message: &str, severity: Severity) {
        self.0.lock().unwrap().push((message.to_string(), severity));
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// One loaded page: a controller and its timer channel.
pub struct Page {
    pub controller: Controller,
    pub timers: TimerEvents,
}

/// Collaborators plus a shared in-memory store that outlives every page.
///
/// Must be created inside a paused tokio runtime so the wall clock tracks
/// tokio time.
pub struct Harness {
    pub flags: MemoryFlagStore,
    pub oracle: Arc<ToggleOracle>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub reload: Arc<RecordingReload>,
    pub reporter: Arc<RecordingReporter>,
    pub config: SharedConfig,
    pub clock: Arc<ManualClock>,
    pub policy: SequencePolicy,
}

impl Harness {
    pub fn new(config: ScheduleConfig, now: DateTime<FixedOffset>) -> Self {
        Self {
            flags: MemoryFlagStore::new(),
            oracle: Arc::new(ToggleOracle::default()),
            dispatcher: Arc::new(RecordingDispatcher::new()),
            reload: Arc::new(RecordingReload::default()),
            reporter: Arc::new(RecordingReporter::default()),
            config: SharedConfig::new(config),
            clock: Arc::new(ManualClock::starting_at(now)),
            policy: SequencePolicy::default(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        self.collaborators_with_reload(self.reload.clone())
    }

    pub fn collaborators_with_reload(&self, reload: Arc<dyn ReloadRequester>) -> Collaborators {
        Collaborators {
            oracle: self.oracle.clone(),
            dispatcher: self.dispatcher.clone(),
            reload,
            reporter: self.reporter.clone(),
            config: Arc::new(self.config.clone()),
            wall_clock: self.clock.clone(),
        }
    }

    pub fn store(&self) -> SequenceStore {
        SequenceStore::new(Arc::new(self.flags.clone()), self.policy.max_short_term_push)
    }

    /// Record a push on `day`, so the next activation is not a first launch.
    pub fn seed_pushed_on(&self, day: u32) {
        self.store().save_push_record(&PushRecord::at(&at(day, 8, 0)));
    }

    /// Build a controller and deliver the page-loaded event.
    pub async fn load_page(&self) -> Page {
        let (mut controller, timers) =
            Controller::new(self.collaborators(), self.store(), self.policy, "login");
        controller
            .on_page_event(PageEvent::Loaded {
                url: LOGIN_URL.to_string(),
            })
            .await;
        Page { controller, timers }
    }

    /// Tear the page down the way a reload does and load it again.
    pub async fn reload_page(&self, page: &mut Page) {
        page.controller.on_page_event(PageEvent::Unload).await;
        *page = self.load_page().await;
    }

    /// Wait for the next timer, handle it and perform any reload it asked
    /// for. Returns `false` if nothing fired within three days.
    pub async fn fire_next(&self, page: &mut Page) -> bool {
        let next = tokio::time::timeout(Duration::from_secs(3 * 24 * 3600), page.timers.recv());
        let Ok(Some(fired)) = next.await else {
            return false;
        };
        page.controller.on_timer(fired).await;
        if self.reload.take_pending() {
            self.reload_page(page).await;
        }
        true
    }
}
