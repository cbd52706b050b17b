//! Scheduling clock: the daily and short-term one-shot timers.
//!
//! Each armed timer is a spawned task that sleeps and then posts a
//! [`TimerFired`] on the controller's channel. Every arm gets a fresh
//! generation number; a fire is only honoured if its generation is still the
//! armed one, so a fire that raced with `cancel` is dropped by [`accept`].
//!
//! [`accept`]: SchedulingClock::accept

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Daily,
    ShortTerm,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::ShortTerm => "short_term",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

/// Receiving end of the timer channel, drained by the page loop.
pub type TimerEvents = mpsc::UnboundedReceiver<TimerFired>;

#[derive(Debug)]
struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
    fires_at: Option<DateTime<FixedOffset>>,
}

/// Owns at most one daily and one short-term timer.
#[derive(Debug)]
pub struct SchedulingClock {
    tx: mpsc::UnboundedSender<TimerFired>,
    daily: Option<ArmedTimer>,
    short_term: Option<ArmedTimer>,
    next_generation: u64,
}

impl SchedulingClock {
    pub fn new() -> (Self, TimerEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                daily: None,
                short_term: None,
                next_generation: 1,
            },
            rx,
        )
    }

    /// Arm the daily timer to fire at `target`, `delay` from now.
    /// Replaces any daily timer already armed.
    pub fn arm_daily(&mut self, delay: Duration, target: DateTime<FixedOffset>) {
        let timer = self.spawn(TimerKind::Daily, delay, Some(target));
        if let Some(old) = self.daily.replace(timer) {
            old.handle.abort();
        }
    }

    /// Arm the short-term timer. Replaces any short-term timer already armed.
    pub fn arm_short_term(&mut self, delay: Duration) {
        let timer = self.spawn(TimerKind::ShortTerm, delay, None);
        if let Some(old) = self.short_term.replace(timer) {
            old.handle.abort();
        }
    }

    /// Cancel one timer. Cancelling an absent timer is a no-op.
    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(timer) = self.slot(kind).take() {
            timer.handle.abort();
            tracing::debug!(timer = kind.as_str(), generation = timer.generation, "timer cancelled");
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel(TimerKind::Daily);
        self.cancel(TimerKind::ShortTerm);
    }

    /// Consume a fire if it belongs to the currently armed timer.
    ///
    /// Returns `false` for fires of cancelled or replaced timers.
    pub fn accept(&mut self, fired: &TimerFired) -> bool {
        let slot = self.slot(fired.kind);
        if slot
            .as_ref()
            .is_some_and(|timer| timer.generation == fired.generation)
        {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Daily => self.daily.is_some(),
            TimerKind::ShortTerm => self.short_term.is_some(),
        }
    }

    /// Target instant of the armed daily timer.
    pub fn daily_target(&self) -> Option<DateTime<FixedOffset>> {
        self.daily.as_ref().and_then(|t| t.fires_at)
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<ArmedTimer> {
        match kind {
            TimerKind::Daily => &mut self.daily,
            TimerKind::ShortTerm => &mut self.short_term,
        }
    }

    fn spawn(
        &mut self,
        kind: TimerKind,
        delay: Duration,
        fires_at: Option<DateTime<FixedOffset>>,
    ) -> ArmedTimer {
        let generation = self.next_generation;
        self.next_generation += 1;

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver is gone once the page was torn down.
            let _ = tx.send(TimerFired { kind, generation });
        });

        tracing::debug!(timer = kind.as_str(), generation, delay_secs = delay.as_secs(), "timer armed");
        ArmedTimer {
            generation,
            handle,
            fires_at,
        }
    }
}

impl Drop for SchedulingClock {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

// ── Wall clock ──────────────────────────────────────────────────────

/// Source of the current local date and time.
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// Wall clock pinned to a start instant that advances with tokio's clock.
///
/// Under a paused test runtime, `tokio::time::advance` (or auto-advance
/// while awaiting a timer) moves this clock forward by the same amount.
#[derive(Debug)]
pub struct ManualClock {
    origin: Mutex<(DateTime<FixedOffset>, tokio::time::Instant)>,
}

impl ManualClock {
    pub fn starting_at(start: DateTime<FixedOffset>) -> Self {
        Self {
            origin: Mutex::new((start, tokio::time::Instant::now())),
        }
    }

    /// Jump to `at`; subsequent readings advance from there.
    pub fn set(&self, at: DateTime<FixedOffset>) {
        let mut origin = self.origin.lock().unwrap_or_else(|p| p.into_inner());
        *origin = (at, tokio::time::Instant::now());
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        let origin = self.origin.lock().unwrap_or_else(|p| p.into_inner());
        let elapsed = tokio::time::Instant::now().duration_since(origin.1);
        origin.0 + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}
