//! Login push scheduling.
//!
//! Decides when to push the login QR code, drives the bounded short-term
//! retry sequence and carries its state across page reloads:
//! - `flag_store`: durable flags and the typed sequence records on top
//! - `lifecycle`: activation/deactivation of the monitored page
//! - `clock`: the daily and short-term one-shot timers
//! - `controller`: the state machine itself
//! - `runtime`: the page host that rebuilds the controller on reload

pub mod clock;
pub mod collaborators;
pub mod controller;
pub mod flag_store;
pub mod lifecycle;
pub mod runtime;

pub use clock::{ManualClock, SchedulingClock, SystemWallClock, TimerEvents, TimerFired, TimerKind, WallClock};
pub use collaborators::{
    ChannelReloadRequester, Collaborators, ConfigSource, CookieFileOracle, LoginOracle,
    ReloadError, ReloadRequester, ReloadSignal, Severity, SharedConfig, StatusReporter,
    TracingReporter,
};
pub use controller::{push_owed, Controller, ControllerSnapshot, NssmState};
pub use flag_store::{FileFlagStore, FlagStore, MemoryFlagStore, SequenceStore};
pub use lifecycle::{LifecycleSignal, PageEvent, PageLifecycleTracker};
pub use runtime::{run_page, HostEvent, HostSummary, PageHost, RunExit};
