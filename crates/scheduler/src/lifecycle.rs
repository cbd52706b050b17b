//! Page lifecycle tracking.
//!
//! Raw navigation events are folded into two edge-triggered signals,
//! `Activated` and `Deactivated`, guarded by a single latch so neither fires
//! twice in a row.

use loginpush_core::SequenceState;

use crate::flag_store::SequenceStore;

/// Raw navigation event reported by the page host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// Page finished loading at `url`.
    Loaded { url: String },
    /// In-page navigation.
    Navigate { url: String },
    HashChange { url: String },
    PopState { url: String },
    /// The execution context is about to be torn down.
    Unload,
}

impl PageEvent {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Loaded { url }
            | Self::Navigate { url }
            | Self::HashChange { url }
            | Self::PopState { url } => Some(url),
            Self::Unload => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    Activated,
    /// `for_reload` is set when the departure is the reload the scheduler
    /// itself requested; sequence state must then be left intact.
    Deactivated { for_reload: bool },
}

/// Holds the `is_page_active` latch.
#[derive(Debug, Clone)]
pub struct PageLifecycleTracker {
    marker: String,
    active: bool,
}

impl PageLifecycleTracker {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether `url` shows the monitored view.
    pub fn is_monitored(&self, url: &str) -> bool {
        url.contains(&self.marker)
    }

    /// Flip the latch to active. Returns `false` if it already was.
    pub fn mark_active(&mut self) -> bool {
        !std::mem::replace(&mut self.active, true)
    }

    /// Flip the latch to inactive. Returns `false` if it already was.
    pub fn mark_inactive(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }

    /// Fold one event into the latch.
    ///
    /// On `Unload` with a reload pending, `current` is written back to the
    /// store before the signal is returned so it survives the teardown.
    pub fn observe(
        &mut self,
        event: &PageEvent,
        store: &SequenceStore,
        current: &SequenceState,
    ) -> Option<LifecycleSignal> {
        match event {
            PageEvent::Unload => {
                if !self.mark_inactive() {
                    return None;
                }
                let for_reload = store.pending_reload();
                if for_reload {
                    store.save_sequence(current);
                    tracing::debug!(
                        count = current.short_term_push_count,
                        "unloading for reload, sequence state saved"
                    );
                }
                Some(LifecycleSignal::Deactivated { for_reload })
            }
            other => {
                let url = other.url().unwrap_or_default();
                if self.is_monitored(url) {
                    self.mark_active().then_some(LifecycleSignal::Activated)
                } else {
                    self.mark_inactive()
                        .then_some(LifecycleSignal::Deactivated { for_reload: false })
                }
            }
        }
    }
}
