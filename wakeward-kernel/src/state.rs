use crate::config::{ConfigBackend, PanelConfig};
use crate::models::PolicyState;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::error;

/// Slot for the single pending delayed action.
///
/// Every arm or cancel bumps `generation`; a timer task may only run its
/// action if it still owns the current generation when it wakes up.
#[derive(Debug, Default)]
pub struct TimerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Invalidates whatever is pending and returns the generation a new timer should own.
    /// The bool tells whether a live timer was dropped.
    pub fn invalidate(&mut self) -> (u64, bool) {
        self.generation += 1;
        let had_timer = match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        };
        (self.generation, had_timer)
    }

    pub fn arm(&mut self, generation: u64, handle: JoinHandle<()>) {
        debug_assert_eq!(generation, self.generation);
        self.handle = Some(handle);
    }

    /// Called by the timer task when it fires. On success the slot is empty and
    /// the caller owns the action; a later cancel will find nothing to cancel.
    pub fn claim(&mut self, generation: u64) -> bool {
        if self.generation == generation && self.handle.is_some() {
            self.handle = None;
            true
        } else {
            false
        }
    }
}

struct StoreInner {
    config: PanelConfig,
    timer: TimerSlot,
}

/// Single writer of the persisted policy state.
///
/// Every read-modify-write goes through `update`, which holds the lock for
/// the whole closure (timer swap included) and saves synchronously afterwards.
/// A failed save is logged; the in-memory state stays authoritative.
pub struct PolicyStore {
    inner: Mutex<StoreInner>,
    backend: Box<dyn ConfigBackend>,
}

impl PolicyStore {
    pub fn new(config: PanelConfig, backend: Box<dyn ConfigBackend>) -> Self {
        Self {
            inner: Mutex::new(StoreInner { config, timer: TimerSlot::default() }),
            backend,
        }
    }

    pub fn snapshot(&self) -> PolicyState {
        self.inner.lock().config.policy.clone()
    }

    /// Device addressing and other static settings, by value.
    pub fn config(&self) -> PanelConfig {
        self.inner.lock().config.clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut PolicyState, &mut TimerSlot) -> R) -> R {
        let mut inner = self.inner.lock();
        let StoreInner { config, timer } = &mut *inner;
        let before = config.policy.clone();
        let out = f(&mut config.policy, timer);
        if config.policy != before {
            if let Err(e) = self.backend.save(config) {
                error!("failed to save configuration: {e}");
            }
        }
        out
    }
}
