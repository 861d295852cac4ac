/**
 * DELAYED-OFF SCHEDULER - one pending "turn off later" per process
 *
 * ROLE: arm a background timer that runs the power-off after a delay,
 * replacing any timer already pending. The fire time is written to the
 * policy store right away so status reads show it.
 *
 * CANCELLATION: the timer slot lives inside the store lock. Arming and
 * cancelling bump the slot generation; the timer task re-checks its
 * generation under the same lock before running, so nothing runs once
 * `cancel` has returned. A task that already claimed its slot finishes.
 *
 * Timers are not re-armed after a restart; a persisted fire time from a
 * previous run is informational only.
 */

use crate::activity::ActivityLog;
use crate::models::ActivityResult;
use crate::policy::Clock;
use crate::state::PolicyStore;
use chrono::NaiveDateTime;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct DelayedOffScheduler {
    store: Arc<PolicyStore>,
    activity: Arc<dyn ActivityLog>,
    clock: Arc<dyn Clock>,
}

impl DelayedOffScheduler {
    pub fn new(store: Arc<PolicyStore>, activity: Arc<dyn ActivityLog>, clock: Arc<dyn Clock>) -> Self {
        Self { store, activity, clock }
    }

    /// Cancels whatever is pending, then arms `action` to run after `delay`.
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, action: F) -> NaiveDateTime
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let step = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let fire_time = self
            .clock
            .now()
            .naive_local()
            .checked_add_signed(step)
            .unwrap_or(NaiveDateTime::MAX);

        let replaced = self.store.update(|policy, timer| {
            let (generation, replaced) = timer.invalidate();
            let store = self.store.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !store.update(|_, timer| timer.claim(generation)) {
                    return;
                }
                info!("executing scheduled shutdown");
                action.await;
                store.update(|policy, timer| {
                    if timer.generation() == generation {
                        policy.scheduled_off_time = None;
                    }
                });
            });
            timer.arm(generation, handle);
            policy.scheduled_off_time = Some(fire_time);
            replaced
        });

        if replaced {
            info!("cancelled previous scheduled shutdown");
        }
        let hours = delay.as_secs_f64() / 3600.0;
        info!("scheduled shutdown in {hours} hours ({fire_time})");
        self.activity.record(
            "schedule",
            ActivityResult::Success,
            &format!("Scheduled shutdown in {hours} hours"),
        );
        fire_time
    }

    /// Drops the pending timer, if any, and clears the persisted fire time.
    /// Returns whether a live timer was cancelled.
    pub fn cancel(&self) -> bool {
        self.store.update(|policy, timer| {
            let (_, had_timer) = timer.invalidate();
            policy.scheduled_off_time = None;
            had_timer
        })
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.store.update(|_, timer| timer.is_armed())
    }
}
