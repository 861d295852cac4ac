/**
 * WAKE ORCHESTRATOR - bounded wake-and-confirm loop
 *
 * Start -> Signaled -> Polling(n) -> Confirmed | Exhausted
 *
 * One magic packet, a boot grace period, then up to `max_attempts` probes
 * spaced by `poll_interval`. Works the same for every device; the caller
 * decides what a confirmed wake means beyond the stored online flag.
 * No external cancellation: the loop always ends in one of the two states.
 */

use crate::activity::ActivityLog;
use crate::models::{ActivityResult, Device};
use crate::probe::Prober;
use crate::state::PolicyStore;
use crate::wol::WakeSignaler;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct WakeTiming {
    pub boot_grace: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for WakeTiming {
    fn default() -> Self {
        Self {
            boot_grace: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeOutcome {
    Confirmed { attempts: u32 },
    Exhausted { attempts: u32 },
    /// The packet could not be built or sent; nothing was polled.
    SignalFailed(String),
}

impl WakeOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, WakeOutcome::Confirmed { .. })
    }
}

#[derive(Clone)]
pub struct WakeOrchestrator {
    store: Arc<PolicyStore>,
    signaler: Arc<dyn WakeSignaler>,
    prober: Arc<dyn Prober>,
    activity: Arc<dyn ActivityLog>,
    timing: WakeTiming,
}

impl WakeOrchestrator {
    pub fn new(
        store: Arc<PolicyStore>,
        signaler: Arc<dyn WakeSignaler>,
        prober: Arc<dyn Prober>,
        activity: Arc<dyn ActivityLog>,
        timing: WakeTiming,
    ) -> Self {
        Self { store, signaler, prober, activity, timing }
    }

    pub async fn wake(&self, device: &Device) -> WakeOutcome {
        info!("sending WoL packet to {} ({})", device.name, device.mac_address);
        if let Err(e) = self.signaler.send_wake(&device.mac_address, &device.ip_address) {
            error!("error sending WoL packet: {e}");
            self.activity.record("wake_on_lan", ActivityResult::Error, &e.to_string());
            return WakeOutcome::SignalFailed(e.to_string());
        }

        tokio::time::sleep(self.timing.boot_grace).await;

        let max = self.timing.max_attempts;
        for attempt in 1..=max {
            if self.prober.probe(&device.ip_address).await {
                info!("device {} is now online after WoL", device.name);
                self.store.update(|policy, _| policy.set_online(device, true));
                self.activity.record(
                    "wake_on_lan",
                    ActivityResult::Success,
                    &format!("Device {} woken up after {attempt} attempts", device.name),
                );
                return WakeOutcome::Confirmed { attempts: attempt };
            }
            info!("waiting for {} to wake up (attempt {attempt}/{max})", device.name);
            tokio::time::sleep(self.timing.poll_interval).await;
        }

        warn!("failed to wake {} after {max} attempts", device.name);
        self.activity.record(
            "wake_on_lan",
            ActivityResult::Failed,
            &format!("Device {} failed to respond after {max} attempts", device.name),
        );
        WakeOutcome::Exhausted { attempts: max }
    }
}
