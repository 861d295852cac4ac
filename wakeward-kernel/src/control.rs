/**
 * CONTROL PANEL - entry point for every control request
 *
 * ROLE: restricted-hours gate, then dispatch to the wake orchestrator,
 * the SSH power-off or the delayed-off scheduler. Leaf failures stop here:
 * they become a `ControlResponse` with `success: false` plus one activity
 * record, never an error for the HTTP layer.
 */

use crate::activity::ActivityLog;
use crate::models::{ActivityResult, Device, DeviceRole};
use crate::orchestrator::{WakeOrchestrator, WakeOutcome};
use crate::policy::{in_restricted_hours, Clock};
use crate::power::PowerOffExecutor;
use crate::reconcile::Reconciler;
use crate::scheduler::DelayedOffScheduler;
use crate::state::PolicyStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Body of `POST /api/control`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlAction {
    TurnOn {
        #[serde(default)]
        device: Option<String>,
    },
    TurnOff,
    ScheduleOff {
        #[serde(default = "default_hours", deserialize_with = "hours_from_number_or_text")]
        hours: u32,
    },
    CancelSchedule,
}

fn default_hours() -> u32 {
    1
}

/// Forms sometimes post `"hours": "3"`.
fn hours_from_number_or_text<'de, D: serde::Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Hours {
        Number(u32),
        Text(String),
    }
    match Hours::deserialize(d)? {
        Hours::Number(h) => Ok(h),
        Hours::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_off_time: Option<String>,
}

impl ControlResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()), ..Default::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub name: String,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub state: bool,
    pub scheduled_off_time: Option<String>,
    pub in_restricted_hours: bool,
    pub devices: Vec<DeviceStatus>,
}

#[derive(Clone)]
pub struct ControlPanel {
    store: Arc<PolicyStore>,
    power: Arc<dyn PowerOffExecutor>,
    activity: Arc<dyn ActivityLog>,
    clock: Arc<dyn Clock>,
    reconciler: Reconciler,
    orchestrator: WakeOrchestrator,
    scheduler: DelayedOffScheduler,
    ssh_passphrase: Option<String>,
}

impl ControlPanel {
    pub fn new(
        store: Arc<PolicyStore>,
        power: Arc<dyn PowerOffExecutor>,
        activity: Arc<dyn ActivityLog>,
        clock: Arc<dyn Clock>,
        reconciler: Reconciler,
        orchestrator: WakeOrchestrator,
        scheduler: DelayedOffScheduler,
    ) -> Self {
        Self { store, power, activity, clock, reconciler, orchestrator, scheduler, ssh_passphrase: None }
    }

    pub fn with_ssh_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.ssh_passphrase = passphrase;
        self
    }

    pub fn in_restricted_hours(&self) -> bool {
        in_restricted_hours(self.clock.as_ref(), &self.store.snapshot().restricted_hours)
    }

    /// Reconciles every device, primary first, then reports the stored state.
    pub async fn status(&self) -> StatusReport {
        let mut devices = Vec::new();
        for device in self.store.config().devices() {
            let online = self.reconciler.reconcile(&device).await;
            devices.push(DeviceStatus { name: device.name, online });
        }
        let policy = self.store.snapshot();
        StatusReport {
            state: policy.state,
            scheduled_off_time: policy.scheduled_off_display(),
            in_restricted_hours: self.in_restricted_hours(),
            devices,
        }
    }

    pub async fn dispatch(&self, action: ControlAction) -> ControlResponse {
        match action {
            ControlAction::TurnOn { device } => self.turn_on(device.as_deref()).await,
            ControlAction::TurnOff => self.turn_off().await,
            ControlAction::ScheduleOff { hours } => self.schedule_off(hours),
            ControlAction::CancelSchedule => self.cancel_schedule(),
        }
    }

    pub async fn turn_on(&self, device_name: Option<&str>) -> ControlResponse {
        let Some(device) = self.store.config().find_device(device_name) else {
            let name = device_name.unwrap_or_default();
            warn!("turn_on requested for unknown device '{name}'");
            self.activity.record("control", ActivityResult::Invalid, &format!("Unknown device: {name}"));
            return ControlResponse::failure("Unknown device");
        };

        let window = self.store.snapshot().restricted_hours;
        if in_restricted_hours(self.clock.as_ref(), &window) {
            warn!("turn on attempt for {} during restricted hours", device.name);
            self.activity.record("turn_on", ActivityResult::Denied, "Attempted during restricted hours");
            return ControlResponse::failure(format!(
                "Cannot turn on during restricted hours ({}:00 - {}:00)",
                window.start, window.end
            ));
        }

        let outcome = self.orchestrator.wake(&device).await;
        if outcome.is_confirmed() && device.role == DeviceRole::Primary && self.scheduler.cancel() {
            info!("cancelled scheduled shutdown after device wake-up");
        }

        let message = match &outcome {
            WakeOutcome::Confirmed { .. } => None,
            WakeOutcome::Exhausted { attempts } => {
                Some(format!("Device failed to respond after {attempts} attempts"))
            }
            WakeOutcome::SignalFailed(e) => Some(e.clone()),
        };
        ControlResponse {
            success: outcome.is_confirmed(),
            state: Some(self.store.snapshot().is_online(&device)),
            message,
            ..Default::default()
        }
    }

    pub async fn turn_off(&self) -> ControlResponse {
        let success = self.shut_down_primary().await;
        if success && self.scheduler.cancel() {
            info!("cancelled scheduled shutdown after manual shutdown");
        }
        ControlResponse {
            success,
            state: Some(self.store.snapshot().state),
            ..Default::default()
        }
    }

    pub fn schedule_off(&self, hours: u32) -> ControlResponse {
        let panel = self.clone();
        let delay = Duration::from_secs(u64::from(hours) * 3600);
        let fire_time = self.scheduler.schedule(delay, async move {
            panel.shut_down_primary().await;
        });
        ControlResponse {
            success: true,
            scheduled_off_time: Some(fire_time.format(crate::models::SCHEDULE_FORMAT).to_string()),
            ..Default::default()
        }
    }

    pub fn cancel_schedule(&self) -> ControlResponse {
        let cancelled = self.scheduler.cancel();
        let details = if cancelled {
            "Cancelled scheduled shutdown"
        } else {
            "No scheduled shutdown pending"
        };
        info!("{details}");
        self.activity.record("cancel", ActivityResult::Success, details);
        ControlResponse { success: true, message: Some(details.to_string()), ..Default::default() }
    }

    /// Records the rejection of an action that could not be parsed.
    pub fn reject_invalid(&self, action: &str) -> ControlResponse {
        warn!("invalid action '{action}' requested");
        self.activity.record("control", ActivityResult::Invalid, &format!("Invalid action: {action}"));
        ControlResponse::failure("Invalid action")
    }

    /// Power-off shared by the manual and the scheduled path; records one `shutdown` activity.
    async fn shut_down_primary(&self) -> bool {
        let endpoint = self.store.config().ssh_endpoint(self.ssh_passphrase.clone());
        match self.power.power_off(&endpoint).await {
            Ok(()) => {
                let primary = self.primary();
                self.store.update(|policy, _| policy.set_online(&primary, false));
                self.activity.record("shutdown", ActivityResult::Success, "Shutdown command sent successfully");
                true
            }
            Err(e) => {
                self.activity.record("shutdown", ActivityResult::Error, &e.to_string());
                false
            }
        }
    }

    fn primary(&self) -> Device {
        self.store.config().primary()
    }
}
