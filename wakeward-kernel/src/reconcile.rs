use crate::activity::ActivityLog;
use crate::models::{ActivityResult, Device};
use crate::probe::Prober;
use crate::state::PolicyStore;
use std::sync::Arc;
use tracing::info;

/// Re-probes a device and corrects the stored flag when it disagrees.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<PolicyStore>,
    prober: Arc<dyn Prober>,
    activity: Arc<dyn ActivityLog>,
}

impl Reconciler {
    pub fn new(store: Arc<PolicyStore>, prober: Arc<dyn Prober>, activity: Arc<dyn ActivityLog>) -> Self {
        Self { store, prober, activity }
    }

    /// Returns the freshly probed state.
    pub async fn reconcile(&self, device: &Device) -> bool {
        let online = self.prober.probe(&device.ip_address).await;

        let previous = self.store.update(|policy, _| {
            let previous = policy.is_online(device);
            if previous != online {
                policy.set_online(device, online);
            }
            previous
        });

        if previous != online {
            info!("device {} state changed from {previous} to {online}", device.name);
            self.activity.record(
                "state_change",
                ActivityResult::Success,
                &format!("Device {} state changed from {previous} to {online}", device.name),
            );
        }
        online
    }
}
