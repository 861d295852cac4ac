//! Stubs shared by the unit tests.

use crate::activity::ActivityLog;
use crate::config::{ConfigBackend, ConfigError, PanelConfig, WakeDevice};
use crate::control::ControlPanel;
use crate::models::{ActivityRecord, ActivityResult, Device};
use crate::orchestrator::{WakeOrchestrator, WakeTiming};
use crate::policy::Clock;
use crate::power::{PowerOffError, PowerOffExecutor};
use crate::probe::Prober;
use crate::reconcile::Reconciler;
use crate::scheduler::DelayedOffScheduler;
use crate::state::PolicyStore;
use crate::wol::{parse_mac, WakeError, WakeSignaler};
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryBackend {
    saved: Arc<Mutex<Vec<PanelConfig>>>,
    fail: bool,
}

impl MemoryBackend {
    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub fn save_count(&self) -> usize {
        self.saved.lock().len()
    }

    pub fn last_saved(&self) -> Option<PanelConfig> {
        self.saved.lock().last().cloned()
    }
}

impl ConfigBackend for MemoryBackend {
    fn load(&self) -> Result<PanelConfig, ConfigError> {
        Ok(self.last_saved().unwrap_or_default())
    }

    fn save(&self, config: &PanelConfig) -> Result<(), ConfigError> {
        if self.fail {
            return Err(ConfigError::Io(std::io::Error::other("disk full")));
        }
        self.saved.lock().push(config.clone());
        Ok(())
    }
}

/// Replays a script of answers, then repeats `fallback`.
#[derive(Default)]
pub struct StubProber {
    script: Mutex<VecDeque<bool>>,
    fallback: Mutex<bool>,
    calls: AtomicUsize,
}

impl StubProber {
    pub fn always(&self, online: bool) {
        self.script.lock().clear();
        *self.fallback.lock() = online;
    }

    pub fn script<I: IntoIterator<Item = bool>>(&self, answers: I) {
        *self.script.lock() = answers.into_iter().collect();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for StubProber {
    async fn probe(&self, _address: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| *self.fallback.lock())
    }
}

/// Validates like the UDP signaler, then records instead of sending.
#[derive(Default)]
pub struct RecordingSignaler {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSignaler {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

impl WakeSignaler for RecordingSignaler {
    fn send_wake(&self, mac: &str, target_ip: &str) -> Result<(), WakeError> {
        parse_mac(mac)?;
        self.sent.lock().push((mac.to_string(), target_ip.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct StubPowerOff {
    calls: AtomicUsize,
    failure: Mutex<Option<PowerOffError>>,
}

impl StubPowerOff {
    pub fn fail_with(&self, err: PowerOffError) {
        *self.failure.lock() = Some(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PowerOffExecutor for StubPowerOff {
    async fn power_off(&self, _endpoint: &crate::models::SshEndpoint) -> Result<(), PowerOffError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.failure.lock() {
            None => Ok(()),
            Some(PowerOffError::AuthConfig) => Err(PowerOffError::AuthConfig),
            Some(PowerOffError::KeyLoad(e)) => Err(PowerOffError::KeyLoad(e.clone())),
            Some(PowerOffError::Connect(e)) => Err(PowerOffError::Connect(e.clone())),
        }
    }
}

#[derive(Default)]
pub struct MemoryActivityLog {
    records: Mutex<Vec<ActivityRecord>>,
}

impl MemoryActivityLog {
    pub fn records(&self) -> Vec<ActivityRecord> {
        self.records.lock().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.action.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn last(&self) -> ActivityRecord {
        self.records.lock().last().cloned().expect("no activity recorded")
    }
}

impl ActivityLog for MemoryActivityLog {
    fn record(&self, action: &str, result: ActivityResult, details: &str) {
        self.records.lock().push(ActivityRecord {
            timestamp: String::new(),
            action: action.to_string(),
            result,
            details: details.to_string(),
        });
    }
}

pub struct FixedClock(DateTime<Local>);

impl FixedClock {
    pub fn at_hour(hour: u32) -> Self {
        let t = Local
            .with_ymd_and_hms(2024, 6, 1, hour, 0, 0)
            .earliest()
            .expect("valid local time");
        Self(t)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// Store plus stubbed leaves, wired the way `main` wires the real ones.
pub struct Harness {
    pub store: Arc<PolicyStore>,
    pub backend: MemoryBackend,
    pub prober: Arc<StubProber>,
    pub signaler: Arc<RecordingSignaler>,
    pub power: Arc<StubPowerOff>,
    pub activity: Arc<MemoryActivityLog>,
    pub clock: Arc<FixedClock>,
    config: PanelConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::from_config(PanelConfig::default())
    }

    pub fn with_nas() -> Self {
        let mut config = PanelConfig::default();
        config.wake_devices.push(WakeDevice {
            name: "nas".into(),
            mac_address: "11:22:33:44:55:66".into(),
            ip_address: "192.168.1.40".into(),
        });
        Self::from_config(config)
    }

    fn from_config(config: PanelConfig) -> Self {
        let backend = MemoryBackend::default();
        Self {
            store: Arc::new(PolicyStore::new(config.clone(), Box::new(backend.clone()))),
            backend,
            prober: Arc::default(),
            signaler: Arc::default(),
            power: Arc::default(),
            activity: Arc::default(),
            clock: Arc::new(FixedClock::at_hour(12)),
            config,
        }
    }

    pub fn clock(mut self, clock: FixedClock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn primary(&self) -> Device {
        self.config.primary()
    }

    pub fn device(&self, name: &str) -> Device {
        self.config.find_device(Some(name)).expect("device in harness config")
    }

    pub fn panel(&self) -> ControlPanel {
        let reconciler = Reconciler::new(self.store.clone(), self.prober.clone(), self.activity.clone());
        let orchestrator = WakeOrchestrator::new(
            self.store.clone(),
            self.signaler.clone(),
            self.prober.clone(),
            self.activity.clone(),
            WakeTiming::default(),
        );
        let scheduler = DelayedOffScheduler::new(self.store.clone(), self.activity.clone(), self.clock.clone());
        ControlPanel::new(
            self.store.clone(),
            self.power.clone(),
            self.activity.clone(),
            self.clock.clone(),
            reconciler,
            orchestrator,
            scheduler,
        )
    }
}
