use crate::models::{Device, DeviceRole, PolicyState, SshEndpoint};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("not overwriting unreadable config {0}; fix or remove it first")]
    Locked(String),
}

/// On-disk config. Policy fields sit at the top level next to the devices,
/// any key we do not know about is kept in `extra` and written back untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(flatten)]
    pub policy: PolicyState,
    #[serde(default)]
    pub target_device: TargetDevice,
    #[serde(default)]
    pub wake_devices: Vec<WakeDevice>,
    #[serde(default = "default_wol_port")]
    pub wol_port: u16,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDevice {
    #[serde(default = "default_primary_name")]
    pub name: String,
    #[serde(default = "default_mac")]
    pub mac_address: String,
    #[serde(default = "default_ip")]
    pub ip_address: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub ssh_username: String,
    #[serde(default)]
    pub ssh_key_path: String,
    #[serde(default)]
    pub ssh_key_passphrase: String,
    #[serde(default = "default_shutdown_command")]
    pub shutdown_command: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Secondary device that can only be woken and pinged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeDevice {
    pub name: String,
    pub mac_address: String,
    pub ip_address: String,
}

fn default_wol_port() -> u16 { 9 }
fn default_primary_name() -> String { "primary".into() }
fn default_mac() -> String { "00:00:00:00:00:00".into() }
fn default_ip() -> String { "192.168.1.10".into() }
fn default_ssh_port() -> u16 { 22 }
fn default_shutdown_command() -> String { "sudo pm-suspend".into() }

impl Default for TargetDevice {
    fn default() -> Self {
        Self {
            name: default_primary_name(),
            mac_address: default_mac(),
            ip_address: default_ip(),
            ssh_port: default_ssh_port(),
            ssh_username: String::new(),
            ssh_key_path: String::new(),
            ssh_key_passphrase: String::new(),
            shutdown_command: default_shutdown_command(),
            extra: Map::new(),
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            policy: PolicyState::default(),
            target_device: TargetDevice::default(),
            wake_devices: Vec::new(),
            wol_port: default_wol_port(),
            extra: Map::new(),
        }
    }
}

impl PanelConfig {
    pub fn primary(&self) -> Device {
        Device {
            name: self.target_device.name.clone(),
            mac_address: self.target_device.mac_address.clone(),
            ip_address: self.target_device.ip_address.clone(),
            role: DeviceRole::Primary,
        }
    }

    /// Primary first, then the wake-only devices in file order.
    pub fn devices(&self) -> Vec<Device> {
        let mut out = vec![self.primary()];
        out.extend(self.wake_devices.iter().map(|d| Device {
            name: d.name.clone(),
            mac_address: d.mac_address.clone(),
            ip_address: d.ip_address.clone(),
            role: DeviceRole::WakeOnly,
        }));
        out
    }

    /// `None` selects the primary device.
    pub fn find_device(&self, name: Option<&str>) -> Option<Device> {
        match name {
            None => Some(self.primary()),
            Some(name) => self.devices().into_iter().find(|d| d.name == name),
        }
    }

    /// `passphrase_override` comes from `SSH_KEY_PASSPHRASE` and is never persisted.
    pub fn ssh_endpoint(&self, passphrase_override: Option<String>) -> SshEndpoint {
        let t = &self.target_device;
        let passphrase = passphrase_override
            .filter(|p| !p.is_empty())
            .or_else(|| Some(t.ssh_key_passphrase.clone()).filter(|p| !p.is_empty()));
        SshEndpoint {
            host: t.ip_address.clone(),
            port: t.ssh_port,
            username: t.ssh_username.clone(),
            key_path: PathBuf::from(&t.ssh_key_path),
            key_passphrase: passphrase,
            command: t.shutdown_command.clone(),
        }
    }
}

/// Persistence backend behind `PolicyStore`.
pub trait ConfigBackend: Send + Sync {
    fn load(&self) -> Result<PanelConfig, ConfigError>;
    fn save(&self, config: &PanelConfig) -> Result<(), ConfigError>;
}

/// JSON file backend. A file that exists but does not parse locks the
/// backend: saves are refused until a later load succeeds, so the running
/// defaults never replace what the user wrote.
pub struct JsonConfigFile {
    path: PathBuf,
    locked: AtomicBool,
}

impl JsonConfigFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into(), locked: AtomicBool::new(false) }
    }
}

impl ConfigBackend for JsonConfigFile {
    /// A missing file is created with defaults.
    fn load(&self) -> Result<PanelConfig, ConfigError> {
        if !self.path.exists() {
            let config = PanelConfig::default();
            self.save(&config)?;
            info!("created new configuration file: {}", self.path.display());
            return Ok(config);
        }
        let txt = std::fs::read_to_string(&self.path)?;
        if txt.trim().is_empty() {
            warn!("{} is empty, using defaults", self.path.display());
            return Ok(PanelConfig::default());
        }
        match serde_json::from_str(&txt) {
            Ok(config) => {
                self.locked.store(false, Ordering::SeqCst);
                Ok(config)
            }
            Err(e) => {
                self.locked.store(true, Ordering::SeqCst);
                warn!("{} does not parse; changes will stay in memory only", self.path.display());
                Err(e.into())
            }
        }
    }

    fn save(&self, config: &PanelConfig) -> Result<(), ConfigError> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(ConfigError::Locked(self.path.display().to_string()));
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

/// Loads the config, falling back to defaults when the file cannot be read.
pub fn load_config(backend: &dyn ConfigBackend) -> PanelConfig {
    backend.load().unwrap_or_else(|e| {
        error!("error loading configuration: {e}. Using default config.");
        PanelConfig::default()
    })
}

/// Process settings read from the environment (`.env` included).
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub log_dir: PathBuf,
    pub bind: String,
    pub api_key: Option<String>,
    pub ssh_key_passphrase: Option<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            config_path: var("WAKEWARD_CONFIG").unwrap_or_else(|| "config.json".into()).into(),
            log_dir: var("WAKEWARD_LOG_DIR").unwrap_or_else(|| "logs".into()).into(),
            bind: var("WAKEWARD_BIND").unwrap_or_else(|| "0.0.0.0:5000".into()),
            api_key: var("WAKEWARD_API_KEY"),
            ssh_key_passphrase: var("SSH_KEY_PASSPHRASE"),
        }
    }
}
