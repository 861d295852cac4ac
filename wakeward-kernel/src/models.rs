use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Format used for `scheduled_off_time` in the config file and in API responses.
pub const SCHEDULE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Local-clock window `[start, end)` during which power-on is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictedHours {
    pub start: u32,
    pub end: u32,
}

impl Default for RestrictedHours {
    fn default() -> Self {
        Self { start: 2, end: 7 }
    }
}

impl RestrictedHours {
    /// Plain half-open comparison. A window with `start > end` never matches.
    pub fn contains(&self, hour: u32) -> bool {
        self.start <= hour && hour < self.end
    }
}

/// The persisted policy record. Only `PolicyStore` writes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyState {
    #[serde(default)]
    pub state: bool,
    #[serde(default, with = "schedule_time")]
    pub scheduled_off_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub restricted_hours: RestrictedHours,
    /// Last known state of the wake-only devices, by name.
    #[serde(default)]
    pub device_states: BTreeMap<String, bool>,
}

impl PolicyState {
    pub fn is_online(&self, device: &Device) -> bool {
        match device.role {
            DeviceRole::Primary => self.state,
            DeviceRole::WakeOnly => self.device_states.get(&device.name).copied().unwrap_or(false),
        }
    }

    pub fn set_online(&mut self, device: &Device, online: bool) {
        match device.role {
            DeviceRole::Primary => self.state = online,
            DeviceRole::WakeOnly => {
                self.device_states.insert(device.name.clone(), online);
            }
        }
    }

    pub fn scheduled_off_display(&self) -> Option<String> {
        self.scheduled_off_time
            .map(|t| t.format(SCHEDULE_FORMAT).to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    /// SSH-capable device, the one `turn_off` and the scheduler act on.
    Primary,
    WakeOnly,
}

/// A controllable device as the core sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub mac_address: String,
    pub ip_address: String,
    pub role: DeviceRole,
}

/// Where and how to suspend the primary device.
#[derive(Debug, Clone)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub key_path: PathBuf,
    pub key_passphrase: Option<String>,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityResult {
    Success,
    Failed,
    Denied,
    Error,
    Invalid,
}

impl fmt::Display for ActivityResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityResult::Success => "success",
            ActivityResult::Failed => "failed",
            ActivityResult::Denied => "denied",
            ActivityResult::Error => "error",
            ActivityResult::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Activity log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub timestamp: String,
    pub action: String,
    pub result: ActivityResult,
    pub details: String,
}

mod schedule_time {
    use super::SCHEDULE_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;
    use tracing::warn;

    pub fn serialize<S: Serializer>(value: &Option<NaiveDateTime>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => s.serialize_str(&t.format(SCHEDULE_FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    /// Also takes an ISO `T` separator or fractional seconds. Anything else
    /// reads as no schedule instead of failing the whole file.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<Value> = Option::deserialize(d)?;
        let text = match raw {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(s)) => s,
            Some(other) => {
                warn!("ignoring non-string scheduled_off_time: {other}");
                return Ok(None);
            }
        };
        let parsed = [SCHEDULE_FORMAT, "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text.trim(), fmt).ok());
        if parsed.is_none() {
            warn!("ignoring unreadable scheduled_off_time '{text}'");
        }
        Ok(parsed)
    }
}
