use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    Online,
    Busy,
    Offline,
    Error,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceStatus::Online => "ONLINE",
            DeviceStatus::Busy => "BUSY",
            DeviceStatus::Offline => "OFFLINE",
            DeviceStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Read-only view of one registry entry, for status surfaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSnapshot {
    pub serial: String,
    pub status: DeviceStatus,
    pub current_task: Option<String>,
    pub error_msg: String,
    pub last_activity: DateTime<Utc>,
}

/// Aggregate counts produced by a registry health check.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthSummary {
    pub total: usize,
    pub online: usize,
    pub busy: usize,
    pub offline: usize,
    pub error: usize,
}
