use serde::Serialize;

use crate::{
    address::DeviceAddress,
    bus::DEVICE_DISCONNECTED_C,
    link::LinkState,
    registry::SensorRecord,
    relay::{RelayId, RelayState},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorView {
    pub address: DeviceAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Disconnect sentinel while the sensor is invalid.
    pub temperature: f32,
    pub valid: bool,
    #[serde(rename = "lastReadTime")]
    pub last_read_time: u64,
    #[serde(rename = "isDisplaySensor")]
    pub is_display_sensor: bool,
}

impl SensorView {
    pub fn new(record: &SensorRecord, name: Option<String>, display_sensor: DeviceAddress) -> Self {
        Self {
            address: record.address,
            name,
            temperature: if record.valid {
                record.temperature
            } else {
                DEVICE_DISCONNECTED_C
            },
            valid: record.valid,
            last_read_time: record.last_read_ms.unwrap_or(0),
            is_display_sensor: record.address == display_sensor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayView {
    pub id: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub requested: bool,
    pub actual: bool,
    #[serde(rename = "lastChangeTime")]
    pub last_change_time: Option<u64>,
}

impl RelayView {
    pub fn new(relay: RelayId, state: RelayState, name: Option<String>) -> Self {
        Self {
            id: relay.value(),
            name,
            requested: state.requested,
            actual: state.actual,
            last_change_time: state.last_change_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    #[serde(rename = "busReadFailures")]
    pub bus_read_failures: u64,
    #[serde(rename = "mqttReconnects")]
    pub mqtt_reconnects: u64,
    #[serde(rename = "droppedMessages")]
    pub dropped_messages: u64,
    #[serde(rename = "lockTimeouts")]
    pub lock_timeouts: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    pub link: LinkState,
    #[serde(rename = "busState")]
    pub bus_state: &'static str,
    #[serde(rename = "sensorCount")]
    pub sensor_count: usize,
    #[serde(rename = "lastScanMs")]
    pub last_scan_ms: Option<u64>,
    #[serde(rename = "autoScan")]
    pub auto_scan: bool,
    #[serde(rename = "scanIntervalSecs")]
    pub scan_interval_secs: u64,
    pub health: HealthSnapshot,
    #[serde(rename = "uptimeMs")]
    pub uptime_ms: u64,
    #[serde(rename = "nowEpoch")]
    pub now_epoch: i64,
}
