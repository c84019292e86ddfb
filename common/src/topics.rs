use crate::{address::DeviceAddress, registry::SensorRecord, relay::RelayId};

pub const DEFAULT_SYSTEM_NAME: &str = "Chaoticvolt";
pub const DEFAULT_DEVICE_ID: &str = "SensorHUB";

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

/// Topic names under `{system}/...` for one device.
///
/// Relays are numbered from 1 on the wire (`relay1`, `relay2`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    system: String,
    device: String,
}

impl Topics {
    pub fn new(system: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            device: device.into(),
        }
    }

    pub fn sensor_state(&self, address: &DeviceAddress) -> String {
        format!("{}/sensors/{}/state", self.system, address)
    }

    pub fn aux_display(&self) -> String {
        format!("{}/{}/mqtt_aux_display", self.system, self.device)
    }

    pub fn relay_state(&self, relay: RelayId) -> String {
        format!("{}/{}/relay{}/state", self.system, self.device, relay.value() + 1)
    }

    pub fn relay_set(&self, relay: RelayId) -> String {
        format!("{}/{}/relay{}/set", self.system, self.device, relay.value() + 1)
    }

    pub fn scan(&self) -> String {
        format!("{}/{}/scan", self.system, self.device)
    }

    pub fn status(&self) -> String {
        format!("{}/{}/status", self.system, self.device)
    }

    /// Command topics the hub subscribes to.
    pub fn command_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = RelayId::all().map(|relay| self.relay_set(relay)).collect();
        topics.push(self.scan());
        topics
    }

    /// Relay addressed by a `relay{n}/set` topic.
    pub fn relay_for_set_topic(&self, topic: &str) -> Option<RelayId> {
        RelayId::all().find(|relay| self.relay_set(*relay) == topic)
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_NAME, DEFAULT_DEVICE_ID)
    }
}

/// Retained sensor state: temperature with two decimals, last read time, validity flag.
pub fn sensor_state_payload(record: &SensorRecord) -> String {
    format!(
        r#"{{"t":{:.2},"ts":{},"s":"{}"}}"#,
        record.temperature,
        record.last_read_ms.unwrap_or(0),
        if record.valid { "1" } else { "0" }
    )
}

pub fn display_payload(celsius: f32) -> String {
    format!("{celsius:.1}")
}

pub fn relay_payload(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Parses a relay command payload. Accepts `ON|OFF|1|0|true|false` in any case.
pub fn parse_relay_command(payload: &str) -> Option<bool> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Some(true),
        "off" | "0" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn topic_layout() {
        let topics = Topics::default();
        let address: DeviceAddress = "28FF4A1B2C3D4E5F".parse().unwrap();
        let relay = RelayId::new(0).unwrap();

        assert_eq!(
            topics.sensor_state(&address),
            "Chaoticvolt/sensors/28FF4A1B2C3D4E5F/state"
        );
        assert_eq!(topics.aux_display(), "Chaoticvolt/SensorHUB/mqtt_aux_display");
        assert_eq!(topics.relay_state(relay), "Chaoticvolt/SensorHUB/relay1/state");
        assert_eq!(
            topics.relay_for_set_topic("Chaoticvolt/SensorHUB/relay2/set"),
            RelayId::new(1).ok()
        );
        assert_eq!(topics.relay_for_set_topic("Chaoticvolt/SensorHUB/relay3/set"), None);
        assert_eq!(topics.command_topics().len(), 3);
    }

    #[test]
    fn sensor_payload_format() {
        let address: DeviceAddress = "28FF4A1B2C3D4E5F".parse().unwrap();
        let mut record = SensorRecord::discovered(address);
        record.temperature = 21.5;
        record.last_read_ms = Some(12_345);
        record.valid = true;

        assert_eq!(sensor_state_payload(&record), r#"{"t":21.50,"ts":12345,"s":"1"}"#);

        let fresh = SensorRecord::discovered(address);
        assert_eq!(sensor_state_payload(&fresh), r#"{"t":-127.00,"ts":0,"s":"0"}"#);
    }

    #[test]
    fn relay_commands() {
        assert_eq!(parse_relay_command("ON"), Some(true));
        assert_eq!(parse_relay_command(" false\n"), Some(false));
        assert_eq!(parse_relay_command("toggle"), None);
        assert_eq!(display_payload(21.54), "21.5");
    }
}
