use crate::relay::RelayId;

/// Everything that travels between the three loops.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskMessage {
    RelayChangeRequest { relay: RelayId, state: bool },
    /// Fresh reading for the sensor at `sensor_index` in the current sensor list.
    TemperatureUpdate { sensor_index: usize, value: f32 },
    SensorScanRequest,
    TemperatureReadRequest,
    /// Retained publish to the broker.
    MqttPublish { topic: String, payload: String },
}

impl TaskMessage {
    pub fn publish(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::MqttPublish {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::RelayChangeRequest { .. } => "relay_change_request",
            Self::TemperatureUpdate { .. } => "temperature_update",
            Self::SensorScanRequest => "sensor_scan_request",
            Self::TemperatureReadRequest => "temperature_read_request",
            Self::MqttPublish { .. } => "mqtt_publish",
        }
    }
}
