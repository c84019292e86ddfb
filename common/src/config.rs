use serde::{Deserialize, Serialize};

pub const MAX_BROKER_HOST_LEN: usize = 63;
pub const MAX_MQTT_CREDENTIAL_LEN: usize = 31;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub tick_ms: u64,
    pub read_interval_ms: u64,
    pub scan_interval_ms: u64,
    pub scan_attempts: u8,
    pub scan_retry_delay_ms: u64,
    pub bus_settle_ms: u64,
    pub max_sensors: usize,
    pub error_threshold: u8,
    pub lock_timeout_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            read_interval_ms: 10_000,
            scan_interval_ms: 30_000,
            scan_attempts: 3,
            scan_retry_delay_ms: 500,
            bus_settle_ms: 100,
            max_sensors: 16,
            error_threshold: 3,
            lock_timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuationConfig {
    pub tick_ms: u64,
    pub change_indicator_ms: u64,
    pub grace_window_ms: u64,
    pub publish_delta_c: f32,
    pub lock_timeout_ms: u64,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            change_indicator_ms: 500,
            grace_window_ms: 60_000,
            publish_delta_c: 0.1,
            lock_timeout_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicationConfig {
    pub tick_ms: u64,
    pub cycle_ms: u64,
    pub batch_size: usize,
    pub sensor_delay_ms: u64,
    pub batch_delay_ms: u64,
    pub publish_attempts: u8,
    pub retry_base_ms: u64,
    pub reconnect_interval_ms: u64,
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub lock_timeout_ms: u64,
}

impl Default for PublicationConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            cycle_ms: 5_000,
            batch_size: 4,
            sensor_delay_ms: 100,
            batch_delay_ms: 500,
            publish_attempts: 3,
            retry_base_ms: 200,
            reconnect_interval_ms: 5_000,
            initial_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 60_000,
            lock_timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub client_id: String,
    pub system_name: String,
    pub device_id: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: String::new(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            client_id: "SensorHUB".to_string(),
            system_name: "Chaoticvolt".to_string(),
            device_id: "SensorHUB".to_string(),
            http_port: 8080,
        }
    }
}

impl NetworkConfig {
    pub fn broker_configured(&self) -> bool {
        !self.mqtt_host.trim().is_empty() && self.mqtt_port > 0
    }

    /// True when the broker session has to be rebuilt to pick up `current`.
    pub fn broker_changed(&self, current: &NetworkConfig) -> bool {
        self.mqtt_host != current.mqtt_host
            || self.mqtt_port != current.mqtt_port
            || self.mqtt_user != current.mqtt_user
            || self.mqtt_pass != current.mqtt_pass
    }
}

/// Broker address check: letters, digits, `.`, `-` and `:` only, no doubled or
/// dangling separators.
pub fn validate_broker_host(host: &str) -> Result<(), &'static str> {
    if host.is_empty() {
        return Err("broker cannot be empty");
    }
    if host.len() > MAX_BROKER_HOST_LEN {
        return Err("broker address too long");
    }
    if !host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
    {
        return Err("broker contains invalid characters");
    }
    if host.contains("..") || host.contains("--") {
        return Err("broker has repeated separators");
    }
    if host.starts_with(['.', '-']) || host.ends_with(['.', '-']) {
        return Err("broker cannot start or end with a separator");
    }
    Ok(())
}

pub fn validate_broker_port(port: u32) -> Result<u16, &'static str> {
    u16::try_from(port)
        .ok()
        .filter(|port| *port > 0)
        .ok_or("port must be between 1 and 65535")
}

pub fn validate_credential(value: &str) -> Result<(), &'static str> {
    if value.len() > MAX_MQTT_CREDENTIAL_LEN {
        return Err("mqtt credential too long");
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    #[default]
    Sim,
    W1,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub backend: BusBackend,
    pub w1_root: String,
    pub simulated_sensors: u8,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::Sim,
            w1_root: "/sys/bus/w1/devices".to_string(),
            simulated_sensors: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub acquisition: AcquisitionConfig,
    pub actuation: ActuationConfig,
    pub publication: PublicationConfig,
    pub network: NetworkConfig,
    pub bus: BusConfig,
    pub watchdog_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            acquisition: AcquisitionConfig::default(),
            actuation: ActuationConfig::default(),
            publication: PublicationConfig::default(),
            network: NetworkConfig::default(),
            bus: BusConfig::default(),
            watchdog_timeout_ms: 30_000,
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        let acq = &mut self.acquisition;
        acq.tick_ms = acq.tick_ms.clamp(100, 10_000);
        acq.read_interval_ms = acq.read_interval_ms.clamp(1_000, 3_600_000);
        acq.scan_interval_ms = acq.scan_interval_ms.clamp(10_000, 3_600_000);
        acq.scan_attempts = acq.scan_attempts.clamp(1, 10);
        acq.max_sensors = acq.max_sensors.clamp(1, 64);
        acq.lock_timeout_ms = acq.lock_timeout_ms.clamp(10, 5_000);

        let act = &mut self.actuation;
        act.tick_ms = act.tick_ms.clamp(100, 10_000);
        if !act.publish_delta_c.is_finite() || act.publish_delta_c < 0.0 {
            act.publish_delta_c = ActuationConfig::default().publish_delta_c;
        }
        act.lock_timeout_ms = act.lock_timeout_ms.clamp(10, 5_000);

        let publication = &mut self.publication;
        publication.tick_ms = publication.tick_ms.clamp(10, 1_000);
        publication.cycle_ms = publication.cycle_ms.clamp(1_000, 3_600_000);
        publication.batch_size = publication.batch_size.clamp(1, 64);
        publication.publish_attempts = publication.publish_attempts.clamp(1, 10);
        publication.initial_reconnect_delay_ms =
            publication.initial_reconnect_delay_ms.clamp(100, 60_000);
        publication.max_reconnect_delay_ms = publication
            .max_reconnect_delay_ms
            .max(publication.initial_reconnect_delay_ms);
        publication.lock_timeout_ms = publication.lock_timeout_ms.clamp(10, 5_000);

        if self.network.client_id.trim().is_empty() {
            self.network.client_id = NetworkConfig::default().client_id;
        }

        if self.bus.simulated_sensors > 64 {
            self.bus.simulated_sensors = 64;
        }

        if self.watchdog_timeout_ms == 0 {
            self.watchdog_timeout_ms = 30_000;
        }
        self.watchdog_timeout_ms = self.watchdog_timeout_ms.max(acq.tick_ms * 5);
    }
}
