use sensorhub_common::{
    bus::DS18B20_FAMILY, BusError, DeviceAddress, DisplaySink, OneWireBus, RelayId, RelayOutputs,
};
use tracing::info;

/// In-process stand-in for a populated 1-Wire bus.
///
/// Readings drift slowly with each conversion so downstream change detection has
/// something to do.
pub struct SimulatedBus {
    devices: Vec<DeviceAddress>,
    enumerated: usize,
    conversions: u64,
}

impl SimulatedBus {
    pub fn new(sensor_count: u8) -> Self {
        let devices = (0..sensor_count)
            .map(|n| DeviceAddress::from_parts(DS18B20_FAMILY, [0x5E, 0x4B, 0x00, 0x00, 0x00, n]))
            .collect();
        Self {
            devices,
            enumerated: 0,
            conversions: 0,
        }
    }
}

impl OneWireBus for SimulatedBus {
    fn reset(&mut self) -> Result<(), BusError> {
        self.enumerated = self.devices.len();
        Ok(())
    }

    fn device_count(&mut self) -> usize {
        self.enumerated
    }

    fn address(&mut self, index: usize) -> Option<DeviceAddress> {
        self.devices.get(index).copied()
    }

    fn request_temperatures(&mut self) -> Result<(), BusError> {
        self.conversions = self.conversions.saturating_add(1);
        Ok(())
    }

    fn read_temperature(&mut self, address: &DeviceAddress) -> Result<f32, BusError> {
        let slot = self
            .devices
            .iter()
            .position(|device| device == address)
            .ok_or(BusError::NoDevices)?;
        let base = 18.5 + slot as f32 * 0.75;
        Ok(base + (self.conversions % 8) as f32 * 0.125)
    }
}

/// Relay outputs that only log.
#[derive(Default)]
pub struct LoggingRelays;

impl RelayOutputs for LoggingRelays {
    fn drive(&mut self, relay: RelayId, on: bool) {
        info!("relay {} driven {}", relay.value(), if on { "on" } else { "off" });
    }
}

/// Display that logs whenever what it shows changes.
#[derive(Default)]
pub struct LoggingDisplay {
    shown: Option<String>,
}

impl LoggingDisplay {
    fn show(&mut self, text: String) {
        if self.shown.as_deref() != Some(text.as_str()) {
            info!("display: {text}");
            self.shown = Some(text);
        }
    }
}

impl DisplaySink for LoggingDisplay {
    fn show_temperature(&mut self, celsius: f32) {
        self.show(format!("{celsius:.1}"));
    }

    fn show_message(&mut self, message: &str) {
        self.show(message.to_string());
    }
}
