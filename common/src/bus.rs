use serde::Serialize;

use crate::{address::DeviceAddress, error::BusError};

/// Value a DS18B20 driver reports when the device did not answer.
pub const DEVICE_DISCONNECTED_C: f32 = -127.0;

/// Scratchpad power-on-reset value; a read returning it means no conversion happened.
pub const POWER_ON_RESET_C: f32 = 85.0;

/// Family code of the DS18B20.
pub const DS18B20_FAMILY: u8 = 0x28;

/// The one bus-level operation in flight, if any.
///
/// Only `Idle -> Scanning -> Idle` and `Idle -> Converting -> Idle` are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum BusState {
    #[default]
    Idle,
    Scanning,
    Converting {
        #[serde(rename = "startedMs")]
        started_ms: u64,
    },
}

impl BusState {
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_converting(self) -> bool {
        matches!(self, Self::Converting { .. })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Scanning => "SCANNING",
            Self::Converting { .. } => "CONVERTING",
        }
    }
}

/// Hardware seam for the shared 1-Wire bus.
///
/// Calls may block on file or wire I/O. The engine serialises them and runs them on the
/// blocking pool, so implementations do not need their own locking.
pub trait OneWireBus: Send {
    /// Issues a bus reset and re-enumerates devices.
    fn reset(&mut self) -> Result<(), BusError>;

    /// Number of devices found by the last reset.
    fn device_count(&mut self) -> usize;

    /// ROM code of the device at `index` from the last enumeration.
    fn address(&mut self, index: usize) -> Option<DeviceAddress>;

    /// Broadcasts "convert T" to every device at once.
    fn request_temperatures(&mut self) -> Result<(), BusError>;

    /// Reads the scratchpad temperature of one device, in °C.
    fn read_temperature(&mut self, address: &DeviceAddress) -> Result<f32, BusError>;
}

/// Filters a raw read down to a usable temperature.
///
/// Sentinels and non-finite values count as failed reads.
pub fn usable_reading(raw: Result<f32, BusError>) -> Option<f32> {
    match raw {
        Ok(value)
            if value.is_finite()
                && value != DEVICE_DISCONNECTED_C
                && value != POWER_ON_RESET_C =>
        {
            Some(value)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_failed_reads() {
        assert_eq!(usable_reading(Ok(21.5)), Some(21.5));
        assert_eq!(usable_reading(Ok(DEVICE_DISCONNECTED_C)), None);
        assert_eq!(usable_reading(Ok(POWER_ON_RESET_C)), None);
        assert_eq!(usable_reading(Ok(f32::NAN)), None);
        assert_eq!(usable_reading(Err(BusError::Io("crc".into()))), None);
    }
}
