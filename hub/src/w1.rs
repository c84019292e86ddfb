use std::{
    fs,
    path::{Path, PathBuf},
};

use sensorhub_common::{BusError, DeviceAddress, OneWireBus};
use tracing::debug;

/// Family codes of the temperature sensors the kernel's w1_therm driver serves.
const THERM_FAMILIES: [u8; 4] = [0x10, 0x22, 0x28, 0x3B];

/// 1-Wire bus exposed by the Linux `w1` subsystem under `/sys/bus/w1/devices`.
///
/// A conversion is broadcast through each master's `therm_bulk_read`; reads then come
/// from the per-device `temperature` file in millidegrees.
pub struct W1SysfsBus {
    root: PathBuf,
    devices: Vec<(DeviceAddress, PathBuf)>,
}

impl W1SysfsBus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            devices: Vec::new(),
        }
    }
}

fn io_error(path: &Path, err: std::io::Error) -> BusError {
    BusError::Io(format!("{}: {err}", path.display()))
}

/// Address for a device directory such as `28-0316a2795dff`.
///
/// The kernel prints the 48-bit serial as one number, so the ROM bytes come back in
/// little-endian order; the CRC byte is recomputed.
fn parse_device_dir(name: &str) -> Option<DeviceAddress> {
    let (family, serial) = name.split_once('-')?;
    if family.len() != 2 || serial.len() != 12 {
        return None;
    }
    let family = u8::from_str_radix(family, 16).ok()?;
    let serial = u64::from_str_radix(serial, 16).ok()?;
    let mut bytes = [0_u8; 6];
    bytes.copy_from_slice(&serial.to_le_bytes()[..6]);
    Some(DeviceAddress::from_parts(family, bytes))
}

impl OneWireBus for W1SysfsBus {
    fn reset(&mut self) -> Result<(), BusError> {
        let entries = fs::read_dir(&self.root).map_err(|err| io_error(&self.root, err))?;

        let mut devices = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(address) = name.to_str().and_then(parse_device_dir) else {
                continue;
            };
            if THERM_FAMILIES.contains(&address.family_code()) {
                devices.push((address, entry.path()));
            }
        }
        devices.sort_by(|a, b| a.1.cmp(&b.1));
        self.devices = devices;
        Ok(())
    }

    fn device_count(&mut self) -> usize {
        self.devices.len()
    }

    fn address(&mut self, index: usize) -> Option<DeviceAddress> {
        self.devices.get(index).map(|(address, _)| *address)
    }

    fn request_temperatures(&mut self) -> Result<(), BusError> {
        let entries = fs::read_dir(&self.root).map_err(|err| io_error(&self.root, err))?;

        for entry in entries.flatten() {
            let is_master = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with("w1_bus_master"));
            if !is_master {
                continue;
            }
            let trigger = entry.path().join("therm_bulk_read");
            if !trigger.exists() {
                debug!("{} has no bulk read, devices convert on read", entry.path().display());
                continue;
            }
            fs::write(&trigger, "trigger").map_err(|err| io_error(&trigger, err))?;
        }
        Ok(())
    }

    fn read_temperature(&mut self, address: &DeviceAddress) -> Result<f32, BusError> {
        let Some((_, dir)) = self.devices.iter().find(|(known, _)| known == address) else {
            return Err(BusError::Io(format!("device {address} not enumerated")));
        };
        let path = dir.join("temperature");
        let raw = fs::read_to_string(&path).map_err(|err| io_error(&path, err))?;
        let millidegrees: i32 = raw
            .trim()
            .parse()
            .map_err(|_| BusError::Io(format!("{}: unreadable value {raw:?}", path.display())))?;
        Ok(millidegrees as f32 / 1_000.0)
    }
}
