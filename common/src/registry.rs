use serde::Serialize;

use crate::{
    address::DeviceAddress,
    bus::{BusState, DEVICE_DISCONNECTED_C},
    error::BusError,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorRecord {
    pub address: DeviceAddress,
    pub temperature: f32,
    pub last_valid_reading: Option<f32>,
    pub last_read_ms: Option<u64>,
    pub consecutive_errors: u8,
    pub valid: bool,
    pub is_active: bool,
}

impl SensorRecord {
    /// Fresh record for a device seen for the first time: present, but unread.
    pub fn discovered(address: DeviceAddress) -> Self {
        Self {
            address,
            temperature: DEVICE_DISCONNECTED_C,
            last_valid_reading: None,
            last_read_ms: None,
            consecutive_errors: 0,
            valid: false,
            is_active: true,
        }
    }

    /// Value to show for this sensor right now.
    ///
    /// Invalid sensors keep showing their last good value until `grace_ms` has passed
    /// since that value was read.
    pub fn display_value(&self, now_ms: u64, grace_ms: u64) -> Option<f32> {
        if self.valid {
            return Some(self.temperature);
        }
        let last_read = self.last_read_ms?;
        if now_ms.saturating_sub(last_read) < grace_ms {
            self.last_valid_reading
        } else {
            None
        }
    }

    fn record_success(&mut self, value: f32, now_ms: u64) {
        self.temperature = value;
        self.last_valid_reading = Some(value);
        self.last_read_ms = Some(now_ms);
        self.consecutive_errors = 0;
        self.valid = true;
    }

    /// Returns true when this failure is the one that invalidated the sensor.
    fn record_failure(&mut self, error_threshold: u8) -> bool {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.temperature = self.last_valid_reading.unwrap_or(DEVICE_DISCONNECTED_C);
        if self.consecutive_errors > error_threshold && self.valid {
            self.valid = false;
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub retained: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFailure {
    pub address: DeviceAddress,
    pub consecutive_errors: u8,
    pub invalidated: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectReport {
    pub succeeded: usize,
    pub failures: Vec<ReadFailure>,
}

impl CollectReport {
    pub fn all_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Rebuilds the sensor list from a scan's candidates.
///
/// The result is exactly `candidates` in scan order; records whose address was already
/// known carry their reading history over.
pub fn merge(existing: &[SensorRecord], candidates: &[DeviceAddress]) -> Vec<SensorRecord> {
    let mut merged: Vec<SensorRecord> = Vec::with_capacity(candidates.len());

    for address in candidates {
        if merged.iter().any(|record| record.address == *address) {
            continue;
        }

        let mut record = SensorRecord::discovered(*address);
        if let Some(previous) = existing.iter().find(|record| record.address == *address) {
            record.temperature = previous.temperature;
            record.last_valid_reading = previous.last_valid_reading;
            record.last_read_ms = previous.last_read_ms;
            record.valid = previous.valid;
            record.consecutive_errors = previous.consecutive_errors;
        }
        merged.push(record);
    }

    merged
}

/// Discovered sensors plus the state of the bus that feeds them.
///
/// Both live behind one lock so a reader never sees a list that disagrees with the
/// bus state.
#[derive(Debug, Clone)]
pub struct SensorRegistry {
    sensors: Vec<SensorRecord>,
    state: BusState,
    last_scan_ms: Option<u64>,
    error_threshold: u8,
}

impl SensorRegistry {
    pub fn new(error_threshold: u8) -> Self {
        Self {
            sensors: Vec::new(),
            state: BusState::Idle,
            last_scan_ms: None,
            error_threshold,
        }
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    pub fn last_scan_ms(&self) -> Option<u64> {
        self.last_scan_ms
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn sensors(&self) -> &[SensorRecord] {
        &self.sensors
    }

    /// Owned copy of the current list.
    pub fn snapshot(&self) -> Vec<SensorRecord> {
        self.sensors.clone()
    }

    pub fn addresses(&self) -> Vec<DeviceAddress> {
        self.sensors.iter().map(|record| record.address).collect()
    }

    pub fn find(&self, address: &DeviceAddress) -> Option<&SensorRecord> {
        self.sensors.iter().find(|record| record.address == *address)
    }

    pub fn begin_scan(&mut self) -> Result<(), BusError> {
        if !self.state.is_idle() {
            return Err(BusError::Busy(self.state));
        }
        self.state = BusState::Scanning;
        Ok(())
    }

    pub fn finish_scan(
        &mut self,
        candidates: &[DeviceAddress],
        now_ms: u64,
    ) -> Result<MergeReport, BusError> {
        if self.state != BusState::Scanning {
            return Err(BusError::NotScanning);
        }

        let merged = merge(&self.sensors, candidates);
        let retained = merged
            .iter()
            .filter(|record| self.find(&record.address).is_some())
            .count();
        let report = MergeReport {
            added: merged.len() - retained,
            retained,
            dropped: self.sensors.len() - retained,
        };

        self.sensors = merged;
        self.last_scan_ms = Some(now_ms);
        self.state = BusState::Idle;
        Ok(report)
    }

    /// Ends a scan that found nothing; the existing list is left untouched.
    pub fn abort_scan(&mut self) {
        if self.state == BusState::Scanning {
            self.state = BusState::Idle;
        }
    }

    pub fn begin_conversion(&mut self, now_ms: u64) -> Result<(), BusError> {
        if !self.state.is_idle() {
            return Err(BusError::Busy(self.state));
        }
        self.state = BusState::Converting { started_ms: now_ms };
        Ok(())
    }

    pub fn cancel_conversion(&mut self) {
        if self.state.is_converting() {
            self.state = BusState::Idle;
        }
    }

    /// Applies one conversion's results and returns the bus to idle.
    ///
    /// A tracked sensor with no entry in `readings`, or with `None`, counts as a failed
    /// read. Addresses not in the registry are ignored.
    pub fn complete_conversion(
        &mut self,
        readings: &[(DeviceAddress, Option<f32>)],
        now_ms: u64,
    ) -> Result<CollectReport, BusError> {
        if !self.state.is_converting() {
            return Err(BusError::NotConverting);
        }

        let mut report = CollectReport::default();
        for record in &mut self.sensors {
            let reading = readings
                .iter()
                .find(|(address, _)| *address == record.address)
                .and_then(|(_, value)| *value);

            match reading {
                Some(value) => {
                    record.record_success(value, now_ms);
                    report.succeeded += 1;
                }
                None => {
                    let invalidated = record.record_failure(self.error_threshold);
                    report.failures.push(ReadFailure {
                        address: record.address,
                        consecutive_errors: record.consecutive_errors,
                        invalidated,
                    });
                }
            }
        }

        self.state = BusState::Idle;
        Ok(report)
    }
}
