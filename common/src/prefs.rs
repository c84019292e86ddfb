use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::{address::DeviceAddress, error::PrefsError, relay::RelayId};

pub const NAMESPACE: &str = "tempmon";

pub const KEY_SCAN_INTERVAL: &str = "scan_interval";
pub const KEY_AUTO_SCAN: &str = "auto_scan";
pub const KEY_DISPLAY_SENSOR: &str = "display_sensor";

pub const MIN_SCAN_INTERVAL_SECS: u32 = 10;
pub const MAX_SCAN_INTERVAL_SECS: u32 = 3_600;
pub const MAX_NAME_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    U32(u32),
    Str(String),
}

/// Namespace -> key -> value.
pub type PreferenceMap = BTreeMap<String, BTreeMap<String, PrefValue>>;

/// Namespaced key-value storage that survives restarts.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<PrefValue>, PrefsError>;
    fn set(&self, namespace: &str, key: &str, value: PrefValue) -> Result<(), PrefsError>;
    fn remove(&self, namespace: &str, key: &str) -> Result<(), PrefsError>;
}

#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    entries: Mutex<PreferenceMap>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<PrefValue>, PrefsError> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries
            .get(namespace)
            .and_then(|values| values.get(key))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: PrefValue) -> Result<(), PrefsError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<(), PrefsError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        if let Some(values) = entries.get_mut(namespace) {
            values.remove(key);
        }
        Ok(())
    }
}

fn poisoned() -> PrefsError {
    PrefsError::Storage("preference lock poisoned".to_string())
}

/// Storage key for a sensor's label: `s_` plus the last four address bytes.
pub fn sensor_key(address: &DeviceAddress) -> String {
    let bytes = address.bytes();
    format!(
        "s_{:02X}{:02X}{:02X}{:02X}",
        bytes[4], bytes[5], bytes[6], bytes[7]
    )
}

pub fn relay_key(relay: RelayId) -> String {
    format!("relay_{}", relay.value())
}

pub fn validate_scan_interval(secs: u32) -> Result<u32, PrefsError> {
    if (MIN_SCAN_INTERVAL_SECS..=MAX_SCAN_INTERVAL_SECS).contains(&secs) {
        Ok(secs)
    } else {
        Err(PrefsError::OutOfRange {
            key: KEY_SCAN_INTERVAL.to_string(),
        })
    }
}

pub fn validate_name(name: &str) -> Result<&str, PrefsError> {
    let trimmed = name.trim();
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(PrefsError::NameTooLong { max: MAX_NAME_LEN });
    }
    Ok(trimmed)
}

/// Typed view over the hub's preference keys.
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPreferenceStore::new()))
    }

    /// Stored scan interval, clamped to the allowed range. `None` when never set.
    pub fn scan_interval_secs(&self) -> Result<Option<u32>, PrefsError> {
        match self.store.get(NAMESPACE, KEY_SCAN_INTERVAL)? {
            None => Ok(None),
            Some(PrefValue::U32(secs)) => {
                Ok(Some(secs.clamp(MIN_SCAN_INTERVAL_SECS, MAX_SCAN_INTERVAL_SECS)))
            }
            Some(_) => Err(wrong_type(KEY_SCAN_INTERVAL)),
        }
    }

    pub fn set_scan_interval_secs(&self, secs: u32) -> Result<(), PrefsError> {
        let secs = validate_scan_interval(secs)?;
        self.store.set(NAMESPACE, KEY_SCAN_INTERVAL, PrefValue::U32(secs))
    }

    pub fn auto_scan(&self) -> Result<bool, PrefsError> {
        match self.store.get(NAMESPACE, KEY_AUTO_SCAN)? {
            None => Ok(true),
            Some(PrefValue::Bool(enabled)) => Ok(enabled),
            Some(PrefValue::U32(value)) => Ok(value != 0),
            Some(_) => Err(wrong_type(KEY_AUTO_SCAN)),
        }
    }

    pub fn set_auto_scan(&self, enabled: bool) -> Result<(), PrefsError> {
        self.store
            .set(NAMESPACE, KEY_AUTO_SCAN, PrefValue::Bool(enabled))
    }

    /// Selected display sensor; [`DeviceAddress::UNSET`] when none or unreadable.
    pub fn display_sensor(&self) -> Result<DeviceAddress, PrefsError> {
        match self.store.get(NAMESPACE, KEY_DISPLAY_SENSOR)? {
            Some(PrefValue::Str(raw)) => Ok(raw.parse().unwrap_or(DeviceAddress::UNSET)),
            None => Ok(DeviceAddress::UNSET),
            Some(_) => Err(wrong_type(KEY_DISPLAY_SENSOR)),
        }
    }

    pub fn set_display_sensor(&self, address: DeviceAddress) -> Result<(), PrefsError> {
        self.store.set(
            NAMESPACE,
            KEY_DISPLAY_SENSOR,
            PrefValue::Str(address.to_hex()),
        )
    }

    pub fn sensor_name(&self, address: &DeviceAddress) -> Result<Option<String>, PrefsError> {
        self.name(&sensor_key(address))
    }

    /// Stores a label; an empty name removes it.
    pub fn set_sensor_name(&self, address: &DeviceAddress, name: &str) -> Result<(), PrefsError> {
        self.set_name(&sensor_key(address), name)
    }

    pub fn relay_name(&self, relay: RelayId) -> Result<Option<String>, PrefsError> {
        self.name(&relay_key(relay))
    }

    pub fn set_relay_name(&self, relay: RelayId, name: &str) -> Result<(), PrefsError> {
        self.set_name(&relay_key(relay), name)
    }

    fn name(&self, key: &str) -> Result<Option<String>, PrefsError> {
        match self.store.get(NAMESPACE, key)? {
            Some(PrefValue::Str(name)) if !name.is_empty() => Ok(Some(name)),
            Some(PrefValue::Str(_)) | None => Ok(None),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set_name(&self, key: &str, name: &str) -> Result<(), PrefsError> {
        let name = validate_name(name)?;
        if name.is_empty() {
            self.store.remove(NAMESPACE, key)
        } else {
            self.store
                .set(NAMESPACE, key, PrefValue::Str(name.to_string()))
        }
    }
}

fn wrong_type(key: &str) -> PrefsError {
    PrefsError::WrongType {
        key: key.to_string(),
    }
}
