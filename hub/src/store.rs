use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::Context;
use sensorhub_common::{
    prefs::PreferenceMap, PrefValue, PreferenceStore, PrefsError, RuntimeConfig,
};

/// Files under the hub's data directory.
#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    preferences_path: Arc<PathBuf>,
}

impl AppStore {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("SENSORHUB_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.sensorhub"));
        Self::new(data_dir)
    }

    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            preferences_path: Arc::new(data_dir.join("preferences.json")),
        }
    }

    pub fn has_runtime_config(&self) -> bool {
        self.runtime_path.exists()
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
                .with_context(|| format!("invalid {}", self.runtime_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let path = self.runtime_path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }

    pub fn open_preferences(&self) -> anyhow::Result<FilePreferenceStore> {
        FilePreferenceStore::open(self.preferences_path.as_ref().clone())
    }
}

/// Preference map kept in memory and rewritten to a JSON file on every change.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    entries: Mutex<PreferenceMap>,
}

impl FilePreferenceStore {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let entries = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice::<PreferenceMap>(&raw)
                .with_context(|| format!("invalid {}", path.display()))?,
            Err(err) if err.kind() == ErrorKind::NotFound => PreferenceMap::new(),
            Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn update(&self, change: impl FnOnce(&mut PreferenceMap)) -> Result<(), PrefsError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| PrefsError::Storage("preference lock poisoned".to_string()))?;
        let mut staged = entries.clone();
        change(&mut staged);
        self.persist(&staged)?;
        *entries = staged;
        Ok(())
    }

    fn persist(&self, entries: &PreferenceMap) -> Result<(), PrefsError> {
        let storage = |err: std::io::Error| PrefsError::Storage(err.to_string());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }
        let payload = serde_json::to_vec_pretty(entries)
            .map_err(|err| PrefsError::Storage(err.to_string()))?;
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, payload).map_err(storage)?;
        std::fs::rename(&staging, &self.path).map_err(storage)
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<PrefValue>, PrefsError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| PrefsError::Storage("preference lock poisoned".to_string()))?;
        Ok(entries
            .get(namespace)
            .and_then(|values| values.get(key))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: PrefValue) -> Result<(), PrefsError> {
        self.update(|entries| {
            entries
                .entry(namespace.to_string())
                .or_default()
                .insert(key.to_string(), value);
        })
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<(), PrefsError> {
        self.update(|entries| {
            if let Some(values) = entries.get_mut(namespace) {
                values.remove(key);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use sensorhub_common::{DeviceAddress, Preferences};

    use super::*;

    #[tokio::test]
    async fn missing_runtime_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::new(dir.path());

        assert!(!store.has_runtime_config());
        let config = store.load_runtime_config().await.unwrap();
        assert_eq!(config.acquisition.read_interval_ms, 10_000);

        let mut changed = config.clone();
        changed.network.mqtt_host = "broker.lan".to_string();
        store.save_runtime_config(&changed).await.unwrap();
        assert!(store.has_runtime_config());
        let reloaded = store.load_runtime_config().await.unwrap();
        assert_eq!(reloaded.network.mqtt_host, "broker.lan");
    }

    #[test]
    fn preferences_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::new(dir.path());
        let address = DeviceAddress::from_parts(0x28, [9, 8, 7, 6, 5, 4]);

        {
            let prefs = Preferences::new(Arc::new(store.open_preferences().unwrap()));
            prefs.set_scan_interval_secs(120).unwrap();
            prefs.set_display_sensor(address).unwrap();
            prefs.set_sensor_name(&address, "Tank").unwrap();
        }

        let prefs = Preferences::new(Arc::new(store.open_preferences().unwrap()));
        assert_eq!(prefs.scan_interval_secs(), Ok(Some(120)));
        assert_eq!(prefs.display_sensor(), Ok(address));
        assert_eq!(prefs.sensor_name(&address), Ok(Some("Tank".to_string())));
    }

    #[test]
    fn failed_write_keeps_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let prefs = FilePreferenceStore::open(data_dir.join("preferences.json")).unwrap();
        prefs
            .set("tempmon", "scan_interval", PrefValue::U32(60))
            .unwrap();

        std::fs::remove_dir_all(&data_dir).unwrap();
        std::fs::write(&data_dir, b"not a directory").unwrap();

        let result = prefs.set("tempmon", "scan_interval", PrefValue::U32(99));
        assert!(matches!(result, Err(PrefsError::Storage(_))));
        assert_eq!(
            prefs.get("tempmon", "scan_interval"),
            Ok(Some(PrefValue::U32(60)))
        );
        assert!(prefs.remove("tempmon", "scan_interval").is_err());
        assert_eq!(
            prefs.get("tempmon", "scan_interval"),
            Ok(Some(PrefValue::U32(60)))
        );
    }

    #[test]
    fn corrupt_preferences_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("preferences.json"), b"{not json").unwrap();

        assert!(AppStore::new(dir.path()).open_preferences().is_err());
    }
}
