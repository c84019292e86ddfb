use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use sensorhub_common::{
    config::{validate_broker_host, validate_broker_port, validate_credential, NetworkConfig},
    prefs::{validate_name, validate_scan_interval},
    DeviceAddress, HubStatus, LinkState, Preferences, RelayId, RelayView, RuntimeConfig,
    SensorView, SubmitError,
};

use crate::{
    acquisition::AcquisitionHandle, actuation::ActuationHandle, clock::Clock, engine::BusEngine,
    health::Health, store::AppStore,
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BusEngine>,
    pub acquisition: AcquisitionHandle,
    pub actuation: ActuationHandle,
    pub prefs: Preferences,
    pub store: AppStore,
    pub health: Arc<Health>,
    pub link: watch::Receiver<LinkState>,
    pub clock: Clock,
    pub default_scan_interval_secs: u64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct PreferencesUpdateResponse {
    status: &'static str,
    #[serde(rename = "restartRequired")]
    restart_required: bool,
}

#[derive(Debug, Deserialize)]
struct RelayRequest {
    #[serde(rename = "relay_id", alias = "relay")]
    relay: u8,
    state: bool,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct ScanningPrefs {
    #[serde(rename = "autoScanEnabled", default)]
    auto_scan_enabled: Option<bool>,
    #[serde(rename = "scanInterval", default)]
    scan_interval: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct DisplayPrefs {
    #[serde(
        rename = "selectedSensor",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    selected_sensor: Option<String>,
}

/// Broker settings as stored. The password is write-only.
#[derive(Debug, Serialize)]
struct MqttPrefsView {
    #[serde(skip_serializing_if = "Option::is_none")]
    broker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(rename = "passwordSet")]
    password_set: bool,
}

#[derive(Debug, Deserialize)]
struct MqttPrefsUpdate {
    broker: String,
    port: u32,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug)]
struct MqttSettings {
    broker: String,
    port: u16,
    username: String,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
struct SensorPrefsView {
    address: DeviceAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    temperature: f32,
    valid: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct RelayName {
    id: u8,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct SensorName {
    address: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Serialize)]
struct PreferencesView {
    mqtt: MqttPrefsView,
    scanning: ScanningPrefs,
    display: DisplayPrefs,
    sensors: Vec<SensorPrefsView>,
    relays: Vec<RelayName>,
}

#[derive(Debug, Deserialize)]
struct PreferencesUpdate {
    #[serde(default)]
    mqtt: Option<MqttPrefsUpdate>,
    #[serde(default)]
    scanning: Option<ScanningPrefs>,
    #[serde(default)]
    display: Option<DisplayPrefs>,
    #[serde(default)]
    sensors: Vec<SensorName>,
    #[serde(default)]
    relays: Vec<RelayName>,
}

/// A preferences update that has passed validation and can be written as a whole.
#[derive(Debug, Default)]
struct ValidatedUpdate {
    mqtt: Option<MqttSettings>,
    auto_scan: Option<bool>,
    scan_interval: Option<u32>,
    display_sensor: Option<DeviceAddress>,
    sensor_names: Vec<(DeviceAddress, String)>,
    relay_names: Vec<(RelayId, String)>,
}

impl PreferencesUpdate {
    fn validate(self) -> Result<ValidatedUpdate, String> {
        let mut validated = ValidatedUpdate::default();

        if let Some(mqtt) = self.mqtt {
            let broker = mqtt.broker.trim().to_string();
            validate_broker_host(&broker)?;
            let port = validate_broker_port(mqtt.port)?;
            validate_credential(&mqtt.username)?;
            if let Some(password) = &mqtt.password {
                validate_credential(password)?;
            }
            validated.mqtt = Some(MqttSettings {
                broker,
                port,
                username: mqtt.username,
                password: mqtt.password,
            });
        }

        if let Some(scanning) = self.scanning {
            validated.auto_scan = scanning.auto_scan_enabled;
            if let Some(secs) = scanning.scan_interval {
                validated.scan_interval =
                    Some(validate_scan_interval(secs).map_err(|err| err.to_string())?);
            }
        }

        if let Some(selected) = self.display.and_then(|display| display.selected_sensor) {
            let address = if selected.trim().is_empty() {
                DeviceAddress::UNSET
            } else {
                selected
                    .trim()
                    .parse()
                    .map_err(|err| format!("selectedSensor: {err}"))?
            };
            validated.display_sensor = Some(address);
        }

        for sensor in self.sensors {
            let address: DeviceAddress = sensor
                .address
                .trim()
                .parse()
                .map_err(|err| format!("sensor {}: {err}", sensor.address))?;
            let name = validate_name(&sensor.name).map_err(|err| err.to_string())?;
            validated.sensor_names.push((address, name.to_string()));
        }

        for relay in self.relays {
            let id = RelayId::new(relay.id).map_err(|err| err.to_string())?;
            let name = validate_name(&relay.name).map_err(|err| err.to_string())?;
            validated.relay_names.push((id, name.to_string()));
        }

        Ok(validated)
    }
}

impl MqttSettings {
    /// Writes the broker settings to the runtime config. Returns whether they changed.
    async fn persist(self, store: &AppStore) -> anyhow::Result<bool> {
        let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
            warn!("failed to load existing runtime config for mqtt update: {err:#}");
            RuntimeConfig::default()
        });

        let previous = runtime.network.clone();
        runtime.network.mqtt_host = self.broker;
        runtime.network.mqtt_port = self.port;
        runtime.network.mqtt_user = self.username;
        if let Some(password) = self.password {
            runtime.network.mqtt_pass = password;
        }

        store.save_runtime_config(&runtime).await?;
        Ok(previous.broker_changed(&runtime.network))
    }
}

impl ValidatedUpdate {
    fn apply(&self, prefs: &Preferences) -> Result<(), sensorhub_common::PrefsError> {
        if let Some(enabled) = self.auto_scan {
            prefs.set_auto_scan(enabled)?;
        }
        if let Some(secs) = self.scan_interval {
            prefs.set_scan_interval_secs(secs)?;
        }
        if let Some(address) = self.display_sensor {
            prefs.set_display_sensor(address)?;
        }
        for (address, name) in &self.sensor_names {
            prefs.set_sensor_name(address, name)?;
        }
        for (relay, name) in &self.relay_names {
            prefs.set_relay_name(*relay, name)?;
        }
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sensors", get(handle_get_sensors))
        .route("/api/relay", get(handle_get_relays).post(handle_set_relay))
        .route("/api/scan", post(handle_scan))
        .route("/api/read", post(handle_read))
        .route(
            "/api/preferences",
            get(handle_get_preferences).post(handle_set_preferences),
        )
        .route("/api/status", get(handle_get_status))
        .with_state(state)
}

async fn handle_get_sensors(State(state): State<AppState>) -> axum::response::Response {
    let Some(sensors) = state.engine.sensor_list().await else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Sensor list busy");
    };
    let display = state.prefs.display_sensor().unwrap_or(DeviceAddress::UNSET);

    let views: Vec<SensorView> = sensors
        .iter()
        .map(|record| {
            let name = state.prefs.sensor_name(&record.address).ok().flatten();
            SensorView::new(record, name, display)
        })
        .collect();
    Json(views).into_response()
}

async fn handle_get_relays(State(state): State<AppState>) -> axum::response::Response {
    let mut views = Vec::new();
    for relay in RelayId::all() {
        let Some(relay_state) = state.actuation.relay_state(relay).await else {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Relay state busy");
        };
        let name = state.prefs.relay_name(relay).ok().flatten();
        views.push(RelayView::new(relay, relay_state, name));
    }
    Json(views).into_response()
}

async fn handle_set_relay(
    State(state): State<AppState>,
    Json(request): Json<RelayRequest>,
) -> axum::response::Response {
    match state
        .actuation
        .submit_relay_request(request.relay, request.state)
        .await
    {
        Ok(()) => {
            info!("relay {} -> {} requested over http", request.relay, request.state);
            Json(StatusBody { status: "success" }).into_response()
        }
        Err(err) => submit_error(err),
    }
}

async fn handle_scan(State(state): State<AppState>) -> axum::response::Response {
    match state.acquisition.submit_scan_request().await {
        Ok(()) => (StatusCode::ACCEPTED, Json(StatusBody { status: "queued" })).into_response(),
        Err(err) => submit_error(err),
    }
}

async fn handle_read(State(state): State<AppState>) -> axum::response::Response {
    match state.acquisition.submit_read_request().await {
        Ok(()) => (StatusCode::ACCEPTED, Json(StatusBody { status: "queued" })).into_response(),
        Err(err) => submit_error(err),
    }
}

async fn handle_get_preferences(State(state): State<AppState>) -> axum::response::Response {
    let runtime = state
        .store
        .load_runtime_config()
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load mqtt settings from store: {err:#}");
            RuntimeConfig::default()
        });
    let mqtt = build_mqtt_view(&runtime.network);

    let prefs = &state.prefs;
    let scanning = match (prefs.auto_scan(), prefs.scan_interval_secs()) {
        (Ok(auto_scan), Ok(interval)) => ScanningPrefs {
            auto_scan_enabled: Some(auto_scan),
            scan_interval: Some(interval.unwrap_or(state.default_scan_interval_secs as u32)),
        },
        (Err(err), _) | (_, Err(err)) => {
            warn!("preferences unreadable: {err}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    let selected = prefs.display_sensor().unwrap_or(DeviceAddress::UNSET);
    let display = DisplayPrefs {
        selected_sensor: (!selected.is_unset()).then(|| selected.to_hex()),
    };

    let sensors = state
        .engine
        .sensor_list()
        .await
        .unwrap_or_default()
        .iter()
        .map(|record| SensorPrefsView {
            address: record.address,
            name: prefs.sensor_name(&record.address).ok().flatten(),
            temperature: record.temperature,
            valid: record.valid,
        })
        .collect();

    let relays = RelayId::all()
        .map(|relay| RelayName {
            id: relay.value(),
            name: prefs.relay_name(relay).ok().flatten().unwrap_or_default(),
        })
        .collect();

    Json(PreferencesView {
        mqtt,
        scanning,
        display,
        sensors,
        relays,
    })
    .into_response()
}

async fn handle_set_preferences(
    State(state): State<AppState>,
    Json(update): Json<PreferencesUpdate>,
) -> axum::response::Response {
    let mut validated = match update.validate() {
        Ok(validated) => validated,
        Err(message) => {
            warn!("rejected preferences update: {message}");
            return error_response(StatusCode::BAD_REQUEST, &message);
        }
    };

    let mut restart_required = false;
    if let Some(mqtt) = validated.mqtt.take() {
        match mqtt.persist(&state.store).await {
            Ok(changed) => restart_required = changed,
            Err(err) => {
                warn!("failed to persist mqtt settings: {err:#}");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to persist mqtt settings",
                );
            }
        }
    }

    if let Err(err) = validated.apply(&state.prefs) {
        warn!("failed to persist preferences: {err}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist preferences",
        );
    }

    info!("preferences updated");
    Json(PreferencesUpdateResponse {
        status: "success",
        restart_required,
    })
    .into_response()
}

async fn handle_get_status(State(state): State<AppState>) -> axum::response::Response {
    let link = *state.link.borrow();
    let bus_state = state
        .engine
        .bus_state()
        .await
        .map(|bus| bus.as_str())
        .unwrap_or("UNKNOWN");
    let sensor_count = state
        .engine
        .sensor_list()
        .await
        .map(|sensors| sensors.len())
        .unwrap_or(0);
    let scan_interval_secs = state
        .prefs
        .scan_interval_secs()
        .ok()
        .flatten()
        .map(u64::from)
        .unwrap_or(state.default_scan_interval_secs);

    Json(HubStatus {
        link,
        bus_state,
        sensor_count,
        last_scan_ms: state.engine.last_scan_ms().await,
        auto_scan: state.prefs.auto_scan().unwrap_or(true),
        scan_interval_secs,
        health: state.health.snapshot(),
        uptime_ms: state.clock.now_ms(),
        now_epoch: Utc::now().timestamp(),
    })
    .into_response()
}

fn build_mqtt_view(network: &NetworkConfig) -> MqttPrefsView {
    MqttPrefsView {
        broker: (!network.mqtt_host.is_empty()).then(|| network.mqtt_host.clone()),
        port: (network.mqtt_port > 0).then_some(network.mqtt_port),
        username: (!network.mqtt_user.is_empty()).then(|| network.mqtt_user.clone()),
        password_set: !network.mqtt_pass.is_empty(),
    }
}

fn submit_error(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::UnknownRelay(_) => error_response(StatusCode::BAD_REQUEST, "Invalid relay_id"),
        SubmitError::QueueFull | SubmitError::Closed => {
            warn!("request not queued: {err}");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Busy, try again")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
