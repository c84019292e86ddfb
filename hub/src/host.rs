use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use sensorhub_common::{BusBackend, OneWireBus, Preferences, RuntimeConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    app::App,
    sim::{LoggingDisplay, LoggingRelays, SimulatedBus},
    store::AppStore,
    w1::W1SysfsBus,
};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::from_env();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    if !store.has_runtime_config() {
        if let Err(err) = store.save_runtime_config(&runtime).await {
            warn!("failed to write default runtime config: {err:#}");
        }
    }
    apply_env_overrides(&mut runtime);
    runtime.sanitize();

    let prefs = Preferences::new(Arc::new(
        store
            .open_preferences()
            .context("failed to open preferences")?,
    ));

    let bus: Box<dyn OneWireBus> = match runtime.bus.backend {
        BusBackend::Sim => {
            info!(
                "using simulated bus with {} sensors",
                runtime.bus.simulated_sensors
            );
            Box::new(SimulatedBus::new(runtime.bus.simulated_sensors))
        }
        BusBackend::W1 => {
            info!("using w1 sysfs bus at {}", runtime.bus.w1_root);
            Box::new(W1SysfsBus::new(runtime.bus.w1_root.clone()))
        }
    };

    if runtime.network.broker_configured() {
        info!(
            "mqtt broker {}:{}",
            runtime.network.mqtt_host, runtime.network.mqtt_port
        );
    } else {
        info!("no mqtt broker configured, publishing disabled");
    }

    let app = App::build(
        &runtime,
        bus,
        Box::new(LoggingRelays),
        Box::new(LoggingDisplay::default()),
        prefs,
        store,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.network.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind sensorhub server at {addr}"))?;

    info!("sensorhub listening on http://{addr}");
    app.run(listener).await
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    let network = &mut runtime.network;
    if let Ok(host) = std::env::var("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = env_parse::<u16>("MQTT_PORT") {
        network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
    if let Some(port) = env_parse::<u16>("SENSORHUB_HTTP_PORT") {
        network.http_port = port;
    }

    match std::env::var("SENSORHUB_BUS").as_deref() {
        Ok("sim") => runtime.bus.backend = BusBackend::Sim,
        Ok("w1") => runtime.bus.backend = BusBackend::W1,
        Ok(other) => warn!("ignoring unknown SENSORHUB_BUS value {other:?}"),
        Err(_) => {}
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
}
