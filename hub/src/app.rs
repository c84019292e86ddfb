use std::sync::Arc;

use anyhow::Context;
use sensorhub_common::{
    DisplaySink, OneWireBus, Preferences, RelayBank, RelayOutputs, RuntimeConfig, Topics,
};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::info;

use crate::{
    acquisition::{AcquisitionHandle, AcquisitionScheduler},
    actuation::{ActuationCoordinator, ActuationHandle},
    clock::Clock,
    engine::BusEngine,
    health::{self, Health},
    http::{self, AppState},
    mqtt::{CommandRouter, MqttTransport},
    publication::PublicationPump,
    queues,
    store::AppStore,
};

/// The hub with every loop wired up but nothing running yet.
pub struct App {
    acquisition: AcquisitionScheduler,
    actuation: ActuationCoordinator,
    publication: PublicationPump<MqttTransport>,
    http_state: AppState,
    health: Arc<Health>,
    clock: Clock,
    watchdog_timeout_ms: u64,
}

impl App {
    pub fn build(
        runtime: &RuntimeConfig,
        bus: Box<dyn OneWireBus>,
        outputs: Box<dyn RelayOutputs>,
        display: Box<dyn DisplaySink>,
        prefs: Preferences,
        store: AppStore,
    ) -> Self {
        let clock = Clock::start();
        let health = Arc::new(Health::new());
        let (senders, receivers) = queues::channels();
        let topics = Topics::new(
            runtime.network.system_name.clone(),
            runtime.network.device_id.clone(),
        );

        let engine = Arc::new(BusEngine::new(
            bus,
            runtime.acquisition.clone(),
            clock,
            health.clone(),
        ));
        let relays = Arc::new(Mutex::new(RelayBank::new()));

        let acquisition_handle = AcquisitionHandle::new(senders.commands.clone());
        let actuation_handle =
            ActuationHandle::new(senders.control.clone(), relays.clone(), health.clone());

        let acquisition = AcquisitionScheduler::new(
            engine.clone(),
            prefs.clone(),
            receivers.commands,
            senders.control.clone(),
            runtime.acquisition.clone(),
            clock,
            health.clone(),
        );

        let actuation = ActuationCoordinator::new(
            relays.clone(),
            outputs,
            display,
            engine.clone(),
            prefs.clone(),
            receivers.control,
            senders.publish.clone(),
            topics.clone(),
            runtime.actuation.clone(),
            clock,
            health.clone(),
        );

        let router = CommandRouter::new(
            topics.clone(),
            acquisition_handle.clone(),
            actuation_handle.clone(),
        );
        let transport = MqttTransport::start(&runtime.network, topics.clone(), router);
        let publication = PublicationPump::new(
            transport,
            runtime.network.broker_configured(),
            engine.clone(),
            relays,
            prefs.clone(),
            receivers.publish,
            topics,
            runtime.publication.clone(),
            clock,
            health.clone(),
        );

        let http_state = AppState {
            engine,
            acquisition: acquisition_handle,
            actuation: actuation_handle,
            prefs,
            store,
            health: health.clone(),
            link: publication.link_state(),
            clock,
            default_scan_interval_secs: runtime.acquisition.scan_interval_ms / 1_000,
        };

        Self {
            acquisition,
            actuation,
            publication,
            http_state,
            health,
            clock,
            watchdog_timeout_ms: runtime.watchdog_timeout_ms,
        }
    }

    /// Runs until the HTTP server stops, the watchdog trips or ctrl-c arrives.
    pub async fn run(self, listener: TcpListener) -> anyhow::Result<()> {
        let Self {
            acquisition,
            actuation,
            publication,
            http_state,
            health,
            clock,
            watchdog_timeout_ms,
        } = self;

        tokio::spawn(acquisition.run());
        tokio::spawn(actuation.run());
        tokio::spawn(publication.run());

        let app = http::router(http_state);
        tokio::select! {
            result = async { axum::serve(listener, app).await } => {
                result.context("http server stopped")?;
            }
            result = health::watchdog(&health, clock, watchdog_timeout_ms) => {
                result.context("watchdog reset")?;
            }
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("shutting down");
            }
        }
        Ok(())
    }
}
