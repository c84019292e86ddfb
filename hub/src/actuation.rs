use std::{sync::Arc, time::Duration};

use sensorhub_common::{
    config::ActuationConfig, display::CHANGE_INDICATOR, topics::relay_payload, DisplaySelector,
    DisplaySink, DisplayUpdate, Preferences, RelayBank, RelayId, RelayOutputs, RelayState,
    SubmitError, TaskMessage, Topics, RELAY_COUNT,
};
use tokio::{
    sync::{
        mpsc::{error::TryRecvError, Receiver, Sender},
        Mutex,
    },
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    engine::BusEngine,
    health::{lock_bounded, Health, LoopId},
    queues,
};

const RELAY_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Relay requests and relay state for callers outside the actuation loop.
#[derive(Clone)]
pub struct ActuationHandle {
    control: Sender<TaskMessage>,
    relays: Arc<Mutex<RelayBank>>,
    health: Arc<Health>,
}

impl ActuationHandle {
    pub fn new(
        control: Sender<TaskMessage>,
        relays: Arc<Mutex<RelayBank>>,
        health: Arc<Health>,
    ) -> Self {
        Self {
            control,
            relays,
            health,
        }
    }

    /// Queues a relay change. Unknown relays are rejected here, before they reach the loop.
    pub async fn submit_relay_request(&self, relay: u8, state: bool) -> Result<(), SubmitError> {
        let relay = RelayId::new(relay)?;
        queues::submit(&self.control, TaskMessage::RelayChangeRequest { relay, state }).await
    }

    pub async fn relay_state(&self, relay: RelayId) -> Option<RelayState> {
        self.relay_states().await.map(|states| states[relay.index()])
    }

    pub async fn relay_states(&self) -> Option<[RelayState; RELAY_COUNT]> {
        lock_bounded(&self.relays, RELAY_READ_TIMEOUT, &self.health, "relay_states")
            .await
            .map(|bank| bank.states())
    }
}

/// Fixed-period loop that applies relay requests and keeps the display current.
pub struct ActuationCoordinator {
    relays: Arc<Mutex<RelayBank>>,
    outputs: Box<dyn RelayOutputs>,
    display: Box<dyn DisplaySink>,
    selector: DisplaySelector,
    engine: Arc<BusEngine>,
    prefs: Preferences,
    control: Receiver<TaskMessage>,
    publish: Sender<TaskMessage>,
    topics: Topics,
    config: ActuationConfig,
    clock: Clock,
    health: Arc<Health>,
}

impl ActuationCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        relays: Arc<Mutex<RelayBank>>,
        outputs: Box<dyn RelayOutputs>,
        display: Box<dyn DisplaySink>,
        engine: Arc<BusEngine>,
        prefs: Preferences,
        control: Receiver<TaskMessage>,
        publish: Sender<TaskMessage>,
        topics: Topics,
        config: ActuationConfig,
        clock: Clock,
        health: Arc<Health>,
    ) -> Self {
        Self {
            relays,
            outputs,
            display,
            selector: DisplaySelector::new(config.publish_delta_c, config.grace_window_ms),
            engine,
            prefs,
            control,
            publish,
            topics,
            config,
            clock,
            health,
        }
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("actuation loop started");
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&mut self) {
        let now_ms = self.clock.now_ms();
        self.health.beat(LoopId::Actuation, now_ms);

        self.drain_control().await;
        self.reconcile_relays(now_ms).await;
        self.refresh_display(now_ms).await;
    }

    async fn drain_control(&mut self) {
        loop {
            let message = match self.control.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
            };

            match message {
                TaskMessage::RelayChangeRequest { relay, state } => {
                    let timeout = Duration::from_millis(self.config.lock_timeout_ms);
                    match lock_bounded(&self.relays, timeout, &self.health, "relay request").await
                    {
                        Some(mut bank) => {
                            debug!("relay {} requested {}", relay.value(), relay_payload(state));
                            bank.request(relay, state);
                        }
                        None => warn!("relay {} request dropped", relay.value()),
                    }
                }
                TaskMessage::TemperatureUpdate {
                    sensor_index,
                    value,
                } => {
                    let Some(sensors) = self.engine.sensor_list().await else {
                        continue;
                    };
                    let Some(record) = sensors.get(sensor_index) else {
                        debug!("temperature update for unknown sensor index {sensor_index}");
                        continue;
                    };
                    if let Some(update) = self.selector.accept_update(record.address, value) {
                        self.apply_display(update).await;
                    }
                }
                other => warn!("actuation loop dropping unexpected {}", other.kind()),
            }
        }
    }

    async fn reconcile_relays(&mut self, now_ms: u64) {
        let timeout = Duration::from_millis(self.config.lock_timeout_ms);
        let transitions = {
            let Some(mut bank) =
                lock_bounded(&self.relays, timeout, &self.health, "relay reconcile").await
            else {
                return;
            };
            bank.reconcile(self.outputs.as_mut(), now_ms)
        };

        for transition in transitions {
            info!(
                "relay {} switched {} at {} ms",
                transition.relay.value(),
                relay_payload(transition.on),
                transition.at_ms
            );
            queues::offer(
                &self.publish,
                TaskMessage::publish(
                    self.topics.relay_state(transition.relay),
                    relay_payload(transition.on),
                ),
                &self.health,
            );
        }
    }

    async fn refresh_display(&mut self, now_ms: u64) {
        let selected = match self.prefs.display_sensor() {
            Ok(address) => address,
            Err(err) => {
                warn!("display sensor preference unreadable: {err}");
                self.selector.current()
            }
        };
        let Some(sensors) = self.engine.sensor_list().await else {
            return;
        };

        let update = self.selector.evaluate(selected, &sensors, now_ms);
        self.apply_display(update).await;
    }

    async fn apply_display(&mut self, update: DisplayUpdate) {
        if let Some(address) = update.persist_selection {
            match self.prefs.set_display_sensor(address) {
                Ok(()) => info!("display sensor auto-selected: {address}"),
                Err(err) => warn!("could not save display selection: {err}"),
            }
        }

        if update.selection_changed {
            self.display.show_message(CHANGE_INDICATOR);
            tokio::time::sleep(Duration::from_millis(self.config.change_indicator_ms)).await;
        }
        update.view.render(self.display.as_mut());

        if let Some(payload) = update.publish {
            queues::offer(
                &self.publish,
                TaskMessage::publish(self.topics.aux_display(), payload),
                &self.health,
            );
        }
    }
}
