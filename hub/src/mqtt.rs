use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, QoS};
use sensorhub_common::{
    config::NetworkConfig,
    topics::{parse_relay_command, STATUS_OFFLINE, STATUS_ONLINE},
    PublishTransport, Topics,
};
use tokio::sync::{
    mpsc::{self, Receiver, Sender},
    Notify,
};
use tracing::{debug, info, warn};

use crate::{acquisition::AcquisitionHandle, actuation::ActuationHandle};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Routes inbound command topics to the loop that owns them.
#[derive(Clone)]
pub struct CommandRouter {
    topics: Topics,
    acquisition: AcquisitionHandle,
    actuation: ActuationHandle,
}

impl CommandRouter {
    pub fn new(topics: Topics, acquisition: AcquisitionHandle, actuation: ActuationHandle) -> Self {
        Self {
            topics,
            acquisition,
            actuation,
        }
    }

    pub async fn route(&self, topic: &str, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);

        if let Some(relay) = self.topics.relay_for_set_topic(topic) {
            let Some(state) = parse_relay_command(&text) else {
                warn!("ignoring relay command {text:?} on {topic}");
                return;
            };
            match self
                .actuation
                .submit_relay_request(relay.value(), state)
                .await
            {
                Ok(()) => debug!("relay {} -> {} from mqtt", relay.value(), state),
                Err(err) => warn!("relay command on {topic} not queued: {err}"),
            }
            return;
        }

        if topic == self.topics.scan() {
            if let Err(err) = self.acquisition.submit_scan_request().await {
                warn!("scan command not queued: {err}");
            }
            return;
        }

        debug!("ignoring message on {topic}");
    }
}

/// Broker link backed by a rumqttc client.
///
/// The event loop only dials when `connect` asks it to; after an error it parks until
/// the next request, so reconnect pacing stays with the caller.
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    wake: Arc<Notify>,
    outcomes: Receiver<bool>,
}

impl MqttTransport {
    pub fn start(network: &NetworkConfig, topics: Topics, router: CommandRouter) -> Self {
        let mut options = MqttOptions::new(
            network.client_id.clone(),
            network.mqtt_host.clone(),
            network.mqtt_port,
        );
        options.set_keep_alive(KEEP_ALIVE);
        options.set_last_will(LastWill::new(
            topics.status(),
            STATUS_OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));
        if !network.mqtt_user.is_empty() {
            options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let connected = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let (outcomes_tx, outcomes) = mpsc::channel(1);

        spawn_event_loop(
            eventloop,
            client.clone(),
            connected.clone(),
            wake.clone(),
            outcomes_tx,
            topics,
            router,
        );

        Self {
            client,
            connected,
            wake,
            outcomes,
        }
    }
}

impl PublishTransport for MqttTransport {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn connect(&mut self) -> bool {
        while self.outcomes.try_recv().is_ok() {}
        self.wake.notify_one();

        match tokio::time::timeout(CONNECT_TIMEOUT, self.outcomes.recv()).await {
            Ok(Some(up)) => up,
            Ok(None) => false,
            Err(_) => {
                warn!(
                    "no answer from broker within {} s",
                    CONNECT_TIMEOUT.as_secs()
                );
                false
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: &str, retained: bool) -> bool {
        if !self.connected() {
            return false;
        }
        match self
            .client
            .publish(topic, QoS::AtLeastOnce, retained, payload.as_bytes().to_vec())
            .await
        {
            Ok(()) => true,
            Err(err) => {
                debug!("publish to {topic} rejected: {err}");
                false
            }
        }
    }
}

fn spawn_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    wake: Arc<Notify>,
    outcomes: Sender<bool>,
    topics: Topics,
    router: CommandRouter,
) {
    tokio::spawn(async move {
        loop {
            wake.notified().await;

            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::Publish(message))) => {
                        router.route(&message.topic, &message.payload).await;
                    }
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        connected.store(true, Ordering::Relaxed);
                        announce(&client, &topics);
                        info!("mqtt connected");
                        let _ = outcomes.try_send(true);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        if connected.swap(false, Ordering::Relaxed) {
                            warn!("mqtt connection lost: {err}");
                        } else {
                            warn!("mqtt connect failed: {err}");
                        }
                        let _ = outcomes.try_send(false);
                        break;
                    }
                }
            }
        }
    });
}

fn announce(client: &AsyncClient, topics: &Topics) {
    for topic in topics.command_topics() {
        if let Err(err) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
            warn!("subscribe to {topic} failed: {err}");
        }
    }
    if let Err(err) = client.try_publish(topics.status(), QoS::AtLeastOnce, true, STATUS_ONLINE) {
        warn!("status publish failed: {err}");
    }
}
