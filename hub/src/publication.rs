use std::{sync::Arc, time::Duration};

use sensorhub_common::{
    config::PublicationConfig,
    plan_cycle,
    topics::{display_payload, relay_payload, sensor_state_payload},
    IntervalTimer, LinkState, LinkSupervisor, Pacing, Preferences, PublishStep, PublishTransport,
    ReconnectBackoff, RelayBank, RelayId, RetryPolicy, SensorRecord, TaskMessage, Topics,
};
use tokio::{
    sync::{
        mpsc::{error::TryRecvError, Receiver},
        watch, Mutex,
    },
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    engine::BusEngine,
    health::{lock_bounded, Health, LoopId},
};

/// Fixed-period loop that owns the broker link and everything sent over it.
pub struct PublicationPump<T> {
    transport: T,
    link: LinkSupervisor,
    link_state: watch::Sender<LinkState>,
    retry: RetryPolicy,
    cycle: IntervalTimer,
    broker_configured: bool,
    engine: Arc<BusEngine>,
    relays: Arc<Mutex<RelayBank>>,
    prefs: Preferences,
    publish: Receiver<TaskMessage>,
    topics: Topics,
    config: PublicationConfig,
    clock: Clock,
    health: Arc<Health>,
}

impl<T: PublishTransport> PublicationPump<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: T,
        broker_configured: bool,
        engine: Arc<BusEngine>,
        relays: Arc<Mutex<RelayBank>>,
        prefs: Preferences,
        publish: Receiver<TaskMessage>,
        topics: Topics,
        config: PublicationConfig,
        clock: Clock,
        health: Arc<Health>,
    ) -> Self {
        let backoff = ReconnectBackoff::new(
            config.initial_reconnect_delay_ms,
            config.max_reconnect_delay_ms,
        );
        let (link_state, _) = watch::channel(LinkState::Disconnected);
        let mut cycle = IntervalTimer::new(config.cycle_ms);
        cycle.reset(clock.now_ms());

        Self {
            transport,
            link: LinkSupervisor::new(config.reconnect_interval_ms, backoff),
            link_state,
            retry: RetryPolicy::new(config.publish_attempts, config.retry_base_ms),
            cycle,
            broker_configured,
            engine,
            relays,
            prefs,
            publish,
            topics,
            config,
            clock,
            health,
        }
    }

    /// Receiver that always holds the current link state.
    pub fn link_state(&self) -> watch::Receiver<LinkState> {
        self.link_state.subscribe()
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("publication loop started");
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&mut self) {
        let now_ms = self.clock.now_ms();
        self.health.beat(LoopId::Publication, now_ms);

        if !self.broker_configured {
            self.drain_queue().await;
            if self.cycle.is_due(now_ms) {
                self.cycle.reset(now_ms);
                debug!("no broker configured, skipping publication cycle");
            }
            return;
        }

        self.maintain_link(now_ms).await;
        self.drain_queue().await;

        if self.cycle.is_due(now_ms) {
            self.cycle.reset(now_ms);
            if self.link.is_connected() {
                self.run_cycle().await;
            } else {
                warn!(
                    "broker link {}, skipping publication cycle",
                    self.link.state().as_str().to_ascii_lowercase()
                );
            }
        }
    }

    fn set_link_state(&self) {
        self.link_state.send_replace(self.link.state());
    }

    async fn maintain_link(&mut self, now_ms: u64) {
        if self.link.observe(self.transport.connected()) {
            warn!("broker link lost");
        }
        self.set_link_state();

        if !self.link.should_attempt(now_ms) {
            return;
        }

        self.link.begin_attempt(now_ms);
        self.set_link_state();
        self.health.record_reconnect();
        debug!("broker connection attempt {}", self.link.total_attempts());

        if self.transport.connect().await {
            self.link.connected();
            info!("broker link up");
        } else {
            self.link.attempt_failed();
            let retry_in = self
                .link
                .next_attempt_ms()
                .map(|next| next.saturating_sub(now_ms))
                .unwrap_or(0);
            warn!("broker connection failed, next attempt in {retry_in} ms");
        }
        self.set_link_state();
    }

    async fn drain_queue(&mut self) {
        loop {
            let message = match self.publish.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
            };

            match message {
                TaskMessage::MqttPublish { topic, payload } => {
                    if self.link.is_connected() {
                        self.publish_with_retry(&topic, &payload).await;
                    } else if self.broker_configured {
                        self.health.record_dropped();
                        debug!("link down, dropping publish to {topic}");
                    } else {
                        debug!("no broker configured, discarding publish to {topic}");
                    }
                }
                other => warn!("publication loop dropping unexpected {}", other.kind()),
            }
        }
    }

    /// Sends one retained message, backing off between attempts.
    async fn publish_with_retry(&mut self, topic: &str, payload: &str) -> bool {
        for attempt in 0..self.retry.attempts {
            let delay = self.retry.delay_before_ms(attempt);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.transport.publish(topic, payload, true).await {
                return true;
            }
            debug!("publish to {topic} failed (attempt {})", attempt + 1);
        }
        warn!(
            "publish to {topic} failed after {} attempts",
            self.retry.attempts
        );
        false
    }

    async fn run_cycle(&mut self) {
        let Some(sensors) = self.engine.sensor_list().await else {
            warn!("sensor list unavailable, skipping publication cycle");
            return;
        };
        let display = self.display_record(&sensors);
        let pacing = Pacing {
            batch_size: self.config.batch_size,
            sensor_delay_ms: self.config.sensor_delay_ms,
            batch_delay_ms: self.config.batch_delay_ms,
        };

        for step in plan_cycle(sensors.len(), pacing, display.is_some()) {
            match step {
                PublishStep::Display => {
                    if let Some(record) = display {
                        let topic = self.topics.aux_display();
                        self.publish_with_retry(&topic, &display_payload(record.temperature))
                            .await;
                    }
                }
                PublishStep::Sensor(index) => {
                    if !self.transport.connected() {
                        self.link.observe(false);
                        self.set_link_state();
                        warn!(
                            "broker link lost mid-cycle, abandoning {} sensors",
                            sensors.len() - index
                        );
                        return;
                    }
                    let record = &sensors[index];
                    let topic = self.topics.sensor_state(&record.address);
                    self.publish_with_retry(&topic, &sensor_state_payload(record))
                        .await;
                }
                PublishStep::RelayStates => self.publish_relays().await,
                PublishStep::Pause(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            }
        }
    }

    fn display_record<'a>(&self, sensors: &'a [SensorRecord]) -> Option<&'a SensorRecord> {
        let selected = self.prefs.display_sensor().ok()?;
        sensors
            .iter()
            .find(|record| record.address == selected && record.valid)
    }

    async fn publish_relays(&mut self) {
        let timeout = Duration::from_millis(self.config.lock_timeout_ms);
        let Some(states) = lock_bounded(&self.relays, timeout, &self.health, "relay publish")
            .await
            .map(|bank| bank.states())
        else {
            return;
        };

        for relay in RelayId::all() {
            let topic = self.topics.relay_state(relay);
            let payload = relay_payload(states[relay.index()].actual);
            self.publish_with_retry(&topic, payload).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use sensorhub_common::DeviceAddress;
    use tokio::{sync::mpsc, time::Instant};

    use super::*;
    use crate::engine::tests::{addr, engine_with, ScriptedBus};

    #[derive(Default)]
    struct TransportState {
        up: bool,
        refuse_connect: bool,
        failures_left: usize,
        drop_after: Option<usize>,
        connects: Vec<u64>,
        sent: Vec<(u64, String, String)>,
    }

    #[derive(Clone)]
    struct FakeTransport {
        state: Arc<StdMutex<TransportState>>,
        started: Instant,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                state: Arc::new(StdMutex::new(TransportState::default())),
                started: Instant::now(),
            }
        }

        fn elapsed_ms(&self) -> u64 {
            self.started.elapsed().as_millis() as u64
        }

        fn sent(&self) -> Vec<(u64, String, String)> {
            self.state.lock().unwrap().sent.clone()
        }
    }

    impl PublishTransport for FakeTransport {
        fn connected(&self) -> bool {
            self.state.lock().unwrap().up
        }

        async fn connect(&mut self) -> bool {
            let now = self.elapsed_ms();
            let mut state = self.state.lock().unwrap();
            state.connects.push(now);
            state.up = !state.refuse_connect;
            state.up
        }

        async fn publish(&mut self, topic: &str, payload: &str, _retained: bool) -> bool {
            let now = self.elapsed_ms();
            let mut state = self.state.lock().unwrap();
            if !state.up {
                return false;
            }
            if state.failures_left > 0 {
                state.failures_left -= 1;
                return false;
            }
            state.sent.push((now, topic.to_string(), payload.to_string()));
            if state.drop_after == Some(state.sent.len()) {
                state.up = false;
            }
            true
        }
    }

    struct Harness {
        pump: PublicationPump<FakeTransport>,
        transport: FakeTransport,
        queue: mpsc::Sender<TaskMessage>,
        prefs: Preferences,
    }

    async fn harness(sensor_count: u8, broker_configured: bool) -> Harness {
        let addresses: Vec<DeviceAddress> = (1..=sensor_count).map(addr).collect();
        let bus = ScriptedBus::with_devices(&addresses);
        for address in &addresses {
            bus.set_reading(*address, Ok(20.5));
        }
        let clock = Clock::start();
        let engine = engine_with(&bus, clock);
        if sensor_count > 0 {
            engine.scan().await;
            engine.start_conversion().await;
            engine.collect().await;
        }

        let transport = FakeTransport::new();
        let prefs = Preferences::in_memory();
        let (queue, rx) = mpsc::channel(crate::queues::PUBLISH_QUEUE_DEPTH);
        let pump = PublicationPump::new(
            transport.clone(),
            broker_configured,
            engine,
            Arc::new(Mutex::new(RelayBank::new())),
            prefs.clone(),
            rx,
            Topics::default(),
            PublicationConfig::default(),
            Clock::start(),
            Arc::new(Health::new()),
        );
        Harness {
            pump,
            transport,
            queue,
            prefs,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ten_sensors_are_paced_in_batches() {
        let mut h = harness(10, true).await;
        h.prefs.set_display_sensor(addr(3)).unwrap();
        h.pump.tick().await;
        assert!(h.pump.link.is_connected());

        tokio::time::advance(Duration::from_millis(5_000)).await;
        let cycle_start = h.transport.elapsed_ms();
        h.pump.tick().await;

        let sent = h.transport.sent();
        let times: Vec<u64> = sent.iter().map(|(at, _, _)| at - cycle_start).collect();
        let topics: Vec<&str> = sent.iter().map(|(_, topic, _)| topic.as_str()).collect();

        assert_eq!(topics[0], "Chaoticvolt/SensorHUB/mqtt_aux_display");
        assert_eq!(sent[0].2, "20.5");
        assert!(topics[1].starts_with("Chaoticvolt/sensors/"));
        assert_eq!(topics[5], "Chaoticvolt/SensorHUB/relay1/state");
        assert_eq!(topics[6], "Chaoticvolt/SensorHUB/relay2/state");
        assert_eq!(sent.len(), 1 + 10 + 2);

        // display, batch 1 at 0/100/200/300, relays, batch 2 after 500 ms, batch 3 after 500 ms
        assert_eq!(
            times,
            vec![0, 0, 100, 200, 300, 300, 300, 800, 900, 1_000, 1_100, 1_600, 1_700]
        );
        assert_eq!(sent[1].2, r#"{"t":20.50,"ts":100,"s":"1"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn link_drop_abandons_rest_of_cycle() {
        let mut h = harness(10, true).await;
        h.pump.tick().await;
        h.transport.state.lock().unwrap().drop_after = Some(3);

        tokio::time::advance(Duration::from_millis(5_000)).await;
        h.pump.tick().await;

        assert_eq!(h.transport.sent().len(), 3);
        assert_eq!(h.pump.link.state(), LinkState::Disconnected);
        assert_eq!(*h.pump.link_state().borrow(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_attempts_back_off() {
        let mut h = harness(0, true).await;
        h.transport.state.lock().unwrap().refuse_connect = true;

        for _ in 0..700 {
            h.pump.tick().await;
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        let connects = h.transport.state.lock().unwrap().connects.clone();
        let gaps: Vec<u64> = connects.windows(2).map(|pair| pair[1] - pair[0]).collect();
        assert_eq!(gaps, vec![5_000, 5_000, 8_000, 16_000, 32_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_messages_retry_then_send() {
        let mut h = harness(0, true).await;
        h.pump.tick().await;
        h.transport.state.lock().unwrap().failures_left = 2;

        h.queue
            .send(TaskMessage::publish("Chaoticvolt/SensorHUB/relay1/state", "ON"))
            .await
            .unwrap();
        let before = h.transport.elapsed_ms();
        h.pump.tick().await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0 - before, 400 + 800);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_messages_dropped_while_disconnected() {
        let mut h = harness(0, true).await;
        h.transport.state.lock().unwrap().refuse_connect = true;
        h.queue
            .send(TaskMessage::publish("Chaoticvolt/SensorHUB/relay1/state", "ON"))
            .await
            .unwrap();

        h.pump.tick().await;
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.pump.health.snapshot().dropped_messages, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfigured_broker_never_connects() {
        let mut h = harness(2, false).await;
        for _ in 0..100 {
            h.pump.tick().await;
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        h.queue
            .send(TaskMessage::publish("Chaoticvolt/SensorHUB/relay1/state", "ON"))
            .await
            .unwrap();
        h.pump.tick().await;

        assert!(h.transport.state.lock().unwrap().connects.is_empty());
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.pump.health.snapshot().dropped_messages, 0);
    }
}
