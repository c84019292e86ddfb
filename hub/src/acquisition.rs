use std::{sync::Arc, time::Duration};

use sensorhub_common::{
    config::AcquisitionConfig, AcquisitionSchedule, AcquisitionStep, Preferences, SubmitError,
    TaskMessage,
};
use tokio::{
    sync::mpsc::{error::TryRecvError, Receiver, Sender},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    engine::BusEngine,
    health::{Health, LoopId},
    queues,
};

/// Producer side of the acquisition command queue.
#[derive(Clone)]
pub struct AcquisitionHandle {
    commands: Sender<TaskMessage>,
}

impl AcquisitionHandle {
    pub fn new(commands: Sender<TaskMessage>) -> Self {
        Self { commands }
    }

    pub async fn submit_scan_request(&self) -> Result<(), SubmitError> {
        queues::submit(&self.commands, TaskMessage::SensorScanRequest).await
    }

    pub async fn submit_read_request(&self) -> Result<(), SubmitError> {
        queues::submit(&self.commands, TaskMessage::TemperatureReadRequest).await
    }
}

/// Fixed-period loop that drives the bus: commands, conversions and periodic scans.
pub struct AcquisitionScheduler {
    engine: Arc<BusEngine>,
    prefs: Preferences,
    commands: Receiver<TaskMessage>,
    control: Sender<TaskMessage>,
    schedule: AcquisitionSchedule,
    config: AcquisitionConfig,
    clock: Clock,
    health: Arc<Health>,
}

impl AcquisitionScheduler {
    pub fn new(
        engine: Arc<BusEngine>,
        prefs: Preferences,
        commands: Receiver<TaskMessage>,
        control: Sender<TaskMessage>,
        config: AcquisitionConfig,
        clock: Clock,
        health: Arc<Health>,
    ) -> Self {
        Self {
            engine,
            prefs,
            commands,
            control,
            schedule: AcquisitionSchedule::new(config.read_interval_ms, config.scan_interval_ms),
            config,
            clock,
            health,
        }
    }

    pub async fn run(mut self) {
        self.health.beat(LoopId::Acquisition, self.clock.now_ms());
        self.refresh_scan_interval();
        if !self.engine.scan().await {
            warn!("initial scan found no sensors");
        }
        self.schedule.mark_scanned(self.clock.now_ms());

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("acquisition loop started");
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&mut self) {
        let now_ms = self.clock.now_ms();
        self.health.beat(LoopId::Acquisition, now_ms);
        self.refresh_scan_interval();

        self.drain_commands().await;

        let Some(state) = self.engine.bus_state().await else {
            return;
        };
        match self.schedule.read_step(now_ms, state.is_converting()) {
            Some(AcquisitionStep::StartConversion) => {
                self.engine.start_conversion().await;
            }
            Some(AcquisitionStep::Collect) => {
                if self.engine.collect().await {
                    self.schedule.mark_collected(now_ms);
                }
                self.forward_display_reading().await;
            }
            None => {}
        }

        let Some(state) = self.engine.bus_state().await else {
            return;
        };
        let auto_scan = self.prefs.auto_scan().unwrap_or_else(|err| {
            warn!("auto-scan preference unreadable: {err}");
            true
        });
        if self.schedule.scan_due(now_ms, state.is_idle(), auto_scan) {
            self.engine.scan().await;
            self.schedule.mark_scanned(now_ms);
        }
    }

    async fn drain_commands(&mut self) {
        loop {
            let message = match self.commands.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
            };

            match message {
                TaskMessage::SensorScanRequest => {
                    debug!("scan requested");
                    if self.engine.scan().await {
                        self.schedule.mark_scanned(self.clock.now_ms());
                    }
                }
                TaskMessage::TemperatureReadRequest => {
                    debug!("temperature read requested");
                    if !self.engine.start_conversion().await {
                        warn!("read request dropped: bus busy");
                    }
                }
                other => warn!("acquisition loop dropping unexpected {}", other.kind()),
            }
        }
    }

    fn refresh_scan_interval(&mut self) {
        let interval_ms = match self.prefs.scan_interval_secs() {
            Ok(Some(secs)) => u64::from(secs) * 1_000,
            Ok(None) => self.config.scan_interval_ms,
            Err(err) => {
                warn!("scan interval preference unreadable: {err}");
                self.config.scan_interval_ms
            }
        };
        if interval_ms != self.schedule.scan_interval_ms() {
            info!("scan interval set to {} s", interval_ms / 1_000);
            self.schedule.set_scan_interval_ms(interval_ms);
        }
    }

    async fn forward_display_reading(&self) {
        let Ok(selected) = self.prefs.display_sensor() else {
            return;
        };
        if selected.is_unset() {
            return;
        }
        let Some(sensors) = self.engine.sensor_list().await else {
            return;
        };
        let Some((sensor_index, record)) = sensors
            .iter()
            .enumerate()
            .find(|(_, record)| record.address == selected && record.valid)
        else {
            return;
        };
        queues::offer(
            &self.control,
            TaskMessage::TemperatureUpdate {
                sensor_index,
                value: record.temperature,
            },
            &self.health,
        );
    }
}
