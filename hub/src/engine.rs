use std::{sync::Arc, time::Duration};

use sensorhub_common::{
    config::AcquisitionConfig, usable_reading, BusState, DeviceAddress, OneWireBus, SensorRecord,
    SensorRegistry,
};
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    health::{lock_bounded, lock_bounded_owned, Health},
};

type BusGuard = OwnedMutexGuard<Box<dyn OneWireBus>>;

/// Owns the shared 1-Wire bus and the sensor registry.
///
/// The registry carries the bus state, so every operation starts by claiming the bus
/// under the registry lock and always hands it back before returning.
pub struct BusEngine {
    bus: Arc<Mutex<Box<dyn OneWireBus>>>,
    registry: Mutex<SensorRegistry>,
    config: AcquisitionConfig,
    clock: Clock,
    health: Arc<Health>,
}

impl BusEngine {
    pub fn new(
        bus: Box<dyn OneWireBus>,
        config: AcquisitionConfig,
        clock: Clock,
        health: Arc<Health>,
    ) -> Self {
        Self {
            bus: Arc::new(Mutex::new(bus)),
            registry: Mutex::new(SensorRegistry::new(config.error_threshold)),
            config,
            clock,
            health,
        }
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.config.lock_timeout_ms)
    }

    async fn registry(&self, operation: &str) -> Option<MutexGuard<'_, SensorRegistry>> {
        lock_bounded(&self.registry, self.lock_timeout(), &self.health, operation).await
    }

    async fn bus(&self, operation: &str) -> Option<BusGuard> {
        lock_bounded_owned(&self.bus, self.lock_timeout(), &self.health, operation).await
    }

    /// Current bus state, or `None` if the registry lock could not be taken in time.
    pub async fn bus_state(&self) -> Option<BusState> {
        self.registry("bus_state").await.map(|registry| registry.state())
    }

    pub async fn last_scan_ms(&self) -> Option<u64> {
        self.registry("last_scan_ms")
            .await
            .and_then(|registry| registry.last_scan_ms())
    }

    /// Owned copy of the sensor list, or `None` on lock timeout.
    pub async fn sensor_list(&self) -> Option<Vec<SensorRecord>> {
        self.registry("sensor_list")
            .await
            .map(|registry| registry.snapshot())
    }

    /// Enumerates the bus and merges what it finds into the registry.
    ///
    /// Returns false if the bus was busy or every attempt came up empty.
    pub async fn scan(&self) -> bool {
        {
            let Some(mut registry) = self.registry("scan").await else {
                return false;
            };
            if let Err(err) = registry.begin_scan() {
                warn!("scan skipped: {err}");
                return false;
            }
        }

        let candidates = self.enumerate().await;

        let mut registry = self.registry.lock().await;
        if candidates.is_empty() {
            registry.abort_scan();
            warn!(
                "scan found no valid devices after {} attempts",
                self.config.scan_attempts
            );
            return false;
        }

        match registry.finish_scan(&candidates, self.clock.now_ms()) {
            Ok(report) => {
                info!(
                    "scan found {} sensors ({} new, {} kept, {} gone)",
                    registry.len(),
                    report.added,
                    report.retained,
                    report.dropped
                );
                true
            }
            Err(err) => {
                error!("scan could not be applied: {err}");
                false
            }
        }
    }

    async fn enumerate(&self) -> Vec<DeviceAddress> {
        let Some(mut bus) = self.bus("scan").await else {
            return Vec::new();
        };
        let max_sensors = self.config.max_sensors;

        for attempt in 1..=self.config.scan_attempts {
            if attempt > 1 {
                tokio::time::sleep(Duration::from_millis(self.config.scan_retry_delay_ms)).await;
            }

            let Some((returned, reset)) = on_blocking_pool(bus, |bus| bus.reset()).await else {
                return Vec::new();
            };
            bus = returned;
            if let Err(err) = reset {
                warn!("scan attempt {attempt}: bus reset failed: {err}");
                continue;
            }
            tokio::time::sleep(Duration::from_millis(self.config.bus_settle_ms)).await;

            let listing =
                on_blocking_pool(bus, move |bus| read_addresses(bus, attempt, max_sensors));
            let Some((returned, found)) = listing.await else {
                return Vec::new();
            };
            bus = returned;

            if !found.is_empty() {
                return found;
            }
        }

        Vec::new()
    }

    /// Broadcasts a conversion request. Returns false if nothing was started.
    pub async fn start_conversion(&self) -> bool {
        {
            let Some(mut registry) = self.registry("start_conversion").await else {
                return false;
            };
            if let Err(err) = registry.begin_conversion(self.clock.now_ms()) {
                debug!("conversion not started: {err}");
                return false;
            }
        }

        let requested = match self.bus("start_conversion").await {
            Some(bus) => match on_blocking_pool(bus, |bus| bus.request_temperatures()).await {
                Some((_, Ok(()))) => true,
                Some((_, Err(err))) => {
                    warn!("conversion request failed: {err}");
                    false
                }
                None => false,
            },
            None => false,
        };

        if !requested {
            self.registry.lock().await.cancel_conversion();
        }
        requested
    }

    /// Reads every tracked sensor after a conversion. True iff all of them read cleanly.
    pub async fn collect(&self) -> bool {
        let addresses = {
            let Some(registry) = self.registry("collect").await else {
                return false;
            };
            if !registry.state().is_converting() {
                debug!("collect without a conversion in progress");
                return false;
            }
            registry.addresses()
        };

        let readings = match self.bus("collect").await {
            Some(bus) => on_blocking_pool(bus, move |bus| {
                addresses
                    .iter()
                    .map(|address| (*address, usable_reading(bus.read_temperature(address))))
                    .collect::<Vec<_>>()
            })
            .await
            .map(|(_, readings)| readings),
            None => None,
        };
        let Some(readings) = readings else {
            self.registry.lock().await.cancel_conversion();
            return false;
        };

        let mut registry = self.registry.lock().await;
        match registry.complete_conversion(&readings, self.clock.now_ms()) {
            Ok(report) => {
                self.health.add_bus_read_failures(report.failures.len() as u64);
                for failure in &report.failures {
                    if failure.invalidated {
                        warn!(
                            "sensor {} marked invalid after {} failed reads",
                            failure.address, failure.consecutive_errors
                        );
                    } else {
                        debug!(
                            "sensor {} read failed ({} in a row)",
                            failure.address, failure.consecutive_errors
                        );
                    }
                }
                report.all_ok()
            }
            Err(err) => {
                error!("collect could not be applied: {err}");
                false
            }
        }
    }
}

/// Runs bus I/O on the blocking pool, handing the guard back with the result.
async fn on_blocking_pool<R, F>(mut bus: BusGuard, work: F) -> Option<(BusGuard, R)>
where
    R: Send + 'static,
    F: FnOnce(&mut dyn OneWireBus) -> R + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let result = work(&mut **bus);
        (bus, result)
    });
    match task.await {
        Ok(done) => Some(done),
        Err(err) => {
            error!("bus task failed: {err}");
            None
        }
    }
}

fn read_addresses(bus: &mut dyn OneWireBus, attempt: u8, max_sensors: usize) -> Vec<DeviceAddress> {
    let count = bus.device_count();
    if count == 0 {
        debug!("scan attempt {attempt}: no devices");
        return Vec::new();
    }
    if count > max_sensors {
        warn!("bus reports {count} devices, tracking the first {max_sensors}");
    }

    let mut found = Vec::new();
    for index in 0..count.min(max_sensors) {
        match bus.address(index) {
            Some(address) if address.is_valid() => found.push(address),
            Some(address) => warn!("ignoring device {address} with bad CRC"),
            None => debug!("scan attempt {attempt}: no address at index {index}"),
        }
    }
    if found.is_empty() {
        debug!("scan attempt {attempt}: no valid addresses");
    }
    found
}
