use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::bail;
use sensorhub_common::HealthSnapshot;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};
use tracing::{error, info};

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopId {
    Acquisition,
    Actuation,
    Publication,
}

impl LoopId {
    const ALL: [LoopId; 3] = [Self::Acquisition, Self::Actuation, Self::Publication];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Acquisition => "acquisition",
            Self::Actuation => "actuation",
            Self::Publication => "publication",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Acquisition => 0,
            Self::Actuation => 1,
            Self::Publication => 2,
        }
    }
}

/// Shared counters and loop heartbeats.
#[derive(Debug, Default)]
pub struct Health {
    bus_read_failures: AtomicU64,
    mqtt_reconnects: AtomicU64,
    dropped_messages: AtomicU64,
    lock_timeouts: AtomicU64,
    heartbeats: [AtomicU64; 3],
}

impl Health {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beat(&self, id: LoopId, now_ms: u64) {
        self.heartbeats[id.index()].store(now_ms, Ordering::Relaxed);
    }

    pub fn last_beat_ms(&self, id: LoopId) -> u64 {
        self.heartbeats[id.index()].load(Ordering::Relaxed)
    }

    pub fn add_bus_read_failures(&self, count: u64) {
        self.bus_read_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            bus_read_failures: self.bus_read_failures.load(Ordering::Relaxed),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
        }
    }

    /// First loop whose heartbeat is older than `timeout_ms`.
    pub fn stalled(&self, now_ms: u64, timeout_ms: u64) -> Option<LoopId> {
        LoopId::ALL
            .into_iter()
            .find(|id| now_ms.saturating_sub(self.last_beat_ms(*id)) > timeout_ms)
    }
}

/// Waits at most `timeout` for `mutex`; a timeout is logged and counted.
pub async fn lock_bounded<'a, T>(
    mutex: &'a Mutex<T>,
    timeout: Duration,
    health: &Health,
    what: &str,
) -> Option<MutexGuard<'a, T>> {
    match tokio::time::timeout(timeout, mutex.lock()).await {
        Ok(guard) => Some(guard),
        Err(_) => {
            health.record_lock_timeout();
            error!("{what}: lock not acquired within {} ms", timeout.as_millis());
            None
        }
    }
}

/// Owned-guard flavour of [`lock_bounded`] for holders that move across tasks.
pub async fn lock_bounded_owned<T>(
    mutex: &Arc<Mutex<T>>,
    timeout: Duration,
    health: &Health,
    what: &str,
) -> Option<OwnedMutexGuard<T>> {
    match tokio::time::timeout(timeout, mutex.clone().lock_owned()).await {
        Ok(guard) => Some(guard),
        Err(_) => {
            health.record_lock_timeout();
            error!("{what}: lock not acquired within {} ms", timeout.as_millis());
            None
        }
    }
}

/// Checks heartbeats once a second and fails when a loop stops advancing.
pub async fn watchdog(health: &Health, clock: Clock, timeout_ms: u64) -> anyhow::Result<()> {
    info!("watchdog armed ({timeout_ms} ms)");
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        let now_ms = clock.now_ms();
        if let Some(id) = health.stalled(now_ms, timeout_ms) {
            let silent_ms = now_ms.saturating_sub(health.last_beat_ms(id));
            error!("{} loop stalled for {silent_ms} ms", id.as_str());
            bail!("{} loop stalled for {silent_ms} ms", id.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_snapshot() {
        let health = Health::new();
        health.add_bus_read_failures(2);
        health.record_dropped();
        health.record_lock_timeout();
        health.record_reconnect();

        assert_eq!(
            health.snapshot(),
            HealthSnapshot {
                bus_read_failures: 2,
                mqtt_reconnects: 1,
                dropped_messages: 1,
                lock_timeouts: 1,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_lock_times_out_and_counts() {
        let health = Health::new();
        let shared = Mutex::new(5);

        let held = shared.lock().await;
        let started = tokio::time::Instant::now();
        let attempt = lock_bounded(&shared, Duration::from_millis(100), &health, "read").await;
        assert!(attempt.is_none());
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(health.snapshot().lock_timeouts, 1);

        drop(held);
        let value = lock_bounded(&shared, Duration::from_millis(100), &health, "read")
            .await
            .map(|guard| *guard);
        assert_eq!(value, Some(5));
        assert_eq!(health.snapshot().lock_timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_trips_on_silent_loop() {
        let health = Arc::new(Health::new());
        let clock = Clock::start();

        let beating = health.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let now = clock.now_ms();
                beating.beat(LoopId::Acquisition, now);
                beating.beat(LoopId::Publication, now);
            }
        });

        let result = watchdog(&health, clock, 30_000).await;
        let message = result.unwrap_err().to_string();
        assert!(message.contains("actuation"), "{message}");
        assert!(clock.now_ms() >= 30_000);
    }
}
