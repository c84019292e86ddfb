//! Property tests for the sensor registry, publish planning and backoff.

use proptest::prelude::*;
use sensorhub_common::{
    plan_cycle, registry::merge, DeviceAddress, Pacing, PublishStep, ReconnectBackoff,
    SensorRegistry,
};

fn arb_address() -> impl Strategy<Value = DeviceAddress> {
    (0u8..6).prop_map(|n| DeviceAddress::from_parts(0x28, [n, 0xA0, 0, 0, 0, 7]))
}

#[derive(Debug, Clone)]
enum BusOp {
    Scan(Vec<DeviceAddress>),
    Collect(Vec<Option<f32>>),
}

fn arb_bus_op() -> impl Strategy<Value = BusOp> {
    prop_oneof![
        proptest::collection::vec(arb_address(), 0..=6).prop_map(BusOp::Scan),
        proptest::collection::vec(
            prop_oneof![Just(None), (-40.0f32..100.0).prop_map(Some)],
            0..=6
        )
        .prop_map(BusOp::Collect),
    ]
}

proptest! {
    /// A merge is exactly the de-duplicated candidate list, and every surviving
    /// address keeps its reading history.
    #[test]
    fn merge_keeps_candidates_and_history(
        existing in proptest::collection::vec(arb_address(), 0..=6),
        candidates in proptest::collection::vec(arb_address(), 0..=8),
        reading in -40.0f32..100.0,
    ) {
        let mut registry = SensorRegistry::new(3);
        registry.begin_scan().unwrap();
        registry.finish_scan(&existing, 0).unwrap();
        let readings: Vec<_> = registry
            .addresses()
            .into_iter()
            .map(|a| (a, Some(reading)))
            .collect();
        registry.begin_conversion(1_000).unwrap();
        registry.complete_conversion(&readings, 1_750).unwrap();

        let merged = merge(registry.sensors(), &candidates);

        let mut expected = Vec::new();
        for address in &candidates {
            if !expected.contains(address) {
                expected.push(*address);
            }
        }
        let merged_addresses: Vec<_> = merged.iter().map(|r| r.address).collect();
        prop_assert_eq!(merged_addresses, expected);

        for record in &merged {
            if let Some(previous) = registry.find(&record.address) {
                prop_assert_eq!(record.last_valid_reading, previous.last_valid_reading);
                prop_assert_eq!(record.last_read_ms, previous.last_read_ms);
                prop_assert_eq!(record.consecutive_errors, previous.consecutive_errors);
            } else {
                prop_assert!(!record.valid);
                prop_assert_eq!(record.last_valid_reading, None);
            }
        }
    }

    /// Arbitrary scan/collect sequences always leave the bus idle, never mark a sensor
    /// valid past the error threshold, and never forget a good reading.
    #[test]
    fn registry_invariants_hold(ops in proptest::collection::vec(arb_bus_op(), 1..=24)) {
        let mut registry = SensorRegistry::new(3);
        let mut now = 0;

        for op in ops {
            now += 1_000;
            let before = registry.snapshot();
            match op {
                BusOp::Scan(candidates) => {
                    registry.begin_scan().unwrap();
                    registry.finish_scan(&candidates, now).unwrap();
                }
                BusOp::Collect(values) => {
                    let readings: Vec<_> = registry
                        .addresses()
                        .into_iter()
                        .zip(values)
                        .collect();
                    registry.begin_conversion(now).unwrap();
                    let report = registry.complete_conversion(&readings, now + 750).unwrap();
                    prop_assert_eq!(report.succeeded + report.failures.len(), registry.len());
                }
            }

            prop_assert!(registry.state().is_idle());
            for record in registry.sensors() {
                if record.valid {
                    prop_assert!(record.consecutive_errors <= 3);
                }
                if let Some(old) = before.iter().find(|r| r.address == record.address) {
                    if old.last_valid_reading.is_some() {
                        prop_assert!(record.last_valid_reading.is_some());
                    }
                }
            }
        }
    }

    /// Every sensor is published exactly once per cycle, in order, with relays once.
    #[test]
    fn cycle_covers_each_sensor_once(count in 0usize..40, batch in 1usize..8) {
        let pacing = Pacing { batch_size: batch, sensor_delay_ms: 100, batch_delay_ms: 500 };
        let steps = plan_cycle(count, pacing, true);

        let sensors: Vec<usize> = steps
            .iter()
            .filter_map(|step| match step {
                PublishStep::Sensor(index) => Some(*index),
                _ => None,
            })
            .collect();
        prop_assert_eq!(sensors, (0..count).collect::<Vec<_>>());
        prop_assert_eq!(steps.iter().filter(|s| **s == PublishStep::RelayStates).count(), 1);
        prop_assert_eq!(steps.first(), Some(&PublishStep::Display));

        let batch_pauses = steps.iter().filter(|s| **s == PublishStep::Pause(500)).count();
        prop_assert_eq!(batch_pauses, count.div_ceil(batch).saturating_sub(1));
    }

    #[test]
    fn backoff_never_shrinks_or_exceeds_cap(attempts in 0usize..100) {
        let mut backoff = ReconnectBackoff::new(1_000, 60_000);
        let mut previous = 0;
        for _ in 0..attempts {
            let delay = backoff.delay_ms();
            prop_assert!(delay >= previous);
            prop_assert!(delay <= 60_000);
            previous = delay;
            backoff.record_attempt();
        }
    }

    #[test]
    fn built_addresses_pass_crc(family in any::<u8>(), serial in any::<[u8; 6]>()) {
        let address = DeviceAddress::from_parts(family, serial);
        prop_assume!(!address.is_unset());
        prop_assert!(address.is_valid());
        prop_assert_eq!(address.to_hex().parse::<DeviceAddress>().unwrap(), address);
    }
}
