use std::future::Future;

/// Broker connection used by the publication pump.
///
/// `publish` reports whether the message was handed to the broker link; it never
/// retries on its own.
pub trait PublishTransport: Send {
    fn connected(&self) -> bool;

    /// Makes one connection attempt and reports whether the link is up afterwards.
    fn connect(&mut self) -> impl Future<Output = bool> + Send;

    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retained: bool,
    ) -> impl Future<Output = bool> + Send;
}

/// One step of a publication cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStep {
    /// Display sensor value on the aux display topic.
    Display,
    /// State of the sensor at this index in the cycle's snapshot.
    Sensor(usize),
    RelayStates,
    Pause(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub batch_size: usize,
    pub sensor_delay_ms: u64,
    pub batch_delay_ms: u64,
}

/// Lays out one cycle: display first, then sensors in paced batches, with the relay
/// states slotted in once right after the first batch.
pub fn plan_cycle(sensor_count: usize, pacing: Pacing, with_display: bool) -> Vec<PublishStep> {
    let batch_size = pacing.batch_size.max(1);
    let mut steps = Vec::with_capacity(sensor_count * 2 + 3);

    if with_display {
        steps.push(PublishStep::Display);
    }

    if sensor_count == 0 {
        steps.push(PublishStep::RelayStates);
        return steps;
    }

    for (batch_index, start) in (0..sensor_count).step_by(batch_size).enumerate() {
        if batch_index > 0 {
            steps.push(PublishStep::Pause(pacing.batch_delay_ms));
        }

        let end = (start + batch_size).min(sensor_count);
        for index in start..end {
            if index > start {
                steps.push(PublishStep::Pause(pacing.sensor_delay_ms));
            }
            steps.push(PublishStep::Sensor(index));
        }

        if batch_index == 0 {
            steps.push(PublishStep::RelayStates);
        }
    }

    steps
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use PublishStep::*;

    const PACING: Pacing = Pacing {
        batch_size: 4,
        sensor_delay_ms: 100,
        batch_delay_ms: 500,
    };

    #[test]
    fn ten_sensors_split_four_four_two() {
        let steps = plan_cycle(10, PACING, true);

        assert_eq!(
            steps,
            vec![
                Display,
                Sensor(0),
                Pause(100),
                Sensor(1),
                Pause(100),
                Sensor(2),
                Pause(100),
                Sensor(3),
                RelayStates,
                Pause(500),
                Sensor(4),
                Pause(100),
                Sensor(5),
                Pause(100),
                Sensor(6),
                Pause(100),
                Sensor(7),
                Pause(500),
                Sensor(8),
                Pause(100),
                Sensor(9),
            ]
        );

        let total_pause: u64 = steps
            .iter()
            .map(|step| match step {
                Pause(ms) => *ms,
                _ => 0,
            })
            .sum();
        assert_eq!(total_pause, 7 * 100 + 2 * 500);
    }

    #[test]
    fn relays_still_published_without_sensors() {
        assert_eq!(plan_cycle(0, PACING, false), vec![RelayStates]);
    }

    #[test]
    fn single_batch_has_no_batch_pause() {
        let steps = plan_cycle(3, PACING, false);
        assert!(!steps.contains(&Pause(500)));
        assert_eq!(steps.last(), Some(&RelayStates));
    }
}
