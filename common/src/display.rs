use crate::{address::DeviceAddress, registry::SensorRecord, topics::display_payload};

/// Front-panel display.
pub trait DisplaySink: Send {
    fn show_temperature(&mut self, celsius: f32);
    fn show_message(&mut self, message: &str);
}

pub const CHANGE_INDICATOR: &str = "CHG";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayView {
    Temperature(f32),
    Error,
    AutoSelected(DeviceAddress),
    Lost,
}

impl DisplayView {
    pub fn render(&self, sink: &mut dyn DisplaySink) {
        match self {
            Self::Temperature(celsius) => sink.show_temperature(*celsius),
            Self::Error => sink.show_message("ERR"),
            Self::AutoSelected(_) => sink.show_message("AUTO"),
            Self::Lost => sink.show_message("LOST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayUpdate {
    /// The selection changed since the last tick; show the change indicator first.
    pub selection_changed: bool,
    pub view: DisplayView,
    /// Payload for the aux display topic, when something new should go out.
    pub publish: Option<String>,
    /// Selection picked automatically that should be written back to preferences.
    pub persist_selection: Option<DeviceAddress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Error,
    Lost,
}

/// Tracks which sensor drives the display and what was last sent for it.
#[derive(Debug, Clone)]
pub struct DisplaySelector {
    current: DeviceAddress,
    last_published: Option<f32>,
    last_status: Option<Status>,
    auto_selected: bool,
    publish_delta_c: f32,
    grace_ms: u64,
}

impl DisplaySelector {
    pub fn new(publish_delta_c: f32, grace_ms: u64) -> Self {
        Self {
            current: DeviceAddress::UNSET,
            last_published: None,
            last_status: None,
            auto_selected: false,
            publish_delta_c,
            grace_ms,
        }
    }

    pub fn current(&self) -> DeviceAddress {
        self.current
    }

    pub fn evaluate(
        &mut self,
        selected: DeviceAddress,
        sensors: &[SensorRecord],
        now_ms: u64,
    ) -> DisplayUpdate {
        let selection_changed = selected != self.current;
        if selection_changed {
            self.current = selected;
            self.last_published = None;
            self.last_status = None;
        }

        let mut update = DisplayUpdate {
            selection_changed,
            view: DisplayView::Lost,
            publish: None,
            persist_selection: None,
        };

        if let Some(record) = sensors.iter().find(|record| record.address == self.current) {
            match record.display_value(now_ms, self.grace_ms) {
                Some(celsius) => {
                    update.view = DisplayView::Temperature(celsius);
                    update.publish = self.temperature_payload(celsius);
                }
                None => {
                    update.view = DisplayView::Error;
                    update.publish = self.status_payload(Status::Error);
                }
            }
            return update;
        }

        if self.current.is_unset() && !self.auto_selected {
            if let Some(first) = sensors.first() {
                self.auto_selected = true;
                self.current = first.address;
                self.last_published = None;
                self.last_status = None;
                update.view = DisplayView::AutoSelected(first.address);
                update.persist_selection = Some(first.address);
                return update;
            }
        }

        update.publish = self.status_payload(Status::Lost);
        update
    }

    /// Value pushed by the acquisition loop for a sensor; only counts if it is the
    /// displayed one.
    pub fn accept_update(&mut self, address: DeviceAddress, celsius: f32) -> Option<DisplayUpdate> {
        if address != self.current || self.current.is_unset() {
            return None;
        }
        Some(DisplayUpdate {
            selection_changed: false,
            view: DisplayView::Temperature(celsius),
            publish: self.temperature_payload(celsius),
            persist_selection: None,
        })
    }

    fn temperature_payload(&mut self, celsius: f32) -> Option<String> {
        self.last_status = None;
        let moved = self
            .last_published
            .map(|last| (celsius - last).abs() >= self.publish_delta_c)
            .unwrap_or(true);
        if !moved {
            return None;
        }
        self.last_published = Some(celsius);
        Some(display_payload(celsius))
    }

    fn status_payload(&mut self, status: Status) -> Option<String> {
        self.last_published = None;
        if self.last_status == Some(status) {
            return None;
        }
        self.last_status = Some(status);
        Some(
            match status {
                Status::Error => "error",
                Status::Lost => "lost",
            }
            .to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn addr(n: u8) -> DeviceAddress {
        DeviceAddress::from_parts(0x28, [n, 9, 9, 9, 9, 9])
    }

    fn valid(address: DeviceAddress, celsius: f32, read_ms: u64) -> SensorRecord {
        let mut record = SensorRecord::discovered(address);
        record.temperature = celsius;
        record.last_valid_reading = Some(celsius);
        record.last_read_ms = Some(read_ms);
        record.valid = true;
        record
    }

    fn stale(address: DeviceAddress, last: f32, read_ms: u64) -> SensorRecord {
        let mut record = valid(address, last, read_ms);
        record.valid = false;
        record.consecutive_errors = 4;
        record
    }

    #[test]
    fn publishes_only_on_meaningful_change() {
        let mut selector = DisplaySelector::new(0.1, 60_000);
        let a = addr(1);

        let first = selector.evaluate(a, &[valid(a, 21.5, 0)], 0);
        assert!(first.selection_changed);
        assert_eq!(first.view, DisplayView::Temperature(21.5));
        assert_eq!(first.publish.as_deref(), Some("21.5"));

        let same = selector.evaluate(a, &[valid(a, 21.55, 1_000)], 1_000);
        assert!(!same.selection_changed);
        assert_eq!(same.publish, None);

        let moved = selector.evaluate(a, &[valid(a, 21.7, 2_000)], 2_000);
        assert_eq!(moved.publish.as_deref(), Some("21.7"));
    }

    #[test]
    fn invalid_sensor_in_grace_window_renders_last_value() {
        let mut selector = DisplaySelector::new(0.1, 60_000);
        let a = addr(1);
        let b = addr(2);
        let now = 100_000;
        let sensors = [valid(a, 21.5, now), stale(b, 19.0, now - 30_000)];

        let update = selector.evaluate(b, &sensors, now);
        assert_eq!(update.view, DisplayView::Temperature(19.0));

        let expired = selector.evaluate(b, &sensors, now + 31_000);
        assert_eq!(expired.view, DisplayView::Error);
        assert_eq!(expired.publish.as_deref(), Some("error"));

        let again = selector.evaluate(b, &sensors, now + 32_000);
        assert_eq!(again.view, DisplayView::Error);
        assert_eq!(again.publish, None);
    }

    #[test]
    fn auto_selects_first_sensor_once() {
        let mut selector = DisplaySelector::new(0.1, 60_000);
        let sensors = [valid(addr(7), 20.0, 0), valid(addr(8), 22.0, 0)];

        let update = selector.evaluate(DeviceAddress::UNSET, &sensors, 0);
        assert_eq!(update.view, DisplayView::AutoSelected(addr(7)));
        assert_eq!(update.persist_selection, Some(addr(7)));

        let next = selector.evaluate(addr(7), &sensors, 1_000);
        assert!(!next.selection_changed);
        assert_eq!(next.view, DisplayView::Temperature(20.0));

        let cleared = selector.evaluate(DeviceAddress::UNSET, &sensors, 2_000);
        assert_eq!(cleared.view, DisplayView::Lost);
        assert_eq!(cleared.persist_selection, None);
    }

    #[test]
    fn missing_selection_reports_lost_once() {
        let mut selector = DisplaySelector::new(0.1, 60_000);
        let sensors = [valid(addr(1), 20.0, 0)];

        let lost = selector.evaluate(addr(5), &sensors, 0);
        assert_eq!(lost.view, DisplayView::Lost);
        assert_eq!(lost.publish.as_deref(), Some("lost"));
        assert_eq!(selector.evaluate(addr(5), &sensors, 1_000).publish, None);
    }

    #[test]
    fn pushed_update_only_for_displayed_sensor() {
        let mut selector = DisplaySelector::new(0.1, 60_000);
        let a = addr(1);
        selector.evaluate(a, &[valid(a, 20.0, 0)], 0);

        assert_eq!(selector.accept_update(addr(2), 25.0), None);
        let update = selector.accept_update(a, 20.5).unwrap();
        assert_eq!(update.publish.as_deref(), Some("20.5"));
    }
}
