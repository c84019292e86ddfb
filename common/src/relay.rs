use serde::Serialize;

use crate::error::SubmitError;

pub const RELAY_COUNT: usize = 2;

/// Index of one of the board's relays (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RelayId(u8);

impl RelayId {
    pub fn new(id: u8) -> Result<Self, SubmitError> {
        if usize::from(id) < RELAY_COUNT {
            Ok(Self(id))
        } else {
            Err(SubmitError::UnknownRelay(id))
        }
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = RelayId> {
        (0..RELAY_COUNT as u8).map(RelayId)
    }
}

/// Physical relay outputs.
pub trait RelayOutputs: Send {
    fn drive(&mut self, relay: RelayId, on: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayState {
    pub requested: bool,
    pub actual: bool,
    pub last_change_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTransition {
    pub relay: RelayId,
    pub on: bool,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RelayBank {
    relays: [RelayState; RELAY_COUNT],
}

impl RelayBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, relay: RelayId) -> RelayState {
        self.relays[relay.index()]
    }

    pub fn states(&self) -> [RelayState; RELAY_COUNT] {
        self.relays
    }

    pub fn request(&mut self, relay: RelayId, on: bool) {
        self.relays[relay.index()].requested = on;
    }

    /// Drives every relay whose requested state differs from its actual state.
    ///
    /// Each relay changes at most once per call.
    pub fn reconcile(
        &mut self,
        outputs: &mut dyn RelayOutputs,
        now_ms: u64,
    ) -> Vec<RelayTransition> {
        let mut transitions = Vec::new();
        for relay in RelayId::all() {
            let state = &mut self.relays[relay.index()];
            if state.requested == state.actual {
                continue;
            }
            outputs.drive(relay, state.requested);
            state.actual = state.requested;
            state.last_change_ms = Some(now_ms);
            transitions.push(RelayTransition {
                relay,
                on: state.actual,
                at_ms: now_ms,
            });
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingOutputs {
        driven: Vec<(u8, bool)>,
    }

    impl RelayOutputs for RecordingOutputs {
        fn drive(&mut self, relay: RelayId, on: bool) {
            self.driven.push((relay.value(), on));
        }
    }

    #[test]
    fn rejects_unknown_relay() {
        assert!(RelayId::new(1).is_ok());
        assert_eq!(RelayId::new(2), Err(SubmitError::UnknownRelay(2)));
    }

    #[test]
    fn request_applies_once() {
        let mut bank = RelayBank::new();
        let mut outputs = RecordingOutputs::default();
        let relay = RelayId::new(0).unwrap();

        bank.request(relay, true);
        let transitions = bank.reconcile(&mut outputs, 1_000);
        assert_eq!(
            transitions,
            vec![RelayTransition {
                relay,
                on: true,
                at_ms: 1_000,
            }]
        );
        assert_eq!(bank.state(relay).last_change_ms, Some(1_000));

        bank.request(relay, true);
        assert!(bank.reconcile(&mut outputs, 2_000).is_empty());
        bank.request(relay, true);
        assert!(bank.reconcile(&mut outputs, 3_000).is_empty());

        assert_eq!(outputs.driven, vec![(0, true)]);
        assert_eq!(
            bank.state(relay),
            RelayState {
                requested: true,
                actual: true,
                last_change_ms: Some(1_000),
            }
        );
    }

    #[test]
    fn last_request_before_tick_wins() {
        let mut bank = RelayBank::new();
        let mut outputs = RecordingOutputs::default();
        let relay = RelayId::new(1).unwrap();

        bank.request(relay, true);
        bank.request(relay, false);
        assert!(bank.reconcile(&mut outputs, 500).is_empty());

        bank.request(relay, true);
        bank.reconcile(&mut outputs, 600);
        assert_eq!(outputs.driven, vec![(1, true)]);
    }
}
