use serde::Serialize;

use crate::backoff::ReconnectBackoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
        }
    }
}

/// Broker link state plus the gate on how often a reconnect may be tried.
///
/// An attempt is allowed once `max(min_interval, backoff delay)` has passed since the
/// previous one. A successful connect resets the backoff.
#[derive(Debug, Clone)]
pub struct LinkSupervisor {
    state: LinkState,
    backoff: ReconnectBackoff,
    min_interval_ms: u64,
    last_attempt_ms: Option<u64>,
    total_attempts: u64,
}

impl LinkSupervisor {
    pub fn new(min_interval_ms: u64, backoff: ReconnectBackoff) -> Self {
        Self {
            state: LinkState::Disconnected,
            backoff,
            min_interval_ms,
            last_attempt_ms: None,
            total_attempts: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn total_attempts(&self) -> u64 {
        self.total_attempts
    }

    /// Earliest time the next attempt may start, if one has been made before.
    pub fn next_attempt_ms(&self) -> Option<u64> {
        let gap = self.min_interval_ms.max(self.backoff.delay_ms());
        self.last_attempt_ms.map(|last| last.saturating_add(gap))
    }

    pub fn should_attempt(&self, now_ms: u64) -> bool {
        if self.state != LinkState::Disconnected {
            return false;
        }
        self.next_attempt_ms()
            .map(|next| now_ms >= next)
            .unwrap_or(true)
    }

    pub fn begin_attempt(&mut self, now_ms: u64) {
        self.state = LinkState::Connecting;
        self.last_attempt_ms = Some(now_ms);
        self.backoff.record_attempt();
        self.total_attempts = self.total_attempts.saturating_add(1);
    }

    pub fn attempt_failed(&mut self) {
        self.state = LinkState::Disconnected;
    }

    pub fn connected(&mut self) {
        self.state = LinkState::Connected;
        self.backoff.reset();
    }

    /// Reconciles with what the transport reports. Returns true if the link was just lost.
    pub fn observe(&mut self, transport_connected: bool) -> bool {
        match (self.state, transport_connected) {
            (LinkState::Connected, false) => {
                self.state = LinkState::Disconnected;
                true
            }
            (LinkState::Disconnected, true) | (LinkState::Connecting, true) => {
                self.connected();
                false
            }
            _ => false,
        }
    }
}
