/// Exponential delay between broker connection attempts.
///
/// The delay before the n-th attempt since the last successful connect is
/// `min(initial * 2^(n-1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    initial_ms: u64,
    max_ms: u64,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            initial_ms,
            max_ms: max_ms.max(initial_ms),
            attempts: 0,
        }
    }

    /// Attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay that must precede the next attempt.
    pub fn delay_ms(&self) -> u64 {
        let factor = 1u64.checked_shl(self.attempts).unwrap_or(u64::MAX);
        self.initial_ms.saturating_mul(factor).min(self.max_ms)
    }

    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Bounded retry for a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u8,
    pub base_ms: u64,
}

impl RetryPolicy {
    pub fn new(attempts: u8, base_ms: u64) -> Self {
        Self {
            attempts: attempts.max(1),
            base_ms,
        }
    }

    /// Wait before attempt `attempt` (0-based). The first attempt goes out immediately;
    /// attempt k waits `base * 2^k`.
    pub fn delay_before_ms(&self, attempt: u8) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let factor = 1u64.checked_shl(u32::from(attempt)).unwrap_or(u64::MAX);
        self.base_ms.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_doubles_up_to_cap() {
        let mut backoff = ReconnectBackoff::new(1_000, 60_000);
        let mut delays = Vec::new();
        for _ in 0..8 {
            delays.push(backoff.delay_ms());
            backoff.record_attempt();
        }

        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 60_000, 60_000]
        );

        backoff.reset();
        assert_eq!(backoff.delay_ms(), 1_000);
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        let mut backoff = ReconnectBackoff::new(1_000, 60_000);
        for _ in 0..200 {
            backoff.record_attempt();
        }
        assert_eq!(backoff.delay_ms(), 60_000);
    }

    #[test]
    fn publish_retry_delays() {
        let policy = RetryPolicy::new(3, 200);
        let delays: Vec<u64> = (0..policy.attempts)
            .map(|attempt| policy.delay_before_ms(attempt))
            .collect();
        assert_eq!(delays, vec![0, 400, 800]);
    }
}
