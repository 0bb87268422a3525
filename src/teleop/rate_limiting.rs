// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Limits how often targets are streamed to an arm.
use std::time::{Duration, Instant};

/// Default interval between two streamed targets.
pub const DEFAULT_CONTROL_INTERVAL: Duration = Duration::from_millis(10);

/// Lets at most one send through per interval.
#[derive(Debug, Clone)]
pub struct RateGate {
    interval: Duration,
    last_send: Option<Instant>,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        RateGate {
            interval,
            last_send: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true and restarts the interval if at least one interval passed since the last
    /// accepted send.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last_send {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_send = Some(now);
                true
            }
        }
    }

    /// Forgets the last send, the next call to [`try_acquire`](Self::try_acquire) succeeds.
    pub fn reset(&mut self) {
        self.last_send = None;
    }
}

/// Counts streamed sends and tells when to drain the receive buffer and when to log.
#[derive(Debug, Clone)]
pub struct SendCadence {
    sends: u64,
    clear_interval: u64,
    debug_interval: u64,
}

impl SendCadence {
    pub fn new(clear_interval: u64, debug_interval: u64) -> Self {
        SendCadence {
            sends: 0,
            clear_interval: clear_interval.max(1),
            debug_interval: debug_interval.max(1),
        }
    }

    /// Records one send. Returns `(drain_now, log_now)`.
    pub fn record(&mut self) -> (bool, bool) {
        self.sends += 1;
        (
            self.sends % self.clear_interval == 0,
            self.sends % self.debug_interval == 0,
        )
    }

    pub fn sends(&self) -> u64 {
        self.sends
    }
}

#[cfg(test)]
mod tests {
    use super::{RateGate, SendCadence};
    use std::time::{Duration, Instant};

    #[test]
    fn accepted_sends_are_bounded_by_the_window() {
        let interval = Duration::from_millis(10);
        let window = Duration::from_millis(1000);
        let mut gate = RateGate::new(interval);
        let start = Instant::now();
        let mut accepted = 0;
        let mut elapsed = Duration::from_micros(0);
        while elapsed <= window {
            if gate.try_acquire(start + elapsed) {
                accepted += 1;
            }
            elapsed += Duration::from_micros(333);
        }
        let bound = (window.as_secs_f64() / interval.as_secs_f64()).ceil() as usize + 1;
        assert!(accepted <= bound, "{} > {}", accepted, bound);
        assert!(accepted >= 90);
    }

    #[test]
    fn first_send_passes_and_reset_reopens() {
        let mut gate = RateGate::new(Duration::from_millis(10));
        let now = Instant::now();
        assert!(gate.try_acquire(now));
        assert!(!gate.try_acquire(now + Duration::from_millis(9)));
        gate.reset();
        assert!(gate.try_acquire(now + Duration::from_millis(9)));
        assert!(gate.try_acquire(now + Duration::from_millis(19)));
    }

    #[test]
    fn cadence_fires_on_multiples() {
        let mut cadence = SendCadence::new(100, 50);
        let mut drains = 0;
        let mut logs = 0;
        for _ in 0..300 {
            let (drain, log) = cadence.record();
            drains += drain as usize;
            logs += log as usize;
        }
        assert_eq!((drains, logs), (3, 6));
        assert_eq!(cadence.sends(), 300);
    }
}
