//! Heap-spray detection heuristic.
//!
//! A sliding window of the most recent allocation events, each a
//! `(size, instant)` pair. An allocation burst counts as a spray when at
//! least `same_size_limit` events in the window share the incoming size
//! *and* the oldest retained event is still inside the time window, i.e.
//! the burst happened fast.
//!
//! The detector is purely advisory: it never blocks anything itself, the
//! unified allocation path maps a [`SprayVerdict::Detected`] to the
//! spray-attack error.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::SPRAY_MAX_EVENTS;

/// Outcome of a single spray check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SprayVerdict {
    /// Allocation pattern looks ordinary.
    Ok,
    /// Same-size burst within the time window.
    Detected,
}

#[derive(Debug, Clone, Copy)]
struct SprayEvent {
    size: usize,
    at: Instant,
}

/// Sliding-window burst detector.
pub(crate) struct SprayDetector {
    events: VecDeque<SprayEvent>,
    same_size_limit: usize,
    time_window: Duration,
}

impl SprayDetector {
    pub(crate) fn new(same_size_limit: usize, time_window: Duration) -> Self {
        Self {
            events: VecDeque::with_capacity(SPRAY_MAX_EVENTS),
            same_size_limit,
            time_window,
        }
    }

    /// Records an allocation of `size` bytes and judges the window.
    pub(crate) fn check(&mut self, size: usize) -> SprayVerdict {
        self.check_at(size, Instant::now())
    }

    /// Clock-injected variant of [`check`](Self::check), used by tests.
    pub(crate) fn check_at(&mut self, size: usize, now: Instant) -> SprayVerdict {
        if self.events.len() == SPRAY_MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SprayEvent { size, at: now });

        let same_size = self.events.iter().filter(|e| e.size == size).count();
        // The window is rapid when even its oldest retained event is
        // recent.
        let rapid = self
            .events
            .front()
            .is_some_and(|oldest| now.duration_since(oldest.at) < self.time_window);

        if same_size >= self.same_size_limit && rapid {
            tracing::warn!(size, same_size, "allocation burst matches spray pattern");
            SprayVerdict::Detected
        } else {
            SprayVerdict::Ok
        }
    }

    /// Same-size count the next check of `size` would observe, without
    /// recording anything.
    pub(crate) fn same_size_pressure(&self, size: usize) -> usize {
        self.events.iter().filter(|e| e.size == size).count()
    }

    /// Forgets all recorded events.
    pub(crate) fn reset(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SPRAY_SAME_SIZE_LIMIT, SPRAY_TIME_WINDOW};

    fn detector() -> SprayDetector {
        SprayDetector::new(SPRAY_SAME_SIZE_LIMIT, SPRAY_TIME_WINDOW)
    }

    #[test]
    fn rapid_same_size_burst_detected() {
        let mut spray = detector();
        let t0 = Instant::now();
        for i in 0..SPRAY_SAME_SIZE_LIMIT - 1 {
            assert_eq!(
                spray.check_at(64, t0 + Duration::from_micros(i as u64)),
                SprayVerdict::Ok
            );
        }
        // The limit-th same-size event inside the window trips it.
        assert_eq!(
            spray.check_at(64, t0 + Duration::from_millis(1)),
            SprayVerdict::Detected
        );
    }

    #[test]
    fn slow_same_size_stream_passes() {
        let mut spray = detector();
        let t0 = Instant::now();
        // Events spaced wider than the window never look rapid.
        for i in 0..4 * SPRAY_SAME_SIZE_LIMIT {
            let at = t0 + SPRAY_TIME_WINDOW * (i as u32 + 1);
            assert_eq!(spray.check_at(64, at), SprayVerdict::Ok);
        }
    }

    #[test]
    fn mixed_sizes_do_not_trip() {
        let mut spray = detector();
        let t0 = Instant::now();
        for i in 0..2 * SPRAY_MAX_EVENTS {
            let at = t0 + Duration::from_micros(i as u64);
            assert_eq!(spray.check_at(32 + i, at), SprayVerdict::Ok);
        }
    }

    #[test]
    fn window_evicts_oldest_events() {
        let mut spray = detector();
        let t0 = Instant::now();
        // Fill the whole window with one size, slowly (no detection).
        for i in 0..SPRAY_MAX_EVENTS {
            spray.check_at(64, t0 + SPRAY_TIME_WINDOW * (i as u32 + 1));
        }
        assert_eq!(spray.same_size_pressure(64), SPRAY_MAX_EVENTS);

        // A different-size burst pushes the old events out.
        let late = t0 + SPRAY_TIME_WINDOW * (SPRAY_MAX_EVENTS as u32 + 2);
        for i in 0..SPRAY_MAX_EVENTS {
            spray.check_at(128, late + Duration::from_micros(i as u64));
        }
        assert_eq!(spray.same_size_pressure(64), 0);
    }

    #[test]
    fn reset_clears_pressure() {
        let mut spray = detector();
        let t0 = Instant::now();
        for i in 0..SPRAY_SAME_SIZE_LIMIT - 1 {
            spray.check_at(64, t0 + Duration::from_micros(i as u64));
        }
        spray.reset();
        assert_eq!(spray.same_size_pressure(64), 0);
        assert_eq!(
            spray.check_at(64, t0 + Duration::from_micros(100)),
            SprayVerdict::Ok
        );
    }
}
