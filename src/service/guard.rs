//! Admission guard: single-flight + minimum-gap limiter for upstream polls.
//!
//! Every upstream poll — scheduled shot, forced refresh, or relayed trigger
//! — acquires a slot here first. At most one poll is in flight process-wide,
//! and consecutive poll starts are separated by at least the effective
//! minimum gap. The guard never blocks and never errors: denial is a normal
//! steady-state outcome the caller logs.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Unconditional floor on the minimum gap between poll starts.
const HARD_MINIMUM_GAP: Duration = Duration::from_secs(5);

/// Denial retry hint when a poll is already in flight.
const IN_FLIGHT_RETRY: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct GuardState {
    in_flight: bool,
    last_start: Option<Instant>,
}

/// Single-flight + minimum-gap limiter around the upstream endpoint.
#[derive(Debug, Default)]
pub struct AdmissionGuard {
    state: Mutex<GuardState>,
}

/// Outcome of an admission attempt.
#[derive(Debug)]
pub enum SlotDecision<'a> {
    /// The slot was granted; holds until the permit drops.
    Granted(SlotPermit<'a>),
    /// The slot was denied; retry no sooner than `retry_after`.
    Denied {
        /// How long the caller should wait before retrying.
        retry_after: Duration,
    },
}

/// RAII permit for one in-flight upstream poll.
///
/// Dropping the permit releases the slot, so every exit path — success,
/// error, or early return — releases exactly once.
#[derive(Debug)]
pub struct SlotPermit<'a> {
    guard: &'a AdmissionGuard,
}

impl Drop for SlotPermit<'_> {
    fn drop(&mut self) {
        self.guard.release();
    }
}

impl AdmissionGuard {
    /// Creates a guard with no poll history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to claim the poll slot.
    ///
    /// `min_gap` is floored to a hard 5s minimum regardless of what the
    /// caller requests, bounding the upstream request rate unconditionally.
    pub fn acquire(&self, min_gap: Duration) -> SlotDecision<'_> {
        self.acquire_at(min_gap, Instant::now())
    }

    fn acquire_at(&self, min_gap: Duration, now: Instant) -> SlotDecision<'_> {
        let min_gap = min_gap.max(HARD_MINIMUM_GAP);
        let mut state = self.lock_state();

        if state.in_flight {
            return SlotDecision::Denied {
                retry_after: IN_FLIGHT_RETRY,
            };
        }

        if let Some(last_start) = state.last_start {
            let since = now.saturating_duration_since(last_start);
            if since < min_gap {
                let retry_after = (min_gap - since).max(IN_FLIGHT_RETRY);
                return SlotDecision::Denied { retry_after };
            }
        }

        state.in_flight = true;
        state.last_start = Some(now);
        drop(state);

        SlotDecision::Granted(SlotPermit { guard: self })
    }

    fn release(&self) {
        self.lock_state().in_flight = false;
    }

    fn lock_state(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_denied_while_in_flight() {
        let guard = AdmissionGuard::new();

        let first = guard.acquire(Duration::from_secs(5));
        let SlotDecision::Granted(_permit) = first else {
            panic!("first acquire should grant");
        };

        let second = guard.acquire(Duration::from_secs(5));
        let SlotDecision::Denied { retry_after } = second else {
            panic!("second acquire should deny");
        };
        assert!(retry_after >= Duration::from_secs(1));
    }

    #[test]
    fn min_gap_enforced_after_release() {
        let guard = AdmissionGuard::new();
        let start = Instant::now();

        let first = guard.acquire_at(Duration::from_secs(5), start);
        let SlotDecision::Granted(permit) = first else {
            panic!("first acquire should grant");
        };
        drop(permit);

        // Released, but only two seconds into the five-second gap.
        let early = guard.acquire_at(Duration::from_secs(5), start + Duration::from_secs(2));
        let SlotDecision::Denied { retry_after } = early else {
            panic!("early acquire should deny");
        };
        assert_eq!(retry_after, Duration::from_secs(3));

        let late = guard.acquire_at(Duration::from_secs(5), start + Duration::from_secs(5));
        let SlotDecision::Granted(_permit) = late else {
            panic!("late acquire should grant");
        };
    }

    #[test]
    fn requested_gap_floored_to_hard_minimum() {
        let guard = AdmissionGuard::new();
        let start = Instant::now();

        let first = guard.acquire_at(Duration::from_secs(1), start);
        let SlotDecision::Granted(permit) = first else {
            panic!("first acquire should grant");
        };
        drop(permit);

        // Caller asked for a 1s gap but the hard floor is 5s.
        let second = guard.acquire_at(Duration::from_secs(1), start + Duration::from_secs(2));
        let SlotDecision::Denied { retry_after } = second else {
            panic!("second acquire should deny");
        };
        assert_eq!(retry_after, Duration::from_secs(3));
    }

    #[test]
    fn retry_hint_floored_at_one_second() {
        let guard = AdmissionGuard::new();
        let start = Instant::now();

        let first = guard.acquire_at(Duration::from_secs(5), start);
        let SlotDecision::Granted(permit) = first else {
            panic!("first acquire should grant");
        };
        drop(permit);

        let nearly = guard.acquire_at(
            Duration::from_secs(5),
            start + Duration::from_millis(4800),
        );
        let SlotDecision::Denied { retry_after } = nearly else {
            panic!("nearly-elapsed acquire should deny");
        };
        assert_eq!(retry_after, Duration::from_secs(1));
    }

    #[test]
    fn permit_drop_releases_on_early_return() {
        let guard = AdmissionGuard::new();
        let start = Instant::now();

        {
            let decision = guard.acquire_at(Duration::from_secs(5), start);
            let SlotDecision::Granted(_permit) = decision else {
                panic!("acquire should grant");
            };
            // Permit dropped here, as it would be on an error path.
        }

        let after_gap = guard.acquire_at(Duration::from_secs(5), start + HARD_MINIMUM_GAP);
        assert!(matches!(after_gap, SlotDecision::Granted(_)));
    }
}
