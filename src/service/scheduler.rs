//! Delayed-refresh timer lifecycle with generation-based cancellation.
//!
//! The generation counter is the cancellation token: bumping it invalidates
//! every previously armed shot without having to stop each one. Aborting the
//! spawned timer tasks is attempted as a courtesy, but a shot racing the
//! cancel can escape the abort — which is why every shot re-checks
//! [`RefreshScheduler::is_current`] first thing at fire time.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::AbortHandle;

#[derive(Debug, Default)]
struct SchedulerState {
    generation: u64,
    timers: Vec<AbortHandle>,
}

/// Owns the armed timer set for the delayed-refresh plan.
#[derive(Debug, Default)]
pub struct RefreshScheduler {
    state: Mutex<SchedulerState>,
}

impl RefreshScheduler {
    /// Creates a scheduler with nothing armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new plan: bumps the generation, aborts any previously armed
    /// timers, and returns the generation the new shots must carry.
    pub fn replace_plan(&self) -> u64 {
        let mut state = self.lock_state();
        state.generation = state.generation.wrapping_add(1);
        for timer in state.timers.drain(..) {
            timer.abort();
        }
        state.generation
    }

    /// Registers one armed timer under the current plan.
    pub fn arm(&self, timer: AbortHandle) {
        self.lock_state().timers.push(timer);
    }

    /// Whether the given generation is still the live one. A fired timer
    /// whose generation is stale must do nothing.
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.lock_state().generation == generation
    }

    /// Cancels the plan: bumps the generation and aborts all timers without
    /// arming anything. Returns how many timers were stopped.
    pub fn cancel(&self) -> usize {
        let mut state = self.lock_state();
        state.generation = state.generation.wrapping_add(1);
        let stopped = state.timers.len();
        for timer in state.timers.drain(..) {
            timer.abort();
        }
        stopped
    }

    /// Number of timers currently armed.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.lock_state().timers.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
