//! The per-slot lifecycle state and its value type.
//!
//! A [`WorkerSlot`] is the UI-facing view of one unit of bounded
//! concurrency. Like [`MediaFile`](crate::file::MediaFile) it is
//! immutable-per-version: transitions produce new values, so watchers
//! never observe a half-applied change.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one worker slot.
///
/// `Waiting` is initial and there is no terminal state; a finished,
/// errored, or paused slot is eventually recycled back to `Waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Idle, eligible for scheduling when enabled.
    Waiting,
    /// Claimed a file; startup jitter timer armed, no process yet.
    Prepare,
    /// External encode in flight.
    Running,
    /// Deliberately parked; excluded from scheduling until resumed.
    Paused,
    /// Terminal success shown briefly before the slot recycles.
    Complete,
    /// Terminal failure shown briefly before the slot recycles.
    Error,
    /// Draining: an enable/disable toggle waits for in-flight work.
    TearDown,
}

/// One unit of bounded concurrency capacity in the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSlot {
    /// Stable key, `1..=N`.
    pub key: u32,
    /// Operator or elastic-pool toggle; a disabled slot is never scheduled.
    pub disabled: bool,
    /// Lifecycle state.
    pub state: SlotState,
    /// Progress percentage, meaningful while running.
    pub progress: u8,
    /// Distinguishes a deliberate operator pause from any other paused
    /// cause.
    pub stopped: bool,
}

impl WorkerSlot {
    pub fn new(key: u32, disabled: bool) -> Self {
        Self {
            key,
            disabled,
            state: SlotState::Waiting,
            progress: 0,
            stopped: false,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.state == SlotState::Waiting
    }

    pub fn is_running(&self) -> bool {
        self.state == SlotState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state == SlotState::Paused
    }

    /// Draining after an enable/disable toggle.
    pub fn is_draining(&self) -> bool {
        self.state == SlotState::TearDown
    }

    /// Whether the scheduler may drive this slot into `Prepare`.
    pub fn can_prepare(&self) -> bool {
        !self.disabled && self.state == SlotState::Waiting
    }

    /// Whether an operator stop may park this slot.
    pub fn can_pause(&self) -> bool {
        !self.disabled && matches!(self.state, SlotState::Prepare | SlotState::Running)
    }

    /// Whether a genuine encode failure may mark this slot errored.
    pub fn can_error(&self) -> bool {
        !self.disabled && matches!(self.state, SlotState::Prepare | SlotState::Running)
    }

    /// Whether the stop/resume control applies in the current state.
    pub fn can_stop_or_resume(&self) -> bool {
        matches!(
            self.state,
            SlotState::Prepare | SlotState::Running | SlotState::Paused
        )
    }

    /// Returns a copy in the given state.
    pub fn with_state(&self, state: SlotState) -> Self {
        let mut slot = self.clone();
        slot.state = state;
        slot
    }

    /// Returns a copy with the given progress.
    pub fn with_progress(&self, progress: u8) -> Self {
        let mut slot = self.clone();
        slot.progress = progress;
        slot
    }

    /// Returns a copy with the disabled flag set.
    pub fn with_disabled(&self, disabled: bool) -> Self {
        let mut slot = self.clone();
        slot.disabled = disabled;
        slot
    }

    /// Returns a copy with the stopped flag set.
    pub fn with_stopped(&self, stopped: bool) -> Self {
        let mut slot = self.clone();
        slot.stopped = stopped;
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_slot_is_waiting() {
        let slot = WorkerSlot::new(1, false);
        assert!(slot.is_waiting());
        assert!(slot.can_prepare());
        assert!(!slot.can_pause());
        assert_eq!(slot.progress, 0);
    }

    #[test]
    fn test_disabled_slot_cannot_prepare() {
        let slot = WorkerSlot::new(3, true);
        assert!(!slot.can_prepare());
    }

    #[test]
    fn test_pause_only_while_active() {
        let slot = WorkerSlot::new(1, false);
        assert!(!slot.can_pause());
        assert!(slot.with_state(SlotState::Prepare).can_pause());
        assert!(slot.with_state(SlotState::Running).can_pause());
        assert!(!slot.with_state(SlotState::Paused).can_pause());
        assert!(!slot.with_state(SlotState::Complete).can_pause());
    }

    #[test]
    fn test_stop_or_resume_states() {
        let slot = WorkerSlot::new(1, false);
        assert!(slot.with_state(SlotState::Prepare).can_stop_or_resume());
        assert!(slot.with_state(SlotState::Running).can_stop_or_resume());
        assert!(slot.with_state(SlotState::Paused).can_stop_or_resume());
        assert!(!slot.can_stop_or_resume());
        assert!(!slot.with_state(SlotState::TearDown).can_stop_or_resume());
    }

    #[test]
    fn test_transitions_produce_copies() {
        let slot = WorkerSlot::new(2, false);
        let running = slot.with_state(SlotState::Running).with_progress(40);

        assert!(slot.is_waiting());
        assert_eq!(slot.progress, 0);
        assert!(running.is_running());
        assert_eq!(running.progress, 40);
        assert_eq!(running.key, 2);
    }
}
