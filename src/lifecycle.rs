//! # Harness Lifecycle State Machine
//!
//! Process-level states of a harness:
//!
//! ```text
//! Uninitialized -> Provisioning -> Ready -> Running -> Terminating -> Terminated
//! ```
//!
//! A failed setup goes `Provisioning -> Terminating`, and a harness that never
//! ran a test may go `Ready -> Terminating`. There is no way back to `Ready`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarnessState {
    Uninitialized,
    Provisioning,
    Ready,
    Running,
    Terminating,
    Terminated,
}

impl HarnessState {
    pub fn can_transition_to(self, next: HarnessState) -> bool {
        use HarnessState::*;
        matches!(
            (self, next),
            (Uninitialized, Provisioning)
                | (Provisioning, Ready)
                | (Provisioning, Terminating)
                | (Ready, Running)
                | (Ready, Terminating)
                | (Running, Terminating)
                | (Terminating, Terminated)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == HarnessState::Terminated
    }
}

impl fmt::Display for HarnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HarnessState::Uninitialized => "uninitialized",
            HarnessState::Provisioning => "provisioning",
            HarnessState::Ready => "ready",
            HarnessState::Running => "running",
            HarnessState::Terminating => "terminating",
            HarnessState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Shared view of the harness state.
///
/// The harness, its teardown and the test runner each hold a clone, so the
/// state stays consistent no matter which of them drives the next step.
#[derive(Debug, Clone)]
pub struct LifecycleTracker {
    state: Arc<Mutex<HarnessState>>,
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HarnessState::Uninitialized)),
        }
    }

    pub fn current(&self) -> HarnessState {
        *self.state.lock()
    }

    pub fn transition(&self, next: HarnessState) -> HarnessResult<()> {
        let mut state = self.state.lock();
        let from = *state;
        if !from.can_transition_to(next) {
            return Err(HarnessError::InvalidTransition { from, to: next });
        }
        *state = next;
        debug!(from = %from, to = %next, "harness state transition");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let tracker = LifecycleTracker::new();
        for next in [
            HarnessState::Provisioning,
            HarnessState::Ready,
            HarnessState::Running,
            HarnessState::Terminating,
            HarnessState::Terminated,
        ] {
            tracker.transition(next).unwrap();
            assert_eq!(tracker.current(), next);
        }
        assert!(tracker.current().is_terminal());
    }

    #[test]
    fn test_no_way_back_to_ready() {
        let tracker = LifecycleTracker::new();
        tracker.transition(HarnessState::Provisioning).unwrap();
        tracker.transition(HarnessState::Terminating).unwrap();
        tracker.transition(HarnessState::Terminated).unwrap();

        let err = tracker.transition(HarnessState::Ready).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::InvalidTransition {
                from: HarnessState::Terminated,
                to: HarnessState::Ready
            }
        ));
        assert!(tracker.transition(HarnessState::Terminated).is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = LifecycleTracker::new();
        let other = tracker.clone();
        tracker.transition(HarnessState::Provisioning).unwrap();
        assert_eq!(other.current(), HarnessState::Provisioning);
    }

    #[test]
    fn test_cannot_skip_provisioning() {
        let tracker = LifecycleTracker::new();
        assert!(tracker.transition(HarnessState::Ready).is_err());
        assert_eq!(tracker.current(), HarnessState::Uninitialized);
    }
}
