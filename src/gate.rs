//! Capability gate
//!
//! Actions that need the collaborator capability pass through
//! [`CapabilityGate::require`]. Without a capability the action is parked
//! and the acquisition prompt is raised; submitting a capability hands the
//! parked action back exactly once. Only one action can be parked at a time
//! and the latest request wins.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::models::Capability;

/// Decision for a gated request.
#[derive(Debug)]
pub enum Admission<A> {
    Proceed(A, Capability),
    /// Parked until a capability is submitted
    Suspended,
}

/// Result of a gated session operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Gated<T> {
    Ran(T),
    /// Waiting on a capability; the prompt is showing
    Suspended,
}

impl<T> Gated<T> {
    pub fn ran(self) -> Option<T> {
        match self {
            Gated::Ran(value) => Some(value),
            Gated::Suspended => None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Gated::Suspended)
    }
}

#[derive(Debug)]
struct GateState<A> {
    pending: Option<A>,
    prompting: bool,
}

#[derive(Debug)]
pub struct CapabilityGate<A> {
    state: Mutex<GateState<A>>,
}

impl<A> CapabilityGate<A> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                pending: None,
                prompting: false,
            }),
        }
    }

    /// Let `action` through when a capability is present, otherwise park it
    /// (replacing any parked action) and raise the prompt.
    pub fn require(&self, capability: Option<Capability>, action: A) -> Admission<A> {
        match capability {
            Some(capability) => Admission::Proceed(action, capability),
            None => {
                let mut state = self.lock();
                if state.pending.replace(action).is_some() {
                    debug!("Replacing parked action");
                }
                state.prompting = true;
                Admission::Suspended
            }
        }
    }

    /// Close the prompt after a capability was supplied and take the parked
    /// action. Later calls return `None`.
    pub fn submit(&self) -> Option<A> {
        let mut state = self.lock();
        state.prompting = false;
        state.pending.take()
    }

    /// Close the prompt and drop the parked action.
    pub fn dismiss(&self) {
        let mut state = self.lock();
        state.prompting = false;
        if state.pending.take().is_some() {
            debug!("Parked action discarded");
        }
    }

    pub fn is_prompting(&self) -> bool {
        self.lock().prompting
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, GateState<A>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A> Default for CapabilityGate<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_capability_proceeds() {
        let gate = CapabilityGate::new();
        match gate.require(Capability::new("k"), "consult") {
            Admission::Proceed(action, cap) => {
                assert_eq!(action, "consult");
                assert_eq!(cap.expose(), "k");
            }
            Admission::Suspended => panic!("should proceed"),
        }
        assert!(!gate.is_prompting());
    }

    #[test]
    fn test_last_call_wins() {
        let gate = CapabilityGate::new();
        assert!(matches!(gate.require(None, 1), Admission::Suspended));
        assert!(matches!(gate.require(None, 2), Admission::Suspended));
        assert!(gate.is_prompting());

        assert_eq!(gate.submit(), Some(2));
        assert_eq!(gate.submit(), None, "runs once");
        assert!(!gate.is_prompting());
    }

    #[test]
    fn test_dismiss_discards() {
        let gate = CapabilityGate::new();
        gate.require(None, "analyze");
        gate.dismiss();

        assert!(!gate.has_pending());
        assert_eq!(gate.submit(), None);
    }
}
