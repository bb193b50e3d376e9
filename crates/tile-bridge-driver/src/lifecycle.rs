//! Module lifecycle state machine.

use std::fmt;

use tracing::debug;

use tile_bridge_common::RuntimeError;

/// Where the bridged module is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// Nothing loaded yet.
    #[default]
    Uninstantiated,
    /// Imports built, module being compiled and started.
    Instantiating,
    /// Startup finished; frames, events and completions are processed.
    Running,
    /// Shutdown exports have run. Terminal.
    Terminated,
}

impl LifecycleState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninstantiated, Self::Instantiating)
                | (Self::Instantiating, Self::Running)
                | (Self::Running, Self::Terminated)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninstantiated => "uninstantiated",
            Self::Instantiating => "instantiating",
            Self::Running => "running",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Tracks the current state and rejects illegal transitions.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Lifecycle {
    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidTransition`] if the move is illegal.
    pub fn advance(&mut self, next: LifecycleState) -> Result<(), RuntimeError> {
        if !self.state.can_advance_to(next) {
            return Err(RuntimeError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
        Ok(())
    }

    /// Require a specific state.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidTransition`] naming the operation.
    pub fn expect(&self, state: LifecycleState, operation: &str) -> Result<(), RuntimeError> {
        if self.state == state {
            Ok(())
        } else {
            Err(RuntimeError::InvalidTransition {
                from: self.state.to_string(),
                to: operation.to_string(),
            })
        }
    }
}
