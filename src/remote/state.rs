//! Connection state machine.

/// Lifecycle state of a remote client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection; the initial and final state.
    #[default]
    Closed,
    /// Dial and authentication in progress.
    Dialing,
    /// Authenticated and ready for sessions.
    Open,
}

impl ConnectionState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - Closed -> Dialing
    /// - Dialing -> Open
    /// - Dialing -> Closed (dial failed)
    /// - Open -> Closed
    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (*self, target),
            (Closed, Dialing) | (Dialing, Open) | (Dialing, Closed) | (Open, Closed)
        )
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns `Ok(())` if the transition is valid, or an error otherwise.
    pub fn transition_to(&mut self, target: ConnectionState) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::CourierError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if sessions can be opened.
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}
