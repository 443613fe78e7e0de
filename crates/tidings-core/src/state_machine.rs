use crate::{
    error::SyncError,
    types::{ChannelState, SyncEvent},
};

/// Inputs that drive the push channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSignal {
    /// Caller asked for a connection for the current session.
    Connect,
    /// Transport handshake completed.
    Connected,
    /// Connection closed, errored, or the attempt failed.
    ConnectionLost,
    /// Fixed reconnect delay has elapsed.
    RetryElapsed,
    /// Logout or session loss; cancels any pending reconnect.
    Close,
}

#[derive(Debug, Clone)]
pub struct ChannelStateMachine {
    state: ChannelState,
}

impl Default for ChannelStateMachine {
    fn default() -> Self {
        Self {
            state: ChannelState::Idle,
        }
    }
}

impl ChannelStateMachine {
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether a connection is live or being (re-)established.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ChannelState::Connecting | ChannelState::Open | ChannelState::Reconnecting
        )
    }

    /// Apply a signal and return the state-change events it produced.
    ///
    /// `Connect` while already active and `Close` while closed are no-ops.
    pub fn apply(&mut self, signal: ChannelSignal) -> Result<Vec<SyncEvent>, SyncError> {
        use ChannelSignal::*;

        match signal {
            Connect if self.is_active() => Ok(Vec::new()),
            Connect => self.transition_from_any_of(
                &[ChannelState::Idle, ChannelState::Closed],
                ChannelState::Connecting,
                "connect",
            ),
            Connected => self.transition_from_state(
                ChannelState::Connecting,
                ChannelState::Open,
                "connected",
            ),
            ConnectionLost => self.transition_from_any_of(
                &[ChannelState::Connecting, ChannelState::Open],
                ChannelState::Reconnecting,
                "connection_lost",
            ),
            RetryElapsed => self.transition_from_state(
                ChannelState::Reconnecting,
                ChannelState::Connecting,
                "retry_elapsed",
            ),
            Close if self.state == ChannelState::Closed => Ok(Vec::new()),
            Close => {
                self.state = ChannelState::Closed;
                Ok(vec![SyncEvent::ChannelState {
                    state: ChannelState::Closed,
                }])
            }
        }
    }

    fn transition_from_state(
        &mut self,
        expected: ChannelState,
        next: ChannelState,
        action: &str,
    ) -> Result<Vec<SyncEvent>, SyncError> {
        self.transition_from_any_of(&[expected], next, action)
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[ChannelState],
        next: ChannelState,
        action: &str,
    ) -> Result<Vec<SyncEvent>, SyncError> {
        if !expected.contains(&self.state) {
            return Err(SyncError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(vec![SyncEvent::ChannelState { state: next }])
    }
}
