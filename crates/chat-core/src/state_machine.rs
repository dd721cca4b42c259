use crate::{
    error::ChatError,
    types::{ChatCommand, SessionStatus},
};

/// Connection lifecycle of a chat session.
///
/// `Idle -> Connecting -> Connected`, with `Disconnected` reachable from any
/// active state and `Connect` allowed again once disconnected.
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    status: SessionStatus,
}

impl SessionStateMachine {
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Validate a command against the current status, moving to the next status if it
    /// starts a transition. Returns the new status when one happened.
    pub fn apply(&mut self, command: &ChatCommand) -> Result<Option<SessionStatus>, ChatError> {
        use ChatCommand::*;

        match command {
            Connect => self
                .transition_from_any_of(
                    &[SessionStatus::Idle, SessionStatus::Disconnected],
                    SessionStatus::Connecting,
                    "connect",
                )
                .map(Some),
            Disconnect => self
                .transition_from_any_of(
                    &[SessionStatus::Connecting, SessionStatus::Connected],
                    SessionStatus::Disconnected,
                    "disconnect",
                )
                .map(Some),
            EnterRoom { .. }
            | EnterPrivateRoom { .. }
            | SendMessage { .. }
            | LoadMore
            | SetDisplayName { .. } => self.require_connected("room/timeline command").map(|_| None),
        }
    }

    /// Fail unless the session is `Connected`.
    pub fn require_connected(&self, action: &str) -> Result<(), ChatError> {
        if self.status == SessionStatus::Connected {
            Ok(())
        } else {
            Err(ChatError::invalid_state(self.status, action))
        }
    }

    /// Resolve a pending `Connect`.
    pub fn on_connect_result(&mut self, success: bool) -> Result<SessionStatus, ChatError> {
        let next = if success {
            SessionStatus::Connected
        } else {
            SessionStatus::Disconnected
        };
        self.transition_from_any_of(&[SessionStatus::Connecting], next, "on_connect_result")
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[SessionStatus],
        next: SessionStatus,
        action: &str,
    ) -> Result<SessionStatus, ChatError> {
        if !expected.contains(&self.status) {
            return Err(ChatError::invalid_state(self.status, action));
        }
        self.status = next;
        Ok(next)
    }
}
