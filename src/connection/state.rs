//! Wire session state machine

use crate::{Error, Result};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket open, nothing sent yet
    Initial,

    /// SSLRequest sent, awaiting S/N
    NegotiatingTls,

    /// Startup sent, awaiting authentication request
    AwaitingAuth,

    /// Authentication exchange in progress
    Authenticating,

    /// Ready for a statement
    Idle,

    /// Statement sent, reading until ReadyForQuery
    Busy,

    /// An I/O or protocol failure left the stream unusable
    Broken,

    /// Terminated
    Closed,
}

impl SessionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Initial, NegotiatingTls)
                | (Initial, AwaitingAuth)
                | (NegotiatingTls, AwaitingAuth)
                | (AwaitingAuth, Authenticating)
                | (Authenticating, Idle)
                | (Idle, Busy)
                | (Busy, Idle)
                | (Initial | NegotiatingTls | AwaitingAuth | Authenticating | Idle | Busy, Broken)
                | (_, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {}", self),
                actual: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }

    /// Whether statements may still be issued
    pub fn is_usable(&self) -> bool {
        matches!(self, SessionState::Idle)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initial => "initial",
            Self::NegotiatingTls => "negotiating_tls",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Authenticating => "authenticating",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Broken => "broken",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_path() {
        let mut state = SessionState::Initial;
        assert!(state.transition(SessionState::NegotiatingTls).is_ok());
        assert!(state.transition(SessionState::AwaitingAuth).is_ok());
        assert!(state.transition(SessionState::Authenticating).is_ok());
        assert!(state.transition(SessionState::Idle).is_ok());
        assert!(state.is_usable());
    }

    #[test]
    fn test_statement_round_trip() {
        let mut state = SessionState::Idle;
        assert!(state.transition(SessionState::Busy).is_ok());
        assert!(!state.is_usable());
        assert!(state.transition(SessionState::Idle).is_ok());
    }

    #[test]
    fn test_cannot_skip_authentication() {
        let mut state = SessionState::Initial;
        assert!(state.transition(SessionState::Idle).is_err());
        assert_eq!(state, SessionState::Initial);
    }

    #[test]
    fn test_broken_is_terminal_except_close() {
        let mut state = SessionState::Busy;
        assert!(state.transition(SessionState::Broken).is_ok());
        assert!(state.transition(SessionState::Idle).is_err());
        assert!(state.transition(SessionState::Closed).is_ok());
    }

    #[test]
    fn test_close_from_any_state() {
        for mut state in [SessionState::Initial, SessionState::Busy, SessionState::Broken] {
            assert!(state.transition(SessionState::Closed).is_ok());
        }
    }
}
