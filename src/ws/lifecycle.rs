//! Connection lifecycle state machine
//!
//! `Connecting -> Open -> Closing -> Closed`, with `Reconnecting` entered only from a
//! `Closed` that was not an explicit leave. Both the server session and the client
//! engine drive their connections through [`Lifecycle`].

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
    Reconnecting,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Open)
                | (Connecting, Closing)
                | (Connecting, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
                | (Closed, Reconnecting)
                | (Reconnecting, Connecting)
                | (Reconnecting, Open)
                | (Reconnecting, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// How a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Explicit leave or normal close frame
    Normal,
    /// Read/write failure or a stream that ended without a close handshake
    Abnormal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Guarded state holder
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: SessionState,
    /// Set once the connection ends for good
    terminal: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
            terminal: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn is_reconnecting(&self) -> bool {
        self.state == SessionState::Reconnecting
    }

    pub fn transition(&mut self, next: SessionState) -> Result<SessionState, InvalidTransition> {
        if self.terminal || !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }

    /// Record a connection end. Returns the resulting state: `Reconnecting` after an
    /// abnormal close (unless the lifecycle is already terminal), `Closed` otherwise.
    pub fn close(&mut self, kind: CloseKind) -> SessionState {
        if self.terminal {
            return self.state;
        }
        self.state = SessionState::Closed;
        match kind {
            CloseKind::Normal => {
                self.terminal = true;
            }
            CloseKind::Abnormal => {
                self.state = SessionState::Reconnecting;
            }
        }
        self.state
    }

    /// End the lifecycle for good (explicit leave, budget exhausted, stop)
    pub fn finish(&mut self) {
        self.state = SessionState::Closed;
        self.terminal = true;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
