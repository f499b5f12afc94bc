//! Session lifecycle state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one bridging attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Constructed, nothing acquired yet
    Idle,
    /// Peer connection built, tracks added, waiting for ICE gathering
    Negotiating,
    /// Gateway conversation running (join + publish)
    Signaling,
    /// Remote answer applied, media flowing
    Live,
    /// Releasing resources
    Closing,
    /// Everything released; terminal
    Closed,
}

impl SessionState {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Idle, Negotiating) => true,
            (Negotiating, Signaling) => true,
            (Signaling, Live) => true,

            // Any non-terminal state may start closing
            (Idle | Negotiating | Signaling | Live, Closing) => true,
            (Closing, Closed) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "negotiating",
            SessionState::Signaling => "signaling",
            SessionState::Live => "live",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
