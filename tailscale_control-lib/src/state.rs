use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};

/// Discrete connection states derived from backend liveness and the
/// client's status output.
///
/// `WaitingForResponse` is the settlement state: it is entered only after
/// issuing a reconciling command (`up`, `login`, `logout`) and never
/// inferred from status text, so no second command is issued while one is
/// presumed in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Initializing,
    BackendStarting,
    BackendStopped,
    ConnectionFailed,
    Stopped,
    LoggedOut,
    WaitingForResponse,
    WaitingForLogin,
    NoState,
    ConnectionOk,
}

impl ConnectionState {
    /// Numeric code published on the status bus.
    pub fn code(&self) -> u8 {
        match self {
            ConnectionState::Initializing => 0,
            ConnectionState::BackendStarting => 1,
            ConnectionState::BackendStopped => 2,
            ConnectionState::ConnectionFailed => 3,
            ConnectionState::Stopped => 4,
            ConnectionState::LoggedOut => 5,
            ConnectionState::WaitingForResponse => 6,
            ConnectionState::WaitingForLogin => 7,
            ConnectionState::NoState => 8,
            ConnectionState::ConnectionOk => 100,
        }
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state_str = match self {
            ConnectionState::Initializing => "initializing",
            ConnectionState::BackendStarting => "backend starting",
            ConnectionState::BackendStopped => "backend stopped",
            ConnectionState::ConnectionFailed => "connection failed",
            ConnectionState::Stopped => "stopped",
            ConnectionState::LoggedOut => "logged out",
            ConnectionState::WaitingForResponse => "waiting for response",
            ConnectionState::WaitingForLogin => "waiting for login",
            ConnectionState::NoState => "no state",
            ConnectionState::ConnectionOk => "connected",
        };
        write!(f, "{}", state_str)
    }
}
