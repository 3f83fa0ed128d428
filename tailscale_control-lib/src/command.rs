use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::state::ConnectionState;

/// Commands accepted over the service socket.
#[derive(Debug, Serialize, Deserialize)]
pub enum Command {
    /// Query the current observable status.
    Status,
    /// A GUI-issued action, drained by the control loop on its next tick.
    /// Unrecognized strings are logged and ignored there.
    Gui(String),
    Ping,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Status(StatusResponse),
    /// The command was placed in the inbox; the next tick acts on it.
    CommandAccepted,
    Pong,
}

/// The published status fields, as served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: ConnectionState,
    pub state_code: u8,
    pub ipv4: String,
    pub ipv6: String,
    /// Empty unless a login is currently being waited for.
    pub login_url: String,
    pub error_message: String,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match serde_json::to_string(self) {
            Ok(s) => s,
            Err(e) => format!("serialization error: {e}"),
        };
        write!(f, "{s}")
    }
}

impl FromStr for Command {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_round_trip_through_the_wire_format() -> anyhow::Result<()> {
        let wire = Command::Gui("logout".to_string()).to_string();
        match wire.parse::<Command>()? {
            Command::Gui(cmd) => assert_eq!(cmd, "logout"),
            other => panic!("expected Gui command, got {other:?}"),
        }
        Ok(())
    }
}
