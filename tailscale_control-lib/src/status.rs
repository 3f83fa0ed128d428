use crate::runner::Outcome;
use crate::state::ConnectionState;

// Markers matched against the human-readable output of the client's
// `status` subcommand. Positional and textual by construction; any change
// in the client's output format is a breaking change here.
const MARKER_CONNECTION_REFUSED: &str = "Failed to connect";
const MARKER_STOPPED: &str = "Tailscale is stopped";
const MARKER_LOGIN: &str = "Log in at";
const LOGIN_PREFIX: &str = "Log in at: ";
const MARKER_LOGGED_OUT: &str = "Logged out";
const MARKER_NO_STATE: &str = "unexpected state:";

/// What a single `status` poll told us.
///
/// `state` is `None` when the poll produced no usable information — the
/// orchestrator then holds its current state instead of guessing.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Classification {
    pub state: Option<ConnectionState>,
    pub login_url: Option<String>,
    pub self_hostname: Option<String>,
}

impl Classification {
    fn update(state: ConnectionState) -> Self {
        Classification {
            state: Some(state),
            ..Classification::default()
        }
    }
}

/// Classify the output of the client's `status` subcommand.
///
/// Markers are substring matches on multi-line text, so the specific ones
/// must run before the generic exit-zero fallback.
/// `previous` is last tick's state; a "Logged out" report during
/// `WaitingForResponse` is transient noise from a login in flight and
/// yields no update. `published_ipv4` is the currently-published address,
/// used to locate this node's own row in the peer table.
pub fn classify(outcome: &Outcome, previous: ConnectionState, published_ipv4: &str) -> Classification {
    let (stdout, stderr, exit_zero) = match outcome {
        Outcome::Ok { stdout, stderr } => (stdout, stderr, true),
        Outcome::Failed { stdout, stderr, .. } => (stdout, stderr, false),
        Outcome::Unavailable => return Classification::default(),
    };

    if stderr.contains(MARKER_CONNECTION_REFUSED) {
        return Classification::update(ConnectionState::ConnectionFailed);
    }
    if stdout.contains(MARKER_STOPPED) {
        return Classification::update(ConnectionState::Stopped);
    }
    if stdout.contains(MARKER_LOGIN) {
        return Classification {
            state: Some(ConnectionState::WaitingForLogin),
            login_url: extract_login_url(stdout),
            self_hostname: None,
        };
    }
    if stdout.contains(MARKER_LOGGED_OUT) {
        // transiently reported while a login is being processed
        if previous == ConnectionState::WaitingForResponse {
            return Classification::default();
        }
        return Classification::update(ConnectionState::LoggedOut);
    }
    if stdout.contains(MARKER_NO_STATE) {
        return Classification::update(ConnectionState::NoState);
    }
    if exit_zero {
        return Classification {
            state: Some(ConnectionState::ConnectionOk),
            login_url: None,
            self_hostname: extract_self_hostname(stdout, published_ipv4),
        };
    }

    Classification::default()
}

fn extract_login_url(stdout: &str) -> Option<String> {
    let line = stdout.lines().find(|line| line.contains(MARKER_LOGIN))?;
    let url = line.replace(LOGIN_PREFIX, "").trim().to_string();
    if url.is_empty() { None } else { Some(url) }
}

// The connected status output lists one peer per line; the line carrying
// our own IPv4 address names this machine in its second column. The admin
// panel can rename a machine remotely, so this is authoritative.
fn extract_self_hostname(stdout: &str, published_ipv4: &str) -> Option<String> {
    if published_ipv4.is_empty() {
        return None;
    }
    stdout
        .lines()
        .find(|line| line.contains(published_ipv4))
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(stdout: &str) -> Outcome {
        Outcome::Ok {
            stdout: stdout.trim().to_string(),
            stderr: String::new(),
        }
    }

    fn failed(stdout: &str, stderr: &str) -> Outcome {
        Outcome::Failed {
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
            code: Some(1),
        }
    }

    #[test]
    fn no_output_yields_no_update() {
        let c = classify(&Outcome::Unavailable, ConnectionState::Initializing, "");
        assert_eq!(c, Classification::default());
    }

    #[test]
    fn connection_refused_on_stderr_wins_over_stdout() {
        let c = classify(
            &failed("Tailscale is stopped.", "Failed to connect to local Tailscale daemon"),
            ConnectionState::Initializing,
            "",
        );
        assert_eq!(c.state, Some(ConnectionState::ConnectionFailed));
    }

    #[test]
    fn stopped_marker_yields_stopped() {
        let c = classify(&failed("Tailscale is stopped.", ""), ConnectionState::Initializing, "");
        assert_eq!(c.state, Some(ConnectionState::Stopped));
    }

    #[test]
    fn login_marker_yields_waiting_for_login_with_url() {
        let c = classify(
            &ok("\nLog in at: https://login.example.com/a/b123\n"),
            ConnectionState::Initializing,
            "",
        );
        assert_eq!(c.state, Some(ConnectionState::WaitingForLogin));
        assert_eq!(c.login_url.as_deref(), Some("https://login.example.com/a/b123"));
    }

    #[test]
    fn logged_out_yields_logged_out() {
        let c = classify(&failed("Logged out.", ""), ConnectionState::Stopped, "");
        assert_eq!(c.state, Some(ConnectionState::LoggedOut));
    }

    #[test]
    fn logged_out_during_settlement_yields_no_update() {
        let c = classify(&failed("Logged out.", ""), ConnectionState::WaitingForResponse, "");
        assert_eq!(c, Classification::default());
    }

    #[test]
    fn unrecognized_internal_state_yields_no_state() {
        let c = classify(
            &failed("unexpected state: NoState", ""),
            ConnectionState::Initializing,
            "",
        );
        assert_eq!(c.state, Some(ConnectionState::NoState));
    }

    #[test]
    fn exit_zero_fallback_yields_connected_and_extracts_self_hostname() {
        let peers = "100.64.0.3   new-name   linux   -\n100.64.0.7   other-box  linux   idle";
        let c = classify(&ok(peers), ConnectionState::ConnectionOk, "100.64.0.3");
        assert_eq!(c.state, Some(ConnectionState::ConnectionOk));
        assert_eq!(c.self_hostname.as_deref(), Some("new-name"));
    }

    #[test]
    fn connected_without_published_address_extracts_nothing() {
        let c = classify(&ok("100.64.0.3   gx-device   linux   -"), ConnectionState::Stopped, "");
        assert_eq!(c.state, Some(ConnectionState::ConnectionOk));
        assert_eq!(c.self_hostname, None);
    }

    #[test]
    fn unrecognized_failure_yields_no_update() {
        let c = classify(&failed("something else entirely", ""), ConnectionState::Stopped, "");
        assert_eq!(c, Classification::default());
    }
}
