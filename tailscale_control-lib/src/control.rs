use crate::client_args;
use crate::command::StatusResponse;
use crate::forwarding::Forwarding;
use crate::hostname::Reconciler;
use crate::identity::{self, IdentitySource};
use crate::runner::{Outcome, Runner};
use crate::settings::{Settings, Store};
use crate::state::ConnectionState;
use crate::status;
use crate::supervisor::{Liveness, Supervisor};

pub const DEFAULT_CLIENT_BIN: &str = "/usr/bin/tailscale";
pub const ENV_VAR_CLIENT_BIN: &str = "TAILSCALE_CONTROL_CLIENT_BIN";

pub const GUI_COMMAND_LOGOUT: &str = "logout";

/// Fields republished at the end of every tick; what the status bus
/// serves to clients.
#[derive(Debug, Clone)]
pub struct Published {
    pub state: ConnectionState,
    pub ipv4: String,
    pub ipv6: String,
    pub login_url: String,
    pub error_message: String,
}

impl Default for Published {
    fn default() -> Self {
        Published {
            state: ConnectionState::Initializing,
            ipv4: String::new(),
            ipv6: String::new(),
            login_url: String::new(),
            error_message: String::new(),
        }
    }
}

/// The connection-state orchestrator.
///
/// Driven by an external one-second tick; each tick runs to completion
/// before the next is scheduled, so all state lives here unguarded. At
/// most one reconciling command is issued per tick, and the settlement
/// state (`WaitingForResponse`) keeps further commands back while an
/// asynchronous client operation is presumed in flight.
pub struct Control {
    client_bin: String,
    store: Store,
    supervisor: Supervisor,
    identity: IdentitySource,
    reconciler: Reconciler,
    forwarding: Forwarding,
    state: ConnectionState,
    previous: ConnectionState,
    inbox: Option<String>,
    published: Published,
}

impl Control {
    pub fn new(store: Store, supervisor: Supervisor, identity: IdentitySource, client_bin: String) -> Self {
        Control {
            client_bin,
            store,
            supervisor,
            identity,
            reconciler: Reconciler::new(),
            forwarding: Forwarding::new(),
            state: ConnectionState::Initializing,
            previous: ConnectionState::Initializing,
            inbox: None,
            published: Published::default(),
        }
    }

    /// Hand a GUI-issued command to the next tick. At-most-once delivery:
    /// a command written before the previous one was drained replaces it.
    pub fn submit_gui_command(&mut self, command: String) {
        if let Some(stale) = &self.inbox {
            tracing::warn!(%stale, "overwriting undrained command");
        }
        self.inbox = Some(command);
    }

    pub fn reload_settings(&mut self) {
        self.store.reload();
    }

    pub fn settings(&self) -> &Settings {
        self.store.settings()
    }

    pub fn published(&self) -> &Published {
        &self.published
    }

    pub fn snapshot(&self) -> StatusResponse {
        StatusResponse {
            state: self.published.state,
            state_code: self.published.state.code(),
            ipv4: self.published.ipv4.clone(),
            ipv6: self.published.ipv6.clone(),
            login_url: self.published.login_url.clone(),
            error_message: self.published.error_message.clone(),
        }
    }

    pub fn log_client_version(&self, runner: &dyn Runner) {
        match runner.run(&self.client_bin, &["version"]) {
            Outcome::Ok { stdout, .. } => match stdout.lines().next() {
                Some(version) => tracing::info!(%version, "client binary version"),
                None => tracing::warn!("client binary reported an empty version"),
            },
            outcome => tracing::warn!(?outcome, "client binary version not available"),
        }
    }

    /// One pass of the supervisory loop. Never fails: every external
    /// problem is logged and converted into unchanged-or-degraded state;
    /// the next tick's poll is the retry.
    pub fn tick(&mut self, runner: &dyn Runner) {
        let mut login_url = String::new();

        // keep the machine name in sync with the system identity
        let identity = self.identity.read();
        self.reconciler
            .observe(&mut self.store, identity.as_deref(), &identity::system_hostname());

        let mut liveness = self.supervisor.probe(runner);
        let enabled = self.store.settings().enabled;

        if enabled && liveness == Liveness::NotRunning {
            tracing::info!("starting backend service");
            self.supervisor.start(runner);
            self.state = ConnectionState::BackendStarting;
        } else if !enabled && liveness == Liveness::Running {
            // flush pending config changes before the service goes away
            match runner.run(&self.client_bin, &["down"]) {
                Outcome::Ok { .. } => tracing::info!("client connection brought down"),
                outcome => tracing::error!(?outcome, "client down failed"),
            }
            tracing::info!("stopping backend service");
            self.supervisor.stop(runner);
            liveness = Liveness::NotRunning;
        }

        // a stale error is meaningless while the service is disabled
        if !enabled && !self.published.error_message.is_empty() {
            self.published.error_message.clear();
        }

        if liveness == Liveness::Running {
            self.drain_inbox(runner);
            self.poll_status(runner, &mut login_url);
            self.reconcile_on_transition(runner);
            self.publish_addresses(runner);
        } else {
            // backend-liveness sub-cycle; a start issued above keeps its state
            if self.state != ConnectionState::BackendStarting {
                self.state = ConnectionState::BackendStopped;
            }
            self.published.ipv4.clear();
            self.published.ipv6.clear();
        }

        self.published.state = self.state;
        self.published.login_url = login_url;
        self.previous = self.state;
    }

    fn drain_inbox(&mut self, runner: &dyn Runner) {
        // clear before acting so a command arriving mid-processing is not
        // silently merged into this one
        let Some(command) = self.inbox.take() else {
            return;
        };
        match command.as_str() {
            GUI_COMMAND_LOGOUT => {
                tracing::info!("logout command received");
                // logout supports no timeout flag; publish the settlement
                // state up front so the GUI gets instant feedback
                self.published.state = ConnectionState::WaitingForResponse;
                match runner.run(&self.client_bin, &["logout"]) {
                    Outcome::Ok { .. } => self.state = ConnectionState::WaitingForResponse,
                    Outcome::Failed { stderr, code, .. } => {
                        tracing::error!(?code, %stderr, "client logout failed");
                    }
                    Outcome::Unavailable => tracing::error!("client logout could not be launched"),
                }
            }
            other => tracing::warn!(command = %other, "ignoring unrecognized command"),
        }
    }

    fn poll_status(&mut self, runner: &dyn Runner, login_url: &mut String) {
        let outcome = runner.run(&self.client_bin, &["status"]);
        let classification = status::classify(&outcome, self.previous, &self.published.ipv4);
        if let Some(state) = classification.state {
            self.state = state;
        }
        if let Some(url) = classification.login_url {
            *login_url = url;
        }
        if let Some(name) = classification.self_hostname {
            let configured = self.store.settings().hostname.clone();
            if name != configured {
                // the admin panel is authoritative once connected
                tracing::info!(from = %configured, to = %name, "machine name changed remotely");
                self.store.set_hostname(&name);
            }
        }
    }

    fn reconcile_on_transition(&mut self, runner: &dyn Runner) {
        if self.state == self.previous {
            return;
        }
        let actionable = matches!(
            self.state,
            ConnectionState::Stopped | ConnectionState::LoggedOut | ConnectionState::NoState
        ) && self.previous != ConnectionState::WaitingForResponse;
        if !actionable {
            return;
        }

        let built = client_args::build(runner, &mut self.store);
        self.forwarding.apply(runner, built.forwarding_wanted());

        let mut invocation = match self.state {
            // `up` reconnects if the login is still valid, or asks for a
            // login otherwise; the next status polls tell which
            ConnectionState::Stopped => vec!["up", "--reset"],
            ConnectionState::LoggedOut => vec!["login"],
            // the backend settles on its own from here
            _ => return,
        };
        invocation.extend(built.flags.iter().map(String::as_str));

        tracing::info!(args = ?invocation, "issuing reconciling command");
        match runner.run(&self.client_bin, &invocation) {
            Outcome::Ok { .. } => {
                self.published.error_message.clear();
                self.state = ConnectionState::WaitingForResponse;
            }
            Outcome::Failed { stderr, code, .. } => {
                tracing::error!(?code, %stderr, "reconciling command failed");
                self.published.error_message = collapse_whitespace(&stderr);
            }
            Outcome::Unavailable => tracing::error!("client binary could not be launched"),
        }
    }

    fn publish_addresses(&mut self, runner: &dyn Runner) {
        if self.state != ConnectionState::ConnectionOk {
            self.published.ipv4.clear();
            self.published.ipv6.clear();
            return;
        }
        if self.previous != ConnectionState::ConnectionOk {
            tracing::info!("connection established");
        }

        let outcome = runner.run(&self.client_bin, &["ip"]);
        if !outcome.success() {
            tracing::error!(?outcome, "client ip query failed");
        }
        let mut lines = outcome.stdout().unwrap_or_default().lines();
        match lines.next() {
            Some(ipv4) if !ipv4.trim().is_empty() => {
                self.published.ipv4 = ipv4.trim().to_string();
                self.published.ipv6 = lines
                    .next()
                    .map(|line| line.trim().to_string())
                    .unwrap_or_else(|| "?".to_string());
            }
            _ => {
                // connected, but no addresses reported yet
                self.published.ipv4 = "?".to_string();
                self.published.ipv6 = "?".to_string();
            }
        }
    }
}

// error text arrives as multi-line CLI output; the bus field is one line
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
