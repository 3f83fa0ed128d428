use crate::runner::{Outcome, Runner};

pub const DEFAULT_SERVICE_DIR: &str = "/service/tailscale-backend";
pub const ENV_VAR_SERVICE_DIR: &str = "TAILSCALE_CONTROL_SERVICE_DIR";

/// What the service supervisor knows about the backend agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    NotRunning,
    /// The service is not registered with the supervisor at all.
    Unknown,
}

/// Boundary to the daemontools-style supervision of the backend service.
#[derive(Debug)]
pub struct Supervisor {
    service_dir: String,
}

impl Supervisor {
    pub fn new(service_dir: impl Into<String>) -> Self {
        Supervisor {
            service_dir: service_dir.into(),
        }
    }

    pub fn probe(&self, runner: &dyn Runner) -> Liveness {
        let outcome = runner.run("svstat", &[&self.service_dir]);
        if outcome == Outcome::Unavailable {
            tracing::warn!(service = %self.service_dir, "backend service cannot be probed");
            return Liveness::Unknown;
        }
        if outcome.stderr().is_some_and(|stderr| stderr.contains("does not exist")) {
            tracing::warn!(service = %self.service_dir, "backend service not in services");
            return Liveness::Unknown;
        }
        if outcome.stdout().is_some_and(|stdout| stdout.contains(": up")) {
            Liveness::Running
        } else {
            Liveness::NotRunning
        }
    }

    pub fn start(&self, runner: &dyn Runner) {
        match runner.run("svc", &["-u", &self.service_dir]) {
            Outcome::Ok { .. } => (),
            outcome => tracing::error!(service = %self.service_dir, ?outcome, "starting backend service failed"),
        }
    }

    pub fn stop(&self, runner: &dyn Runner) {
        match runner.run("svc", &["-d", &self.service_dir]) {
            Outcome::Ok { .. } => (),
            outcome => tracing::error!(service = %self.service_dir, ?outcome, "stopping backend service failed"),
        }
    }
}
