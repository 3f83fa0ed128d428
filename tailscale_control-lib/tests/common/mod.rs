use std::cell::RefCell;

use tailscale_control_lib::control::Control;
use tailscale_control_lib::identity::IdentitySource;
use tailscale_control_lib::runner::{Outcome, Runner};
use tailscale_control_lib::settings::Store;
use tailscale_control_lib::supervisor::Supervisor;
use tempfile::TempDir;

pub const SERVICE_DIR: &str = "/service/tailscale-backend";

pub fn ok(stdout: &str) -> Outcome {
    Outcome::Ok {
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failed(stdout: &str, stderr: &str) -> Outcome {
    Outcome::Failed {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        code: Some(1),
    }
}

pub fn backend_up() -> Outcome {
    ok("/service/tailscale-backend: up (pid 842) 120 seconds")
}

pub fn backend_down() -> Outcome {
    ok("/service/tailscale-backend: down 3 seconds, normally up")
}

/// Scripted [`Runner`] for driving the control loop: rules are
/// prefix-matched against the joined command line (later rules win) and
/// every invocation is recorded for assertions.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: RefCell<Vec<(String, Outcome)>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        ScriptedRunner::default()
    }

    pub fn on(self, prefix: &str, outcome: Outcome) -> Self {
        self.set(prefix, outcome);
        self
    }

    pub fn set(&self, prefix: &str, outcome: Outcome) {
        self.rules.borrow_mut().push((prefix.to_string(), outcome));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count_calls(&self, fragment: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.contains(fragment))
            .count()
    }

    fn dispatch(&self, line: String) -> Outcome {
        self.calls.borrow_mut().push(line.clone());
        let rules = self.rules.borrow();
        rules
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or(Outcome::Unavailable)
    }
}

impl Runner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str]) -> Outcome {
        let line = if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        };
        self.dispatch(line)
    }

    fn run_shell(&self, script: &str) -> Outcome {
        self.dispatch(format!("sh -c {script}"))
    }
}

pub fn control_with_settings(dir: &TempDir, settings_toml: &str) -> Control {
    let path = dir.path().join("settings.toml");
    std::fs::write(&path, settings_toml).expect("write settings");
    let store = Store::load(&path).expect("load settings");
    Control::new(
        store,
        Supervisor::new(SERVICE_DIR),
        IdentitySource::new(dir.path().join("system-name")),
        "tailscale".to_string(),
    )
}
