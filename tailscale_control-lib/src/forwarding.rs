use crate::runner::{Outcome, Runner};

// one shell invocation per direction; on the read-only root filesystem
// these values are runtime-only and reapplied after every boot
const ENABLE_SCRIPT: &str = "sysctl net.ipv4.ip_forward=1 && sysctl net.ipv6.conf.all.forwarding=1";
const DISABLE_SCRIPT: &str = "sysctl net.ipv4.ip_forward=0 && sysctl net.ipv6.conf.all.forwarding=0";

/// Idempotent kernel packet-forwarding switch.
///
/// Remembers the last value it applied itself (`None` until the first
/// successful toggle after process start) so repeated decisions with the
/// same outcome never shell out again. Failures are logged, not retried;
/// forwarding capability is best-effort.
#[derive(Debug, Default)]
pub struct Forwarding {
    applied: Option<bool>,
}

impl Forwarding {
    pub fn new() -> Self {
        Forwarding::default()
    }

    pub fn apply(&mut self, runner: &dyn Runner, wanted: bool) {
        if self.applied == Some(wanted) {
            return;
        }
        let script = if wanted { ENABLE_SCRIPT } else { DISABLE_SCRIPT };
        match runner.run_shell(script) {
            Outcome::Ok { .. } => {
                tracing::info!(enabled = wanted, "ip forwarding updated");
                self.applied = Some(wanted);
            }
            Outcome::Failed { stderr, code, .. } => {
                tracing::warn!(enabled = wanted, ?code, %stderr, "ip forwarding update failed");
            }
            Outcome::Unavailable => {
                tracing::warn!(enabled = wanted, "ip forwarding update could not be launched");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct CountingShell {
        scripts: RefCell<Vec<String>>,
        succeed: bool,
    }

    impl CountingShell {
        fn new(succeed: bool) -> Self {
            CountingShell {
                scripts: RefCell::new(Vec::new()),
                succeed,
            }
        }

        fn count(&self) -> usize {
            self.scripts.borrow().len()
        }
    }

    impl Runner for CountingShell {
        fn run(&self, _program: &str, _args: &[&str]) -> Outcome {
            Outcome::Unavailable
        }

        fn run_shell(&self, script: &str) -> Outcome {
            self.scripts.borrow_mut().push(script.to_string());
            if self.succeed {
                Outcome::Ok {
                    stdout: String::new(),
                    stderr: String::new(),
                }
            } else {
                Outcome::Failed {
                    stdout: String::new(),
                    stderr: "sysctl: permission denied".to_string(),
                    code: Some(1),
                }
            }
        }
    }

    #[test]
    fn repeated_identical_decisions_toggle_once() {
        let shell = CountingShell::new(true);
        let mut forwarding = Forwarding::new();
        for _ in 0..5 {
            forwarding.apply(&shell, true);
        }
        assert_eq!(shell.count(), 1);
    }

    #[test]
    fn value_changes_toggle_again() {
        let shell = CountingShell::new(true);
        let mut forwarding = Forwarding::new();
        forwarding.apply(&shell, true);
        forwarding.apply(&shell, false);
        forwarding.apply(&shell, true);
        assert_eq!(shell.count(), 3);
    }

    #[test]
    fn failures_do_not_latch_the_applied_value() {
        let shell = CountingShell::new(false);
        let mut forwarding = Forwarding::new();
        forwarding.apply(&shell, true);
        forwarding.apply(&shell, true);
        // still unapplied, so every decision retries on the next transition
        assert_eq!(shell.count(), 2);
    }
}
