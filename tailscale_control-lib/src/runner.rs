use std::process::Command;

/// Result of invoking an external program.
///
/// Distinguishes "the program ran and failed" from "the program could not
/// be launched at all" (missing binary, permissions). Callers treat
/// [`Outcome::Unavailable`] as "no information this tick" and never abort
/// the control loop over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Program ran and exited zero.
    Ok { stdout: String, stderr: String },
    /// Program ran but exited non-zero. Stdout is retained because the
    /// client prints status markers on stdout even when exiting non-zero.
    Failed {
        stdout: String,
        stderr: String,
        code: Option<i32>,
    },
    /// Program could not be launched.
    Unavailable,
}

impl Outcome {
    pub fn success(&self) -> bool {
        matches!(self, Outcome::Ok { .. })
    }

    pub fn stdout(&self) -> Option<&str> {
        match self {
            Outcome::Ok { stdout, .. } | Outcome::Failed { stdout, .. } => Some(stdout),
            Outcome::Unavailable => None,
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            Outcome::Ok { stderr, .. } | Outcome::Failed { stderr, .. } => Some(stderr),
            Outcome::Unavailable => None,
        }
    }
}

/// Executes external programs on behalf of the control loop.
///
/// All invocations are synchronous and blocking; long-running client calls
/// bound themselves with their own `--timeout` flag.
pub trait Runner {
    fn run(&self, program: &str, args: &[&str]) -> Outcome;

    /// Run a shell script through `/bin/sh -c`. Used only for fixed,
    /// compiled-in scripts (sysctl chains), never for configuration input.
    fn run_shell(&self, script: &str) -> Outcome;
}

/// [`Runner`] backed by real process spawning.
#[derive(Debug, Default)]
pub struct System;

impl Runner for System {
    fn run(&self, program: &str, args: &[&str]) -> Outcome {
        capture(Command::new(program).args(args))
    }

    fn run_shell(&self, script: &str) -> Outcome {
        capture(Command::new("/bin/sh").arg("-c").arg(script))
    }
}

fn capture(command: &mut Command) -> Outcome {
    let output = match command.output() {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(cmd = ?command, error = %e, "failed to launch command");
            return Outcome::Unavailable;
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if output.status.success() {
        Outcome::Ok { stdout, stderr }
    } else {
        Outcome::Failed {
            stdout,
            stderr,
            code: output.status.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_classifies_zero_exit_as_ok() {
        let outcome = System.run("echo", &["hello"]);
        assert_eq!(
            outcome,
            Outcome::Ok {
                stdout: "hello".to_string(),
                stderr: String::new(),
            }
        );
    }

    #[test]
    fn run_classifies_non_zero_exit_as_failed() {
        let outcome = System.run_shell("echo oops >&2; exit 3");
        match outcome {
            Outcome::Failed { stderr, code, .. } => {
                assert_eq!(stderr, "oops");
                assert_eq!(code, Some(3));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn run_classifies_missing_program_as_unavailable() {
        let outcome = System.run("/nonexistent/binary/for/sure", &[]);
        assert_eq!(outcome, Outcome::Unavailable);
    }
}
