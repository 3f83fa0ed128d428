use std::fs;
use std::path::PathBuf;

pub const DEFAULT_PATH: &str = "/data/conf/system-name";
pub const ENV_VAR: &str = "TAILSCALE_CONTROL_IDENTITY_FILE";

/// Read-only source of the externally managed system name (the
/// installation name the user sees in the GUI). Queried once per tick.
#[derive(Debug)]
pub struct IdentitySource {
    path: PathBuf,
}

impl IdentitySource {
    pub fn new(path: PathBuf) -> Self {
        IdentitySource { path }
    }

    /// `None` when the source cannot be read; callers treat that as
    /// "unchanged since last tick".
    pub fn read(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "system identity not readable");
                None
            }
        }
    }
}

/// The kernel's network hostname, used as the machine-name fallback.
pub fn system_hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|content| content.trim().to_string())
        .unwrap_or_default()
}
