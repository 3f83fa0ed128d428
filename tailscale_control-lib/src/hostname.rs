use regex::Regex;

use std::sync::LazyLock;

use crate::settings::Store;

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\\]+").expect("valid pattern"));
static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| Regex::new("[^a-z0-9-]").expect("valid pattern"));

/// Derive a valid machine name from a free-form system name.
///
/// Whitespace and backslashes become hyphens, the rest is lowercased and
/// reduced to `[a-z0-9-]` with no leading or trailing hyphens. Idempotent:
/// sanitizing an already sanitized name is a no-op.
pub fn sanitize(name: &str) -> String {
    let name = SEPARATORS.replace_all(name, "-").to_lowercase();
    let name = DISALLOWED.replace_all(&name, "");
    name.trim_matches('-').to_string()
}

/// Keeps the configured machine name in sync with the externally managed
/// system name, without ever clobbering a name the user set manually.
#[derive(Debug, Default)]
pub struct Reconciler {
    previous_identity: String,
}

impl Reconciler {
    pub fn new() -> Self {
        Reconciler::default()
    }

    /// Called once per tick. `identity` is the current system name, `None`
    /// when the source is unreadable (treated as unchanged);
    /// `system_hostname` is the kernel's network hostname, used both as
    /// the "was auto-derived" marker and as the last-resort machine name.
    pub fn observe(&mut self, store: &mut Store, identity: Option<&str>, system_hostname: &str) {
        let current = match identity {
            Some(value) => value.to_string(),
            None => self.previous_identity.clone(),
        };

        if current != self.previous_identity {
            tracing::info!(from = %self.previous_identity, to = %current, "system name changed");
            let configured = store.settings().hostname.clone();
            // only replace a name that was derived, never a manually set one
            if sanitize(&self.previous_identity) == configured || system_hostname == configured {
                let derived = sanitize(&current);
                tracing::info!(from = %configured, to = %derived, "machine name follows system name");
                store.set_hostname(&derived);
            }
            self.previous_identity = current.clone();
        }

        if store.settings().hostname.is_empty() {
            if !current.is_empty() {
                let derived = sanitize(&current);
                tracing::info!(name = %derived, "deriving machine name from system name");
                store.set_hostname(&derived);
            } else if !system_hostname.is_empty() {
                tracing::info!(name = %system_hostname, "using system hostname as machine name");
                store.set_hostname(system_hostname);
            }
        }
    }
}
