use humantime::format_duration;
use regex::Regex;

use std::sync::LazyLock;
use std::time::Duration;

use crate::hostname;
use crate::routes;
use crate::runner::Runner;
use crate::settings::Store;

/// Bounds the synchronous wait of the `up`/`login` calls so a tick never
/// blocks on them; the real outcome is picked up by later status polls.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

static SCHEME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9+.-]*://").expect("valid pattern"));
static SERVER_DISALLOWED: LazyLock<Regex> = LazyLock::new(|| Regex::new("[^a-z0-9.:-]").expect("valid pattern"));
static EXTRA_DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-zA-Z0-9_=+:., -]").expect("valid pattern"));

/// Flags for the next reconciling command, plus what the route decision
/// means for kernel forwarding.
#[derive(Debug)]
pub struct BuiltArgs {
    pub flags: Vec<String>,
    advertises_routes: bool,
    wants_exit_node: bool,
}

impl BuiltArgs {
    pub fn forwarding_wanted(&self) -> bool {
        self.advertises_routes || self.wants_exit_node
    }
}

/// Normalize a custom coordination-server value to a bare host reference:
/// lowercased, scheme stripped, reduced to `[a-z0-9.:-]`.
pub fn sanitize_login_server(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let stripped = SCHEME.replace(&lowered, "");
    SERVER_DISALLOWED.replace_all(&stripped, "").to_string()
}

/// Split the free-form extra-arguments field into tokens, dropping every
/// character that could smuggle shell or argument structure.
pub fn sanitize_extra_arguments(raw: &str) -> Vec<String> {
    let cleaned = EXTRA_DISALLOWED.replace_all(raw, "");
    cleaned.split_whitespace().map(str::to_string).collect()
}

/// Assemble the argument list for the next `up`/`login` call from the
/// configuration surface. Only invoked on actionable state transitions:
/// the route probing costs external calls and the result feeds the
/// forwarding toggle.
pub fn build(runner: &dyn Runner, store: &mut Store) -> BuiltArgs {
    let mut flags = vec![format!("--timeout={}", format_duration(RESPONSE_TIMEOUT))];

    let advertised = routes::collect(runner, store.settings());
    if !advertised.is_empty() {
        flags.push(format!("--advertise-routes={}", advertised.join(",")));
    }

    let machine_name = hostname::sanitize(&store.settings().hostname);
    if !machine_name.is_empty() {
        flags.push(format!("--hostname={machine_name}"));
    }

    let raw_server = store.settings().custom_server_url.clone();
    let server = sanitize_login_server(&raw_server);
    if server != raw_server {
        // keep the persisted value normalized
        store.set_custom_server_url(&server);
    }
    if !server.is_empty() {
        flags.push(format!("--login-server=https://{server}"));
    }

    let extra = sanitize_extra_arguments(&store.settings().custom_arguments);
    // the root filesystem is read-only; the client must not try to persist
    // resolver changes
    if !extra.iter().any(|arg| arg.starts_with("--accept-dns")) {
        flags.push("--accept-dns=false".to_string());
    }
    let wants_exit_node = extra.iter().any(|arg| arg.contains("exit-node"));
    flags.extend(extra);

    BuiltArgs {
        flags,
        advertises_routes: !advertised.is_empty(),
        wants_exit_node,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Outcome;
    use crate::settings::Store;
    use tempfile::TempDir;

    struct NoDevices;

    impl Runner for NoDevices {
        fn run(&self, _program: &str, _args: &[&str]) -> Outcome {
            Outcome::Failed {
                stdout: String::new(),
                stderr: "Device does not exist.".to_string(),
                code: Some(1),
            }
        }

        fn run_shell(&self, _script: &str) -> Outcome {
            Outcome::Unavailable
        }
    }

    fn store(dir: &TempDir, content: &str) -> Store {
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, content).expect("write settings");
        Store::load(&path).expect("load settings")
    }

    #[test]
    fn timeout_flag_is_always_first() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = store(&dir, "");
        let built = build(&NoDevices, &mut store);
        assert_eq!(built.flags[0], "--timeout=500ms");
        Ok(())
    }

    #[test]
    fn empty_settings_yield_timeout_and_dns_override_only() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = store(&dir, "");
        let built = build(&NoDevices, &mut store);
        assert_eq!(built.flags, vec!["--timeout=500ms", "--accept-dns=false"]);
        assert!(!built.forwarding_wanted());
        Ok(())
    }

    #[test]
    fn custom_networks_are_sanitized_and_advertised() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = store(&dir, "advertise_routes = \"10.0.0.0/24,!!bad;192.168.1.0/24\"");
        let built = build(&NoDevices, &mut store);
        assert!(
            built
                .flags
                .contains(&"--advertise-routes=10.0.0.0/24,192.168.1.0/24".to_string())
        );
        assert!(built.forwarding_wanted());
        Ok(())
    }

    #[test]
    fn hostname_is_sanitized_before_emission() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = store(&dir, "hostname = \"My Boat!\"");
        let built = build(&NoDevices, &mut store);
        assert!(built.flags.contains(&"--hostname=my-boat".to_string()));
        Ok(())
    }

    #[test]
    fn login_server_is_normalized_and_written_back() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = store(&dir, "custom_server_url = \"HTTPS://Headscale.example.com/\"");
        let built = build(&NoDevices, &mut store);
        assert!(
            built
                .flags
                .contains(&"--login-server=https://headscale.example.com".to_string())
        );
        assert_eq!(store.settings().custom_server_url, "headscale.example.com");
        Ok(())
    }

    #[test]
    fn dns_override_yields_to_explicit_flag_in_extra_arguments() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = store(&dir, "custom_arguments = \"--accept-dns=true\"");
        let built = build(&NoDevices, &mut store);
        assert!(built.flags.contains(&"--accept-dns=true".to_string()));
        assert!(!built.flags.contains(&"--accept-dns=false".to_string()));
        Ok(())
    }

    #[test]
    fn extra_arguments_lose_shell_metacharacters() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = store(&dir, "custom_arguments = \"--shields-up; rm -rf /tmp $(reboot)\"");
        let built = build(&NoDevices, &mut store);
        assert!(built.flags.contains(&"--shields-up".to_string()));
        assert!(built.flags.iter().all(|flag| !flag.contains([';', '$', '(', ')', '/'])));
        Ok(())
    }

    #[test]
    fn exit_node_in_extra_arguments_requests_forwarding() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = store(&dir, "custom_arguments = \"--advertise-exit-node\"");
        let built = build(&NoDevices, &mut store);
        assert!(built.forwarding_wanted());
        Ok(())
    }
}
