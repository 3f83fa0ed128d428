use regex::Regex;

use std::sync::LazyLock;

use crate::runner::{Outcome, Runner};
use crate::settings::Settings;

static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9./,]").expect("valid pattern"));

/// Reduce a free-form network list to digits, dots, slashes and commas.
pub fn sanitize_networks(raw: &str) -> String {
    DISALLOWED.replace_all(raw, "").to_string()
}

/// CIDR network assigned to a local device, taken from its kernel route
/// table. Devices that do not exist or are not up yield nothing.
pub fn device_network(runner: &dyn Runner, device: &str) -> Option<String> {
    let link = runner.run("ip", &["link", "show", device]);
    let stdout = match &link {
        Outcome::Ok { stdout, .. } => stdout,
        _ => {
            tracing::debug!(%device, "device not present, skipping");
            return None;
        }
    };
    if !stdout.contains("state UP") {
        tracing::debug!(%device, "device not up, skipping");
        return None;
    }

    runner
        .run("ip", &["route", "show", "dev", device])
        .stdout()
        .and_then(|stdout| {
            stdout.lines().find_map(|line| {
                line.split_whitespace()
                    .next()
                    .filter(|token| token.contains('/'))
                    .map(str::to_string)
            })
        })
}

/// Routes to advertise to the mesh: the networks of all enabled local
/// devices united with the custom networks field, duplicates removed.
pub fn collect(runner: &dyn Runner, settings: &Settings) -> Vec<String> {
    let mut routes: Vec<String> = Vec::new();

    for (device, enabled) in settings.interfaces.iter() {
        if !enabled {
            continue;
        }
        if let Some(network) = device_network(runner, device) {
            if !routes.contains(&network) {
                routes.push(network);
            }
        }
    }

    for network in sanitize_networks(&settings.advertise_routes).split(',') {
        if network.is_empty() {
            continue;
        }
        let network = network.to_string();
        if !routes.contains(&network) {
            routes.push(network);
        }
    }

    routes
}
