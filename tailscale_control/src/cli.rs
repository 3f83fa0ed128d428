use clap::Parser;

use std::path::PathBuf;

use tailscale_control_lib::{control, identity, settings, socket, supervisor};

/// Tailscale system service - supervises this device's connection to the mesh
#[derive(Debug, Clone, Parser)]
#[command(version)]
pub struct Cli {
    /// Specify socket path
    #[arg(
        short,
        long,
        env = socket::ENV_VAR,
        default_value = socket::DEFAULT_PATH
    )]
    pub socket_path: PathBuf,

    /// Specify settings file path
    #[arg(
        short = 'c',
        long,
        env = settings::ENV_VAR,
        default_value = settings::DEFAULT_PATH
    )]
    pub settings_path: PathBuf,

    /// Specify client binary
    #[arg(
        long,
        env = control::ENV_VAR_CLIENT_BIN,
        default_value = control::DEFAULT_CLIENT_BIN
    )]
    pub client_bin: PathBuf,

    /// Specify backend service directory
    #[arg(
        long,
        env = supervisor::ENV_VAR_SERVICE_DIR,
        default_value = supervisor::DEFAULT_SERVICE_DIR
    )]
    pub service_dir: PathBuf,

    /// Specify system identity file
    #[arg(
        long,
        env = identity::ENV_VAR,
        default_value = identity::DEFAULT_PATH
    )]
    pub identity_path: PathBuf,
}

pub fn parse() -> Cli {
    Cli::parse()
}
