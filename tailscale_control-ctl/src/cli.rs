use clap::{Parser, Subcommand};

use std::path::PathBuf;

use tailscale_control_lib::command::Command as LibCommand;
use tailscale_control_lib::{control, socket};

/// Tailscale control CLI - queries and drives the supervision service
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Specify socket path
    #[arg(
        short,
        long,
        env = socket::ENV_VAR,
        default_value = socket::DEFAULT_PATH
    )]
    pub socket_path: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Query current connection status
    #[command()]
    Status {
        /// Format output as json
        #[arg(long)]
        json: bool,
    },

    /// Log this device out of the mesh
    #[command()]
    Logout,

    /// Check whether the service is responsive
    #[command()]
    Ping,
}

impl From<&Command> for LibCommand {
    fn from(command: &Command) -> Self {
        match command {
            Command::Status { .. } => LibCommand::Status,
            Command::Logout => LibCommand::Gui(control::GUI_COMMAND_LOGOUT.to_string()),
            Command::Ping => LibCommand::Ping,
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
