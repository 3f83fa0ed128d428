use exitcode::ExitCode;

use std::process;

use tailscale_control_lib::command::{Command, Response, StatusResponse};
use tailscale_control_lib::socket;

mod cli;

// Avoid musl's default allocator due to degraded performance
// https://nickb.dev/blog/default-musl-allocator-considered-harmful-to-performance
#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    let args = cli::parse();

    let cmd: Command = (&args.command).into();
    let resp = match socket::process_cmd(&args.socket_path, &cmd) {
        Ok(resp) => resp,
        Err(e) => {
            eprintln!("Error processing {}: {}", cmd, e);
            process::exit(exitcode::UNAVAILABLE);
        }
    };

    let json = matches!(args.command, cli::Command::Status { json: true });
    process::exit(pretty_print(&resp, json));
}

fn pretty_print(resp: &Response, json: bool) -> ExitCode {
    // pretty print for users
    match resp {
        Response::Status(status) => {
            if json {
                return print_json(status);
            }
            println!("State: {} ({})", status.state, status.state_code);
            println!("IPv4: {}", status.ipv4);
            println!("IPv6: {}", status.ipv6);
            if !status.login_url.is_empty() {
                println!("Log in at: {}", status.login_url);
            }
            if !status.error_message.is_empty() {
                eprintln!("Error: {}", status.error_message);
            }
            exitcode::OK
        }
        Response::CommandAccepted => {
            println!("Command accepted");
            exitcode::OK
        }
        Response::Pong => {
            println!("Service is running");
            exitcode::OK
        }
    }
}

fn print_json(status: &StatusResponse) -> ExitCode {
    match serde_json::to_string_pretty(status) {
        Ok(s) => {
            println!("{s}");
            exitcode::OK
        }
        Err(e) => {
            eprintln!("Error serializing status: {e}");
            exitcode::SOFTWARE
        }
    }
}
