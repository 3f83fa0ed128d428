use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process;

use tailscale_control_lib::command::{Command, Response};
use tailscale_control_lib::control::Control;
use tailscale_control_lib::identity::IdentitySource;
use tailscale_control_lib::supervisor::Supervisor;
use tailscale_control_lib::{logging, runner, settings, socket};

mod cli;

// Avoid musl's default allocator due to degraded performance
// https://nickb.dev/blog/default-musl-allocator-considered-harmful-to-performance
#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

// settle fs event bursts before re-reading the settings file
const RELOAD_GRACE_PERIOD: Duration = Duration::from_millis(333);

async fn ctrlc_channel() -> Result<mpsc::Receiver<()>, exitcode::ExitCode> {
    let (sender, receiver) = mpsc::channel(32);
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
        tracing::error!(error = ?e, "error setting up SIGINT handler");
        exitcode::IOERR
    })?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
        tracing::error!(error = ?e, "error setting up SIGTERM handler");
        exitcode::IOERR
    })?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(_) = sigint.recv() => {
                    tracing::debug!("received SIGINT");
                    if sender.send(()).await.is_err() {
                        tracing::warn!("sigint: receiver closed");
                        break;
                    }
                },
                Some(_) = sigterm.recv() => {
                    tracing::debug!("received SIGTERM");
                    if sender.send(()).await.is_err() {
                        tracing::warn!("sigterm: receiver closed");
                        break;
                    }
                },
                else => {
                    tracing::warn!("sigint and sigterm streams closed");
                    break;
                }
            }
        }
    });

    Ok(receiver)
}

fn settings_channel(
    settings_path: &Path,
) -> Result<(RecommendedWatcher, mpsc::Receiver<notify::Event>), exitcode::ExitCode> {
    // the settings file may not exist yet, so the watch goes on its directory
    let parent = match settings_path.parent() {
        Some(parent) if parent != Path::new("") => parent,
        _ => {
            tracing::error!(settings_file = %settings_path.display(), "settings path has no parent directory");
            return Err(exitcode::UNAVAILABLE);
        }
    };
    if let Err(e) = fs::create_dir_all(parent) {
        tracing::error!(error = ?e, "error creating settings directory");
        return Err(exitcode::IOERR);
    }

    let (sender, receiver) = mpsc::channel(32);
    let mut watcher = match notify::recommended_watcher(move |res| match res {
        Ok(event) => {
            let _ = sender.blocking_send(event).map_err(|e| {
                tracing::error!(error = ?e, "error sending settings watch event");
            });
        }
        Err(e) => tracing::error!(error = ?e, "settings watch error"),
    }) {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::error!(error = ?e, "error creating settings watcher");
            return Err(exitcode::IOERR);
        }
    };

    if let Err(e) = watcher.watch(parent, RecursiveMode::NonRecursive) {
        tracing::error!(error = ?e, "error watching settings directory");
        return Err(exitcode::IOERR);
    }

    Ok((watcher, receiver))
}

async fn socket_channel(socket_path: &Path) -> Result<mpsc::Receiver<UnixStream>, exitcode::ExitCode> {
    match socket_path.try_exists() {
        Ok(true) => {
            tracing::info!("probing for running instance");
            match socket::process_cmd(socket_path, &Command::Ping) {
                Ok(_) => {
                    tracing::error!("system service is already running - cannot start another instance");
                    return Err(exitcode::TEMPFAIL);
                }
                Err(e) => {
                    tracing::debug!(warn = ?e, "done probing for running instance");
                }
            };
            fs::remove_file(socket_path).map_err(|e| {
                tracing::error!(error = ?e, "error removing stale socket file");
                exitcode::IOERR
            })?;
        }
        Ok(false) => (),
        Err(e) => {
            tracing::error!(error = ?e, "error checking socket path");
            return Err(exitcode::IOERR);
        }
    };

    let socket_dir = socket_path.parent().ok_or_else(|| {
        tracing::error!("socket path has no parent");
        exitcode::UNAVAILABLE
    })?;
    fs::create_dir_all(socket_dir).map_err(|e| {
        tracing::error!(error = %e, "error creating socket directory");
        exitcode::IOERR
    })?;

    let listener = UnixListener::bind(socket_path).map_err(|e| {
        tracing::error!(error = ?e, "error binding socket");
        exitcode::OSFILE
    })?;

    // update permissions to allow unprivileged access
    fs::set_permissions(socket_path, fs::Permissions::from_mode(0o666)).map_err(|e| {
        tracing::error!(error = ?e, "error setting socket permissions");
        exitcode::NOPERM
    })?;

    let (sender, receiver) = mpsc::channel(32);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    if let Err(e) = sender.send(stream).await {
                        tracing::error!(error = ?e, "sending incoming connection");
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "waiting for incoming connection");
                }
            }
        }
    });

    Ok(receiver)
}

async fn incoming_stream(stream: &mut UnixStream, control: &mut Control) {
    let mut msg = String::new();
    if let Err(e) = stream.read_to_string(&mut msg).await {
        tracing::error!(error = ?e, "error reading message");
        return;
    }

    let cmd = match msg.parse::<Command>() {
        Ok(cmd) => cmd,
        Err(e) => {
            tracing::error!(error = ?e, %msg, "error parsing command");
            return;
        }
    };

    tracing::debug!(command = %cmd, "incoming command");

    let resp = match cmd {
        Command::Status => Response::Status(control.snapshot()),
        Command::Gui(command) => {
            control.submit_gui_command(command);
            Response::CommandAccepted
        }
        Command::Ping => Response::Pong,
    };

    let str_resp = match serde_json::to_string(&resp) {
        Ok(res) => res,
        Err(e) => {
            tracing::error!(error = ?e, "error serializing response");
            return;
        }
    };

    if let Err(e) = stream.write_all(str_resp.as_bytes()).await {
        tracing::error!(error = ?e, "error writing response");
        return;
    }

    if let Err(e) = stream.flush().await {
        tracing::error!(error = ?e, "error flushing stream");
    }
}

fn is_settings_fs_event(event: &notify::Event, settings_path: &Path) -> bool {
    let touches_settings_file = event
        .paths
        .iter()
        .any(|path| path.file_name() == settings_path.file_name());
    if !touches_settings_file {
        return false;
    }
    matches!(
        event.kind,
        notify::event::EventKind::Create(notify::event::CreateKind::File)
            | notify::event::EventKind::Remove(notify::event::RemoveKind::File)
            | notify::event::EventKind::Modify(notify::event::ModifyKind::Data(_))
    )
}

async fn daemon(args: cli::Cli) -> Result<(), exitcode::ExitCode> {
    let mut ctrlc_receiver = ctrlc_channel().await?;

    // keep the watcher in scope so it does not get dropped
    let (_settings_watcher, mut settings_receiver) = settings_channel(&args.settings_path)?;

    let socket_path = args.socket_path.clone();
    let mut socket_receiver = socket_channel(&args.socket_path).await?;

    let exit_code = loop_daemon(&mut ctrlc_receiver, &mut settings_receiver, &mut socket_receiver, args).await;
    match fs::remove_file(&socket_path) {
        Ok(_) => (),
        Err(e) => {
            tracing::error!(error = %e, "failed removing socket");
        }
    }
    Err(exit_code)
}

async fn loop_daemon(
    ctrlc_receiver: &mut mpsc::Receiver<()>,
    settings_receiver: &mut mpsc::Receiver<notify::Event>,
    socket_receiver: &mut mpsc::Receiver<UnixStream>,
    args: cli::Cli,
) -> exitcode::ExitCode {
    let store = match settings::Store::load(&args.settings_path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = ?e, "failed to load settings");
            return exitcode::CONFIG;
        }
    };
    let supervisor = Supervisor::new(args.service_dir.to_string_lossy());
    let identity = IdentitySource::new(args.identity_path.clone());
    let mut control = Control::new(store, supervisor, identity, args.client_bin.to_string_lossy().into_owned());

    let runner = runner::System;
    control.log_client_version(&runner);

    let mut tick = interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let (reload_sender, mut reload_receiver) = mpsc::channel::<()>(4);
    let mut reload_cancel = CancellationToken::new();

    tracing::info!("entering control loop");
    loop {
        tokio::select! {
            Some(_) = ctrlc_receiver.recv() => {
                tracing::info!("initiating shutdown");
                return exitcode::OK;
            },
            _ = tick.tick() => {
                control.tick(&runner);
            },
            Some(mut stream) = socket_receiver.recv() => {
                incoming_stream(&mut stream, &mut control).await;
            },
            Some(event) = settings_receiver.recv() => {
                if is_settings_fs_event(&event, &args.settings_path) {
                    reload_cancel.cancel();
                    reload_cancel = CancellationToken::new();
                    let cancel_token = reload_cancel.clone();
                    let sender = reload_sender.clone();
                    tokio::spawn(async move {
                        cancel_token.run_until_cancelled(async move {
                            sleep(RELOAD_GRACE_PERIOD).await;
                            if sender.send(()).await.is_err() {
                                tracing::warn!("reload receiver already closed");
                            }
                        }).await;
                    });
                }
            },
            Some(_) = reload_receiver.recv() => {
                control.reload_settings();
            },
            else => {
                tracing::error!("unexpected channel closure");
                return exitcode::IOERR;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let args = cli::parse();

    logging::setup();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting {}",
        env!("CARGO_PKG_NAME")
    );

    match daemon(args).await {
        Ok(_) => (),
        Err(exitcode::OK) => (),
        Err(code) => {
            tracing::warn!("abnormal exit");
            process::exit(code);
        }
    }
}
