// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use berth::config::{Action, Config};
use berth::console::{self, Console};
use berth::runner::CommandRunner;
use berth::runtime::docker::DockerCli;
use berth::runtime::{EnvFileEnvironment, EnvironmentProvider, RuntimeClient, StaticEnvironment};
use berth::stream::ExecRequest;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    match run(config).await {
        Ok(status) => std::process::exit(status),
        Err(e) => {
            error!("fatal: {e:#}");
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    // Logs go to stderr; stdout carries the container's output.
    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

/// What SIGINT does for the running subcommand.
enum InterruptMode {
    Shutdown,
    Forward(mpsc::Sender<()>),
}

fn spawn_signal_handler(shutdown: CancellationToken, mode: InterruptMode) {
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();

        loop {
            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGTERM");
                    shutdown.cancel();
                    return;
                }
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGINT");
                    match mode {
                        InterruptMode::Shutdown => {
                            shutdown.cancel();
                            return;
                        }
                        InterruptMode::Forward(ref tx) => {
                            let _ = tx.try_send(());
                        }
                    }
                }
            }
        }
    });
}

async fn run(config: Config) -> anyhow::Result<i32> {
    let shutdown = CancellationToken::new();
    let docker = DockerCli::new(config.docker.clone()).with_exit_wait(config.exit_wait());
    let client: Arc<dyn RuntimeClient> = Arc::new(docker);
    let settings = config.stream_settings();
    let mut console = Console::new(tokio::io::stdout(), tokio::io::stderr());

    match config.action {
        Action::Logs { ref container, raw, .. } => {
            spawn_signal_handler(shutdown.clone(), InterruptMode::Shutdown);
            let tty = match client.inspect(container).await {
                Ok(info) => info.tty,
                Err(e) => {
                    warn!("inspect {container} failed, assuming separate streams: {e:#}");
                    false
                }
            };
            let request = config.log_request(tty).ok_or_else(|| anyhow::anyhow!("not a logs request"))?;
            console::stream_logs(client, request, raw, settings, &shutdown, &mut console).await
        }
        Action::Exec { ref container, tty, stdin, ref command } => {
            spawn_signal_handler(shutdown.clone(), InterruptMode::Shutdown);
            let request = ExecRequest {
                container_id: container.clone(),
                argv: command.clone(),
                tty,
                attach_stdin: stdin,
            };
            let input = stdin.then(|| BufReader::new(tokio::io::stdin()));
            let code = console::run_exec(client, request, settings, &shutdown, input, &mut console).await?;
            Ok(exit_status(code))
        }
        Action::Shell { ref container, ref shell } => {
            let (interrupt_tx, interrupts) = mpsc::channel(4);
            spawn_signal_handler(shutdown.clone(), InterruptMode::Forward(interrupt_tx));
            let env: Arc<dyn EnvironmentProvider> = match config.env_file {
                Some(ref path) => Arc::new(EnvFileEnvironment::new(path.clone())),
                None => Arc::new(StaticEnvironment::empty()),
            };
            let runner = CommandRunner::with_cancel(client, env, settings, shutdown.clone());
            let input = BufReader::new(tokio::io::stdin());
            let code = console::run_shell(&runner, container, shell, input, interrupts, &mut console).await?;
            Ok(exit_status(code))
        }
    }
}

/// Map a container exit code onto a process exit status.
fn exit_status(code: i64) -> i32 {
    if code < 0 {
        1
    } else {
        i32::try_from(code).unwrap_or(1)
    }
}
