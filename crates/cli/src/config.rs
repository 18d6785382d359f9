// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::runtime::LogRequest;
use crate::stream::StreamSettings;

/// Stream container logs and run commands in containers.
#[derive(Debug, Parser)]
#[command(name = "berth", version, about)]
pub struct Config {
    /// Container runtime CLI binary.
    #[arg(long, env = "BERTH_DOCKER", default_value = "docker", global = true)]
    pub docker: PathBuf,

    /// Log format (json or text).
    #[arg(long, env = "BERTH_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "BERTH_LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    /// Dotenv file whose variables are exported into interactive shells.
    #[arg(long, env = "BERTH_ENV_FILE", global = true)]
    pub env_file: Option<PathBuf>,

    /// Transport read size in bytes.
    #[arg(long, env = "BERTH_CHUNK_SIZE", default_value = "8192", global = true)]
    pub chunk_size: usize,

    /// Output queue capacity per session.
    #[arg(long, env = "BERTH_QUEUE_CAPACITY", default_value = "256", global = true)]
    pub queue_capacity: usize,

    #[command(subcommand)]
    pub action: Action,

    // -- Duration overrides (skip from CLI; set in Config::test()) --------
    #[clap(skip)]
    pub input_drain_ms: Option<u64>,
    #[clap(skip)]
    pub exit_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Action {
    /// Print a container's logs.
    Logs {
        container: String,
        /// Keep streaming new output.
        #[arg(long, short)]
        follow: bool,
        /// Number of trailing lines to show, or "all".
        #[arg(long, default_value = "all")]
        tail: String,
        /// Keep ANSI escapes and blank lines.
        #[arg(long)]
        raw: bool,
    },
    /// Run one command in a container.
    Exec {
        container: String,
        /// Allocate a TTY (merged output).
        #[arg(long, short)]
        tty: bool,
        /// Forward stdin to the command.
        #[arg(long = "stdin", short = 'i')]
        stdin: bool,
        /// Command and arguments (after --).
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Open an interactive shell in a container.
    Shell {
        container: String,
        #[arg(long, default_value = "/bin/sh")]
        shell: String,
    },
}

fn env_duration_ms(var: &str, default: u64) -> Duration {
    let ms = std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}

macro_rules! duration_field {
    ($method:ident, $field:ident, $env:literal, $default:expr) => {
        pub fn $method(&self) -> Duration {
            match self.$field {
                Some(ms) => Duration::from_millis(ms),
                None => env_duration_ms($env, $default),
            }
        }
    };
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("--chunk-size must be greater than zero");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("--queue-capacity must be greater than zero");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        if let Action::Exec { ref command, .. } = self.action {
            if command.iter().all(|arg| arg.trim().is_empty()) {
                anyhow::bail!("exec requires a command");
            }
        }
        Ok(())
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            chunk_size: self.chunk_size,
            queue_capacity: self.queue_capacity,
            input_drain_timeout: self.input_drain_timeout(),
        }
    }

    /// Log request for the `logs` action, if that is the selected one.
    pub fn log_request(&self, tty: bool) -> Option<LogRequest> {
        match self.action {
            Action::Logs { ref container, follow, ref tail, .. } => {
                Some(LogRequest::new(container.clone()).follow(follow).tail(tail.clone()).tty(tty))
            }
            _ => None,
        }
    }

    // -- Tuning knobs (field override → env var → compiled default) --------

    duration_field!(input_drain_timeout, input_drain_ms, "BERTH_INPUT_DRAIN_MS", 2_000);
    duration_field!(exit_wait, exit_wait_ms, "BERTH_EXIT_WAIT_MS", 5_000);

    /// Build a minimal `Config` for tests.
    #[doc(hidden)]
    pub fn test(action: Action) -> Self {
        Self {
            docker: PathBuf::from("docker"),
            log_format: "text".into(),
            log_level: "debug".into(),
            env_file: None,
            chunk_size: 8192,
            queue_capacity: 256,
            action,
            input_drain_ms: Some(100),
            exit_wait_ms: Some(500),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
