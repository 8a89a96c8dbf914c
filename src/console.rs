//! Operational console
//!
//! Runs a small set of read-only diagnostics typed by an operator. Input
//! is tokenised with shlex and must begin with the tokens of an allowed
//! command; nothing reaches a shell.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::runner::{CommandRunner, RunError};

pub const ALLOWED_COMMANDS: &[&str] = &[
    "docker ps",
    "docker ps -a",
    "docker images",
    "docker stats --no-stream",
    "docker logs",
    "ps aux",
    "top -bn1",
    "free -h",
    "df -h",
    "systemctl status",
    "journalctl -n 20",
    "lscpu",
    "lsmem",
    "ip addr",
    "netstat -tlnp",
    "ss -tlnp",
];

pub const ALLOWED_SUMMARY: &str =
    "Allowed commands: docker ps, docker logs [container], ps aux, top, free, df, systemctl status [service]";

/// Transcript of one console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleOutput {
    pub lines: Vec<String>,
    pub exit_code: Option<i32>,
}

impl ConsoleOutput {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

pub struct Console {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    running: Mutex<()>,
}

impl Console {
    pub fn new(config: Arc<Config>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            running: Mutex::new(()),
        }
    }

    pub async fn execute(&self, command: &str) -> Result<ConsoleOutput, ConsoleError> {
        let Ok(_running) = self.running.try_lock() else {
            return Err(ConsoleError::Busy);
        };

        let command = command.trim();
        let argv = allowed_argv(command).ok_or(ConsoleError::Denied)?;
        let (program, args) = argv.split_first().ok_or(ConsoleError::Denied)?;

        log::info!("console: {}", command);
        let output = self
            .runner
            .run(program, args, self.config.console_timeout())
            .await?;

        let mut lines = vec![format!("$ {}", command)];
        let stdout = output.stdout.trim_end();
        if !stdout.is_empty() {
            lines.push(stdout.to_string());
        }
        let stderr = output.stderr.trim_end();
        if !stderr.is_empty() {
            lines.push(format!("Error: {}", stderr));
        }
        lines.push(format!(
            "Command finished with exit code: {}",
            output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string())
        ));

        Ok(ConsoleOutput {
            lines,
            exit_code: output.exit_code,
        })
    }
}

/// Argument vector for `command` if it starts with an allowed command
pub fn allowed_argv(command: &str) -> Option<Vec<String>> {
    let argv = shlex::split(command)?;
    ALLOWED_COMMANDS
        .iter()
        .any(|allowed| {
            let prefix: Vec<&str> = allowed.split_whitespace().collect();
            argv.len() >= prefix.len() && argv.iter().zip(&prefix).all(|(a, p)| a == p)
        })
        .then_some(argv)
}

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("Command not allowed for security reasons.\n{}", ALLOWED_SUMMARY)]
    Denied,

    #[error("Previous command still running...")]
    Busy,

    #[error(transparent)]
    Run(#[from] RunError),
}
