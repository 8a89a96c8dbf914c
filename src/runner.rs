//! External command execution
//!
//! Every interaction with the container runtime and the OS process table
//! goes through [`CommandRunner`]. Commands are always built as an argument
//! vector; nothing is ever handed to a shell.

use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(code),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into [`RunError::Failed`]
    pub fn checked(self, program: &str) -> Result<Self, RunError> {
        if self.success() {
            Ok(self)
        } else {
            Err(RunError::Failed {
                program: program.to_string(),
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, killing the process if it outlives `timeout`
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, RunError>;

    /// Start the process and return without waiting for it
    async fn spawn_detached(&self, program: &str, args: &[String]) -> Result<(), RunError>;
}

/// Runs real processes via tokio
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, RunError> {
        log::debug!("run: {} {:?}", program, args);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: program.to_string(),
                source,
            })?;

        // Dropping the wait future on timeout kills the child (kill_on_drop)
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| RunError::Timeout {
                program: program.to_string(),
                timeout,
            })?
            .map_err(|source| RunError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }

    async fn spawn_detached(&self, program: &str, args: &[String]) -> Result<(), RunError> {
        log::debug!("spawn detached: {} {:?}", program, args);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: program.to_string(),
                source,
            })?;

        // Reap in the background so the child never lingers as a zombie
        let label = format!("{} {}", program, args.join(" "));
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    log::debug!("detached `{}` exited with {}", label, status)
                }
                Ok(_) => {}
                Err(e) => log::debug!("detached `{}` wait failed: {}", label, e),
            }
        });

        Ok(())
    }
}

/// Build an owned argument vector
pub fn argv<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter().map(Into::into).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Canned reply for [`ScriptedRunner`]
#[derive(Debug, Clone)]
pub enum Scripted {
    Output(CommandOutput),
    Timeout,
    Missing,
}

/// Deterministic runner for tests: replies are keyed by argv prefix and
/// every invocation is recorded
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(Vec<String>, Scripted)>>,
    calls: Mutex<Vec<Invocation>>,
}

/// One recorded call to a [`ScriptedRunner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub detached: bool,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `stdout` and exit code 0; later rules shadow earlier ones
    pub fn on(&self, prefix: &[&str], stdout: &str) -> &Self {
        self.script(prefix, Scripted::Output(CommandOutput::ok(stdout)))
    }

    pub fn on_fail(&self, prefix: &[&str], code: i32, stderr: &str) -> &Self {
        self.script(prefix, Scripted::Output(CommandOutput::failed(code, stderr)))
    }

    pub fn on_timeout(&self, prefix: &[&str]) -> &Self {
        self.script(prefix, Scripted::Timeout)
    }

    pub fn script(&self, prefix: &[&str], reply: Scripted) -> &Self {
        lock(&self.rules).push((argv(prefix.iter().copied()), reply));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls whose argv starts with `prefix`
    pub fn count(&self, prefix: &[&str]) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| starts_with(&call.argv, prefix))
            .count()
    }

    fn reply(&self, program: &str, args: &[String], detached: bool) -> Scripted {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(program.to_string());
        full.extend(args.iter().cloned());

        let reply = lock(&self.rules)
            .iter()
            .rev()
            .find(|(prefix, _)| full.starts_with(prefix))
            .map(|(_, reply)| reply.clone())
            .unwrap_or(Scripted::Missing);

        lock(&self.calls).push(Invocation {
            argv: full,
            detached,
        });
        reply
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, RunError> {
        match self.reply(program, args, false) {
            Scripted::Output(output) => Ok(output),
            Scripted::Timeout => Err(RunError::Timeout {
                program: program.to_string(),
                timeout,
            }),
            Scripted::Missing => Err(missing(program)),
        }
    }

    async fn spawn_detached(&self, program: &str, args: &[String]) -> Result<(), RunError> {
        match self.reply(program, args, true) {
            Scripted::Missing => Err(missing(program)),
            _ => Ok(()),
        }
    }
}

fn missing(program: &str) -> RunError {
    RunError::Spawn {
        program: program.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no scripted reply"),
    }
}

fn starts_with(argv: &[String], prefix: &[&str]) -> bool {
    argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
