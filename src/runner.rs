//! External Command Execution
//!
//! Every collaborator (parameter store, STS, az, gcloud, scanner, object
//! store) is an external CLI. Commands are described by a [`CommandSpec`]
//! that carries its own environment: credentials travel with the command
//! that needs them instead of living in the process environment.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ScanError;

const MASK: &str = "****";

/// A single external command with its arguments and extra environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Variables added to the inherited environment of the child only
    pub env: Vec<(String, String)>,
    /// Argument indices rendered as `****` when displayed
    masked: Vec<usize>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an argument that must never appear in logs
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.masked.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn has_env(&self, key: &str) -> bool {
        self.env.iter().any(|(k, _)| k == key)
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for CommandSpec {
    /// Shell-quoted rendering with secret arguments masked
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words: Vec<&str> = std::iter::once(self.program.as_str())
            .chain(self.args.iter().enumerate().map(|(i, a)| {
                if self.masked.contains(&i) {
                    MASK
                } else {
                    a.as_str()
                }
            }))
            .collect();
        write!(f, "{}", shell_words::join(words))
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last non-empty stderr line, for terse warnings
    pub fn stderr_tail(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim()
    }
}

/// Executes external commands to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command and capture its output.
    ///
    /// A non-zero exit is reported through [`CommandOutput::code`], not as
    /// an error; only failing to start the process is an error.
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ScanError>;
}

/// Runs commands as child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ScanError> {
        debug!(program = %command.program, "Executing command");

        let output = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ScanError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
