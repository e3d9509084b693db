//! External process execution.
//!
//! Every tool the pipeline touches (tesseract, identify, convert) is invoked
//! through the [`ProcessRunner`] trait. The production implementation,
//! [`TokioProcessRunner`], spawns the child with `tokio::process`, waits for it
//! under a timeout and returns the exit code together with the combined
//! stdout/stderr text. Tests substitute a scripted runner that returns canned
//! exit codes and writes whatever files the real tool would have written.

use crate::error::ProcessError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// A fully-specified command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Kill the child if it runs longer than this.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    /// File name of the program, used as the tool name in diagnostics.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl fmt::Display for CommandSpec {
    /// Shell-style rendering used for logs and failure reports.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program.to_string_lossy()))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(&arg.to_string_lossy()))?;
        }
        Ok(())
    }
}

fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=%+,@".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// stdout followed by stderr, lossily decoded.
    pub output: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external commands.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `command` to completion.
    ///
    /// Returns `Err` only when the process could not be started, could not be
    /// waited on, or exceeded its timeout. A non-zero exit is `Ok`.
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ProcessError>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
        let rendered = command.to_string();
        debug!("exec: {}", rendered);

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        // Dropping the `wait_with_output` future on timeout drops the child,
        // which kills it because of `kill_on_drop`.
        let output = match command.timeout {
            Some(limit) => match timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ProcessError::TimedOut {
                        command: rendered,
                        secs: limit.as_secs(),
                    })
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|source| ProcessError::Wait {
            command: rendered.clone(),
            source,
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        debug!("exit: {:?} ← {}", output.status.code(), rendered);
        Ok(ProcessOutput {
            exit_code: output.status.code(),
            output: combined,
        })
    }
}
