//! Claude Code process spawning and control.
//!
//! This module provides a builder for the agent's command-line invocation
//! and a handle for the running child process.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Claude binary not found")]
    NotFound,
    /// Permission denied when spawning.
    #[error("Permission denied")]
    PermissionDenied,
    /// The host is shutting down and accepts no new processes.
    #[error("Process host is shutting down")]
    ShuttingDown,
    /// A pipe could not be captured from the child.
    #[error("Process {0} not available")]
    MissingPipe(&'static str),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// Output format requested from the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// A single JSON document written on exit.
    #[default]
    Json,
    /// One JSON event per line while the turn runs.
    StreamJson,
}

impl OutputFormat {
    /// The value passed to `--output-format`.
    #[must_use]
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::StreamJson => "stream-json",
        }
    }
}

/// Permission mode passed to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Plan,
    AcceptEdits,
    AcceptAll,
    Ask,
}

impl PermissionMode {
    /// The value passed to `--permission-mode`.
    #[must_use]
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::AcceptEdits => "acceptEdits",
            Self::AcceptAll => "acceptAll",
            Self::Ask => "ask",
        }
    }
}

impl std::str::FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Self::Plan),
            "acceptEdits" => Ok(Self::AcceptEdits),
            "acceptAll" => Ok(Self::AcceptAll),
            "ask" => Ok(Self::Ask),
            other => Err(format!("unknown permission mode: {other}")),
        }
    }
}

/// Quote a value for a shell-invoked command line.
///
/// Embedded quotes are doubled and the whole value is wrapped in quotes.
#[must_use]
pub fn quote_arg(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// One argument of the invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CliArg {
    Flag(&'static str),
    Value(String),
}

/// Builder for configuring Claude Code process arguments.
#[derive(Debug, Clone, Default)]
pub struct ClaudeProcessBuilder {
    prompt: String,
    output_format: OutputFormat,
    allowed_tools: Option<Vec<String>>,
    disallowed_tools: Option<Vec<String>>,
    resume_session: Option<String>,
    continue_last: bool,
    permission_mode: Option<PermissionMode>,
    model: Option<String>,
    max_turns: Option<u32>,
    append_system_prompt: Option<String>,
    system_prompt: Option<String>,
    working_dir: Option<PathBuf>,
}

impl ClaudeProcessBuilder {
    /// Create a new builder with the given prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Select the output format.
    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Set the allowed tools for this session.
    #[must_use]
    pub fn allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_tools = Some(tools.into_iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    /// Set the denied tools for this session.
    #[must_use]
    pub fn disallowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.disallowed_tools = Some(tools.into_iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    /// Resume an existing session.
    #[must_use]
    pub fn resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume_session = Some(session_id.into());
        self
    }

    /// Continue the most recent conversation in the working directory.
    ///
    /// Ignored when a resume id is set.
    #[must_use]
    pub fn continue_last(mut self) -> Self {
        self.continue_last = true;
        self
    }

    /// Set the permission mode.
    #[must_use]
    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = Some(mode);
        self
    }

    /// Select the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the maximum number of turns.
    #[must_use]
    pub fn max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    /// Append to the system prompt.
    #[must_use]
    pub fn append_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.append_system_prompt = Some(prompt.into());
        self
    }

    /// Set a custom system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the working directory for the Claude process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Get the output format.
    #[must_use]
    pub fn get_output_format(&self) -> OutputFormat {
        self.output_format
    }

    /// Get the prompt.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    fn cli_args(&self) -> Vec<CliArg> {
        let mut args = vec![
            CliArg::Flag("-p"),
            CliArg::Value(self.prompt.clone()),
            CliArg::Flag("--output-format"),
            CliArg::Value(self.output_format.as_arg().to_string()),
        ];

        if self.output_format == OutputFormat::StreamJson {
            args.push(CliArg::Flag("--verbose"));
            args.push(CliArg::Flag("--include-partial-messages"));
        }

        if let Some(session_id) = &self.resume_session {
            args.push(CliArg::Flag("--resume"));
            args.push(CliArg::Value(session_id.clone()));
        } else if self.continue_last {
            args.push(CliArg::Flag("--continue"));
        }

        if let Some(tools) = self.allowed_tools.as_ref().filter(|t| !t.is_empty()) {
            args.push(CliArg::Flag("--allowedTools"));
            args.push(CliArg::Value(tools.join(",")));
        }

        if let Some(tools) = self.disallowed_tools.as_ref().filter(|t| !t.is_empty()) {
            args.push(CliArg::Flag("--disallowedTools"));
            args.push(CliArg::Value(tools.join(",")));
        }

        if let Some(mode) = self.permission_mode {
            args.push(CliArg::Flag("--permission-mode"));
            args.push(CliArg::Value(mode.as_arg().to_string()));
        }

        if let Some(model) = &self.model {
            args.push(CliArg::Flag("--model"));
            args.push(CliArg::Value(model.clone()));
        }

        if let Some(turns) = self.max_turns {
            args.push(CliArg::Flag("--max-turns"));
            args.push(CliArg::Value(turns.to_string()));
        }

        if let Some(prompt) = &self.system_prompt {
            args.push(CliArg::Flag("--system-prompt"));
            args.push(CliArg::Value(prompt.clone()));
        }

        if let Some(prompt) = &self.append_system_prompt {
            args.push(CliArg::Flag("--append-system-prompt"));
            args.push(CliArg::Value(prompt.clone()));
        }

        args
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        self.cli_args()
            .into_iter()
            .map(|arg| match arg {
                CliArg::Flag(flag) => flag.to_string(),
                CliArg::Value(value) => value,
            })
            .collect()
    }

    /// Build a single command line for shell invocation.
    ///
    /// Every interpolated value is passed through [`quote_arg`].
    #[must_use]
    pub fn build_command_line(&self, binary: &str) -> String {
        let mut line = binary.to_string();
        for arg in self.cli_args() {
            line.push(' ');
            match arg {
                CliArg::Flag(flag) => line.push_str(flag),
                CliArg::Value(value) => line.push_str(&quote_arg(&value)),
            }
        }
        line
    }
}

/// A running Claude Code process.
#[derive(Debug)]
pub struct ClaudeProcess {
    child: Child,
}

impl ClaudeProcess {
    /// Spawn a process using a custom binary.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn_with_binary(
        binary: &str,
        builder: &ClaudeProcessBuilder,
    ) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(binary);
        cmd.args(builder.build_args());
        Self::spawn_command(cmd, builder)
    }

    /// Spawn the invocation through the platform shell as one command line.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the shell fails to spawn.
    pub fn spawn_via_shell(
        binary: &str,
        builder: &ClaudeProcessBuilder,
    ) -> Result<Self, SpawnError> {
        let line = builder.build_command_line(binary);

        #[cfg(windows)]
        let cmd = {
            let mut cmd = Command::new("cmd.exe");
            cmd.arg("/C").arg(line);
            cmd
        };

        #[cfg(not(windows))]
        let cmd = {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(line);
            cmd
        };

        Self::spawn_command(cmd, builder)
    }

    fn spawn_command(
        mut cmd: Command,
        builder: &ClaudeProcessBuilder,
    ) -> Result<Self, SpawnError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = builder.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(SpawnError::from_io)?;

        Ok(Self { child })
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Forcefully kill the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGTERM first, then SIGKILL after the timeout.
    /// On other platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, timeout: Duration) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.graceful_terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.kill().await
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(&mut self, timeout: Duration) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.id() {
            let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            let _ = kill(nix_pid, Signal::SIGTERM);

            match tokio::time::timeout(timeout, self.child.wait()).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    tracing::debug!(pid, "Graceful termination timed out, killing");
                    self.child.kill().await
                }
            }
        } else {
            // Already exited
            Ok(())
        }
    }
}
