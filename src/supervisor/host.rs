//! Process supervisor for agent invocations.
//!
//! Owns every running agent process, keyed by [`ProcessHandle`]. Each process
//! gets a monitor task that pumps its pipes onto the [`EventBus`] and removes
//! the handle from the registry when the process exits or is cancelled.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cli::{
    classify_record, decode_response, AgentEvent, ClaudeProcess, ClaudeProcessBuilder,
    ClaudeResponse, ClassifiedRecord, OutputFormat, RecordReader, SpawnError, TerminalResult,
    READ_CHUNK_SIZE,
};
use crate::config::HostConfig;
use crate::supervisor::{
    tail_chars, EventBus, EventKind, HostError, HostEvent, McpServerConfig, ProcessHandle,
    Subscription,
};

/// Registry entry for a live process.
#[derive(Debug)]
struct ProcessEntry {
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    format: OutputFormat,
    stop: oneshot::Sender<()>,
}

#[derive(Debug, Clone)]
struct HostSettings {
    binary: String,
    use_shell: bool,
    terminate_timeout: Duration,
    error_tail_chars: usize,
}

#[derive(Debug)]
struct Inner {
    registry: Mutex<HashMap<ProcessHandle, ProcessEntry>>,
    bus: EventBus,
    shutdown: CancellationToken,
    settings: HostSettings,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, HashMap<ProcessHandle, ProcessEntry>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove a handle. Safe to call more than once.
    fn remove(&self, handle: &ProcessHandle) -> Option<ProcessEntry> {
        self.registry().remove(handle)
    }
}

/// Outcome of one process, delivered once it has exited.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessExit {
    pub handle: ProcessHandle,
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    /// The process was stopped by `cancel` or host shutdown.
    pub cancelled: bool,
    /// Full stdout for buffered invocations, a bounded tail for streams.
    pub stdout: String,
    /// Bounded stderr tail.
    pub stderr: String,
    pub session_id: Option<String>,
    pub terminal: Option<TerminalResult>,
}

impl ProcessExit {
    /// Last `limit` characters of stderr, or of stdout when stderr is empty.
    #[must_use]
    pub fn diagnostic_tail(&self, limit: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        tail_chars(source.trim_end(), limit).to_string()
    }

    /// Interpret a buffered invocation's exit.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled`, `Process` for a non-zero exit, or `Parse` when
    /// stdout holds no decodable response.
    pub fn into_response(self, tail_limit: usize) -> Result<ClaudeResponse, HostError> {
        if self.cancelled {
            return Err(HostError::Cancelled);
        }
        match self.code {
            Some(0) => decode_response(&self.stdout).map_err(|e| HostError::Parse {
                reason: e.to_string(),
                tail: tail_chars(self.stdout.trim_end(), tail_limit).to_string(),
            }),
            code => Err(HostError::Process {
                code,
                tail: self.diagnostic_tail(tail_limit),
            }),
        }
    }
}

/// A freshly spawned process.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    exit: oneshot::Receiver<ProcessExit>,
}

impl SpawnedProcess {
    /// Wait for the process to exit.
    ///
    /// Returns `None` if the monitor task died before reporting.
    pub async fn wait(self) -> Option<ProcessExit> {
        self.exit.await.ok()
    }
}

/// Snapshot of a registered process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub handle: ProcessHandle,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub format: OutputFormat,
}

/// Launches and tracks agent processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    /// Create a supervisor with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(&HostConfig::default())
    }

    /// Create a supervisor from host configuration.
    #[must_use]
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(HashMap::new()),
                bus: EventBus::new(config.event_capacity),
                shutdown: CancellationToken::new(),
                settings: HostSettings {
                    binary: config.binary.clone(),
                    use_shell: config.use_shell,
                    terminate_timeout: config.terminate_timeout(),
                    error_tail_chars: config.error_tail_chars,
                },
            }),
        }
    }

    /// Create a supervisor that launches `binary`.
    #[must_use]
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self::from_config(&HostConfig {
            binary: binary.into(),
            ..HostConfig::default()
        })
    }

    /// Characters of output kept for error messages.
    #[must_use]
    pub fn error_tail_chars(&self) -> usize {
        self.inner.settings.error_tail_chars
    }

    /// Subscribe to every host event.
    ///
    /// Nothing is dropped for a slow reader: its queue fills and the
    /// processes feeding it wait. Drop subscriptions you stop reading.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.inner.bus.subscribe()
    }

    /// Subscribe to the given event kinds.
    #[must_use]
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Subscription {
        self.inner.bus.subscribe_to(kinds)
    }

    /// Launch a process. The handle is registered before this returns.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process cannot be created or the host is
    /// shutting down.
    pub fn spawn(&self, builder: &ClaudeProcessBuilder) -> Result<SpawnedProcess, SpawnError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SpawnError::ShuttingDown);
        }

        let settings = &self.inner.settings;
        let mut process = if settings.use_shell {
            ClaudeProcess::spawn_via_shell(&settings.binary, builder)?
        } else {
            ClaudeProcess::spawn_with_binary(&settings.binary, builder)?
        };
        let stdout = process
            .take_stdout()
            .ok_or(SpawnError::MissingPipe("stdout"))?;
        let stderr = process
            .take_stderr()
            .ok_or(SpawnError::MissingPipe("stderr"))?;

        let handle = ProcessHandle::generate();
        let format = builder.get_output_format();
        let pid = process.id();
        let (stop_tx, stop_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        {
            let mut registry = self.inner.registry();
            // Shutdown drains under this lock; re-check so nothing slips in after.
            if self.inner.shutdown.is_cancelled() {
                return Err(SpawnError::ShuttingDown);
            }
            registry.insert(
                handle.clone(),
                ProcessEntry {
                    pid,
                    started_at: Utc::now(),
                    format,
                    stop: stop_tx,
                },
            );
        }

        tracing::info!(handle = %handle, pid = ?pid, format = format.as_arg(), "Agent process started");

        tokio::spawn(monitor(
            Arc::clone(&self.inner),
            handle.clone(),
            process,
            Pipes { stdout, stderr },
            format,
            stop_rx,
            exit_tx,
        ));

        Ok(SpawnedProcess {
            handle,
            exit: exit_rx,
        })
    }

    /// Run a buffered invocation to completion and decode its response.
    ///
    /// # Errors
    ///
    /// Returns `HostError` for spawn failure, non-zero exit, an undecodable
    /// response, or cancellation.
    pub async fn run(&self, builder: &ClaudeProcessBuilder) -> Result<ClaudeResponse, HostError> {
        let builder = builder.clone().output_format(OutputFormat::Json);
        let spawned = self.spawn(&builder)?;
        let exit = spawned.wait().await.ok_or(HostError::Cancelled)?;
        exit.into_response(self.error_tail_chars())
    }

    /// Start a streaming invocation and return its handle immediately.
    ///
    /// Output arrives through subscriptions.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process cannot be created.
    pub fn stream(&self, builder: &ClaudeProcessBuilder) -> Result<ProcessHandle, SpawnError> {
        let builder = builder.clone().output_format(OutputFormat::StreamJson);
        self.spawn(&builder).map(|spawned| spawned.handle)
    }

    /// Interrupt a process and forget its handle.
    ///
    /// Returns false for unknown or already finished handles.
    pub fn cancel(&self, handle: &ProcessHandle) -> bool {
        let Some(entry) = self.inner.remove(handle) else {
            tracing::debug!(handle = %handle, "Cancel for unknown handle");
            return false;
        };
        tracing::info!(handle = %handle, pid = ?entry.pid, "Cancelling agent process");
        if entry.stop.send(()).is_err() {
            tracing::debug!(handle = %handle, "Process already exiting");
        }
        true
    }

    /// Snapshot of the registered handles.
    #[must_use]
    pub fn list(&self) -> Vec<ProcessHandle> {
        let mut handles: Vec<_> = self.inner.registry().keys().cloned().collect();
        handles.sort();
        handles
    }

    /// Snapshot of the registered processes with their details.
    #[must_use]
    pub fn processes(&self) -> Vec<ProcessInfo> {
        let mut infos: Vec<_> = self
            .inner
            .registry()
            .iter()
            .map(|(handle, entry)| ProcessInfo {
                handle: handle.clone(),
                pid: entry.pid,
                started_at: entry.started_at,
                format: entry.format,
            })
            .collect();
        infos.sort_by(|a, b| a.handle.cmp(&b.handle));
        infos
    }

    /// Whether `handle` is still registered.
    #[must_use]
    pub fn is_running(&self, handle: &ProcessHandle) -> bool {
        self.inner.registry().contains_key(handle)
    }

    /// Kill every registered process and refuse new ones.
    ///
    /// Returns the number of processes that were registered.
    pub fn shutdown(&self) -> usize {
        self.inner.shutdown.cancel();
        let drained: Vec<_> = self.inner.registry().drain().collect();
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Killing agent processes on shutdown");
        }
        drained.len()
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Version string reported by the agent binary.
    ///
    /// # Errors
    ///
    /// Returns `HostError` if the binary cannot be run or fails.
    pub async fn version(&self) -> Result<String, HostError> {
        self.run_utility(&["--version".to_string()]).await
    }

    /// Whether the agent binary can be run.
    pub async fn check_installed(&self) -> bool {
        match self.version().await {
            Ok(version) => {
                tracing::debug!(version = %version, "Agent binary found");
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "Agent binary not available");
                false
            }
        }
    }

    /// Configured MCP servers, as printed by the agent.
    ///
    /// # Errors
    ///
    /// Returns `HostError` if the command fails.
    pub async fn mcp_list(&self) -> Result<String, HostError> {
        self.run_utility(&["mcp".to_string(), "list".to_string()]).await
    }

    /// Register an MCP server.
    ///
    /// # Errors
    ///
    /// Returns `HostError::InvalidRequest` for an incomplete config, or the
    /// command's failure.
    pub async fn mcp_add(&self, server: &McpServerConfig) -> Result<(), HostError> {
        let args = server.to_args()?;
        self.run_utility(&args).await.map(|_| ())
    }

    /// Remove an MCP server.
    ///
    /// # Errors
    ///
    /// Returns `HostError` if the command fails.
    pub async fn mcp_remove(&self, name: &str) -> Result<(), HostError> {
        if name.trim().is_empty() {
            return Err(HostError::InvalidRequest("MCP server name is empty".to_string()));
        }
        self.run_utility(&["mcp".to_string(), "remove".to_string(), name.to_string()])
            .await
            .map(|_| ())
    }

    /// Run a short-lived agent subcommand and capture its stdout.
    async fn run_utility(&self, args: &[String]) -> Result<String, HostError> {
        let settings = &self.inner.settings;
        let mut cmd = if settings.use_shell {
            let line = args.iter().fold(settings.binary.clone(), |mut line, arg| {
                line.push(' ');
                line.push_str(&crate::cli::quote_arg(arg));
                line
            });
            shell_command(line)
        } else {
            let mut cmd = Command::new(&settings.binary);
            cmd.args(args);
            cmd
        };
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        tracing::debug!(binary = %settings.binary, args = ?args, "Running agent subcommand");
        let output = cmd.output().await.map_err(SpawnError::from_io)?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let source = if stderr.trim().is_empty() {
            stdout.as_str()
        } else {
            stderr.trim()
        };
        Err(HostError::Process {
            code: output.status.code(),
            tail: tail_chars(source, settings.error_tail_chars).to_string(),
        })
    }
}

#[cfg(windows)]
fn shell_command(line: String) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/C").arg(line);
    cmd
}

#[cfg(not(windows))]
fn shell_command(line: String) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

struct Pipes {
    stdout: ChildStdout,
    stderr: ChildStderr,
}

/// Bytes kept from a pipe, optionally bounded to a tail.
#[derive(Debug, Default)]
struct OutputBuffer {
    bytes: Vec<u8>,
    /// Character budget; `None` keeps everything.
    limit: Option<usize>,
}

impl OutputBuffer {
    fn bounded(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit: Some(limit),
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if let Some(limit) = self.limit {
            // Four bytes per char covers any UTF-8 tail of `limit` chars.
            let keep = limit.saturating_mul(4).max(READ_CHUNK_SIZE);
            if self.bytes.len() > keep.saturating_mul(2) {
                let excess = self.bytes.len() - keep;
                self.bytes.drain(..excess);
            }
        }
    }

    fn into_string(self) -> String {
        let text = String::from_utf8_lossy(&self.bytes);
        match self.limit {
            Some(limit) => tail_chars(&text, limit).to_string(),
            None => text.into_owned(),
        }
    }
}

#[derive(Debug, Default)]
struct StdoutCapture {
    output: OutputBuffer,
    session_id: Option<String>,
    terminal: Option<TerminalResult>,
}

impl StdoutCapture {
    async fn route(&mut self, bus: &EventBus, handle: &ProcessHandle, record: &str) {
        let ClassifiedRecord { raw, event } = match classify_record(record) {
            Ok(classified) => classified,
            Err(skip) => {
                tracing::debug!(handle = %handle, %skip, "Skipping stream record");
                return;
            }
        };

        if let Some(session_id) = event.session_id() {
            self.session_id = Some(session_id.to_string());
        }
        match &event {
            AgentEvent::TextDelta { text } => {
                bus.publish(HostEvent::StreamText {
                    handle: handle.clone(),
                    text: text.clone(),
                })
                .await;
            }
            AgentEvent::TerminalResult(result) => self.terminal = Some(result.clone()),
            _ => {}
        }
        bus.publish(HostEvent::StreamEvent {
            handle: handle.clone(),
            event,
            raw,
        })
        .await;
    }
}

async fn pump_stdout(
    bus: EventBus,
    handle: ProcessHandle,
    stdout: ChildStdout,
    format: OutputFormat,
    tail_limit: usize,
    started: oneshot::Sender<()>,
) -> StdoutCapture {
    bus.publish(HostEvent::StreamStart {
        handle: handle.clone(),
    })
    .await;
    let _ = started.send(());

    let mut capture = StdoutCapture {
        output: match format {
            OutputFormat::Json => OutputBuffer::default(),
            OutputFormat::StreamJson => OutputBuffer::bounded(tail_limit),
        },
        ..StdoutCapture::default()
    };
    let mut reader = RecordReader::new(stdout);

    loop {
        let chunk = match reader.next_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(handle = %handle, error = %e, "Failed to read agent stdout");
                break;
            }
        };
        capture.output.push(&chunk.bytes);

        match format {
            OutputFormat::Json => {
                bus.publish(HostEvent::Progress {
                    handle: handle.clone(),
                    chunk: String::from_utf8_lossy(&chunk.bytes).into_owned(),
                })
                .await;
            }
            OutputFormat::StreamJson => {
                for record in &chunk.records {
                    capture.route(&bus, &handle, record).await;
                }
            }
        }
    }

    capture
}

async fn pump_stderr(
    bus: EventBus,
    handle: ProcessHandle,
    mut stderr: ChildStderr,
    tail_limit: usize,
    started: oneshot::Receiver<()>,
) -> String {
    // Keep stderr behind StreamStart.
    let _ = started.await;

    let mut tail = OutputBuffer::bounded(tail_limit);
    let mut buf = vec![0; READ_CHUNK_SIZE];

    loop {
        let n = match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(handle = %handle, error = %e, "Failed to read agent stderr");
                break;
            }
        };
        tail.push(&buf[..n]);
        bus.publish(HostEvent::Stderr {
            handle: handle.clone(),
            data: String::from_utf8_lossy(&buf[..n]).into_owned(),
        })
        .await;
    }

    tail.into_string()
}

/// Await a pump, giving up after `limit` when one is set.
async fn join_pump<T: Default>(
    mut task: JoinHandle<T>,
    limit: Option<Duration>,
    handle: &ProcessHandle,
) -> T {
    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(handle = %handle, "Output pipe still open after exit, abandoning");
                task.abort();
                return T::default();
            }
        },
        None => task.await,
    };
    joined.unwrap_or_else(|e| {
        tracing::error!(handle = %handle, error = %e, "Output pump failed");
        T::default()
    })
}

async fn monitor(
    inner: Arc<Inner>,
    handle: ProcessHandle,
    mut process: ClaudeProcess,
    pipes: Pipes,
    format: OutputFormat,
    mut stop_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<ProcessExit>,
) {
    let settings = inner.settings.clone();
    // Publishing can wait on slow subscribers, so it stays out of this task.
    let (started_tx, started_rx) = oneshot::channel();
    let stdout_task = tokio::spawn(pump_stdout(
        inner.bus.clone(),
        handle.clone(),
        pipes.stdout,
        format,
        settings.error_tail_chars,
        started_tx,
    ));
    let stderr_task = tokio::spawn(pump_stderr(
        inner.bus.clone(),
        handle.clone(),
        pipes.stderr,
        settings.error_tail_chars,
        started_rx,
    ));

    let mut cancelled = false;
    let status = tokio::select! {
        status = process.wait() => status,
        Ok(()) = &mut stop_rx => {
            cancelled = true;
            if let Err(e) = process.graceful_terminate(settings.terminate_timeout).await {
                tracing::warn!(handle = %handle, error = %e, "Failed to terminate agent process");
            }
            process.wait().await
        }
        () = inner.shutdown.cancelled() => {
            cancelled = true;
            if let Err(e) = process.kill().await {
                tracing::warn!(handle = %handle, error = %e, "Failed to kill agent process");
            }
            process.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(handle = %handle, error = %e, "Failed to wait for agent process");
            None
        }
    };

    let pipe_limit = cancelled.then_some(settings.terminate_timeout);
    let capture = join_pump(stdout_task, pipe_limit, &handle).await;
    let stderr = join_pump(stderr_task, pipe_limit, &handle).await;

    inner.remove(&handle);
    tracing::info!(handle = %handle, code = ?code, cancelled, "Agent process exited");

    let exit = ProcessExit {
        handle,
        code,
        cancelled,
        stdout: capture.output.into_string(),
        stderr,
        session_id: capture.session_id,
        terminal: capture.terminal,
    };
    inner
        .bus
        .publish(HostEvent::StreamEnd {
            handle: exit.handle.clone(),
            code,
            session_id: exit.session_id.clone(),
            result: exit.terminal.clone(),
            tail: exit.diagnostic_tail(settings.error_tail_chars),
        })
        .await;

    if exit_tx.send(exit).is_err() {
        tracing::trace!("Exit receiver dropped");
    }
}
