//! Caller-side conversation driver.
//!
//! A [`ChatSession`] owns the message log and the session aggregator, and at
//! most one active turn. Host events for any other handle are ignored, so
//! output from a cancelled or superseded process never reaches the log.

use crate::cli::{OutputFormat, TerminalResult};
use crate::config::ChatOptions;
use crate::conversation::{
    Message, SessionAggregator, TurnReconstructor, TurnUpdate, UsageDelta, UsageStats,
};
use crate::supervisor::{HostError, HostEvent, ProcessHandle, ProcessSupervisor};

const NO_RESPONSE: &str = "No response received";
const CANCELLED_MARKER: &str = "[Cancelled]";

/// The turn currently being streamed.
#[derive(Debug)]
struct ActiveTurn {
    reconstructor: TurnReconstructor,
    /// Id of the placeholder message being filled in.
    message_id: String,
}

fn message_mut<'a>(messages: &'a mut [Message], id: &str) -> Option<&'a mut Message> {
    messages.iter_mut().rev().find(|m| m.id == id)
}

/// A conversation with the agent, resumed across turns by session id.
#[derive(Debug)]
pub struct ChatSession {
    options: ChatOptions,
    messages: Vec<Message>,
    aggregator: SessionAggregator,
    active: Option<ActiveTurn>,
    error: Option<String>,
}

impl ChatSession {
    #[must_use]
    pub fn new(options: ChatOptions) -> Self {
        Self {
            options,
            messages: Vec::new(),
            aggregator: SessionAggregator::new(),
            active: None,
            error: None,
        }
    }

    #[must_use]
    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    /// Options used for subsequent turns.
    pub fn options_mut(&mut self) -> &mut ChatOptions {
        &mut self.options
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn usage(&self) -> UsageStats {
        self.aggregator.usage()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.aggregator.session_id()
    }

    #[must_use]
    pub fn total_cost_usd(&self) -> f64 {
        self.aggregator.total_cost_usd()
    }

    #[must_use]
    pub fn completed_turns(&self) -> u32 {
        self.aggregator.completed_turns()
    }

    /// Last user-facing error, if not cleared.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Handle of the turn that events are currently applied to.
    #[must_use]
    pub fn active_handle(&self) -> Option<&ProcessHandle> {
        self.active.as_ref().map(|a| a.reconstructor.handle())
    }

    /// Text of the active turn so far.
    #[must_use]
    pub fn streaming_text(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.reconstructor.text())
    }

    fn require_ready(&mut self) -> Result<(), HostError> {
        let err = if self.active.is_some() {
            HostError::Busy
        } else if self.options.cwd.is_none() {
            HostError::MissingWorkingDir
        } else {
            return Ok(());
        };
        self.error = Some(err.to_string());
        Err(err)
    }

    fn fail(&mut self, err: &HostError) {
        let message = err.to_string();
        tracing::warn!(error = %message, "Turn failed");
        self.messages.push(Message::system(format!("Error: {message}")));
        self.error = Some(message);
    }

    /// Run one buffered turn to completion.
    ///
    /// Failures are also recorded as a system message and as [`Self::error`].
    ///
    /// # Errors
    ///
    /// Returns `MissingWorkingDir` or `Busy` without touching the log, or the
    /// turn's `HostError`.
    pub async fn send_message(
        &mut self,
        supervisor: &ProcessSupervisor,
        prompt: &str,
    ) -> Result<(), HostError> {
        self.require_ready()?;
        self.error = None;
        self.messages.push(Message::user(prompt));

        let builder = self
            .options
            .builder(prompt, OutputFormat::Json, self.aggregator.session_id());

        match supervisor.run(&builder).await {
            Ok(response) => {
                self.aggregator.record_cost(response.total_cost_usd);
                self.aggregator.on_turn_completed(
                    response.session_id.as_deref(),
                    UsageDelta::from(&response.usage),
                );
                let text = response.text();
                let content = if text.is_empty() {
                    NO_RESPONSE.to_string()
                } else {
                    text
                };
                self.messages.push(Message::assistant(content, None));
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Start a streaming turn and return once the process is registered.
    ///
    /// Subscribe to the supervisor before calling this, then feed every
    /// event to [`Self::handle_event`].
    ///
    /// # Errors
    ///
    /// Returns `MissingWorkingDir`, `Busy`, or `Spawn`.
    pub fn send_message_streaming(
        &mut self,
        supervisor: &ProcessSupervisor,
        prompt: &str,
    ) -> Result<ProcessHandle, HostError> {
        self.require_ready()?;
        self.error = None;
        self.messages.push(Message::user(prompt));
        let placeholder = Message::streaming_placeholder();
        let message_id = placeholder.id.clone();
        self.messages.push(placeholder);

        let builder = self.options.builder(
            prompt,
            OutputFormat::StreamJson,
            self.aggregator.session_id(),
        );

        match supervisor.stream(&builder) {
            Ok(handle) => {
                self.begin_turn(handle.clone(), message_id);
                Ok(handle)
            }
            Err(e) => {
                self.messages.retain(|m| m.id != message_id);
                let err = HostError::from(e);
                self.fail(&err);
                Err(err)
            }
        }
    }

    fn begin_turn(&mut self, handle: ProcessHandle, message_id: String) {
        tracing::debug!(handle = %handle, "Turn started");
        self.active = Some(ActiveTurn {
            reconstructor: TurnReconstructor::new(handle),
            message_id,
        });
    }

    /// Apply a host event to the active turn.
    ///
    /// Events for any other handle are ignored.
    pub fn handle_event(&mut self, event: &HostEvent) -> Vec<TurnUpdate> {
        let Some(active) = self.active.as_mut() else {
            return Vec::new();
        };
        if event.handle() != active.reconstructor.handle() {
            tracing::trace!(handle = %event.handle(), "Ignoring event for inactive handle");
            return Vec::new();
        }

        match event {
            HostEvent::StreamEvent { event, .. } => {
                let updates = active.reconstructor.apply(event);
                if let Some(message) = message_mut(&mut self.messages, &active.message_id) {
                    for update in &updates {
                        if let TurnUpdate::Text(text) = update {
                            message.content.push_str(text);
                        }
                    }
                }
                updates
            }
            HostEvent::Stderr { data, .. } => {
                tracing::warn!(handle = %event.handle(), data = %data.trim_end(), "Agent stderr");
                Vec::new()
            }
            HostEvent::StreamEnd {
                code,
                session_id,
                result,
                tail,
                ..
            } => self.finish_turn(*code, session_id.as_deref(), result.as_ref(), tail),
            HostEvent::StreamStart { .. }
            | HostEvent::StreamText { .. }
            | HostEvent::Progress { .. } => Vec::new(),
        }
    }

    fn finish_turn(
        &mut self,
        code: Option<i32>,
        session_id: Option<&str>,
        result: Option<&TerminalResult>,
        tail: &str,
    ) -> Vec<TurnUpdate> {
        let Some(active) = self.active.take() else {
            return Vec::new();
        };
        let turn = active.reconstructor.finish(code);

        let terminal = turn.terminal.as_ref().or(result);
        let delta = terminal
            .and_then(|t| t.usage.as_ref())
            .map(UsageDelta::from)
            .unwrap_or_default();
        self.aggregator.record_cost(terminal.and_then(|t| t.total_cost_usd));
        self.aggregator
            .on_turn_completed(turn.session_id.as_deref().or(session_id), delta);

        let mut content = turn.content;
        let mut failure = None;
        if code == Some(0) {
            if content.trim().is_empty() {
                content = NO_RESPONSE.to_string();
            }
            if let Some(t) = terminal.filter(|t| !t.success) {
                self.error = Some(format!("Agent ended the turn with {}", t.subtype));
            }
        } else {
            let err = HostError::Process {
                code,
                tail: tail.to_string(),
            };
            let marker = code.map_or_else(
                || "\n\n[Error: terminated by signal]".to_string(),
                |c| format!("\n\n[Error: exited with code {c}]"),
            );
            content.push_str(&marker);
            failure = Some(err);
        }

        if let Some(message) = message_mut(&mut self.messages, &active.message_id) {
            message.content = content;
            message.content_blocks = turn.blocks;
            message.is_streaming = false;
        }
        if let Some(err) = failure {
            self.fail(&err);
        }

        vec![TurnUpdate::Finished {
            success: turn.success,
        }]
    }

    /// Cancel the active turn, keeping its partial output.
    ///
    /// Returns false if no turn was active.
    pub fn cancel(&mut self, supervisor: &ProcessSupervisor) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        let handle = active.reconstructor.handle().clone();
        if !supervisor.cancel(&handle) {
            tracing::debug!(handle = %handle, "Process already gone at cancel");
        }

        let turn = active.reconstructor.cancel();
        if let Some(message) = message_mut(&mut self.messages, &active.message_id) {
            message.content = if turn.content.is_empty() {
                CANCELLED_MARKER.to_string()
            } else {
                format!("{}\n\n{CANCELLED_MARKER}", turn.content)
            };
            message.content_blocks = turn.blocks;
            message.is_streaming = false;
        }
        tracing::info!(handle = %handle, "Turn cancelled");
        true
    }

    /// Start a new conversation.
    ///
    /// Clears messages, session, usage and any in-flight turn. Returns the
    /// abandoned turn's handle so the caller can cancel its process.
    pub fn clear_session(&mut self) -> Option<ProcessHandle> {
        self.messages.clear();
        self.aggregator.reset_session();
        self.options.continue_last = false;
        self.error = None;
        self.active
            .take()
            .map(|active| active.reconstructor.handle().clone())
    }
}
