//! Turn reconstruction.
//!
//! Merges streamed text fragments and tool sightings into an ordered list of
//! content blocks. A tool is placed at the text offset where it was first
//! seen; the text between two tools becomes a text block of its own.

use std::collections::HashSet;

use serde::Serialize;

use crate::cli::{AgentEvent, AssistantBlock, TerminalResult};
use crate::conversation::{ToolActivity, ToolStatus, ToolTracker};
use crate::supervisor::ProcessHandle;

/// A unit of a turn's rendered body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(String),
    Tool(ToolActivity),
}

/// Incremental change produced by applying one event.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    /// The agent reported its session id.
    SessionStarted(String),
    /// New text fragment (only the fragment, never the whole text).
    Text(String),
    /// A tool was seen for the first time.
    ToolStarted(ToolActivity),
    /// A tool reached a terminal state.
    ToolFinished(ToolActivity),
    /// The turn ended.
    Finished { success: bool },
}

/// Block placeholder; tools are bound to their latest state at flush time.
#[derive(Debug, Clone)]
enum Slot {
    Text(String),
    Tool(String),
}

/// The finalized body of one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedTurn {
    pub handle: ProcessHandle,
    /// Full accumulated text.
    pub content: String,
    /// Structured body; `None` when the turn used no tools.
    pub blocks: Option<Vec<ContentBlock>>,
    pub session_id: Option<String>,
    pub terminal: Option<TerminalResult>,
    pub success: bool,
}

/// Reconstruction state for the turn owned by one process handle.
#[derive(Debug)]
pub struct TurnReconstructor {
    handle: ProcessHandle,
    text: String,
    tracker: ToolTracker,
    slots: Vec<Slot>,
    last_position: usize,
    saw_delta: bool,
    session_id: Option<String>,
    terminal: Option<TerminalResult>,
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

impl TurnReconstructor {
    /// Start reconstructing the turn streamed by `handle`.
    #[must_use]
    pub fn new(handle: ProcessHandle) -> Self {
        Self {
            handle,
            text: String::new(),
            tracker: ToolTracker::new(),
            slots: Vec::new(),
            last_position: 0,
            saw_delta: false,
            session_id: None,
            terminal: None,
        }
    }

    /// The handle this turn belongs to.
    #[must_use]
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Text accumulated so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Tools seen so far.
    #[must_use]
    pub fn tools(&self) -> &ToolTracker {
        &self.tracker
    }

    /// Session id reported by the stream, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Terminal record, once seen.
    #[must_use]
    pub fn terminal(&self) -> Option<&TerminalResult> {
        self.terminal.as_ref()
    }

    /// Apply one classified event.
    pub fn apply(&mut self, event: &AgentEvent) -> Vec<TurnUpdate> {
        match event {
            AgentEvent::Init { session_id } => {
                self.session_id = Some(session_id.clone());
                vec![TurnUpdate::SessionStarted(session_id.clone())]
            }
            AgentEvent::TextDelta { text } => {
                self.saw_delta = true;
                self.push_text(text)
            }
            AgentEvent::AssistantContent { blocks } => {
                let mut updates = Vec::new();
                for block in blocks {
                    match block {
                        // Deltas already carried this text.
                        AssistantBlock::Text { text } if !self.saw_delta => {
                            updates.extend(self.push_text(text));
                        }
                        AssistantBlock::Text { .. } => {}
                        AssistantBlock::ToolUse { id, name, input } => {
                            updates.extend(self.insert_tool(id.as_deref(), name, input));
                        }
                    }
                }
                updates
            }
            AgentEvent::ToolResults { results } => {
                let mut updates = Vec::new();
                for result in results {
                    if self
                        .tracker
                        .resolve(&result.tool_use_id, &result.output, result.is_error)
                    {
                        if let Some(activity) = self.tracker.get(&result.tool_use_id) {
                            updates.push(TurnUpdate::ToolFinished(activity.clone()));
                        }
                    }
                }
                updates
            }
            AgentEvent::TerminalResult(result) => {
                if let Some(session_id) = &result.session_id {
                    self.session_id = Some(session_id.clone());
                }
                self.terminal = Some(result.clone());
                let status = if result.success {
                    ToolStatus::Completed
                } else {
                    ToolStatus::Error
                };
                self.close_tools(status)
            }
            AgentEvent::Unrecognized => Vec::new(),
        }
    }

    fn push_text(&mut self, text: &str) -> Vec<TurnUpdate> {
        if text.is_empty() {
            return Vec::new();
        }
        self.text.push_str(text);
        vec![TurnUpdate::Text(text.to_string())]
    }

    fn insert_tool(
        &mut self,
        id: Option<&str>,
        name: &str,
        input: &serde_json::Value,
    ) -> Vec<TurnUpdate> {
        let position = self.text.len();
        let Some(id) = self.tracker.observe(id, name, input, position) else {
            return Vec::new();
        };

        let preceding = &self.text[self.last_position..position];
        if !is_blank(preceding) {
            self.slots.push(Slot::Text(preceding.to_string()));
        }
        self.slots.push(Slot::Tool(id.clone()));
        self.last_position = position;

        self.tracker
            .get(&id)
            .map(|activity| TurnUpdate::ToolStarted(activity.clone()))
            .into_iter()
            .collect()
    }

    fn close_tools(&mut self, status: ToolStatus) -> Vec<TurnUpdate> {
        self.tracker
            .close_open(status)
            .iter()
            .filter_map(|id| self.tracker.get(id))
            .map(|activity| TurnUpdate::ToolFinished(activity.clone()))
            .collect()
    }

    fn bind(&self, slots: &[Slot]) -> Vec<ContentBlock> {
        let mut seen = HashSet::new();
        slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Text(text) => Some(ContentBlock::Text(text.clone())),
                Slot::Tool(id) if seen.insert(id.as_str()) => {
                    self.tracker.get(id).cloned().map(ContentBlock::Tool)
                }
                Slot::Tool(_) => None,
            })
            .collect()
    }

    /// Current blocks, including text after the last tool.
    #[must_use]
    pub fn snapshot_blocks(&self) -> Vec<ContentBlock> {
        let mut blocks = self.bind(&self.slots);
        let trailing = &self.text[self.last_position..];
        if !is_blank(trailing) {
            blocks.push(ContentBlock::Text(trailing.to_string()));
        }
        blocks
    }

    /// Close the turn after its process exited.
    ///
    /// Tools still open are completed on a clean exit and errored otherwise.
    #[must_use]
    pub fn finish(mut self, exit_code: Option<i32>) -> FinishedTurn {
        let clean = exit_code == Some(0);
        let status = if clean {
            ToolStatus::Completed
        } else {
            ToolStatus::Error
        };
        self.tracker.close_open(status);
        let success = clean && self.terminal.as_ref().map_or(true, |t| t.success);
        self.finalize(success)
    }

    /// Close the turn after cancellation. Open tools become errors.
    #[must_use]
    pub fn cancel(mut self) -> FinishedTurn {
        self.tracker.close_open(ToolStatus::Error);
        self.finalize(false)
    }

    fn finalize(mut self, success: bool) -> FinishedTurn {
        let trailing = &self.text[self.last_position..];
        if !is_blank(trailing) {
            self.slots.push(Slot::Text(trailing.to_string()));
        }
        self.last_position = self.text.len();

        let blocks = if self.tracker.is_empty() {
            None
        } else {
            Some(self.bind(&self.slots))
        };

        tracing::debug!(
            handle = %self.handle,
            blocks = blocks.as_ref().map_or(0, Vec::len),
            tools = self.tracker.len(),
            success,
            "Turn finalized"
        );

        FinishedTurn {
            handle: self.handle,
            content: self.text,
            blocks,
            session_id: self.session_id,
            terminal: self.terminal,
            success,
        }
    }
}
