//! Event types from Claude Code stream-json output.
//!
//! Records are decoded in two steps. The wire shape ([`ClaudeEvent`]) mirrors
//! the JSON the agent writes, one object per line. Classification then folds
//! it into the closed [`AgentEvent`] set the rest of the crate works with.
//! Anything that fails to decode is a [`ParseSkip`]: upstream interleaves
//! diagnostic lines with protocol lines, so callers drop these silently.

use serde::{Deserialize, Serialize};

/// Token counts reported by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
}

/// System event data (`type = "system"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    /// Event subtype (e.g., "init").
    pub subtype: String,
    /// Session identifier, present on `init`.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Current working directory.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Model in use.
    #[serde(default)]
    pub model: Option<String>,
    /// Available tools for this session.
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Content delta types for streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    /// Text content delta.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// JSON input delta (for tool inputs).
    InputJsonDelta {
        /// Partial JSON string.
        partial_json: String,
    },
    /// Thinking content delta.
    ThinkingDelta {
        /// The thinking fragment.
        thinking: String,
    },
    /// Catch-all for unknown delta types.
    #[serde(other)]
    Unknown,
}

/// Inner payload of a `stream_event` record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamPayload {
    /// Only `content_block_delta` events carry a delta.
    #[serde(default)]
    pub delta: Option<ContentDelta>,
}

/// A content block within an assistant or user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireBlock {
    /// Text content.
    Text { text: String },
    /// Tool use request.
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Tool result.
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    /// Unknown block type.
    #[serde(other)]
    Unknown,
}

/// Message content - plain text or structured blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    /// Structured content blocks.
    Blocks(Vec<WireBlock>),
    /// Plain text content.
    Text(String),
}

impl Default for WireContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

/// The `message` object of assistant and user records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub content: WireContent,
}

impl WireMessage {
    fn into_blocks(self) -> Vec<WireBlock> {
        match self.content {
            WireContent::Blocks(blocks) => blocks,
            WireContent::Text(text) => vec![WireBlock::Text { text }],
        }
    }
}

/// Final result event data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    /// Result subtype (e.g., "success", "`error_max_turns`").
    pub subtype: String,
    /// Session identifier.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Whether an error occurred.
    #[serde(default)]
    pub is_error: bool,
    /// Final response text.
    #[serde(default)]
    pub result: Option<String>,
    /// Token usage for the turn.
    #[serde(default)]
    pub usage: Option<Usage>,
    /// Total cost in USD.
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    /// Total duration in milliseconds.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Number of conversation turns.
    #[serde(default)]
    pub num_turns: Option<u32>,
}

/// Events emitted by Claude Code in stream-json format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeEvent {
    /// System event (`init` carries the session id).
    System(SystemEvent),
    /// Raw API stream event wrapper.
    StreamEvent {
        /// Inner API event.
        #[serde(default)]
        event: StreamPayload,
    },
    /// Assistant message event.
    Assistant {
        /// Message content.
        #[serde(default)]
        message: WireMessage,
    },
    /// User message event (tool results).
    User {
        /// Message content.
        #[serde(default)]
        message: WireMessage,
    },
    /// Final result event.
    Result(ResultEvent),
    /// Catch-all for unknown event types.
    #[serde(other)]
    Unknown,
}

/// One sub-block of an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantBlock {
    /// Plain text.
    Text { text: String },
    /// Tool invocation; `id` is absent when upstream omitted it.
    ToolUse {
        id: Option<String>,
        name: String,
        input: serde_json::Value,
    },
}

/// A tool result correlated by invocation id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub output: String,
    pub is_error: bool,
}

/// Terminal `result` record of a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminalResult {
    pub subtype: String,
    pub success: bool,
    pub session_id: Option<String>,
    pub result: Option<String>,
    pub usage: Option<Usage>,
    pub total_cost_usd: Option<f64>,
}

/// Classified stream event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Turn/session start.
    Init { session_id: String },
    /// Structured assistant content.
    AssistantContent { blocks: Vec<AssistantBlock> },
    /// Tool results from the user side of the exchange.
    ToolResults { results: Vec<ToolResultBlock> },
    /// Incremental text for the streaming turn.
    TextDelta { text: String },
    /// Turn terminal.
    TerminalResult(TerminalResult),
    /// Valid record of a kind this crate does not consume.
    Unrecognized,
}

impl AgentEvent {
    /// Returns true if this is a terminal event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TerminalResult(_))
    }

    /// Returns the session ID if this event carries one.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Init { session_id } => Some(session_id),
            Self::TerminalResult(result) => result.session_id.as_deref(),
            _ => None,
        }
    }
}

impl From<ClaudeEvent> for AgentEvent {
    fn from(event: ClaudeEvent) -> Self {
        match event {
            ClaudeEvent::System(system) => match (system.subtype.as_str(), system.session_id) {
                ("init", Some(session_id)) => Self::Init { session_id },
                _ => Self::Unrecognized,
            },
            ClaudeEvent::StreamEvent { event } => match event.delta {
                Some(ContentDelta::TextDelta { text }) => Self::TextDelta { text },
                _ => Self::Unrecognized,
            },
            ClaudeEvent::Assistant { message } => {
                let blocks = message
                    .into_blocks()
                    .into_iter()
                    .filter_map(|block| match block {
                        WireBlock::Text { text } => Some(AssistantBlock::Text { text }),
                        WireBlock::ToolUse { id, name, input } => {
                            Some(AssistantBlock::ToolUse { id, name, input })
                        }
                        _ => None,
                    })
                    .collect();
                Self::AssistantContent { blocks }
            }
            ClaudeEvent::User { message } => {
                let results = message
                    .into_blocks()
                    .into_iter()
                    .filter_map(|block| match block {
                        WireBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => Some(ToolResultBlock {
                            tool_use_id,
                            output: result_text(&content),
                            is_error,
                        }),
                        _ => None,
                    })
                    .collect();
                Self::ToolResults { results }
            }
            ClaudeEvent::Result(result) => Self::TerminalResult(TerminalResult {
                success: result.subtype == "success" && !result.is_error,
                subtype: result.subtype,
                session_id: result.session_id,
                result: result.result,
                usage: result.usage,
                total_cost_usd: result.total_cost_usd,
            }),
            ClaudeEvent::Unknown => Self::Unrecognized,
        }
    }
}

/// Flatten tool result content into display text.
///
/// Content is either a string or an array of `{type: "text", text}` blocks.
fn result_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(serde_json::Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// A record that could not be decoded as a protocol event.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Skipped non-protocol record: {reason}")]
pub struct ParseSkip {
    /// Decoder error message.
    pub reason: String,
}

impl From<serde_json::Error> for ParseSkip {
    fn from(err: serde_json::Error) -> Self {
        Self {
            reason: err.to_string(),
        }
    }
}

/// A decoded record with both its raw JSON and its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRecord {
    pub raw: serde_json::Value,
    pub event: AgentEvent,
}

/// Decode one complete record, keeping the raw JSON alongside the event.
///
/// # Errors
///
/// Returns `ParseSkip` for blank lines, non-JSON lines and JSON that does not
/// match any event shape.
pub fn classify_record(record: &str) -> Result<ClassifiedRecord, ParseSkip> {
    let trimmed = record.trim();
    if trimmed.is_empty() {
        return Err(ParseSkip {
            reason: "empty record".to_string(),
        });
    }
    let raw: serde_json::Value = serde_json::from_str(trimmed)?;
    let wire = ClaudeEvent::deserialize(&raw)?;
    Ok(ClassifiedRecord {
        raw,
        event: wire.into(),
    })
}

/// Classify one complete record.
///
/// # Errors
///
/// Returns `ParseSkip` if the record is not a protocol event.
pub fn classify(record: &str) -> Result<AgentEvent, ParseSkip> {
    classify_record(record).map(|record| record.event)
}
