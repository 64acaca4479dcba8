//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::{ClaudeProcessBuilder, OutputFormat, PermissionMode};

/// Per-conversation invocation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatOptions {
    /// Working directory for the agent. Required before sending.
    pub cwd: Option<PathBuf>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub permission_mode: Option<PermissionMode>,
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub system_prompt: Option<String>,
    pub append_system_prompt: Option<String>,
    /// Pick up the most recent conversation in `cwd` until a session id is
    /// known.
    pub continue_last: bool,
}

impl ChatOptions {
    /// Build an invocation for `prompt`, resuming `session_id` when given.
    ///
    /// Without a session id, `continue_last` continues the latest conversation.
    #[must_use]
    pub fn builder(
        &self,
        prompt: &str,
        format: OutputFormat,
        session_id: Option<&str>,
    ) -> ClaudeProcessBuilder {
        let mut builder = ClaudeProcessBuilder::new(prompt)
            .output_format(format)
            .allowed_tools(&self.allowed_tools)
            .disallowed_tools(&self.disallowed_tools);

        if let Some(cwd) = &self.cwd {
            builder = builder.working_dir(cwd);
        }
        if let Some(id) = session_id {
            builder = builder.resume(id);
        } else if self.continue_last {
            builder = builder.continue_last();
        }
        if let Some(mode) = self.permission_mode {
            builder = builder.permission_mode(mode);
        }
        if let Some(model) = &self.model {
            builder = builder.model(model);
        }
        if let Some(turns) = self.max_turns {
            builder = builder.max_turns(turns);
        }
        if let Some(prompt) = &self.system_prompt {
            builder = builder.system_prompt(prompt);
        }
        if let Some(prompt) = &self.append_system_prompt {
            builder = builder.append_system_prompt(prompt);
        }
        builder
    }
}

/// Host-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Agent executable name or path.
    pub binary: String,
    /// Launch through the platform shell instead of directly.
    pub use_shell: bool,
    /// Grace period between SIGTERM and SIGKILL on cancel.
    pub terminate_timeout_secs: u64,
    /// Events queued per subscriber before publishers wait.
    pub event_capacity: usize,
    /// Characters of process output kept for error messages.
    pub error_tail_chars: usize,
    /// Defaults for chat sessions.
    pub chat: ChatOptions,
}

impl HostConfig {
    #[must_use]
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            use_shell: false,
            terminate_timeout_secs: 5,
            event_capacity: 256,
            error_tail_chars: 500,
            chat: ChatOptions::default(),
        }
    }
}
