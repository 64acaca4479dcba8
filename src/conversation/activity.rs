//! Tool activity tracking.
//!
//! Each tool invocation the agent makes is recorded once, keyed by its id,
//! and moves through `pending -> running -> {completed | error}`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Separator used by namespaced tool names (`mcp__server__Tool`).
const NAMESPACE_SEPARATOR: &str = "__";

/// Lifecycle state of a tool invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Reserved; current event shapes start tools as running.
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    /// Completed and error are final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Strip a namespaced tool name down to its trailing segment.
#[must_use]
pub fn base_tool_name(name: &str) -> &str {
    name.rsplit(NAMESPACE_SEPARATOR).next().unwrap_or(name)
}

/// One tool invocation by the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolActivity {
    pub id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    pub input: serde_json::Value,
    pub output: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    text_position: usize,
}

impl ToolActivity {
    /// Name without its namespace prefix.
    #[must_use]
    pub fn base_name(&self) -> &str {
        base_tool_name(&self.tool_name)
    }

    /// Offset in the turn's text at which the tool was first observed.
    #[must_use]
    pub fn text_position(&self) -> usize {
        self.text_position
    }

    /// Move to a terminal state. No-op once terminal.
    fn finish(&mut self, status: ToolStatus, output: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        tracing::trace!(id = %self.id, from = ?self.status, to = ?status, "Tool transition");
        self.status = status;
        if output.is_some() {
            self.output = output;
        }
        self.end_time = Some(Utc::now());
        true
    }
}

/// Registry of a turn's tool invocations, deduplicated by id.
#[derive(Debug, Default)]
pub struct ToolTracker {
    activities: HashMap<String, ToolActivity>,
    /// Ids in first-sighting order.
    order: Vec<String>,
}

impl ToolTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tool invocation sighting.
    ///
    /// Returns the id of a newly created activity, or `None` when the id was
    /// already known. A missing upstream id is synthesized.
    pub fn observe(
        &mut self,
        id: Option<&str>,
        name: &str,
        input: &serde_json::Value,
        text_position: usize,
    ) -> Option<String> {
        let id = id.map_or_else(|| format!("tool-{}", Uuid::new_v4()), str::to_string);
        if self.activities.contains_key(&id) {
            tracing::trace!(id = %id, "Duplicate tool sighting ignored");
            return None;
        }

        let activity = ToolActivity {
            id: id.clone(),
            tool_name: name.to_string(),
            status: ToolStatus::Running,
            input: input.clone(),
            output: None,
            start_time: Utc::now(),
            end_time: None,
            text_position,
        };
        self.activities.insert(id.clone(), activity);
        self.order.push(id.clone());
        Some(id)
    }

    /// Apply a result to a tool. Unknown ids and finished tools are no-ops.
    pub fn resolve(&mut self, id: &str, output: &str, is_error: bool) -> bool {
        let status = if is_error {
            ToolStatus::Error
        } else {
            ToolStatus::Completed
        };
        self.activities
            .get_mut(id)
            .is_some_and(|activity| activity.finish(status, Some(output.to_string())))
    }

    /// Force every non-terminal tool into `status`. Returns the ids closed.
    pub fn close_open(&mut self, status: ToolStatus) -> Vec<String> {
        let mut closed = Vec::new();
        for id in &self.order {
            if let Some(activity) = self.activities.get_mut(id) {
                if activity.finish(status, None) {
                    closed.push(id.clone());
                }
            }
        }
        closed
    }

    /// Get an activity by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ToolActivity> {
        self.activities.get(id)
    }

    /// Activities in first-sighting order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolActivity> {
        self.order.iter().filter_map(|id| self.activities.get(id))
    }

    /// Number of tracked activities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no tool has been observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget all activities.
    pub fn clear(&mut self) {
        self.activities.clear();
        self.order.clear();
    }
}
