//! Token usage and session aggregation across turns.

use serde::Serialize;

use crate::cli::Usage;

/// Token counts contributed by one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl From<&Usage> for UsageDelta {
    fn from(usage: &Usage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        }
    }
}

/// Cumulative token counts.
///
/// Every count saturates at `u64::MAX`. `total` equals `input + output`
/// unless that sum saturates, in which case it stays at `u64::MAX`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    input_tokens: u64,
    output_tokens: u64,
    total_tokens: u64,
}

impl UsageStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    #[must_use]
    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    /// Fold one turn's counts into the totals, saturating instead of wrapping.
    pub fn add(&mut self, delta: UsageDelta) {
        self.input_tokens = self.input_tokens.saturating_add(delta.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(delta.output_tokens);
        self.total_tokens = self.input_tokens.saturating_add(self.output_tokens);
    }
}

/// Conversation-level state carried between turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionAggregator {
    session_id: Option<String>,
    usage: UsageStats,
    total_cost_usd: f64,
    completed_turns: u32,
}

impl SessionAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed turn.
    ///
    /// A reported session id replaces the stored one; an absent id leaves it.
    pub fn on_turn_completed(&mut self, session_id: Option<&str>, delta: UsageDelta) {
        if let Some(id) = session_id {
            if self.session_id.as_deref() != Some(id) {
                tracing::debug!(session_id = %id, "Session id updated");
            }
            self.session_id = Some(id.to_string());
        }
        self.usage.add(delta);
        self.completed_turns = self.completed_turns.saturating_add(1);
    }

    /// Add the reported cost of a turn.
    pub fn record_cost(&mut self, cost_usd: Option<f64>) {
        if let Some(cost) = cost_usd.filter(|c| c.is_finite() && *c >= 0.0) {
            self.total_cost_usd += cost;
        }
    }

    /// Forget the session id, usage and cost.
    pub fn reset_session(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn usage(&self) -> UsageStats {
        self.usage
    }

    #[must_use]
    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_usd
    }

    #[must_use]
    pub fn completed_turns(&self) -> u32 {
        self.completed_turns
    }
}
