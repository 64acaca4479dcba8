//! Whole-document response from `--output-format json`.

use serde::{Deserialize, Serialize};

use crate::cli::Usage;

/// Structured fallback shape of `result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// The `result` field: normally a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseResult {
    Text(String),
    Structured { content: Vec<ResultContent> },
}

/// Final document written by a non-streaming invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaudeResponse {
    #[serde(default)]
    pub session_id: Option<String>,
    pub result: ResponseResult,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub is_error: bool,
}

impl ClaudeResponse {
    /// Response text; structured results join their text entries by newline.
    #[must_use]
    pub fn text(&self) -> String {
        match &self.result {
            ResponseResult::Text(text) => text.clone(),
            ResponseResult::Structured { content } => content
                .iter()
                .filter(|c| c.kind == "text")
                .filter_map(|c| c.text.as_deref())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Decode buffered stdout as a [`ClaudeResponse`].
///
/// Tries the whole output first, then the outermost `{...}` span.
///
/// # Errors
///
/// Returns the error from the whole-output attempt if neither succeeds.
pub fn decode_response(stdout: &str) -> Result<ClaudeResponse, serde_json::Error> {
    let err = match serde_json::from_str::<ClaudeResponse>(stdout.trim()) {
        Ok(response) => return Ok(response),
        Err(e) => e,
    };

    if let Some(candidate) = extract_outermost_object(stdout) {
        if let Ok(response) = serde_json::from_str::<ClaudeResponse>(candidate) {
            tracing::debug!("Decoded response via outermost-object fallback");
            return Ok(response);
        }
    }

    Err(err)
}

/// Best-effort location of the outermost JSON object in noisy output.
///
/// Spans the first `{` to the last `}`, so braces inside string content can
/// still fool it.
#[must_use]
pub fn extract_outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}
