//! Errors reported for a turn.

use crate::cli::SpawnError;

/// Why a turn did not produce a response.
#[derive(thiserror::Error, Debug)]
pub enum HostError {
    #[error("Failed to start agent: {0}")]
    Spawn(#[from] SpawnError),

    #[error("Process exited with code {}: {tail}", display_code(.code))]
    Process { code: Option<i32>, tail: String },

    #[error("Failed to parse response: {reason}: {tail}")]
    Parse { reason: String, tail: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Please select a working directory first")]
    MissingWorkingDir,

    #[error("A turn is already in progress")]
    Busy,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// Last `limit` characters of `text`.
#[must_use]
pub fn tail_chars(text: &str, limit: usize) -> &str {
    let count = text.chars().count();
    if count <= limit {
        return text;
    }
    text.char_indices()
        .nth(count - limit)
        .map_or(text, |(offset, _)| &text[offset..])
}
