//! Process handle identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier of one spawned agent process.
///
/// Unique within the host's lifetime; never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessHandle(String);

impl ProcessHandle {
    /// Generate a fresh handle.
    #[must_use]
    pub fn generate() -> Self {
        let seq = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        Self(format!("proc-{}-{seq}", Utc::now().timestamp_millis()))
    }

    /// The handle as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
