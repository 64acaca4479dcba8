//! CLI module for Claude Code process spawning and stream decoding.

mod events;
mod process;
mod response;
mod stream;

pub use events::*;
pub use process::*;
pub use response::*;
pub use stream::*;
