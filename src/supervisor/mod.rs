//! Supervisor module for agent process lifecycle and event fan-out.

mod error;
mod events;
mod handle;
mod host;
mod mcp;

pub use error::*;
pub use events::*;
pub use handle::*;
pub use host::*;
pub use mcp::*;
