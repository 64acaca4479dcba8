//! Conversation state: tool tracking, turn reconstruction and aggregation.

mod activity;
mod chat;
mod message;
mod reconstruct;
mod usage;

pub use activity::*;
pub use chat::*;
pub use message::*;
pub use reconstruct::*;
pub use usage::*;
