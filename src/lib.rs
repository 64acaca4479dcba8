//! Claude Stream Host - Process supervision and streaming turn reconstruction
//! for Claude Code.

pub mod cli;
pub mod config;
pub mod conversation;
pub mod display;
pub mod supervisor;
