//! CLI module tests.

mod events_test;
mod process_test;
mod stream_test;

/// Verify the public cli types are exported from the library.
#[test]
fn test_all_cli_types_exported() {
    use claude_stream_host::cli::{
        classify, classify_record, decode_response, AgentEvent, ClaudeProcessBuilder,
        LineFramer, OutputFormat, ParseSkip, PermissionMode, SpawnError, READ_CHUNK_SIZE,
    };

    let _ = LineFramer::new();
    let _ = ClaudeProcessBuilder::new("task").output_format(OutputFormat::StreamJson);
    let _: fn(&str) -> Result<AgentEvent, ParseSkip> = classify;
    let _ = classify_record;
    let _ = decode_response;
    let _ = PermissionMode::Plan;
    let _: fn() -> SpawnError = || SpawnError::NotFound;
    assert!(READ_CHUNK_SIZE > 0);
}
