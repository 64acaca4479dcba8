//! Tests for stream record classification.

use claude_stream_host::cli::{classify, classify_record, AgentEvent, AssistantBlock};

#[test]
fn classify_text_delta() {
    let event = classify(
        r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}}"#,
    )
    .unwrap();
    assert_eq!(
        event,
        AgentEvent::TextDelta {
            text: "Hello".to_string()
        }
    );
}

#[test]
fn classify_non_text_delta_is_unrecognized() {
    let event = classify(
        r#"{"type":"stream_event","event":{"delta":{"type":"input_json_delta","partial_json":"{\"a\""}}}"#,
    )
    .unwrap();
    assert_eq!(event, AgentEvent::Unrecognized);

    let event = classify(r#"{"type":"stream_event","event":{"type":"message_stop"}}"#).unwrap();
    assert_eq!(event, AgentEvent::Unrecognized);
}

#[test]
fn classify_assistant_mixed_content() {
    let event = classify(
        r#"{"type":"assistant","message":{"id":"m1","content":[{"type":"text","text":"Let me look."},{"type":"tool_use","id":"t1","name":"mcp__fs__Read","input":{"file_path":"a.txt"}},{"type":"thinking","thinking":"..."}]}}"#,
    )
    .unwrap();

    let AgentEvent::AssistantContent { blocks } = event else {
        panic!("Expected AssistantContent");
    };
    assert_eq!(blocks.len(), 2);
    assert!(matches!(&blocks[0], AssistantBlock::Text { text } if text == "Let me look."));
    match &blocks[1] {
        AssistantBlock::ToolUse { id, name, input } => {
            assert_eq!(id.as_deref(), Some("t1"));
            assert_eq!(name, "mcp__fs__Read");
            assert_eq!(input["file_path"], "a.txt");
        }
        AssistantBlock::Text { .. } => panic!("Expected ToolUse"),
    }
}

#[test]
fn classify_tool_results() {
    let event = classify(
        r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":[{"type":"text","text":"line one"},{"type":"text","text":"line two"}]},{"type":"tool_result","tool_use_id":"t2","content":"denied","is_error":true}]}}"#,
    )
    .unwrap();

    let AgentEvent::ToolResults { results } = event else {
        panic!("Expected ToolResults");
    };
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].tool_use_id, "t1");
    assert_eq!(results[0].output, "line one\nline two");
    assert!(!results[0].is_error);
    assert!(results[1].is_error);
    assert_eq!(results[1].output, "denied");
}

#[test]
fn classify_terminal_result() {
    let event = classify(
        r#"{"type":"result","subtype":"success","session_id":"s1","is_error":false,"result":"done","usage":{"input_tokens":12,"output_tokens":34},"total_cost_usd":0.02}"#,
    )
    .unwrap();

    assert!(event.is_terminal());
    assert_eq!(event.session_id(), Some("s1"));
    let AgentEvent::TerminalResult(result) = event else {
        panic!("Expected TerminalResult");
    };
    assert!(result.success);
    assert_eq!(result.usage.map(|u| u.output_tokens), Some(34));
}

#[test]
fn classify_error_result_is_not_success() {
    let AgentEvent::TerminalResult(result) =
        classify(r#"{"type":"result","subtype":"error_max_turns","is_error":true}"#).unwrap()
    else {
        panic!("Expected TerminalResult");
    };
    assert!(!result.success);
    assert_eq!(result.subtype, "error_max_turns");
}

#[test]
fn classify_unknown_type() {
    assert_eq!(
        classify(r#"{"type":"rate_limit","retry_after":3}"#).unwrap(),
        AgentEvent::Unrecognized
    );
    assert_eq!(
        classify(r#"{"type":"system","subtype":"compact_boundary"}"#).unwrap(),
        AgentEvent::Unrecognized
    );
}

#[test]
fn classify_skips_non_protocol_lines() {
    assert!(classify("").is_err());
    assert!(classify("   ").is_err());
    assert!(classify("Warning: something odd").is_err());
    assert!(classify(r#"{"no_type":true}"#).is_err());
    assert!(classify("[1,2,3]").is_err());
}

#[test]
fn classify_record_keeps_raw_json() {
    let record = classify_record(r#"{"type":"system","subtype":"init","session_id":"s1","model":"sonnet"}"#)
        .unwrap();
    assert_eq!(record.raw["model"], "sonnet");
    assert_eq!(record.event.session_id(), Some("s1"));
}
