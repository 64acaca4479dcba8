//! End-to-end chat sessions against fake agents.

use std::time::Duration;

use claude_stream_host::config::{ChatOptions, HostConfig};
use claude_stream_host::conversation::{ChatSession, ContentBlock, Role, TurnUpdate};
use claude_stream_host::supervisor::{HostError, ProcessSupervisor, Subscription};

use crate::support::{FakeAgent, STREAM_TURN};

const LIMIT: Duration = Duration::from_secs(10);

fn chat_in(agent: &FakeAgent) -> ChatSession {
    ChatSession::new(ChatOptions {
        cwd: Some(agent.dir().to_path_buf()),
        ..ChatOptions::default()
    })
}

/// Feed events to the chat until its turn finishes.
async fn drive(chat: &mut ChatSession, events: &mut Subscription) -> Vec<TurnUpdate> {
    let mut updates = Vec::new();
    while chat.is_streaming() {
        let event = tokio::time::timeout(LIMIT, events.recv())
            .await
            .unwrap()
            .unwrap();
        updates.extend(chat.handle_event(&event));
    }
    updates
}

#[tokio::test]
async fn streaming_turn_fills_assistant_message() {
    let agent = FakeAgent::printing(STREAM_TURN, 0);
    let supervisor = ProcessSupervisor::from_config(&agent.config());
    let mut events = supervisor.subscribe();
    let mut chat = chat_in(&agent);

    let handle = chat.send_message_streaming(&supervisor, "read a.txt").unwrap();
    assert!(chat.is_streaming());
    assert_eq!(chat.active_handle(), Some(&handle));
    assert_eq!(chat.streaming_text(), Some(""));

    let updates = drive(&mut chat, &mut events).await;
    assert_eq!(updates.last(), Some(&TurnUpdate::Finished { success: true }));

    let messages = chat.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "read a.txt");

    let reply = &messages[1];
    assert_eq!(reply.role, Role::Assistant);
    assert!(!reply.is_streaming);
    assert_eq!(reply.content, "Let me check. Done.");
    let blocks = reply.content_blocks.as_ref().unwrap();
    assert_eq!(blocks.len(), 3);
    assert!(matches!(&blocks[1], ContentBlock::Tool(a) if a.output.as_deref() == Some("hello")));

    assert_eq!(chat.session_id(), Some("s1"));
    assert_eq!(chat.usage().total_tokens(), 15);
    assert!((chat.total_cost_usd() - 0.02).abs() < 1e-9);
    assert_eq!(chat.completed_turns(), 1);
    assert!(chat.error().is_none());
}

#[tokio::test]
async fn second_turn_resumes_session() {
    let agent = FakeAgent::new(concat!(
        "case \"$*\" in\n",
        "  *\"--resume s1\"*) echo '{\"session_id\":\"s1\",\"result\":\"second\",\"usage\":{\"input_tokens\":4,\"output_tokens\":1}}' ;;\n",
        "  *) echo '{\"session_id\":\"s1\",\"result\":\"first\",\"usage\":{\"input_tokens\":2,\"output_tokens\":1}}' ;;\n",
        "esac\n",
    ));
    let supervisor = ProcessSupervisor::from_config(&agent.config());
    let mut chat = chat_in(&agent);

    chat.send_message(&supervisor, "one").await.unwrap();
    chat.send_message(&supervisor, "two").await.unwrap();

    let replies: Vec<&str> = chat
        .messages()
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(replies, ["first", "second"]);
    assert_eq!(chat.usage().input_tokens(), 6);
    assert_eq!(chat.usage().output_tokens(), 2);
    assert_eq!(chat.completed_turns(), 2);
}

#[tokio::test]
async fn empty_buffered_result_gets_placeholder_text() {
    let agent = FakeAgent::printing("{\"result\":\"\"}\n", 0);
    let supervisor = ProcessSupervisor::from_config(&agent.config());
    let mut chat = chat_in(&agent);

    chat.send_message(&supervisor, "hi").await.unwrap();
    assert_eq!(chat.messages()[1].content, "No response received");
}

#[tokio::test]
async fn buffered_failure_is_logged_as_system_message() {
    let agent = FakeAgent::new("echo 'invalid api key' >&2\nexit 2\n");
    let supervisor = ProcessSupervisor::from_config(&agent.config());
    let mut chat = chat_in(&agent);

    let err = chat.send_message(&supervisor, "hi").await.unwrap_err();
    assert!(matches!(err, HostError::Process { code: Some(2), .. }));

    let last = chat.messages().last().unwrap();
    assert_eq!(last.role, Role::System);
    assert_eq!(last.content, "Error: Process exited with code 2: invalid api key");
    assert_eq!(chat.error(), Some("Process exited with code 2: invalid api key"));
}

#[tokio::test]
async fn streaming_failure_marks_reply() {
    let agent = FakeAgent::new(concat!(
        "echo '{\"type\":\"stream_event\",\"event\":{\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"partial\"}}}'\n",
        "echo 'boom' >&2\n",
        "exit 4\n",
    ));
    let supervisor = ProcessSupervisor::from_config(&agent.config());
    let mut events = supervisor.subscribe();
    let mut chat = chat_in(&agent);

    chat.send_message_streaming(&supervisor, "go").unwrap();
    let updates = drive(&mut chat, &mut events).await;

    assert_eq!(updates.last(), Some(&TurnUpdate::Finished { success: false }));
    assert_eq!(
        chat.messages()[1].content,
        "partial\n\n[Error: exited with code 4]"
    );
    assert_eq!(chat.error(), Some("Process exited with code 4: boom"));
    let last = chat.messages().last().unwrap();
    assert_eq!(last.role, Role::System);
    assert_eq!(last.content, "Error: Process exited with code 4: boom");
}

#[tokio::test]
async fn streaming_failure_falls_back_to_stdout_tail() {
    let agent = FakeAgent::new("echo 'rate limited'\nexit 3\n");
    let supervisor = ProcessSupervisor::from_config(&agent.config());
    let mut events = supervisor.subscribe();
    let mut chat = chat_in(&agent);

    chat.send_message_streaming(&supervisor, "go").unwrap();
    drive(&mut chat, &mut events).await;

    assert_eq!(chat.error(), Some("Process exited with code 3: rate limited"));
    let messages = chat.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].content, "\n\n[Error: exited with code 3]");
    assert_eq!(messages[2].role, Role::System);
    assert_eq!(messages[2].content, "Error: Process exited with code 3: rate limited");
}

#[tokio::test]
async fn stalled_reader_gets_every_delta_in_order() {
    let agent = FakeAgent::new(concat!(
        "echo '{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s1\"}'\n",
        "i=0\n",
        "while [ $i -lt 400 ]; do\n",
        "  echo '{\"type\":\"stream_event\",\"event\":{\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"x\"}}}'\n",
        "  i=$((i+1))\n",
        "done\n",
        "echo '{\"type\":\"result\",\"subtype\":\"success\",\"is_error\":false,\"session_id\":\"s1\",\"result\":\"ok\",\"usage\":{\"input_tokens\":1,\"output_tokens\":400}}'\n",
    ));
    let config = HostConfig {
        event_capacity: 8,
        ..agent.config()
    };
    let supervisor = ProcessSupervisor::from_config(&config);
    let mut events = supervisor.subscribe();
    let mut chat = chat_in(&agent);

    chat.send_message_streaming(&supervisor, "go").unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let updates = drive(&mut chat, &mut events).await;
    assert_eq!(updates.last(), Some(&TurnUpdate::Finished { success: true }));
    let text: String = updates
        .iter()
        .filter_map(|u| match u {
            TurnUpdate::Text(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "x".repeat(400));
    assert_eq!(chat.messages()[1].content, "x".repeat(400));
    assert_eq!(chat.usage().output_tokens(), 400);
    assert!(chat.error().is_none());
}

#[tokio::test]
async fn cancel_keeps_partial_text() {
    let agent = FakeAgent::new(concat!(
        "echo '{\"type\":\"stream_event\",\"event\":{\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"working\"}}}'\n",
        "exec sleep 30\n",
    ));
    let supervisor = ProcessSupervisor::from_config(&agent.config());
    let mut events = supervisor.subscribe();
    let mut chat = chat_in(&agent);

    let handle = chat.send_message_streaming(&supervisor, "go").unwrap();
    while chat.streaming_text() != Some("working") {
        let event = tokio::time::timeout(LIMIT, events.recv())
            .await
            .unwrap()
            .unwrap();
        chat.handle_event(&event);
    }

    assert!(chat.cancel(&supervisor));
    assert!(!chat.is_streaming());
    assert!(!supervisor.is_running(&handle));
    assert_eq!(chat.messages()[1].content, "working\n\n[Cancelled]");
    assert!(!chat.cancel(&supervisor));

    // The late StreamEnd for the cancelled handle must not touch the log.
    loop {
        let event = tokio::time::timeout(LIMIT, events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(chat.handle_event(&event).is_empty());
        if event.kind() == claude_stream_host::supervisor::EventKind::StreamEnd {
            break;
        }
    }
    assert_eq!(chat.messages()[1].content, "working\n\n[Cancelled]");
}

#[tokio::test]
async fn refuses_send_without_working_dir_or_while_busy() {
    let agent = FakeAgent::new("exec sleep 30\n");
    let supervisor = ProcessSupervisor::from_config(&agent.config());

    let mut homeless = ChatSession::new(ChatOptions::default());
    let err = homeless.send_message(&supervisor, "hi").await.unwrap_err();
    assert!(matches!(err, HostError::MissingWorkingDir));
    assert!(homeless.messages().is_empty());
    assert_eq!(homeless.error(), Some("Please select a working directory first"));

    let mut chat = chat_in(&agent);
    chat.send_message_streaming(&supervisor, "first").unwrap();
    let err = chat.send_message_streaming(&supervisor, "second").unwrap_err();
    assert!(matches!(err, HostError::Busy));
    assert_eq!(chat.messages().len(), 2);

    let abandoned = chat.clear_session().unwrap();
    assert!(supervisor.cancel(&abandoned));
    assert!(chat.messages().is_empty());
    assert!(chat.session_id().is_none());
}
