//! Tests for Claude process spawning and control.

use std::path::PathBuf;
use std::time::Duration;

use claude_stream_host::cli::{
    quote_arg, ClaudeProcess, ClaudeProcessBuilder, OutputFormat, PermissionMode, SpawnError,
};
use tokio::io::AsyncReadExt;

#[test]
fn builder_new_creates_with_prompt() {
    let builder = ClaudeProcessBuilder::new("Fix the bug");
    let args = builder.build_args();

    assert_eq!(args[..4], ["-p", "Fix the bug", "--output-format", "json"]);
    assert_eq!(builder.prompt(), "Fix the bug");
    assert_eq!(builder.get_output_format(), OutputFormat::Json);
}

#[test]
fn builder_stream_json_requests_partial_messages() {
    let args = ClaudeProcessBuilder::new("task")
        .output_format(OutputFormat::StreamJson)
        .build_args();

    assert!(args.contains(&"stream-json".to_string()));
    assert!(args.contains(&"--verbose".to_string()));
    assert!(args.contains(&"--include-partial-messages".to_string()));
}

#[test]
fn builder_allowed_and_disallowed_tools() {
    let args = ClaudeProcessBuilder::new("task")
        .allowed_tools(["Read", "Write", "Bash"])
        .disallowed_tools(["WebFetch"])
        .build_args();

    assert!(args.windows(2).any(|w| w == ["--allowedTools", "Read,Write,Bash"]));
    assert!(args.windows(2).any(|w| w == ["--disallowedTools", "WebFetch"]));
}

#[test]
fn builder_resume_session() {
    let args = ClaudeProcessBuilder::new("continue")
        .resume("session_abc123")
        .build_args();

    assert!(args.windows(2).any(|w| w == ["--resume", "session_abc123"]));
    assert!(!args.contains(&"--continue".to_string()));
}

#[test]
fn builder_continue_last() {
    let args = ClaudeProcessBuilder::new("again").continue_last().build_args();
    assert!(args.contains(&"--continue".to_string()));
}

#[test]
fn builder_permission_model_and_turns() {
    let args = ClaudeProcessBuilder::new("task")
        .permission_mode(PermissionMode::AcceptEdits)
        .model("sonnet")
        .max_turns(5)
        .build_args();

    assert!(args.windows(2).any(|w| w == ["--permission-mode", "acceptEdits"]));
    assert!(args.windows(2).any(|w| w == ["--model", "sonnet"]));
    assert!(args.windows(2).any(|w| w == ["--max-turns", "5"]));
}

#[test]
fn builder_system_prompts() {
    let args = ClaudeProcessBuilder::new("task")
        .system_prompt("Custom system prompt")
        .append_system_prompt("Extra context here")
        .build_args();

    assert!(args.windows(2).any(|w| w == ["--system-prompt", "Custom system prompt"]));
    assert!(args.windows(2).any(|w| w == ["--append-system-prompt", "Extra context here"]));
}

#[test]
fn builder_working_dir() {
    let builder = ClaudeProcessBuilder::new("task").working_dir("/tmp/project");
    assert_eq!(builder.get_working_dir(), Some(&PathBuf::from("/tmp/project")));
    assert!(ClaudeProcessBuilder::new("task").get_working_dir().is_none());
}

#[test]
fn command_line_quotes_interpolated_values() {
    let line = ClaudeProcessBuilder::new(r#"say "hi""#)
        .model("opus")
        .build_command_line("claude");

    assert!(line.starts_with("claude -p "));
    assert!(line.contains(r#""say ""hi""""#));
    assert!(line.contains(r#"--model "opus""#));
    assert_eq!(quote_arg(""), r#""""#);
}

#[test]
fn permission_mode_parses_cli_names() {
    assert_eq!("plan".parse::<PermissionMode>(), Ok(PermissionMode::Plan));
    assert_eq!("acceptAll".parse::<PermissionMode>(), Ok(PermissionMode::AcceptAll));
    assert!("yolo".parse::<PermissionMode>().is_err());
}

#[tokio::test]
async fn spawn_nonexistent_binary_fails() {
    let builder = ClaudeProcessBuilder::new("test");
    let result = ClaudeProcess::spawn_with_binary("/nonexistent/claude-binary", &builder);
    assert!(matches!(result, Err(SpawnError::NotFound)));
}

#[tokio::test]
async fn spawn_pipes_stdout() {
    let builder = ClaudeProcessBuilder::new("hello world");
    let mut process = ClaudeProcess::spawn_with_binary("echo", &builder).unwrap();

    let mut stdout = process.take_stdout().unwrap();
    assert!(process.take_stdout().is_none());

    let mut output = String::new();
    stdout.read_to_string(&mut output).await.unwrap();
    let status = process.wait().await.unwrap();

    assert!(status.success());
    assert_eq!(output.trim(), "-p hello world --output-format json");
}

#[tokio::test]
async fn spawn_via_shell_keeps_spaced_values() {
    let builder = ClaudeProcessBuilder::new("hello   spaced   world");
    let mut process = ClaudeProcess::spawn_via_shell("echo", &builder).unwrap();

    let mut stdout = process.take_stdout().unwrap();
    let mut output = String::new();
    stdout.read_to_string(&mut output).await.unwrap();
    process.wait().await.unwrap();

    assert_eq!(output.trim(), "-p hello   spaced   world --output-format json");
}

#[tokio::test]
async fn spawn_applies_working_dir() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let temp_path = temp_dir.path().canonicalize().unwrap();

    // `true` swallows the builder arguments appended after it.
    let builder = ClaudeProcessBuilder::new("ignored").working_dir(&temp_path);
    let mut process = ClaudeProcess::spawn_via_shell("pwd -P; true", &builder).unwrap();
    let mut stdout = process.take_stdout().unwrap();
    let mut output = String::new();
    stdout.read_to_string(&mut output).await.unwrap();
    let status = process.wait().await.unwrap();

    assert!(status.success());
    assert_eq!(PathBuf::from(output.trim()), temp_path);
}

#[tokio::test]
async fn kill_running_process() {
    // The trailing `#` comments out the builder arguments.
    let builder = ClaudeProcessBuilder::new("ignored");
    let mut process = ClaudeProcess::spawn_via_shell("exec sleep 10 #", &builder).unwrap();
    assert!(process.id().is_some());

    process.kill().await.unwrap();
    let status = process.wait().await.unwrap();
    assert!(!status.success());
}

#[tokio::test]
async fn graceful_terminate_with_timeout() {
    let builder = ClaudeProcessBuilder::new("ignored");
    let mut process = ClaudeProcess::spawn_via_shell("exec sleep 10 #", &builder).unwrap();

    let result = process.graceful_terminate(Duration::from_millis(100)).await;
    assert!(result.is_ok());
}
