//! Tests for MCP server management through the agent binary.

use std::collections::BTreeMap;

use claude_stream_host::supervisor::{
    HostError, McpScope, McpServerConfig, McpTransport, ProcessSupervisor,
};

use crate::support::FakeAgent;

/// Agent that records its arguments and prints a server listing.
fn recording_agent() -> FakeAgent {
    FakeAgent::new(
        "echo \"$@\" > \"$(dirname \"$0\")/args.txt\"\n\
         if [ \"$1 $2\" = \"mcp list\" ]; then echo 'docs: https://example.com/mcp (HTTP)'; fi\n",
    )
}

fn recorded_args(agent: &FakeAgent) -> String {
    std::fs::read_to_string(agent.dir().join("args.txt"))
        .unwrap()
        .trim()
        .to_string()
}

#[tokio::test]
async fn mcp_add_http_server() {
    let agent = recording_agent();
    let supervisor = ProcessSupervisor::from_config(&agent.config());

    let server = McpServerConfig {
        name: "docs".to_string(),
        transport: McpTransport::Http,
        url: Some("https://example.com/mcp".to_string()),
        command: None,
        args: Vec::new(),
        scope: McpScope::Project,
        env: BTreeMap::from([("TOKEN".to_string(), "abc".to_string())]),
    };
    supervisor.mcp_add(&server).await.unwrap();

    assert_eq!(
        recorded_args(&agent),
        "mcp add --transport http --scope project -e TOKEN=abc docs https://example.com/mcp"
    );
}

#[tokio::test]
async fn mcp_add_stdio_server() {
    let agent = recording_agent();
    let supervisor = ProcessSupervisor::from_config(&agent.config());

    let server = McpServerConfig {
        name: "fs".to_string(),
        transport: McpTransport::Stdio,
        url: None,
        command: Some("npx".to_string()),
        args: vec!["-y".to_string(), "server-filesystem".to_string()],
        scope: McpScope::Local,
        env: BTreeMap::new(),
    };
    supervisor.mcp_add(&server).await.unwrap();

    assert_eq!(
        recorded_args(&agent),
        "mcp add --transport stdio --scope local fs -- npx -y server-filesystem"
    );
}

#[tokio::test]
async fn mcp_add_rejects_incomplete_config() {
    let agent = recording_agent();
    let supervisor = ProcessSupervisor::from_config(&agent.config());

    let server = McpServerConfig {
        name: "docs".to_string(),
        transport: McpTransport::Sse,
        url: None,
        command: None,
        args: Vec::new(),
        scope: McpScope::User,
        env: BTreeMap::new(),
    };
    let err = supervisor.mcp_add(&server).await.unwrap_err();

    assert!(matches!(err, HostError::InvalidRequest(_)));
    assert!(!agent.dir().join("args.txt").exists());
}

#[tokio::test]
async fn mcp_list_and_remove() {
    let agent = recording_agent();
    let supervisor = ProcessSupervisor::from_config(&agent.config());

    let listing = supervisor.mcp_list().await.unwrap();
    assert_eq!(listing, "docs: https://example.com/mcp (HTTP)");

    supervisor.mcp_remove("docs").await.unwrap();
    assert_eq!(recorded_args(&agent), "mcp remove docs");

    assert!(matches!(
        supervisor.mcp_remove("  ").await,
        Err(HostError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn mcp_failure_carries_output_tail() {
    let agent = FakeAgent::new("echo 'No MCP server named ghost' >&2\nexit 1\n");
    let supervisor = ProcessSupervisor::from_config(&agent.config());

    let err = supervisor.mcp_remove("ghost").await.unwrap_err();
    match err {
        HostError::Process { code, tail } => {
            assert_eq!(code, Some(1));
            assert_eq!(tail, "No MCP server named ghost");
        }
        other => panic!("Expected Process error, got {other:?}"),
    }
}
