//! MCP server registration arguments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::supervisor::HostError;

/// How the agent reaches an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    Http,
    Sse,
    Stdio,
}

impl McpTransport {
    #[must_use]
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Sse => "sse",
            Self::Stdio => "stdio",
        }
    }
}

/// Where the agent records the registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpScope {
    #[default]
    Local,
    Project,
    User,
}

impl McpScope {
    #[must_use]
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Project => "project",
            Self::User => "user",
        }
    }
}

/// An MCP server to register with the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub transport: McpTransport,
    /// Endpoint for `http` and `sse`.
    #[serde(default)]
    pub url: Option<String>,
    /// Executable for `stdio`.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub scope: McpScope,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl McpServerConfig {
    /// Arguments for `mcp add`.
    ///
    /// # Errors
    ///
    /// Returns `HostError::InvalidRequest` if the name is empty or the
    /// transport's endpoint is missing.
    pub fn to_args(&self) -> Result<Vec<String>, HostError> {
        if self.name.trim().is_empty() {
            return Err(HostError::InvalidRequest("MCP server name is empty".to_string()));
        }

        let mut args: Vec<String> = vec![
            "mcp".into(),
            "add".into(),
            "--transport".into(),
            self.transport.as_arg().into(),
            "--scope".into(),
            self.scope.as_arg().into(),
        ];
        for (key, value) in &self.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push(self.name.clone());

        match self.transport {
            McpTransport::Http | McpTransport::Sse => {
                let url = self.url.as_deref().filter(|u| !u.is_empty()).ok_or_else(|| {
                    HostError::InvalidRequest(format!(
                        "{} transport requires a url",
                        self.transport.as_arg()
                    ))
                })?;
                args.push(url.to_string());
            }
            McpTransport::Stdio => {
                let command = self
                    .command
                    .as_deref()
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| {
                        HostError::InvalidRequest("stdio transport requires a command".to_string())
                    })?;
                args.push("--".into());
                args.push(command.to_string());
                args.extend(self.args.iter().cloned());
            }
        }

        Ok(args)
    }
}
