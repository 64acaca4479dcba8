//! Claude Stream Host - Run Claude Code turns from the terminal.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_stream_host::cli::PermissionMode;
use claude_stream_host::config::{ChatOptions, ConfigLoader, HostConfig};
use claude_stream_host::conversation::{ChatSession, TurnUpdate};
use claude_stream_host::display::{
    print_error, print_stderr, print_text, print_turn_end, print_update,
};
use claude_stream_host::supervisor::{
    HostEvent, McpScope, McpServerConfig, McpTransport, ProcessSupervisor, Subscription,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportArg {
    Http,
    Sse,
    Stdio,
}

impl From<TransportArg> for McpTransport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Http => McpTransport::Http,
            TransportArg::Sse => McpTransport::Sse,
            TransportArg::Stdio => McpTransport::Stdio,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScopeArg {
    Local,
    Project,
    User,
}

impl From<ScopeArg> for McpScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Local => McpScope::Local,
            ScopeArg::Project => McpScope::Project,
            ScopeArg::User => McpScope::User,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "claude-stream-host",
    about = "Run and stream Claude Code turns",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (defaults to .claude-stream-host.toml, then the user config dir).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print tool input and output untruncated.
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Per-turn overrides of the `[chat]` config table.
#[derive(Args, Debug)]
struct TurnArgs {
    /// Working directory for the agent (defaults to the current directory).
    #[arg(long)]
    cwd: Option<PathBuf>,
    /// Model to use.
    #[arg(long)]
    model: Option<String>,
    /// Permission mode (plan, acceptEdits, acceptAll, ask).
    #[arg(long)]
    permission_mode: Option<PermissionMode>,
    /// Maximum agent turns per prompt.
    #[arg(long)]
    max_turns: Option<u32>,
    /// Comma-separated tools the agent may use.
    #[arg(long, value_delimiter = ',')]
    allowed_tools: Vec<String>,
    /// Comma-separated tools the agent may not use.
    #[arg(long, value_delimiter = ',')]
    disallowed_tools: Vec<String>,
    /// Continue the most recent conversation in the working directory.
    #[arg(long = "continue")]
    continue_last: bool,
}

impl TurnArgs {
    fn apply(self, mut options: ChatOptions) -> ChatOptions {
        options.cwd = self
            .cwd
            .or(options.cwd)
            .or_else(|| std::env::current_dir().ok());
        if self.model.is_some() {
            options.model = self.model;
        }
        if self.permission_mode.is_some() {
            options.permission_mode = self.permission_mode;
        }
        if self.max_turns.is_some() {
            options.max_turns = self.max_turns;
        }
        if !self.allowed_tools.is_empty() {
            options.allowed_tools = self.allowed_tools;
        }
        if !self.disallowed_tools.is_empty() {
            options.disallowed_tools = self.disallowed_tools;
        }
        if self.continue_last {
            options.continue_last = true;
        }
        options
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a conversation. Reads prompts from stdin; `/new` starts a new
    /// session, `/exit` quits, Ctrl-C cancels the running turn.
    Chat {
        /// Run this single prompt and exit.
        prompt: Option<String>,
        #[command(flatten)]
        turn: TurnArgs,
    },
    /// Run one buffered turn and print the response.
    Ask {
        prompt: String,
        #[command(flatten)]
        turn: TurnArgs,
    },
    /// Print the agent's version.
    Version,
    /// Manage MCP servers.
    Mcp {
        #[command(subcommand)]
        command: McpCommand,
    },
}

#[derive(Subcommand)]
enum McpCommand {
    /// List configured MCP servers.
    List,
    /// Register an MCP server.
    Add {
        name: String,
        #[arg(long, value_enum)]
        transport: TransportArg,
        /// Endpoint for http and sse transports.
        #[arg(long)]
        url: Option<String>,
        /// Executable for the stdio transport.
        #[arg(long)]
        command: Option<String>,
        /// Arguments passed to the stdio executable.
        #[arg(last = true)]
        args: Vec<String>,
        #[arg(long, value_enum, default_value_t = ScopeArg::Local)]
        scope: ScopeArg,
    },
    /// Remove an MCP server.
    Remove { name: String },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Option<HostConfig> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    match loader.load() {
        Ok(config) => Some(config),
        Err(e) => {
            print_error(&e.to_string());
            None
        }
    }
}

/// Drive the active turn until it finishes or Ctrl-C cancels it.
async fn stream_turn(
    chat: &mut ChatSession,
    supervisor: &ProcessSupervisor,
    events: &mut Subscription,
    raw: bool,
) -> bool {
    let mut success = false;
    while chat.is_streaming() {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let HostEvent::Stderr { data, .. } = &event {
                    if chat.active_handle() == Some(event.handle()) {
                        print_stderr(data);
                    }
                }
                for update in chat.handle_event(&event) {
                    if let TurnUpdate::Finished { success: finished_ok } = update {
                        success = finished_ok;
                        print_turn_end(
                            success,
                            chat.usage(),
                            chat.total_cost_usd(),
                            chat.session_id(),
                            raw,
                        );
                        if let Some(err) = chat.error() {
                            print_error(err);
                        }
                    } else {
                        print_update(&update, raw);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                chat.cancel(supervisor);
                println!("\n[Cancelled]");
            }
        }
    }
    success
}

async fn run_chat(
    supervisor: &ProcessSupervisor,
    options: ChatOptions,
    prompt: Option<String>,
    raw: bool,
) -> ExitCode {
    let mut chat = ChatSession::new(options);
    let mut events = supervisor.subscribe();

    if let Some(prompt) = prompt {
        if chat.send_message_streaming(supervisor, &prompt).is_err() {
            print_error(chat.error().unwrap_or("Failed to start turn"));
            return ExitCode::FAILURE;
        }
        return if stream_turn(&mut chat, supervisor, &mut events, raw).await {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_text("\n> ");
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                print_error(&format!("Failed to read stdin: {e}"));
                break;
            }
        };

        match line.trim() {
            "" => continue,
            "/exit" | "/quit" => break,
            "/new" => {
                if let Some(handle) = chat.clear_session() {
                    supervisor.cancel(&handle);
                }
                println!("Started a new session");
            }
            prompt => {
                if chat.send_message_streaming(supervisor, prompt).is_err() {
                    print_error(chat.error().unwrap_or("Failed to start turn"));
                    continue;
                }
                stream_turn(&mut chat, supervisor, &mut events, raw).await;
            }
        }
    }

    ExitCode::SUCCESS
}

async fn run_ask(supervisor: &ProcessSupervisor, options: ChatOptions, prompt: &str) -> ExitCode {
    let mut chat = ChatSession::new(options);
    let result = tokio::select! {
        result = chat.send_message(supervisor, prompt) => result,
        _ = tokio::signal::ctrl_c() => {
            supervisor.shutdown();
            println!("[Cancelled]");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => {
            if let Some(message) = chat.messages().last() {
                println!("{}", message.content);
            }
            print_turn_end(
                true,
                chat.usage(),
                chat.total_cost_usd(),
                chat.session_id(),
                false,
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn run_mcp(supervisor: &ProcessSupervisor, command: McpCommand) -> ExitCode {
    let result = match command {
        McpCommand::List => supervisor.mcp_list().await.map(|out| println!("{out}")),
        McpCommand::Add {
            name,
            transport,
            url,
            command,
            args,
            scope,
        } => {
            let server = McpServerConfig {
                name,
                transport: transport.into(),
                url,
                command,
                args,
                scope: scope.into(),
                env: std::collections::BTreeMap::new(),
            };
            supervisor.mcp_add(&server).await
        }
        McpCommand::Remove { name } => supervisor.mcp_remove(&name).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(config) = load_config(cli.config) else {
        return ExitCode::FAILURE;
    };
    let supervisor = ProcessSupervisor::from_config(&config);
    tracing::info!(binary = %config.binary, use_shell = config.use_shell, "Starting stream host");

    let code = match cli.command {
        Commands::Chat { prompt, turn } => {
            run_chat(&supervisor, turn.apply(config.chat.clone()), prompt, cli.raw).await
        }
        Commands::Ask { prompt, turn } => {
            run_ask(&supervisor, turn.apply(config.chat.clone()), &prompt).await
        }
        Commands::Version => match supervisor.version().await {
            Ok(version) => {
                println!("{version}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                print_error(&e.to_string());
                ExitCode::FAILURE
            }
        },
        Commands::Mcp { command } => run_mcp(&supervisor, command).await,
    };

    let killed = supervisor.shutdown();
    if killed > 0 {
        tracing::info!(count = killed, "Killed remaining agent processes");
    }
    code
}
