//! `mcp-stdio` — talk to MCP servers from the command line.
//!
//! Every selected server is spawned, initialized, asked the same question,
//! and shut down again. Results are printed as JSON on stdout; logs go to
//! stderr.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use mcp_stdio_client::init_tracing;
use mcp_stdio_client::mcp_client::config::{self, McpServersConfig, DEFAULT_CONFIG_FILE};
use mcp_stdio_client::mcp_client::requests::{extract_list, format_tool_content, is_tool_error};
use mcp_stdio_client::mcp_client::{McpError, StdioClient};

#[derive(Debug, Parser)]
#[command(name = "mcp-stdio", version, about = "MCP command-line client over stdio")]
struct Cli {
    /// Path to the JSON configuration file containing server details.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,

    /// Server configuration to use. Can be given multiple times.
    #[arg(long = "server")]
    servers: Vec<String>,

    /// Use every server in the configuration file.
    #[arg(long)]
    all: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that each server responds.
    Ping,
    /// List the tools each server offers.
    ListTools,
    /// List the resources each server offers.
    ListResources,
    /// List the prompts each server offers.
    ListPrompts,
    /// Invoke a tool on each server.
    CallTool {
        /// Tool name.
        #[arg(long)]
        name: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        arguments: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = config::load_config(&cli.config_file)
        .with_context(|| format!("loading {}", cli.config_file.display()))?;

    let servers = if cli.all {
        config.server_names()
    } else {
        cli.servers.clone()
    };
    if servers.is_empty() {
        bail!("no servers selected; pass --server <name> or --all");
    }

    let mut clients = Vec::new();
    let outcome = tokio::select! {
        result = session(&config, &servers, &cli.command, &mut clients) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, shutting down");
            Ok(())
        }
    };

    for client in clients {
        let name = client.name().to_string();
        let shutdown = client.close().await;
        tracing::info!(server = %name, ?shutdown, "server stopped");
    }

    outcome
}

/// Connect and initialize every server, then run the command against each.
///
/// Connected clients are pushed into `clients` as soon as they exist so the
/// caller can shut them down whatever happens here.
async fn session(
    config: &McpServersConfig,
    servers: &[String],
    command: &Command,
    clients: &mut Vec<StdioClient>,
) -> anyhow::Result<()> {
    for name in servers {
        let params = config.server_params(name)?;
        let mut client = StdioClient::connect(name, &params)
            .await
            .with_context(|| format!("starting server '{name}'"))?;

        tracing::info!(server = %name, "attempting to initialize server");
        let initialized = client.initialize().await.is_some();
        clients.push(client);
        if !initialized {
            return Err(McpError::InitFailed {
                reason: format!("server '{name}' did not complete the handshake"),
            }
            .into());
        }
    }

    let arguments: Option<Value> = match command {
        Command::CallTool { arguments, .. } => Some(
            serde_json::from_str(arguments).context("tool arguments must be valid JSON")?,
        ),
        _ => None,
    };

    for client in clients.iter() {
        let report = run_command(client, command, arguments.clone()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

async fn run_command(
    client: &StdioClient,
    command: &Command,
    arguments: Option<Value>,
) -> anyhow::Result<Value> {
    let server = client.name();
    let report = match command {
        Command::Ping => json!({"server": server, "alive": client.ping().await}),
        Command::ListTools => {
            let result = client.list_tools().await?;
            json!({"server": server, "tools": extract_list(&result, "tools")})
        }
        Command::ListResources => {
            let result = client.list_resources().await?;
            json!({"server": server, "resources": extract_list(&result, "resources")})
        }
        Command::ListPrompts => {
            let result = client.list_prompts().await?;
            json!({"server": server, "prompts": extract_list(&result, "prompts")})
        }
        Command::CallTool { name, .. } => {
            let outcome = client
                .call_tool(name, arguments.unwrap_or_else(|| json!({})))
                .await;
            if is_tool_error(&outcome) {
                json!({"server": server, "tool": name, "isError": true, "error": outcome["error"]})
            } else {
                json!({
                    "server": server,
                    "tool": name,
                    "text": format_tool_content(&outcome),
                    "result": outcome,
                })
            }
        }
    };
    Ok(report)
}
