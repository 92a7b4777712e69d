//! Tollgate CLI - Command-line tools for inspecting configuration and tool hosts

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tollgate_core::config::TollgateConfig;
use tollgate_core::mcp::McpClient;
use tracing::debug;

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "Tollgate agent runtime CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file; defaults to tollgate.toml and TOLLGATE_ environment variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// MCP tool host commands
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },
    /// Print the effective configuration as JSON
    Config,
    /// Version information
    Version,
}

#[derive(Subcommand)]
enum McpCommands {
    /// List the tools a configured server advertises
    Tools {
        /// Server name from the [servers] table
        server: String,

        /// Print full definitions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call one tool on a configured server
    Call {
        /// Server name from the [servers] table
        server: String,

        /// Tool name
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<TollgateConfig> {
    let config = match path {
        Some(path) => TollgateConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => TollgateConfig::load().context("Failed to load configuration")?,
    };
    Ok(config)
}

fn client_for(config: &TollgateConfig, server: &str) -> Result<McpClient> {
    let entry = config.servers.get(server).ok_or_else(|| {
        let mut known: Vec<_> = config.servers.keys().map(String::as_str).collect();
        known.sort_unstable();
        anyhow!(
            "Unknown server '{}' (configured: {})",
            server,
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        )
    })?;
    Ok(McpClient::new(server, entry.clone()))
}

async fn list_tools(config: &TollgateConfig, server: &str, json: bool) -> Result<()> {
    let client = client_for(config, server)?;
    let session = client.connect().await?;
    let tools = session.list_tools().await;
    session.close().await;

    let tools = tools?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }
    for tool in &tools {
        match &tool.description {
            Some(description) => println!("{:<24} {}", tool.name, description),
            None => println!("{}", tool.name),
        }
    }
    Ok(())
}

async fn call_tool(config: &TollgateConfig, server: &str, tool: &str, args: &str) -> Result<()> {
    let arguments: serde_json::Value =
        serde_json::from_str(args).context("--args must be valid JSON")?;
    if !arguments.is_object() {
        return Err(anyhow!("--args must be a JSON object"));
    }

    let client = client_for(config, server)?;
    let session = client.connect().await?;
    debug!(server, tool, "Calling remote tool");
    let output = session.call_tool(tool, arguments).await;
    session.close().await;

    println!("{}", output?.to_text());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Version => {
            println!("tollgate {}", env!("CARGO_PKG_VERSION"));
            println!("tollgate-core {}", tollgate_core::VERSION);
        }
        Commands::Config => {
            let config = load_config(cli.config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Mcp { command } => {
            let config = load_config(cli.config.as_ref())?;
            match command {
                McpCommands::Tools { server, json } => list_tools(&config, &server, json).await?,
                McpCommands::Call { server, tool, args } => {
                    call_tool(&config, &server, &tool, &args).await?
                }
            }
        }
    }

    Ok(())
}
