//! Command-line tool for inspecting and calling MCP server tools

use agent_mcp_adapters::config::MCPConfig;
use agent_mcp_adapters::{ConnectionRegistry, RegistryOptions, RetryPolicy};
use agent_tools::ToolOutput;
use agent_utils::LogFormat;
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mcp-tools")]
#[command(about = "Inspect and call tools on MCP servers", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: ~/.config/agent-rs/mcp.json merged with ./.mcp.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the tools of every reachable server
    List,

    /// Print a tool's normalized input schema
    Schema {
        /// Server name from the configuration
        server: String,
        /// Tool name
        tool: String,
    },

    /// Call a tool
    Call {
        /// Server name from the configuration
        server: String,
        /// Tool name
        tool: String,
        /// Tool input: JSON, or any text to be coerced into arguments
        input: Option<String>,

        /// Give up waiting for the reply after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Retry transport failures and timeouts this many times
        #[arg(long, default_value_t = 0)]
        retries: u32,

        /// Check arguments against the tool's schema before calling
        #[arg(long)]
        strict: bool,
    },
}

/// Interpret a command-line input argument as a tool input value
fn parse_input(raw: Option<&str>) -> Value {
    match raw {
        None => Value::Null,
        Some(text) => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
    }
}

fn registry_options(command: &Commands) -> RegistryOptions {
    match command {
        Commands::Call {
            timeout_ms, strict, ..
        } => RegistryOptions {
            call_timeout: timeout_ms.map(Duration::from_millis),
            strict_schema: *strict,
            ..RegistryOptions::default()
        },
        _ => RegistryOptions::default(),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<MCPConfig> {
    match path {
        Some(path) => MCPConfig::from_file(path)
            .with_context(|| format!("Failed to load MCP configuration from {}", path.display())),
        None => Ok(MCPConfig::load_merged()),
    }
}

async fn list(connections: &ConnectionRegistry) {
    let mut table = Table::new();
    table.set_header(vec!["Server", "Tool", "Description"]);

    for tool in connections.all_tools().await {
        table.add_row(vec![
            tool.server_name().to_string(),
            tool.definition().name.clone(),
            tool.definition().description.clone().unwrap_or_default(),
        ]);
    }

    println!("{table}");
}

async fn schema(connections: &ConnectionRegistry, server: &str, tool: &str) -> anyhow::Result<()> {
    if connections.get_session(server).await.is_none() {
        bail!("MCP server '{server}' is not connected");
    }

    let tools = connections.get_tools(server).await;
    let Some(found) = tools.iter().find(|t| t.definition().name == tool) else {
        bail!("Tool '{tool}' not found on server '{server}'");
    };

    println!("{}", serde_json::to_string_pretty(found.schema())?);
    Ok(())
}

async fn call(
    connections: &ConnectionRegistry,
    server: &str,
    tool: &str,
    input: Value,
    retries: u32,
) -> anyhow::Result<()> {
    let policy = RetryPolicy::with_retries(retries);
    let output = policy
        .execute(&format!("{server}/{tool}"), move || {
            connections.call_tool(server, tool, input.clone())
        })
        .await?;

    match output {
        ToolOutput::Text(text) => println!("{text}"),
        other => println!("{}", serde_json::to_string_pretty(&other.into_value())?),
    }
    Ok(())
}

async fn run(command: Commands, connections: &ConnectionRegistry) -> anyhow::Result<()> {
    match command {
        Commands::List => {
            list(connections).await;
            Ok(())
        }
        Commands::Schema { server, tool } => schema(connections, &server, &tool).await,
        Commands::Call {
            server,
            tool,
            input,
            retries,
            ..
        } => call(connections, &server, &tool, parse_input(input.as_deref()), retries).await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    agent_utils::init_tracing_with(&cli.log_level, format);

    let config = load_config(cli.config.as_ref())?;
    let connections = ConnectionRegistry::with_options(registry_options(&cli.command));

    if connections.register_config(&config).await == 0 {
        bail!("No usable MCP servers configured");
    }

    let connected = connections.connect_all().await;
    info!("Connected to {} MCP servers", connected.len());

    let result = run(cli.command, &connections).await;
    connections.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_call_arguments() {
        let cli = Cli::parse_from([
            "mcp-tools",
            "--json-logs",
            "call",
            "calc",
            "add",
            r#"{"a": 5, "b": 3}"#,
            "--timeout-ms",
            "1500",
            "--retries",
            "2",
        ]);
        assert!(cli.json_logs);

        let options = registry_options(&cli.command);
        assert_eq!(options.call_timeout, Some(Duration::from_millis(1500)));
        assert!(!options.strict_schema);

        match cli.command {
            Commands::Call { input, retries, .. } => {
                assert_eq!(parse_input(input.as_deref()), json!({"a": 5, "b": 3}));
                assert_eq!(retries, 2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input(None), Value::Null);
        assert_eq!(parse_input(Some("42")), json!(42));
        assert_eq!(parse_input(Some("paris")), json!("paris"));
        assert_eq!(parse_input(Some("{a: 1}")), json!("{a: 1}"));
    }
}
