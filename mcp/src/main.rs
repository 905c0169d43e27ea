use std::path::PathBuf;

use buildlog_mcp_runtime::{DEFAULT_API_URL, McpCommands, McpRuntimeConfig, default_feed_dir, run};
use clap::Parser;
use clap::builder::BoolishValueParser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "buildlog-mcp",
    version,
    about = "buildlog MCP server: search, follow and record AI coding workflows over stdio"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "BUILDLOG_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Bearer token for authenticated calls (required for uploads)
    #[arg(long, env = "BUILDLOG_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Start an auto-recording session when the server boots
    #[arg(
        long,
        env = "BUILDLOG_AUTO_RECORD",
        default_value_t = true,
        action = clap::ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    auto_record: bool,

    /// Client identifier recorded in each document's source attribution
    #[arg(long = "client", env = "BUILDLOG_CLIENT")]
    client_tag: Option<String>,

    /// Directory whose presence enables the agent feed (default: ~/.buildlog)
    #[arg(long, env = "BUILDLOG_FEED_DIR")]
    feed_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<McpCommands>,
}

#[tokio::main]
async fn main() {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "buildlog_mcp=info,buildlog_mcp_runtime=info,buildlog_core=info".into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .init();
    if let Ok(path) = &dotenv {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }

    let config = McpRuntimeConfig {
        api_url: cli.api_url,
        api_key: cli.api_key,
        auto_record: cli.auto_record,
        client_tag: cli.client_tag,
        feed_dir: Some(cli.feed_dir.unwrap_or_else(default_feed_dir)),
    };
    tracing::debug!(
        api_url = %config.api_url,
        auto_record = config.auto_record,
        feed_dir = ?config.feed_dir,
        "configuration resolved"
    );
    let code = run(config, cli.command.unwrap_or_default()).await;
    std::process::exit(code);
}
