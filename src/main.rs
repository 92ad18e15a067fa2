//! mcp-sse-client - connect to a tool server, list its tools and call one.
//!
//! ```text
//! mcp-sse-client --url http://localhost:8777 --token abcd \
//!     --call query --args '{"query": "SELECT * FROM employees"}'
//! ```

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mcp_sse_client::{Client, ClientConfig};

#[derive(Debug, Parser)]
#[command(name = "mcp-sse-client", version, about = "Call tools on an MCP server over SSE")]
struct Args {
    /// Base URL of the server's event stream
    #[arg(long, env = "MCP_SSE_URL", default_value = "http://localhost:8777")]
    url: String,

    /// Bearer token sent with every request
    #[arg(long, env = "MCP_SSE_TOKEN")]
    token: Option<String>,

    /// Extra header as `Name: value` (repeatable)
    #[arg(long = "header", short = 'H')]
    headers: Vec<String>,

    /// Client name announced in the handshake
    #[arg(long, default_value = "spark")]
    name: String,

    /// Client version announced in the handshake
    #[arg(long, default_value = "1.0.0")]
    client_version: String,

    /// Per-request timeout in seconds, 0 waits indefinitely
    #[arg(long, env = "MCP_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    timeout: u64,

    /// Seconds to wait for the server's endpoint event, 0 waits indefinitely
    #[arg(long, env = "MCP_ENDPOINT_TIMEOUT_SECS", default_value_t = 0)]
    endpoint_timeout: u64,

    /// Tool to call after listing
    #[arg(long)]
    call: Option<String>,

    /// JSON object passed as the tool's arguments
    #[arg(long, default_value = "{}")]
    args: String,
}

impl Args {
    fn config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::new(&self.url)
            .with_client_info(&self.name, &self.client_version)
            .with_request_timeout(seconds(self.timeout))
            .with_endpoint_timeout(seconds(self.endpoint_timeout));

        if let Some(token) = &self.token {
            config = config.with_bearer_token(token);
        }
        for header in &self.headers {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| anyhow!("Header must look like `Name: value`: {}", header))?;
            config = config.with_header(name.trim(), value.trim());
        }

        Ok(config)
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "mcp_sse_client=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let config = args.config()?;

    info!("Connecting to {}", config.base_url);
    let client = Client::connect_sse(&config)
        .await
        .with_context(|| format!("Failed to connect to {}", config.base_url))?;

    let tools = client.list_tools().await.context("Failed to list tools")?;
    info!("Server exposes {} tool(s)", tools.len());
    for tool in &tools {
        println!("{}\t{}", tool.name, tool.description);
    }

    if let Some(tool) = &args.call {
        let arguments: serde_json::Value =
            serde_json::from_str(&args.args).context("--args is not valid JSON")?;

        let content = client
            .call_tool(tool, arguments)
            .await
            .with_context(|| format!("Failed to call tool {}", tool))?;

        for item in &content {
            match (&item.text, &item.data) {
                (Some(text), _) => println!("{}", text),
                (None, Some(_)) => println!(
                    "[{} content, {}]",
                    item.content_type,
                    item.mime_type.as_deref().unwrap_or("unknown type")
                ),
                (None, None) => println!("[{} content]", item.content_type),
            }
        }
    }

    client.close();
    Ok(())
}
