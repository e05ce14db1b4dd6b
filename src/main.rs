mod agent;
mod ai_sdk;
mod client;
mod codec;
mod config;
mod mcp;
mod prompt;
mod protocol;
mod provider;
mod publisher;
mod server;
mod tools;
mod ui;

use std::error::Error;
use std::io;
use std::sync::Arc;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use agent::Agent;
use ai_sdk::anthropic::AnthropicClient;
use client::ExplainClient;
use config::{Cli, Command, ServeArgs};
use provider::ArxivClient;
use tools::DiscoveryCache;

type MainResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            init_tracing("info");
            serve(args).await
        }
        Command::Explain { term, url, plain } => {
            // The viewer owns the screen; only log there when asked to.
            init_tracing(if plain { "warn" } else { "off" });
            explain(term.join(" "), &url, plain).await
        }
        Command::ToolsServer { arxiv_url } => {
            init_tracing("info");
            let source = Arc::new(ArxivClient::new(arxiv_url));
            provider::serve(tokio::io::stdin(), tokio::io::stdout(), source).await?;
            Ok(())
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // stdout carries protocol traffic in tools-server mode.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

async fn serve(args: ServeArgs) -> MainResult<()> {
    let tools = args.tool_server_config()?;
    let cache = Arc::new(DiscoveryCache::new(tools.discovery_ttl));

    let agent = args.anthropic_config().map(|anthropic| {
        Agent::new(
            Arc::new(AnthropicClient::new(anthropic)),
            Arc::new(tools.connector()),
            cache,
            args.agent_config(),
        )
    });
    if agent.is_none() {
        warn!("ANTHROPIC_API_KEY is not set, explanation requests will be rejected");
    }

    server::run(args.server_config(), agent).await
}

async fn explain(term: String, url: &str, plain: bool) -> MainResult<()> {
    let client = ExplainClient::new(url);
    let status = client.status().await?;
    if !status.anthropic_configured {
        return Err(format!(
            "the service at {} has no Anthropic API key configured",
            client.base_url()
        )
        .into());
    }

    if !plain {
        ui::run_viewer(client, term)?;
        return Ok(());
    }

    let mut printer = ui::PlainPrinter::new();
    let mut stdout = io::stdout();
    let view = client
        .explain(&term, |view| {
            if let Err(e) = printer.update(view, &mut stdout) {
                warn!(error = %e, "failed to write to stdout");
            }
        })
        .await?;

    if view.errors.is_empty() {
        Ok(())
    } else {
        Err(format!("explanation finished with {} error(s)", view.errors.len()).into())
    }
}
