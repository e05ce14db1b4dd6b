//! Command line and the configuration structs derived from it.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::agent::{
    AgentConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_PREVIEW_CHARS,
};
use crate::ai_sdk::anthropic::{AnthropicConfig, DEFAULT_API_VERSION, DEFAULT_BASE_URL};
use crate::client::DEFAULT_SERVER_URL;
use crate::mcp::StdioConnector;
use crate::mcp::stdio::DEFAULT_STARTUP_TIMEOUT;
use crate::provider::arxiv::ARXIV_API_URL;
use crate::server::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_CORS_ORIGINS, DEFAULT_LISTEN, DEFAULT_MAX_TERM_CHARS,
    ServerConfig,
};

pub const TOOLS_SERVER_SUBCOMMAND: &str = "tools-server";
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_DISCOVERY_TTL_SECS: u64 = 600;

/// Explain research terms, grounded in papers found along the way
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the explanation HTTP service
    Serve(ServeArgs),

    /// Ask a running service to explain a term
    Explain {
        /// The term or phrase to explain
        #[arg(required = true, num_args = 1..)]
        term: Vec<String>,

        /// Base URL of the explanation service
        #[arg(long, env = "PAPERLENS_URL", default_value = DEFAULT_SERVER_URL)]
        url: String,

        /// Print to stdout instead of opening the terminal viewer
        #[arg(long)]
        plain: bool,
    },

    /// Run the built-in paper search capability server on stdin/stdout
    ToolsServer {
        /// arXiv query endpoint
        #[arg(long, env = "ARXIV_API_URL", default_value = ARXIV_API_URL)]
        arxiv_url: String,
    },
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "PAPERLENS_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Anthropic API key; explanation requests fail with 500 without one
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub anthropic_base_url: String,

    #[arg(long, env = "PAPERLENS_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_tokens: u32,

    /// Maximum model calls per explanation
    #[arg(long, env = "PAPERLENS_MAX_ITERATIONS", default_value_t = DEFAULT_MAX_ITERATIONS)]
    pub max_iterations: u32,

    #[arg(long, default_value_t = DEFAULT_SESSION_TIMEOUT_SECS)]
    pub session_timeout_secs: u64,

    /// Characters of each tool result shown to the client
    #[arg(long, default_value_t = DEFAULT_PREVIEW_CHARS)]
    pub preview_chars: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_TERM_CHARS)]
    pub max_term_chars: usize,

    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// Browser origin allowed to call the API; repeat or comma-separate for several
    #[arg(
        long = "cors-origin",
        env = "PAPERLENS_CORS_ORIGINS",
        value_delimiter = ',',
        default_values = DEFAULT_CORS_ORIGINS
    )]
    pub cors_origins: Vec<String>,

    /// Command that starts the capability server [default: this binary's tools-server]
    #[arg(long, env = "PAPERLENS_TOOLS_COMMAND")]
    pub tools_command: Option<String>,

    /// Argument passed to --tools-command; repeat for several
    #[arg(long = "tools-arg", allow_hyphen_values = true)]
    pub tools_args: Vec<String>,

    /// Seconds a discovered tool list stays fresh
    #[arg(long, default_value_t = DEFAULT_DISCOVERY_TTL_SECS)]
    pub discovery_ttl_secs: u64,

    /// Seconds to wait for the capability server's handshake
    #[arg(long, default_value_t = DEFAULT_STARTUP_TIMEOUT.as_secs())]
    pub tools_startup_timeout_secs: u64,
}

/// How to reach the capability server.
#[derive(Debug, Clone)]
pub struct ToolServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub discovery_ttl: Duration,
    pub startup_timeout: Duration,
}

impl ToolServerConfig {
    pub fn connector(&self) -> StdioConnector {
        StdioConnector::new(self.command.clone(), self.args.clone())
            .with_startup_timeout(self.startup_timeout)
    }
}

impl ServeArgs {
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            max_iterations: self.max_iterations.max(1),
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            tool_result_preview_chars: self.preview_chars,
            ..AgentConfig::default()
        }
    }

    /// `None` when no usable API key was given.
    pub fn anthropic_config(&self) -> Option<AnthropicConfig> {
        let api_key = self.api_key.as_deref().map(str::trim).unwrap_or_default();
        if api_key.is_empty() {
            return None;
        }
        Some(AnthropicConfig {
            api_key: api_key.to_string(),
            base_url: self.anthropic_base_url.trim_end_matches('/').to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            listen: self.listen.clone(),
            max_term_chars: self.max_term_chars,
            channel_capacity: self.channel_capacity,
            cors_origins: self.cors_origins.clone(),
        }
    }

    pub fn tool_server_config(&self) -> std::io::Result<ToolServerConfig> {
        let (command, args) = match &self.tools_command {
            Some(command) => (command.clone(), self.tools_args.clone()),
            None => {
                let exe = std::env::current_exe()?;
                (
                    exe.to_string_lossy().into_owned(),
                    vec![TOOLS_SERVER_SUBCOMMAND.to_string()],
                )
            }
        };
        Ok(ToolServerConfig {
            command,
            args,
            discovery_ttl: Duration::from_secs(self.discovery_ttl_secs),
            startup_timeout: Duration::from_secs(self.tools_startup_timeout_secs),
        })
    }
}
