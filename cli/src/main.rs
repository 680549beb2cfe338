//! CLI entrypoint for acp-broker.
//!
//! Wires the layers together: config, logging, the upstream LLM client,
//! and the chosen transport. On the stdio transport stdout belongs to the
//! protocol, so all diagnostics go to stderr.

use anyhow::Result;
use broker_application::config::BrokerConfig;
use broker_application::ports::llm_gateway::LlmGateway;
use broker_infrastructure::llm::client::OpenAiClient;
use broker_infrastructure::serve::{serve_stdio, serve_ws};
use clap::{Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "acp-broker", version, about = "Agent Communication Protocol broker")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker over stdio, or over a WebSocket listener with --listen
    Serve {
        /// Listen address for the WebSocket transport, e.g. 127.0.0.1:8137.
        /// Without it the broker speaks newline-delimited JSON-RPC on stdio.
        #[arg(long)]
        listen: Option<String>,

        /// Path to the configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    // Stdout carries protocol frames; logging must stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Command::Serve { listen, config } => {
            let config = load_config(config)?;
            let gateway: Arc<dyn LlmGateway> = Arc::new(OpenAiClient::new(config.llm.clone()));

            match listen {
                Some(addr) => {
                    serve_ws(&addr, config, gateway).await?;
                }
                None => {
                    info!("serving on stdio");
                    serve_stdio(config, gateway).await;
                }
            }
        }
    }

    Ok(())
}

/// Merge configuration sources: defaults, then the TOML file (explicit
/// path or the default location), then `ACP_BROKER_`-prefixed env vars.
fn load_config(path: Option<PathBuf>) -> Result<BrokerConfig> {
    let mut figment = Figment::from(Serialized::defaults(BrokerConfig::default()));

    let path = path.or_else(default_config_path);
    if let Some(path) = path {
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
    }

    let config = figment
        .merge(Env::prefixed("ACP_BROKER_").split("__"))
        .extract()?;
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("acp-broker").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_config_defaults_without_file() {
        let config = load_config(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config.agent.name, "acp-broker");
    }

    #[test]
    fn load_config_merges_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[model]\nmodel = \"llama-3.3-70b\"\n\n[llm]\nbase_url = \"http://10.0.0.5:8000/v1\""
        )
        .unwrap();

        let config = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.model.model, "llama-3.3-70b");
        assert_eq!(config.llm.base_url, "http://10.0.0.5:8000/v1");
        // Untouched sections keep their defaults.
        assert_eq!(config.timeouts.file_op_secs, 30);
    }

    #[test]
    fn cli_parses_serve_with_listen() {
        let cli = Cli::try_parse_from(["acp-broker", "serve", "--listen", "127.0.0.1:8137", "-vv"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Serve { listen, config } => {
                assert_eq!(listen.as_deref(), Some("127.0.0.1:8137"));
                assert!(config.is_none());
            }
        }
    }
}
