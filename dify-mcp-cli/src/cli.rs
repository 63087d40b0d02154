use clap::Parser;
use dify_mcp::{ConfigOverrides, Transport};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dify-mcp")]
#[command(version)]
#[command(about = "An MCP server exposing Dify workflows as tools")]
#[command(long_about = "
dify-mcp exposes Dify workflow applications as Model Context Protocol tools.
Each configured application key becomes one tool named after the application;
calling the tool runs the workflow and returns its final output as text.

Configuration is layered: built-in defaults, then the --config file, then
DIFY_* environment variables, then the flags below.

  DIFY_BASE_URL        Dify API base URL (default http://localhost/v1)
  DIFY_API_KEYS        Comma-separated application keys
  DIFY_WORKFLOW_NAMES  Optional comma-separated tool names, one per key

Example usage:
  DIFY_API_KEYS=app-xxx dify-mcp --transport stdio
  dify-mcp --config dify.toml --port 9000
")]
pub struct Cli {
    /// Configuration file (toml, yaml or json)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Dify API base URL
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Transport to serve on: http or stdio
    #[arg(short, long)]
    pub transport: Option<Transport>,

    /// Host to bind the HTTP transport to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind the HTTP transport to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Seconds to wait for a workflow to finish
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "debug")]
    pub quiet: bool,
}

impl Cli {
    /// Flag values as the top configuration layer
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            base_url: self.base_url.clone(),
            transport: self.transport,
            host: self.host.clone(),
            port: self.port,
            invocation_timeout_secs: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags() {
        let cli = Cli::try_parse_from(["dify-mcp"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.debug);

        let overrides = cli.overrides();
        assert!(overrides.base_url.is_none());
        assert!(overrides.transport.is_none());
        assert!(overrides.port.is_none());
    }

    #[test]
    fn test_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "dify-mcp",
            "--config",
            "dify.toml",
            "--base-url",
            "http://localhost/v1",
            "--transport",
            "STDIO",
            "--port",
            "9000",
            "--timeout",
            "60",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("dify.toml")));
        let overrides = cli.overrides();
        assert_eq!(overrides.base_url.as_deref(), Some("http://localhost/v1"));
        assert_eq!(overrides.transport, Some(Transport::Stdio));
        assert_eq!(overrides.port, Some(9000));
        assert_eq!(overrides.invocation_timeout_secs, Some(60));
    }

    #[test]
    fn test_rejects_unknown_transport() {
        assert!(Cli::try_parse_from(["dify-mcp", "--transport", "sse"]).is_err());
    }

    #[test]
    fn test_debug_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["dify-mcp", "--debug", "--quiet"]).is_err());
    }
}
