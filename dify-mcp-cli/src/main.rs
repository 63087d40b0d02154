use std::process;

mod cli;

use clap::Parser;
use cli::Cli;
use dify_client::build_http_client;
use dify_mcp::{
    serve_stdio, start_http, DifyConnector, DifyMcpServer, ServerConfig, Transport,
    WorkflowRegistry,
};

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    configure_logging(cli.debug, cli.quiet);

    let exit_code = match run(cli).await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            EXIT_ERROR
        }
    };
    process::exit(exit_code);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ServerConfig::load(cli.config.as_deref(), &cli.overrides())?;

    let http = build_http_client(config.connect_timeout())?;
    let connector = DifyConnector::new(http, config.base_url.clone());
    let registry =
        WorkflowRegistry::build(&config.api_keys, &config.workflow_names, &connector).await?;
    for registration in registry.iter() {
        tracing::debug!(
            "Workflow '{}' uses key {} with {} inputs",
            registration.name(),
            registration.credential().hint(),
            registration.fields().len()
        );
    }

    let server = DifyMcpServer::new(registry, config.invocation_options());

    match config.transport {
        Transport::Stdio => serve_stdio(server).await?,
        Transport::Http => {
            let handle = start_http(server, &config.host, config.port).await?;
            tracing::info!("Serving MCP at {}", handle.url());

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            handle.shutdown().await?;
        }
    }
    Ok(())
}

/// Logs always go to stderr; stdout belongs to the stdio transport
fn configure_logging(debug: bool, quiet: bool) {
    use tracing::Level;
    use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

    let log_level = if quiet {
        Level::ERROR
    } else if debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rmcp=warn,{log_level}")));

    registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .init();
}
