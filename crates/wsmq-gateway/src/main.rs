//! wsmq binary.
//!
//! `wsmq serve` runs the WebSocket gateway; `wsmq monitor` prints broker
//! traffic.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wsmq_gateway::cli::{Cli, Commands, LogFormat, MonitorArgs, ServeArgs};
use wsmq_gateway::{GatewayServer, run_monitor};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let connector = args
        .broker
        .connector()
        .context("failed to configure broker")?;
    let config = args.server_config();

    info!("Starting wsmq gateway on {}", config.bind_addr);
    info!("  WebSocket endpoint: ws://{}/", config.bind_addr);

    let mut server = GatewayServer::new(config, connector);
    server
        .serve(args.bind, shutdown_signal())
        .await
        .context("gateway stopped with an error")
}

async fn monitor(args: MonitorArgs) -> anyhow::Result<()> {
    let connector = args
        .broker
        .connector()
        .context("failed to configure broker")?;

    let mut stdout = tokio::io::stdout();
    let lines = run_monitor(connector.as_ref(), &args.topics, shutdown_signal(), &mut stdout)
        .await
        .context("monitor stopped with an error")?;

    info!(lines, "Monitor stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let result = match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Monitor(args) => monitor(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
