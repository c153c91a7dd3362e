//! numflight server - standalone compute server for array transfers.
//!
//! Runs one built-in compute handler behind the numflight transfer channel,
//! with an optional HTTP status sidecar.

mod status;

use anyhow::{anyhow, Result};
use clap::Parser;
use numflight::{handlers, DeliveryMode, Server, ServerConfig, ServerDefaults};
use status::StatusState;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "numflight-server")]
#[command(about = "Compute server for numflight array transfers")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value_t = ServerDefaults::PORT)]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = ServerDefaults::HOST)]
    host: String,

    /// Built-in compute handler (echo, double)
    #[arg(long, default_value = "echo")]
    handler: String,

    /// Keep results after download so they can be read again
    #[arg(long)]
    retain_results: bool,

    /// Fail computations that run longer than this many seconds
    #[arg(long)]
    compute_timeout_secs: Option<u64>,

    /// Serve /health and /descriptors over HTTP on this port (0 = auto-assign)
    #[arg(long)]
    status_port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::default()
            .with_host(self.host.clone())
            .with_port(self.port);
        if self.retain_results {
            config = config.with_delivery(DeliveryMode::Retain);
        }
        if let Some(secs) = self.compute_timeout_secs {
            config = config.with_compute_timeout(Duration::from_secs(secs));
        }
        config
    }
}

fn init_logging(args: &Args) {
    // RUST_LOG wins over --debug when set
    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if args.json_logs {
        FmtSubscriber::builder().with_env_filter(filter).json().init();
    } else {
        FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting numflight server");

    let handler = handlers::by_name(&args.handler).ok_or_else(|| {
        anyhow!(
            "unknown handler '{}', expected one of: {}",
            args.handler,
            handlers::BUILTIN.join(", ")
        )
    })?;
    info!("Compute handler: {}", args.handler);

    let mut server = Server::start_shared(args.server_config(), handler).await?;

    // Port discovery for launchers and tests (intentional stdout)
    println!("NUMFLIGHT_PORT={}", server.addr().port());

    if let Some(port) = args.status_port {
        let state = Arc::new(StatusState {
            dispatcher: server.dispatcher().clone(),
            flight_addr: server.addr(),
        });
        let addr = status::start_status_server(state, &args.host, port).await?;
        println!("STATUS_PORT={}", addr.port());
    }

    info!("numflight server running on {}", server.location());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    server.shutdown();

    Ok(())
}
