//! BlockDAG Lens - Kaspa explorer server
//!
//! Serves normalized blocks, DAG layouts and live network metrics.

use blockdag_lens::{
    ApiState, FailurePolicy, KaspaClient, LensConfig, LensServer, Result, UpstreamConfig,
};
use clap::Parser;
use std::time::Duration;

/// Kaspa BlockDAG explorer backend
#[derive(Parser, Debug)]
#[command(name = "blockdag-lens")]
#[command(version)]
#[command(about = "Kaspa BlockDAG explorer backend with live metrics", long_about = None)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Base URL of the Kaspa REST API
    #[arg(long, env = "KASPA_API_BASE", default_value = blockdag_lens::upstream::DEFAULT_BASE_URL)]
    upstream: String,

    /// Upstream request timeout in milliseconds
    #[arg(long, env = "KASPA_API_TIMEOUT_MS", default_value_t = blockdag_lens::upstream::DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Seconds between two live-feed pushes
    #[arg(long, env = "FEED_INTERVAL_SECS", default_value_t = blockdag_lens::feed::DEFAULT_INTERVAL.as_secs())]
    feed_interval_secs: u64,

    /// Keep serving metrics when some info endpoints fail
    #[arg(long, env = "ISOLATE_FAILURES")]
    isolate_failures: bool,

    /// Enable CORS for cross-origin requests (`--cors false` turns it off)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    cors: bool,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = LensConfig {
        host: args.host,
        port: args.port,
        enable_cors: args.cors,
        enable_tracing: args.verbose > 0,
    };

    let client = KaspaClient::new(UpstreamConfig {
        base_url: args.upstream,
        timeout_ms: args.timeout_ms,
        ..Default::default()
    })?;
    let policy = if args.isolate_failures {
        FailurePolicy::Isolate
    } else {
        FailurePolicy::FailFast
    };
    let state = ApiState::new(
        client,
        policy,
        Duration::from_secs(args.feed_interval_secs.max(1)),
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install CTRL+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        log::info!("Shutdown signal received");
    };

    LensServer::new(config, state)
        .start_with_shutdown(shutdown)
        .await
}
