//! lmgate-server: serve the gateway's HTTP surface.
//!
//! The binary ships with the built-in echo engine so the full surface can
//! be exercised without the native runtime; embedding hosts call
//! [`lmgate_axum::bootstrap`] directly with a loader backed by their
//! runtime library.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use lmgate_axum::{GatewayConfig, start_server};
use lmgate_core::ports::EngineBackend;
use lmgate_core::settings::Settings;
use lmgate_engine::mock::MockEngineLoader;

#[derive(Debug, Parser)]
#[command(name = "lmgate-server", about = "On-device inference gateway")]
struct Args {
    /// Root directory for durable state (defaults to LMGATE_DATA_DIR or ~/.lmgate).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Model to load at startup.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Compute backend: cpu, gpu, or npu.
    #[arg(long, default_value = "cpu")]
    backend: String,

    /// HTTP port to listen on.
    #[arg(long, default_value_t = lmgate_core::settings::DEFAULT_HTTP_PORT)]
    port: u16,

    /// Caller identity trusted with host-only operations.
    #[arg(long, default_value = lmgate_core::settings::DEFAULT_HOST_CALLER_ID)]
    host_caller: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let backend = EngineBackend::parse(&args.backend)
        .ok_or_else(|| anyhow!("unknown backend: {}", args.backend))?;

    let settings = Settings {
        data_dir: args.data_dir,
        model_path: args.model,
        backend: Some(backend),
        http_port: Some(args.port),
        host_caller_id: Some(args.host_caller),
        ..Settings::with_defaults()
    };
    let config = GatewayConfig::from_settings(&settings)?;

    warn!("No native runtime linked into this binary; serving with the built-in echo engine");
    start_server(config, Arc::new(MockEngineLoader::new())).await
}
