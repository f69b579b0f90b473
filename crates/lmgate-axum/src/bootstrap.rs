//! Composition root for the gateway.
//!
//! This is the only place where stores, services, and the engine gateway
//! are wired together. The native engine loader is injected by the caller:
//! the server binary uses the built-in echo engine, embedding hosts pass a
//! loader backed by their runtime library.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::info;

use lmgate_core::domain::SamplingParams;
use lmgate_core::events::{EventBroadcaster, EventEmitter};
use lmgate_core::paths;
use lmgate_core::ports::{EngineBackend, EngineLoader, EngineRuntime};
use lmgate_core::services::{ConversationRegistry, Dispatcher, TokenStore};
use lmgate_core::settings::Settings;
use lmgate_engine::EngineGateway;
use lmgate_store::{ConversationFileStore, FileTokenRepository};

/// Resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub data_dir: PathBuf,
    pub model_path: Option<PathBuf>,
    pub backend: EngineBackend,
    pub http_port: u16,
    pub default_ttl_ms: u64,
    pub default_sampling: SamplingParams,
    pub sweep_interval: Duration,
    pub host_caller_id: String,
}

impl GatewayConfig {
    /// Resolve a config from settings, filling the data dir from the
    /// environment when unset.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let data_dir = match &settings.data_dir {
            Some(dir) => dir.clone(),
            None => paths::data_root()?,
        };
        Ok(Self {
            data_dir,
            model_path: settings.model_path.clone(),
            backend: settings.effective_backend(),
            http_port: settings.effective_http_port(),
            default_ttl_ms: settings.effective_default_ttl_ms(),
            default_sampling: settings.effective_default_sampling(),
            sweep_interval: Duration::from_secs(settings.effective_sweep_interval_secs()),
            host_caller_id: settings.effective_host_caller_id(),
        })
    }
}

/// All initialized services for one gateway process.
pub struct GatewayContext {
    pub dispatcher: Arc<Dispatcher>,
    pub events: EventBroadcaster,
    sweeper: JoinHandle<()>,
}

impl GatewayContext {
    /// Stop background tasks. Called on shutdown.
    pub fn stop_background_tasks(&self) {
        self.sweeper.abort();
    }
}

/// Wire up stores, services, and the engine gateway.
pub async fn bootstrap(
    config: GatewayConfig,
    loader: Arc<dyn EngineLoader>,
) -> Result<GatewayContext> {
    info!(
        data_dir = %config.data_dir.display(),
        backend = %config.backend,
        "Bootstrapping gateway"
    );
    paths::ensure_directory(&config.data_dir)?;

    let conversation_store = Arc::new(
        ConversationFileStore::open(paths::conversations_dir(&config.data_dir)).await?,
    );
    let token_repo = Arc::new(FileTokenRepository::new(
        paths::token_store_path(&config.data_dir),
        paths::token_backup_path(&config.data_dir),
    ));

    let tokens = Arc::new(TokenStore::new(token_repo));
    tokens.load().await;

    let events = EventBroadcaster::with_defaults();
    let emitter: Arc<dyn EventEmitter> = Arc::new(events.clone());
    let gateway = Arc::new(EngineGateway::new(loader, conversation_store.clone()));
    let engine: Arc<dyn EngineRuntime> = gateway;

    let registry = Arc::new(ConversationRegistry::new(
        conversation_store,
        engine.clone(),
        emitter.clone(),
        config.default_ttl_ms,
        config.default_sampling,
        config.sweep_interval,
    ));
    registry.load_persisted().await;
    let sweeper = registry.spawn_sweeper();

    let dispatcher = Arc::new(Dispatcher::new(
        tokens,
        registry,
        engine,
        emitter,
        config.host_caller_id.clone(),
    ));

    if let Some(model_path) = &config.model_path {
        dispatcher.load_model(model_path, config.backend).await?;
    }

    Ok(GatewayContext {
        dispatcher,
        events,
        sweeper,
    })
}

/// Bootstrap and serve the HTTP surface until the process exits.
pub async fn start_server(config: GatewayConfig, loader: Arc<dyn EngineLoader>) -> Result<()> {
    let port = config.http_port;
    let context = bootstrap(config, loader).await?;
    let app = crate::routes::create_router(Arc::new(context));

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("lmgate server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
